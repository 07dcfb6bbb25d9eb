//! `Accept` negotiation.

use pigment_core::ImageFormat;
use pigment_core::format::{JPEG, PNG};

/// Media ranges from an `Accept` header that the proxy can act on: wildcards
/// and the mimes of `usable` formats. Parameters such as `q` are dropped and
/// header order is kept.
pub fn parse_accept(header: &str, usable: &[&'static ImageFormat]) -> Vec<String> {
    header
        .split(',')
        .filter_map(|range| {
            let mime = range.split(';').next().unwrap_or_default().trim();
            let mime = mime.to_ascii_lowercase();
            let keep = mime == "*/*"
                || mime == "image/*"
                || usable.iter().any(|f| f.mime == mime);
            keep.then_some(mime)
        })
        .collect()
}

/// Pick the output format for a request without an explicit extension.
///
/// Without accepted ranges the image keeps a safe default: PNG when it has
/// transparency, JPEG otherwise. Otherwise the most preferred usable format
/// among the accepted ones wins, skipping formats that would lose
/// transparency.
pub fn select_format(
    accepts: &[String],
    transparent: bool,
    usable: &[&'static ImageFormat],
) -> Option<&'static ImageFormat> {
    let fallback: &'static ImageFormat = if transparent { &PNG } else { &JPEG };
    if accepts.is_empty() {
        return Some(fallback);
    }

    let accepted: Vec<&str> = accepts
        .iter()
        .map(|mime| match mime.as_str() {
            "*/*" | "image/*" => fallback.mime,
            other => other,
        })
        .collect();

    usable
        .iter()
        .copied()
        .filter(|format| !transparent || format.transparency)
        .find(|format| accepted.contains(&format.mime))
}
