//! Operations and the canonical transform string codec.
//!
//! Encoding groups tokens into three buckets regardless of input order:
//! `Expires` first, then rendering operations in encounter order, then output
//! flags sorted by token. Decoding accepts tokens in any order.

use crate::error::{Error, Result};
use crate::geometry::{Geometry, Gravity};
use crate::token::tokenize;
use std::fmt;

/// Default padding fill: transparent white.
pub const DEFAULT_PADDING_COLOR: &str = "FFFFFF00";

/// A single transformation step.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Flatten onto a color (lowercase hex, no `#`).
    Background(String),
    Crop(Geometry),
    /// Unix timestamp after which the URL is no longer served.
    Expires(u64),
    Grayscale,
    Interlace,
    Lossless,
    Optimize,
    Padding(Padding),
    Resize(Geometry),
    /// Rotation in degrees, encoded as `Ro<degrees>`.
    Rotate(f64),
    Watermark(Watermark),
    Transparent,
    Strip,
    Quality(u8),
    /// A token owned by a registered plugin.
    Extension { letter: char, value: String },
}

/// Encoding bucket of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bucket {
    Pre,
    Body,
    Post,
}

impl Operation {
    pub fn letter(&self) -> char {
        match self {
            Self::Background(_) => 'B',
            Self::Crop(_) => 'C',
            Self::Expires(_) => 'E',
            Self::Grayscale => 'G',
            Self::Interlace => 'I',
            Self::Lossless => 'L',
            Self::Optimize => 'O',
            Self::Padding(_) => 'P',
            Self::Resize(_) => 'S',
            Self::Rotate(_) => 'R',
            Self::Watermark(_) => 'W',
            Self::Transparent => 'T',
            Self::Strip => 'D',
            Self::Quality(_) => 'Q',
            Self::Extension { letter, .. } => *letter,
        }
    }

    pub fn bucket(&self) -> Bucket {
        match self {
            Self::Expires(_) => Bucket::Pre,
            Self::Interlace
            | Self::Lossless
            | Self::Optimize
            | Self::Transparent
            | Self::Strip
            | Self::Quality(_) => Bucket::Post,
            _ => Bucket::Body,
        }
    }

    /// Build a background operation from a `#RRGGBB`-style color.
    pub fn background(color: &str) -> Self {
        Self::Background(color.trim_start_matches('#').to_ascii_lowercase())
    }

    /// Letter of a core operation by its configuration name.
    pub fn letter_for_name(name: &str) -> Option<char> {
        Some(match name {
            "background" => 'B',
            "crop" => 'C',
            "expires" => 'E',
            "grayscale" => 'G',
            "interlace" => 'I',
            "lossless" => 'L',
            "optimize" => 'O',
            "padding" => 'P',
            "resize" => 'S',
            "rotate" => 'R',
            "watermark" => 'W',
            "transparent" => 'T',
            "strip" => 'D',
            "quality" => 'Q',
            _ => return None,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())?;
        match self {
            Self::Background(color) => f.write_str(color),
            Self::Crop(g) | Self::Resize(g) => write!(f, "{g}"),
            Self::Expires(t) => write!(f, "{t:x}"),
            Self::Padding(p) => write!(f, "{p}"),
            Self::Rotate(deg) => write!(f, "o{deg}"),
            Self::Watermark(w) => write!(f, "{w}"),
            Self::Quality(q) => write!(f, "{q}"),
            Self::Extension { value, .. } => f.write_str(value),
            Self::Grayscale
            | Self::Interlace
            | Self::Lossless
            | Self::Optimize
            | Self::Transparent
            | Self::Strip => Ok(()),
        }
    }
}

/// Edge padding with an optional fill color.
///
/// Holds the 1 to 4 values as written; missing edges follow the CSS-like
/// shorthand: right defaults to top, bottom to top, left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Padding {
    values: Vec<u32>,
    color: Option<String>,
}

impl Padding {
    pub fn new(values: &[u32], color: Option<&str>) -> Result<Self> {
        if values.is_empty() || values.len() > 4 {
            return Err(Error::InvalidPadding(format!("{values:?}")));
        }
        Ok(Self {
            values: values.to_vec(),
            color: color.map(|c| c.trim_start_matches('#').to_ascii_lowercase()),
        })
    }

    /// Parse `t[,r[,b[,l]]][w<hex>]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::InvalidPadding(raw.to_string());
        let (numbers, color) = match raw.split_once('w') {
            Some((numbers, color)) if is_hex_color(color) => (numbers, Some(color)),
            Some(_) => return Err(invalid()),
            None => (raw, None),
        };
        let values = numbers
            .split(',')
            .map(|v| v.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(&values, color).map_err(|_| invalid())
    }

    pub fn top(&self) -> u32 {
        self.values[0]
    }

    pub fn right(&self) -> u32 {
        self.values.get(1).copied().unwrap_or(self.top())
    }

    pub fn bottom(&self) -> u32 {
        self.values.get(2).copied().unwrap_or(self.top())
    }

    pub fn left(&self) -> u32 {
        self.values.get(3).copied().unwrap_or(self.right())
    }

    /// Fill color as `#RRGGBB[AA]`.
    pub fn color(&self) -> String {
        format!("#{}", self.color.as_deref().unwrap_or(DEFAULT_PADDING_COLOR))
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(u32::to_string).collect();
        f.write_str(&values.join(","))?;
        if let Some(color) = &self.color {
            write!(f, "w{color}")?;
        }
        Ok(())
    }
}

/// Where a watermark is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPosition {
    Gravity(Gravity),
    /// Scaled over the whole image, centered.
    Overlay,
}

impl WatermarkPosition {
    pub fn code(self) -> &'static str {
        match self {
            Self::Gravity(g) => g.code(),
            Self::Overlay => "o",
        }
    }
}

/// A watermark reference: index into the configured watermark list, a
/// position and an optional offset geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub id: usize,
    pub position: WatermarkPosition,
    pub offset: Geometry,
}

impl Watermark {
    /// Watermark `id` in the south-east corner.
    pub fn new(id: usize) -> Self {
        Self {
            id,
            position: WatermarkPosition::Gravity(Gravity::SouthEast),
            offset: Geometry::default(),
        }
    }

    /// Parse `<id><position><offset geometry>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::InvalidWatermark(raw.to_string());
        let digits = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
        let id = raw[..digits].parse().map_err(|_| invalid())?;
        let rest = &raw[digits..];
        let letters = rest
            .find(|c: char| !c.is_ascii_lowercase())
            .unwrap_or(rest.len())
            .min(2);
        let (position, offset) = rest.split_at(letters);

        let position = match position {
            "" => WatermarkPosition::Gravity(Gravity::SouthEast),
            "o" => WatermarkPosition::Overlay,
            code => WatermarkPosition::Gravity(Gravity::from_code(code).ok_or_else(invalid)?),
        };
        let offset = Geometry::parse(offset).map_err(|_| invalid())?;
        Ok(Self {
            id,
            position,
            offset,
        })
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.id, self.position.code(), self.offset)
    }
}

/// Output encoding flags carried by post-bucket operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub interlace: bool,
    pub lossless: bool,
    pub optimize: bool,
    pub transparent: bool,
    pub strip: bool,
    pub quality: Option<u8>,
}

/// An ordered list of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformations(Vec<Operation>);

impl Transformations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation) {
        self.0.push(op);
    }

    pub fn with(mut self, op: Operation) -> Self {
        self.push(op);
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode a transform string. Letters outside the core grammar are kept
    /// as [`Operation::Extension`] when listed in `extensions`, otherwise
    /// skipped.
    pub fn decode(s: &str, extensions: &[char]) -> Result<Self> {
        let mut ops = Vec::new();
        for token in tokenize(s) {
            let value = token.value;
            let op = match token.letter {
                'B' => {
                    if !is_hex_color(value) {
                        return Err(invalid_value("background", value));
                    }
                    Operation::Background(value.to_ascii_lowercase())
                }
                'C' => Operation::Crop(Geometry::parse_dimensioned(value)?),
                'E' => Operation::Expires(
                    u64::from_str_radix(value, 16).map_err(|_| invalid_value("expires", value))?,
                ),
                'G' => Operation::Grayscale,
                'I' => Operation::Interlace,
                'L' => Operation::Lossless,
                'O' => Operation::Optimize,
                'P' => Operation::Padding(Padding::parse(value)?),
                'S' => Operation::Resize(Geometry::parse_dimensioned(value)?),
                'W' => Operation::Watermark(Watermark::parse(value)?),
                'T' => Operation::Transparent,
                'D' => Operation::Strip,
                'Q' => Operation::Quality(
                    value
                        .parse::<u8>()
                        .ok()
                        .filter(|q| *q <= 100)
                        .ok_or_else(|| invalid_value("quality", value))?,
                ),
                // `R` is shared with plugin page selection; `o` marks rotation.
                'R' if value.starts_with('o') => Operation::Rotate(
                    value[1..]
                        .parse::<f64>()
                        .ok()
                        .filter(|d| d.is_finite())
                        .ok_or_else(|| invalid_value("rotation", value))?,
                ),
                letter if extensions.contains(&letter) => {
                    // Extension values end up in cache file paths.
                    if value.contains(['/', '\\', '\0']) || value.contains("..") {
                        return Err(invalid_value("extension", value));
                    }
                    Operation::Extension {
                        letter,
                        value: value.to_string(),
                    }
                }
                _ => continue,
            };
            ops.push(op);
        }
        Ok(Self(ops))
    }

    /// Canonical transform string.
    pub fn encode(&self) -> String {
        self.encode_filtered(|_| true)
    }

    /// Canonical string without the `Expires` token, used as the cache key.
    pub fn cache_key(&self) -> String {
        self.encode_filtered(|op| !matches!(op, Operation::Expires(_)))
    }

    fn encode_filtered(&self, keep: impl Fn(&Operation) -> bool) -> String {
        let mut pre = String::new();
        let mut body = String::new();
        let mut post: Vec<String> = Vec::new();
        for op in self.0.iter().filter(|op| keep(op)) {
            match op.bucket() {
                Bucket::Pre => pre.push_str(&op.to_string()),
                Bucket::Body => body.push_str(&op.to_string()),
                Bucket::Post => post.push(op.to_string()),
            }
        }
        post.sort();
        pre + &body + &post.concat()
    }

    pub fn expires(&self) -> Option<u64> {
        self.0.iter().find_map(|op| match op {
            Operation::Expires(t) => Some(*t),
            _ => None,
        })
    }

    pub fn resize(&self) -> Option<&Geometry> {
        self.0.iter().find_map(|op| match op {
            Operation::Resize(g) => Some(g),
            _ => None,
        })
    }

    /// Scale every resize geometry by a device pixel ratio.
    pub fn scale_resize(&mut self, factor: f64) {
        for op in &mut self.0 {
            if let Operation::Resize(g) = op {
                *g = g.scaled(factor);
            }
        }
    }

    /// Rendering operations, in order.
    pub fn rendering(&self) -> impl Iterator<Item = &Operation> {
        self.0.iter().filter(|op| op.bucket() == Bucket::Body)
    }

    pub fn output_options(&self) -> OutputOptions {
        let mut options = OutputOptions::default();
        for op in &self.0 {
            match op {
                Operation::Interlace => options.interlace = true,
                Operation::Lossless => options.lossless = true,
                Operation::Optimize => options.optimize = true,
                Operation::Transparent => options.transparent = true,
                Operation::Strip => options.strip = true,
                Operation::Quality(q) => options.quality = Some(*q),
                _ => {}
            }
        }
        options
    }
}

impl From<Vec<Operation>> for Transformations {
    fn from(ops: Vec<Operation>) -> Self {
        Self(ops)
    }
}

impl FromIterator<Operation> for Transformations {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Transformations {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Transformations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn is_hex_color(s: &str) -> bool {
    (3..=8).contains(&s.len()) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn invalid_value(name: &'static str, value: &str) -> Error {
    Error::InvalidValue {
        name,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Modifier;

    #[test]
    fn test_encode_buckets_and_sorts() {
        let ops = Transformations::from(vec![
            Operation::Optimize,
            Operation::Resize(Geometry::parse("500x500^").unwrap()),
            Operation::Interlace,
            Operation::Expires(1449100194),
            Operation::Grayscale,
            Operation::Lossless,
            Operation::Watermark(Watermark::new(0)),
            Operation::Transparent,
            Operation::Padding(Padding::new(&[1, 2, 3, 4], Some("#EEDDCCAA")).unwrap()),
        ]);
        assert_eq!(
            ops.encode(),
            format!("E{:x}S500x500^GW0seP1,2,3,4weeddccaaILOT", 1449100194)
        );
    }

    #[test]
    fn test_post_bucket_always_sorted() {
        let ops = Transformations::from(vec![
            Operation::Optimize,
            Operation::Interlace,
            Operation::Lossless,
        ]);
        assert_eq!(ops.encode(), "ILO");

        let ops = Transformations::from(vec![Operation::Quality(80), Operation::Strip]);
        assert_eq!(ops.encode(), "DQ80");
    }

    #[test]
    fn test_background_lowercased_without_hash() {
        let ops = Transformations::new().with(Operation::background("#AABBCC"));
        assert_eq!(ops.encode(), "Baabbcc");
    }

    #[test]
    fn test_decode_recovers_operations() {
        let encoded = "E565f8ca2BaabbccS100x100#cpff0000W2nw+5+5P4,8wff0000Ro90IQ75T";
        let ops = Transformations::decode(encoded, &[]).unwrap();
        let decoded: Vec<_> = ops.iter().cloned().collect();
        assert_eq!(decoded[0], Operation::Expires(0x565f8ca2));
        assert_eq!(decoded[1], Operation::Background("aabbcc".to_string()));
        match &decoded[2] {
            Operation::Resize(g) => {
                assert_eq!(g.modifier, Some(Modifier::Pad));
                assert_eq!(g.color.as_deref(), Some("ff0000"));
            }
            other => panic!("expected resize, got {other:?}"),
        }
        match &decoded[3] {
            Operation::Watermark(w) => {
                assert_eq!(w.id, 2);
                assert_eq!(w.position, WatermarkPosition::Gravity(Gravity::NorthWest));
                assert_eq!(w.offset.x_offset, Some(5));
            }
            other => panic!("expected watermark, got {other:?}"),
        }
        assert_eq!(decoded[5], Operation::Rotate(90.0));
        assert_eq!(ops.encode(), encoded);
    }

    #[test]
    fn test_decode_unknown_letters_ignored_unless_claimed() {
        let ops = Transformations::decode("R2F10sS100", &[]).unwrap();
        assert_eq!(ops.encode(), "S100");

        let ops = Transformations::decode("R2F10sS100", &['R', 'F']).unwrap();
        assert_eq!(
            ops.iter().next(),
            Some(&Operation::Extension {
                letter: 'R',
                value: "2".to_string()
            })
        );
        assert_eq!(ops.encode(), "R2F10sS100");
    }

    #[test]
    fn test_decode_rejects_path_like_extension_values() {
        for raw in ["R../../x", "R2/3", "Ra\\b", "R.."] {
            let err = Transformations::decode(raw, &['R']).unwrap_err();
            assert!(err.is_invalid_transformation(), "{raw}");
        }
        // Unclaimed letters are skipped before any validation.
        assert!(Transformations::decode("R../../x", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_geometry() {
        let err = Transformations::decode("S+10+10", &[]).unwrap_err();
        assert!(err.is_invalid_transformation());
        assert_eq!(err.to_string(), "Invalid geometry \"+10+10\"");
    }

    #[test]
    fn test_decode_rejects_bad_values() {
        assert!(Transformations::decode("Q101", &[]).is_err());
        assert!(Transformations::decode("Ezz", &[]).is_err());
        assert!(Transformations::decode("Bnothex", &[]).is_err());
        assert!(Transformations::decode("Roabc", &[]).is_err());
    }

    #[test]
    fn test_cache_key_drops_expires() {
        let ops = Transformations::decode("E5f000000S100x100I", &[]).unwrap();
        assert_eq!(ops.cache_key(), "S100x100I");
        assert_eq!(ops.expires(), Some(0x5f000000));
    }

    #[test]
    fn test_output_options() {
        let ops = Transformations::decode("S10DLQ40", &[]).unwrap();
        let options = ops.output_options();
        assert!(options.strip);
        assert!(options.lossless);
        assert!(!options.interlace);
        assert_eq!(options.quality, Some(40));
        assert_eq!(ops.rendering().count(), 1);
    }

    #[test]
    fn test_padding_defaults() {
        let p = Padding::parse("5").unwrap();
        assert_eq!((p.top(), p.right(), p.bottom(), p.left()), (5, 5, 5, 5));
        assert_eq!(p.color(), "#FFFFFF00");

        let p = Padding::parse("1,2").unwrap();
        assert_eq!((p.top(), p.right(), p.bottom(), p.left()), (1, 2, 1, 2));

        let p = Padding::parse("1,2,3,4weeddccaa").unwrap();
        assert_eq!((p.top(), p.right(), p.bottom(), p.left()), (1, 2, 3, 4));
        assert_eq!(p.color(), "#eeddccaa");
        assert_eq!(p.to_string(), "1,2,3,4weeddccaa");
    }

    #[test]
    fn test_padding_rejects_malformed() {
        assert!(Padding::parse("").is_err());
        assert!(Padding::parse("1,2,3,4,5").is_err());
        assert!(Padding::parse("wff0000").is_err());
        assert!(Padding::parse("1wxyz").is_err());
    }

    #[test]
    fn test_watermark_forms() {
        assert_eq!(Watermark::new(3).to_string(), "3se");
        let w = Watermark::parse("0o").unwrap();
        assert_eq!(w.position, WatermarkPosition::Overlay);
        let w = Watermark::parse("1").unwrap();
        assert_eq!(w.to_string(), "1se");
        assert!(Watermark::parse("se").is_err());
        assert!(Watermark::parse("0zz").is_err());
    }

    #[test]
    fn test_scale_resize() {
        let mut ops = Transformations::decode("S100x50G", &[]).unwrap();
        ops.scale_resize(2.0);
        assert_eq!(ops.encode(), "S200x100G");
    }
}
