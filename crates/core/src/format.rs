//! Output image formats.

/// An image format the proxy can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    pub mime: &'static str,
    /// Canonical file extension, used for cache files and temp outputs.
    pub extension: &'static str,
    /// Other extensions accepted in request paths.
    pub aliases: &'static [&'static str],
    pub transparency: bool,
    pub lossless: bool,
    /// Whether the format takes part in `Accept` negotiation.
    pub negotiable: bool,
}

pub const AVIF: ImageFormat = ImageFormat {
    mime: "image/avif",
    extension: "avif",
    aliases: &[],
    transparency: true,
    lossless: true,
    negotiable: true,
};

pub const HEIC: ImageFormat = ImageFormat {
    mime: "image/heic",
    extension: "heic",
    aliases: &["heif"],
    transparency: true,
    lossless: true,
    negotiable: true,
};

pub const WEBP: ImageFormat = ImageFormat {
    mime: "image/webp",
    extension: "webp",
    aliases: &[],
    transparency: true,
    lossless: true,
    negotiable: true,
};

pub const JP2: ImageFormat = ImageFormat {
    mime: "image/jp2",
    extension: "jp2",
    aliases: &[],
    transparency: true,
    lossless: true,
    negotiable: true,
};

pub const JPEG: ImageFormat = ImageFormat {
    mime: "image/jpeg",
    extension: "jpg",
    aliases: &["jpeg", "jpe"],
    transparency: false,
    lossless: false,
    negotiable: true,
};

pub const PNG: ImageFormat = ImageFormat {
    mime: "image/png",
    extension: "png",
    aliases: &[],
    transparency: true,
    lossless: true,
    negotiable: true,
};

pub const GIF: ImageFormat = ImageFormat {
    mime: "image/gif",
    extension: "gif",
    aliases: &[],
    transparency: true,
    lossless: false,
    negotiable: false,
};

pub const TIFF: ImageFormat = ImageFormat {
    mime: "image/tiff",
    extension: "tiff",
    aliases: &["tif"],
    transparency: true,
    lossless: true,
    negotiable: false,
};

pub const BMP: ImageFormat = ImageFormat {
    mime: "image/bmp",
    extension: "bmp",
    aliases: &[],
    transparency: false,
    lossless: true,
    negotiable: false,
};

/// Every known format. Negotiable formats come first, in server preference
/// order.
pub const FORMATS: &[ImageFormat] = &[AVIF, HEIC, WEBP, JP2, JPEG, PNG, GIF, TIFF, BMP];

impl ImageFormat {
    pub fn from_mime(mime: &str) -> Option<&'static ImageFormat> {
        FORMATS.iter().find(|f| f.mime.eq_ignore_ascii_case(mime))
    }

    /// Look up by extension, with or without a leading dot.
    pub fn from_extension(ext: &str) -> Option<&'static ImageFormat> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        FORMATS
            .iter()
            .find(|f| f.extension == ext || f.aliases.contains(&ext.as_str()))
    }

    /// Formats eligible for `Accept` negotiation, most preferred first.
    pub fn negotiable() -> impl Iterator<Item = &'static ImageFormat> {
        FORMATS.iter().filter(|f| f.negotiable)
    }
}

/// File extension for a mime type: the canonical one when known, otherwise
/// the mime subtype.
pub fn extension_for_mime(mime: &str) -> &str {
    match ImageFormat::from_mime(mime) {
        Some(format) => format.extension,
        None => mime.rsplit('/').next().unwrap_or(mime),
    }
}
