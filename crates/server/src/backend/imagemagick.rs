//! ImageMagick command-line backend (`file`, `identify`, `convert`).

use super::{
    Backend, BackendError, BackendResult, Identity, RenderOptions, SourceImage, WatermarkImage,
};
use pigment_core::config::BackendConfig;
use pigment_core::format::{JPEG, PNG, WEBP};
use pigment_core::{Geometry, Gravity, ImageFormat, Modifier, Operation, Padding, Watermark};
use pigment_core::transform::WatermarkPosition;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempPath;
use tracing::{debug, warn};

const UNSHARP: &str = "0x0.75+0.75+0.008";

const IDENTIFY_FORMAT: &str =
    "Opaque: %[opaque]\nGeometry: %[w]x%[h]\nOrientation: %[EXIF:Orientation]\n";

/// Writable formats assumed when `identify -list format` cannot be read.
const FALLBACK_FORMATS: [&str; 3] = [JPEG.mime, PNG.mime, WEBP.mime];

/// Resource limits passed to every `convert` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Limits {
    pub memory: Option<String>,
    pub disk: Option<String>,
}

pub struct ImageMagickBackend {
    limits: Limits,
    formats: Vec<&'static str>,
    watermarks: Vec<WatermarkImage>,
}

impl ImageMagickBackend {
    /// Probe the installed ImageMagick for writable formats. Runs a command,
    /// so call it from a blocking context.
    pub fn new(config: &BackendConfig) -> Self {
        let BackendConfig::ImageMagick {
            memory_limit,
            disk_limit,
        } = config;

        let formats = match run("identify", Command::new("identify").args(["-list", "format"])) {
            Ok(list) => parse_format_list(&list),
            Err(e) => {
                warn!(error = %e, "could not list ImageMagick formats, assuming jpeg, png and webp");
                FALLBACK_FORMATS.to_vec()
            }
        };
        debug!(?formats, "ImageMagick writable formats");

        Self::with_formats(
            Limits {
                memory: memory_limit.clone(),
                disk: disk_limit.clone(),
            },
            formats,
        )
    }

    pub fn with_formats(limits: Limits, formats: Vec<&'static str>) -> Self {
        Self {
            limits,
            formats,
            watermarks: Vec::new(),
        }
    }

    /// Identify and register watermark images, addressed by position.
    pub fn load_watermarks(mut self, paths: &[PathBuf]) -> BackendResult<Self> {
        for path in paths {
            let identity = self.identify(path)?;
            self.watermarks.push(WatermarkImage {
                path: path.clone(),
                width: identity.width,
                height: identity.height,
            });
        }
        Ok(self)
    }
}

impl Backend for ImageMagickBackend {
    fn identify(&self, path: &Path) -> BackendResult<Identity> {
        let mime = run("file", Command::new("file").args(["--mime", "-b"]).arg(path))?;
        let mime = mime.split(';').next().unwrap_or_default().trim().to_string();

        let output = run(
            "identify",
            Command::new("identify")
                .arg("-format")
                .arg(IDENTIFY_FORMAT)
                .arg(path),
        )?;
        parse_identify(mime, &output)
    }

    fn transform(
        &self,
        source: &SourceImage,
        operations: &[Operation],
        options: &RenderOptions,
    ) -> BackendResult<TempPath> {
        let output = tempfile::Builder::new()
            .prefix("pigment-")
            .suffix(&format!(".{}", options.format.extension))
            .tempfile()?
            .into_temp_path();

        let args = convert_args(
            &self.limits,
            &self.watermarks,
            source,
            operations,
            options,
            &output,
        )?;
        debug!(?args, "running convert");
        run("convert", Command::new("convert").args(&args))?;
        Ok(output)
    }

    fn supports(&self, mime: &str) -> bool {
        self.formats.iter().any(|f| f.eq_ignore_ascii_case(mime))
    }
}

pub(crate) fn run(program: &'static str, command: &mut Command) -> BackendResult<String> {
    let output = command.output()?;
    if !output.status.success() {
        return Err(BackendError::Command {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Writable formats from `identify -list format`.
pub(crate) fn parse_format_list(output: &str) -> Vec<&'static str> {
    let mut mimes: Vec<&'static str> = Vec::new();
    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let [name, _module, mode, ..] = columns.as_slice() else {
            continue;
        };
        let mode = mode.as_bytes();
        if mode.len() != 3 || mode[1] != b'w' || !mode.iter().all(|c| b"rw+-".contains(c)) {
            continue;
        }
        if let Some(format) = ImageFormat::from_extension(name.trim_end_matches('*'))
            && !mimes.contains(&format.mime)
        {
            mimes.push(format.mime);
        }
    }
    mimes
}

pub(crate) fn parse_identify(mime: String, output: &str) -> BackendResult<Identity> {
    let unexpected = || BackendError::UnexpectedOutput {
        program: "identify",
        output: output.to_string(),
    };
    let field = |name: &str| {
        output.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    };

    let opaque = field("Opaque").ok_or_else(unexpected)?.eq_ignore_ascii_case("true");
    let (width, height) = field("Geometry")
        .and_then(|g| g.split_once('x'))
        .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
        .ok_or_else(unexpected)?;
    let orientation = field("Orientation").and_then(|o| o.parse().ok());

    Ok(Identity {
        mime,
        opaque,
        orientation,
        width,
        height,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Size {
    width: u32,
    height: u32,
}

/// Argument list for one `convert` run.
struct ConvertArgs<'a> {
    args: Vec<String>,
    /// Running estimate of the canvas size, for watermark placement.
    size: Size,
    watermarks: &'a [WatermarkImage],
}

pub(crate) fn convert_args(
    limits: &Limits,
    watermarks: &[WatermarkImage],
    source: &SourceImage,
    operations: &[Operation],
    options: &RenderOptions,
    output: &Path,
) -> BackendResult<Vec<String>> {
    let identity = &source.identity;
    // -auto-orient swaps the axes for the transposing orientations.
    let size = if matches!(identity.orientation, Some(5..=8)) {
        Size {
            width: identity.height,
            height: identity.width,
        }
    } else {
        Size {
            width: identity.width,
            height: identity.height,
        }
    };

    let mut cmd = ConvertArgs {
        args: Vec::new(),
        size,
        watermarks,
    };
    if let Some(memory) = &limits.memory {
        cmd.push(["-limit", "memory", memory]);
    }
    if let Some(disk) = &limits.disk {
        cmd.push(["-limit", "map", disk]);
    }
    cmd.push(["-background", "none"]);
    cmd.args.push(source.path.to_string_lossy().into_owned());
    cmd.push(["-colorspace", "sRGB", "-auto-orient"]);
    if options.output.transparent {
        cmd.push(["-alpha", "Set"]);
    }

    for op in operations {
        match op {
            Operation::Background(color) => cmd.push(["-background", &format!("#{color}"), "-flatten"]),
            Operation::Resize(geometry) => cmd.resize(geometry),
            Operation::Crop(geometry) => cmd.crop(geometry),
            Operation::Grayscale => cmd.push(["-colorspace", "gray"]),
            Operation::Padding(padding) => cmd.pad(padding),
            Operation::Watermark(watermark) => cmd.watermark(watermark)?,
            Operation::Rotate(degrees) => cmd.rotate(*degrees),
            _ => {}
        }
    }

    cmd.encoding(options);
    cmd.args.push(output.to_string_lossy().into_owned());
    Ok(cmd.args)
}

impl ConvertArgs<'_> {
    fn push<const N: usize>(&mut self, args: [&str; N]) {
        self.args.extend(args.iter().map(|a| a.to_string()));
    }

    fn resize(&mut self, geometry: &Geometry) {
        let size = geometry.size_string();
        let gravity = geometry.gravity.unwrap_or(Gravity::Center).name();
        match geometry.modifier {
            Some(Modifier::Fill) => {
                self.push([
                    "(",
                    "-resize",
                    &format!("{size}^"),
                    "-unsharp",
                    UNSHARP,
                    "-gravity",
                    gravity,
                    "-crop",
                    &format!("{size}+0+0"),
                    ")",
                ]);
                self.size = self.boxed(geometry);
            }
            Some(Modifier::Pad) => {
                self.push(["(", "-resize", &size, "-unsharp", UNSHARP, ")"]);
                if let Some(color) = &geometry.color {
                    self.push(["-background", &format!("#{color}"), "-compose", "Copy"]);
                }
                self.push(["-gravity", gravity, "-extent", &size]);
                self.size = self.boxed(geometry);
            }
            modifier => {
                let arg = match modifier {
                    Some(m) => format!("{size}{}", m.as_char()),
                    None => size,
                };
                self.push(["(", "-resize", &arg, "-unsharp", UNSHARP, ")"]);
                self.size = fit(self.size, geometry);
            }
        }
        self.push(["+repage"]);
    }

    /// Exact box of a geometry, a missing side mirroring the other.
    fn boxed(&self, geometry: &Geometry) -> Size {
        match (geometry.width, geometry.height) {
            (Some(width), Some(height)) => Size { width, height },
            (Some(side), None) | (None, Some(side)) => Size {
                width: side,
                height: side,
            },
            (None, None) => self.size,
        }
    }

    fn crop(&mut self, geometry: &Geometry) {
        let width = geometry.width.or(geometry.height).unwrap_or(self.size.width);
        let height = geometry.height.or(geometry.width).unwrap_or(self.size.height);
        let has_offset = geometry.x_offset.is_some() || geometry.y_offset.is_some();
        let gravity = match geometry.gravity {
            Some(g) => g,
            None if has_offset => Gravity::NorthWest,
            None => Gravity::Center,
        };
        let x = geometry.x_offset.unwrap_or(0);
        let y = geometry.y_offset.unwrap_or(0);
        self.push([
            "-gravity",
            gravity.name(),
            "-crop",
            &format!("{width}x{height}{x:+}{y:+}"),
            "+repage",
        ]);
        self.size = Size {
            width: width.min(self.size.width),
            height: height.min(self.size.height),
        };
    }

    fn pad(&mut self, padding: &Padding) {
        let color = padding.color();
        self.push([
            "-gravity",
            "northeast",
            "-background",
            &color,
            "-splice",
            &format!("{}x{}", padding.right(), padding.top()),
            "-gravity",
            "southwest",
            "-background",
            &color,
            "-splice",
            &format!("{}x{}", padding.left(), padding.bottom()),
        ]);
        self.size.width += padding.right() + padding.left();
        self.size.height += padding.top() + padding.bottom();
    }

    fn watermark(&mut self, watermark: &Watermark) -> BackendResult<()> {
        let mark = self.watermarks.get(watermark.id).ok_or_else(|| {
            BackendError::InvalidTransformation(format!("Invalid watermark \"{}\"", watermark.id))
        })?;
        let canvas = self.size;
        let offset = &watermark.offset;

        let (width, height) = match (offset.width, offset.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, scale(w, mark.height, mark.width)),
            (None, Some(h)) => (scale(h, mark.width, mark.height), h),
            (None, None) if watermark.position == WatermarkPosition::Overlay => {
                let fitted = fit(
                    Size {
                        width: mark.width,
                        height: mark.height,
                    },
                    &Geometry::sized(canvas.width, canvas.height),
                );
                (fitted.width, fitted.height)
            }
            (None, None) => {
                let area = u64::from(canvas.width) * u64::from(canvas.height);
                let share = if area <= 60_000 {
                    0.10
                } else if area <= 90_000 {
                    0.08
                } else {
                    0.05
                };
                let side = (f64::from(canvas.width.max(canvas.height)) * share).floor() as u32;
                (side, side)
            }
        };

        let spacing = (f64::from(width) / 2.0).ceil() as i32;
        let (default_x, default_y) = match watermark.position {
            WatermarkPosition::Gravity(Gravity::North | Gravity::South) => (0, spacing),
            WatermarkPosition::Gravity(Gravity::East | Gravity::West) => (spacing, 0),
            WatermarkPosition::Gravity(
                Gravity::NorthEast | Gravity::NorthWest | Gravity::SouthEast | Gravity::SouthWest,
            ) => (spacing, spacing),
            _ => (0, 0),
        };
        let x = offset.x_offset.unwrap_or(default_x);
        let y = offset.y_offset.unwrap_or(default_y);

        let gravity = match watermark.position {
            WatermarkPosition::Gravity(g) => g,
            WatermarkPosition::Overlay => Gravity::Center,
        };
        // Marks that would cover more than half of the canvas are dropped.
        let fits = canvas.width > width * 2 && canvas.height > height * 2;
        if watermark.position == WatermarkPosition::Overlay || fits {
            let file = mark.path.to_string_lossy().into_owned();
            self.push([
                "(",
                "-background",
                "none",
                &file,
                "-gravity",
                gravity.name(),
                "-geometry",
                &format!("{width}x{height}{x:+}{y:+}"),
                ")",
                "-compose",
                "over",
                "-composite",
            ]);
        }
        Ok(())
    }

    fn rotate(&mut self, degrees: f64) {
        self.push(["-rotate", &degrees.to_string(), "+repage"]);
        if (degrees / 90.0).round().rem_euclid(2.0) == 1.0 {
            self.size = Size {
                width: self.size.height,
                height: self.size.width,
            };
        }
    }

    fn encoding(&mut self, options: &RenderOptions) {
        let output = &options.output;
        let mime = options.format.mime;
        let default_quality = match mime {
            "image/avif" | "image/webp" => Some(45),
            "image/heic" | "image/jp2" => Some(40),
            "image/jpeg" => Some(43),
            _ => None,
        };
        match output.quality {
            Some(q) if matches!(mime, "image/jpeg" | "image/jp2" | "image/heic" | "image/avif") => {
                self.push(["-quality", &q.clamp(1, 100).to_string()]);
            }
            Some(q) => self.push(["-quality", &q.to_string()]),
            None => {
                if let Some(q) = default_quality {
                    self.push(["-quality", &q.to_string()]);
                }
            }
        }
        match mime {
            "image/jpeg" => self.push(["-define", "jpeg:optimize-coding=on"]),
            "image/png" => self.push(["-define", "png:compression-level=9"]),
            _ => {}
        }
        if output.strip {
            self.push(["-strip"]);
        }
        if output.lossless {
            self.push(["-define", "webp:lossless=true"]);
        }
        if output.interlace {
            self.push(["-interlace", "Plane"]);
        }
    }
}

/// `value * numerator / denominator`, rounded.
fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return value;
    }
    (f64::from(value) * f64::from(numerator) / f64::from(denominator)).round() as u32
}

/// Size of `current` after resizing to `geometry`.
fn fit(current: Size, geometry: &Geometry) -> Size {
    let (cw, ch) = (f64::from(current.width), f64::from(current.height));
    if cw == 0.0 || ch == 0.0 {
        return current;
    }
    let scale_w = geometry.width.map(|w| f64::from(w) / cw);
    let scale_h = geometry.height.map(|h| f64::from(h) / ch);

    if geometry.modifier == Some(Modifier::IgnoreAspect) {
        let width = geometry.width.unwrap_or(current.width);
        let height = geometry.height.unwrap_or(current.height);
        return Size { width, height };
    }

    let factor = match (scale_w, scale_h) {
        (Some(w), Some(h)) if geometry.modifier == Some(Modifier::Cover) => w.max(h),
        (Some(w), Some(h)) => w.min(h),
        (Some(s), None) | (None, Some(s)) => s,
        (None, None) => return current,
    };
    match geometry.modifier {
        Some(Modifier::ShrinkOnly) if factor >= 1.0 => return current,
        Some(Modifier::EnlargeOnly) if factor <= 1.0 => return current,
        _ => {}
    }
    Size {
        width: ((cw * factor).round() as u32).max(1),
        height: ((ch * factor).round() as u32).max(1),
    }
}
