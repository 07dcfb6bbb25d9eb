//! Compact geometry strings: `WxH±X±Y<modifier><gravity>[p<color>]`.

use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::num::ParseIntError;
use std::sync::LazyLock;

static GEOMETRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d+)?(?:x(\d+))?([+-]\d+)?([+-]\d+)?([!<>#*^])?(ne|nw|se|sw|sm|n|e|s|w|c)?(?:p([0-9a-fA-F]{3,8}))?$",
    )
    .expect("geometry pattern is valid")
});

/// Anchor point used for crops, extents and watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gravity {
    North,
    East,
    South,
    West,
    Center,
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
    Smart,
}

impl Gravity {
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "n" => Self::North,
            "e" => Self::East,
            "s" => Self::South,
            "w" => Self::West,
            "c" => Self::Center,
            "ne" => Self::NorthEast,
            "nw" => Self::NorthWest,
            "se" => Self::SouthEast,
            "sw" => Self::SouthWest,
            "sm" => Self::Smart,
            _ => return None,
        })
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::North => "n",
            Self::East => "e",
            Self::South => "s",
            Self::West => "w",
            Self::Center => "c",
            Self::NorthEast => "ne",
            Self::NorthWest => "nw",
            Self::SouthEast => "se",
            Self::SouthWest => "sw",
            Self::Smart => "sm",
        }
    }

    /// Name used by command-line image tools (`-gravity North`).
    pub fn name(self) -> &'static str {
        match self {
            Self::North => "North",
            Self::East => "East",
            Self::South => "South",
            Self::West => "West",
            Self::Center => "Center",
            Self::NorthEast => "NorthEast",
            Self::NorthWest => "NorthWest",
            Self::SouthEast => "SouthEast",
            Self::SouthWest => "SouthWest",
            Self::Smart => "Center",
        }
    }
}

/// Resize behaviour flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// `!` ignore the aspect ratio.
    IgnoreAspect,
    /// `>` only shrink larger images.
    ShrinkOnly,
    /// `<` only enlarge smaller images.
    EnlargeOnly,
    /// `#` fit inside and pad to the exact extent.
    Pad,
    /// `*` fill and crop to the exact extent.
    Fill,
    /// `^` fill the box, possibly overflowing it.
    Cover,
}

impl Modifier {
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '!' => Self::IgnoreAspect,
            '>' => Self::ShrinkOnly,
            '<' => Self::EnlargeOnly,
            '#' => Self::Pad,
            '*' => Self::Fill,
            '^' => Self::Cover,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            Self::IgnoreAspect => '!',
            Self::ShrinkOnly => '>',
            Self::EnlargeOnly => '<',
            Self::Pad => '#',
            Self::Fill => '*',
            Self::Cover => '^',
        }
    }
}

/// A parsed geometry. Every field is optional; absent dimensions mean
/// "preserve the aspect ratio" to the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Geometry {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x_offset: Option<i32>,
    pub y_offset: Option<i32>,
    pub modifier: Option<Modifier>,
    pub gravity: Option<Gravity>,
    /// Lowercase hex color without `#`.
    pub color: Option<String>,
}

impl Geometry {
    /// Geometry with both dimensions set.
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    /// Parse a geometry string. An empty string yields an empty geometry.
    pub fn parse(s: &str) -> Result<Self> {
        let caps = GEOMETRY_RE
            .captures(s)
            .ok_or_else(|| Error::InvalidGeometry(s.to_string()))?;

        let invalid = |_: ParseIntError| Error::InvalidGeometry(s.to_string());
        let number = |i: usize| caps.get(i).map(|m| m.as_str());
        let width = number(1).map(parse_u32).transpose().map_err(invalid)?;
        let height = number(2).map(parse_u32).transpose().map_err(invalid)?;
        let x_offset = number(3).map(parse_offset).transpose().map_err(invalid)?;
        let y_offset = number(4).map(parse_offset).transpose().map_err(invalid)?;

        Ok(Self {
            width,
            height,
            x_offset,
            y_offset,
            modifier: number(5)
                .and_then(|m| m.chars().next())
                .and_then(Modifier::from_char),
            gravity: number(6).and_then(Gravity::from_code),
            color: number(7).map(str::to_ascii_lowercase),
        })
    }

    /// Parse a geometry that must carry a width or a height.
    pub fn parse_dimensioned(s: &str) -> Result<Self> {
        let geometry = Self::parse(s)?;
        if !geometry.has_dimension() {
            return Err(Error::InvalidGeometry(s.to_string()));
        }
        Ok(geometry)
    }

    pub fn has_dimension(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Multiply both dimensions by `factor`, rounding to the nearest pixel.
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |v: u32| ((f64::from(v) * factor).round().max(1.0)) as u32;
        Self {
            width: self.width.map(scale),
            height: self.height.map(scale),
            ..self.clone()
        }
    }

    /// `WxH` part only, suitable for command-line size arguments.
    pub fn size_string(&self) -> String {
        let mut out = String::new();
        if let Some(w) = self.width {
            out.push_str(&w.to_string());
        }
        if let Some(h) = self.height {
            out.push('x');
            out.push_str(&h.to_string());
        }
        out
    }
}

fn parse_u32(s: &str) -> std::result::Result<u32, ParseIntError> {
    s.parse()
}

fn parse_offset(s: &str) -> std::result::Result<i32, ParseIntError> {
    s.strip_prefix('+').unwrap_or(s).parse()
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.size_string())?;
        if let Some(x) = self.x_offset {
            write!(f, "{x:+}")?;
        }
        if let Some(y) = self.y_offset {
            write!(f, "{y:+}")?;
        }
        if let Some(m) = self.modifier {
            write!(f, "{}", m.as_char())?;
        }
        if let Some(g) = self.gravity {
            f.write_str(g.code())?;
        }
        if let Some(color) = &self.color {
            write!(f, "p{color}")?;
        }
        Ok(())
    }
}
