//! Canvas sizing from a caller-supplied `"W:H"` aspect ratio.
//!
//! Width is fixed; height follows the ratio. Anything that is not two positive,
//! finite numbers separated by `:` falls back to a square canvas.

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Fixed canvas width used for every generated document.
pub const DEFAULT_WIDTH: u32 = 800;

/// `round(width * h / w)`, or `width` when either component is not a positive
/// finite number.
pub fn compute_height(width: u32, w: f64, h: f64) -> u32 {
    if !is_positive(w) || !is_positive(h) {
        return width;
    }
    let height = (f64::from(width) * h / w).round();
    if height >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        height as u32
    }
}

fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Parsed `W:H` ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectRatio {
    w: f64,
    h: f64,
}

impl ValueObject for AspectRatio {}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::square()
    }
}

impl AspectRatio {
    pub fn square() -> Self {
        Self { w: 1.0, h: 1.0 }
    }

    /// Strict parse; `None` on anything but two positive numbers.
    pub fn parse(input: &str) -> Option<Self> {
        let (w, h) = input.trim().split_once(':')?;
        let w: f64 = w.trim().parse().ok()?;
        let h: f64 = h.trim().parse().ok()?;
        if is_positive(w) && is_positive(h) {
            Some(Self { w, h })
        } else {
            None
        }
    }

    /// Lenient parse used on request input: invalid or missing means square.
    pub fn parse_or_square(input: Option<&str>) -> Self {
        input.and_then(Self::parse).unwrap_or_default()
    }
}

impl core::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.w, self.h)
    }
}

/// Resolved pixel dimensions, computed once per request and reused verbatim by
/// the prompt, the placeholder and the sanitizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl ValueObject for Canvas {}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_WIDTH,
        }
    }
}

impl Canvas {
    pub fn from_ratio(ratio: AspectRatio) -> Self {
        let height = compute_height(DEFAULT_WIDTH, ratio.w, ratio.h).max(1);
        Self {
            width: DEFAULT_WIDTH,
            height,
        }
    }

    pub fn from_aspect_ratio(input: Option<&str>) -> Self {
        Self::from_ratio(AspectRatio::parse_or_square(input))
    }

    /// `"0 0 {width} {height}"`.
    pub fn view_box(&self) -> String {
        format!("0 0 {} {}", self.width, self.height)
    }
}
