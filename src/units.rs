//! Unit & Geometry Utilities
//!
//! Inches are the canonical unit. Millimeters (template design), points
//! (PDF and font sizes), and pixels/dots (raster and thermal engines) all
//! convert through inches.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const POINTS_PER_INCH: f64 = 72.0;
pub const MM_PER_INCH: f64 = 25.4;

/// Fallback printer density when no printer profile is supplied.
pub const DEFAULT_DPI: u32 = 203;

/// Largest label edge accepted anywhere in the pipeline (12 inches).
pub const MAX_LABEL_INCHES: f64 = 12.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Label dimensions must be positive, got {width}\" x {height}\"")]
    NonPositive { width: f64, height: f64 },

    #[error("Label dimensions {width}\" x {height}\" exceed the {max}\" maximum")]
    TooLarge { width: f64, height: f64, max: f64 },

    #[error("Label dimensions must be finite numbers")]
    NotFinite,
}

pub fn inches_to_points(inches: f64) -> f64 {
    inches * POINTS_PER_INCH
}

pub fn points_to_inches(points: f64) -> f64 {
    points / POINTS_PER_INCH
}

pub fn inches_to_pixels(inches: f64, dpi: u32) -> f64 {
    inches * dpi as f64
}

pub fn pixels_to_inches(pixels: f64, dpi: u32) -> f64 {
    pixels / dpi as f64
}

pub fn mm_to_inches(mm: f64) -> f64 {
    mm / MM_PER_INCH
}

pub fn inches_to_mm(inches: f64) -> f64 {
    inches * MM_PER_INCH
}

/// Whole device dots for a physical length; thermal languages only take integers.
pub fn inches_to_dots(inches: f64, dpi: u32) -> i64 {
    inches_to_pixels(inches, dpi).round() as i64
}

/// Point sizes (fonts, stroke widths) expressed in device dots.
pub fn points_to_dots(points: f64, dpi: u32) -> f64 {
    inches_to_pixels(points_to_inches(points), dpi)
}

/// Reject sizes that no engine can print.
pub fn validate_dimensions(width_inches: f64, height_inches: f64) -> Result<(), GeometryError> {
    if !width_inches.is_finite() || !height_inches.is_finite() {
        return Err(GeometryError::NotFinite);
    }
    if width_inches <= 0.0 || height_inches <= 0.0 {
        return Err(GeometryError::NonPositive {
            width: width_inches,
            height: height_inches,
        });
    }
    if width_inches > MAX_LABEL_INCHES || height_inches > MAX_LABEL_INCHES {
        return Err(GeometryError::TooLarge {
            width: width_inches,
            height: height_inches,
            max: MAX_LABEL_INCHES,
        });
    }
    Ok(())
}

/// One physical label size cached in every unit system an engine may ask for.
///
/// All fields are derived from `width_inches`/`height_inches` and `dpi` by the
/// constructors, so they stay mutually consistent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintDimensions {
    pub width_inches: f64,
    pub height_inches: f64,
    pub dpi: u32,
    pub width_points: f64,
    pub height_points: f64,
    pub width_pixels: f64,
    pub height_pixels: f64,
}

impl PrintDimensions {
    pub fn from_inches(width_inches: f64, height_inches: f64, dpi: u32) -> Self {
        Self {
            width_inches,
            height_inches,
            dpi,
            width_points: inches_to_points(width_inches),
            height_points: inches_to_points(height_inches),
            width_pixels: inches_to_pixels(width_inches, dpi),
            height_pixels: inches_to_pixels(height_inches, dpi),
        }
    }

    pub fn from_mm(width_mm: f64, height_mm: f64, dpi: u32) -> Self {
        Self::from_inches(mm_to_inches(width_mm), mm_to_inches(height_mm), dpi)
    }

    /// Same physical size at another density.
    pub fn with_dpi(&self, dpi: u32) -> Self {
        Self::from_inches(self.width_inches, self.height_inches, dpi)
    }

    pub fn width_dots(&self) -> i64 {
        self.width_pixels.round() as i64
    }

    pub fn height_dots(&self) -> i64 {
        self.height_pixels.round() as i64
    }

    pub fn area_inches(&self) -> f64 {
        self.width_inches * self.height_inches
    }

    pub fn is_consistent(&self) -> bool {
        const EPS: f64 = 1e-9;
        (self.width_points - inches_to_points(self.width_inches)).abs() < EPS
            && (self.height_points - inches_to_points(self.height_inches)).abs() < EPS
            && (self.width_pixels - inches_to_pixels(self.width_inches, self.dpi)).abs() < EPS
            && (self.height_pixels - inches_to_pixels(self.height_inches, self.dpi)).abs() < EPS
    }
}

/// Axis-aligned box in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Strict interior overlap. Boxes that only share an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.right() <= other.x
            || other.right() <= self.x
            || self.bottom() <= other.y
            || other.bottom() <= self.y)
    }

    /// Whether the box lies inside a `width` x `height` area anchored at the origin.
    pub fn fits_within(&self, width: f64, height: f64) -> bool {
        const EPS: f64 = 1e-6;
        self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= width + EPS
            && self.bottom() <= height + EPS
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}
