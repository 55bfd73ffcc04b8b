//! Print Data Model
//!
//! Printer profiles, compiled elements, jobs and the terminal output artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engines::EngineKind;
use crate::units::{PrintDimensions, Rect};

pub const MIN_PRINTER_DPI: u32 = 72;
pub const MAX_PRINTER_DPI: u32 = 1200;

/// A physical (or virtual, for PDF) printer the batch processor can target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrinterProfile {
    pub id: String,
    pub name: String,
    pub engine: EngineKind,
    pub dpi: u32,
    #[serde(default)]
    pub is_default: bool,
}

impl PrinterProfile {
    /// Create with validation
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        engine: EngineKind,
        dpi: u32,
    ) -> Result<Self, &'static str> {
        if !(MIN_PRINTER_DPI..=MAX_PRINTER_DPI).contains(&dpi) {
            return Err("DPI must be between 72 and 1200");
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            engine,
            dpi,
            is_default: false,
        })
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Text,
    Barcode,
    Qr,
    Image,
    Line,
    Rectangle,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Barcode => "barcode",
            Self::Qr => "qr",
            Self::Image => "image",
            Self::Line => "line",
            Self::Rectangle => "rectangle",
        }
    }

    /// Types that render nothing useful without content.
    pub fn needs_content(&self) -> bool {
        matches!(self, Self::Text | Self::Barcode | Self::Qr)
    }

    /// Paint order: rectangle < line < image < barcode/qr < text.
    pub fn paint_rank(&self) -> u8 {
        match self {
            Self::Rectangle => 1,
            Self::Line => 2,
            Self::Image => 3,
            Self::Barcode | Self::Qr => 4,
            Self::Text => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BarcodeFormat {
    #[default]
    #[serde(rename = "CODE128")]
    Code128,
    #[serde(rename = "CODE39")]
    Code39,
    #[serde(rename = "CODE93")]
    Code93,
    #[serde(rename = "UPC")]
    Upc,
    #[serde(rename = "EAN13")]
    Ean13,
    #[serde(rename = "EAN8")]
    Ean8,
}

impl BarcodeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code128 => "CODE128",
            Self::Code39 => "CODE39",
            Self::Code93 => "CODE93",
            Self::Upc => "UPC",
            Self::Ean13 => "EAN13",
            Self::Ean8 => "EAN8",
        }
    }
}

/// A compiled, engine-agnostic drawable.
///
/// Coordinates are inches from the top-left corner of the label, content is
/// fully substituted and every style attribute carries its resolved default.
/// Engines read elements and never modify them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrintElement {
    pub id: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub content: String,
    pub font_size: f64,
    pub font_family: String,
    pub font_weight: FontWeight,
    pub color: String,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub border_color: Option<String>,
    /// Stroke width in points.
    #[serde(default)]
    pub border_width: Option<f64>,
    pub alignment: Alignment,
    pub rotation: f64,
    pub show_text: bool,
    pub barcode_format: BarcodeFormat,
    /// Opaque image payload for image elements; engines draw a placeholder frame.
    #[serde(default)]
    pub image_data: Option<String>,
}

impl PrintElement {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Anything other than pure black needs a color-capable engine.
    pub fn uses_color(&self) -> bool {
        let is_black = |c: &str| {
            let c = c.trim().to_ascii_lowercase();
            c == "#000000" || c == "#000" || c == "black"
        };
        !is_black(&self.color)
    }

    pub fn is_bold(&self) -> bool {
        self.font_weight == FontWeight::Bold
    }

    /// Rectangles get a border when one is styled, or when they have no fill.
    pub fn draws_outline(&self) -> bool {
        self.border_color.is_some() || self.border_width.is_some() || self.background_color.is_none()
    }

    /// Lines run along the longer edge of their box.
    pub fn is_horizontal(&self) -> bool {
        self.width >= self.height
    }
}

/// Elements sorted into paint order; ties keep template order.
pub fn paint_order(elements: &[PrintElement]) -> Vec<&PrintElement> {
    let mut sorted: Vec<&PrintElement> = elements.iter().collect();
    sorted.sort_by_key(|el| el.element_type.paint_rank());
    sorted
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub order_id: String,
    pub order_number: String,
    pub line_item_id: String,
    pub product_name: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub vendor_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub engine: Option<EngineKind>,
    pub label_type: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over the canonical element list.
    pub fingerprint: String,
}

/// One compiled, ready-to-render label instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrintJob {
    pub id: String,
    pub template_id: String,
    pub elements: Vec<PrintElement>,
    pub dimensions: PrintDimensions,
    pub copies: u32,
    pub metadata: JobMetadata,
}

impl PrintJob {
    /// Copy of the job retargeted at another density. Elements are shared by value.
    pub fn at_dpi(&self, dpi: u32) -> Self {
        Self {
            dimensions: self.dimensions.with_dpi(dpi),
            ..self.clone()
        }
    }
}

/// Generated printer data, text for command languages and bytes otherwise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "encoding", content = "value", rename_all = "lowercase")]
pub enum OutputData {
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl OutputData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

/// The terminal artifact of one engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrintOutput {
    pub format: EngineKind,
    pub data: OutputData,
    pub mime_type: String,
    pub filename: String,
    pub size_bytes: usize,
    pub checksum: String,
}

impl PrintOutput {
    pub fn new(format: EngineKind, job_id: &str, data: OutputData) -> Self {
        let bytes = data.as_bytes();
        Self {
            format,
            mime_type: format.mime_type().to_string(),
            filename: format!("label-{}.{}", job_id, format.file_extension()),
            size_bytes: bytes.len(),
            checksum: crate::hashing::sha256_hex(bytes),
            data,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
