//! Print Engines
//!
//! A closed set of four code generators behind one trait. The `Engine` enum
//! dispatches statically; `EngineRegistry` owns one configured instance of
//! each and is passed explicitly to whoever needs it.

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::print::{BarcodeFormat, ElementType, PrintElement, PrintJob, PrintOutput};
use crate::units::{inches_to_dots, validate_dimensions, GeometryError, PrintDimensions};

pub mod brother_ql;
pub mod pdf;
pub mod tspl;
pub mod zpl;

pub use brother_ql::BrotherQlEngine;
pub use pdf::PdfEngine;
pub use tspl::TsplEngine;
pub use zpl::ZplEngine;

/// Preview density for the thermal command-language engines.
pub const THERMAL_PREVIEW_DPI: u32 = 203;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineKind {
    #[default]
    #[serde(rename = "PDF")]
    Pdf,
    #[serde(rename = "ZPL")]
    Zpl,
    #[serde(rename = "TSPL")]
    Tspl,
    #[serde(rename = "BrotherQL")]
    BrotherQl,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [Self::Pdf, Self::Zpl, Self::Tspl, Self::BrotherQl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Zpl => "ZPL",
            Self::Tspl => "TSPL",
            Self::BrotherQl => "BrotherQL",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Zpl => "application/x-zpl",
            Self::Tspl => "application/x-tspl",
            Self::BrotherQl => "application/x-brother-ql",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Zpl => "zpl",
            Self::Tspl => "tspl",
            Self::BrotherQl => "bin",
        }
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        use BarcodeFormat::*;
        let fonts = |names: &[&str]| -> Vec<String> { names.iter().map(|n| n.to_string()).collect() };
        match self {
            Self::Pdf => EngineCapabilities {
                supports_color: true,
                supports_images: true,
                supports_barcodes: true,
                supports_rotation: true,
                supports_transparency: true,
                min_dpi: 72,
                max_dpi: 600,
                supported_fonts: fonts(&["helvetica", "times", "courier", "arial", "calibri"]),
                supported_barcode_formats: vec![Code128, Code39, Upc, Ean13, Ean8],
            },
            Self::Zpl => EngineCapabilities {
                supports_color: false,
                supports_images: false,
                supports_barcodes: true,
                supports_rotation: true,
                supports_transparency: false,
                min_dpi: 203,
                max_dpi: 600,
                supported_fonts: fonts(&["0", "A", "B", "D", "E", "F", "G", "H"]),
                supported_barcode_formats: vec![Code128, Code39, Upc, Ean13, Ean8],
            },
            Self::Tspl => EngineCapabilities {
                supports_color: false,
                supports_images: true,
                supports_barcodes: true,
                supports_rotation: true,
                supports_transparency: false,
                min_dpi: 203,
                max_dpi: 600,
                supported_fonts: fonts(&["0", "1", "2", "3", "4", "5", "6", "7"]),
                supported_barcode_formats: vec![Code128, Code39, Upc, Ean13, Ean8, Code93],
            },
            Self::BrotherQl => EngineCapabilities {
                supports_color: false,
                supports_images: true,
                supports_barcodes: true,
                supports_rotation: false,
                supports_transparency: false,
                min_dpi: 300,
                max_dpi: 300,
                supported_fonts: fonts(&["helvetica", "arial"]),
                supported_barcode_formats: vec![Code128, Code39, Upc, Ean13],
            },
        }
    }

    /// Commonly used physical sizes. A height of 0 means continuous tape.
    pub fn media_sizes(&self) -> Vec<MediaSize> {
        let media = |name, width_inches, height_inches, description| MediaSize {
            name,
            width_inches,
            height_inches,
            description,
        };
        match self {
            Self::Pdf => vec![
                media("1\" × 1\" Square", 1.0, 1.0, "Small square label"),
                media("2\" × 1\" Standard", 2.0, 1.0, "Standard product label"),
                media("3\" × 2\" Medium", 3.0, 2.0, "Medium product label"),
                media("4\" × 6\" Shipping", 4.0, 6.0, "Standard shipping label"),
                media("4\" × 1\" Address", 4.0, 1.0, "Address label"),
                media("2\" × 2\" Square", 2.0, 2.0, "Large square label"),
                media("8.5\" × 11\" Full Page", 8.5, 11.0, "Full page (Letter)"),
                media("A4", 8.27, 11.69, "A4 paper size"),
            ],
            Self::Zpl => vec![
                media("1\" × 1\"", 1.0, 1.0, "Small square thermal label"),
                media("2\" × 1\"", 2.0, 1.0, "Standard product label"),
                media("3\" × 2\"", 3.0, 2.0, "Medium product label"),
                media("4\" × 6\"", 4.0, 6.0, "Shipping label"),
                media("4\" × 2\"", 4.0, 2.0, "Wide address label"),
                media("2.25\" × 1.25\"", 2.25, 1.25, "Standard shipping label"),
            ],
            Self::Tspl => vec![
                media("1\" × 1\"", 1.0, 1.0, "Small square thermal label"),
                media("2\" × 1\"", 2.0, 1.0, "Standard product label"),
                media("3\" × 2\"", 3.0, 2.0, "Medium product label"),
                media("4\" × 6\"", 4.0, 6.0, "Shipping label"),
                media("4\" × 3\"", 4.0, 3.0, "Wide product label"),
                media("2.25\" × 1.25\"", 2.25, 1.25, "Address label"),
            ],
            Self::BrotherQl => vec![
                media("12mm Continuous", 0.47, 0.0, "12mm continuous length tape"),
                media("29mm Continuous", 1.14, 0.0, "29mm continuous length tape"),
                media("38mm Continuous", 1.5, 0.0, "38mm continuous length tape"),
                media("50mm Continuous", 1.97, 0.0, "50mm continuous length tape"),
                media("54mm Continuous", 2.13, 0.0, "54mm continuous length tape"),
                media("62mm Continuous", 2.44, 0.0, "62mm continuous length tape"),
                media("102mm Continuous", 4.02, 0.0, "102mm continuous length tape"),
                media("17×54mm", 0.67, 2.13, "Small address label"),
                media("29×90mm", 1.14, 3.54, "Standard address label"),
                media("38×90mm", 1.5, 3.54, "Large address label"),
                media("39×48mm", 1.54, 1.89, "Square label"),
                media("52×29mm", 2.05, 1.14, "Wide label"),
                media("62×29mm", 2.44, 1.14, "Extra wide label"),
                media("62×100mm", 2.44, 3.94, "Shipping label"),
            ],
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "").as_str() {
            "pdf" => Ok(Self::Pdf),
            "zpl" => Ok(Self::Zpl),
            "tspl" => Ok(Self::Tspl),
            "brotherql" | "ql" => Ok(Self::BrotherQl),
            _ => Err(EngineError::UnknownEngine(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilities {
    pub supports_color: bool,
    pub supports_images: bool,
    pub supports_barcodes: bool,
    pub supports_rotation: bool,
    pub supports_transparency: bool,
    pub min_dpi: u32,
    pub max_dpi: u32,
    pub supported_fonts: Vec<String>,
    pub supported_barcode_formats: Vec<BarcodeFormat>,
}

/// Families every thermal engine maps onto one of its built-in fonts.
const MAPPED_FAMILIES: [&str; 5] = ["helvetica", "arial", "times", "courier", "monospace"];

impl EngineCapabilities {
    pub fn supports_dpi(&self, dpi: u32) -> bool {
        (self.min_dpi..=self.max_dpi).contains(&dpi)
    }

    /// The only density an engine renders at, when it has just one.
    pub fn fixed_dpi(&self) -> Option<u32> {
        (self.min_dpi == self.max_dpi).then_some(self.min_dpi)
    }

    pub fn supports_barcode(&self, format: BarcodeFormat) -> bool {
        self.supports_barcodes && self.supported_barcode_formats.contains(&format)
    }

    /// Whether a font family renders as requested rather than falling back.
    pub fn recognizes_font(&self, family: &str) -> bool {
        let family = family.trim();
        if self
            .supported_fonts
            .iter()
            .any(|f| f.eq_ignore_ascii_case(family))
        {
            return true;
        }
        // Built-in font ids ("A", "3") mean the engine maps families itself.
        let maps_families = self.supported_fonts.iter().all(|f| f.len() == 1);
        maps_families && MAPPED_FAMILIES.contains(&family.to_ascii_lowercase().as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaSize {
    pub name: &'static str,
    pub width_inches: f64,
    pub height_inches: f64,
    pub description: &'static str,
}

impl MediaSize {
    pub fn is_continuous(&self) -> bool {
        self.height_inches == 0.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Rasterized preview of a job.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    #[serde(skip)]
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
    /// `data:image/png;base64,...`
    pub image_data: String,
}

impl Preview {
    pub fn from_png(png: Vec<u8>, width: u32, height: u32, dpi: u32) -> Self {
        use base64::Engine as _;
        let image_data = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png)
        );
        Self {
            png,
            width,
            height,
            dpi,
            image_data,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown print engine: {0}")]
    UnknownEngine(String),

    #[error("{engine} does not support {feature}")]
    Unsupported { engine: EngineKind, feature: String },

    #[error("Invalid label geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Element validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("{engine} generation failed: {reason}")]
    Generation { engine: EngineKind, reason: String },

    #[error("Rasterization failed: {0}")]
    Raster(#[from] image::ImageError),
}

/// Common contract implemented by every engine.
#[enum_dispatch]
pub trait PrintEngine {
    fn kind(&self) -> EngineKind;

    fn name(&self) -> &'static str;

    fn capabilities(&self) -> EngineCapabilities {
        self.kind().capabilities()
    }

    fn supported_media_sizes(&self) -> Vec<MediaSize> {
        self.kind().media_sizes()
    }

    /// Encode a whole job (all copies) into printer data.
    fn generate_print_output(&self, job: &PrintJob) -> Result<PrintOutput, EngineError>;

    /// Rasterize a job with the same layout math as `generate_print_output`.
    fn generate_preview(&self, job: &PrintJob) -> Result<Preview, EngineError>;

    fn validate_elements(
        &self,
        elements: &[PrintElement],
        dimensions: &PrintDimensions,
    ) -> ValidationResult {
        validate_against(&self.capabilities(), elements, dimensions)
    }
}

#[enum_dispatch(PrintEngine)]
#[derive(Debug, Clone)]
pub enum Engine {
    Pdf(PdfEngine),
    Zpl(ZplEngine),
    Tspl(TsplEngine),
    BrotherQl(BrotherQlEngine),
}

/// One configured instance per engine kind.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    pdf: Engine,
    zpl: Engine,
    tspl: Engine,
    brother_ql: Engine,
}

impl EngineRegistry {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            pdf: PdfEngine::new(config.pdf.clone()).into(),
            zpl: ZplEngine::new(config.zpl.clone()).into(),
            tspl: TsplEngine::new(config.tspl.clone()).into(),
            brother_ql: BrotherQlEngine::new(config.brother_ql.clone()).into(),
        }
    }

    pub fn get(&self, kind: EngineKind) -> &Engine {
        match kind {
            EngineKind::Pdf => &self.pdf,
            EngineKind::Zpl => &self.zpl,
            EngineKind::Tspl => &self.tspl,
            EngineKind::BrotherQl => &self.brother_ql,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &Engine> {
        EngineKind::ALL.into_iter().map(move |kind| self.get(kind))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Bounds and capability checks shared by every engine.
///
/// Features that cannot degrade (images, unsupported symbologies, elements
/// off the label) are errors; features that degrade (color, rotation, fonts,
/// density) are warnings.
pub fn validate_against(
    caps: &EngineCapabilities,
    elements: &[PrintElement],
    dimensions: &PrintDimensions,
) -> ValidationResult {
    let mut errors = vec![];
    let mut warnings = vec![];

    if let Err(e) = validate_dimensions(dimensions.width_inches, dimensions.height_inches) {
        errors.push(e.to_string());
    }
    if !caps.supports_dpi(dimensions.dpi) {
        warnings.push(format!(
            "Job DPI {} is outside the engine range {}-{}",
            dimensions.dpi, caps.min_dpi, caps.max_dpi
        ));
    }

    for el in elements {
        if !el
            .bounds()
            .fits_within(dimensions.width_inches, dimensions.height_inches)
        {
            errors.push(format!("Element {} extends outside the label area", el.id));
        }
        match el.element_type {
            ElementType::Image if !caps.supports_images => {
                errors.push(format!("Element {}: images are not supported", el.id));
            }
            ElementType::Barcode if !caps.supports_barcode(el.barcode_format) => {
                errors.push(format!(
                    "Element {}: barcode format {} is not supported",
                    el.id,
                    el.barcode_format.as_str()
                ));
            }
            ElementType::Text if !caps.recognizes_font(&el.font_family) => {
                warnings.push(format!(
                    "Element {}: font {} is not available, using the engine default",
                    el.id, el.font_family
                ));
            }
            _ => {}
        }
        if el.uses_color() && !caps.supports_color {
            warnings.push(format!(
                "Element {}: color {} will print as black",
                el.id, el.color
            ));
        }
        if normalize_rotation(el.rotation) != 0 && !caps.supports_rotation {
            warnings.push(format!(
                "Element {}: rotation is not supported and will be ignored",
                el.id
            ));
        }
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Snap an arbitrary angle to 0, 90, 180 or 270.
pub fn normalize_rotation(degrees: f64) -> u16 {
    if !degrees.is_finite() {
        return 0;
    }
    let normalized = degrees.rem_euclid(360.0);
    if normalized <= 45.0 || normalized > 315.0 {
        0
    } else if normalized <= 135.0 {
        90
    } else if normalized <= 225.0 {
        180
    } else {
        270
    }
}

/// An element's box in whole device dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DotBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl DotBox {
    pub fn of(element: &PrintElement, dpi: u32) -> Self {
        Self {
            x: inches_to_dots(element.x, dpi),
            y: inches_to_dots(element.y, dpi),
            width: inches_to_dots(element.width, dpi),
            height: inches_to_dots(element.height, dpi),
        }
    }
}

/// Stroke width in dots for a border given in points; at least one dot.
pub(crate) fn stroke_dots(border_width_pt: Option<f64>, dpi: u32) -> i64 {
    let points = border_width_pt.unwrap_or(1.0);
    (crate::units::points_to_dots(points, dpi).round() as i64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::{Alignment, FontWeight};

    pub(crate) fn element(element_type: ElementType, x: f64, y: f64, w: f64, h: f64) -> PrintElement {
        PrintElement {
            id: "el".into(),
            element_type,
            x,
            y,
            width: w,
            height: h,
            content: "ABC".into(),
            font_size: 12.0,
            font_family: "helvetica".into(),
            font_weight: FontWeight::Normal,
            color: "#000000".into(),
            background_color: None,
            border_color: None,
            border_width: None,
            alignment: Alignment::Left,
            rotation: 0.0,
            show_text: true,
            barcode_format: BarcodeFormat::Code128,
            image_data: None,
        }
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(0.0), 0);
        assert_eq!(normalize_rotation(44.0), 0);
        assert_eq!(normalize_rotation(46.0), 90);
        assert_eq!(normalize_rotation(180.0), 180);
        assert_eq!(normalize_rotation(-90.0), 270);
        assert_eq!(normalize_rotation(350.0), 0);
        assert_eq!(normalize_rotation(f64::NAN), 0);
    }

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("pdf".parse::<EngineKind>().unwrap(), EngineKind::Pdf);
        assert_eq!("BrotherQL".parse::<EngineKind>().unwrap(), EngineKind::BrotherQl);
        assert_eq!("brother_ql".parse::<EngineKind>().unwrap(), EngineKind::BrotherQl);
        assert!("epl".parse::<EngineKind>().is_err());
        assert_eq!(serde_json::to_string(&EngineKind::BrotherQl).unwrap(), "\"BrotherQL\"");
    }

    #[test]
    fn test_out_of_bounds_is_error() {
        let dims = PrintDimensions::from_inches(2.0, 1.0, 203);
        let result = validate_against(
            &EngineKind::Pdf.capabilities(),
            &[element(ElementType::Text, 1.5, 0.0, 1.0, 0.5)],
            &dims,
        );
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_degradable_features_warn() {
        let dims = PrintDimensions::from_inches(2.0, 1.0, 203);
        let mut colored = element(ElementType::Text, 0.0, 0.0, 1.0, 0.5);
        colored.color = "#ff0000".into();
        let result = validate_against(&EngineKind::Zpl.capabilities(), &[colored], &dims);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);

        let mut rotated = element(ElementType::Text, 0.0, 0.0, 1.0, 0.5);
        rotated.rotation = 90.0;
        let result = validate_against(&EngineKind::BrotherQl.capabilities(), &[rotated], &dims);
        assert!(result.is_valid);
        // rotation + job DPI outside the fixed 300
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_images_and_symbologies_error() {
        let dims = PrintDimensions::from_inches(2.0, 1.0, 203);
        let image = element(ElementType::Image, 0.0, 0.0, 1.0, 0.5);
        assert!(!validate_against(&EngineKind::Zpl.capabilities(), &[image.clone()], &dims).is_valid);
        assert!(validate_against(&EngineKind::Tspl.capabilities(), &[image], &dims).is_valid);

        let mut ean8 = element(ElementType::Barcode, 0.0, 0.0, 1.0, 0.5);
        ean8.barcode_format = BarcodeFormat::Ean8;
        assert!(!validate_against(&EngineKind::BrotherQl.capabilities(), &[ean8], &dims).is_valid);
    }

    #[test]
    fn test_font_recognition() {
        assert!(EngineKind::Zpl.capabilities().recognizes_font("Arial"));
        assert!(EngineKind::Zpl.capabilities().recognizes_font("B"));
        assert!(!EngineKind::Zpl.capabilities().recognizes_font("papyrus"));
        assert!(EngineKind::Pdf.capabilities().recognizes_font("Times"));
        assert!(!EngineKind::BrotherQl.capabilities().recognizes_font("courier"));
    }

    #[test]
    fn test_registry_is_exhaustive() {
        let registry = EngineRegistry::default();
        for kind in EngineKind::ALL {
            assert_eq!(registry.get(kind).kind(), kind);
        }
        assert_eq!(registry.all().count(), 4);
    }
}
