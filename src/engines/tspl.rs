//! TSPL generator for TSC-compatible thermal printers.

use tracing::{debug, instrument};

use super::{
    normalize_rotation, stroke_dots, DotBox, EngineError, EngineKind, Preview, PrintEngine,
    THERMAL_PREVIEW_DPI,
};
use crate::config::TsplSettings;
use crate::print::{
    paint_order, Alignment, BarcodeFormat, ElementType, OutputData, PrintElement, PrintJob,
    PrintOutput,
};
use crate::raster::{render_preview, wrap_text, RenderOptions, BAR_HEIGHT_RATIO, LINE_HEIGHT_EM, QR_MODULES};
use crate::units::{points_to_dots, validate_dimensions, MM_PER_INCH};

/// Built-in bitmap fonts: (id, cell width, cell height) in dots.
const FONTS: [(&str, i64, i64); 5] = [("1", 8, 12), ("2", 12, 20), ("3", 16, 24), ("4", 24, 32), ("5", 32, 48)];

const CRLF: &str = "\r\n";

#[derive(Debug, Clone)]
pub struct TsplEngine {
    settings: TsplSettings,
}

impl TsplEngine {
    pub fn new(settings: TsplSettings) -> Self {
        Self { settings }
    }

    pub fn render_commands(&self, job: &PrintJob) -> Result<String, EngineError> {
        let dims = &job.dimensions;
        validate_dimensions(dims.width_inches, dims.height_inches)?;
        let gap = (self.settings.gap_mm / MM_PER_INCH * dims.dpi as f64).round() as i64;

        let mut lines = vec![
            format!("SIZE {} dot, {} dot", dims.width_dots(), dims.height_dots()),
            format!("GAP {} dot, 0 dot", gap),
            "DIRECTION 1".to_string(),
            format!("DENSITY {}", self.settings.density),
            format!("SPEED {}", self.settings.speed),
            "CLS".to_string(),
        ];
        for element in paint_order(&job.elements) {
            lines.extend(element_commands(element, dims.dpi));
        }
        lines.push(format!("PRINT {},1", job.copies.max(1)));

        let mut document = lines.join(CRLF);
        document.push_str(CRLF);
        Ok(document)
    }
}

impl PrintEngine for TsplEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Tspl
    }

    fn name(&self) -> &'static str {
        "TSC TSPL"
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    fn generate_print_output(&self, job: &PrintJob) -> Result<PrintOutput, EngineError> {
        let document = self.render_commands(job)?;
        debug!(bytes = document.len(), "Generated TSPL");
        Ok(PrintOutput::new(EngineKind::Tspl, &job.id, OutputData::Text(document)))
    }

    fn generate_preview(&self, job: &PrintJob) -> Result<Preview, EngineError> {
        let options = RenderOptions {
            dpi: THERMAL_PREVIEW_DPI,
            thermal: true,
            honor_rotation: true,
        };
        render_preview(&job.at_dpi(THERMAL_PREVIEW_DPI), &options)
    }
}

/// Font id, multiplier and cell width for a target text height in dots.
///
/// Heights up to the largest font pick the nearest cell; taller text scales
/// the largest font by a whole multiplier.
pub fn select_font(target_dots: f64) -> (&'static str, i64, i64) {
    let (largest_id, largest_w, largest_h) = FONTS[FONTS.len() - 1];
    if target_dots > largest_h as f64 {
        let multiplier = ((target_dots / largest_h as f64).round() as i64).max(1);
        return (largest_id, multiplier, largest_w);
    }
    let nearest = FONTS
        .iter()
        .min_by(|a, b| {
            let da = (a.2 as f64 - target_dots).abs();
            let db = (b.2 as f64 - target_dots).abs();
            da.total_cmp(&db)
        })
        .copied()
        .unwrap_or(FONTS[0]);
    (nearest.0, 1, nearest.1)
}

fn element_commands(el: &PrintElement, dpi: u32) -> Vec<String> {
    let b = DotBox::of(el, dpi);
    let rot = normalize_rotation(el.rotation);
    let stroke = stroke_dots(el.border_width, dpi);

    match el.element_type {
        ElementType::Text => {
            if !el.has_content() {
                return vec![];
            }
            let height = points_to_dots(el.font_size, dpi);
            let (font, multiplier, cell_width) = select_font(height);
            let line_step = (height * LINE_HEIGHT_EM).round() as i64;
            wrap_text(&el.content, el.font_size, el.width)
                .iter()
                .enumerate()
                .filter(|(_, line)| !line.is_empty())
                .map(|(i, line)| {
                    let estimated = line.chars().count() as i64 * cell_width * multiplier;
                    let x = match el.alignment {
                        Alignment::Left => b.x,
                        Alignment::Center => b.x + ((b.width - estimated) / 2).max(0),
                        Alignment::Right => b.x + (b.width - estimated).max(0),
                    };
                    format!(
                        "TEXT {},{},\"{}\",{},{},{},\"{}\"",
                        x,
                        b.y + i as i64 * line_step,
                        font,
                        rot,
                        multiplier,
                        multiplier,
                        escape_text(line)
                    )
                })
                .collect()
        }
        ElementType::Barcode => {
            if !el.has_content() {
                return vec![];
            }
            let bar_height = if el.show_text {
                (b.height as f64 * BAR_HEIGHT_RATIO).round() as i64
            } else {
                b.height
            };
            vec![format!(
                "BARCODE {},{},\"{}\",{},{},{},2,6,\"{}\"",
                b.x,
                b.y,
                barcode_type(el.barcode_format),
                bar_height,
                u8::from(el.show_text),
                rot,
                escape_text(&el.content)
            )]
        }
        ElementType::Qr => {
            if !el.has_content() {
                return vec![];
            }
            let cell = (b.width.min(b.height) / QR_MODULES as i64).clamp(1, 10);
            vec![format!(
                "QRCODE {},{},L,{},A,{},\"{}\"",
                b.x,
                b.y,
                cell,
                rot,
                escape_text(&el.content)
            )]
        }
        ElementType::Rectangle => {
            let mut commands = vec![];
            if el.background_color.is_some() {
                commands.push(format!("BAR {},{},{},{}", b.x, b.y, b.width, b.height));
            }
            if el.draws_outline() {
                commands.push(box_command(&b, stroke));
            }
            commands
        }
        ElementType::Line => {
            let command = if el.is_horizontal() {
                format!("BAR {},{},{},{}", b.x, b.y, b.width, stroke.min(b.height.max(1)))
            } else {
                format!("BAR {},{},{},{}", b.x, b.y, stroke.min(b.width.max(1)), b.height)
            };
            vec![command]
        }
        ElementType::Image => {
            let (_, cell_w, cell_h) = FONTS[2];
            vec![
                box_command(&b, 2),
                format!(
                    "TEXT {},{},\"3\",0,1,1,\"IMG\"",
                    (b.x + (b.width - 3 * cell_w) / 2).max(b.x),
                    (b.y + (b.height - cell_h) / 2).max(b.y)
                ),
            ]
        }
    }
}

fn box_command(b: &DotBox, thickness: i64) -> String {
    format!(
        "BOX {},{},{},{},{}",
        b.x,
        b.y,
        b.x + b.width,
        b.y + b.height,
        thickness
    )
}

pub fn barcode_type(format: BarcodeFormat) -> &'static str {
    match format {
        BarcodeFormat::Code128 => "128",
        BarcodeFormat::Code39 => "39",
        BarcodeFormat::Code93 => "93",
        BarcodeFormat::Upc => "UPCA",
        BarcodeFormat::Ean13 => "EAN13",
        BarcodeFormat::Ean8 => "EAN8",
    }
}

/// Quotes use TSPL's `\["]` escape; line breaks become spaces.
pub fn escape_text(text: &str) -> String {
    text.replace('"', "\\[\"]").replace(['\r', '\n'], " ")
}
