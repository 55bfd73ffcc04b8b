//! ZPL II generator for Zebra printers.
//!
//! One `^XA ... ^XZ` format per job; copies are handled by `^PQ`. Every
//! element becomes a single `^FO` line in dots at the job density.

use tracing::{debug, instrument};

use super::{
    normalize_rotation, DotBox, EngineError, EngineKind, Preview, PrintEngine, THERMAL_PREVIEW_DPI,
};
use crate::config::ZplSettings;
use crate::print::{
    paint_order, Alignment, BarcodeFormat, ElementType, OutputData, PrintElement, PrintJob,
    PrintOutput,
};
use crate::raster::{render_preview, wrap_text, RenderOptions, BAR_HEIGHT_RATIO, LINE_HEIGHT_EM};
use crate::units::{points_to_dots, validate_dimensions};

/// Estimated glyph advance for the scalable fonts, as a share of height.
const CHAR_WIDTH_RATIO: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct ZplEngine {
    settings: ZplSettings,
}

impl ZplEngine {
    pub fn new(settings: ZplSettings) -> Self {
        Self { settings }
    }

    /// The full ZPL document for a job.
    pub fn render_commands(&self, job: &PrintJob) -> Result<String, EngineError> {
        let dims = &job.dimensions;
        validate_dimensions(dims.width_inches, dims.height_inches)?;

        let mut lines = vec![
            "^XA".to_string(),
            format!("^PW{}", dims.width_dots()),
            format!("^LL{}", dims.height_dots()),
            format!("^PR{}", self.settings.print_speed),
        ];
        for element in paint_order(&job.elements) {
            lines.extend(element_commands(element, dims.dpi));
        }
        lines.push(format!("^PQ{}", job.copies.max(1)));
        lines.push("^XZ".to_string());

        let mut document = lines.join("\n");
        document.push('\n');
        Ok(document)
    }
}

impl PrintEngine for ZplEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Zpl
    }

    fn name(&self) -> &'static str {
        "Zebra ZPL"
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    fn generate_print_output(&self, job: &PrintJob) -> Result<PrintOutput, EngineError> {
        let document = self.render_commands(job)?;
        debug!(bytes = document.len(), "Generated ZPL");
        Ok(PrintOutput::new(EngineKind::Zpl, &job.id, OutputData::Text(document)))
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

fn element_commands(el: &PrintElement, dpi: u32) -> Vec<String> {
    let b = DotBox::of(el, dpi);
    let rot = rotation_code(el.rotation);
    let stroke = super::stroke_dots(el.border_width, dpi);

    match el.element_type {
        ElementType::Text => {
            if !el.has_content() {
                return vec![];
            }
            let height = points_to_dots(el.font_size, dpi);
            let dots = (height.round() as i64).max(1);
            let line_step = (height * LINE_HEIGHT_EM).round() as i64;
            wrap_text(&el.content, el.font_size, el.width)
                .iter()
                .enumerate()
                .filter(|(_, line)| !line.is_empty())
                .map(|(i, line)| {
                    let estimated = (line.chars().count() as f64 * dots as f64 * CHAR_WIDTH_RATIO) as i64;
                    let x = match el.alignment {
                        Alignment::Left => b.x,
                        Alignment::Center => b.x + ((b.width - estimated) / 2).max(0),
                        Alignment::Right => b.x + (b.width - estimated).max(0),
                    };
                    format!(
                        "^FO{},{}^A{}{},{},{}{}^FS",
                        x,
                        b.y + i as i64 * line_step,
                        font_code(&el.font_family),
                        rot,
                        dots,
                        dots,
                        field_data(line)
                    )
                })
                .collect()
        }
        ElementType::Barcode => {
            if !el.has_content() {
                return vec![];
            }
            let human = if el.show_text { 'Y' } else { 'N' };
            let bar_height = if el.show_text {
                (b.height as f64 * BAR_HEIGHT_RATIO).round() as i64
            } else {
                b.height
            };
            let symbology = match el.barcode_format {
                BarcodeFormat::Code128 => format!("^BC{},{},{},N,N", rot, bar_height, human),
                BarcodeFormat::Code39 => format!("^B3{},N,{},{},N", rot, bar_height, human),
                BarcodeFormat::Code93 => format!("^BA{},{},{},N,N", rot, bar_height, human),
                BarcodeFormat::Upc | BarcodeFormat::Ean13 => {
                    format!("^BE{},{},{},N", rot, bar_height, human)
                }
                BarcodeFormat::Ean8 => format!("^B8{},{},{},N", rot, bar_height, human),
            };
            vec![format!(
                "^FO{},{}{}{}^FS",
                b.x,
                b.y,
                symbology,
                field_data(&el.content)
            )]
        }
        ElementType::Qr => {
            if !el.has_content() {
                return vec![];
            }
            let magnification = (b.width.min(b.height) as f64 / 50.0).round().clamp(1.0, 10.0) as i64;
            vec![format!(
                "^FO{},{}^BQN,2,{},Q,7{}^FS",
                b.x,
                b.y,
                magnification,
                field_data(&format!("QA,{}", el.content))
            )]
        }
        ElementType::Rectangle => {
            let mut commands = vec![];
            if el.background_color.is_some() {
                commands.push(format!(
                    "^FO{},{}^GB{},{},{},B,0^FS",
                    b.x,
                    b.y,
                    b.width,
                    b.height,
                    b.width.min(b.height)
                ));
            }
            if el.draws_outline() {
                commands.push(format!(
                    "^FO{},{}^GB{},{},{},B,0^FS",
                    b.x, b.y, b.width, b.height, stroke
                ));
            }
            commands
        }
        ElementType::Line => {
            let command = if el.is_horizontal() {
                let t = stroke.min(b.height.max(1));
                format!("^FO{},{}^GB{},{},{},B,0^FS", b.x, b.y, b.width, t, t)
            } else {
                let t = stroke.min(b.width.max(1));
                format!("^FO{},{}^GB{},{},{},B,0^FS", b.x, b.y, t, b.height, t)
            };
            vec![command]
        }
        // No bitmap download support; the frame is omitted.
        ElementType::Image => vec![],
    }
}

/// `N`, `R`, `I` or `B` for 0, 90, 180 and 270 degrees.
pub fn rotation_code(degrees: f64) -> char {
    match normalize_rotation(degrees) {
        90 => 'R',
        180 => 'I',
        270 => 'B',
        _ => 'N',
    }
}

/// Scalable font id for a family name.
pub fn font_code(family: &str) -> char {
    let family = family.trim();
    if family.len() == 1 {
        if let Some(c) = family.chars().next().filter(|c| c.is_ascii_alphanumeric()) {
            return c.to_ascii_uppercase();
        }
    }
    match family.to_ascii_lowercase().as_str() {
        "times" | "times new roman" | "serif" => 'B',
        "courier" | "monospace" => 'D',
        _ => 'A',
    }
}

/// Hex-escape the characters ZPL treats as control prefixes.
pub fn escape_field_data(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '_' => escaped.push_str("_5F"),
            '^' => escaped.push_str("_5E"),
            '~' => escaped.push_str("_7E"),
            '\r' | '\n' => escaped.push(' '),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// `^FD...` with `^FH` prepended when the text needed escaping.
fn field_data(text: &str) -> String {
    let escaped = escape_field_data(text);
    if escaped == text {
        format!("^FD{}", text)
    } else {
        format!("^FH^FD{}", escaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::tests::element;
    use crate::print::JobMetadata;
    use crate::units::PrintDimensions;
    use chrono::Utc;

    fn job(elements: Vec<PrintElement>) -> PrintJob {
        PrintJob {
            id: "job-1".into(),
            template_id: "t".into(),
            elements,
            dimensions: PrintDimensions::from_inches(2.0, 1.0, 203),
            copies: 3,
            metadata: JobMetadata {
                order_id: "o".into(),
                order_number: "1001".into(),
                line_item_id: "li".into(),
                product_name: "Soap".into(),
                customer_name: None,
                vendor_id: "v".into(),
                profile_id: "p".into(),
                engine: Some(EngineKind::Zpl),
                label_type: "product".into(),
                created_at: Utc::now(),
                fingerprint: String::new(),
            },
        }
    }

    fn engine() -> ZplEngine {
        ZplEngine::new(ZplSettings::default())
    }

    #[test]
    fn test_document_frame() {
        let doc = engine().render_commands(&job(vec![])).unwrap();
        let lines: Vec<&str> = doc.lines().collect();
        assert_eq!(lines, vec!["^XA", "^PW406", "^LL203", "^PR4", "^PQ3", "^XZ"]);
    }

    #[test]
    fn test_text_command() {
        let mut text = element(ElementType::Text, 0.1, 0.2, 1.5, 0.5);
        text.content = "Soap".into();
        let commands = element_commands(&text, 203);
        // 12pt at 203 dpi is 33.8 dots
        assert_eq!(commands, vec!["^FO20,41^AAN,34,34^FDSoap^FS"]);
    }

    #[test]
    fn test_text_alignment_shifts_origin() {
        let mut text = element(ElementType::Text, 0.0, 0.0, 2.0, 0.5);
        text.content = "AB".into();
        text.alignment = Alignment::Right;
        // width 406, estimate 2 * 34 * 0.6 = 40
        assert!(element_commands(&text, 203)[0].starts_with("^FO366,0"));
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_field_data("a^b~c_d"), "a_5Eb_7Ec_5Fd");
        assert_eq!(field_data("plain"), "^FDplain");
        assert_eq!(field_data("x^y"), "^FH^FDx_5Ey");
    }

    #[test]
    fn test_barcode_commands() {
        let mut code = element(ElementType::Barcode, 0.0, 0.0, 1.0, 0.5);
        code.content = "TEST-001".into();
        assert_eq!(
            element_commands(&code, 203),
            vec!["^FO0,0^BCN,82,Y,N,N^FDTEST-001^FS"]
        );

        code.barcode_format = BarcodeFormat::Ean8;
        code.show_text = false;
        code.rotation = 90.0;
        assert_eq!(element_commands(&code, 203), vec!["^FO0,0^B8R,102,N,N^FDTEST-001^FS"]);
    }

    #[test]
    fn test_qr_and_shapes() {
        let qr = element(ElementType::Qr, 0.0, 0.0, 1.0, 1.0);
        assert_eq!(element_commands(&qr, 203), vec!["^FO0,0^BQN,2,4,Q,7^FDQA,ABC^FS"]);

        let mut lot = element(ElementType::Qr, 0.0, 0.0, 1.0, 1.0);
        lot.content = "LOT_42^A".into();
        assert_eq!(
            element_commands(&lot, 203),
            vec!["^FO0,0^BQN,2,4,Q,7^FH^FDQA,LOT_5F42_5EA^FS"]
        );

        let mut filled = element(ElementType::Rectangle, 0.0, 0.0, 1.0, 0.5);
        filled.background_color = Some("#000000".into());
        assert_eq!(element_commands(&filled, 203), vec!["^FO0,0^GB203,102,102,B,0^FS"]);

        let outline = element(ElementType::Rectangle, 0.0, 0.0, 1.0, 0.5);
        assert_eq!(element_commands(&outline, 203), vec!["^FO0,0^GB203,102,3,B,0^FS"]);

        let line = element(ElementType::Line, 0.0, 0.5, 2.0, 0.01);
        assert_eq!(element_commands(&line, 203), vec!["^FO0,102^GB406,2,2,B,0^FS"]);
    }

    #[test]
    fn test_empty_content_and_images_emit_nothing() {
        let mut text = element(ElementType::Text, 0.0, 0.0, 1.0, 0.5);
        text.content = "  ".into();
        assert!(element_commands(&text, 203).is_empty());
        assert!(element_commands(&element(ElementType::Image, 0.0, 0.0, 1.0, 0.5), 203).is_empty());
    }

    #[test]
    fn test_font_codes() {
        assert_eq!(font_code("Helvetica"), 'A');
        assert_eq!(font_code("times"), 'B');
        assert_eq!(font_code("Courier"), 'D');
        assert_eq!(font_code("0"), '0');
        assert_eq!(rotation_code(270.0), 'B');
    }

    #[test]
    fn test_output_artifact() {
        let output = engine().generate_print_output(&job(vec![])).unwrap();
        assert_eq!(output.format, EngineKind::Zpl);
        assert_eq!(output.mime_type, "application/x-zpl");
        assert!(output.data.as_text().unwrap().starts_with("^XA\n"));
    }

    #[test]
    fn test_preview_uses_thermal_density() {
        let preview = engine().generate_preview(&job(vec![])).unwrap();
        assert_eq!((preview.width, preview.height, preview.dpi), (406, 203, 203));
    }
}
