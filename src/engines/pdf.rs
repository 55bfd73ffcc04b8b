//! PDF generator.
//!
//! One page per copy, all sharing a single content stream. Text uses the
//! standard Type 1 fonts; barcode and QR symbols are embedded as gray image
//! XObjects rendered by the raster compositor, so they match the previews.

use image::GrayImage;
use pdf_writer::{Content, Name, Pdf, Rect, Ref, Str, TextStr};
use tracing::{debug, instrument};

use super::{normalize_rotation, EngineError, EngineKind, Preview, PrintEngine};
use crate::config::PdfSettings;
use crate::print::{paint_order, ElementType, OutputData, PrintElement, PrintJob, PrintOutput};
use crate::raster::{
    align_offset, parse_color, render_element_gray, render_preview, wrap_text, RenderOptions,
    BASELINE_EM, BLACK, CHAR_WIDTH_EM, LINE_HEIGHT_EM, PLACEHOLDER_TEXT_PT,
};
use crate::units::{inches_to_points, validate_dimensions};

/// Density of embedded barcode and QR images.
pub const SYMBOL_DPI: u32 = 300;

#[derive(Debug, Clone)]
pub struct PdfEngine {
    settings: PdfSettings,
}

impl PdfEngine {
    pub fn new(settings: PdfSettings) -> Self {
        Self { settings }
    }

    pub fn render_document(&self, job: &PrintJob) -> Result<Vec<u8>, EngineError> {
        let dims = &job.dimensions;
        validate_dimensions(dims.width_inches, dims.height_inches)?;
        let page_width = inches_to_points(dims.width_inches) as f32;
        let page_height = inches_to_points(dims.height_inches) as f32;

        let mut page_content = PageContent::new(page_height);
        for element in paint_order(&job.elements) {
            page_content.draw(element);
        }
        let PageContent {
            content,
            fonts,
            images,
            ..
        } = page_content;

        let mut next_id = 1;
        let mut alloc = || {
            let id = Ref::new(next_id);
            next_id += 1;
            id
        };
        let catalog_id = alloc();
        let tree_id = alloc();
        let info_id = alloc();
        let content_id = alloc();
        let font_ids: Vec<Ref> = fonts.iter().map(|_| alloc()).collect();
        let image_ids: Vec<Ref> = images.iter().map(|_| alloc()).collect();
        let page_ids: Vec<Ref> = (0..job.copies.max(1)).map(|_| alloc()).collect();

        let mut pdf = Pdf::new();
        pdf.catalog(catalog_id).pages(tree_id);
        pdf.pages(tree_id)
            .kids(page_ids.iter().copied())
            .count(page_ids.len() as i32);

        let font_names: Vec<String> = (1..=fonts.len()).map(|i| format!("F{}", i)).collect();
        let image_names: Vec<String> = (1..=images.len()).map(|i| format!("Im{}", i)).collect();
        for page_id in &page_ids {
            let mut page = pdf.page(*page_id);
            page.media_box(Rect::new(0.0, 0.0, page_width, page_height));
            page.parent(tree_id);
            page.contents(content_id);
            let mut resources = page.resources();
            {
                let mut font_dict = resources.fonts();
                for (name, id) in font_names.iter().zip(&font_ids) {
                    font_dict.pair(Name(name.as_bytes()), *id);
                }
            }
            if !image_ids.is_empty() {
                let mut xobjects = resources.x_objects();
                for (name, id) in image_names.iter().zip(&image_ids) {
                    xobjects.pair(Name(name.as_bytes()), *id);
                }
            }
        }

        for (face, id) in fonts.iter().zip(&font_ids) {
            pdf.type1_font(*id).base_font(Name(face.as_bytes()));
        }
        for (image, id) in images.iter().zip(&image_ids) {
            let mut xobject = pdf.image_xobject(*id, image.as_raw());
            xobject.width(image.width() as i32);
            xobject.height(image.height() as i32);
            xobject.color_space().device_gray();
            xobject.bits_per_component(8);
        }
        pdf.stream(content_id, &content.finish());

        let reference = match job.metadata.order_number.as_str() {
            "" => job.id.as_str(),
            number => number,
        };
        let title = format!("Label - {}", reference);
        pdf.document_info(info_id)
            .title(TextStr(&title))
            .producer(TextStr("LabelForge"));

        Ok(pdf.finish())
    }
}

impl PrintEngine for PdfEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Pdf
    }

    fn name(&self) -> &'static str {
        "PDF"
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, copies = job.copies))]
    fn generate_print_output(&self, job: &PrintJob) -> Result<PrintOutput, EngineError> {
        let bytes = self.render_document(job)?;
        debug!(bytes = bytes.len(), "Generated PDF");
        Ok(PrintOutput::new(EngineKind::Pdf, &job.id, OutputData::Binary(bytes)))
    }

    fn generate_preview(&self, job: &PrintJob) -> Result<Preview, EngineError> {
        let options = RenderOptions {
            dpi: self.settings.preview_dpi,
            thermal: false,
            honor_rotation: true,
        };
        render_preview(&job.at_dpi(options.dpi), &options)
    }
}

/// Standard Type 1 face for a family and weight.
pub fn base_font(family: &str, bold: bool) -> &'static str {
    match (family.trim().to_ascii_lowercase().as_str(), bold) {
        ("times" | "times new roman" | "serif", false) => "Times-Roman",
        ("times" | "times new roman" | "serif", true) => "Times-Bold",
        ("courier" | "monospace", false) => "Courier",
        ("courier" | "monospace", true) => "Courier-Bold",
        (_, false) => "Helvetica",
        (_, true) => "Helvetica-Bold",
    }
}

/// Placement matrix mapping an element's local y-up box onto the page.
///
/// `x`, `y`, `w` and `h` are points, with `y` measured from the page top.
pub fn placement_matrix(rotation: u16, x: f32, y: f32, w: f32, h: f32, page_height: f32) -> [f32; 6] {
    match rotation {
        90 => [0.0, -1.0, 1.0, 0.0, x, page_height - y],
        180 => [-1.0, 0.0, 0.0, -1.0, x + w, page_height - y],
        270 => [0.0, 1.0, -1.0, 0.0, x + h, page_height - y - w],
        _ => [1.0, 0.0, 0.0, 1.0, x, page_height - y - h],
    }
}

fn rgb(color: Option<&str>) -> (f32, f32, f32) {
    let [r, g, b] = color.and_then(parse_color).unwrap_or(BLACK).0;
    (r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0)
}

/// The standard fonts only cover Latin-1; keep to what the preview can draw.
fn pdf_text(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| if (' '..='~').contains(&c) { c as u8 } else { b'?' })
        .collect()
}

struct PageContent {
    content: Content,
    fonts: Vec<&'static str>,
    images: Vec<GrayImage>,
    page_height: f32,
}

impl PageContent {
    fn new(page_height: f32) -> Self {
        Self {
            content: Content::new(),
            fonts: vec![],
            images: vec![],
            page_height,
        }
    }

    fn font_resource(&mut self, base: &'static str) -> String {
        let index = match self.fonts.iter().position(|f| *f == base) {
            Some(index) => index,
            None => {
                self.fonts.push(base);
                self.fonts.len() - 1
            }
        };
        format!("F{}", index + 1)
    }

    fn draw(&mut self, el: &PrintElement) {
        if el.element_type.needs_content() && !el.has_content() {
            return;
        }
        let w = inches_to_points(el.width) as f32;
        let h = inches_to_points(el.height) as f32;
        let matrix = placement_matrix(
            normalize_rotation(el.rotation),
            inches_to_points(el.x) as f32,
            inches_to_points(el.y) as f32,
            w,
            h,
            self.page_height,
        );
        self.content.save_state();
        self.content.transform(matrix);
        match el.element_type {
            ElementType::Rectangle => self.rectangle(el, w, h),
            ElementType::Line => self.line(el, w, h),
            ElementType::Image => self.image_placeholder(el, w, h),
            ElementType::Barcode | ElementType::Qr => self.symbol(el, w, h),
            ElementType::Text => self.text(el, w, h),
        }
        self.content.restore_state();
    }

    fn rectangle(&mut self, el: &PrintElement, w: f32, h: f32) {
        if let Some(background) = el.background_color.as_deref() {
            let (r, g, b) = rgb(Some(background));
            self.content.set_fill_rgb(r, g, b);
            self.content.rect(0.0, 0.0, w, h);
            self.content.fill_nonzero();
        }
        if el.draws_outline() {
            let t = (el.border_width.unwrap_or(1.0) as f32).min(w / 2.0).min(h / 2.0);
            let (r, g, b) = rgb(el.border_color.as_deref().or(Some(el.color.as_str())));
            self.content.set_stroke_rgb(r, g, b);
            self.content.set_line_width(t);
            self.content.rect(t / 2.0, t / 2.0, w - t, h - t);
            self.content.stroke();
        }
    }

    fn line(&mut self, el: &PrintElement, w: f32, h: f32) {
        let t = el.border_width.unwrap_or(1.0) as f32;
        let (r, g, b) = rgb(el.border_color.as_deref().or(Some(el.color.as_str())));
        self.content.set_fill_rgb(r, g, b);
        if el.is_horizontal() {
            let t = t.min(h);
            self.content.rect(0.0, h - t, w, t);
        } else {
            self.content.rect(0.0, 0.0, t.min(w), h);
        }
        self.content.fill_nonzero();
    }

    fn image_placeholder(&mut self, el: &PrintElement, w: f32, h: f32) {
        let (r, g, b) = rgb(Some(el.color.as_str()));
        let t = el.border_width.unwrap_or(1.0) as f32;
        self.content.set_stroke_rgb(r, g, b);
        self.content.set_line_width(t);
        self.content.rect(0.0, 0.0, w, h);
        self.content.move_to(0.0, h);
        self.content.line_to(w, 0.0);
        self.content.move_to(0.0, 0.0);
        self.content.line_to(w, h);
        self.content.stroke();

        let size = (PLACEHOLDER_TEXT_PT as f32).min(h * 0.5);
        let font = self.font_resource(base_font(&el.font_family, false));
        let text_w = 3.0 * size * CHAR_WIDTH_EM as f32;
        let baseline = h - ((h - size) / 2.0 + BASELINE_EM as f32 * size);
        self.content.set_fill_rgb(r, g, b);
        self.content.begin_text();
        self.content.set_font(Name(font.as_bytes()), size);
        self.content.set_text_matrix([1.0, 0.0, 0.0, 1.0, (w - text_w) / 2.0, baseline]);
        self.content.show(Str(b"IMG"));
        self.content.end_text();
    }

    fn symbol(&mut self, el: &PrintElement, w: f32, h: f32) {
        self.images.push(render_element_gray(el, SYMBOL_DPI));
        let name = format!("Im{}", self.images.len());
        self.content.transform([w, 0.0, 0.0, h, 0.0, 0.0]);
        self.content.x_object(Name(name.as_bytes()));
    }

    fn text(&mut self, el: &PrintElement, w: f32, h: f32) {
        let size = el.font_size as f32;
        let font = self.font_resource(base_font(&el.font_family, el.is_bold()));
        let (r, g, b) = rgb(Some(el.color.as_str()));
        self.content.set_fill_rgb(r, g, b);
        self.content.begin_text();
        self.content.set_font(Name(font.as_bytes()), size);
        for (i, line) in wrap_text(&el.content, el.font_size, el.width).iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            let line_w = line.chars().count() as f64 * el.font_size * CHAR_WIDTH_EM;
            let x = align_offset(el.alignment, w as f64, line_w) as f32;
            let baseline = h - (i as f32 * LINE_HEIGHT_EM as f32 + BASELINE_EM as f32) * size;
            self.content.set_text_matrix([1.0, 0.0, 0.0, 1.0, x, baseline]);
            self.content.show(Str(&pdf_text(line)));
        }
        self.content.end_text();
    }
}
