//! Raster Compositor
//!
//! Paints compiled elements onto an RGB canvas. Every preview and the
//! Brother QL bitmap go through here, and the PDF engine uses it for its
//! barcode and QR images, so all engines share one layout.
//!
//! Barcodes and QR codes are drawn as deterministic patterns seeded by their
//! content. They are visual stand-ins, not scannable symbols.

use image::{imageops, DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use std::io::Cursor;

use crate::engines::{normalize_rotation, EngineError, Preview};
use crate::glyphs::{glyph, is_set, GLYPH_COLUMNS, GLYPH_ROWS};
use crate::print::{paint_order, Alignment, ElementType, PrintElement, PrintJob};
use crate::units::{points_to_dots, POINTS_PER_INCH};

/// Advance width of one character, in ems.
pub const CHAR_WIDTH_EM: f64 = 0.55;
pub const LINE_HEIGHT_EM: f64 = 1.2;
/// Baseline offset from the top of a line, in ems.
pub const BASELINE_EM: f64 = 0.875;
pub const BARCODE_BARS: usize = 30;
pub const QR_MODULES: usize = 21;
/// Share of a barcode box used by bars when human-readable text is shown.
pub const BAR_HEIGHT_RATIO: f64 = 0.8;
pub const BARCODE_TEXT_PT: f64 = 10.0;
pub const PLACEHOLDER_TEXT_PT: f64 = 12.0;

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub dpi: u32,
    /// Print every mark in black, like a direct-thermal head.
    pub thermal: bool,
    /// Apply element rotation; engines without rotation flatten it.
    pub honor_rotation: bool,
}

/// Width of `text` at `font_size_pt`, in inches.
pub fn measure_text_inches(text: &str, font_size_pt: f64) -> f64 {
    text.chars().count() as f64 * font_size_pt * CHAR_WIDTH_EM / POINTS_PER_INCH
}

/// Greedy word wrap against a box width. Explicit newlines always break.
pub fn wrap_text(text: &str, font_size_pt: f64, max_width_inches: f64) -> Vec<String> {
    let mut lines = vec![];
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if !current.is_empty() && measure_text_inches(&candidate, font_size_pt) > max_width_inches {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }
    lines
}

/// Offset of a line inside its box for the given alignment.
pub fn align_offset(alignment: Alignment, box_width: f64, line_width: f64) -> f64 {
    match alignment {
        Alignment::Left => 0.0,
        Alignment::Center => (box_width - line_width) / 2.0,
        Alignment::Right => box_width - line_width,
    }
}

/// Which of the bars are inked.
pub fn barcode_pattern(content: &str) -> [bool; BARCODE_BARS] {
    let codes: Vec<u32> = content.chars().map(|c| c as u32).collect();
    let mut bars = [false; BARCODE_BARS];
    if codes.is_empty() {
        return bars;
    }
    for (i, bar) in bars.iter_mut().enumerate() {
        *bar = (codes[i % codes.len()] + i as u32) % 3 != 0;
    }
    bars
}

/// Module grid with three finder squares and a content-seeded fill.
pub fn qr_modules(content: &str) -> [[bool; QR_MODULES]; QR_MODULES] {
    let codes: Vec<u32> = content.chars().map(|c| c as u32).collect();
    let mut grid = [[false; QR_MODULES]; QR_MODULES];
    if codes.is_empty() {
        return grid;
    }
    let finder_origin = |row: usize, col: usize| -> Option<(usize, usize)> {
        let far = QR_MODULES - 8;
        match (row, col) {
            (r, c) if r < 8 && c < 8 => Some((r, c)),
            (r, c) if r < 8 && c > far => Some((r, c - far - 1)),
            (r, c) if r > far && c < 8 => Some((r - far - 1, c)),
            _ => None,
        }
    };
    for (row, cells) in grid.iter_mut().enumerate() {
        for (col, cell) in cells.iter_mut().enumerate() {
            *cell = match finder_origin(row, col) {
                Some((r, c)) if r == 7 || c == 7 => false,
                Some((r, c)) => {
                    r == 0 || r == 6 || c == 0 || c == 6 || ((2..=4).contains(&r) && (2..=4).contains(&c))
                }
                None => {
                    let seed = (row * QR_MODULES + col) as u32 + codes[(row + col) % codes.len()];
                    seed % 3 == 0
                }
            };
        }
    }
    grid
}

/// `#rrggbb`, `#rgb` or a few CSS names.
pub fn parse_color(value: &str) -> Option<Rgb<u8>> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "black" => return Some(BLACK),
        "white" => return Some(WHITE),
        "red" => return Some(Rgb([255, 0, 0])),
        "green" => return Some(Rgb([0, 128, 0])),
        "blue" => return Some(Rgb([0, 0, 255])),
        "gray" | "grey" => return Some(Rgb([128, 128, 128])),
        _ => {}
    }
    let hex = value.strip_prefix('#')?;
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        6 => Some(Rgb([channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?])),
        3 => {
            let expand = |i: usize| channel(&hex[i..i + 1]).map(|v| v * 17);
            Some(Rgb([expand(0)?, expand(1)?, expand(2)?]))
        }
        _ => None,
    }
}

pub fn luminance(pixel: &Rgb<u8>) -> f64 {
    let [r, g, b] = pixel.0;
    0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64
}

/// RGB drawing surface measured in device pixels.
pub struct Canvas {
    image: RgbImage,
    dpi: u32,
}

impl Canvas {
    pub fn new(width_inches: f64, height_inches: f64, dpi: u32) -> Self {
        let px = |inches: f64| ((inches * dpi as f64).round() as u32).max(1);
        Self::with_pixels(px(width_inches), px(height_inches), dpi)
    }

    fn with_pixels(width: u32, height: u32, dpi: u32) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, WHITE),
            dpi,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Fill `[x, x+w) x [y, y+h)`, clipped. Positive sizes cover at least one pixel.
    pub fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Rgb<u8>) {
        if w <= 0.0 || h <= 0.0 || !(x.is_finite() && y.is_finite()) {
            return;
        }
        let x0 = x.round() as i64;
        let y0 = y.round() as i64;
        let x1 = ((x + w).round() as i64).max(x0 + 1);
        let y1 = ((y + h).round() as i64).max(y0 + 1);
        let (cw, ch) = (self.width() as i64, self.height() as i64);
        for py in y0.max(0)..y1.min(ch) {
            for px in x0.max(0)..x1.min(cw) {
                self.image.put_pixel(px as u32, py as u32, color);
            }
        }
    }

    pub fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, thickness: f64, color: Rgb<u8>) {
        let t = thickness.min(w / 2.0).min(h / 2.0).max(1.0);
        self.fill_rect(x, y, w, t, color);
        self.fill_rect(x, y + h - t, w, t, color);
        self.fill_rect(x, y, t, h, color);
        self.fill_rect(x + w - t, y, t, h, color);
    }

    /// Thick segment stamped as squares along its length.
    pub fn draw_segment(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, thickness: f64, color: Rgb<u8>) {
        let steps = (x1 - x0).abs().max((y1 - y0).abs()).ceil().max(1.0) as usize;
        let half = thickness / 2.0;
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let px = x0 + (x1 - x0) * t;
            let py = y0 + (y1 - y0) * t;
            self.fill_rect(px - half, py - half, thickness, thickness, color);
        }
    }

    /// One line of glyphs with its top edge at `y`.
    pub fn draw_text_line(&mut self, text: &str, x: f64, y: f64, font_px: f64, bold: bool, color: Rgb<u8>) {
        let advance = font_px * CHAR_WIDTH_EM;
        let sx = advance / (GLYPH_COLUMNS + 1) as f64;
        let sy = font_px / GLYPH_ROWS as f64;
        let stroke = if bold { sx * 2.0 } else { sx };
        for (i, c) in text.chars().enumerate() {
            let columns = glyph(c);
            let gx = x + i as f64 * advance;
            for col in 0..GLYPH_COLUMNS {
                for row in 0..GLYPH_ROWS {
                    if is_set(columns, col, row) {
                        self.fill_rect(gx + col as f64 * sx, y + row as f64 * sy, stroke, sy, color);
                    }
                }
            }
        }
    }

    /// Copy every non-white pixel of `layer` with its top-left at (`x`, `y`).
    fn overlay_ink(&mut self, layer: &RgbImage, x: i64, y: i64) {
        for (lx, ly, pixel) in layer.enumerate_pixels() {
            if *pixel == WHITE {
                continue;
            }
            let (px, py) = (x + lx as i64, y + ly as i64);
            if px >= 0 && py >= 0 && px < self.width() as i64 && py < self.height() as i64 {
                self.image.put_pixel(px as u32, py as u32, *pixel);
            }
        }
    }

    pub fn draw_element(&mut self, element: &PrintElement, options: &RenderOptions) {
        let dpi = self.dpi as f64;
        let (x, y) = (element.x * dpi, element.y * dpi);
        let rotation = if options.honor_rotation {
            normalize_rotation(element.rotation)
        } else {
            0
        };

        if rotation == 0 {
            self.draw_unrotated(element, x, y, options);
            return;
        }

        let mut layer = Canvas::new(element.width, element.height, self.dpi);
        layer.draw_unrotated(element, 0.0, 0.0, options);
        let rotated = match rotation {
            90 => imageops::rotate90(&layer.image),
            180 => imageops::rotate180(&layer.image),
            _ => imageops::rotate270(&layer.image),
        };
        self.overlay_ink(&rotated, x.round() as i64, y.round() as i64);
    }

    fn draw_unrotated(&mut self, el: &PrintElement, x: f64, y: f64, options: &RenderOptions) {
        let dpi = self.dpi;
        let (w, h) = (el.width * dpi as f64, el.height * dpi as f64);
        let ink = |color: Option<&str>| -> Rgb<u8> {
            if options.thermal {
                BLACK
            } else {
                color.and_then(parse_color).unwrap_or(BLACK)
            }
        };
        let stroke = stroke_pixels(el.border_width, dpi);

        match el.element_type {
            ElementType::Rectangle => {
                if let Some(background) = el.background_color.as_deref() {
                    self.fill_rect(x, y, w, h, ink(Some(background)));
                }
                if el.draws_outline() {
                    let color = ink(el.border_color.as_deref().or(Some(el.color.as_str())));
                    self.stroke_rect(x, y, w, h, stroke, color);
                }
            }
            ElementType::Line => {
                let color = ink(el.border_color.as_deref().or(Some(el.color.as_str())));
                if el.is_horizontal() {
                    self.fill_rect(x, y, w, stroke.min(h), color);
                } else {
                    self.fill_rect(x, y, stroke.min(w), h, color);
                }
            }
            ElementType::Image => {
                let color = ink(Some(el.color.as_str()));
                self.stroke_rect(x, y, w, h, stroke, color);
                self.draw_segment(x, y, x + w, y + h, stroke, color);
                self.draw_segment(x + w, y, x, y + h, stroke, color);
                let font_px = points_to_dots(PLACEHOLDER_TEXT_PT, dpi).min(h * 0.5);
                self.draw_centered_label("IMG", x, y + (h - font_px) / 2.0, w, font_px, color);
            }
            ElementType::Barcode => {
                if !el.has_content() {
                    return;
                }
                let color = ink(Some(el.color.as_str()));
                let bar_h = if el.show_text { h * BAR_HEIGHT_RATIO } else { h };
                let bar_w = w / BARCODE_BARS as f64;
                for (i, inked) in barcode_pattern(&el.content).iter().enumerate() {
                    if *inked {
                        self.fill_rect(x + i as f64 * bar_w, y, bar_w * 0.7, bar_h, color);
                    }
                }
                if el.show_text {
                    let band = h - bar_h;
                    let font_px = points_to_dots(BARCODE_TEXT_PT, dpi).min(band);
                    self.draw_centered_label(&el.content, x, y + bar_h + (band - font_px) / 2.0, w, font_px, color);
                }
            }
            ElementType::Qr => {
                if !el.has_content() {
                    return;
                }
                let color = ink(Some(el.color.as_str()));
                let cell = w.min(h) / QR_MODULES as f64;
                for (row, cells) in qr_modules(&el.content).iter().enumerate() {
                    for (col, inked) in cells.iter().enumerate() {
                        if *inked {
                            self.fill_rect(x + col as f64 * cell, y + row as f64 * cell, cell, cell, color);
                        }
                    }
                }
            }
            ElementType::Text => {
                if !el.has_content() {
                    return;
                }
                let color = ink(Some(el.color.as_str()));
                let font_px = points_to_dots(el.font_size, dpi);
                let line_h = font_px * LINE_HEIGHT_EM;
                for (i, line) in wrap_text(&el.content, el.font_size, el.width).iter().enumerate() {
                    let line_w = line.chars().count() as f64 * font_px * CHAR_WIDTH_EM;
                    let lx = x + align_offset(el.alignment, w, line_w);
                    self.draw_text_line(line, lx, y + i as f64 * line_h, font_px, el.is_bold(), color);
                }
            }
        }
    }

    fn draw_centered_label(&mut self, text: &str, x: f64, y: f64, w: f64, font_px: f64, color: Rgb<u8>) {
        let line_w = text.chars().count() as f64 * font_px * CHAR_WIDTH_EM;
        self.draw_text_line(text, x + (w - line_w) / 2.0, y, font_px, false, color);
    }
}

/// Stroke width in pixels for a border in points; one point when unset.
pub fn stroke_pixels(border_width_pt: Option<f64>, dpi: u32) -> f64 {
    points_to_dots(border_width_pt.unwrap_or(1.0), dpi).max(1.0)
}

/// Composite a whole job in paint order.
pub fn render_job(job: &PrintJob, options: &RenderOptions) -> RgbImage {
    let mut canvas = Canvas::new(job.dimensions.width_inches, job.dimensions.height_inches, options.dpi);
    for element in paint_order(&job.elements) {
        canvas.draw_element(element, options);
    }
    canvas.into_image()
}

/// One element alone on a canvas of its own size, as 8-bit gray.
pub fn render_element_gray(element: &PrintElement, dpi: u32) -> GrayImage {
    let mut canvas = Canvas::new(element.width, element.height, dpi);
    let local = PrintElement {
        x: 0.0,
        y: 0.0,
        rotation: 0.0,
        ..element.clone()
    };
    let options = RenderOptions {
        dpi,
        thermal: true,
        honor_rotation: false,
    };
    canvas.draw_element(&local, &options);
    let image = canvas.into_image();
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([luminance(image.get_pixel(x, y)).round().clamp(0.0, 255.0) as u8])
    })
}

/// 1-bit image; `true` is a black dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonoBitmap {
    pub width: u32,
    pub height: u32,
    dots: Vec<bool>,
}

impl MonoBitmap {
    pub fn row(&self, y: u32) -> &[bool] {
        let start = (y * self.width) as usize;
        &self.dots[start..start + self.width as usize]
    }

    pub fn is_black(&self, x: u32, y: u32) -> bool {
        self.dots[(y * self.width + x) as usize]
    }

    pub fn black_dots(&self) -> usize {
        self.dots.iter().filter(|d| **d).count()
    }

    pub fn bytes_per_row(&self) -> usize {
        (self.width as usize).div_ceil(8)
    }

    pub fn packed_rows(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        (0..self.height).map(move |y| pack_row(self.row(y)))
    }

    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if self.is_black(x, y) {
                BLACK
            } else {
                WHITE
            }
        })
    }
}

/// Threshold at 50% luminance.
pub fn to_monochrome(image: &RgbImage) -> MonoBitmap {
    MonoBitmap {
        width: image.width(),
        height: image.height(),
        dots: image.pixels().map(|p| luminance(p) < 128.0).collect(),
    }
}

/// Eight dots per byte, most significant bit first, last byte zero-padded.
pub fn pack_row(row: &[bool]) -> Vec<u8> {
    row.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .filter(|(_, black)| **black)
                .fold(0u8, |byte, (bit, _)| byte | (1 << (7 - bit)))
        })
        .collect()
}

pub fn encode_png(image: RgbImage) -> Result<Vec<u8>, EngineError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image).write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// Render, optionally threshold, and encode a preview.
pub fn render_preview(job: &PrintJob, options: &RenderOptions) -> Result<Preview, EngineError> {
    let mut image = render_job(job, options);
    if options.thermal {
        image = to_monochrome(&image).to_rgb();
    }
    let (width, height) = image.dimensions();
    Ok(Preview::from_png(encode_png(image)?, width, height, options.dpi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_row_msb_first() {
        let row = [true, false, false, false, false, false, false, true, true];
        assert_eq!(pack_row(&row), vec![0b1000_0001, 0b1000_0000]);
        assert_eq!(pack_row(&[false; 16]), vec![0, 0]);
    }

    #[test]
    fn test_threshold() {
        let mut image = RgbImage::from_pixel(3, 1, WHITE);
        image.put_pixel(0, 0, Rgb([127, 127, 127]));
        image.put_pixel(1, 0, Rgb([130, 130, 130]));
        image.put_pixel(2, 0, Rgb([255, 0, 0]));
        let mono = to_monochrome(&image);
        assert!(mono.is_black(0, 0));
        assert!(!mono.is_black(1, 0));
        // pure red has luminance 76
        assert!(mono.is_black(2, 0));
    }

    #[test]
    fn test_wrap_text() {
        // 12pt: each char is 0.55 * 12 / 72 = 0.0917in
        let lines = wrap_text("alpha beta gamma", 12.0, 0.6);
        assert_eq!(lines, vec!["alpha", "beta", "gamma"]);
        assert_eq!(wrap_text("alpha beta", 12.0, 5.0), vec!["alpha beta"]);
        assert_eq!(wrap_text("a\nb", 12.0, 5.0), vec!["a", "b"]);
        // a single long word is never split
        assert_eq!(wrap_text("supercalifragilistic", 12.0, 0.5).len(), 1);
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#000000"), Some(BLACK));
        assert_eq!(parse_color("#FFF"), Some(WHITE));
        assert_eq!(parse_color("#ff8000"), Some(Rgb([255, 128, 0])));
        assert_eq!(parse_color("Red"), Some(Rgb([255, 0, 0])));
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_color("teal-ish"), None);
    }

    #[test]
    fn test_patterns_are_content_seeded() {
        assert_eq!(barcode_pattern("TEST-001"), barcode_pattern("TEST-001"));
        assert_ne!(barcode_pattern("TEST-001"), barcode_pattern("OTHER-99"));
        assert!(barcode_pattern("").iter().all(|b| !b));

        let grid = qr_modules("hello");
        // finder corners
        assert!(grid[0][0] && grid[0][20] && grid[20][0]);
        assert!(grid[3][3] && !grid[1][1] && !grid[7][7]);
    }

    #[test]
    fn test_canvas_clips() {
        let mut canvas = Canvas::new(0.1, 0.1, 100);
        canvas.fill_rect(-5.0, -5.0, 100.0, 100.0, BLACK);
        let image = canvas.into_image();
        assert_eq!(image.dimensions(), (10, 10));
        assert!(image.pixels().all(|p| *p == BLACK));
    }

    #[test]
    fn test_png_signature() {
        let png = encode_png(RgbImage::from_pixel(4, 4, WHITE)).unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
