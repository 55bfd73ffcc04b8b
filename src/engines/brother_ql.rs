//! Brother QL raster generator.
//!
//! The job is composited at the engine's fixed density, thresholded to one
//! bit per dot and streamed as raster rows. Rotation is not available on
//! this path; rotated elements are drawn upright.

use tracing::{debug, instrument};

use super::{EngineError, EngineKind, Preview, PrintEngine};
use crate::config::{BrotherMedia, BrotherQlSettings};
use crate::print::{OutputData, PrintJob, PrintOutput};
use crate::raster::{render_job, render_preview, to_monochrome, MonoBitmap, RenderOptions};
use crate::units::{inches_to_mm, validate_dimensions};

const ESC: u8 = 0x1B;
const PRINT: u8 = 0x0C;
const PRINT_AND_FEED: u8 = 0x1A;
/// Media type, width, length and quality fields are valid.
const VALID_FLAGS: u8 = 0x8E;
const CUT_AT_END: u8 = 0x08;

/// Fluent builder over the QL command bytes.
#[derive(Debug, Default)]
pub struct QlCommandBuilder {
    buffer: Vec<u8>,
}

impl QlCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// ESC @
    pub fn initialize(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, b'@']);
        self
    }

    /// ESC i a 01
    pub fn raster_mode(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, b'i', b'a', 0x01]);
        self
    }

    /// ESC i z: media and quality information.
    pub fn media_info(&mut self, media: BrotherMedia, width_mm: u8, length_mm: u8, raster_lines: u32) -> &mut Self {
        let media_type = match media {
            BrotherMedia::Continuous => 0x0A,
            BrotherMedia::DieCut => 0x0B,
        };
        self.buffer
            .extend_from_slice(&[ESC, b'i', b'z', VALID_FLAGS, media_type, width_mm, length_mm]);
        self.buffer.extend_from_slice(&raster_lines.to_le_bytes());
        self.buffer.extend_from_slice(&[0x00, 0x00]);
        self
    }

    /// ESC i K: expanded mode.
    pub fn expanded_mode(&mut self, cut_at_end: bool) -> &mut Self {
        let flags = if cut_at_end { CUT_AT_END } else { 0x00 };
        self.buffer.extend_from_slice(&[ESC, b'i', b'K', flags]);
        self
    }

    /// `G`, row length as u16 LE, then the packed row.
    pub fn raster_row(&mut self, row: &[u8]) -> &mut Self {
        let len = row.len() as u16;
        self.buffer.push(b'G');
        self.buffer.extend_from_slice(&len.to_le_bytes());
        self.buffer.extend_from_slice(row);
        self
    }

    pub fn raster(&mut self, bitmap: &MonoBitmap) -> &mut Self {
        for row in bitmap.packed_rows() {
            self.raster_row(&row);
        }
        self
    }

    /// Print the page and wait for the next one.
    pub fn print_page(&mut self) -> &mut Self {
        self.buffer.push(PRINT);
        self
    }

    /// ESC i A 01, then print with feeding.
    pub fn finish_job(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, b'i', b'A', 0x01]);
        self.buffer.push(PRINT_AND_FEED);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.buffer.clone()
    }
}

#[derive(Debug, Clone)]
pub struct BrotherQlEngine {
    settings: BrotherQlSettings,
}

impl BrotherQlEngine {
    pub fn new(settings: BrotherQlSettings) -> Self {
        Self { settings }
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            dpi: self.settings.dpi,
            thermal: true,
            honor_rotation: false,
        }
    }

    /// The job as a 1-bit bitmap at the engine density.
    pub fn rasterize(&self, job: &PrintJob) -> Result<MonoBitmap, EngineError> {
        let dims = &job.dimensions;
        validate_dimensions(dims.width_inches, dims.height_inches)?;
        let options = self.render_options();
        Ok(to_monochrome(&render_job(&job.at_dpi(options.dpi), &options)))
    }

    pub fn render_bytes(&self, job: &PrintJob) -> Result<Vec<u8>, EngineError> {
        let bitmap = self.rasterize(job)?;
        let dims = &job.dimensions;
        let mm = |inches: f64| inches_to_mm(inches).round().clamp(0.0, u8::MAX as f64) as u8;
        let length_mm = match self.settings.media {
            BrotherMedia::Continuous => 0,
            BrotherMedia::DieCut => mm(dims.height_inches),
        };

        let mut builder = QlCommandBuilder::new();
        builder
            .initialize()
            .raster_mode()
            .media_info(self.settings.media, mm(dims.width_inches), length_mm, bitmap.height)
            .expanded_mode(self.settings.cut_at_end);

        let copies = job.copies.max(1);
        for copy in 0..copies {
            builder.raster(&bitmap);
            if copy + 1 < copies {
                builder.print_page();
            }
        }
        builder.finish_job();
        Ok(builder.build())
    }
}

impl PrintEngine for BrotherQlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::BrotherQl
    }

    fn name(&self) -> &'static str {
        "Brother QL"
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, copies = job.copies))]
    fn generate_print_output(&self, job: &PrintJob) -> Result<PrintOutput, EngineError> {
        let bytes = self.render_bytes(job)?;
        debug!(bytes = bytes.len(), "Generated Brother QL raster");
        Ok(PrintOutput::new(EngineKind::BrotherQl, &job.id, OutputData::Binary(bytes)))
    }

    fn generate_preview(&self, job: &PrintJob) -> Result<Preview, EngineError> {
        let options = self.render_options();
        render_preview(&job.at_dpi(options.dpi), &options)
    }
}
