//! LabelForge Core - Label Compilation and Print Pipeline
//!
//! Orders go in, printer-ready data comes out:
//! 1. Profiles resolve by hierarchy (order > variant > product > system)
//! 2. Templates compile against a typed data context
//! 3. Preflight reports before anything prints
//! 4. Engines emit PDF, ZPL, TSPL or Brother QL raster
//! 5. Batches group jobs by printer and fail per item, never per batch

pub mod units;
pub mod model;
pub mod templates;
pub mod hierarchy;
pub mod context;
pub mod compiler;
pub mod print;
pub mod engines;
pub mod raster;
mod glyphs;
pub mod preflight;
pub mod batch;
pub mod pipeline;
pub mod hashing;
pub mod config;
pub mod logging;

pub use units::{PrintDimensions, Rect, GeometryError};
pub use model::{Order, OrderLineItem, Product, ProductVariant};
pub use templates::{LabelProfile, LabelTemplate, TemplateField, TemplateStore, InMemoryTemplateStore};
pub use hierarchy::{ProfileResolver, ProfileResolution, ProfileSource};
pub use context::{ContextOptions, DataContext};
pub use compiler::{LabelResolver, LabelResolutionRequest, LabelResolutionResult, LabelIssue, LabelErrorKind};
pub use print::{PrintElement, PrintJob, PrintOutput, PrinterProfile};
pub use engines::{Engine, EngineKind, EngineRegistry, EngineError, PrintEngine, Preview};
pub use preflight::{PreflightValidator, PreflightReport, PreflightStatus, PreflightRule};
pub use batch::{BatchProcessor, BatchRequest, BatchOptions, BatchResult, BatchProgress, BatchStatus};
pub use pipeline::{LabelPipeline, PipelineError, SingleOrderResult};
pub use config::PipelineConfig;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
