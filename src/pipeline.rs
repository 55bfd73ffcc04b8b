//! Label Pipeline - Single Entry Point
//!
//! Built once from a config and a template store. Owns the engine registry,
//! resolver, preflight validator and batch processor, and hands out shared
//! references to them.

use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::batch::{printer_for, target_dpi, BatchError, BatchOptions, BatchProcessor, BatchRequest, BatchResult};
use crate::compiler::{LabelResolutionRequest, LabelResolutionResult, LabelResolver};
use crate::config::{ConfigError, PipelineConfig};
use crate::engines::{EngineError, EngineKind, EngineRegistry, MediaSize, Preview, PrintEngine};
use crate::hierarchy::ProfileResolver;
use crate::model::Order;
use crate::preflight::{CheckSeverity, PreflightReport, PreflightValidator};
use crate::print::{PrintJob, PrintOutput};
use crate::templates::{StoreError, TemplateStore};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Batch(#[from] BatchError),
}

/// Outcome of compiling one order straight to printer data.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleOrderResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PrintOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight: Option<PreflightReport>,
    pub errors: Vec<String>,
}

impl SingleOrderResult {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            output: None,
            preview: None,
            preflight: None,
            errors,
        }
    }
}

pub struct LabelPipeline {
    config: PipelineConfig,
    engines: Arc<EngineRegistry>,
    resolver: Arc<LabelResolver>,
    preflight: Arc<PreflightValidator>,
    batches: BatchProcessor,
}

impl LabelPipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn TemplateStore>) -> Result<Self, PipelineError> {
        config.validate()?;
        let engines = Arc::new(EngineRegistry::from_config(&config));
        let resolver = Arc::new(LabelResolver::new(
            store,
            ProfileResolver::new(config.system_default_profile_id.clone()),
            config.default_dpi,
        ));
        let preflight = Arc::new(PreflightValidator::new());
        let batches = BatchProcessor::new(resolver.clone(), engines.clone(), preflight.clone(), &config);
        Ok(Self {
            config,
            engines,
            resolver,
            preflight,
            batches,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn batch_processor(&self) -> &BatchProcessor {
        &self.batches
    }

    pub fn media_sizes(&self, engine: EngineKind) -> Vec<MediaSize> {
        self.engines.get(engine).supported_media_sizes()
    }

    fn engine_for(&self, job: &PrintJob, requested: Option<EngineKind>) -> EngineKind {
        requested
            .or(job.metadata.engine)
            .unwrap_or(self.config.default_engine)
    }

    pub async fn resolve_order(&self, request: &LabelResolutionRequest) -> LabelResolutionResult {
        self.resolver.resolve_order_to_labels(request).await
    }

    /// Preflight a job against the template it was compiled from.
    pub async fn preflight(&self, job: &PrintJob, order: Option<&Order>) -> Result<PreflightReport, PipelineError> {
        let template = self
            .resolver
            .template_store()
            .template(&job.template_id)
            .await?
            .ok_or_else(|| PipelineError::TemplateNotFound(job.template_id.clone()))?;
        Ok(self.preflight.validate_print_job(job, &template, order))
    }

    pub fn render(&self, job: &PrintJob, engine: Option<EngineKind>) -> Result<PrintOutput, PipelineError> {
        let kind = self.engine_for(job, engine);
        Ok(self.engines.get(kind).generate_print_output(job)?)
    }

    pub fn preview(&self, job: &PrintJob, engine: Option<EngineKind>) -> Result<Preview, PipelineError> {
        let kind = self.engine_for(job, engine);
        Ok(self.engines.get(kind).generate_preview(job)?)
    }

    /// Compile many orders as one batch.
    pub async fn compile_order_labels(
        &self,
        orders: Vec<Order>,
        options: BatchOptions,
    ) -> Result<BatchResult, PipelineError> {
        let request = BatchRequest {
            name: Some(format!("Label batch - {} orders", orders.len())),
            options,
            ..BatchRequest::new(orders)
        };
        Ok(self.batches.process_batch(request).await?)
    }

    /// Compile, preflight and encode the first label of one order.
    #[instrument(skip_all, fields(order = %order.order_number))]
    pub async fn compile_single_order(
        &self,
        order: Order,
        engine: Option<EngineKind>,
        line_item_id: Option<String>,
    ) -> SingleOrderResult {
        let request = LabelResolutionRequest {
            line_item_id,
            ..LabelResolutionRequest::new(order)
        };
        let resolution = self.resolver.resolve_order_to_labels(&request).await;
        let mut errors: Vec<String> = resolution.errors.iter().map(|e| e.error.clone()).collect();

        let Some(mut job) = resolution.print_jobs.into_iter().next() else {
            return SingleOrderResult::failed(errors);
        };
        let kind = self.engine_for(&job, engine);
        job.metadata.engine = Some(kind);
        let dpi = target_dpi(kind, printer_for(kind, &self.config.printer_profiles), job.dimensions.dpi);
        if dpi != job.dimensions.dpi {
            job.dimensions = job.dimensions.with_dpi(dpi);
        }

        let preflight = if self.config.run_preflight {
            match self.preflight(&job, Some(&request.order)).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(job = %job.id, error = %e, "Preflight skipped");
                    None
                }
            }
        } else {
            None
        };
        if let Some(report) = preflight.as_ref().filter(|r| !r.can_print) {
            if self.config.block_on_preflight_failure {
                errors.extend(
                    report
                        .checks
                        .iter()
                        .filter(|c| !c.passed && c.severity == CheckSeverity::Critical)
                        .map(|c| format!("{}: {}", c.name, c.message)),
                );
                return SingleOrderResult {
                    preflight,
                    ..SingleOrderResult::failed(errors)
                };
            }
        }

        let engine = self.engines.get(kind);
        let validation = engine.validate_elements(&job.elements, &job.dimensions);
        for warning in &validation.warnings {
            debug!(job = %job.id, engine = %kind, "{}", warning);
        }
        if !validation.errors.is_empty() {
            errors.push(EngineError::Validation(validation.errors).to_string());
            return SingleOrderResult {
                preflight,
                ..SingleOrderResult::failed(errors)
            };
        }
        let output = match engine.generate_print_output(&job) {
            Ok(output) => output,
            Err(e) => {
                errors.push(e.to_string());
                return SingleOrderResult {
                    preflight,
                    ..SingleOrderResult::failed(errors)
                };
            }
        };
        let preview = engine
            .generate_preview(&job)
            .map_err(|e| warn!(job = %job.id, error = %e, "Preview failed"))
            .ok();

        info!(job = %job.id, engine = %kind, bytes = output.size_bytes, "Order compiled");
        SingleOrderResult {
            success: errors.is_empty(),
            output: Some(output),
            preview,
            preflight,
            errors,
        }
    }

    pub fn compile_large_batch(
        &self,
        request: BatchRequest,
    ) -> impl Stream<Item = Result<BatchResult, BatchError>> + '_ {
        self.batches.process_large_batch(request)
    }
}
