//! Batch Processing
//!
//! Resolves many orders, groups the resulting jobs by target printer and
//! generates one output per group on a bounded pool of blocking workers.
//! Progress lives in a shared map keyed by batch id; only the task running
//! a batch writes to its record, apart from `cancel_batch` flipping status.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::compiler::{LabelResolutionRequest, LabelResolver, LabelType};
use crate::config::PipelineConfig;
use crate::context::ContextOptions;
use crate::engines::{Engine, EngineError, EngineKind, EngineRegistry, Preview, PrintEngine};
use crate::model::Order;
use crate::preflight::{PreflightReport, PreflightValidator};
use crate::print::{PrintJob, PrintOutput, PrinterProfile};
use crate::templates::LabelTemplate;

pub const DEFAULT_PRINTER_ID: &str = "default";
pub const DEFAULT_PRINTER_NAME: &str = "Default Printer";

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch {0} is already processing")]
    AlreadyRunning(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchOptions {
    pub label_type: LabelType,
    pub group_by_printer: bool,
    /// Orders per chunk for large batches. Falls back to the configured size.
    pub max_batch_size: Option<usize>,
    /// Reserved. Failed items are reported, never retried.
    pub retry_failures: bool,
    pub generate_previews: bool,
    /// Forces every group onto one engine.
    pub output_format: Option<EngineKind>,
    pub run_preflight: Option<bool>,
    pub block_on_preflight_failure: Option<bool>,
    pub context: ContextOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            label_type: LabelType::Product,
            group_by_printer: true,
            max_batch_size: None,
            retry_failures: false,
            generate_previews: false,
            output_format: None,
            run_preflight: None,
            block_on_preflight_failure: None,
            context: ContextOptions::default(),
        }
    }
}

fn new_batch_id() -> String {
    format!("batch-{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    #[serde(default = "new_batch_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub orders: Vec<Order>,
    #[serde(default)]
    pub options: BatchOptions,
    /// Overrides the configured printers for this batch.
    #[serde(default)]
    pub printer_profiles: Option<Vec<PrinterProfile>>,
}

impl BatchRequest {
    pub fn new(orders: Vec<Order>) -> Self {
        Self {
            id: new_batch_id(),
            name: None,
            orders,
            options: BatchOptions::default(),
            printer_profiles: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchGroup {
    pub id: String,
    pub engine: EngineKind,
    pub printer_profile_id: String,
    pub printer_name: String,
    pub print_jobs: Vec<PrintJob>,
    pub total_labels: u64,
    /// Seconds, heuristic.
    pub estimated_print_time: u64,
}

impl BatchGroup {
    fn new(id: String, engine: EngineKind, printer: Option<&PrinterProfile>) -> Self {
        Self {
            id,
            engine,
            printer_profile_id: printer.map_or(DEFAULT_PRINTER_ID, |p| p.id.as_str()).to_string(),
            printer_name: printer.map_or(DEFAULT_PRINTER_NAME, |p| p.name.as_str()).to_string(),
            print_jobs: vec![],
            total_labels: 0,
            estimated_print_time: 0,
        }
    }

    fn refresh_totals(&mut self) {
        self.total_labels = self.print_jobs.iter().map(|j| j.copies as u64).sum();
        self.estimated_print_time = estimate_print_time(&self.print_jobs, self.engine);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobError {
    /// Line item id for resolution failures, group id for generation failures.
    pub job_id: String,
    #[serde(default)]
    pub line_item_id: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobWarning {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_group: Option<String>,
    pub errors: Vec<BatchJobError>,
    pub warnings: Vec<BatchJobWarning>,
}

impl BatchProgress {
    fn started(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            status: BatchStatus::Processing,
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            start_time: Utc::now(),
            end_time: None,
            current_group: None,
            errors: vec![],
            warnings: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    pub group_id: String,
    pub engine: EngineKind,
    pub output: PrintOutput,
    pub job_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_orders: usize,
    pub total_line_items: usize,
    pub total_labels: u64,
    pub processing_time_ms: u64,
    pub average_time_per_label: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: String,
    pub success: bool,
    pub groups: Vec<BatchGroup>,
    pub outputs: Vec<BatchOutput>,
    pub preflight: Vec<PreflightReport>,
    pub progress: BatchProgress,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatistics {
    pub active_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub cancelled_batches: usize,
    pub total_labels_generated: u64,
    /// Outputs generated per engine.
    pub engine_usage: BTreeMap<EngineKind, u64>,
}

/// Base seconds per label before the complexity multiplier.
pub fn seconds_per_label(engine: EngineKind) -> f64 {
    match engine {
        EngineKind::Pdf => 2.0,
        EngineKind::Zpl => 0.5,
        EngineKind::Tspl => 0.6,
        EngineKind::BrotherQl => 1.0,
    }
}

pub fn estimate_print_time(jobs: &[PrintJob], engine: EngineKind) -> u64 {
    let total: f64 = jobs
        .iter()
        .map(|job| {
            let complexity = (job.elements.len() as f64 / 10.0).max(1.0);
            job.copies as f64 * seconds_per_label(engine) * complexity
        })
        .sum();
    total.round() as u64
}

/// The printer a group on `engine` targets: default-flagged first.
pub(crate) fn printer_for(engine: EngineKind, printers: &[PrinterProfile]) -> Option<&PrinterProfile> {
    printers
        .iter()
        .find(|p| p.engine == engine && p.is_default)
        .or_else(|| printers.iter().find(|p| p.engine == engine))
}

/// Density a job prints at: the engine's fixed DPI, else the printer's, else its own.
pub(crate) fn target_dpi(engine: EngineKind, printer: Option<&PrinterProfile>, job_dpi: u32) -> u32 {
    engine
        .capabilities()
        .fixed_dpi()
        .or(printer.map(|p| p.dpi))
        .unwrap_or(job_dpi)
}

/// Partition jobs into printer groups, preserving first-seen order.
pub fn group_jobs(
    jobs: Vec<PrintJob>,
    options: &BatchOptions,
    printers: &[PrinterProfile],
    default_engine: EngineKind,
) -> Vec<BatchGroup> {
    if !options.group_by_printer {
        let engine = options.output_format.unwrap_or(default_engine);
        let mut group = BatchGroup::new("group-all".to_string(), engine, None);
        group.print_jobs = jobs
            .into_iter()
            .map(|mut job| {
                job.metadata.engine = Some(engine);
                let dpi = target_dpi(engine, None, job.dimensions.dpi);
                if dpi != job.dimensions.dpi {
                    job.dimensions = job.dimensions.with_dpi(dpi);
                }
                job
            })
            .collect();
        group.refresh_totals();
        return vec![group];
    }

    let mut groups: Vec<BatchGroup> = vec![];
    let mut index: HashMap<String, usize> = HashMap::new();
    for mut job in jobs {
        let engine = options
            .output_format
            .or(job.metadata.engine)
            .unwrap_or(default_engine);
        let printer = printer_for(engine, printers);
        let key = format!(
            "{}-{}",
            engine.as_str(),
            printer.map_or(DEFAULT_PRINTER_ID, |p| p.id.as_str())
        );

        job.metadata.engine = Some(engine);
        let dpi = target_dpi(engine, printer, job.dimensions.dpi);
        if dpi != job.dimensions.dpi {
            job.dimensions = job.dimensions.with_dpi(dpi);
        }

        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(BatchGroup::new(key, engine, printer));
            groups.len() - 1
        });
        groups[slot].print_jobs.push(job);
    }
    for group in &mut groups {
        group.refresh_totals();
    }
    groups
}

struct GroupRender {
    index: usize,
    result: Result<(PrintOutput, Option<Preview>), EngineError>,
    warnings: Vec<String>,
}

/// Validate every job in the group, then encode the representative job.
fn render_group(index: usize, engine: &Engine, jobs: &[PrintJob], with_preview: bool) -> GroupRender {
    let mut errors = vec![];
    let mut warnings = vec![];
    for job in jobs {
        let validation = engine.validate_elements(&job.elements, &job.dimensions);
        errors.extend(validation.errors.into_iter().map(|e| format!("{}: {}", job.id, e)));
        warnings.extend(validation.warnings.into_iter().map(|w| format!("{}: {}", job.id, w)));
    }
    if !errors.is_empty() {
        return GroupRender {
            index,
            result: Err(EngineError::Validation(errors)),
            warnings,
        };
    }

    let Some(representative) = jobs.first() else {
        return GroupRender {
            index,
            result: Err(EngineError::Generation {
                engine: engine.kind(),
                reason: "group has no jobs".into(),
            }),
            warnings,
        };
    };
    let result = engine.generate_print_output(representative).map(|output| {
        let preview = if with_preview {
            match engine.generate_preview(representative) {
                Ok(preview) => Some(preview),
                Err(e) => {
                    warnings.push(format!("{}: preview failed: {}", representative.id, e));
                    None
                }
            }
        } else {
            None
        };
        (output, preview)
    });
    GroupRender {
        index,
        result,
        warnings,
    }
}

/// A worker that panicked or was aborted fails its own group only.
fn settle(
    groups: &[BatchGroup],
    tasks: &HashMap<task::Id, usize>,
    done: Result<GroupRender, JoinError>,
) -> Option<GroupRender> {
    let error = match done {
        Ok(render) => return Some(render),
        Err(error) => error,
    };
    let Some(&index) = tasks.get(&error.id()) else {
        warn!(error = %error, "Finished worker has no group");
        return None;
    };
    Some(GroupRender {
        index,
        result: Err(EngineError::Generation {
            engine: groups[index].engine,
            reason: format!("worker failed: {}", error),
        }),
        warnings: vec![],
    })
}

/// Orchestrates batches over shared resolver, engines and preflight.
#[derive(Clone)]
pub struct BatchProcessor {
    resolver: Arc<LabelResolver>,
    engines: Arc<EngineRegistry>,
    preflight: Arc<PreflightValidator>,
    default_engine: EngineKind,
    printer_profiles: Vec<PrinterProfile>,
    max_batch_size: usize,
    max_concurrent_groups: usize,
    run_preflight: bool,
    block_on_preflight_failure: bool,
    progress: Arc<DashMap<String, BatchProgress>>,
    cancellations: Arc<DashMap<String, CancellationToken>>,
    labels_generated: Arc<AtomicU64>,
    engine_usage: Arc<DashMap<EngineKind, u64>>,
}

impl BatchProcessor {
    pub fn new(
        resolver: Arc<LabelResolver>,
        engines: Arc<EngineRegistry>,
        preflight: Arc<PreflightValidator>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            resolver,
            engines,
            preflight,
            default_engine: config.default_engine,
            printer_profiles: config.printer_profiles.clone(),
            max_batch_size: config.max_batch_size.max(1),
            max_concurrent_groups: config.max_concurrent_groups.max(1),
            run_preflight: config.run_preflight,
            block_on_preflight_failure: config.block_on_preflight_failure,
            progress: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            labels_generated: Arc::new(AtomicU64::new(0)),
            engine_usage: Arc::new(DashMap::new()),
        }
    }

    pub fn get_batch_progress(&self, batch_id: &str) -> Option<BatchProgress> {
        self.progress.get(batch_id).map(|p| p.clone())
    }

    /// Cancel a batch that is still processing. Groups already generating finish.
    pub fn cancel_batch(&self, batch_id: &str) -> bool {
        let Some(mut progress) = self.progress.get_mut(batch_id) else {
            return false;
        };
        if progress.status != BatchStatus::Processing {
            return false;
        }
        progress.status = BatchStatus::Cancelled;
        progress.end_time = Some(Utc::now());
        if let Some(token) = self.cancellations.get(batch_id) {
            token.cancel();
        }
        info!(batch_id, "Batch cancelled");
        true
    }

    pub fn batch_statistics(&self) -> BatchStatistics {
        let count = |status| self.progress.iter().filter(|p| p.status == status).count();
        BatchStatistics {
            active_batches: count(BatchStatus::Processing),
            completed_batches: count(BatchStatus::Completed),
            failed_batches: count(BatchStatus::Failed),
            cancelled_batches: count(BatchStatus::Cancelled),
            total_labels_generated: self.labels_generated.load(Ordering::Relaxed),
            engine_usage: self
                .engine_usage
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }

    fn update(&self, batch_id: &str, apply: impl FnOnce(&mut BatchProgress)) {
        if let Some(mut progress) = self.progress.get_mut(batch_id) {
            apply(&mut progress);
        }
    }

    #[instrument(skip_all, fields(batch_id = %request.id, orders = request.orders.len()))]
    pub async fn process_batch(&self, request: BatchRequest) -> Result<BatchResult, BatchError> {
        let started = Instant::now();
        let batch_id = request.id.clone();
        match self.progress.entry(batch_id.clone()) {
            Entry::Occupied(entry) if entry.get().status == BatchStatus::Processing => {
                return Err(BatchError::AlreadyRunning(batch_id));
            }
            Entry::Occupied(mut entry) => {
                entry.insert(BatchProgress::started(&batch_id));
            }
            Entry::Vacant(entry) => {
                entry.insert(BatchProgress::started(&batch_id));
            }
        }
        let cancel = CancellationToken::new();
        self.cancellations.insert(batch_id.clone(), cancel.clone());

        let outcome = self.run(&request, &cancel, started).await;
        self.cancellations.remove(&batch_id);
        if outcome.is_err() {
            self.update(&batch_id, |p| {
                p.status = BatchStatus::Failed;
                p.end_time = Some(Utc::now());
            });
        }
        outcome
    }

    async fn run(
        &self,
        request: &BatchRequest,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<BatchResult, BatchError> {
        let batch_id = request.id.as_str();
        let options = &request.options;

        // Resolution
        let mut jobs = vec![];
        let mut resolution_failures = 0;
        for order in &request.orders {
            if cancel.is_cancelled() {
                break;
            }
            let resolution = LabelResolutionRequest {
                label_type: options.label_type,
                options: options.context.clone(),
                ..LabelResolutionRequest::new(order.clone())
            };
            let result = self.resolver.resolve_order_to_labels(&resolution).await;
            resolution_failures += result.errors.len();
            self.update(batch_id, |p| {
                for issue in &result.errors {
                    let item = issue.line_item_id.as_deref().and_then(|id| order.line_item(id));
                    p.errors.push(BatchJobError {
                        job_id: issue.line_item_id.clone().unwrap_or_else(|| order.id.clone()),
                        line_item_id: issue.line_item_id.clone(),
                        order_number: Some(order.order_number.clone()),
                        product_name: item.map(|i| i.product_name.clone()),
                        error: issue.error.clone(),
                    });
                }
                p.failed_jobs += result.errors.len();
                p.warnings.extend(result.warnings.iter().map(|w| BatchJobWarning {
                    job_id: w.line_item_id.clone().unwrap_or_else(|| order.id.clone()),
                    message: w.message.clone(),
                }));
            });
            jobs.extend(result.print_jobs);
        }
        let total_labels: u64 = jobs.iter().map(|j| j.copies as u64).sum();
        let total_jobs = jobs.len() + resolution_failures;
        self.update(batch_id, |p| p.total_jobs = total_jobs);

        // Grouping and preflight
        let printers = request
            .printer_profiles
            .as_deref()
            .unwrap_or(&self.printer_profiles);
        let mut groups = group_jobs(jobs, options, printers, self.default_engine);
        let preflight = if options.run_preflight.unwrap_or(self.run_preflight) {
            let block = options
                .block_on_preflight_failure
                .unwrap_or(self.block_on_preflight_failure);
            self.preflight_groups(batch_id, &request.orders, &mut groups, block).await
        } else {
            vec![]
        };

        // Generation
        let outputs = self.generate_outputs(batch_id, &groups, options.generate_previews, cancel).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut progress = BatchProgress::started(batch_id);
        self.update(batch_id, |p| {
            if p.status == BatchStatus::Processing {
                p.status = if p.failed_jobs > 0 {
                    BatchStatus::Failed
                } else {
                    BatchStatus::Completed
                };
                p.end_time = Some(Utc::now());
            }
            p.current_group = None;
            progress = p.clone();
        });

        info!(
            status = ?progress.status,
            groups = groups.len(),
            outputs = outputs.len(),
            completed = progress.completed_jobs,
            failed = progress.failed_jobs,
            elapsed_ms,
            "Batch finished"
        );

        Ok(BatchResult {
            batch_id: batch_id.to_string(),
            success: progress.failed_jobs == 0 && progress.status != BatchStatus::Cancelled,
            groups,
            outputs,
            preflight,
            summary: BatchSummary {
                total_orders: request.orders.len(),
                total_line_items: request.orders.iter().map(|o| o.line_items.len()).sum(),
                total_labels,
                processing_time_ms: elapsed_ms,
                average_time_per_label: if total_labels > 0 {
                    elapsed_ms as f64 / total_labels as f64
                } else {
                    0.0
                },
            },
            progress,
        })
    }

    /// Preflight every grouped job; blocked jobs leave their group as failures.
    async fn preflight_groups(
        &self,
        batch_id: &str,
        orders: &[Order],
        groups: &mut Vec<BatchGroup>,
        block: bool,
    ) -> Vec<PreflightReport> {
        let mut templates: HashMap<String, Option<LabelTemplate>> = HashMap::new();
        let mut reports = vec![];
        for group in groups.iter_mut() {
            let mut kept = vec![];
            for job in group.print_jobs.drain(..) {
                if !templates.contains_key(&job.template_id) {
                    let template = self
                        .resolver
                        .template_store()
                        .template(&job.template_id)
                        .await
                        .unwrap_or_else(|e| {
                            warn!(template = %job.template_id, error = %e, "Template lookup failed during preflight");
                            None
                        });
                    templates.insert(job.template_id.clone(), template);
                }
                let Some(Some(template)) = templates.get(&job.template_id) else {
                    kept.push(job);
                    continue;
                };
                let order = orders.iter().find(|o| o.id == job.metadata.order_id);
                let report = self.preflight.validate_print_job(&job, template, order);
                if block && !report.can_print {
                    self.update(batch_id, |p| {
                        p.failed_jobs += 1;
                        p.errors.push(BatchJobError {
                            job_id: job.id.clone(),
                            line_item_id: Some(job.metadata.line_item_id.clone()),
                            order_number: Some(job.metadata.order_number.clone()),
                            product_name: Some(job.metadata.product_name.clone()),
                            error: format!("Preflight failed with {} critical issues", report.critical_issues),
                        });
                    });
                } else {
                    kept.push(job);
                }
                reports.push(report);
            }
            group.print_jobs = kept;
            group.refresh_totals();
        }
        groups.retain(|g| !g.print_jobs.is_empty());
        reports
    }

    async fn generate_outputs(
        &self,
        batch_id: &str,
        groups: &[BatchGroup],
        with_previews: bool,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutput> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_groups));
        let mut workers: JoinSet<GroupRender> = JoinSet::new();
        let mut tasks: HashMap<task::Id, usize> = HashMap::new();
        let mut outputs: Vec<(usize, BatchOutput)> = vec![];

        for (index, group) in groups.iter().enumerate() {
            while let Some(done) = workers.try_join_next() {
                if let Some(render) = settle(groups, &tasks, done) {
                    self.record(batch_id, groups, render, &mut outputs);
                }
            }
            if cancel.is_cancelled() {
                debug!(group = %group.id, "Skipping group after cancellation");
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if cancel.is_cancelled() {
                break;
            }
            self.update(batch_id, |p| p.current_group = Some(group.id.clone()));

            let engine = self.engines.get(group.engine).clone();
            let jobs = group.print_jobs.clone();
            let handle = workers.spawn_blocking(move || {
                let _permit = permit;
                render_group(index, &engine, &jobs, with_previews)
            });
            tasks.insert(handle.id(), index);
        }
        while let Some(done) = workers.join_next().await {
            if let Some(render) = settle(groups, &tasks, done) {
                self.record(batch_id, groups, render, &mut outputs);
            }
        }

        outputs.sort_by_key(|(index, _)| *index);
        outputs.into_iter().map(|(_, output)| output).collect()
    }

    /// Fold one finished group into progress. Only the batch task calls this.
    fn record(
        &self,
        batch_id: &str,
        groups: &[BatchGroup],
        render: GroupRender,
        outputs: &mut Vec<(usize, BatchOutput)>,
    ) {
        let group = &groups[render.index];
        let job_count = group.print_jobs.len();
        let warnings = render.warnings.into_iter().map(|message| BatchJobWarning {
            job_id: group.id.clone(),
            message,
        });

        match render.result {
            Ok((output, preview)) => {
                self.update(batch_id, |p| {
                    p.completed_jobs += job_count;
                    p.warnings.extend(warnings);
                });
                self.labels_generated.fetch_add(group.total_labels, Ordering::Relaxed);
                *self.engine_usage.entry(group.engine).or_insert(0) += 1;
                debug!(group = %group.id, bytes = output.size_bytes, "Group output generated");
                outputs.push((
                    render.index,
                    BatchOutput {
                        group_id: group.id.clone(),
                        engine: group.engine,
                        output,
                        job_count,
                        preview,
                    },
                ));
            }
            Err(e) => {
                warn!(group = %group.id, error = %e, "Group generation failed");
                let first = group.print_jobs.first();
                self.update(batch_id, |p| {
                    p.failed_jobs += job_count;
                    p.warnings.extend(warnings);
                    p.errors.push(BatchJobError {
                        job_id: group.id.clone(),
                        line_item_id: None,
                        order_number: first.map(|j| j.metadata.order_number.clone()),
                        product_name: first.map(|j| j.metadata.product_name.clone()),
                        error: e.to_string(),
                    });
                });
            }
        }
    }

    /// Split into independent chunks of `maxBatchSize` orders, processed lazily.
    pub fn process_large_batch(
        &self,
        request: BatchRequest,
    ) -> impl Stream<Item = Result<BatchResult, BatchError>> + '_ {
        let size = request
            .options
            .max_batch_size
            .unwrap_or(self.max_batch_size)
            .max(1);
        let chunks: Vec<BatchRequest> = request
            .orders
            .chunks(size)
            .enumerate()
            .map(|(i, orders)| BatchRequest {
                id: format!("{}-chunk-{}", request.id, i + 1),
                name: request.name.clone(),
                orders: orders.to_vec(),
                options: request.options.clone(),
                printer_profiles: request.printer_profiles.clone(),
            })
            .collect();
        stream::iter(chunks).then(move |chunk| self.process_batch(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::{Alignment, BarcodeFormat, ElementType, FontWeight, JobMetadata, PrintElement};
    use crate::units::PrintDimensions;

    fn job(id: &str, engine: Option<EngineKind>, copies: u32, elements: usize) -> PrintJob {
        let element = PrintElement {
            id: "e".into(),
            element_type: ElementType::Text,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 0.2,
            content: "x".into(),
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
        };
        PrintJob {
            id: id.into(),
            template_id: "t".into(),
            elements: vec![element; elements],
            dimensions: PrintDimensions::from_inches(2.0, 1.0, 203),
            copies,
            metadata: JobMetadata {
                order_id: "o".into(),
                order_number: "1001".into(),
                line_item_id: id.into(),
                product_name: "Soap".into(),
                customer_name: None,
                vendor_id: "v".into(),
                profile_id: "p".into(),
                engine,
                label_type: "product".into(),
                created_at: Utc::now(),
                fingerprint: String::new(),
            },
        }
    }

    fn printers() -> Vec<PrinterProfile> {
        vec![
            PrinterProfile::new("zebra-1", "Zebra ZT230", EngineKind::Zpl, 203).unwrap(),
            PrinterProfile::new("zebra-2", "Zebra ZT410", EngineKind::Zpl, 300)
                .unwrap()
                .as_default(),
            PrinterProfile::new("pdf", "PDF Generator", EngineKind::Pdf, 300).unwrap(),
        ]
    }

    #[test]
    fn test_estimate_print_time() {
        // 10 copies * 0.5s, plus 2 copies * 0.5s * 2.0 complexity
        let jobs = [job("a", None, 10, 3), job("b", None, 2, 20)];
        assert_eq!(estimate_print_time(&jobs, EngineKind::Zpl), 7);
        assert_eq!(estimate_print_time(&jobs[..1], EngineKind::Pdf), 20);
    }

    #[test]
    fn test_group_by_job_engine_and_default_printer() {
        let jobs = vec![
            job("a", Some(EngineKind::Zpl), 2, 1),
            job("b", None, 1, 1),
            job("c", Some(EngineKind::Zpl), 3, 1),
            job("d", Some(EngineKind::Tspl), 1, 1),
        ];
        let groups = group_jobs(jobs, &BatchOptions::default(), &printers(), EngineKind::Pdf);
        let ids: Vec<&str> = groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["ZPL-zebra-2", "PDF-pdf", "TSPL-default"]);

        let zebra = &groups[0];
        assert_eq!(zebra.printer_name, "Zebra ZT410");
        assert_eq!(zebra.total_labels, 5);
        assert!(zebra.print_jobs.iter().all(|j| j.dimensions.dpi == 300));
        assert_eq!(zebra.print_jobs[0].dimensions.width_dots(), 600);

        assert_eq!(groups[1].print_jobs[0].metadata.engine, Some(EngineKind::Pdf));
        assert_eq!(groups[2].printer_name, DEFAULT_PRINTER_NAME);
        assert_eq!(groups[2].print_jobs[0].dimensions.dpi, 203);
    }

    #[test]
    fn test_output_format_overrides_grouping() {
        let options = BatchOptions {
            output_format: Some(EngineKind::Tspl),
            ..BatchOptions::default()
        };
        let jobs = vec![job("a", Some(EngineKind::Zpl), 1, 1), job("b", Some(EngineKind::Pdf), 1, 1)];
        let groups = group_jobs(jobs, &options, &printers(), EngineKind::Pdf);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].engine, EngineKind::Tspl);
        assert_eq!(groups[0].print_jobs.len(), 2);
    }

    #[test]
    fn test_ungrouped_single_group() {
        let options = BatchOptions {
            group_by_printer: false,
            ..BatchOptions::default()
        };
        let jobs = vec![job("a", Some(EngineKind::Zpl), 4, 1), job("b", None, 1, 1)];
        let groups = group_jobs(jobs, &options, &printers(), EngineKind::Pdf);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "group-all");
        assert_eq!(groups[0].engine, EngineKind::Pdf);
        assert_eq!(groups[0].printer_profile_id, DEFAULT_PRINTER_ID);
        assert_eq!(groups[0].total_labels, 5);
    }

    #[test]
    fn test_render_group_fails_on_validation() {
        let engine = EngineRegistry::default().get(EngineKind::Zpl).clone();
        let mut bad = job("a", None, 1, 1);
        bad.elements[0].element_type = ElementType::Image;
        let render = render_group(0, &engine, &[job("ok", None, 1, 1), bad], false);
        assert!(matches!(render.result, Err(EngineError::Validation(_))));

        let render = render_group(1, &engine, &[job("ok", None, 1, 1)], true);
        let (output, preview) = render.result.unwrap();
        assert_eq!(output.format, EngineKind::Zpl);
        assert!(preview.is_some());
    }

    #[test]
    fn test_fixed_density_engine_rebases_jobs() {
        let options = BatchOptions {
            output_format: Some(EngineKind::BrotherQl),
            ..BatchOptions::default()
        };
        let groups = group_jobs(vec![job("a", None, 1, 1)], &options, &printers(), EngineKind::Pdf);
        assert_eq!(groups[0].id, "BrotherQL-default");
        assert_eq!(groups[0].print_jobs[0].dimensions.dpi, 300);
        assert_eq!(groups[0].print_jobs[0].dimensions.width_dots(), 600);

        let ungrouped = BatchOptions {
            group_by_printer: false,
            ..options
        };
        let groups = group_jobs(vec![job("a", None, 1, 1)], &ungrouped, &[], EngineKind::Pdf);
        assert_eq!(groups[0].print_jobs[0].dimensions.dpi, 300);
    }

    #[tokio::test]
    async fn test_panicked_worker_fails_only_its_group() {
        let jobs = vec![job("a", Some(EngineKind::Zpl), 1, 1), job("b", Some(EngineKind::Pdf), 1, 1)];
        let groups = group_jobs(jobs, &BatchOptions::default(), &[], EngineKind::Pdf);
        let engine = EngineRegistry::default().get(EngineKind::Pdf).clone();
        let pdf_jobs = groups[1].print_jobs.clone();

        let mut workers: JoinSet<GroupRender> = JoinSet::new();
        let mut tasks = HashMap::new();
        let crashed = workers.spawn_blocking(|| -> GroupRender { panic!("rasterizer crashed") });
        tasks.insert(crashed.id(), 0);
        let healthy = workers.spawn_blocking(move || render_group(1, &engine, &pdf_jobs, false));
        tasks.insert(healthy.id(), 1);

        let mut settled = vec![];
        while let Some(done) = workers.join_next().await {
            settled.extend(settle(&groups, &tasks, done));
        }
        settled.sort_by_key(|r| r.index);
        assert_eq!(settled.len(), 2);
        match &settled[0].result {
            Err(EngineError::Generation { engine, reason }) => {
                assert_eq!(*engine, EngineKind::Zpl);
                assert!(reason.starts_with("worker failed"));
            }
            other => panic!("unexpected {:?}", other.as_ref().map(|_| ())),
        }
        assert!(settled[1].result.is_ok());
    }

    #[test]
    fn test_options_defaults_from_json() {
        let options: BatchOptions = serde_json::from_str(r#"{"outputFormat":"BrotherQL"}"#).unwrap();
        assert!(options.group_by_printer);
        assert!(!options.retry_failures);
        assert_eq!(options.output_format, Some(EngineKind::BrotherQl));
        assert!(options.context.include_customer);
        assert!(!options.context.include_nutrition);

        let request: BatchRequest = serde_json::from_str(r#"{"orders":[]}"#).unwrap();
        assert!(request.id.starts_with("batch-"));
    }
}
