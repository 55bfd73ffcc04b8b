//! LabelForge CLI - JSON bridge to the label pipeline
//!
//! Commands: media, resolve, compile, preflight, render, batch
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when resolution, preflight or compilation fails

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use labelforge_core::{
    logging, BatchRequest, EngineKind, InMemoryTemplateStore, LabelPipeline, LabelResolutionRequest,
    Order, PipelineConfig, PrintEngine, TemplateStore,
};

#[derive(Parser)]
#[command(name = "labelforge-cli")]
#[command(about = "LabelForge CLI - Label Compilation and Print Pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding profiles/ and templates/
    #[arg(short, long, default_value = "labels")]
    store_dir: PathBuf,

    /// Pipeline config (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "warn")]
    log_level: String,

    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List media sizes and capabilities of an engine
    Media {
        #[arg(short, long)]
        engine: EngineKind,
    },

    /// Resolve an order to print jobs
    Resolve {
        /// JSON payload (Order)
        #[arg(short, long)]
        payload: String,

        #[arg(short, long)]
        line_item: Option<String>,
    },

    /// Compile one order to printer data
    Compile {
        /// JSON payload (Order)
        #[arg(short, long)]
        payload: String,

        #[arg(short, long)]
        engine: Option<EngineKind>,

        #[arg(short, long)]
        line_item: Option<String>,
    },

    /// Preflight every job of an order
    Preflight {
        /// JSON payload (Order)
        #[arg(short, long)]
        payload: String,

        #[arg(short, long)]
        engine: Option<EngineKind>,
    },

    /// Compile one order and write the printer data to a file
    Render {
        /// JSON payload (Order)
        #[arg(short, long)]
        payload: String,

        #[arg(short, long)]
        engine: Option<EngineKind>,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Process a batch
    Batch {
        /// JSON payload (BatchRequest)
        #[arg(short, long)]
        payload: String,
    },
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!("{}", json!({ "success": false, "error": e.to_string() })),
    }
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    emit(&json!({ "success": false, "error": error.to_string() }));
    ExitCode::FAILURE
}

fn verdict(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn parse_order(payload: &str) -> Result<Order, String> {
    serde_json::from_str(payload).map_err(|e| format!("Invalid payload: {}", e))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, String> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::from_env(),
    }
    .map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logger(&cli.log_level, cli.json_logs);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return fail(format!("Failed to load config: {}", e)),
    };
    let store: Arc<dyn TemplateStore> = match InMemoryTemplateStore::load_from_dir(&cli.store_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => return fail(format!("Failed to load templates: {}", e)),
    };
    let pipeline = match LabelPipeline::new(config, store) {
        Ok(pipeline) => pipeline,
        Err(e) => return fail(e),
    };

    match cli.command {
        Commands::Media { engine } => {
            let engine = pipeline.engines().get(engine);
            emit(&json!({
                "engine": engine.kind(),
                "name": engine.name(),
                "capabilities": engine.capabilities(),
                "mediaSizes": engine.supported_media_sizes(),
            }));
            ExitCode::SUCCESS
        }

        Commands::Resolve { payload, line_item } => {
            let order = match parse_order(&payload) {
                Ok(order) => order,
                Err(e) => return fail(e),
            };
            let request = LabelResolutionRequest {
                line_item_id: line_item,
                ..LabelResolutionRequest::new(order)
            };
            let result = pipeline.resolve_order(&request).await;
            emit(&result);
            verdict(result.success)
        }

        Commands::Compile {
            payload,
            engine,
            line_item,
        } => {
            let order = match parse_order(&payload) {
                Ok(order) => order,
                Err(e) => return fail(e),
            };
            let result = pipeline.compile_single_order(order, engine, line_item).await;
            emit(&result);
            verdict(result.success)
        }

        Commands::Preflight { payload, engine } => {
            let order = match parse_order(&payload) {
                Ok(order) => order,
                Err(e) => return fail(e),
            };
            let resolution = pipeline
                .resolve_order(&LabelResolutionRequest::new(order.clone()))
                .await;
            let mut reports = vec![];
            for mut job in resolution.print_jobs {
                if engine.is_some() {
                    job.metadata.engine = engine;
                }
                match pipeline.preflight(&job, Some(&order)).await {
                    Ok(report) => reports.push(report),
                    Err(e) => return fail(e),
                }
            }
            let printable = resolution.errors.is_empty() && reports.iter().all(|r| r.can_print);
            emit(&json!({
                "success": printable,
                "reports": reports,
                "errors": resolution.errors,
            }));
            verdict(printable)
        }

        Commands::Render { payload, engine, out } => {
            let order = match parse_order(&payload) {
                Ok(order) => order,
                Err(e) => return fail(e),
            };
            let result = pipeline.compile_single_order(order, engine, None).await;
            let Some(output) = result.output.as_ref() else {
                emit(&result);
                return verdict(false);
            };
            if let Err(e) = std::fs::write(&out, output.bytes()) {
                return fail(format!("Failed to write {}: {}", out.display(), e));
            }
            emit(&json!({
                "success": result.success,
                "path": out.display().to_string(),
                "format": output.format,
                "mimeType": output.mime_type,
                "sizeBytes": output.size_bytes,
                "checksum": output.checksum,
                "preflight": result.preflight,
                "errors": result.errors,
            }));
            verdict(result.success)
        }

        Commands::Batch { payload } => {
            let request: BatchRequest = match serde_json::from_str(&payload) {
                Ok(request) => request,
                Err(e) => return fail(format!("Invalid payload: {}", e)),
            };
            match pipeline.batch_processor().process_batch(request).await {
                Ok(result) => {
                    emit(&result);
                    verdict(result.success)
                }
                Err(e) => fail(e),
            }
        }
    }
}
