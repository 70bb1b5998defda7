use crate::{
    config::Config,
    engine::{python::PythonEngine, Engine, EngineAdapter},
    export::{parse_formats, ExportFormat, ExportOptions, Exporter},
    inputs::collect_inputs,
    orchestrator::{ConversionRequest, EventDetail, Orchestrator},
    report::{RequestReport, RequestStatus},
    util::{dir_size, ensure_dir, expand_tilde, now_rfc3339},
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pdf-extractor")]
#[command(about = "Offline PDF extraction to JSON, Markdown, CSV/XLSX and HTML (Docling)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pdf-extractor.toml if present, else defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print Python / Docling diagnostics as JSON.
    Doctor {},
    /// Load the engine once so its models land in the model cache.
    FetchModels {},
    /// Convert PDF files, or folders of PDF files.
    Convert {
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// json, markdown, csv, html (repeatable). Defaults to [export].formats.
        #[arg(long)]
        format: Vec<String>,
        #[arg(long)]
        recursive: bool,
    },
}

/// Runs the selected command and returns the process exit code.
pub fn dispatch(args: Args) -> Result<i32> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    if cfg.debug.dump_effective_config {
        debug!(
            "effective config:\n{}",
            toml::to_string(&cfg).unwrap_or_default()
        );
    }

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::FetchModels {} => fetch_models(&cfg),
        Command::Convert {
            input,
            out_dir,
            format,
            recursive,
        } => convert(&cfg, input, out_dir.as_deref(), format, *recursive),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("pdf-extractor.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(expand_tilde(&cfg.logging.file_path));
    }
    Some(expand_tilde(&cfg.paths.out_dir).join("pdf-extractor.log"))
}

fn doctor(cfg: &Config) -> Result<i32> {
    let engine = PythonEngine::new(cfg)?;
    let diag = engine.doctor()?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(if diag.ok { 0 } else { 1 })
}

fn fetch_models(cfg: &Config) -> Result<i32> {
    let engine = PythonEngine::new(cfg)?;
    let models_dir = engine.models_dir().to_path_buf();
    info!("fetching models into {}", models_dir.display());

    let adapter = EngineAdapter::new(engine);
    adapter
        .ensure_ready()
        .with_context(|| format!("populate model cache {}", models_dir.display()))?;

    let bytes = dir_size(&models_dir);
    let size_mb = bytes as f64 / (1024.0 * 1024.0);
    info!("model cache holds {size_mb:.1} MB");
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "models_dir": models_dir,
            "size_mb": (size_mb * 10.0).round() / 10.0,
            "status": "ok",
        }))?
    );
    Ok(0)
}

fn convert(
    cfg: &Config,
    input: &[PathBuf],
    out_override: Option<&Path>,
    format: &[String],
    recursive: bool,
) -> Result<i32> {
    let formats: Vec<ExportFormat> = if format.is_empty() {
        parse_formats(&cfg.export.formats)
    } else {
        parse_formats(format)
    }
    .map_err(|e| anyhow!(e))?;
    if formats.is_empty() {
        bail!("no export formats selected");
    }

    let out_dir = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde(&cfg.paths.out_dir));
    let inputs = collect_inputs(
        input,
        recursive || cfg.global.recursive,
        cfg.security.reject_url_inputs,
    )?;
    if inputs.is_empty() {
        bail!("no PDF files found in the given inputs");
    }
    ensure_dir(&out_dir)?;

    let engine = PythonEngine::new(cfg)?;
    let adapter = Arc::new(
        EngineAdapter::new(engine).with_max_input_file_bytes(cfg.limits.max_input_file_bytes),
    );
    let orchestrator = Orchestrator::start(adapter, Exporter::new(ExportOptions::from_config(cfg)))?;
    let events = orchestrator.events();

    let started = now_rfc3339();
    let mut rejected = Vec::new();
    let mut pending = 0usize;
    for path in inputs {
        let request = ConversionRequest::new(&path, formats.iter().copied(), &out_dir)?;
        match orchestrator.submit(request) {
            Ok(_) => pending += 1,
            Err(err) => {
                warn!("rejected {}: {err}", path.display());
                rejected.push(serde_json::json!({
                    "source": path,
                    "error": err.to_string(),
                }));
            }
        }
    }

    let mut reports: Vec<RequestReport> = Vec::with_capacity(pending);
    while pending > 0 {
        let event = events
            .recv()
            .context("conversion worker stopped before finishing")?;
        match event.detail {
            EventDetail::EngineLoading => {
                info!("{}: waiting for the conversion engine to load", event.handle)
            }
            EventDetail::Converted {
                page_count,
                table_count,
            } => info!(
                "{}: {page_count} page(s), {table_count} table(s)",
                event.handle
            ),
            EventDetail::Exported(result) => debug!(
                "{}: {} {}% ({} file(s))",
                event.handle,
                result.format,
                event.progress,
                result.files().len()
            ),
            EventDetail::Finished(report) => {
                pending -= 1;
                reports.push(report);
            }
            EventDetail::Accepted { .. } | EventDetail::Converting => {}
        }
    }
    orchestrator.shutdown();

    let failed = !rejected.is_empty()
        || reports
            .iter()
            .any(|r| r.status != RequestStatus::Done || r.failed_exports().next().is_some());

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "out_dir": out_dir,
                "started": started,
                "finished": now_rfc3339(),
                "requests": reports,
                "rejected": rejected,
                "status": if failed { "failed" } else { "ok" },
            }))?
        );
    }

    Ok(if failed { 1 } else { 0 })
}
