use crate::cli::OutputFormat;
use crate::commands::CommandReport;
use crate::digest::audit;
use crate::digest::chunking::ByteRatioEstimator;
use crate::digest::config::{self, DigestConfig};
use crate::digest::diagnostics::DiagnosticsReport;
use crate::digest::finalizer::Summary;
use crate::digest::message;
use crate::digest::paths::{self, DigestPaths};
use crate::digest::pipeline::DigestPipeline;
use crate::digest::provider;
use crate::digest::retry::CancelToken;
use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DigestOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
    pub diagnostics: Option<PathBuf>,
}

fn default_output_path(paths: &DigestPaths, format: OutputFormat) -> PathBuf {
    let date = Utc::now().format("%Y-%m-%d");
    paths
        .output_dir
        .join(format!("digest-{date}.{}", format.extension()))
}

fn diagnostics_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("digest");
    output.with_file_name(format!("{stem}.diagnostics.json"))
}

fn render(summary: &Summary, format: OutputFormat, tz: Tz) -> Result<String> {
    Ok(match format {
        OutputFormat::Markdown => summary.to_markdown(tz),
        OutputFormat::Plain => summary.to_plain_text(tz),
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(summary)?),
    })
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

fn register_signals(cancel: &CancelToken) -> Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.flag())
        .context("failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.flag())
        .context("failed to register SIGTERM handler")?;
    Ok(())
}

fn run_status(diag: &DiagnosticsReport) -> &'static str {
    if diag.no_valid_bullets {
        "empty"
    } else if !diag.failed_chunks.is_empty() || !diag.skipped_chunks.is_empty() {
        "partial"
    } else {
        "ok"
    }
}

pub fn run(opts: &DigestOptions) -> Result<CommandReport> {
    let paths = paths::resolve_paths()?;
    let cfg: DigestConfig = config::load_config(&paths)?;
    let mut report = CommandReport::new("digest");

    let loaded = message::load_messages(&opts.input)?;
    info!(
        input = %opts.input.display(),
        messages = loaded.messages.len(),
        skipped_empty = loaded.skipped_empty,
        skipped_missing_id = loaded.skipped_missing_id,
        "loaded transcript"
    );

    let generator = provider::build_generator(&cfg.generation, &cfg.taxonomy)?;
    let estimator = Box::new(ByteRatioEstimator::new(cfg.chunking.bytes_per_token));
    let tz: Tz = cfg
        .finalize
        .timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown timezone `{}`", cfg.finalize.timezone))?;
    let pipeline = DigestPipeline::new(cfg, generator, estimator)?;

    let cancel = CancelToken::new();
    register_signals(&cancel)?;

    let outcome = pipeline.run(loaded.messages, &cancel)?;
    let mut diag = outcome.diagnostics;
    diag.skipped_empty_messages = loaded.skipped_empty;
    diag.skipped_missing_id_messages = loaded.skipped_missing_id;

    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&paths, opts.format));
    let diagnostics = opts
        .diagnostics
        .clone()
        .unwrap_or_else(|| diagnostics_path_for(&output));

    write_file(&output, &render(&outcome.summary, opts.format, tz)?)?;
    write_file(
        &diagnostics,
        &format!("{}\n", serde_json::to_string_pretty(&diag)?),
    )?;
    debug!(output = %output.display(), diagnostics = %diagnostics.display(), "wrote digest");

    report.detail(format!("output={}", output.display()));
    report.detail(format!("diagnostics={}", diagnostics.display()));
    report.detail(format!("generator={}", diag.generator));
    report.detail(diag.summary_line());
    for issue in diag.issues() {
        report.detail(format!("warning: {issue}"));
    }
    if diag.cancelled {
        report.issue("run cancelled; digest is partial");
    }

    let status = run_status(&diag);
    audit::append_event(&paths, "digest", status, &diag.summary_line())?;

    Ok(report)
}
