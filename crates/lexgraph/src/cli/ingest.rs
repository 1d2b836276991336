use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use lexgraph_core::ingest::RecordedExtractor;
use lexgraph_core::{IngestPipeline, RunReport};
use tokio_util::sync::CancellationToken;

use super::Context;

pub struct IngestOptions {
    pub report: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub replace: bool,
    pub skip_references: bool,
    pub recorded_extractions: Option<PathBuf>,
}

pub async fn run(
    ctx: &Context,
    files: &[PathBuf],
    options: IngestOptions,
    cancel: CancellationToken,
) -> Result<()> {
    let store = ctx.open_store().await?;
    let mut pipeline = IngestPipeline::from_config(store.clone(), &ctx.config)?
        .with_cancellation(cancel)
        .with_replace(options.replace)
        .with_references(!options.skip_references);
    if let Some(jobs) = options.jobs {
        pipeline = pipeline.with_document_concurrency(jobs);
    }
    if let Some(path) = &options.recorded_extractions {
        let extractor = RecordedExtractor::load(path)
            .with_context(|| format!("cannot load recorded extractions from {}", path.display()))?;
        pipeline = pipeline.with_extractor(Arc::new(extractor));
    }

    let reports = pipeline.ingest_paths(files).await;
    store.close().await;

    for report in &reports {
        eprint!("{report}");
    }
    if let Some(path) = &options.report {
        write_reports(path, &reports)?;
    }

    let aborted: Vec<&str> = reports
        .iter()
        .filter(|r| r.is_aborted())
        .map(|r| r.document_id.as_str())
        .collect();
    eprintln!();
    eprintln!(
        "Ingested: {} documents, {} aborted",
        reports.len() - aborted.len(),
        aborted.len()
    );
    if !aborted.is_empty() {
        bail!("aborted: {}", aborted.join(", "));
    }
    Ok(())
}

fn write_reports(path: &Path, reports: &[RunReport]) -> Result<()> {
    let json = serde_json::to_string_pretty(reports)?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote run report");
    Ok(())
}
