use anyhow::Result;
use lexgraph_core::IngestPipeline;
use tokio_util::sync::CancellationToken;

use super::{target_documents, Context};

pub async fn run(ctx: &Context, document: Option<&str>, cancel: CancellationToken) -> Result<()> {
    let store = ctx.open_store().await?;
    let pipeline =
        IngestPipeline::from_config(store.clone(), &ctx.config)?.with_cancellation(cancel.clone());

    let mut resolved = 0;
    let mut unresolved = 0;
    for document in target_documents(&store, document).await? {
        if cancel.is_cancelled() {
            break;
        }
        let report = pipeline.resolve_document(&document).await?;
        println!(
            "{document}: {} resolved, {} unresolved",
            report.references_resolved, report.unresolved_references
        );
        for reference in &report.unresolved {
            println!("  {} -> {} ({})", reference.source, reference.citation, reference.pattern);
        }
        resolved += report.references_resolved;
        unresolved += report.unresolved_references;
    }
    store.close().await;

    eprintln!();
    eprintln!("References: {resolved} resolved, {unresolved} unresolved");
    Ok(())
}
