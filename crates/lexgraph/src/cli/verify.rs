use anyhow::{bail, Result};
use lexgraph_core::{verify_nesting, GraphStore, NodeQuery};

use super::{target_documents, Context};

pub async fn run(ctx: &Context, document: Option<&str>) -> Result<()> {
    let store = ctx.open_store().await?;

    let mut failed = Vec::new();
    let documents = target_documents(&store, document).await?;
    for document in &documents {
        let nodes: Vec<_> = store
            .query(&NodeQuery::new().document(document))
            .await?
            .into_iter()
            .map(|record| record.node)
            .collect();
        let edges = store.edges(Some(document)).await?;
        let report = verify_nesting(&nodes, &edges);
        print!("{document}: {report}");
        if !report.is_ok() {
            failed.push(document.as_str());
        }
    }
    store.close().await;

    eprintln!();
    eprintln!(
        "Verified: {} ok, {} with violations",
        documents.len() - failed.len(),
        failed.len()
    );
    if !failed.is_empty() {
        bail!("nesting check failed: {}", failed.join(", "));
    }
    Ok(())
}
