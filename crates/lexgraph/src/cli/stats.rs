use anyhow::Result;
use lexgraph_core::GraphStore;

use super::Context;

pub async fn run(ctx: &Context, document: Option<&str>, json: bool) -> Result<()> {
    let store = ctx.open_store().await?;
    let stats = store.stats(document).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{stats}");
    }
    Ok(())
}
