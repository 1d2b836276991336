use anyhow::Result;
use lexgraph_core::storage::NodeRecord;
use lexgraph_core::{GraphStore, NodeQuery};

use super::Context;

pub struct QueryArgs {
    pub document: Option<String>,
    pub label: Option<String>,
    pub number: Option<String>,
    pub contains: Option<String>,
    pub limit: Option<u32>,
}

impl QueryArgs {
    fn to_query(&self) -> NodeQuery {
        let mut query = NodeQuery::new();
        if let Some(document) = &self.document {
            query = query.document(document);
        }
        if let Some(label) = &self.label {
            query = query.label(label);
        }
        if let Some(number) = &self.number {
            query = query.number(number);
        }
        if let Some(needle) = &self.contains {
            query = query.contains(needle);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        query
    }
}

pub async fn run(ctx: &Context, args: &QueryArgs) -> Result<()> {
    let store = ctx.open_store().await?;
    let records = store.query(&args.to_query()).await?;
    store.close().await;

    for record in &records {
        println!("{}", format_record(record));
    }
    eprintln!("{} nodes", records.len());
    Ok(())
}

fn format_record(record: &NodeRecord) -> String {
    let node = &record.node;
    let mut line = format!("{}\t{}\t{}", record.document_id, node.id, node.label());
    if let Some(number) = &node.number {
        line.push('\t');
        line.push_str(number);
    }
    if let Some(title) = &node.title {
        line.push('\t');
        line.push_str(title);
    }
    line
}
