use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lexgraph::cli::{self, Cli, Commands, Context};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let ctx = Context::load(args.db, args.config.as_deref())?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing the current batch");
            on_interrupt.cancel();
        }
    });

    dispatch(args.command, &ctx, cancel).await
}

async fn dispatch(command: Commands, ctx: &Context, cancel: CancellationToken) -> Result<()> {
    match command {
        Commands::Ingest {
            files,
            report,
            jobs,
            replace,
            skip_references,
            recorded_extractions,
        } => {
            let options = cli::ingest::IngestOptions {
                report,
                jobs,
                replace,
                skip_references,
                recorded_extractions,
            };
            cli::ingest::run(ctx, &files, options, cancel).await
        }
        Commands::Resolve { document } => cli::resolve::run(ctx, document.as_deref(), cancel).await,
        Commands::Stats { document, json } => cli::stats::run(ctx, document.as_deref(), json).await,
        Commands::Query {
            document,
            label,
            number,
            contains,
            limit,
        } => {
            let args = cli::query::QueryArgs {
                document,
                label,
                number,
                contains,
                limit,
            };
            cli::query::run(ctx, &args).await
        }
        Commands::Verify { document } => cli::verify::run(ctx, document.as_deref()).await,
        Commands::Schema => cli::schema::run(ctx),
    }
}
