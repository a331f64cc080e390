//! Pushes commit counts from a CI server to a push gateway.

use anyhow::Context as _;
use clap::Parser;

use cimetrics_pipeline::{config::CommitExporterArgs, metrics, PushPublisher, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CommitExporterArgs::parse();
    cimetrics_pipeline::init_logging();

    let source = args.source().context("failed initializing HTTP client")?;
    let registry = metrics::registry_for(&source).context("failed declaring metrics")?;
    let gateway = args.gateway().context("invalid push gateway configuration")?;
    tracing::info!(
        jenkins_url = %args.jenkins_url,
        endpoint = %gateway.endpoint(),
        interval = ?args.poll.interval(),
        "Starting commit exporter"
    );

    let publisher =
        PushPublisher::new(gateway, &registry).reporting_down_status(args.push_down_status);
    Scheduler::new(source, publisher, args.poll.interval())
        .run(async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("Failed listening to Ctrl+C; the exporter must be killed to stop");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
