//! Serves per-project code quality metrics for scraping.

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::watch;

use std::sync::Arc;

use cimetrics_exporter::MetricsExporter;
use cimetrics_pipeline::{
    config::QualityExporterArgs, metrics, PullPublisher, QualitySource, Scheduler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = QualityExporterArgs::parse();
    cimetrics_pipeline::init_logging();

    let fetcher = args.fetcher().context("failed initializing HTTP client")?;
    if fetcher.is_none() {
        tracing::warn!("SONARQUBE_TOKEN is not set; serving `exporter_up 0` without polling");
    }
    let source = QualitySource::new(fetcher, args.metric_keys.as_slice()).context("invalid metric keys")?;
    let registry = Arc::new(metrics::registry_for(&source).context("failed declaring metrics")?);

    let (stop_sender, stop_receiver) = watch::channel(false);
    let mut server_stop = stop_receiver.clone();
    let server = MetricsExporter::new(Arc::clone(&registry))
        .with_graceful_shutdown(async move {
            server_stop.changed().await.ok();
        })
        .bind(args.bind_address())
        .await
        .with_context(|| format!("failed binding metrics server to {}", args.bind_address()))?;
    tracing::info!(
        sonarqube_url = %args.sonarqube_url,
        local_addr = %server.local_addr(),
        interval = ?args.poll.interval(),
        apply_mode = ?args.apply_mode(),
        "Starting code quality exporter"
    );
    let server_task = tokio::spawn(server.start());

    let publisher = PullPublisher::new(registry, args.apply_mode());
    let mut scheduler_stop = stop_receiver;
    let scheduler = Scheduler::new(source, publisher, args.poll.interval());
    let scheduler_task = tokio::spawn(scheduler.run(async move {
        scheduler_stop.changed().await.ok();
    }));

    tokio::signal::ctrl_c()
        .await
        .context("failed listening to Ctrl+C")?;
    stop_sender.send_replace(true);

    scheduler_task.await.context("poll loop panicked")?;
    server_task
        .await
        .context("metrics server panicked")?
        .context("metrics server failed")?;
    Ok(())
}
