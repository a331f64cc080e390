//! Poll → normalize → publish pipeline for exporters republishing facts from CI and code quality
//! servers as metrics.
//!
//! # Overview
//!
//! Each poll cycle run by the [`Scheduler`]:
//!
//! 1. [fetches](fetch::Fetcher) JSON documents from the upstream API,
//! 2. [extracts](extract) flat records from them,
//! 3. [normalizes](normalize) raw values into numbers and aggregates counts,
//! 4. hands the resulting [`Snapshot`](cimetrics::Snapshot) to a [`Publisher`].
//!
//! Two publishing topologies are supported:
//!
//! - [`PullPublisher`] applies snapshots to a registry served by
//!   [`MetricsExporter`](cimetrics_exporter::MetricsExporter).
//! - [`PushPublisher`] pushes each snapshot to a push gateway.
//!
//! A failed cycle never stops the loop. In the pull topology, it is reported via the `exporter_up`
//! gauge while previously published values are retained.
//!
//! # Examples
//!
//! ```no_run
//! use cimetrics::ApplyMode;
//! use cimetrics_pipeline::{
//!     fetch::{Credentials, Fetcher},
//!     metrics, PullPublisher, QualitySource, Scheduler,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let credentials = Credentials::Basic {
//!     username: "squ_token".to_owned(),
//!     password: None,
//! };
//! let fetcher = Fetcher::new(
//!     "http://sonarqube:9000".parse()?,
//!     Some(credentials),
//!     Duration::from_secs(30),
//! )?;
//! let source = QualitySource::new(Some(fetcher), &["bugs", "alert_status"])?;
//! let registry = Arc::new(metrics::registry_for(&source)?);
//! let publisher = PullPublisher::new(Arc::clone(&registry), ApplyMode::Merge);
//! // `registry` can now be served with `cimetrics_exporter::MetricsExporter`.
//! Scheduler::new(source, publisher, Duration::from_secs(60))
//!     .run(async { tokio::signal::ctrl_c().await.ok(); })
//!     .await;
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod config;
pub mod extract;
pub mod fetch;
pub mod metrics;
pub mod normalize;
mod publish;
mod scheduler;
mod source;

pub use crate::{
    publish::{PublishFailure, Publisher, PullPublisher, PushPublisher},
    scheduler::{CycleOutcome, Scheduler, SchedulerState},
    source::{CommitSource, PollError, QualitySource, Source},
};

/// Initializes logging for exporter binaries. The filter is read from `RUST_LOG`
/// and defaults to `info`.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
