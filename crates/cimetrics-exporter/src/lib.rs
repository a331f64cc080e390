//! Publishers for [`cimetrics`] registries.
//!
//! Two publication topologies are supported:
//!
//! - **Pull-serve:** [`MetricsExporter`] binds an HTTP server that renders the registry
//!   on each scrape of `GET /metrics`. The registry is shared with the code updating it,
//!   so scrapes are independent from how often values change.
//! - **Push-gateway:** [`PushGateway`] encodes a registry and `PUT`s it to a push gateway under
//!   a fixed [`GroupingKey`], replacing the previously pushed metrics for that key.
//!
//! # Examples
//!
//! ```no_run
//! use cimetrics::{MetricDefinition, Registry};
//! use cimetrics_exporter::MetricsExporter;
//!
//! use std::{net::Ipv4Addr, sync::Arc};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let up = MetricDefinition::gauge("exporter_up", "Whether upstream is reachable.", &[])?;
//! let registry = Arc::new(Registry::new([up])?);
//! // `registry` can be cloned and passed to the code updating metric values.
//!
//! let server = MetricsExporter::new(registry)
//!     .bind((Ipv4Addr::UNSPECIFIED, 9101).into())
//!     .await?;
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    exporter::{MetricsExporter, MetricsServer, METRICS_PATH},
    push::{GroupingKey, GroupingKeyError, PublishError, PushGateway},
};

mod exporter;
mod push;
