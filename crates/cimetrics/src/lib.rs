//! Metric model for exporters that poll an upstream API and republish its facts as metrics,
//! based on the `prometheus-client` crate.
//!
//! # Overview
//!
//! - A [`MetricDefinition`] declares a gauge: its name, help text and an ordered label schema.
//!   Definitions are validated on creation (names must match `[_a-z][_a-z0-9]*`).
//! - A [`LabelSet`] identifies a single observation of a metric; it is created from label values
//!   via [`MetricDefinition::labels()`].
//! - A [`Snapshot`] collects all observations produced by one poll cycle.
//! - A [`Registry`] holds declared metrics and their current values. It can be shared between
//!   a writer [applying](Registry::apply()) snapshots and readers [encoding](Registry::encode())
//!   it in one of the supported text [`Format`]s.
//!
//! # Examples
//!
//! ```
//! use cimetrics::{ApplyMode, Format, LabelSet, MetricDefinition, Registry, Snapshot};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let commits = MetricDefinition::gauge(
//!     "commits_total",
//!     "Commit count per author across retained build history.",
//!     &["job", "author"],
//! )?;
//! let up = MetricDefinition::gauge("exporter_up", "Whether upstream is reachable.", &[])?;
//! let registry = Registry::new([commits.clone(), up.clone()])?;
//!
//! // One poll cycle produces a snapshot...
//! let mut snapshot = Snapshot::new();
//! snapshot.set(&commits, commits.labels(["backend", "Alice"])?, 3.0)?;
//! snapshot.set(&up, LabelSet::empty(), 1.0)?;
//! // ...which is then written to the registry.
//! registry.apply(&snapshot, ApplyMode::Merge)?;
//!
//! let mut buffer = String::new();
//! registry.encode(&mut buffer, Format::Prometheus)?;
//! assert!(buffer.contains(r#"commits_total{job="backend",author="Alice"} 3"#));
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod descriptors;
mod error;
mod format;
mod registry;
mod snapshot;
mod validation;

pub use crate::{
    descriptors::{LabelSet, MetricDefinition, MetricKind},
    error::RegistryError,
    format::Format,
    registry::{ApplyMode, Registry},
    snapshot::{Observation, Snapshot},
    validation::{check_label_names, check_metric_name},
};
