//! Upstream sources producing one snapshot per poll cycle.

use serde_json::Value;
use thiserror::Error;

use std::{collections::HashMap, future::Future};

use cimetrics::{MetricDefinition, RegistryError, Snapshot};

use crate::{
    extract,
    fetch::{FetchError, Fetcher},
    metrics::{quality_metric, CommitMetrics},
    normalize::{Tally, ValuePolicy},
};

/// Error polling an upstream source. The current cycle is skipped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PollError {
    /// Fetching an upstream document failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The source is missing required configuration (e.g., an API token).
    #[error("source is not configured: {0}")]
    Unconfigured(&'static str),
    /// Produced observations do not match declared metrics.
    #[error("produced observations do not match declared metrics: {0}")]
    Model(#[from] RegistryError),
}

/// Upstream source of facts.
pub trait Source: Send {
    /// Returns definitions of all metrics this source can produce.
    fn definitions(&self) -> Vec<MetricDefinition>;

    /// Fetches upstream documents and converts them to a snapshot.
    fn poll(&mut self) -> impl Future<Output = Result<Snapshot, PollError>> + Send;
}

/// Commit counts from the CI server job tree.
#[derive(Debug)]
pub struct CommitSource {
    fetcher: Fetcher,
    tree_query: String,
    metrics: CommitMetrics,
}

impl CommitSource {
    /// Path of the job tree document.
    pub const PATH: &'static str = "/api/json";
    /// Default number of most recent builds requested per job.
    pub const DEFAULT_BUILD_LIMIT: u32 = 10;

    /// Creates a source requesting `build_limit` most recent builds per job.
    pub fn new(fetcher: Fetcher, build_limit: u32) -> Self {
        let tree_query = format!(
            "jobs[name,builds[number,changeSets[items[author[fullName],msg,timestamp]]]{{0,{build_limit}}}]"
        );
        Self {
            fetcher,
            tree_query,
            metrics: CommitMetrics::new(),
        }
    }

    /// Converts a job tree document to a snapshot of commit counts.
    ///
    /// # Errors
    ///
    /// Returns an error if produced label sets do not match commit metric schemas.
    pub fn snapshot(metrics: &CommitMetrics, doc: &Value) -> Result<Snapshot, RegistryError> {
        let mut totals = Tally::default();
        let mut by_build = Tally::default();
        for record in extract::commit_records(doc) {
            totals.record((record.job, record.author));
            by_build.record((record.job, record.build, record.author));
        }

        let mut snapshot = Snapshot::new();
        for (&(job, author), count) in totals.values() {
            let labels = metrics.total.labels([job, author])?;
            snapshot.set(&metrics.total, labels, count)?;
        }
        for ((job, build, author), count) in by_build.values() {
            let labels = metrics.by_build.labels([*job, build.as_ref(), *author])?;
            snapshot.set(&metrics.by_build, labels, count)?;
        }
        Ok(snapshot)
    }
}

impl Source for CommitSource {
    fn definitions(&self) -> Vec<MetricDefinition> {
        vec![self.metrics.total.clone(), self.metrics.by_build.clone()]
    }

    async fn poll(&mut self) -> Result<Snapshot, PollError> {
        let doc = self
            .fetcher
            .fetch(Self::PATH, &[("tree", self.tree_query.as_str())])
            .await?;
        let snapshot = Self::snapshot(&self.metrics, &doc)?;
        tracing::info!(observations = snapshot.len(), "Collected commit counts");
        Ok(snapshot)
    }
}

#[derive(Debug, Clone)]
struct QualityMetric {
    policy: ValuePolicy,
    definition: MetricDefinition,
}

/// Per-project measures from the code quality server.
#[derive(Debug)]
pub struct QualitySource {
    fetcher: Option<Fetcher>,
    metric_keys: String,
    metrics: HashMap<String, QualityMetric>,
}

impl QualitySource {
    /// Path of the project search document.
    pub const PROJECTS_PATH: &'static str = "/api/projects/search";
    /// Path of the component measures document.
    pub const MEASURES_PATH: &'static str = "/api/measures/component";
    /// Page size used for project search.
    pub const PAGE_SIZE: &'static str = "500";
    /// Metric keys requested by default.
    pub const DEFAULT_METRIC_KEYS: [&'static str; 12] = [
        "bugs",
        "vulnerabilities",
        "code_smells",
        "coverage",
        "duplicated_lines_density",
        "ncloc",
        "sqale_index",
        "sqale_rating",
        "reliability_rating",
        "security_rating",
        "alert_status",
        "security_hotspots",
    ];

    /// Creates a source requesting the specified metric keys. If `fetcher` is `None` (e.g.,
    /// because the API token is not configured), every poll fails with [`PollError::Unconfigured`].
    ///
    /// # Errors
    ///
    /// Returns an error if a metric key does not produce a valid metric name.
    pub fn new<S: AsRef<str>>(
        fetcher: Option<Fetcher>,
        metric_keys: &[S],
    ) -> Result<Self, RegistryError> {
        let metrics = metric_keys
            .iter()
            .map(|key| {
                let key = key.as_ref();
                let metric = QualityMetric {
                    policy: ValuePolicy::for_metric_key(key),
                    definition: quality_metric(key)?,
                };
                Ok::<_, RegistryError>((key.to_owned(), metric))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        let metric_keys = metric_keys
            .iter()
            .map(|key| key.as_ref())
            .collect::<Vec<&str>>()
            .join(",");

        Ok(Self {
            fetcher,
            metric_keys,
            metrics,
        })
    }

    /// Adds measures from a component measures document of `project` to `snapshot`.
    /// Measures for unrequested keys and unparsable values are skipped.
    fn add_measures(
        &self,
        snapshot: &mut Snapshot,
        project: &str,
        doc: &Value,
    ) -> Result<(), RegistryError> {
        for measure in extract::measures(doc) {
            let Some(metric) = self.metrics.get(measure.metric) else {
                tracing::debug!(project, metric = measure.metric, "Skipping unrequested measure");
                continue;
            };
            let Some(value) = metric.policy.normalize(&measure.value) else {
                tracing::debug!(
                    project,
                    metric = measure.metric,
                    value = %measure.value,
                    policy = %metric.policy,
                    "Skipping unparsable measure"
                );
                continue;
            };
            let labels = metric.definition.labels([project])?;
            snapshot.set(&metric.definition, labels, value)?;
        }
        Ok(())
    }
}

impl Source for QualitySource {
    fn definitions(&self) -> Vec<MetricDefinition> {
        let mut definitions: Vec<_> = self
            .metrics
            .values()
            .map(|metric| metric.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name().cmp(b.name()));
        definitions
    }

    async fn poll(&mut self) -> Result<Snapshot, PollError> {
        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or(PollError::Unconfigured("API token is not set"))?;

        let projects_doc = fetcher
            .fetch(Self::PROJECTS_PATH, &[("ps", Self::PAGE_SIZE)])
            .await?;
        let projects: Vec<_> = extract::project_keys(&projects_doc).collect();
        tracing::info!(projects = projects.len(), "Found projects");

        let mut snapshot = Snapshot::new();
        for &project in &projects {
            let query = [("component", project), ("metricKeys", self.metric_keys.as_str())];
            let doc = fetcher.fetch(Self::MEASURES_PATH, &query).await?;
            self.add_measures(&mut snapshot, project, &doc)?;
        }
        Ok(snapshot)
    }
}
