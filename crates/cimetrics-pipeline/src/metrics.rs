//! Metrics published by the exporters.

use cimetrics::{MetricDefinition, Registry, RegistryError};

use crate::source::Source;

/// Name of the metric reporting whether the last poll cycle reached the upstream API.
pub const EXPORTER_UP: &str = "exporter_up";
/// Prefix of per-project quality metrics.
pub const QUALITY_PREFIX: &str = "quality_";

/// Returns the definition of `exporter_up`: `1` if the last cycle succeeded, `0` otherwise.
pub fn exporter_up() -> MetricDefinition {
    MetricDefinition::gauge(
        EXPORTER_UP,
        "Whether the last poll cycle reached the upstream API (1) or not (0).",
        &[],
    )
    .expect("`exporter_up` definition is valid")
}

/// Definitions of commit metrics.
#[derive(Debug, Clone)]
pub struct CommitMetrics {
    /// `commits_total{job, author}`: commit count per author across retained build history.
    pub total: MetricDefinition,
    /// `commits_by_build{job, build, author}`: commit count per author per build.
    pub by_build: MetricDefinition,
}

impl Default for CommitMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitMetrics {
    /// Creates commit metric definitions.
    pub fn new() -> Self {
        Self {
            total: MetricDefinition::gauge(
                "commits_total",
                "Commit count per author across retained build history.",
                &["job", "author"],
            )
            .expect("`commits_total` definition is valid"),
            by_build: MetricDefinition::gauge(
                "commits_by_build",
                "Commit count per author per build.",
                &["job", "build", "author"],
            )
            .expect("`commits_by_build` definition is valid"),
        }
    }
}

/// Defines `quality_<key>{project}` for an upstream metric key.
///
/// # Errors
///
/// Returns an error if `key` does not produce a valid metric name (e.g., contains a `-`).
pub fn quality_metric(key: &str) -> Result<MetricDefinition, RegistryError> {
    MetricDefinition::gauge(
        &format!("{QUALITY_PREFIX}{key}"),
        &format!("Code quality metric: {key}"),
        &["project"],
    )
}

/// Creates a registry declaring `exporter_up` and all metrics produced by `source`.
///
/// # Errors
///
/// Returns an error if source definitions conflict with each other or with `exporter_up`.
pub fn registry_for<S: Source>(source: &S) -> Result<Registry, RegistryError> {
    let mut registry = Registry::empty();
    registry.declare(exporter_up())?;
    for definition in source.definitions() {
        registry.declare(definition)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn metric_surface() {
        let up = exporter_up();
        assert_eq!(up.name(), "exporter_up");
        assert!(up.label_names().is_empty());

        let commits = CommitMetrics::new();
        assert_eq!(commits.total.name(), "commits_total");
        assert_eq!(commits.total.label_names(), ["job", "author"]);
        assert_eq!(commits.by_build.name(), "commits_by_build");
        assert_eq!(commits.by_build.label_names(), ["job", "build", "author"]);

        let bugs = quality_metric("bugs").unwrap();
        assert_eq!(bugs.name(), "quality_bugs");
        assert_eq!(bugs.label_names(), ["project"]);
    }

    #[test]
    fn invalid_quality_metric_key() {
        let err = quality_metric("new-bugs").unwrap_err();
        assert_matches!(err, RegistryError::InvalidName { .. });
    }
}
