//! Publishing snapshots for the two delivery topologies.

use thiserror::Error;

use std::{future::Future, sync::Arc};

use cimetrics::{ApplyMode, LabelSet, Registry, RegistryError, Snapshot};
use cimetrics_exporter::{PublishError, PushGateway};

use crate::metrics::exporter_up;

/// Error publishing a snapshot.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PublishFailure {
    /// Pushing to the gateway failed. The snapshot is lost.
    #[error(transparent)]
    Gateway(#[from] PublishError),
    /// The snapshot does not match declared metrics; nothing was published.
    #[error("snapshot does not match declared metrics: {0}")]
    Model(#[from] RegistryError),
}

/// Destination of snapshots produced by poll cycles.
pub trait Publisher: Send {
    /// Publishes a snapshot of a successful poll cycle.
    fn publish(
        &mut self,
        snapshot: &Snapshot,
    ) -> impl Future<Output = Result<(), PublishFailure>> + Send;

    /// Records that the current poll cycle failed to reach the upstream API.
    ///
    /// # Errors
    ///
    /// Returns an error if the failure cannot be recorded.
    fn mark_unavailable(&mut self) -> impl Future<Output = Result<(), PublishFailure>> + Send;
}

/// Pull topology: snapshots are applied to a registry shared with a [`MetricsExporter`].
///
/// [`MetricsExporter`]: cimetrics_exporter::MetricsExporter
#[derive(Debug)]
pub struct PullPublisher {
    registry: Arc<Registry>,
    mode: ApplyMode,
}

impl PullPublisher {
    /// Creates a publisher for the shared `registry`, which must declare `exporter_up`.
    pub fn new(registry: Arc<Registry>, mode: ApplyMode) -> Self {
        Self { registry, mode }
    }

    /// Returns the shared registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl Publisher for PullPublisher {
    async fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishFailure> {
        self.registry.apply(snapshot, self.mode)?;
        Ok(())
    }

    async fn mark_unavailable(&mut self) -> Result<(), PublishFailure> {
        // Other values are retained, so scrapes keep seeing the last known facts.
        self.registry.set(&exporter_up(), LabelSet::empty(), 0.0)?;
        Ok(())
    }
}

/// Push topology: each snapshot is written to a fresh registry and pushed to a gateway,
/// replacing everything pushed previously under the same grouping key.
///
/// By default, failed cycles push nothing, so the gateway keeps the last pushed snapshot
/// including `exporter_up 1`. With [`Self::reporting_down_status()`], a failed cycle updates
/// only `exporter_up` to 0.
#[derive(Debug)]
pub struct PushPublisher {
    gateway: PushGateway,
    template: Registry,
    report_down_status: bool,
}

impl PushPublisher {
    /// Creates a publisher. Metric declarations are taken from `template`; its values are ignored.
    pub fn new(gateway: PushGateway, template: &Registry) -> Self {
        Self {
            gateway,
            template: template.fresh(),
            report_down_status: false,
        }
    }

    /// Sets whether failed cycles update `exporter_up` at the gateway to 0. Other pushed metrics
    /// are retained.
    #[must_use]
    pub fn reporting_down_status(mut self, report: bool) -> Self {
        self.report_down_status = report;
        self
    }
}

impl Publisher for PushPublisher {
    async fn publish(&mut self, snapshot: &Snapshot) -> Result<(), PublishFailure> {
        let registry = self.template.fresh();
        registry.apply(snapshot, ApplyMode::Replace)?;
        self.gateway.push(&registry).await?;
        tracing::info!(
            observations = snapshot.len(),
            endpoint = %self.gateway.endpoint(),
            "Pushed metrics to push gateway"
        );
        Ok(())
    }

    async fn mark_unavailable(&mut self) -> Result<(), PublishFailure> {
        if !self.report_down_status {
            return Ok(());
        }
        let up = exporter_up();
        let registry = Registry::new([up.clone()])?;
        registry.set(&up, LabelSet::empty(), 0.0)?;
        self.gateway.update(&registry).await?;
        tracing::info!(
            endpoint = %self.gateway.endpoint(),
            "Reported unavailable upstream to push gateway"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::metrics::{quality_metric, EXPORTER_UP};

    fn registry() -> Arc<Registry> {
        let registry = Registry::new([exporter_up(), quality_metric("bugs").unwrap()]).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn pull_publisher_retains_values_when_unavailable() {
        let registry = registry();
        let bugs = quality_metric("bugs").unwrap();
        let labels = bugs.labels(["api"]).unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.set(&bugs, labels.clone(), 5.0).unwrap();
        snapshot.set(&exporter_up(), LabelSet::empty(), 1.0).unwrap();

        let mut publisher = PullPublisher::new(Arc::clone(&registry), ApplyMode::Merge);
        publisher.publish(&snapshot).await.unwrap();
        assert_eq!(registry.get(EXPORTER_UP, &LabelSet::empty()), Some(1.0));

        publisher.mark_unavailable().await.unwrap();
        assert_eq!(registry.get(EXPORTER_UP, &LabelSet::empty()), Some(0.0));
        assert_eq!(registry.get("quality_bugs", &labels), Some(5.0));
    }

    #[tokio::test]
    async fn pull_publisher_rejects_undeclared_metrics() {
        let registry = registry();
        let coverage = quality_metric("coverage").unwrap();
        let mut snapshot = Snapshot::new();
        snapshot.set(&exporter_up(), LabelSet::empty(), 1.0).unwrap();
        snapshot
            .set(&coverage, coverage.labels(["api"]).unwrap(), 80.0)
            .unwrap();

        let mut publisher = PullPublisher::new(Arc::clone(&registry), ApplyMode::Merge);
        let err = publisher.publish(&snapshot).await.unwrap_err();
        assert_matches!(err, PublishFailure::Model(RegistryError::UndeclaredMetric(_)));
        assert_eq!(registry.get(EXPORTER_UP, &LabelSet::empty()), None);
    }
}
