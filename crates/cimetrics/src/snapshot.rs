//! Snapshots of observations produced by a single poll cycle.

use std::collections::{btree_map, BTreeMap};

use crate::{
    descriptors::{LabelSet, MetricDefinition},
    error::RegistryError,
};

/// Single observation of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation<'a> {
    /// Metric name.
    pub metric: &'a str,
    /// Labels identifying the observation.
    pub labels: &'a LabelSet,
    /// Observed value.
    pub value: f64,
}

/// Full set of observations produced by one poll cycle.
///
/// A snapshot holds at most one value per (metric, label set) pair; later writes overwrite
/// earlier ones. Iteration order is deterministic (by metric name, then by label values).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    metrics: BTreeMap<String, BTreeMap<LabelSet, f64>>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value, overwriting the previous value for the same labels if any.
    ///
    /// # Errors
    ///
    /// Returns an error if `labels` were not created for `definition`.
    pub fn set(
        &mut self,
        definition: &MetricDefinition,
        labels: LabelSet,
        value: f64,
    ) -> Result<(), RegistryError> {
        definition.check_labels(&labels)?;
        self.metrics
            .entry(definition.name().to_owned())
            .or_default()
            .insert(labels, value);
        Ok(())
    }

    /// Returns the recorded value for the metric with the specified labels.
    pub fn get(&self, metric: &str, labels: &LabelSet) -> Option<f64> {
        self.metrics.get(metric)?.get(labels).copied()
    }

    /// Iterates over values recorded for a single metric.
    pub fn metric(&self, metric: &str) -> impl Iterator<Item = (&LabelSet, f64)> + '_ {
        self.metrics
            .get(metric)
            .into_iter()
            .flat_map(|values| values.iter().map(|(labels, &value)| (labels, value)))
    }

    /// Iterates over all observations in this snapshot.
    pub fn observations(&self) -> impl Iterator<Item = Observation<'_>> + '_ {
        self.metrics.iter().flat_map(|(metric, values)| {
            values.iter().map(move |(labels, &value)| Observation {
                metric,
                labels,
                value,
            })
        })
    }

    /// Returns the total number of observations.
    pub fn len(&self) -> usize {
        self.metrics.values().map(BTreeMap::len).sum()
    }

    /// Checks whether this snapshot has no observations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn metric_names(&self) -> btree_map::Keys<'_, String, BTreeMap<LabelSet, f64>> {
        self.metrics.keys()
    }

    pub(crate) fn values(&self, metric: &str) -> Option<&BTreeMap<LabelSet, f64>> {
        self.metrics.get(metric)
    }

    pub(crate) fn insert_values(&mut self, metric: &str, values: BTreeMap<LabelSet, f64>) {
        if !values.is_empty() {
            self.metrics.insert(metric.to_owned(), values);
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn recording_observations() {
        let commits = MetricDefinition::gauge("commits_total", "", &["job", "author"]).unwrap();
        let up = MetricDefinition::gauge("exporter_up", "", &[]).unwrap();

        let mut snapshot = Snapshot::new();
        assert!(snapshot.is_empty());
        let alice = commits.labels(["api", "Alice"]).unwrap();
        snapshot.set(&commits, alice.clone(), 1.0).unwrap();
        snapshot.set(&commits, alice.clone(), 3.0).unwrap();
        snapshot
            .set(&commits, commits.labels(["api", "Bob"]).unwrap(), 2.0)
            .unwrap();
        snapshot.set(&up, LabelSet::empty(), 1.0).unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.get("commits_total", &alice), Some(3.0));
        assert_eq!(snapshot.get("exporter_up", &LabelSet::empty()), Some(1.0));
        assert_eq!(snapshot.get("commits_by_build", &alice), None);

        let metrics: Vec<_> = snapshot.observations().map(|obs| obs.metric).collect();
        assert_eq!(metrics, ["commits_total", "commits_total", "exporter_up"]);
        let authors: Vec<_> = snapshot
            .metric("commits_total")
            .map(|(labels, _)| labels.get("author").unwrap())
            .collect();
        assert_eq!(authors, ["Alice", "Bob"]);
    }

    #[test]
    fn labels_from_other_metric_are_rejected() {
        let commits = MetricDefinition::gauge("commits_total", "", &["job", "author"]).unwrap();
        let by_build =
            MetricDefinition::gauge("commits_by_build", "", &["job", "build", "author"]).unwrap();

        let mut snapshot = Snapshot::new();
        let labels = commits.labels(["api", "Alice"]).unwrap();
        snapshot.set(&by_build, labels, 1.0).unwrap_err();
        assert!(snapshot.is_empty());
    }
}
