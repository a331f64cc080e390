//! Metric definitions and label sets.

use prometheus_client::metrics::MetricType;

use std::fmt;

use crate::{
    error::RegistryError,
    validation::{check_label_names, check_metric_name},
};

/// Kind of a declared metric.
///
/// Upstream facts (including cumulative counts computed by an exporter) are reported as gauges:
/// their values are set directly each poll cycle rather than incremented by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum MetricKind {
    /// Value set directly each cycle.
    Gauge,
}

impl MetricKind {
    pub(crate) fn metric_type(self) -> MetricType {
        match self {
            Self::Gauge => MetricType::Gauge,
        }
    }
}

/// Definition of a single metric: name, help and label schema.
///
/// Definitions are validated on creation and are immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricDefinition {
    name: String,
    help: String,
    label_names: Vec<String>,
    kind: MetricKind,
}

impl MetricDefinition {
    /// Defines a gauge with the specified label schema. Label order is significant;
    /// it determines the order of labels in label sets and in the exposition output.
    ///
    /// # Errors
    ///
    /// Returns an error if the metric name or any of the label names is invalid, or if label names repeat.
    pub fn gauge(
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: &[&str],
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        check_metric_name(&name)?;
        check_label_names(label_names)?;
        Ok(Self {
            name,
            help: help.into(),
            label_names: label_names.iter().map(|&name| name.to_owned()).collect(),
            kind: MetricKind::Gauge,
        })
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the help text reported alongside the metric.
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Returns label names in the declared order.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Returns the metric kind.
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Creates a label set for this metric from label values listed in the declared label order.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of values differs from the number of declared labels.
    pub fn labels<I>(&self, values: I) -> Result<LabelSet, RegistryError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.len() != self.label_names.len() {
            return Err(RegistryError::LabelMismatch {
                name: self.name.clone(),
                expected: self.label_names.clone(),
                actual: values,
            });
        }
        let pairs = self.label_names.iter().cloned().zip(values).collect();
        Ok(LabelSet { pairs })
    }

    pub(crate) fn check_labels(&self, labels: &LabelSet) -> Result<(), RegistryError> {
        if labels.names().eq(self.label_names.iter().map(String::as_str)) {
            Ok(())
        } else {
            Err(RegistryError::LabelMismatch {
                name: self.name.clone(),
                expected: self.label_names.clone(),
                actual: labels.names().map(str::to_owned).collect(),
            })
        }
    }
}

/// Set of label name / value pairs identifying a single observation of a metric.
///
/// Label sets are created via [`MetricDefinition::labels()`], so pairs are always ordered
/// according to the metric schema. Two label sets for the same metric are equal iff all label
/// values match.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelSet {
    pairs: Vec<(String, String)>,
}

impl LabelSet {
    /// Label set for metrics without labels.
    pub const fn empty() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Returns the value of the specified label, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find_map(|(label, value)| (label == name).then_some(value.as_str()))
    }

    /// Iterates over label names.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.pairs.iter().map(|(name, _)| name.as_str())
    }

    /// Checks whether this set has no labels.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub(crate) fn pairs(&self) -> &Vec<(String, String)> {
        &self.pairs
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("{")?;
        for (i, (name, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                formatter.write_str(",")?;
            }
            write!(formatter, "{name}={value:?}")?;
        }
        formatter.write_str("}")
    }
}
