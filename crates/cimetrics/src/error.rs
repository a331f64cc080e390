//! Errors produced when declaring or writing metrics.

use thiserror::Error;

/// Error declaring a metric or recording an observation in a [`Registry`](crate::Registry)
/// or a [`Snapshot`](crate::Snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// A metric or label name does not match `[_a-z][_a-z0-9]*`, or a label name is repeated.
    #[error("invalid name `{name}`: {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Human-readable reason.
        reason: &'static str,
    },
    /// A metric name was re-declared with a different label schema.
    #[error("metric `{name}` is already declared with labels {declared:?}, cannot redeclare it with {requested:?}")]
    LabelSchemaConflict {
        /// Metric name.
        name: String,
        /// Labels of the existing declaration.
        declared: Vec<String>,
        /// Labels of the conflicting declaration.
        requested: Vec<String>,
    },
    /// An observation targets a metric the registry does not know about.
    #[error("metric `{0}` is not declared")]
    UndeclaredMetric(String),
    /// Label names or the number of label values do not match the metric's schema.
    #[error("labels {actual:?} do not match labels {expected:?} of metric `{name}`")]
    LabelMismatch {
        /// Metric name.
        name: String,
        /// Label names declared for the metric.
        expected: Vec<String>,
        /// Label names (or values, if the count is wrong) that were supplied.
        actual: Vec<String>,
    },
}
