//! Project keys and measures from the code quality server.

use serde_json::Value;

use std::borrow::Cow;

use super::{array, non_empty_str};

/// Raw measure of a single project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measure<'a> {
    /// Metric key, e.g. `bugs` or `sqale_rating`.
    pub metric: &'a str,
    /// Raw textual value as reported upstream.
    pub value: Cow<'a, str>,
}

/// Iterates over project keys in a project search document (`{ "components": [{ "key" }] }`).
pub fn project_keys(doc: &Value) -> impl Iterator<Item = &str> + '_ {
    array(doc, "components").filter_map(|component| non_empty_str(component, "key"))
}

/// Iterates over measures in a component measures document
/// (`{ "component": { "measures": [{ "metric", "value" }] } }`).
///
/// Entries missing the metric key or the value are dropped. Numeric values are converted
/// to their textual form.
pub fn measures(doc: &Value) -> impl Iterator<Item = Measure<'_>> + '_ {
    doc.get("component")
        .into_iter()
        .flat_map(|component| array(component, "measures"))
        .filter_map(|measure| {
            let metric = non_empty_str(measure, "metric")?;
            let value = match measure.get("value")? {
                Value::String(value) => Cow::Borrowed(value.as_str()),
                Value::Number(value) => Cow::Owned(value.to_string()),
                Value::Bool(value) => Cow::Owned(value.to_string()),
                _ => return None,
            };
            Some(Measure { metric, value })
        })
}
