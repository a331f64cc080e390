//! Extraction of flat records from upstream JSON documents.
//!
//! Extractors are pure and lazy: they borrow the fetched document and yield records without
//! converting values to numbers. Malformed entries are skipped; missing optional fields are
//! replaced with [`PLACEHOLDER`].

use serde_json::Value;

pub use self::{
    jenkins::{commit_records, CommitRecord},
    sonar::{measures, project_keys, Measure},
};

mod jenkins;
mod sonar;

/// Label value used when an optional field is missing upstream.
pub const PLACEHOLDER: &str = "unknown";

/// Iterates over elements of the array stored under `key`. Yields nothing if the field is absent
/// or is not an array.
fn array<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> + 'a {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
