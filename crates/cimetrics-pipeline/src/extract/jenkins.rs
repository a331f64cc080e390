//! Commit records from the CI server job tree.

use serde_json::Value;

use std::borrow::Cow;

use super::{array, non_empty_str, PLACEHOLDER};

/// Single commit attributed to a build of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord<'a> {
    /// Job name.
    pub job: &'a str,
    /// Build number as a string, or [`PLACEHOLDER`] if absent.
    pub build: Cow<'a, str>,
    /// Author full name, or [`PLACEHOLDER`] if absent.
    pub author: &'a str,
}

/// Iterates over commits in a job tree document of the form
/// `{ "jobs": [{ "name", "builds": [{ "number", "changeSets": [{ "items": [{ "author": { "fullName" } }] }] }] }] }`.
///
/// Jobs without a name are dropped together with all their commits. Missing lists are treated as empty.
pub fn commit_records(doc: &Value) -> impl Iterator<Item = CommitRecord<'_>> + '_ {
    array(doc, "jobs").flat_map(|job| {
        let name = non_empty_str(job, "name");
        if name.is_none() {
            tracing::debug!("Skipping job without a name");
        }
        name.into_iter().flat_map(move |name| job_commits(name, job))
    })
}

fn job_commits<'a>(job_name: &'a str, job: &'a Value) -> impl Iterator<Item = CommitRecord<'a>> + 'a {
    array(job, "builds").flat_map(move |build| {
        let number = build_number(build);
        array(build, "changeSets")
            .flat_map(|change_set| array(change_set, "items"))
            .map(move |item| CommitRecord {
                job: job_name,
                build: number.clone(),
                author: item
                    .get("author")
                    .and_then(|author| non_empty_str(author, "fullName"))
                    .unwrap_or(PLACEHOLDER),
            })
    })
}

fn build_number(build: &Value) -> Cow<'_, str> {
    match build.get("number") {
        Some(Value::Number(number)) => Cow::Owned(number.to_string()),
        Some(Value::String(number)) if !number.is_empty() => Cow::Borrowed(number),
        _ => Cow::Borrowed(PLACEHOLDER),
    }
}
