//! Conversion of raw upstream values to numbers.

use std::{collections::BTreeMap, fmt};

/// Value emitted for enumerated values that are not recognized.
pub const UNRECOGNIZED: f64 = 0.0;

/// Metric key that reports the quality gate status.
const GATE_STATUS_KEY: &str = "alert_status";
/// Suffix of metric keys reporting letter ratings (encoded as `1.0`..`5.0` upstream).
const RATING_SUFFIX: &str = "_rating";

const RATINGS: [(&str, f64); 5] = [
    ("1.0", 1.0),
    ("2.0", 2.0),
    ("3.0", 3.0),
    ("4.0", 4.0),
    ("5.0", 5.0),
];

const GATE_STATUSES: [(&str, f64); 3] = [("OK", 1.0), ("WARN", 2.0), ("ERROR", 3.0)];

/// Policy converting a raw textual value to a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValuePolicy {
    /// Parses the value as a decimal number. Unparsable values are skipped.
    Direct,
    /// Maps letter ratings `1.0`..`5.0` (A..E) to `1`..`5`. Other values are parsed as numbers;
    /// if that fails, [`UNRECOGNIZED`] is emitted.
    Rating,
    /// Maps quality gate statuses `OK`, `WARN` and `ERROR` to `1`, `2` and `3`. Other values
    /// map to [`UNRECOGNIZED`].
    GateStatus,
}

impl fmt::Display for ValuePolicy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Direct => "direct",
            Self::Rating => "rating",
            Self::GateStatus => "gate status",
        })
    }
}

impl ValuePolicy {
    /// Selects the policy for an upstream metric key.
    pub fn for_metric_key(key: &str) -> Self {
        if key == GATE_STATUS_KEY {
            Self::GateStatus
        } else if key.ends_with(RATING_SUFFIX) {
            Self::Rating
        } else {
            Self::Direct
        }
    }

    /// Converts a raw value. Returns `None` if the value should be skipped.
    pub fn normalize(self, raw: &str) -> Option<f64> {
        let raw = raw.trim();
        match self {
            Self::Direct => parse_number(raw),
            Self::Rating => Some(
                lookup(&RATINGS, raw)
                    .or_else(|| parse_number(raw))
                    .unwrap_or(UNRECOGNIZED),
            ),
            Self::GateStatus => Some(lookup(&GATE_STATUSES, raw).unwrap_or(UNRECOGNIZED)),
        }
    }
}

fn lookup(table: &[(&str, f64)], raw: &str) -> Option<f64> {
    table
        .iter()
        .find_map(|&(key, value)| (key == raw).then_some(value))
}

/// Non-finite values (`NaN`, `inf`) are treated as unparsable.
fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Counter of occurrences keyed by label tuples.
#[derive(Debug, Clone)]
pub struct Tally<K> {
    counts: BTreeMap<K, u32>,
}

impl<K: Ord> Default for Tally<K> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }
}

impl<K: Ord> Tally<K> {
    /// Records a single occurrence of `key`.
    pub fn record(&mut self, key: K) {
        let count = self.counts.entry(key).or_default();
        *count = count.saturating_add(1);
    }

    /// Returns the number of occurrences recorded for `key`.
    pub fn count(&self, key: &K) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Iterates over keys and their counts as metric values.
    pub fn values(&self) -> impl Iterator<Item = (&K, f64)> + '_ {
        self.counts
            .iter()
            .map(|(key, &count)| (key, f64::from(count)))
    }
}

impl<K: Ord> Extend<K> for Tally<K> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.record(key);
        }
    }
}
