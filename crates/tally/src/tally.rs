//! Canonical tally and the normalizer that builds it from backend rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Options every tally carries, even when no votes were cast for them.
pub const OPTIONS: [&str; 2] = ["a", "b"];

/// One `(option, count)` row as returned by a backend.
///
/// Postgres returns lower-case column names, DB2 returns upper-case ones,
/// so both spellings are accepted when decoding JSON rows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawRow {
    #[serde(alias = "VOTE")]
    pub vote: String,
    #[serde(alias = "COUNT", deserialize_with = "count_from_number_or_string")]
    pub count: u64,
}

impl RawRow {
    pub fn new(vote: impl Into<String>, count: u64) -> Self {
        Self {
            vote: vote.into(),
            count,
        }
    }
}

/// Rows in the order the backend returned them.
pub type RawResult = Vec<RawRow>;

/// Vote counts keyed by option identifier.
///
/// Serializes as a flat JSON object with sorted keys, e.g. `{"a":4,"b":2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tally(BTreeMap<String, u64>);

impl Tally {
    /// Count for an option, zero when absent.
    pub fn get(&self, option: &str) -> u64 {
        self.0.get(option).copied().unwrap_or(0)
    }

    pub fn options(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn to_json(&self) -> String {
        // A map of strings to integers cannot fail to serialize
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self(OPTIONS.iter().map(|o| (o.to_string(), 0)).collect())
    }
}

/// Build a tally from raw rows.
///
/// Starts from zero for every known option and overwrites with each row.
/// Identifiers outside [`OPTIONS`] are kept rather than rejected.
pub fn normalize(rows: &[RawRow]) -> Tally {
    let mut tally = Tally::default();
    for row in rows {
        tally.0.insert(row.vote.clone(), row.count);
    }
    tally
}

fn count_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Int(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Int(n) => Ok(n),
        Count::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid count {:?}: {}", s, e))),
    }
}
