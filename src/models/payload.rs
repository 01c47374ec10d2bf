use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw JSON payload as returned by the Riot API.
///
/// Cloning is cheap and never copies the underlying document. There is no
/// mutable access: payloads are read and cached, never edited.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload(Arc<Value>);

impl RawPayload {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// Decode a response body
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body).map(Self::new)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Look up a dot-separated path such as `info.participants`.
    /// Numeric segments index into arrays.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get_path(path).and_then(Value::as_str)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(&*self.0)
    }
}

impl From<Value> for RawPayload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

/// Resolve a dot-separated path against any JSON value
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// A stored payload together with its cache identity
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub request_key: String,
    pub payload: RawPayload,
    pub fetched_at: DateTime<Utc>,
}

/// Match detail payload plus the context the collector gathered for it
#[derive(Debug, Clone)]
pub struct CollectedMatch {
    pub match_id: String,
    pub payload: RawPayload,
    /// Competitive tier or league the subject belonged to when collected
    pub league: Option<String>,
}

/// Stage of the pipeline at which an item was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    MatchList,
    MatchDetail,
    League,
    Normalize,
    /// Participant already counted from another collection
    Duplicate,
    Cancelled,
}

/// One entry in a failure manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedItem {
    /// Match id, puuid or other identifier of the skipped item
    pub item: String,
    pub stage: SkipStage,
    pub reason: String,
}

impl SkippedItem {
    pub fn new(item: impl Into<String>, stage: SkipStage, reason: impl ToString) -> Self {
        Self {
            item: item.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}
