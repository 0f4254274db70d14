//! Dispatch and store configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Process-wide dispatch configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Coalescing delay for stores that don't set their own.
    /// Default: none (deliver immediately).
    #[serde(rename = "default_throttle_ms", with = "opt_millis")]
    pub default_throttle: Option<Duration>,
}

impl DispatchConfig {
    /// Config with a default coalescing delay.
    pub fn with_default_throttle(delay: Duration) -> Self {
        Self {
            default_throttle: Some(delay),
        }
    }

    /// Parse from a JSON document, e.g. `{"default_throttle_ms": 50}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

/// Construction-time options for a store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Overrides `DispatchConfig::default_throttle` for this store.
    /// `Some(Duration::ZERO)` disables throttling even if a default is set.
    #[serde(rename = "throttle_ms", with = "opt_millis")]
    pub throttle: Option<Duration>,

    /// Deliver this store's triggers even while trigger blocks are pushed.
    pub bypass_trigger_blocks: bool,

    /// Name used in logs and instrumentation (defaults to the store id).
    pub label: Option<String>,
}

impl StoreOptions {
    pub fn throttled(delay: Duration) -> Self {
        Self {
            throttle: Some(delay),
            ..Default::default()
        }
    }

    pub fn bypassing_blocks() -> Self {
        Self {
            bypass_trigger_blocks: true,
            ..Default::default()
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// `Option<Duration>` as an optional integer millisecond count.
mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
