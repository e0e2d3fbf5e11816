//! Runner configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration consumed by the pipeline runner and the task types it
/// hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// How often the run reaper wakes to prune old persisted runs.
    #[serde(with = "serde_duration")]
    pub reaper_interval: Duration,

    /// Persisted runs older than this are deleted by the reaper.
    #[serde(with = "serde_duration")]
    pub reaper_threshold: Duration,

    /// Fallback timeout for HTTP-style tasks that declare none of their
    /// own.
    #[serde(with = "serde_duration")]
    pub default_http_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            reaper_interval: Duration::from_secs(60 * 60),
            reaper_threshold: Duration::from_secs(7 * 24 * 60 * 60),
            default_http_timeout: Duration::from_secs(15),
        }
    }
}

/// Serde helper storing durations as integer milliseconds.
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
