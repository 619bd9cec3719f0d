use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Global knobs that tune scan execution.
///
/// All fields carry defaults so callers can supply partial configuration
/// payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Heartbeat sampling and throttling for fine-grained progress events.
    pub progress: ProgressConfig,
    /// Traversal defaults.
    pub discovery: DiscoveryConfig,
    /// In-process event bus sizing.
    pub events: EventBusConfig,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.progress.sample_every == 0 {
            return Err(ScanError::Internal(
                "progress.sample_every must be greater than zero".into(),
            ));
        }
        if self.discovery.channel_capacity == 0 {
            return Err(ScanError::Internal(
                "discovery.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(ScanError::Internal(
                "events.channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Two-level gate for `JobProgressChanged`: the publish check only runs every
/// `sample_every` units, and only publishes when `heartbeat_ms` elapsed since
/// the previous publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub sample_every: u64,
    pub heartbeat_ms: u64,
}

impl ProgressConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            sample_every: 1_000,
            heartbeat_ms: 1_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Hidden files and directories are skipped unless this is set or the
    /// scan request overrides it.
    pub include_hidden: bool,
    /// Bound of the channel between the blocking traversal and the async
    /// discovery stage.
    pub channel_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_hidden: false,
            channel_capacity: 1_024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}
