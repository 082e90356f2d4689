//! Runtime configuration.
//!
//! Both structs deserialize from any serde format with every field optional,
//! so an empty document yields the defaults.

use serde::Deserialize;

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum compute/effect passes per flush call. `None` keeps flushing
    /// until both queues are empty.
    pub max_passes: Option<u32>,

    /// Emit a `debug` event summarizing every flush.
    pub log_flushes: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_passes: None,
            log_flushes: true,
        }
    }
}

/// Settings for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerConfig,
}
