//! Airing scheduler configuration.

use serde::Deserialize;
use std::time::Duration;

/// Tunables for the airing poll loop. Defaults match the production cadence;
/// tests shrink them to keep time control cheap.
#[derive(Debug, Clone, Deserialize)]
pub struct AiringConfig {
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delay before the one-shot warm-up cycle after startup.
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_secs: u64,

    /// Maximum media IDs per AniList lookup, to stay under the API's
    /// query complexity limit.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How far ahead a title counts as imminently airing. The due-set
    /// selector and the dispatch decision share this one value.
    #[serde(default = "default_airing_window")]
    pub airing_window_secs: i64,

    /// How long the "Track +" button stays live on a notification.
    #[serde(default = "default_track_button_timeout")]
    pub track_button_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    600
}

fn default_warmup_delay() -> u64 {
    30
}

fn default_batch_size() -> usize {
    50
}

fn default_airing_window() -> i64 {
    1200
}

fn default_track_button_timeout() -> u64 {
    600
}

impl Default for AiringConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            warmup_delay_secs: default_warmup_delay(),
            batch_size: default_batch_size(),
            airing_window_secs: default_airing_window(),
            track_button_timeout_secs: default_track_button_timeout(),
        }
    }
}

impl AiringConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn warmup_delay(&self) -> Duration {
        Duration::from_secs(self.warmup_delay_secs)
    }

    pub fn airing_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.airing_window_secs)
    }

    pub fn track_button_timeout(&self) -> Duration {
        Duration::from_secs(self.track_button_timeout_secs)
    }
}
