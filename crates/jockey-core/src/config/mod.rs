//! Engine configuration
//!
//! [`EngineConfig`] fixes everything that is allocated or bound at startup
//! (sample rate, deck count, block size, queue capacities) plus the cadence
//! of the non-realtime consumer. It is stored as YAML.
//!
//! ```ignore
//! use jockey_core::config::{default_config_path, load_config, save_config};
//!
//! let config = load_config(&default_config_path());
//! save_config(&config, &default_config_path())?;
//! ```

mod io;
mod paths;

use serde::{Deserialize, Serialize};

use crate::engine::{OutState, PlayState, StretchMethod, DEFAULT_BPM, MAX_BLOCK_SIZE};
use crate::music::DEFAULT_BEATS_PER_BAR;
use crate::types::{DEFAULT_NUM_PLAYERS, DEFAULT_SAMPLE_RATE};

pub use io::{load_config, parse_config, save_config};
pub use paths::{default_config_dir, default_config_path};

/// Startup state of every deck
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerDefaults {
    /// Follow the transport tempo and phase
    pub sync: bool,
    pub stretch_method: StretchMethod,
    pub out_state: OutState,
    pub play_state: PlayState,
    /// Linear gain, 1.0 = unity
    pub volume: f64,
}

impl Default for PlayerDefaults {
    fn default() -> Self {
        Self {
            sync: true,
            stretch_method: StretchMethod::PlayRate,
            out_state: OutState::MainMix,
            play_state: PlayState::Pause,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub num_players: usize,
    /// Largest block the host will ask for; render buffers are sized to it
    pub max_block_size: usize,
    pub initial_bpm: f64,
    pub beats_per_bar: u32,

    /// Pre-allocated scheduler queue entries
    pub scheduler_capacity: usize,
    /// Executed commands that can wait for the done pass before the render
    /// thread holds further due commands back
    pub done_queue_capacity: usize,
    /// Buffered observer events before new ones are dropped
    pub event_capacity: usize,

    /// Period of the state query and done-action pass
    pub poll_interval_ms: u64,
    /// Period of the audible evaluation
    pub audible_interval_ms: u64,
    /// Volume (fraction of full scale) at or below which a deck is inaudible
    pub audible_volume_threshold: f64,
    /// Crossfade distance from a side's far end within which that side is faded out
    pub audible_crossfade_threshold: f64,

    pub crossfade_enabled: bool,
    pub crossfade_left: usize,
    pub crossfade_right: usize,

    pub player: PlayerDefaults,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_players: DEFAULT_NUM_PLAYERS,
            max_block_size: MAX_BLOCK_SIZE,
            initial_bpm: DEFAULT_BPM,
            beats_per_bar: DEFAULT_BEATS_PER_BAR,
            scheduler_capacity: 1024,
            done_queue_capacity: 1024,
            event_capacity: 4096,
            poll_interval_ms: 30,
            audible_interval_ms: 200,
            audible_volume_threshold: 0.05,
            audible_crossfade_threshold: 0.05,
            crossfade_enabled: false,
            crossfade_left: 0,
            crossfade_right: 1,
            player: PlayerDefaults::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp values the engine cannot run with
    pub fn sanitized(mut self) -> Self {
        self.sample_rate = self.sample_rate.max(1);
        self.num_players = self.num_players.max(1);
        self.max_block_size = self.max_block_size.clamp(1, MAX_BLOCK_SIZE);
        self.beats_per_bar = self.beats_per_bar.max(1);
        self.scheduler_capacity = self.scheduler_capacity.max(1);
        self.done_queue_capacity = self.done_queue_capacity.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self.poll_interval_ms = self.poll_interval_ms.max(1);
        self.audible_interval_ms = self.audible_interval_ms.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.num_players, 2);
        assert_eq!(config.poll_interval_ms, 30);
        assert!(config.player.sync);
    }

    #[test]
    fn test_sanitized_clamps() {
        let config = EngineConfig {
            num_players: 0,
            max_block_size: 1 << 20,
            done_queue_capacity: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.num_players, 1);
        assert_eq!(config.max_block_size, MAX_BLOCK_SIZE);
        assert_eq!(config.done_queue_capacity, 1);
    }
}
