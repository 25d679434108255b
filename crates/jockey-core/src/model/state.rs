//! Cached deck and master state kept by the model
//!
//! Values are stored in controller units (integers on a [`ONE_SCALE`] basis)
//! so setters can tell whether anything changed before queuing a command.
//! The cache is shared between the controller thread, the consumer thread
//! and the loaders behind a `parking_lot::Mutex`; the render thread never
//! touches it.

use std::collections::HashMap;

use basedrop::Shared;

use crate::buffers::{AudioBuffer, BeatBuffer};
use crate::config::EngineConfig;
use crate::engine::PlayState;
use crate::events::{EngineEvent, EventSender};
use crate::music::TimePoint;
use crate::types::ONE_SCALE;

use super::PlayerFlag;

/// What the state query captured for one deck
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PlayerSnapshot {
    pub frame: i64,
    pub speed: f64,
    pub level: f32,
    pub play_state: PlayState,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            frame: 0,
            speed: 1.0,
            level: 0.0,
            play_state: PlayState::Pause,
        }
    }
}

/// Marks a controller has set, in [`PositionTarget`](crate::engine::PositionTarget) order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct MarkCache {
    pub start: Option<TimePoint>,
    pub end: Option<TimePoint>,
    pub loop_start: Option<TimePoint>,
    pub loop_end: Option<TimePoint>,
}

pub(crate) struct DeckState {
    pub pause: bool,
    pub cue: bool,
    pub sync: bool,
    pub mute: bool,
    pub looping: bool,
    pub audible: bool,

    pub volume: i32,
    /// Speed offset from 1.0, on the one-scale basis
    pub speed: i32,
    pub eq: [i32; 3],

    pub frame: i64,
    pub num_frames: usize,
    /// Speed reports forwarded since the deck went free
    pub post_free_speed_updates: u32,
    pub marks: MarkCache,

    /// Retained buffers of the loaded track
    pub audio: Option<Shared<AudioBuffer>>,
    pub beats: Option<Shared<BeatBuffer>>,
    /// Jump slot -> frame
    pub jumps: HashMap<usize, i64>,
}

impl DeckState {
    fn new(config: &EngineConfig) -> Self {
        let defaults = &config.player;
        Self {
            pause: defaults.play_state == PlayState::Pause,
            cue: defaults.out_state == crate::engine::OutState::Cue,
            sync: defaults.sync,
            mute: false,
            looping: false,
            audible: false,
            volume: (defaults.volume * ONE_SCALE as f64).round() as i32,
            speed: 0,
            eq: [0; 3],
            frame: 0,
            num_frames: 0,
            post_free_speed_updates: 0,
            marks: MarkCache::default(),
            audio: None,
            beats: None,
            jumps: HashMap::new(),
        }
    }

    pub fn flag(&self, flag: PlayerFlag) -> bool {
        match flag {
            PlayerFlag::Pause => self.pause,
            PlayerFlag::Cue => self.cue,
            PlayerFlag::Sync => self.sync,
            PlayerFlag::Mute => self.mute,
            PlayerFlag::Loop => self.looping,
        }
    }

    pub fn flag_mut(&mut self, flag: PlayerFlag) -> &mut bool {
        match flag {
            PlayerFlag::Pause => &mut self.pause,
            PlayerFlag::Cue => &mut self.cue,
            PlayerFlag::Sync => &mut self.sync,
            PlayerFlag::Mute => &mut self.mute,
            PlayerFlag::Loop => &mut self.looping,
        }
    }

    /// Whether speed reports from the engine are passed on
    ///
    /// Always while syncing, and for two reports after going free so the
    /// controller learns the speed the deck was left at.
    pub fn forwards_speed(&self) -> bool {
        self.sync || self.post_free_speed_updates < 2
    }

    /// Drop the retained buffers and everything derived from them
    pub fn release_track(&mut self) {
        self.audio = None;
        self.beats = None;
        self.num_frames = 0;
        self.jumps.clear();
    }

    /// Frame snapped to the nearest beat of the loaded grid
    ///
    /// Grids with fewer than three beats are not trusted for snapping.
    pub fn snap_to_beat(&self, frame: i64) -> i64 {
        match self.beats.as_deref() {
            Some(grid) if grid.len() > 2 => grid
                .nearest_beat(frame as f64)
                .map_or(frame, |beat| beat.round() as i64),
            _ => frame,
        }
    }
}

pub(crate) struct ModelState {
    pub decks: Vec<DeckState>,

    pub crossfade_enabled: bool,
    pub crossfade_position: i32,
    pub crossfade_left: usize,
    pub crossfade_right: usize,
    pub master_volume: i32,
    pub cue_volume: i32,
    pub bpm: f64,
    pub transport_position: TimePoint,

    volume_threshold: i32,
    crossfade_threshold: i32,
}

impl ModelState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            decks: (0..config.num_players).map(|_| DeckState::new(config)).collect(),
            crossfade_enabled: config.crossfade_enabled,
            crossfade_position: ONE_SCALE / 2,
            crossfade_left: config.crossfade_left,
            crossfade_right: config.crossfade_right,
            master_volume: ONE_SCALE,
            cue_volume: ONE_SCALE,
            bpm: config.initial_bpm,
            transport_position: TimePoint::default(),
            volume_threshold: (config.audible_volume_threshold * ONE_SCALE as f64) as i32,
            crossfade_threshold: (config.audible_crossfade_threshold * ONE_SCALE as f64) as i32,
        }
    }

    pub fn deck(&self, player: usize) -> Option<&DeckState> {
        self.decks.get(player)
    }

    pub fn deck_mut(&mut self, player: usize) -> Option<&mut DeckState> {
        self.decks.get_mut(player)
    }

    /// Merge one deck's query result, emitting what changed
    pub fn update_player(&mut self, player: usize, snapshot: &PlayerSnapshot, events: &EventSender) {
        let Some(deck) = self.decks.get_mut(player) else {
            return;
        };

        if snapshot.frame != deck.frame {
            deck.frame = snapshot.frame;
            events.emit(EngineEvent::PlayerFrame {
                player,
                frame: snapshot.frame,
            });
        }

        if deck.forwards_speed() {
            deck.post_free_speed_updates = deck.post_free_speed_updates.saturating_add(1);
            let percent = ((snapshot.speed - 1.0) * ONE_SCALE as f64) as i32;
            if percent != deck.speed {
                deck.speed = percent;
                events.emit(EngineEvent::PlayerSpeed {
                    player,
                    speed: snapshot.speed,
                });
            }
        }

        // Decks pause themselves at their end mark
        let paused = snapshot.play_state == PlayState::Pause;
        if paused != deck.pause {
            deck.pause = paused;
            events.emit(EngineEvent::PlayerPlayState {
                player,
                state: snapshot.play_state,
            });
        }

        if level_percent(snapshot.level) > 0 {
            events.emit(EngineEvent::PlayerLevel {
                player,
                level: snapshot.level,
            });
        }
    }

    /// Merge the master part of a query result
    pub fn update_master(&mut self, level: f32, position: TimePoint, events: &EventSender) {
        if level_percent(level) > 0 {
            events.emit(EngineEvent::MasterLevel(level));
        }
        if position != self.transport_position {
            self.transport_position = position;
            events.emit(EngineEvent::TransportPosition(position));
        }
    }

    /// Whether a deck can currently be heard on the main mix
    pub fn is_audible(&self, player: usize) -> bool {
        let Some(deck) = self.decks.get(player) else {
            return false;
        };
        let faded_out = self.crossfade_enabled
            && ((self.crossfade_right == player && self.crossfade_position < self.crossfade_threshold)
                || (self.crossfade_left == player
                    && self.crossfade_position > ONE_SCALE - self.crossfade_threshold));

        !(deck.num_frames == 0
            || deck.frame >= deck.num_frames as i64
            || deck.mute
            || deck.pause
            || deck.volume < self.volume_threshold
            || faded_out)
    }

    /// Re-evaluate every deck's audibility, emitting changes
    pub fn eval_audible(&mut self, events: &EventSender) {
        for player in 0..self.decks.len() {
            let audible = self.is_audible(player);
            let deck = &mut self.decks[player];
            if deck.audible != audible {
                deck.audible = audible;
                events.emit(EngineEvent::PlayerAudible { player, audible });
            }
        }
    }
}

/// Peak as a whole percentage, for deciding whether a level is worth reporting
fn level_percent(level: f32) -> i32 {
    (level * 100.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn loaded_state() -> ModelState {
        let mut state = ModelState::new(&EngineConfig::default());
        for deck in state.decks.iter_mut() {
            deck.num_frames = 44100;
            deck.pause = false;
        }
        state
    }

    #[test]
    fn test_audible_rules() {
        let mut state = loaded_state();
        assert!(state.is_audible(0));

        state.decks[0].mute = true;
        assert!(!state.is_audible(0));
        state.decks[0].mute = false;

        state.decks[0].volume = 49;
        assert!(!state.is_audible(0));
        state.decks[0].volume = 50;
        assert!(state.is_audible(0));

        state.decks[0].frame = 44100;
        assert!(!state.is_audible(0));
        state.decks[0].frame = 0;

        state.decks[1].num_frames = 0;
        assert!(!state.is_audible(1));
        assert!(!state.is_audible(7));
    }

    #[test]
    fn test_crossfade_silences_far_side() {
        let mut state = loaded_state();
        state.crossfade_enabled = true;

        state.crossfade_position = 0;
        assert!(state.is_audible(0));
        assert!(!state.is_audible(1));

        state.crossfade_position = ONE_SCALE;
        assert!(!state.is_audible(0));
        assert!(state.is_audible(1));

        state.crossfade_enabled = false;
        assert!(state.is_audible(0));
    }

    #[test]
    fn test_audible_changes_are_emitted_once() {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        let mut state = loaded_state();

        state.eval_audible(&bus.sender());
        state.eval_audible(&bus.sender());
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                EngineEvent::PlayerAudible { player: 0, audible: true },
                EngineEvent::PlayerAudible { player: 1, audible: true },
            ]
        );
    }

    #[test]
    fn test_speed_forwarded_twice_after_going_free() {
        let bus = EventBus::new(64);
        let rx = bus.subscribe();
        let mut state = ModelState::new(&EngineConfig::default());
        state.decks[0].sync = false;
        state.decks[0].post_free_speed_updates = 0;

        for speed in [1.01, 1.02, 1.03] {
            let snapshot = PlayerSnapshot {
                speed,
                ..PlayerSnapshot::default()
            };
            state.update_player(0, &snapshot, &bus.sender());
        }

        let speeds: Vec<_> = rx
            .try_iter()
            .filter_map(|event| match event {
                EngineEvent::PlayerSpeed { speed, .. } => Some(speed),
                _ => None,
            })
            .collect();
        assert_eq!(speeds, vec![1.01, 1.02]);
        assert_eq!(state.decks[0].speed, 20);
    }
}
