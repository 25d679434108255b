//! Audio model - the controller-facing side of the engine
//!
//! [`AudioModel`] is what a UI, a MIDI mapping or a remote-control listener
//! talks to. It takes controller values (integers where [`ONE_SCALE`] means
//! 100%), validates and remaps them, and turns them into commands only when
//! something actually changed. It keeps the buffers of every loaded track
//! alive, runs one loader thread per deck and, once started, a consumer
//! thread that polls engine state and runs the done-action pass.
//!
//! ```ignore
//! let EngineContext { config, master, scheduler, done_actions, events, .. } =
//!     EngineContext::new(&config);
//! let mut model = AudioModel::new(&config, scheduler, done_actions.handle(), events.sender())?;
//! model.start(done_actions)?;
//! model.player_load(0, Box::new(MemorySource::new("intro", audio, Some(beats))))?;
//! model.player_set(0, PlayerFlag::Pause, false);
//! ```

mod consumer;
mod query;
mod state;

use std::sync::Arc;
use std::time::Duration;

use basedrop::{Handle, Shared};
use parking_lot::Mutex;

use crate::buffers::{AudioBuffer, BeatBuffer};
use crate::config::EngineConfig;
use crate::engine::{
    eq_dial_to_db, DoneActions, EqBand, MasterBoolAction, MasterBoolCommand, MasterDoubleAction,
    MasterDoubleCommand, MasterSyncToPlayerCommand, MasterXFadeSelectCommand, PlayerDoubleAction,
    PlayerDoubleCommand, PlayerLoadCommand, PlayerPositionCommand, PlayerStateAction,
    PlayerStateCommand, PositionTarget, Scheduler, TransportBpmCommand, MAX_VOLUME,
};
use crate::error::{LoadError, LoadResult, ModelError};
use crate::events::{EngineEvent, EventSender};
use crate::loader::{BufferSource, DeckLoader, LoadSink};
use crate::music::{TimePoint, DEFAULT_BEATS_PER_BAR};
use crate::types::ONE_SCALE;

pub use consumer::{Consumer, ConsumerThread};

use state::ModelState;

/// Loudest volume on the controller scale
const MAX_VOLUME_SCALED: i32 = (MAX_VOLUME * ONE_SCALE as f64) as i32;

/// On/off deck parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerFlag {
    Pause,
    /// Routed to the cue bus instead of the main mix
    Cue,
    Sync,
    Mute,
    Loop,
}

impl PlayerFlag {
    /// Command actions for (on, off)
    fn actions(self) -> (PlayerStateAction, PlayerStateAction) {
        match self {
            PlayerFlag::Pause => (PlayerStateAction::Pause, PlayerStateAction::Play),
            PlayerFlag::Cue => (PlayerStateAction::OutCue, PlayerStateAction::OutMain),
            PlayerFlag::Sync => (PlayerStateAction::Sync, PlayerStateAction::NoSync),
            PlayerFlag::Mute => (PlayerStateAction::Mute, PlayerStateAction::NoMute),
            PlayerFlag::Loop => (PlayerStateAction::Loop, PlayerStateAction::NoLoop),
        }
    }
}

/// Integer deck parameters, on the [`ONE_SCALE`] basis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerParam {
    /// 0..=1.5 * ONE_SCALE
    Volume,
    /// Offset from normal speed; ONE_SCALE / 10 = +10%
    Speed,
    /// -ONE_SCALE..=ONE_SCALE, mapped to -70..=+6 dB
    Eq(EqBand),
}

/// One-shot deck actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerTrigger {
    /// Seek to the first frame
    Reset,
    SeekForward,
    SeekBack,
    /// Unload the deck
    Clear,
    Toggle(PlayerFlag),
}

/// Controller-facing engine model; see the module docs
pub struct AudioModel {
    num_players: usize,
    sample_rate: u32,
    poll_interval: Duration,
    audible_interval: Duration,
    scheduler: Scheduler,
    state: Arc<Mutex<ModelState>>,
    events: EventSender,
    loaders: Vec<DeckLoader>,
    consumer: Option<ConsumerThread>,
}

impl AudioModel {
    /// Build the model and spawn one loader thread per deck
    ///
    /// `release` must come from the [`DoneActions`] that will run the
    /// done-action pass, so loaded buffers are freed there.
    pub fn new(
        config: &EngineConfig,
        scheduler: Scheduler,
        release: Handle,
        events: EventSender,
    ) -> Result<Self, ModelError> {
        let config = config.clone().sanitized();
        let state = Arc::new(Mutex::new(ModelState::new(&config)));

        let sink: Arc<dyn LoadSink> = Arc::new(ModelSink {
            state: Arc::clone(&state),
            scheduler: scheduler.clone(),
            events: events.clone(),
        });
        let loaders = (0..config.num_players)
            .map(|player| DeckLoader::spawn(player, release.clone(), Arc::clone(&sink)))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Audio model ready with {} decks", config.num_players);

        Ok(Self {
            num_players: config.num_players,
            sample_rate: config.sample_rate,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            audible_interval: Duration::from_millis(config.audible_interval_ms),
            scheduler,
            state,
            events,
            loaders,
            consumer: None,
        })
    }

    pub fn player_count(&self) -> usize {
        self.num_players
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // --- Consumer ---

    /// A consumer sharing this model's cache, to be driven by hand
    pub fn consumer(&self, done_actions: DoneActions) -> Consumer {
        Consumer::new(
            done_actions,
            self.scheduler.clone(),
            Arc::clone(&self.state),
            self.num_players,
        )
    }

    /// Run the consumer on its own thread at the configured cadence
    pub fn start(&mut self, done_actions: DoneActions) -> Result<(), ModelError> {
        if self.consumer.is_some() {
            return Err(ModelError::AlreadyRunning);
        }
        let consumer = self.consumer(done_actions);
        self.consumer = Some(ConsumerThread::spawn(
            consumer,
            self.poll_interval,
            self.audible_interval,
        )?);
        Ok(())
    }

    /// Stop the consumer thread, handing back its done-action pass
    pub fn stop(&mut self) -> Option<DoneActions> {
        self.consumer
            .take()
            .and_then(ConsumerThread::stop)
            .map(Consumer::into_done_actions)
    }

    // --- Deck flags ---

    pub fn player_flag(&self, player: usize, flag: PlayerFlag) -> bool {
        self.state.lock().deck(player).is_some_and(|deck| deck.flag(flag))
    }

    pub fn player_set(&self, player: usize, flag: PlayerFlag, value: bool) {
        let mut state = self.state.lock();
        let Some(deck) = state.deck_mut(player) else {
            return;
        };
        let current = deck.flag_mut(flag);
        if *current == value {
            return;
        }
        *current = value;
        if flag == PlayerFlag::Sync && !value {
            deck.post_free_speed_updates = 0;
        }

        let (on, off) = flag.actions();
        self.scheduler
            .execute(PlayerStateCommand::new(player, if value { on } else { off }));
    }

    /// Pause while the controller scrubs, resume afterwards
    ///
    /// Decks the user paused stay paused.
    pub fn player_set_seeking(&self, player: usize, seeking: bool) {
        let state = self.state.lock();
        let Some(deck) = state.deck(player) else {
            return;
        };
        if deck.pause {
            return;
        }
        let action = if seeking {
            PlayerStateAction::Pause
        } else {
            PlayerStateAction::Play
        };
        self.scheduler.execute(PlayerStateCommand::new(player, action));
    }

    pub fn player_trigger(&self, player: usize, trigger: PlayerTrigger) {
        if player >= self.num_players {
            return;
        }
        match trigger {
            PlayerTrigger::Reset => self.player_seek_frame(player, 0),
            PlayerTrigger::SeekForward => self.player_seek_beats_relative(player, 1),
            PlayerTrigger::SeekBack => self.player_seek_beats_relative(player, -1),
            PlayerTrigger::Clear => self.clear(player),
            PlayerTrigger::Toggle(flag) => {
                let value = self.player_flag(player, flag);
                self.player_set(player, flag, !value);
            }
        }
    }

    // --- Deck values ---

    pub fn player_param(&self, player: usize, param: PlayerParam) -> i32 {
        let state = self.state.lock();
        let Some(deck) = state.deck(player) else {
            return 0;
        };
        match param {
            PlayerParam::Volume => deck.volume,
            PlayerParam::Speed => deck.speed,
            PlayerParam::Eq(band) => deck.eq[band.index()],
        }
    }

    pub fn player_set_param(&self, player: usize, param: PlayerParam, value: i32) {
        let mut state = self.state.lock();
        let Some(deck) = state.deck_mut(player) else {
            return;
        };

        let (action, command_value) = match param {
            PlayerParam::Volume => {
                let value = value.clamp(0, MAX_VOLUME_SCALED);
                if deck.volume == value {
                    return;
                }
                deck.volume = value;
                (PlayerDoubleAction::Volume, value as f64 / ONE_SCALE as f64)
            }
            PlayerParam::Speed => {
                // The engine owns the speed while syncing, and for the two
                // reports that follow going free
                if deck.forwards_speed() || deck.speed == value {
                    return;
                }
                deck.speed = value;
                (PlayerDoubleAction::PlaySpeed, 1.0 + value as f64 / ONE_SCALE as f64)
            }
            PlayerParam::Eq(band) => {
                let value = value.clamp(-ONE_SCALE, ONE_SCALE);
                let slot = &mut deck.eq[band.index()];
                if *slot == value {
                    return;
                }
                *slot = value;
                (eq_action(band), eq_dial_to_db(value, ONE_SCALE))
            }
        };
        self.scheduler
            .execute(PlayerDoubleCommand::new(player, action, command_value));
    }

    // --- Positions ---

    /// Last frame reported by the engine
    pub fn player_frame(&self, player: usize) -> i64 {
        self.state.lock().deck(player).map_or(0, |deck| deck.frame)
    }

    /// Length of the loaded track, 0 when empty
    pub fn player_frames(&self, player: usize) -> usize {
        self.state.lock().deck(player).map_or(0, |deck| deck.num_frames)
    }

    pub fn player_seek_frame(&self, player: usize, frame: i64) {
        if player >= self.num_players {
            return;
        }
        self.scheduler.execute(PlayerPositionCommand::new(
            player,
            PositionTarget::Play,
            TimePoint::from_frames(frame.max(0)),
        ));
    }

    /// Seek by a frame offset; an offset of 0 does nothing
    pub fn player_seek_frames_relative(&self, player: usize, frames: i64) {
        if player >= self.num_players || frames == 0 {
            return;
        }
        self.scheduler.execute(PlayerPositionCommand::new(
            player,
            PositionTarget::PlayRelative,
            TimePoint::from_frames(frames),
        ));
    }

    /// Seek by whole beats of the deck's own grid
    pub fn player_seek_beats_relative(&self, player: usize, beats: i32) {
        if player >= self.num_players || beats == 0 {
            return;
        }
        let offset = TimePoint::from_beats(beats as f64, DEFAULT_BEATS_PER_BAR);
        self.scheduler.execute(PlayerPositionCommand::new(
            player,
            PositionTarget::PlayRelative,
            offset,
        ));
    }

    /// Set the playhead or a mark
    ///
    /// Marks are only sent when they differ from the last value set.
    pub fn player_set_position(&self, player: usize, target: PositionTarget, time: TimePoint) {
        let mut state = self.state.lock();
        let Some(deck) = state.deck_mut(player) else {
            return;
        };
        let cached = match target {
            PositionTarget::Play | PositionTarget::PlayRelative => None,
            PositionTarget::Start => Some(&mut deck.marks.start),
            PositionTarget::End => Some(&mut deck.marks.end),
            PositionTarget::LoopStart => Some(&mut deck.marks.loop_start),
            PositionTarget::LoopEnd => Some(&mut deck.marks.loop_end),
        };
        if let Some(cached) = cached {
            if *cached == Some(time) {
                return;
            }
            *cached = Some(time);
        }
        self.scheduler
            .execute(PlayerPositionCommand::new(player, target, time));
    }

    // --- Jump slots ---

    /// Recall a jump slot, or store the current position in it
    ///
    /// An empty slot stores the last reported frame snapped to the nearest
    /// beat; a stored slot seeks there. Returns the slot's frame.
    pub fn player_jump(&self, player: usize, slot: usize) -> Option<i64> {
        let mut state = self.state.lock();
        let deck = state.deck_mut(player)?;

        if let Some(&frame) = deck.jumps.get(&slot) {
            self.scheduler.execute(PlayerPositionCommand::new(
                player,
                PositionTarget::Play,
                TimePoint::from_frames(frame),
            ));
            return Some(frame);
        }

        let frame = deck.snap_to_beat(deck.frame);
        deck.jumps.insert(slot, frame);
        self.events
            .emit(EngineEvent::JumpStored { player, slot, frame });
        Some(frame)
    }

    pub fn player_jump_frame(&self, player: usize, slot: usize) -> Option<i64> {
        self.state.lock().deck(player)?.jumps.get(&slot).copied()
    }

    pub fn player_clear_jumps(&self, player: usize) {
        let mut state = self.state.lock();
        if let Some(deck) = state.deck_mut(player) {
            deck.jumps.clear();
            self.events.emit(EngineEvent::JumpsCleared { player });
        }
    }

    // --- Loading ---

    /// Unload the deck and load `source` on its loader thread
    pub fn player_load(&self, player: usize, source: Box<dyn BufferSource>) -> LoadResult<()> {
        let loader = self
            .loaders
            .get(player)
            .ok_or(LoadError::InvalidPlayer(player))?;
        self.clear(player);
        loader.load(source)
    }

    fn clear(&self, player: usize) {
        let mut state = self.state.lock();
        if let Some(deck) = state.deck_mut(player) {
            deck.release_track();
            self.scheduler.execute(PlayerLoadCommand::clear(player));
        }
    }

    /// Beat grid of the loaded track, if any
    pub fn player_beats(&self, player: usize) -> Option<Shared<BeatBuffer>> {
        self.state.lock().deck(player)?.beats.clone()
    }

    pub fn is_audible(&self, player: usize) -> bool {
        self.state.lock().deck(player).is_some_and(|deck| deck.audible)
    }

    // --- Master ---

    pub fn master_bpm(&self) -> f64 {
        self.state.lock().bpm
    }

    pub fn master_set_bpm(&self, bpm: f64) {
        let mut state = self.state.lock();
        if !bpm.is_finite() || bpm == state.bpm {
            return;
        }
        state.bpm = bpm;
        self.scheduler.execute(TransportBpmCommand::new(bpm));
    }

    pub fn master_set_crossfade(&self, enabled: bool) {
        let mut state = self.state.lock();
        if state.crossfade_enabled == enabled {
            return;
        }
        state.crossfade_enabled = enabled;
        let action = if enabled {
            MasterBoolAction::Xfade
        } else {
            MasterBoolAction::NoXfade
        };
        self.scheduler.execute(MasterBoolCommand::new(action));
    }

    /// 0 = left deck only, ONE_SCALE = right deck only
    pub fn master_set_crossfade_position(&self, position: i32) {
        let position = position.clamp(0, ONE_SCALE);
        let mut state = self.state.lock();
        if state.crossfade_position == position {
            return;
        }
        state.crossfade_position = position;
        self.scheduler.execute(MasterDoubleCommand::new(
            MasterDoubleAction::XfadePosition,
            position as f64 / ONE_SCALE as f64,
        ));
    }

    pub fn master_set_crossfade_players(&self, left: usize, right: usize) {
        if left >= self.num_players || right >= self.num_players {
            return;
        }
        let mut state = self.state.lock();
        state.crossfade_left = left;
        state.crossfade_right = right;
        self.scheduler
            .execute(MasterXFadeSelectCommand::new(left, right));
    }

    pub fn master_set_volume(&self, volume: i32) {
        let volume = volume.clamp(0, MAX_VOLUME_SCALED);
        let mut state = self.state.lock();
        if state.master_volume == volume {
            return;
        }
        state.master_volume = volume;
        self.scheduler.execute(MasterDoubleCommand::new(
            MasterDoubleAction::MainVolume,
            volume as f64 / ONE_SCALE as f64,
        ));
    }

    pub fn master_set_cue_volume(&self, volume: i32) {
        let volume = volume.clamp(0, MAX_VOLUME_SCALED);
        let mut state = self.state.lock();
        if state.cue_volume == volume {
            return;
        }
        state.cue_volume = volume;
        self.scheduler.execute(MasterDoubleCommand::new(
            MasterDoubleAction::CueVolume,
            volume as f64 / ONE_SCALE as f64,
        ));
    }

    /// Take the transport tempo from a deck's grid and sync that deck
    pub fn master_sync_to_player(&self, player: usize) {
        let mut state = self.state.lock();
        let Some(deck) = state.deck_mut(player) else {
            return;
        };
        deck.sync = true;
        self.scheduler.execute(MasterSyncToPlayerCommand::new(player));
    }

    /// Last transport position reported by the engine
    pub fn transport_position(&self) -> TimePoint {
        self.state.lock().transport_position
    }
}

impl Drop for AudioModel {
    fn drop(&mut self) {
        self.stop();
        for loader in self.loaders.iter_mut() {
            loader.shutdown();
        }
    }
}

fn eq_action(band: EqBand) -> PlayerDoubleAction {
    match band {
        EqBand::Low => PlayerDoubleAction::EqLow,
        EqBand::Mid => PlayerDoubleAction::EqMid,
        EqBand::High => PlayerDoubleAction::EqHigh,
    }
}

/// Installs finished loads: retains the buffers, then swaps them in and
/// rewinds the deck
struct ModelSink {
    state: Arc<Mutex<ModelState>>,
    scheduler: Scheduler,
    events: EventSender,
}

impl LoadSink for ModelSink {
    fn progress(&self, player: usize, percent: u8) {
        self.events.emit(EngineEvent::LoadProgress { player, percent });
    }

    fn loaded(&self, player: usize, audio: Shared<AudioBuffer>, beats: Option<Shared<BeatBuffer>>) {
        let mut state = self.state.lock();
        let Some(deck) = state.deck_mut(player) else {
            return;
        };
        deck.num_frames = audio.len();
        deck.frame = 0;
        deck.jumps.clear();
        deck.marks = Default::default();
        deck.audio = Some(audio.clone());
        deck.beats = beats.clone();

        self.scheduler
            .execute(PlayerLoadCommand::new(player, Some(audio), beats));
        self.scheduler.execute(PlayerPositionCommand::reset(player));
        self.events.emit(EngineEvent::JumpsCleared { player });
    }

    fn failed(&self, player: usize, error: &LoadError) {
        self.events.emit(EngineEvent::LoadFailed {
            player,
            error: error.to_string(),
        });
    }
}
