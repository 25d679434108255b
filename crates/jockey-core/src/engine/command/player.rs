//! Commands addressed to a single player

use basedrop::Shared;
use serde::{Deserialize, Serialize};

use crate::buffers::{AudioBuffer, BeatBuffer};
use crate::engine::eq::EqBand;
use crate::engine::{EngineState, OutState, PlayState, PositionTarget, StretchMethod};
use crate::events::EngineEvent;
use crate::music::TimePoint;

use super::store::StoredCommand;
use super::{Command, CommandIoData, DoneContext};

/// Discrete player changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStateAction {
    Play,
    Pause,
    OutMain,
    OutCue,
    Sync,
    NoSync,
    Mute,
    NoMute,
    Loop,
    NoLoop,
}

/// Continuous player changes
///
/// Relative actions add their value to the current one. EQ values are gains
/// in dB (see [`eq_dial_to_db`](crate::engine::eq_dial_to_db)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerDoubleAction {
    Volume,
    VolumeRelative,
    PlaySpeed,
    PlaySpeedRelative,
    EqLow,
    EqMid,
    EqHigh,
}

#[derive(Debug, Clone)]
pub struct PlayerStateCommand {
    pub player: usize,
    pub action: PlayerStateAction,
    applied: bool,
}

impl PlayerStateCommand {
    pub fn new(player: usize, action: PlayerStateAction) -> Self {
        Self {
            player,
            action,
            applied: false,
        }
    }
}

impl Command for PlayerStateCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        let Some(player) = engine.players.get_mut(self.player) else {
            return;
        };
        match self.action {
            PlayerStateAction::Play => player.set_play_state(PlayState::Play),
            PlayerStateAction::Pause => player.set_play_state(PlayState::Pause),
            PlayerStateAction::OutMain => player.set_out_state(OutState::MainMix),
            PlayerStateAction::OutCue => player.set_out_state(OutState::Cue),
            PlayerStateAction::Sync => player.set_sync(true),
            PlayerStateAction::NoSync => player.set_sync(false),
            PlayerStateAction::Mute => player.set_mute(true),
            PlayerStateAction::NoMute => player.set_mute(false),
            PlayerStateAction::Loop => player.set_loop(true),
            PlayerStateAction::NoLoop => player.set_loop(false),
        }
        self.applied = true;
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if self.applied {
            ctx.emit(EngineEvent::PlayerState {
                player: self.player,
                action: self.action,
            });
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::PlayerState {
            player: self.player,
            action: self.action,
        }
        .write(data)
    }
}

#[derive(Debug, Clone)]
pub struct PlayerDoubleCommand {
    pub player: usize,
    pub action: PlayerDoubleAction,
    pub value: f64,
    /// Value after clamping, once applied
    result: Option<f64>,
}

impl PlayerDoubleCommand {
    pub fn new(player: usize, action: PlayerDoubleAction, value: f64) -> Self {
        Self {
            player,
            action,
            value,
            result: None,
        }
    }
}

impl Command for PlayerDoubleCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        let Some(player) = engine.players.get_mut(self.player) else {
            return;
        };
        let result = match self.action {
            PlayerDoubleAction::Volume => {
                player.set_volume(self.value);
                player.volume()
            }
            PlayerDoubleAction::VolumeRelative => {
                player.set_volume(player.volume() + self.value);
                player.volume()
            }
            PlayerDoubleAction::PlaySpeed => {
                player.set_play_speed(self.value);
                player.play_speed()
            }
            PlayerDoubleAction::PlaySpeedRelative => {
                player.set_play_speed(player.play_speed() + self.value);
                player.play_speed()
            }
            PlayerDoubleAction::EqLow => {
                player.set_eq(EqBand::Low, self.value);
                player.eq_db(EqBand::Low)
            }
            PlayerDoubleAction::EqMid => {
                player.set_eq(EqBand::Mid, self.value);
                player.eq_db(EqBand::Mid)
            }
            PlayerDoubleAction::EqHigh => {
                player.set_eq(EqBand::High, self.value);
                player.eq_db(EqBand::High)
            }
        };
        self.result = Some(result);
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if let Some(value) = self.result {
            ctx.emit(EngineEvent::PlayerValue {
                player: self.player,
                action: self.action,
                value,
            });
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::PlayerDouble {
            player: self.player,
            action: self.action,
            value: self.value,
        }
        .write(data)
    }
}

/// Set the playhead or one of the marks
///
/// For [`PositionTarget::PlayRelative`] the time is an offset from the
/// current playhead (negative offsets seek backwards).
#[derive(Debug, Clone)]
pub struct PlayerPositionCommand {
    pub player: usize,
    pub target: PositionTarget,
    pub time: TimePoint,
    /// Frame the position resolved to, once applied
    frame: Option<i64>,
}

impl PlayerPositionCommand {
    pub fn new(player: usize, target: PositionTarget, time: TimePoint) -> Self {
        Self {
            player,
            target,
            time,
            frame: None,
        }
    }

    /// Seek to the start mark (play seeks never land before it)
    pub fn reset(player: usize) -> Self {
        Self::new(player, PositionTarget::Play, TimePoint::from_frames(0))
    }

    pub fn resolved_frame(&self) -> Option<i64> {
        self.frame
    }
}

impl Command for PlayerPositionCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        let EngineState {
            players, transport, ..
        } = engine;
        if let Some(player) = players.get_mut(self.player) {
            self.frame = Some(player.set_position(self.target, &self.time, transport));
        }
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if let Some(frame) = self.frame {
            let executed_at = ctx.executed_at();
            ctx.emit(EngineEvent::PlayerPosition {
                player: self.player,
                target: self.target,
                frame,
                executed_at,
            });
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::PlayerPosition {
            player: self.player,
            target: self.target,
            time: self.time,
        }
        .write(data)
    }
}

#[derive(Debug, Clone)]
pub struct PlayerStretchCommand {
    pub player: usize,
    pub method: StretchMethod,
    applied: bool,
}

impl PlayerStretchCommand {
    pub fn new(player: usize, method: StretchMethod) -> Self {
        Self {
            player,
            method,
            applied: false,
        }
    }
}

impl Command for PlayerStretchCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        if let Some(player) = engine.players.get_mut(self.player) {
            player.set_stretch_method(self.method);
            self.applied = true;
        }
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if self.applied {
            ctx.emit(EngineEvent::PlayerStretch {
                player: self.player,
                method: self.method,
            });
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::PlayerStretch {
            player: self.player,
            method: self.method,
        }
        .write(data)
    }
}

/// Install new audio and beat grid on a player
///
/// After `execute` the command holds the buffers it replaced, so the old
/// pair is released when the command is dropped by the done-action pass.
/// `None` audio clears the deck.
pub struct PlayerLoadCommand {
    pub player: usize,
    audio: Option<Shared<AudioBuffer>>,
    beats: Option<Shared<BeatBuffer>>,
    loaded_frames: Option<usize>,
}

impl PlayerLoadCommand {
    pub fn new(
        player: usize,
        audio: Option<Shared<AudioBuffer>>,
        beats: Option<Shared<BeatBuffer>>,
    ) -> Self {
        Self {
            player,
            audio,
            beats,
            loaded_frames: None,
        }
    }

    /// Remove the deck's buffers
    pub fn clear(player: usize) -> Self {
        Self::new(player, None, None)
    }
}

impl Command for PlayerLoadCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        let Some(player) = engine.players.get_mut(self.player) else {
            return;
        };
        let (old_audio, old_beats) = player.set_buffers(self.audio.take(), self.beats.take());
        self.audio = old_audio;
        self.beats = old_beats;
        self.loaded_frames = Some(player.audio_len());
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if let Some(frames) = self.loaded_frames {
            ctx.emit(EngineEvent::PlayerBuffers {
                player: self.player,
                frames,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> EngineState {
        EngineState::new(&EngineConfig::default())
    }

    #[test]
    fn test_state_actions() {
        let mut engine = engine();
        PlayerStateCommand::new(1, PlayerStateAction::Play).execute(&mut engine);
        PlayerStateCommand::new(1, PlayerStateAction::OutCue).execute(&mut engine);
        PlayerStateCommand::new(1, PlayerStateAction::NoSync).execute(&mut engine);
        PlayerStateCommand::new(1, PlayerStateAction::Mute).execute(&mut engine);
        PlayerStateCommand::new(1, PlayerStateAction::Loop).execute(&mut engine);

        let player = &engine.players[1];
        assert_eq!(player.play_state(), PlayState::Play);
        assert_eq!(player.out_state(), OutState::Cue);
        assert!(!player.is_syncing());
        assert!(player.is_muted());
        assert!(player.is_looping());
        assert_eq!(engine.players[0].play_state(), PlayState::Pause);
    }

    #[test]
    fn test_invalid_player_is_noop() {
        let mut engine = engine();
        let mut command = PlayerDoubleCommand::new(7, PlayerDoubleAction::Volume, 0.5);
        command.execute(&mut engine);
        assert!(command.result.is_none());
        assert!(engine.players.iter().all(|p| p.volume() == 1.0));

        let mut command = PlayerPositionCommand::reset(9);
        command.execute(&mut engine);
        assert!(command.resolved_frame().is_none());
    }

    #[test]
    fn test_relative_values() {
        let mut engine = engine();
        PlayerStateCommand::new(0, PlayerStateAction::NoSync).execute(&mut engine);
        PlayerDoubleCommand::new(0, PlayerDoubleAction::VolumeRelative, -0.25).execute(&mut engine);
        PlayerDoubleCommand::new(0, PlayerDoubleAction::PlaySpeedRelative, 0.5).execute(&mut engine);
        assert_eq!(engine.players[0].volume(), 0.75);
        assert_eq!(engine.players[0].play_speed(), 1.5);
        assert_eq!(engine.players[0].speed(), 1.5);

        let mut command = PlayerDoubleCommand::new(0, PlayerDoubleAction::EqLow, -100.0);
        command.execute(&mut engine);
        assert_eq!(command.result, Some(-70.0));
    }

    #[test]
    fn test_load_keeps_replaced_buffers() {
        let collector = basedrop::Collector::new();
        let handle = collector.handle();
        let mut engine = engine();

        let first = Shared::new(&handle, AudioBuffer::new(vec![Default::default(); 10], 44100));
        let mut load = PlayerLoadCommand::new(0, Some(first), None);
        load.execute(&mut engine);
        assert!(load.audio.is_none());
        assert_eq!(engine.players[0].audio_len(), 10);

        let mut clear = PlayerLoadCommand::clear(0);
        clear.execute(&mut engine);
        assert_eq!(clear.audio.as_ref().map(|a| a.len()), Some(10));
        assert!(!engine.players[0].has_audio());
        assert!(!clear.store(&mut CommandIoData::new()));
    }
}
