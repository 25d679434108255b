//! Commands addressed to the master, crossfader and transport

use serde::{Deserialize, Serialize};

use crate::engine::{EngineState, MAX_VOLUME};
use crate::events::EngineEvent;
use crate::music::TimePoint;

use super::store::StoredCommand;
use super::{Command, CommandIoData, DoneContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterBoolAction {
    Xfade,
    NoXfade,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterDoubleAction {
    MainVolume,
    CueVolume,
    /// Crossfade position in [0, 1]
    XfadePosition,
}

#[derive(Debug, Clone)]
pub struct MasterBoolCommand {
    pub action: MasterBoolAction,
}

impl MasterBoolCommand {
    pub fn new(action: MasterBoolAction) -> Self {
        Self { action }
    }
}

impl Command for MasterBoolCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        engine.crossfade.enabled = self.action == MasterBoolAction::Xfade;
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        ctx.emit(EngineEvent::MasterBool { action: self.action });
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::MasterBool { action: self.action }.write(data)
    }
}

#[derive(Debug, Clone)]
pub struct MasterDoubleCommand {
    pub action: MasterDoubleAction,
    pub value: f64,
    result: Option<f64>,
}

impl MasterDoubleCommand {
    pub fn new(action: MasterDoubleAction, value: f64) -> Self {
        Self {
            action,
            value,
            result: None,
        }
    }
}

impl Command for MasterDoubleCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        if !self.value.is_finite() {
            return;
        }
        let result = match self.action {
            MasterDoubleAction::MainVolume => {
                engine.master_volume = self.value.clamp(0.0, MAX_VOLUME);
                engine.master_volume
            }
            MasterDoubleAction::CueVolume => {
                engine.cue_volume = self.value.clamp(0.0, MAX_VOLUME);
                engine.cue_volume
            }
            MasterDoubleAction::XfadePosition => {
                engine.crossfade.position = self.value.clamp(0.0, 1.0);
                engine.crossfade.position
            }
        };
        self.result = Some(result);
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if let Some(value) = self.result {
            ctx.emit(EngineEvent::MasterValue {
                action: self.action,
                value,
            });
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::MasterDouble {
            action: self.action,
            value: self.value,
        }
        .write(data)
    }
}

/// Choose which players sit on the crossfader's left and right sides
#[derive(Debug, Clone)]
pub struct MasterXFadeSelectCommand {
    pub left: usize,
    pub right: usize,
    applied: bool,
}

impl MasterXFadeSelectCommand {
    pub fn new(left: usize, right: usize) -> Self {
        Self {
            left,
            right,
            applied: false,
        }
    }
}

impl Command for MasterXFadeSelectCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        let count = engine.players.len();
        if self.left >= count || self.right >= count {
            return;
        }
        engine.crossfade.left = self.left;
        engine.crossfade.right = self.right;
        self.applied = true;
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if self.applied {
            ctx.emit(EngineEvent::CrossfadePlayers {
                left: self.left,
                right: self.right,
            });
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::MasterXfadeSelect {
            left: self.left,
            right: self.right,
        }
        .write(data)
    }
}

/// Take the transport tempo from a player and lock that player to it
///
/// The tempo is the player's grid tempo at its current speed. Players
/// without a beat grid are left alone.
#[derive(Debug, Clone)]
pub struct MasterSyncToPlayerCommand {
    pub player: usize,
    bpm: Option<f64>,
}

impl MasterSyncToPlayerCommand {
    pub fn new(player: usize) -> Self {
        Self { player, bpm: None }
    }
}

impl Command for MasterSyncToPlayerCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        let EngineState {
            players, transport, ..
        } = engine;
        let Some(player) = players.get_mut(self.player) else {
            return;
        };
        let Some(median) = player.beat_buffer().and_then(|grid| grid.median_distance()) else {
            return;
        };
        let source_rate = player
            .source_sample_rate()
            .unwrap_or_else(|| transport.sample_rate());
        let bpm = 60.0 * source_rate as f64 * player.speed() / median;
        transport.set_bpm(bpm);
        player.set_sync(true);
        self.bpm = Some(transport.bpm());
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if let Some(bpm) = self.bpm {
            ctx.emit(EngineEvent::Bpm(bpm));
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::MasterSyncToPlayer {
            player: self.player,
        }
        .write(data)
    }
}

#[derive(Debug, Clone)]
pub struct TransportBpmCommand {
    pub bpm: f64,
    result: Option<f64>,
}

impl TransportBpmCommand {
    pub fn new(bpm: f64) -> Self {
        Self { bpm, result: None }
    }
}

impl Command for TransportBpmCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        engine.transport.set_bpm(self.bpm);
        self.result = Some(engine.transport.bpm());
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if let Some(bpm) = self.result {
            ctx.emit(EngineEvent::Bpm(bpm));
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::TransportBpm { bpm: self.bpm }.write(data)
    }
}

/// Move the transport to an absolute position
#[derive(Debug, Clone)]
pub struct TransportPositionCommand {
    pub time: TimePoint,
    result: Option<TimePoint>,
}

impl TransportPositionCommand {
    pub fn new(time: TimePoint) -> Self {
        Self { time, result: None }
    }
}

impl Command for TransportPositionCommand {
    fn execute(&mut self, engine: &mut EngineState) {
        engine.transport.set_position(self.time);
        self.result = Some(*engine.transport.position());
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if let Some(time) = self.result {
            ctx.emit(EngineEvent::TransportPosition(time));
        }
    }

    fn store(&self, data: &mut CommandIoData) -> bool {
        StoredCommand::TransportPosition { time: self.time }.write(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::{AudioBuffer, BeatBuffer};
    use crate::config::EngineConfig;
    use crate::engine::PlayerLoadCommand;
    use basedrop::{Collector, Shared};

    fn engine() -> EngineState {
        EngineState::new(&EngineConfig::default())
    }

    #[test]
    fn test_master_values_clamp() {
        let mut engine = engine();
        MasterDoubleCommand::new(MasterDoubleAction::XfadePosition, 3.0).execute(&mut engine);
        MasterDoubleCommand::new(MasterDoubleAction::MainVolume, -1.0).execute(&mut engine);
        MasterDoubleCommand::new(MasterDoubleAction::CueVolume, 0.5).execute(&mut engine);
        assert_eq!(engine.crossfade.position, 1.0);
        assert_eq!(engine.master_volume, 0.0);
        assert_eq!(engine.cue_volume, 0.5);

        MasterBoolCommand::new(MasterBoolAction::Xfade).execute(&mut engine);
        assert!(engine.crossfade.enabled);
        MasterBoolCommand::new(MasterBoolAction::NoXfade).execute(&mut engine);
        assert!(!engine.crossfade.enabled);
    }

    #[test]
    fn test_xfade_select_rejects_bad_index() {
        let mut engine = engine();
        MasterXFadeSelectCommand::new(1, 0).execute(&mut engine);
        assert_eq!((engine.crossfade.left, engine.crossfade.right), (1, 0));
        MasterXFadeSelectCommand::new(0, 5).execute(&mut engine);
        assert_eq!((engine.crossfade.left, engine.crossfade.right), (1, 0));
    }

    #[test]
    fn test_sync_to_player_sets_tempo() {
        let collector = Collector::new();
        let handle = collector.handle();
        let mut engine = engine();
        let audio = Shared::new(&handle, AudioBuffer::new(vec![Default::default(); 100_000], 44100));
        // 24000 frames per beat at 44.1k = 110.25 BPM
        let grid = Shared::new(&handle, BeatBuffer::constant(110.25, 44100, 0.0, 100_000));
        PlayerLoadCommand::new(0, Some(audio), Some(grid)).execute(&mut engine);

        let mut command = MasterSyncToPlayerCommand::new(0);
        command.execute(&mut engine);
        assert!((engine.transport.bpm() - 110.25).abs() < 1e-9);
        assert!(engine.players[0].is_syncing());

        // No grid: nothing changes
        let mut command = MasterSyncToPlayerCommand::new(1);
        command.execute(&mut engine);
        assert!(command.bpm.is_none());
    }

    #[test]
    fn test_transport_commands() {
        let mut engine = engine();
        TransportBpmCommand::new(128.0).execute(&mut engine);
        assert_eq!(engine.transport.bpm(), 128.0);
        TransportPositionCommand::new(TimePoint::at_bar(2)).execute(&mut engine);
        assert_eq!(engine.transport.position().whole_beats(), 8);
    }
}
