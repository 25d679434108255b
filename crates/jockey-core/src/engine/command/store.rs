//! Command persistence for automation and undo
//!
//! A stored command is a flat YAML mapping: `kind` plus the command's target
//! and value, e.g.
//!
//! ```yaml
//! name: drop the bass
//! kind: player_double
//! player: 1
//! action: eq_low
//! value: -70.0
//! ```
//!
//! Commands holding buffers or engine snapshots decline to be stored.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::engine::{PositionTarget, StretchMethod};
use crate::music::TimePoint;

use super::{
    Command, MasterBoolAction, MasterBoolCommand, MasterDoubleAction, MasterDoubleCommand,
    MasterSyncToPlayerCommand, MasterXFadeSelectCommand, PlayerDoubleAction, PlayerDoubleCommand,
    PlayerPositionCommand, PlayerStateAction, PlayerStateCommand, PlayerStretchCommand,
    TransportBpmCommand, TransportPositionCommand,
};

/// Storage format of a command
pub type CommandIoData = Mapping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum StoredCommand {
    PlayerState {
        player: usize,
        action: PlayerStateAction,
    },
    PlayerDouble {
        player: usize,
        action: PlayerDoubleAction,
        value: f64,
    },
    PlayerPosition {
        player: usize,
        target: PositionTarget,
        time: TimePoint,
    },
    PlayerStretch {
        player: usize,
        method: StretchMethod,
    },
    MasterBool {
        action: MasterBoolAction,
    },
    MasterDouble {
        action: MasterDoubleAction,
        value: f64,
    },
    MasterXfadeSelect {
        left: usize,
        right: usize,
    },
    MasterSyncToPlayer {
        player: usize,
    },
    TransportBpm {
        bpm: f64,
    },
    TransportPosition {
        time: TimePoint,
    },
}

impl StoredCommand {
    /// Merge into `data`; false if serialization failed
    pub(crate) fn write(&self, data: &mut CommandIoData) -> bool {
        match serde_yaml::to_value(self) {
            Ok(Value::Mapping(mapping)) => {
                data.extend(mapping);
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::warn!("Failed to store command {:?}: {}", self, e);
                false
            }
        }
    }

    fn into_command(self) -> Box<dyn Command> {
        match self {
            StoredCommand::PlayerState { player, action } => {
                Box::new(PlayerStateCommand::new(player, action))
            }
            StoredCommand::PlayerDouble {
                player,
                action,
                value,
            } => Box::new(PlayerDoubleCommand::new(player, action, value)),
            StoredCommand::PlayerPosition {
                player,
                target,
                time,
            } => Box::new(PlayerPositionCommand::new(player, target, time)),
            StoredCommand::PlayerStretch { player, method } => {
                Box::new(PlayerStretchCommand::new(player, method))
            }
            StoredCommand::MasterBool { action } => Box::new(MasterBoolCommand::new(action)),
            StoredCommand::MasterDouble { action, value } => {
                Box::new(MasterDoubleCommand::new(action, value))
            }
            StoredCommand::MasterXfadeSelect { left, right } => {
                Box::new(MasterXFadeSelectCommand::new(left, right))
            }
            StoredCommand::MasterSyncToPlayer { player } => {
                Box::new(MasterSyncToPlayerCommand::new(player))
            }
            StoredCommand::TransportBpm { bpm } => Box::new(TransportBpmCommand::new(bpm)),
            StoredCommand::TransportPosition { time } => {
                Box::new(TransportPositionCommand::new(time))
            }
        }
    }
}

/// Store `command` under `name`; `None` when the command declines
pub fn store_named(command: &dyn Command, name: &str) -> Option<CommandIoData> {
    let mut data = CommandIoData::new();
    if !command.store(&mut data) {
        return None;
    }
    data.insert(Value::from("name"), Value::from(name));
    Some(data)
}

/// Rebuild a command from stored data
pub fn restore(data: &CommandIoData) -> Option<Box<dyn Command>> {
    match serde_yaml::from_value::<StoredCommand>(Value::Mapping(data.clone())) {
        Ok(stored) => Some(stored.into_command()),
        Err(e) => {
            log::warn!("Cannot restore command: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::{EngineState, PlayerLoadCommand};

    #[test]
    fn test_stored_layout() {
        let command = PlayerDoubleCommand::new(1, PlayerDoubleAction::EqLow, -70.0);
        let data = store_named(&command, "drop the bass").unwrap();
        assert_eq!(data.get("name"), Some(&Value::from("drop the bass")));
        assert_eq!(data.get("kind"), Some(&Value::from("player_double")));
        assert_eq!(data.get("player"), Some(&Value::from(1)));
        assert_eq!(data.get("action"), Some(&Value::from("eq_low")));
        assert_eq!(data.get("value"), Some(&Value::from(-70.0)));
    }

    #[test]
    fn test_restored_command_behaves_like_original() {
        let stored = store_named(
            &PlayerPositionCommand::new(0, PositionTarget::LoopEnd, TimePoint::at_bar(2)),
            "loop end",
        )
        .unwrap();
        let mut restored = restore(&stored).unwrap();

        let mut engine = EngineState::new(&EngineConfig::default());
        restored.execute(&mut engine);
        // No audio loaded: every position clamps to frame 0
        assert_eq!(engine.players[0].loop_end().time, TimePoint::at_bar(2));
        assert_eq!(engine.players[0].loop_end().frame, 0);
    }

    #[test]
    fn test_declining_commands() {
        assert!(store_named(&PlayerLoadCommand::clear(0), "clear").is_none());

        let mut bogus = CommandIoData::new();
        bogus.insert(Value::from("kind"), Value::from("launch_rocket"));
        assert!(restore(&bogus).is_none());
    }

    #[test]
    fn test_master_commands_restore() {
        let data = store_named(&TransportBpmCommand::new(126.0), "tempo").unwrap();
        let mut restored = restore(&data).unwrap();
        let mut engine = EngineState::new(&EngineConfig::default());
        restored.execute(&mut engine);
        assert_eq!(engine.transport.bpm(), 126.0);
    }

    #[test]
    fn test_sync_to_player_is_stored() {
        let data = store_named(&MasterSyncToPlayerCommand::new(1), "follow b").unwrap();
        assert_eq!(data.get("kind"), Some(&Value::from("master_sync_to_player")));
        assert_eq!(data.get("player"), Some(&Value::from(1)));

        // Restores; a deck without a grid leaves the tempo alone
        let mut restored = restore(&data).unwrap();
        let mut engine = EngineState::new(&EngineConfig::default());
        let bpm = engine.transport.bpm();
        restored.execute(&mut engine);
        assert_eq!(engine.transport.bpm(), bpm);
    }
}
