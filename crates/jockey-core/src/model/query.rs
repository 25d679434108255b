//! State query: a command that samples the engine for observers

use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{Command, DoneContext, EngineState};
use crate::music::TimePoint;

use super::state::{ModelState, PlayerSnapshot};

/// Captures deck positions, speeds and peak levels on the render thread,
/// then folds them into the model cache during the done pass
///
/// Snapshot storage is allocated when the query is built, so `execute`
/// only copies. Never stored.
pub(crate) struct QueryPlayState {
    players: Vec<PlayerSnapshot>,
    master_level: f32,
    transport: TimePoint,
    captured: bool,
    state: Arc<Mutex<ModelState>>,
}

impl QueryPlayState {
    pub fn new(num_players: usize, state: Arc<Mutex<ModelState>>) -> Self {
        Self {
            players: vec![PlayerSnapshot::default(); num_players],
            master_level: 0.0,
            transport: TimePoint::default(),
            captured: false,
            state,
        }
    }
}

impl Command for QueryPlayState {
    fn execute(&mut self, engine: &mut EngineState) {
        self.transport = *engine.transport.position();
        self.master_level = engine.take_max_sample();
        for (snapshot, player) in self.players.iter_mut().zip(engine.players.iter_mut()) {
            snapshot.frame = player.frame();
            snapshot.speed = player.speed();
            snapshot.level = player.take_max_sample();
            snapshot.play_state = player.play_state();
        }
        self.captured = true;
    }

    fn execute_done(&mut self, ctx: &mut DoneContext<'_>) {
        if !self.captured {
            return;
        }
        let events = ctx.events();
        let mut state = self.state.lock();
        for (player, snapshot) in self.players.iter().enumerate() {
            state.update_player(player, snapshot, events);
        }
        state.update_master(self.master_level, self.transport, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_query_resets_meters() {
        let config = EngineConfig::default();
        let mut engine = EngineState::new(&config);
        engine.max_sample = 0.75;

        let state = Arc::new(Mutex::new(ModelState::new(&config)));
        let mut query = QueryPlayState::new(config.num_players, state);
        query.execute(&mut engine);

        assert_eq!(query.master_level, 0.75);
        assert_eq!(engine.max_sample, 0.0);
        assert_eq!(query.players.len(), 2);
        assert_eq!(query.players[0].speed, engine.players[0].speed());
    }
}
