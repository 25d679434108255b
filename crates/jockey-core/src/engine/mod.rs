//! Audio engine - transport, scheduler, players and master mix
//!
//! This module contains the render-thread half of jockey:
//! - Transport: the tempo clock, ticked once per frame
//! - Scheduler: time-ordered command queue with deferred done-actions
//! - Commands: the only way other threads change engine state
//! - Player: per-deck playback, looping, beat sync and EQ
//! - Master: per-block loop, crossfader and metering
//!
//! [`EngineContext::new`] builds all of it once at startup. There are no
//! globals: the context's parts are handed to the threads that own them.

pub mod command;
mod eq;
mod gc;
mod master;
mod player;
mod scheduler;
mod transport;

use std::sync::Arc;

pub use command::*;
pub use eq::{eq_dial_to_db, eq_dial_to_db_default, EqBand, ThreeBandEq, EQ_MAX_BOOST_DB, EQ_MAX_CUT_DB};
pub use gc::ReleasePool;
pub use master::*;
pub use player::*;
pub use scheduler::{channel, CommandHandle, Dispatcher, DoneActions, DoneReport, Scheduler};
pub use transport::*;

use crate::config::EngineConfig;
use crate::events::EventBus;

/// The engine, split by thread
///
/// - `master` goes to the render thread (audio callback)
/// - `scheduler` is cloned into every producer thread
/// - `done_actions` goes to the single non-realtime consumer
/// - `transport` and `events` are read by observers
pub struct EngineContext {
    pub config: EngineConfig,
    pub master: Master,
    pub scheduler: Scheduler,
    pub done_actions: DoneActions,
    pub transport: Arc<TransportAtomics>,
    pub events: EventBus,
}

impl EngineContext {
    pub fn new(config: &EngineConfig) -> Self {
        let config = config.clone().sanitized();
        let events = EventBus::new(config.event_capacity);
        let transport = Arc::new(TransportAtomics::new());
        let (scheduler, dispatcher, done_actions) =
            channel(&config, Arc::clone(&transport), events.sender());
        let master = Master::new(&config, dispatcher, Arc::clone(&transport));

        log::info!(
            "Engine ready: {} players at {} Hz, {:.1} BPM",
            config.num_players,
            config.sample_rate,
            config.initial_bpm
        );

        Self {
            config,
            master,
            scheduler,
            done_actions,
            transport,
            events,
        }
    }
}
