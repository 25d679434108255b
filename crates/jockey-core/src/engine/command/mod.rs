//! Commands: timed state changes applied by the render thread
//!
//! Any thread may build a command and hand it to the
//! [`Scheduler`](super::Scheduler). When its time arrives the render thread
//! calls [`Command::execute`], which must be real-time safe: no allocation,
//! no freeing, no locks, no I/O. The command is then passed back to the
//! done-action pass, which calls [`Command::execute_done`] on a non-realtime
//! thread and drops it there. Anything a command displaced (buffers, for
//! instance) stays inside it until then, so it is freed off the render thread.
//!
//! # Lifecycle
//!
//! ```text
//! producer ──schedule──▶ queue ──execute (audio)──▶ done ring ──execute_done──▶ drop
//! ```
//!
//! Invalid player indices make `execute` a no-op; commands never fail.

mod master;
mod player;
mod store;

pub use master::*;
pub use player::*;
pub use store::{restore, store_named, CommandIoData};

use crate::events::{EngineEvent, EventSender};
use crate::music::TimePoint;

use super::EngineState;

/// A timed state change
pub trait Command: Send + 'static {
    /// Apply the change (render thread, real-time safe)
    fn execute(&mut self, engine: &mut EngineState);

    /// Deferred follow-up after `execute` (non-realtime thread)
    ///
    /// Typically emits change notifications. Runs before the command is dropped.
    fn execute_done(&mut self, _ctx: &mut DoneContext<'_>) {}

    /// Write kind, target and value into `data` for automation/undo storage
    ///
    /// Returns false when this kind of command cannot be stored.
    fn store(&self, _data: &mut CommandIoData) -> bool {
        false
    }
}

/// What a done-hook gets to see
pub struct DoneContext<'a> {
    executed_at: TimePoint,
    events: &'a EventSender,
}

impl<'a> DoneContext<'a> {
    pub(crate) fn new(executed_at: TimePoint, events: &'a EventSender) -> Self {
        Self { executed_at, events }
    }

    /// Transport position on the frame the command ran
    pub fn executed_at(&self) -> TimePoint {
        self.executed_at
    }

    pub fn emit(&mut self, event: EngineEvent) {
        self.events.emit(event);
    }

    pub fn events(&self) -> &EventSender {
        self.events
    }
}
