//! Notifications from the engine to observers
//!
//! Events are produced off the render thread only: by command done-hooks
//! during the done-action pass, by the state query, and by loader threads.
//! Delivery is FIFO over a bounded crossbeam channel. Producers never block;
//! when the channel is full the event is dropped and a warning logged.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::engine::{
    MasterBoolAction, MasterDoubleAction, OutState, PlayState, PlayerDoubleAction,
    PlayerStateAction, PositionTarget, StretchMethod,
};
use crate::music::TimePoint;

/// Events broadcast to observers
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    // --- Player commands applied ---
    PlayerState {
        player: usize,
        action: PlayerStateAction,
    },
    PlayerValue {
        player: usize,
        action: PlayerDoubleAction,
        value: f64,
    },
    /// A position was applied; `executed_at` is the transport position it ran at
    PlayerPosition {
        player: usize,
        target: PositionTarget,
        frame: i64,
        executed_at: TimePoint,
    },
    PlayerStretch {
        player: usize,
        method: StretchMethod,
    },
    /// New buffers installed; `frames` is 0 when the deck was cleared
    PlayerBuffers {
        player: usize,
        frames: usize,
    },

    // --- Polled player state ---
    PlayerFrame {
        player: usize,
        frame: i64,
    },
    PlayerSpeed {
        player: usize,
        speed: f64,
    },
    PlayerLevel {
        player: usize,
        level: f32,
    },
    PlayerPlayState {
        player: usize,
        state: PlayState,
    },
    PlayerOutState {
        player: usize,
        state: OutState,
    },
    PlayerAudible {
        player: usize,
        audible: bool,
    },

    // --- Master ---
    MasterBool {
        action: MasterBoolAction,
    },
    MasterValue {
        action: MasterDoubleAction,
        value: f64,
    },
    CrossfadePlayers {
        left: usize,
        right: usize,
    },
    MasterLevel(f32),
    TransportPosition(TimePoint),
    Bpm(f64),

    // --- Jump slots ---
    JumpStored {
        player: usize,
        slot: usize,
        frame: i64,
    },
    JumpsCleared {
        player: usize,
    },

    // --- Loading ---
    LoadProgress {
        player: usize,
        percent: u8,
    },
    LoadFailed {
        player: usize,
        error: String,
    },
}

/// Sending side of the event channel
#[derive(Clone)]
pub struct EventSender {
    sender: Sender<EngineEvent>,
}

impl EventSender {
    /// Publish without blocking; returns false when the event was dropped
    pub fn emit(&self, event: EngineEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!("Event channel full, dropping {:?}", event);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Bounded event channel between the engine and its observers
pub struct EventBus {
    sender: Sender<EngineEvent>,
    receiver: Receiver<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = channel::bounded(capacity.max(1));
        Self { sender, receiver }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Receivers share one queue: each event goes to exactly one of them
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.receiver.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_fifo() {
        let bus = EventBus::new(8);
        let tx = bus.sender();
        let rx = bus.subscribe();
        assert!(tx.emit(EngineEvent::Bpm(120.0)));
        assert!(tx.emit(EngineEvent::MasterLevel(0.5)));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Bpm(120.0));
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::MasterLevel(0.5));
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let tx = bus.sender();
        assert!(tx.emit(EngineEvent::Bpm(120.0)));
        assert!(!tx.emit(EngineEvent::Bpm(121.0)));
        assert_eq!(bus.subscribe().len(), 1);
    }
}
