//! Time-ordered command queue
//!
//! [`channel`] splits the scheduler into three ends with fixed thread roles:
//!
//! - [`Scheduler`]: cloneable producer handle. Any non-realtime thread may
//!   `schedule`, `execute` or `remove`.
//! - [`Dispatcher`]: owned by the render thread. Once per frame it executes
//!   every command whose time has been reached and passes it on.
//! - [`DoneActions`]: owned by the single non-realtime consumer. Runs the
//!   done-hooks and frees whatever executed commands released.
//!
//! # Real-time safety
//!
//! The queue is a pre-allocated `VecDeque` behind a `parking_lot::Mutex`,
//! held only for a single insert, remove or pop. An atomic copy of the
//! earliest queued time lets the render thread skip the lock entirely on
//! frames where nothing is due. Commands passed to [`Scheduler::execute`] sort
//! ahead of every timed entry, so they run on the next frame wherever the
//! transport has moved. Executed commands travel to the consumer over an
//! `rtrb` ring; if that ring is full the render thread leaves due commands
//! queued rather than dropping (and freeing) anything.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use basedrop::Handle;
use parking_lot::Mutex;
use rtrb::PushError;

use crate::config::EngineConfig;
use crate::events::EventSender;
use crate::music::TimePoint;

use super::command::{Command, DoneContext};
use super::gc::ReleasePool;
use super::transport::TransportAtomics;
use super::EngineState;

/// Slack when comparing a command's time against the transport
const DUE_EPSILON: f64 = 1e-9;

/// Identifies a scheduled command for [`Scheduler::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(u64);

/// Queue key for commands that run on the next frame
const IMMEDIATE: f64 = f64::NEG_INFINITY;

struct Entry {
    /// Absolute position in beats, resolved when scheduled
    beats: f64,
    seq: u64,
    command: Box<dyn Command>,
}

struct Queue {
    entries: Mutex<VecDeque<Entry>>,
    /// Bits of the front entry's `beats`, +inf when empty
    earliest: AtomicU64,
    next_seq: AtomicU64,
}

impl Queue {
    fn update_earliest(&self, entries: &VecDeque<Entry>) {
        let earliest = entries.front().map_or(f64::INFINITY, |e| e.beats);
        self.earliest.store(earliest.to_bits(), Ordering::Release);
    }

    fn earliest(&self) -> f64 {
        f64::from_bits(self.earliest.load(Ordering::Acquire))
    }
}

/// A command the render thread has executed, on its way to the done pass
struct Executed {
    command: Box<dyn Command>,
    executed_at: TimePoint,
}

/// Producer handle; clone freely across threads
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<Queue>,
    transport: Arc<TransportAtomics>,
}

impl Scheduler {
    /// Queue `command` to run at `time`
    ///
    /// Relative times are resolved now, against the last transport state the
    /// render thread published; frame times are converted to beats with the
    /// current tempo. Times already passed run on the next frame.
    pub fn schedule(&self, time: TimePoint, command: impl Command) -> CommandHandle {
        self.schedule_boxed(time, Box::new(command))
    }

    pub fn schedule_boxed(&self, time: TimePoint, command: Box<dyn Command>) -> CommandHandle {
        let resolved = self.transport.snapshot().resolve(&time);
        self.insert(resolved.whole_beats() as f64 + resolved.pos_in_beat(), command)
    }

    /// Run `command` at the next opportunity
    ///
    /// Independent of the transport position, so a transport moved backwards
    /// since the last publish does not hold the command back.
    pub fn execute(&self, command: impl Command) -> CommandHandle {
        self.insert(IMMEDIATE, Box::new(command))
    }

    fn insert(&self, beats: f64, command: Box<dyn Command>) -> CommandHandle {
        let mut entries = self.queue.entries.lock();
        let seq = self.queue.next_seq.fetch_add(1, Ordering::Relaxed);
        // After every entry at the same time: FIFO among equals
        let index = entries.partition_point(|e| e.beats <= beats);
        entries.insert(index, Entry { beats, seq, command });
        self.queue.update_earliest(&entries);
        CommandHandle(seq)
    }

    /// Cancel a command that has not run yet
    ///
    /// Returns false if it already ran or was already removed. A removed
    /// command is dropped on the calling thread; neither its `execute` nor
    /// its `execute_done` is called.
    pub fn remove(&self, handle: CommandHandle) -> bool {
        let removed = {
            let mut entries = self.queue.entries.lock();
            let removed = entries
                .iter()
                .position(|e| e.seq == handle.0)
                .and_then(|index| entries.remove(index));
            self.queue.update_earliest(&entries);
            removed
        };
        removed.is_some()
    }

    /// Number of commands waiting
    pub fn len(&self) -> usize {
        self.queue.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Transport position as last published by the render thread
    pub fn now(&self) -> TimePoint {
        self.transport.now()
    }

    pub fn transport(&self) -> &Arc<TransportAtomics> {
        &self.transport
    }
}

/// Render-thread end: executes due commands
pub struct Dispatcher {
    queue: Arc<Queue>,
    done_tx: rtrb::Producer<Executed>,
    /// Executed command the ring refused; handed on before anything else runs
    stalled: Option<Executed>,
}

impl Dispatcher {
    /// Execute every due command in time order; returns how many ran
    ///
    /// Allocation-free. The queue lock is taken once per popped command and
    /// only when the earliest entry is due.
    pub fn run_due(&mut self, engine: &mut EngineState) -> usize {
        if let Some(executed) = self.stalled.take() {
            if let Err(PushError::Full(executed)) = self.done_tx.push(executed) {
                self.stalled = Some(executed);
                return 0;
            }
        }

        let mut ran = 0;
        loop {
            let now = engine.transport.position_beats() + DUE_EPSILON;
            if now < self.queue.earliest() || self.done_tx.slots() == 0 {
                break;
            }

            let entry = {
                let mut entries = self.queue.entries.lock();
                match entries.front() {
                    Some(front) if front.beats <= now => {}
                    _ => break,
                }
                let entry = entries.pop_front();
                self.queue.update_earliest(&entries);
                entry
            };
            let Some(Entry { mut command, .. }) = entry else {
                break;
            };

            let executed_at = *engine.transport.position();
            command.execute(engine);
            ran += 1;
            // Never dropped here: a refused command waits in `stalled`
            if let Err(PushError::Full(executed)) = self.done_tx.push(Executed {
                command,
                executed_at,
            }) {
                self.stalled = Some(executed);
                break;
            }
        }
        ran
    }
}

/// Summary of one done-action pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DoneReport {
    /// Commands whose done-hook ran
    pub executed: usize,
    /// Shared allocations freed
    pub released: usize,
}

/// Non-realtime end: runs done-hooks and frees released buffers
pub struct DoneActions {
    done_rx: rtrb::Consumer<Executed>,
    pool: ReleasePool,
    events: EventSender,
}

impl DoneActions {
    /// Handle for wrapping buffers so their release lands in this pass
    pub fn handle(&self) -> Handle {
        self.pool.handle()
    }

    /// Finish every command executed since the last call
    ///
    /// Each command's done-hook runs, then the command is dropped here along
    /// with anything it displaced; finally released buffers are freed.
    pub fn execute_done_actions(&mut self) -> DoneReport {
        let mut report = DoneReport::default();
        while let Ok(Executed {
            mut command,
            executed_at,
        }) = self.done_rx.pop()
        {
            let mut ctx = DoneContext::new(executed_at, &self.events);
            command.execute_done(&mut ctx);
            drop(command);
            report.executed += 1;
        }
        report.released = self.pool.collect();
        report
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }
}

/// Build the three scheduler ends
pub fn channel(
    config: &EngineConfig,
    transport: Arc<TransportAtomics>,
    events: EventSender,
) -> (Scheduler, Dispatcher, DoneActions) {
    let queue = Arc::new(Queue {
        entries: Mutex::new(VecDeque::with_capacity(config.scheduler_capacity)),
        earliest: AtomicU64::new(f64::INFINITY.to_bits()),
        next_seq: AtomicU64::new(0),
    });
    let (done_tx, done_rx) = rtrb::RingBuffer::new(config.done_queue_capacity.max(1));

    (
        Scheduler {
            queue: Arc::clone(&queue),
            transport,
        },
        Dispatcher {
            queue,
            done_tx,
            stalled: None,
        },
        DoneActions {
            done_rx,
            pool: ReleasePool::new(),
            events,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::atomic::AtomicUsize;

    /// Records the order it ran in
    struct Tracer {
        id: usize,
        log: Arc<Mutex<Vec<usize>>>,
        done: Arc<AtomicUsize>,
    }

    impl Command for Tracer {
        fn execute(&mut self, _engine: &mut EngineState) {
            self.log.lock().push(self.id);
        }

        fn execute_done(&mut self, _ctx: &mut DoneContext<'_>) {
            self.done.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        dispatcher: Dispatcher,
        done: DoneActions,
        engine: EngineState,
        log: Arc<Mutex<Vec<usize>>>,
        done_count: Arc<AtomicUsize>,
        _bus: EventBus,
    }

    impl Fixture {
        fn new(config: EngineConfig) -> Self {
            let bus = EventBus::new(64);
            let atomics = Arc::new(TransportAtomics::new());
            let (scheduler, dispatcher, done) = channel(&config, atomics, bus.sender());
            Self {
                scheduler,
                dispatcher,
                done,
                engine: EngineState::new(&config),
                log: Arc::default(),
                done_count: Arc::default(),
                _bus: bus,
            }
        }

        fn tracer(&self, id: usize) -> Tracer {
            Tracer {
                id,
                log: Arc::clone(&self.log),
                done: Arc::clone(&self.done_count),
            }
        }

        fn tick(&mut self, frames: usize) {
            for _ in 0..frames {
                self.engine.transport.tick();
                self.dispatcher.run_due(&mut self.engine);
            }
        }
    }

    #[test]
    fn test_executes_in_time_order() {
        let mut f = Fixture::new(EngineConfig::default());
        f.scheduler.schedule(TimePoint::at_bar_beat(0, 2), f.tracer(2));
        f.scheduler.schedule(TimePoint::at_bar_beat(0, 1), f.tracer(1));
        f.scheduler.schedule(TimePoint::from_beats(0.5, 4), f.tracer(0));

        f.tick(22050 * 3);
        assert_eq!(*f.log.lock(), vec![0, 1, 2]);
        assert!(f.scheduler.is_empty());
    }

    #[test]
    fn test_equal_times_keep_submission_order() {
        let mut f = Fixture::new(EngineConfig::default());
        for id in 0..8 {
            f.scheduler.schedule(TimePoint::at_bar(1), f.tracer(id));
        }
        f.tick(22050 * 4);
        assert_eq!(*f.log.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_not_due_before_time() {
        let mut f = Fixture::new(EngineConfig::default());
        f.scheduler.schedule(TimePoint::at_bar_beat(0, 1), f.tracer(1));
        f.tick(22049);
        assert!(f.log.lock().is_empty());
        f.tick(1);
        assert_eq!(*f.log.lock(), vec![1]);
    }

    #[test]
    fn test_removed_command_never_runs() {
        let mut f = Fixture::new(EngineConfig::default());
        let handle = f.scheduler.schedule(TimePoint::at_bar_beat(0, 1), f.tracer(1));
        f.scheduler.schedule(TimePoint::at_bar_beat(0, 1), f.tracer(2));
        assert!(f.scheduler.remove(handle));
        assert!(!f.scheduler.remove(handle));

        f.tick(22050);
        let report = f.done.execute_done_actions();
        assert_eq!(*f.log.lock(), vec![2]);
        assert_eq!(report.executed, 1);
        assert_eq!(f.done_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_remove_after_execution_is_noop() {
        let mut f = Fixture::new(EngineConfig::default());
        let handle = f.scheduler.execute(f.tracer(1));
        f.tick(1);
        assert!(!f.scheduler.remove(handle));
        assert_eq!(f.done.execute_done_actions().executed, 1);
    }

    #[test]
    fn test_full_done_ring_holds_commands_back() {
        let config = EngineConfig {
            done_queue_capacity: 2,
            ..Default::default()
        };
        let mut f = Fixture::new(config);
        for id in 0..5 {
            f.scheduler.execute(f.tracer(id));
        }
        f.tick(4);
        assert_eq!(*f.log.lock(), vec![0, 1]);
        assert_eq!(f.scheduler.len(), 3);

        assert_eq!(f.done.execute_done_actions().executed, 2);
        f.tick(1);
        assert_eq!(*f.log.lock(), vec![0, 1, 2, 3]);
        f.done.execute_done_actions();
        f.tick(1);
        assert_eq!(*f.log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_relative_time_resolves_when_scheduled() {
        let mut f = Fixture::new(EngineConfig::default());
        let atomics = Arc::clone(f.scheduler.transport());

        // Transport at beat 2 when the command is scheduled
        f.tick(22050 * 2);
        f.engine.transport.publish(&atomics);
        f.scheduler.schedule(TimePoint::beats_from_now(1.0), f.tracer(7));

        // Publishing a later position does not move the command
        f.tick(22050 / 2);
        f.engine.transport.publish(&atomics);
        f.tick(22050 / 2 - 1);
        assert!(f.log.lock().is_empty());
        f.tick(1);
        assert_eq!(*f.log.lock(), vec![7]);
    }

    #[test]
    fn test_execute_ignores_published_position() {
        let mut f = Fixture::new(EngineConfig::default());
        let atomics = Arc::clone(f.scheduler.transport());
        f.tick(22050 * 8);
        f.engine.transport.publish(&atomics);

        // Rewound on the render side; the published snapshot still says beat 8
        f.engine.transport.set_position(TimePoint::at_bar(0));
        f.scheduler.execute(f.tracer(1));
        f.scheduler.execute(f.tracer(2));
        f.tick(1);
        assert_eq!(*f.log.lock(), vec![1, 2]);
        assert!(f.scheduler.is_empty());
    }
}
