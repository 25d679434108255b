//! The non-realtime consumer
//!
//! Periodically queues a state query and runs the done-action pass, which
//! frees released buffers and delivers notifications. Audibility is
//! re-evaluated on a slower cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::engine::{DoneActions, DoneReport, Scheduler};
use crate::error::ModelError;

use super::query::QueryPlayState;
use super::state::ModelState;

/// Owner of the done-action pass
///
/// Drive it by hand with [`Consumer::poll`] (offline rendering, tests) or
/// move it onto its own thread with [`ConsumerThread::spawn`].
pub struct Consumer {
    done_actions: DoneActions,
    scheduler: Scheduler,
    state: Arc<Mutex<ModelState>>,
    num_players: usize,
}

impl Consumer {
    pub(crate) fn new(
        done_actions: DoneActions,
        scheduler: Scheduler,
        state: Arc<Mutex<ModelState>>,
        num_players: usize,
    ) -> Self {
        Self {
            done_actions,
            scheduler,
            state,
            num_players,
        }
    }

    /// Queue a state query, then finish every executed command
    ///
    /// The query queued here is answered by the render thread and folded in
    /// on the next poll.
    pub fn poll(&mut self) -> DoneReport {
        self.scheduler
            .execute(QueryPlayState::new(self.num_players, Arc::clone(&self.state)));
        self.done_actions.execute_done_actions()
    }

    /// Re-evaluate which decks can be heard, emitting changes
    pub fn eval_audible(&self) {
        self.state.lock().eval_audible(self.done_actions.events());
    }

    /// Finish outstanding commands without queuing a new query
    pub fn drain(&mut self) -> DoneReport {
        self.done_actions.execute_done_actions()
    }

    pub fn into_done_actions(self) -> DoneActions {
        self.done_actions
    }
}

/// A [`Consumer`] running on its own thread
///
/// Stops and joins when dropped.
pub struct ConsumerThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Consumer>>,
}

impl ConsumerThread {
    pub fn spawn(
        mut consumer: Consumer,
        poll_interval: Duration,
        audible_interval: Duration,
    ) -> Result<Self, ModelError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let name = "jockey-consumer".to_string();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                log::info!(
                    "Consumer thread started (poll {:?}, audible {:?})",
                    poll_interval,
                    audible_interval
                );
                let mut last_audible = Instant::now();
                while !shutdown_clone.load(Ordering::Relaxed) {
                    let report = consumer.poll();
                    if report.released > 0 {
                        log::debug!("Done pass released {} buffers", report.released);
                    }
                    if last_audible.elapsed() >= audible_interval {
                        consumer.eval_audible();
                        last_audible = Instant::now();
                    }
                    thread::sleep(poll_interval);
                }
                consumer.drain();
                log::info!("Consumer thread exiting");
                consumer
            })
            .map_err(|source| ModelError::Spawn { name, source })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Signal the thread, wait for it and take the consumer back
    pub fn stop(mut self) -> Option<Consumer> {
        self.join()
    }

    fn join(&mut self) -> Option<Consumer> {
        self.shutdown.store(true, Ordering::Relaxed);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(consumer) => Some(consumer),
            Err(_) => {
                log::error!("Consumer thread panicked");
                None
            }
        }
    }
}

impl Drop for ConsumerThread {
    fn drop(&mut self) {
        self.join();
    }
}
