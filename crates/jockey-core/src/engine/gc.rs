//! Deferred release of shared audio data
//!
//! Decoded audio and beat grids are shared as `basedrop::Shared<T>`. Dropping
//! the last reference anywhere (including the render thread) only enqueues the
//! allocation; the memory is freed when the pool is collected, which the
//! done-action pass does on its non-realtime thread.
//!
//! ```ignore
//! let pool = ReleasePool::new();
//! let audio = Shared::new(&pool.handle(), AudioBuffer::new(samples, 44100));
//! drop(audio);            // queued, not freed
//! assert_eq!(pool.collect(), 1);
//! ```

use basedrop::{Collector, Handle};

/// Owner of the collector that frees shared buffers
///
/// `Send` but not `Sync`: it lives on whichever thread runs the done pass.
pub struct ReleasePool {
    collector: Collector,
}

impl ReleasePool {
    pub fn new() -> Self {
        Self {
            collector: Collector::new(),
        }
    }

    /// Handle for wrapping new allocations in `Shared<T>`; cheap to clone
    pub fn handle(&self) -> Handle {
        self.collector.handle()
    }

    /// Free everything released so far; returns how many allocations were freed
    pub fn collect(&mut self) -> usize {
        let mut released = 0;
        while self.collector.collect_one() {
            released += 1;
        }
        released
    }
}

impl Default for ReleasePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReleasePool {
    fn drop(&mut self) {
        let released = self.collect();
        if released > 0 {
            log::debug!("Release pool freed {} allocations on shutdown", released);
        }
    }
}
