//! Cancellable periodic timer.
//!
//! Runs a callback every `period` on its own core-pinned thread.  Used by
//! the polling transport (fetch tick) and the alert blinker (toggle tick).
//!
//! Cancellation sets a flag and wakes the thread; the thread exits before
//! the next tick.  A callback already in flight (e.g. a blocking HTTP
//! request) is not interrupted, so consumers tag what the callback
//! produces with an id and discard stale results themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::task_pin::{TaskSpec, spawn_on_core};

pub struct PeriodicTimer {
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Start ticking.  The first tick fires one `period` after the call.
    ///
    /// The stack in `task` must cover whatever `on_tick` does (an HTTPS
    /// request needs far more than a queue push).
    pub fn start(
        task: TaskSpec,
        period: Duration,
        mut on_tick: impl FnMut() + Send + 'static,
    ) -> std::io::Result<Self> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let handle = spawn_on_core(task, move || {
            let mut next = Instant::now() + period;
            loop {
                // Sleep until the deadline, waking early on cancel.
                loop {
                    if flag.load(Ordering::Acquire) {
                        return;
                    }
                    let now = Instant::now();
                    if now >= next {
                        break;
                    }
                    std::thread::park_timeout(next - now);
                }

                on_tick();

                next += period;
                let now = Instant::now();
                if next <= now {
                    // Overran (slow callback); skip the missed ticks.
                    next = now + period;
                }
            }
        })?;

        Ok(Self {
            cancelled,
            handle: Some(handle),
        })
    }

    /// Stop the timer.  Idempotent.
    ///
    /// A tick that already passed its deadline may still complete; no
    /// later tick runs.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| !h.is_finished() && !self.cancelled.load(Ordering::Acquire))
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
