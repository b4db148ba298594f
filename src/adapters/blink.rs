//! Alert blink tick source.
//!
//! Implements [`BlinkScheduler`] on top of a [`PeriodicTimer`].  Every tick
//! is pushed onto the engine's queue as `BlinkTick { session }`; the engine
//! drops ticks whose session is no longer current, so a tick that races
//! with `stop_blink` is harmless.

use std::time::Duration;

use log::{debug, error};

use crate::app::ports::BlinkScheduler;
use crate::drivers::task_pin::BLINK_TASK;
use crate::drivers::timer::PeriodicTimer;
use crate::events::{Event, EventQueue};

pub struct TimerBlinker {
    queue: EventQueue,
    timer: Option<PeriodicTimer>,
}

impl TimerBlinker {
    pub fn new(queue: EventQueue) -> Self {
        Self { queue, timer: None }
    }

    pub fn is_blinking(&self) -> bool {
        self.timer.as_ref().is_some_and(PeriodicTimer::is_running)
    }
}

impl BlinkScheduler for TimerBlinker {
    fn start_blink(&mut self, session: u32, period_ms: u32) {
        self.stop_blink();
        let queue = self.queue.clone();
        match PeriodicTimer::start(
            BLINK_TASK,
            Duration::from_millis(u64::from(period_ms)),
            move || {
                queue.push(Event::BlinkTick { session });
            },
        ) {
            Ok(timer) => {
                debug!("Blink: session {} every {} ms", session, period_ms);
                self.timer = Some(timer);
            }
            // The light stays on the first blink phase; the button still
            // ends the alert.
            Err(e) => error!("Blink: timer start failed: {}", e),
        }
    }

    fn stop_blink(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }
}
