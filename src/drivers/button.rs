//! Debounced button input.
//!
//! ## Hardware
//!
//! Active-low momentary switch with the internal pull-up enabled.  A
//! press pulls the line low (falling edge); contact bounce produces a
//! burst of edges in both directions for a few milliseconds.
//!
//! ## Debounce rule
//!
//! Every raw edge restarts a 50 ms quiet window.  An edge is significant
//! only if the previous raw edge is at least 50 ms old (the line had
//! settled), and only falling edges become [`ButtonEvent::Press`].
//!
//! ```text
//! level ‾‾‾‾\_/‾\__________________/‾\_/‾‾‾‾‾
//! edges     F R F                  R F R
//!           ▲ └─┴─ bounce          └─┴─┴─ release (rising = ignored)
//!           press
//! ```
//!
//! The debouncer state lives in atomics so it can be fed from an
//! interrupt-adjacent context through a shared reference.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use log::{error, info};

use crate::drivers::task_pin::{BUTTON_TASK, spawn_on_core};
use crate::events::{Event, EventQueue};

/// Quiet period after any raw edge, in milliseconds.
pub const DEBOUNCE_MS: u32 = 50;

/// Direction of a raw transition on the button line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Falling,
    Rising,
}

/// One logical press after debouncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Press,
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

pub struct Debouncer {
    quiet_ms: u32,
    last_edge_ms: AtomicU32,
    seen_edge: AtomicBool,
}

impl Debouncer {
    pub const fn new(quiet_ms: u32) -> Self {
        Self {
            quiet_ms,
            last_edge_ms: AtomicU32::new(0),
            seen_edge: AtomicBool::new(false),
        }
    }

    /// Feed one raw edge observed at `now_ms` (wrapping millisecond clock).
    pub fn on_edge(&self, edge: Edge, now_ms: u32) -> Option<ButtonEvent> {
        let prev_ms = self.last_edge_ms.swap(now_ms, Ordering::AcqRel);
        let had_prev = self.seen_edge.swap(true, Ordering::AcqRel);
        let settled = !had_prev || now_ms.wrapping_sub(prev_ms) >= self.quiet_ms;
        (settled && edge == Edge::Falling).then_some(ButtonEvent::Press)
    }

    /// Forget edge history.
    pub fn reset(&self) {
        self.seen_edge.store(false, Ordering::Release);
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_MS)
    }
}

// ---------------------------------------------------------------------------
// Edge sources
// ---------------------------------------------------------------------------

/// Blocking source of raw edges with their timestamps (ms since boot).
pub trait EdgeSource {
    /// Wait for the next edge.  `None` ends the sequence.
    fn next_edge(&mut self) -> Option<(Edge, u32)>;
}

/// Edges from a GPIO input, waited on with `embedded_hal_async`.
///
/// The direction is read back from the pin level right after the wake-up.
pub struct PinEdges<P, C> {
    pin: P,
    clock: C,
}

impl<P, C> PinEdges<P, C>
where
    P: embedded_hal::digital::InputPin + embedded_hal_async::digital::Wait,
    C: FnMut() -> u32,
{
    pub fn new(pin: P, clock: C) -> Self {
        Self { pin, clock }
    }
}

impl<P, C> EdgeSource for PinEdges<P, C>
where
    P: embedded_hal::digital::InputPin + embedded_hal_async::digital::Wait,
    C: FnMut() -> u32,
{
    fn next_edge(&mut self) -> Option<(Edge, u32)> {
        if let Err(e) = futures_lite::future::block_on(self.pin.wait_for_any_edge()) {
            error!("Button: edge wait failed: {:?}", e);
            return None;
        }
        let now = (self.clock)();
        let edge = match self.pin.is_low() {
            Ok(true) => Edge::Falling,
            Ok(false) => Edge::Rising,
            Err(e) => {
                error!("Button: level read failed: {:?}", e);
                return None;
            }
        };
        Some((edge, now))
    }
}

// ---------------------------------------------------------------------------
// Press sequence
// ---------------------------------------------------------------------------

/// Lazy, unbounded sequence of debounced presses.
///
/// Infinite for a real pin; ends only when the edge source does.
pub struct ButtonEvents<S> {
    source: S,
    debouncer: Debouncer,
}

impl<S: EdgeSource> ButtonEvents<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            debouncer: Debouncer::default(),
        }
    }

    /// Start over with a clean debounce history (e.g. after the task was
    /// paused and old edges are meaningless).
    pub fn restart(&mut self) {
        self.debouncer.reset();
    }
}

impl<S: EdgeSource> Iterator for ButtonEvents<S> {
    type Item = ButtonEvent;

    fn next(&mut self) -> Option<ButtonEvent> {
        loop {
            let (edge, at_ms) = self.source.next_edge()?;
            if let Some(event) = self.debouncer.on_edge(edge, at_ms) {
                return Some(event);
            }
        }
    }
}

/// Run the press sequence on its own thread, feeding the event queue.
pub fn spawn_button_task<S>(events: ButtonEvents<S>, queue: EventQueue) -> std::io::Result<()>
where
    S: EdgeSource + Send + 'static,
{
    spawn_on_core(BUTTON_TASK, move || {
        for event in events {
            queue.push(Event::Button(event));
        }
        info!("Button: edge source ended");
    })?;
    Ok(())
}
