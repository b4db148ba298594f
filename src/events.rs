//! Event queue: the single serialization point of the firmware.
//!
//! Events are produced by:
//! - the button task (debounced presses)
//! - transports (polling timer, push stream, twin MQTT thread)
//! - the alert blink timer
//! - `main` (shutdown)
//!
//! and consumed one at a time by the engine on the main task.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Button task │────▶│              │     │              │
//! │ Transports  │────▶│  EventQueue  │────▶│    Engine    │
//! │ Blink timer │────▶│  (bounded)   │     │  (consumer)  │
//! │ Shutdown    │────▶│              │     │              │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Producers never block: when the queue is full the newest event is
//! dropped with a warning.  The next poll tick, push message or press
//! recovers the state.

use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::warn;

use crate::drivers::button::ButtonEvent;
use crate::transport::RemoteUpdate;

/// Maximum number of pending events.
pub const EVENT_QUEUE_CAP: usize = 32;

/// Identifies one `subscribe` call.  Updates tagged with anything other
/// than the engine's active subscription are discarded.
pub type SubscriptionId = u32;

/// Everything the engine reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Debounced button press.
    Button(ButtonEvent),
    /// Remote state delivered by a transport subscription.
    Remote {
        subscription: SubscriptionId,
        update: RemoteUpdate,
    },
    /// The remote authority invoked the `Alert` command.
    AlertCommand { subscription: SubscriptionId },
    /// Alert blink timer fired.
    BlinkTick { session: u32 },
    /// Leave the steady-state loop.
    Shutdown,
}

type EventChannel = Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_CAP>;

/// Cloneable handle on the shared bounded queue.
#[derive(Clone)]
pub struct EventQueue {
    channel: Arc<EventChannel>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            channel: Arc::new(Channel::new()),
        }
    }

    /// Push an event without blocking.
    /// Returns `false` if the queue is full (event dropped).
    pub fn push(&self, event: Event) -> bool {
        match self.channel.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Event queue full, dropping {:?}", event);
                false
            }
        }
    }

    /// Block until the next event is available.
    pub fn next(&self) -> Event {
        futures_lite::future::block_on(self.channel.receive())
    }

    /// Pop the next event if one is pending.
    pub fn try_next(&self) -> Option<Event> {
        self.channel.try_receive().ok()
    }

    /// Drain all pending events into a callback, in FIFO order.
    pub fn drain(&self, mut handler: impl FnMut(Event)) {
        while let Some(event) = self.try_next() {
            handler(event);
        }
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Handle given to a transport for one subscription.
    pub fn remote_sink(&self, subscription: SubscriptionId) -> RemoteSink {
        RemoteSink {
            queue: self.clone(),
            subscription,
        }
    }
}

/// Delivery end of one transport subscription.
#[derive(Clone)]
pub struct RemoteSink {
    queue: EventQueue,
    subscription: SubscriptionId,
}

impl RemoteSink {
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Forward a remote update to the engine.
    pub fn deliver(&self, update: RemoteUpdate) -> bool {
        self.queue.push(Event::Remote {
            subscription: self.subscription,
            update,
        })
    }

    /// Forward a remote `Alert` command to the engine.
    pub fn alert(&self) -> bool {
        self.queue.push(Event::AlertCommand {
            subscription: self.subscription,
        })
    }
}

impl core::fmt::Debug for RemoteSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RemoteSink")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}
