//! Outbound application events.
//!
//! The [`Engine`](super::engine::Engine) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, record in tests, etc.

use crate::config::TransportMode;
use crate::error::{ApplyError, TransportError};
use crate::light::LightColor;

/// What caused a change of the current light.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Bootstrap,
    Remote,
    Button,
    AlertAcknowledged,
}

/// Structured events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The bootstrap sequence finished; the light is Off.
    Bootstrapped,

    /// The engine subscribed to its transport.
    Started(TransportMode),

    /// The current light changed.
    StateChanged {
        from: LightColor,
        to: LightColor,
        cause: Cause,
    },

    /// A remote update could not be applied; the fault pattern is shown.
    FaultShown(ApplyError),

    /// The button killed (`true`) or revived (`false`) the remote link.
    DeadChanged(bool),

    /// A remote alert session began.
    AlertStarted,

    /// The alert session ended.
    AlertStopped,

    /// A best-effort report was dropped.
    ReportFailed {
        state: LightColor,
        error: TransportError,
    },

    /// The engine left its run loop.
    Stopped,
}
