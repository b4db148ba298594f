//! Port traits: the hexagonal boundary between the engine and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Engine (domain)
//! ```
//!
//! Driven adapters (lamps, transports, timers, event sinks, storage)
//! implement these traits.  The [`Engine`](super::engine::Engine) consumes
//! them via generics, so the reconciliation logic never touches hardware
//! or the network directly.
//!
//! ## Security notes
//!
//! - **StoragePort** implementations SHOULD keep the twin connection string
//!   in the encrypted NVS namespace.
//! - All port errors are typed: callers must handle every variant explicitly.

use crate::config::TransportMode;
use crate::error::{StorageError, TransportError};
use crate::events::RemoteSink;
use crate::light::{LightColor, OutputSet};
use crate::transport::RemoteUpdate;

use super::events::AppEvent;

// ───────────────────────────────────────────────────────────────
// Actuator port (driven adapter: domain → lamps)
// ───────────────────────────────────────────────────────────────

/// Write-side port: the engine calls this to drive the lamps.
pub trait ActuatorPort {
    /// Light exactly the lamps in `outputs`; every other lamp goes dark.
    ///
    /// Infallible at this level.  A hardware write failure has no
    /// fallback and is handled inside the adapter as a fatal condition.
    fn write(&mut self, outputs: OutputSet);
}

// ───────────────────────────────────────────────────────────────
// Transport port (driven adapter: domain ↔ remote authority)
// ───────────────────────────────────────────────────────────────

/// The four-operation contract shared by every transport variant.
pub trait Transport {
    /// Variant selected at startup.
    fn mode(&self) -> TransportMode;

    /// Begin delivering [`RemoteUpdate`]s through `sink`.
    ///
    /// Delivery is asynchronous.  Implementations may deliver an initial
    /// fetch before returning.
    fn subscribe(&mut self, sink: RemoteSink) -> Result<(), TransportError>;

    /// One-shot read of the remote state.  Never fails: an unreachable
    /// authority is reported as [`RemoteUpdate::Unreachable`].
    fn fetch_once(&mut self) -> RemoteUpdate;

    /// Best-effort write of the local state.  No retry.
    fn report(&mut self, state: LightColor) -> Result<(), TransportError>;

    /// Release the active subscription.  Idempotent.
    fn unsubscribe(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Blink scheduler port (domain → timer service)
// ───────────────────────────────────────────────────────────────

/// Periodic tick source for the alert blink.
///
/// Ticks are delivered back to the engine as
/// [`Event::BlinkTick`](crate::events::Event::BlinkTick) carrying the
/// session id given here.
pub trait BlinkScheduler {
    /// Start ticking every `period_ms`, replacing any previous schedule.
    fn start_blink(&mut self, session: u32, period_ms: u32);

    /// Stop ticking.  Idempotent.
    fn stop_blink(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The engine emits structured [`AppEvent`]s through this port.
/// Adapters decide where they go (serial log, test recorder, etc.).
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

// ───────────────────────────────────────────────────────────────
// HTTP port (transport adapters → network)
// ───────────────────────────────────────────────────────────────

/// Status line and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal HTTP client used by the polling and push transports.
///
/// `Clone + Send` so a copy can be moved into the timer or stream thread.
pub trait HttpPort: Clone + Send + 'static {
    /// `GET url`, returning status and body.
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError>;

    /// `PUT url` with an empty body, returning the status.
    fn put(&mut self, url: &str) -> Result<u16, TransportError>;

    /// Open a long-lived `GET` and feed every received chunk to
    /// `on_chunk` until the server closes the stream or `on_chunk`
    /// returns `false`.
    ///
    /// Errors before the first byte is read mean the connection could not
    /// be established; errors afterwards mean it dropped.
    fn stream(
        &mut self,
        url: &str,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Twin session port (twin transport → MQTT broker)
// ───────────────────────────────────────────────────────────────

/// Outbound half of a device-twin MQTT session.
///
/// Inbound messages are routed by the adapter into a
/// [`TwinRouter`](crate::transport::twin::TwinRouter).
pub trait TwinSession: Send {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the config blob and credentials.
///
/// # Security
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic: no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; the in-memory
///   simulation achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}
