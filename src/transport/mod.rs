//! Transports: how remote light state enters and leaves the device.
//!
//! ```text
//!                      ┌──────────────────────────┐
//!                      │  Link (chosen at boot)   │
//!                      ├──────────┬───────┬───────┤
//!   HttpPort ─────────▶│ Polling  │ Push  │       │
//!   TwinSession ──────▶│          │       │ Twin  │
//!                      └────┬─────┴───┬───┴───┬───┘
//!                           │ RemoteSink (subscription id)
//!                           ▼
//!                       EventQueue ──▶ Engine
//! ```
//!
//! Every variant implements the same [`Transport`] contract.  The engine
//! never sees connection handles, timers or threads.

pub mod credentials;
pub mod polling;
pub mod push;
pub mod sse;
pub mod twin;

use crate::app::ports::{HttpPort, HttpResponse, Transport, TwinSession};
use crate::config::TransportMode;
use crate::error::TransportError;
use crate::events::RemoteSink;
use crate::light::LightColor;

pub use polling::PollingTransport;
pub use push::PushTransport;
pub use twin::TwinTransport;

/// REST resource holding the light value.
pub const LIGHT_RESOURCE: &str = "api/trafficlight";

/// Push hub endpoint (hub `TrafficLightHub`).
pub const HUB_RESOURCE: &str = "hubs/trafficlight";

/// Server-to-client event name on the push hub.
pub const UPDATE_EVENT: &str = "UpdateLight";

// ---------------------------------------------------------------------------
// Remote update
// ---------------------------------------------------------------------------

/// The "Light" entry of a device-twin desired document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DesiredLight {
    /// `None` when the key is absent or does not name a colour.
    pub light: Option<LightColor>,
    /// `$version` of the document, when present.
    pub version: Option<u64>,
}

/// One inbound state proposal, consumed once by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpdate {
    /// Scalar value as received (HTTP body or push payload), not yet parsed.
    Value(String),
    /// Device-twin desired properties.
    Desired(DesiredLight),
    /// The authority could not be reached.
    Unreachable(TransportError),
}

impl RemoteUpdate {
    pub fn value(raw: impl Into<String>) -> Self {
        Self::Value(raw.into())
    }

    /// Map the outcome of a `GET` on the light resource.
    pub fn from_response(res: Result<HttpResponse, TransportError>) -> Self {
        match res {
            Ok(r) if r.is_success() => Self::Value(r.body),
            Ok(r) => Self::Unreachable(TransportError::Status(r.status)),
            Err(e) => Self::Unreachable(e),
        }
    }
}

/// Report URL: the lower-cased colour appended to the light resource.
pub fn report_path(state: LightColor) -> String {
    format!("{}/{}", LIGHT_RESOURCE, state.slug())
}

/// `PUT` a report and map non-2xx statuses to an error.
pub(crate) fn put_report<H: HttpPort>(
    http: &mut H,
    url: &str,
) -> Result<(), TransportError> {
    match http.put(url)? {
        s if (200..300).contains(&s) => Ok(()),
        s => Err(TransportError::Status(s)),
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// The transport variant selected once from configuration.
pub enum Link<H: HttpPort, S: TwinSession> {
    Polling(PollingTransport<H>),
    Push(PushTransport<H>),
    CloudTwin(TwinTransport<S>),
}

impl<H: HttpPort, S: TwinSession> Transport for Link<H, S> {
    fn mode(&self) -> TransportMode {
        match self {
            Self::Polling(t) => t.mode(),
            Self::Push(t) => t.mode(),
            Self::CloudTwin(t) => t.mode(),
        }
    }

    fn subscribe(&mut self, sink: RemoteSink) -> Result<(), TransportError> {
        match self {
            Self::Polling(t) => t.subscribe(sink),
            Self::Push(t) => t.subscribe(sink),
            Self::CloudTwin(t) => t.subscribe(sink),
        }
    }

    fn fetch_once(&mut self) -> RemoteUpdate {
        match self {
            Self::Polling(t) => t.fetch_once(),
            Self::Push(t) => t.fetch_once(),
            Self::CloudTwin(t) => t.fetch_once(),
        }
    }

    fn report(&mut self, state: LightColor) -> Result<(), TransportError> {
        match self {
            Self::Polling(t) => t.report(state),
            Self::Push(t) => t.report(state),
            Self::CloudTwin(t) => t.report(state),
        }
    }

    fn unsubscribe(&mut self) {
        match self {
            Self::Polling(t) => t.unsubscribe(),
            Self::Push(t) => t.unsubscribe(),
            Self::CloudTwin(t) => t.unsubscribe(),
        }
    }
}
