//! Cloud-twin transport: desired/reported properties over MQTT.
//!
//! ```text
//!  MQTT event thread                       engine thread
//!  ─────────────────                       ─────────────
//!  Received(topic, payload)                fetch_desired()
//!        │                                    │ publish GET ?$rid=n
//!        ▼                                    │
//!  TwinRouter::dispatch ──┬─ twin/res ──▶ Signal ──▶ wait_response(n)
//!                         ├─ desired PATCH ──▶ RemoteSink::deliver
//!                         └─ methods/POST/Alert ──▶ RemoteSink::alert
//!                                   │
//!                                   ▼ Outbound (method ack) → publish
//! ```
//!
//! Topics (Azure IoT Hub device twin):
//!
//! | Direction | Topic                                                   |
//! |-----------|---------------------------------------------------------|
//! | out       | `$iothub/twin/GET/?$rid={rid}`                          |
//! | in        | `$iothub/twin/res/{status}/?$rid={rid}`                 |
//! | in        | `$iothub/twin/PATCH/properties/desired/?$version={v}`   |
//! | out       | `$iothub/twin/PATCH/properties/reported/?$rid={rid}`    |
//! | in        | `$iothub/methods/POST/{method}/?$rid={rid}`             |
//! | out       | `$iothub/methods/res/{status}/?$rid={rid}`              |

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::app::ports::{Transport, TwinSession};
use crate::config::TransportMode;
use crate::error::TransportError;
use crate::events::RemoteSink;
use crate::light::LightColor;

use super::{DesiredLight, RemoteUpdate};

/// Subscriptions the MQTT session must hold.
pub const SUBSCRIBE_FILTERS: [&str; 3] = [
    "$iothub/twin/res/#",
    "$iothub/twin/PATCH/properties/desired/#",
    "$iothub/methods/POST/#",
];

/// The only direct method the device understands.
pub const ALERT_METHOD: &str = "Alert";

/// Property key holding the light, in both desired and reported documents.
pub const LIGHT_KEY: &str = "Light";

const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
const DESIRED_PATCH_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const METHOD_PREFIX: &str = "$iothub/methods/POST/";

// ---------------------------------------------------------------------------
// Topics and documents
// ---------------------------------------------------------------------------

pub fn twin_get_topic(rid: u32) -> String {
    format!("$iothub/twin/GET/?$rid={rid}")
}

pub fn reported_patch_topic(rid: u32) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={rid}")
}

pub fn method_response_topic(status: u16, rid: &str) -> String {
    format!("$iothub/methods/res/{status}/?$rid={rid}")
}

/// Value of `name` in the `?a=1&b=2` tail of a topic.
fn query_param<'a>(tail: &'a str, name: &str) -> Option<&'a str> {
    let query = tail.split_once('?').map_or(tail, |(_, q)| q);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

impl DesiredLight {
    /// Read the light from the full `desired` section.  Missing or unknown
    /// values yield `light: None`.
    pub fn from_desired(doc: &Value) -> Self {
        Self {
            light: doc
                .get(LIGHT_KEY)
                .and_then(Value::as_str)
                .and_then(LightColor::parse),
            version: doc.get("$version").and_then(Value::as_u64),
        }
    }
}

/// Translate a desired patch.  Patches carry only the changed keys, so a
/// patch without `Light` says nothing about the light and yields `None`.
/// `"Light": null` deletes the desired value, which reads like a twin that
/// never had one.  Anything else goes to the engine verbatim and is parsed
/// there, so `"Purple"` or `3` surface as unparseable.
fn patch_update(doc: &Value) -> Option<RemoteUpdate> {
    match doc.get(LIGHT_KEY)? {
        Value::Null => Some(RemoteUpdate::Desired(DesiredLight {
            light: None,
            version: doc.get("$version").and_then(Value::as_u64),
        })),
        Value::String(raw) => Some(RemoteUpdate::value(raw.as_str())),
        other => Some(RemoteUpdate::value(other.to_string())),
    }
}

/// Parse the body of a twin `GET` response (`{"desired":{…},"reported":{…}}`).
pub fn parse_twin_document(body: &[u8]) -> Result<DesiredLight, TransportError> {
    let doc: Value = serde_json::from_slice(body).map_err(|_| TransportError::Malformed)?;
    Ok(doc
        .get("desired")
        .map(DesiredLight::from_desired)
        .unwrap_or_default())
}

#[derive(Serialize)]
struct ReportedLight {
    #[serde(rename = "Light")]
    light: LightColor,
}

/// Reported-properties patch for `state`: `{"Light":"Red"}`.
pub fn reported_document(state: LightColor) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(&ReportedLight { light: state }).map_err(|_| TransportError::Malformed)
}

// ---------------------------------------------------------------------------
// Router (inbound side, shared with the MQTT event thread)
// ---------------------------------------------------------------------------

/// Response to a request this device published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinResponse {
    pub rid: u32,
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
enum Pending {
    Response(TwinResponse),
    /// The session dropped while a request was outstanding.
    Aborted,
}

/// A message the session must publish in reply to an inbound one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Routes inbound twin traffic to the engine and to a waiting request.
pub struct TwinRouter {
    sink: Mutex<CriticalSectionRawMutex, RefCell<Option<RemoteSink>>>,
    awaiting: AtomicU32,
    response: Signal<CriticalSectionRawMutex, Pending>,
}

/// `awaiting` value when no request is outstanding.
const NO_REQUEST: u32 = 0;

impl Default for TwinRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TwinRouter {
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(RefCell::new(None)),
            awaiting: AtomicU32::new(NO_REQUEST),
            response: Signal::new(),
        }
    }

    /// Start forwarding desired patches and method calls to `sink`.
    pub fn attach(&self, sink: RemoteSink) {
        self.sink.lock(|s| *s.borrow_mut() = Some(sink));
    }

    /// Stop forwarding.  Idempotent.
    pub fn detach(&self) {
        self.sink.lock(|s| *s.borrow_mut() = None);
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock(|s| s.borrow().is_some())
    }

    fn current_sink(&self) -> Option<RemoteSink> {
        self.sink.lock(|s| s.borrow().clone())
    }

    /// Handle one inbound message.  Returns the reply to publish, if any.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Option<Outbound> {
        if let Some(rest) = topic.strip_prefix(TWIN_RESPONSE_PREFIX) {
            self.on_response(rest, payload);
            None
        } else if topic.starts_with(DESIRED_PATCH_PREFIX) {
            self.on_desired_patch(payload);
            None
        } else if let Some(rest) = topic.strip_prefix(METHOD_PREFIX) {
            self.on_method(rest)
        } else {
            debug!("Twin: ignoring message on '{}'", topic);
            None
        }
    }

    fn on_response(&self, rest: &str, payload: &[u8]) {
        let Some((status, tail)) = rest.split_once('/') else {
            warn!("Twin: malformed response topic");
            return;
        };
        let (Ok(status), Some(Ok(rid))) = (
            status.parse::<u16>(),
            query_param(tail, "$rid").map(str::parse::<u32>),
        ) else {
            warn!("Twin: malformed response topic");
            return;
        };

        // Only the outstanding request is signalled; late acks of earlier
        // reports must not displace it.
        if rid != NO_REQUEST && self.awaiting.load(Ordering::Acquire) == rid {
            self.response.signal(Pending::Response(TwinResponse {
                rid,
                status,
                body: payload.to_vec(),
            }));
        } else {
            debug!("Twin: response rid={} status={} (not awaited)", rid, status);
        }
    }

    fn on_desired_patch(&self, payload: &[u8]) {
        let Ok(doc) = serde_json::from_slice::<Value>(payload) else {
            warn!("Twin: dropping malformed desired patch");
            return;
        };
        let Some(update) = patch_update(&doc) else {
            debug!("Twin: desired patch without '{}'", LIGHT_KEY);
            return;
        };
        match self.current_sink() {
            Some(sink) => {
                sink.deliver(update);
            }
            None => debug!("Twin: desired patch while unsubscribed"),
        }
    }

    fn on_method(&self, rest: &str) -> Option<Outbound> {
        let (method, tail) = rest.split_once('/')?;
        let rid = query_param(tail, "$rid")?;

        let status = if method == ALERT_METHOD {
            match self.current_sink() {
                Some(sink) => {
                    info!("Twin: direct method '{}'", method);
                    sink.alert();
                    200
                }
                None => {
                    warn!("Twin: '{}' while unsubscribed", method);
                    503
                }
            }
        } else {
            warn!("Twin: unknown direct method '{}'", method);
            404
        };

        Some(Outbound {
            topic: method_response_topic(status, rid),
            payload: b"{}".to_vec(),
        })
    }

    /// Arm the router for a response to `rid`.  Call before publishing.
    pub fn expect_response(&self, rid: u32) {
        self.response.reset();
        self.awaiting.store(rid, Ordering::Release);
    }

    /// Block until the response to `rid` arrives or the session drops.
    pub fn wait_response(&self, rid: u32) -> Result<TwinResponse, TransportError> {
        let outcome = loop {
            match futures_lite::future::block_on(self.response.wait()) {
                Pending::Response(r) if r.rid == rid => break Ok(r),
                Pending::Response(r) => debug!("Twin: stale response rid={}", r.rid),
                Pending::Aborted => break Err(TransportError::Io),
            }
        };
        self.awaiting.store(NO_REQUEST, Ordering::Release);
        outcome
    }

    /// Unblock a waiting request after the session disconnected.
    pub fn abort_pending(&self) {
        if self.awaiting.load(Ordering::Acquire) != NO_REQUEST {
            self.response.signal(Pending::Aborted);
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

pub struct TwinTransport<S: TwinSession> {
    session: S,
    router: Arc<TwinRouter>,
    next_rid: u32,
}

impl<S: TwinSession> TwinTransport<S> {
    /// `router` must be the one the session's inbound side dispatches to.
    pub fn new(session: S, router: Arc<TwinRouter>) -> Self {
        Self {
            session,
            router,
            next_rid: 1,
        }
    }

    pub fn router(&self) -> &Arc<TwinRouter> {
        &self.router
    }

    fn take_rid(&mut self) -> u32 {
        let rid = self.next_rid;
        self.next_rid = self.next_rid.wrapping_add(1).max(1);
        rid
    }

    /// Read the full twin and extract the desired light.
    pub fn fetch_desired(&mut self) -> Result<DesiredLight, TransportError> {
        let rid = self.take_rid();
        self.router.expect_response(rid);
        if let Err(e) = self.session.publish(&twin_get_topic(rid), b"") {
            self.router.expect_response(NO_REQUEST);
            return Err(e);
        }

        let response = self.router.wait_response(rid)?;
        if !(200..300).contains(&response.status) {
            return Err(TransportError::Status(response.status));
        }
        parse_twin_document(&response.body)
    }
}

impl<S: TwinSession> Transport for TwinTransport<S> {
    fn mode(&self) -> TransportMode {
        TransportMode::CloudTwin
    }

    fn subscribe(&mut self, sink: RemoteSink) -> Result<(), TransportError> {
        self.router.attach(sink.clone());
        sink.deliver(self.fetch_once());
        info!("Twin: subscribed");
        Ok(())
    }

    fn fetch_once(&mut self) -> RemoteUpdate {
        match self.fetch_desired() {
            Ok(desired) => RemoteUpdate::Desired(desired),
            Err(e) => {
                warn!("Twin: GET failed: {}", e);
                RemoteUpdate::Unreachable(e)
            }
        }
    }

    fn report(&mut self, state: LightColor) -> Result<(), TransportError> {
        let rid = self.take_rid();
        let body = reported_document(state)?;
        self.session.publish(&reported_patch_topic(rid), &body)
    }

    fn unsubscribe(&mut self) {
        self.router.detach();
    }
}
