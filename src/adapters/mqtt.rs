//! MQTT session for the device-twin transport.
//!
//! Implements [`TwinSession`] (outbound publishes) and owns the inbound
//! event thread that feeds a shared [`TwinRouter`].
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `EspMqttClient` over TLS (certificate
//!   bundle) to the IoT hub.  A core-pinned thread drains the connection
//!   events: on connect it (re)subscribes the twin filters, received
//!   messages go through the router, and method acks are published back.
//! - **all other targets**: an in-memory loopback hub.  Twin `GET`s are
//!   answered from a local desired document, reported patches are stored,
//!   and tests can push desired patches or invoke direct methods.

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::app::ports::TwinSession;
use crate::error::TransportError;
use crate::transport::twin::TwinRouter;

#[cfg(target_os = "espidf")]
use crate::transport::credentials::MqttCredentials;

#[cfg(not(target_os = "espidf"))]
use serde_json::{Map, Value, json};

// ───────────────────────────────────────────────────────────────
// ESP-IDF backend
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use std::sync::mpsc::SyncSender;
    use std::sync::{Arc, Mutex};

    use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttConnection, EventPayload, QoS};
    use log::{debug, info, warn};

    use crate::transport::twin::{SUBSCRIBE_FILTERS, TwinRouter};

    pub(super) type SharedClient = Arc<Mutex<EspMqttClient<'static>>>;

    /// Drain connection events until the client is dropped.
    pub(super) fn event_loop(
        mut connection: EspMqttConnection,
        client: SharedClient,
        router: Arc<TwinRouter>,
        connected: SyncSender<()>,
    ) {
        while let Ok(event) = connection.next() {
            match event.payload() {
                EventPayload::Connected(_) => {
                    info!("MQTT: connected");
                    if let Ok(mut c) = client.lock() {
                        for filter in SUBSCRIBE_FILTERS {
                            if let Err(e) = c.subscribe(filter, QoS::AtMostOnce) {
                                warn!("MQTT: subscribe '{}' failed: {:?}", filter, e);
                            }
                        }
                    }
                    let _ = connected.try_send(());
                }
                EventPayload::Disconnected => {
                    warn!("MQTT: disconnected");
                    router.abort_pending();
                }
                EventPayload::Received {
                    topic: Some(topic),
                    data,
                    ..
                } => {
                    let Some(reply) = router.dispatch(topic, data) else {
                        continue;
                    };
                    match client.lock() {
                        Ok(mut c) => {
                            if let Err(e) =
                                c.publish(&reply.topic, QoS::AtMostOnce, false, &reply.payload)
                            {
                                warn!("MQTT: reply on '{}' failed: {:?}", reply.topic, e);
                            }
                        }
                        Err(_) => warn!("MQTT: client lock poisoned, reply dropped"),
                    }
                }
                EventPayload::Error(e) => warn!("MQTT: {:?}", e),
                other => debug!("MQTT: {:?}", other),
            }
        }
        info!("MQTT: event loop exited");
        router.abort_pending();
    }
}

/// How long `connect` waits for the broker to accept the session.
#[cfg(target_os = "espidf")]
const CONNECT_TIMEOUT: core::time::Duration = core::time::Duration::from_secs(20);

pub struct MqttTwinSession {
    #[cfg(target_os = "espidf")]
    client: esp::SharedClient,

    #[cfg(not(target_os = "espidf"))]
    hub: Arc<Mutex<SimHub>>,
    #[cfg(not(target_os = "espidf"))]
    router: Arc<TwinRouter>,
}

#[cfg(target_os = "espidf")]
impl MqttTwinSession {
    /// Open the session and start routing inbound traffic to `router`.
    /// Returns once the broker has accepted the connection.
    // TODO: regenerate the SAS password before `sasTokenTtlSecs` runs out;
    // the client's automatic reconnect reuses the original token.
    pub fn connect(creds: &MqttCredentials, router: Arc<TwinRouter>) -> Result<Self, TransportError> {
        use esp_idf_svc::mqtt::client::{EspMqttClient, MqttClientConfiguration, MqttProtocolVersion};

        use crate::drivers::task_pin::{MQTT_TASK, spawn_on_core};

        let conf = MqttClientConfiguration {
            protocol_version: Some(MqttProtocolVersion::V3_1_1),
            client_id: Some(&creds.client_id),
            username: Some(&creds.username),
            password: Some(&creds.password),
            keep_alive_interval: Some(core::time::Duration::from_secs(60)),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };

        let (client, connection) =
            EspMqttClient::new(&creds.url, &conf).map_err(|_| TransportError::ConnectFailed)?;
        let client = Arc::new(Mutex::new(client));

        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let loop_client = client.clone();
        spawn_on_core(MQTT_TASK, move || {
            esp::event_loop(connection, loop_client, router, tx);
        })
        .map_err(|_| TransportError::Unavailable)?;

        rx.recv_timeout(CONNECT_TIMEOUT)
            .map_err(|_| TransportError::ConnectFailed)?;
        info!("MQTT: session up ({})", creds.client_id);
        Ok(Self { client })
    }
}

#[cfg(target_os = "espidf")]
impl TwinSession for MqttTwinSession {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        use esp_idf_svc::mqtt::client::QoS;

        debug!("MQTT: publish '{}' ({} bytes)", topic, payload.len());
        let mut client = self.client.lock().map_err(|_| TransportError::Io)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map(|_| ())
            .map_err(|e| {
                warn!("MQTT: publish '{}' failed: {:?}", topic, e);
                TransportError::Io
            })
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend (loopback hub)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimHub {
    desired: Map<String, Value>,
    reported: Map<String, Value>,
    version: u64,
    online: bool,
    method_acks: Vec<String>,
}

#[cfg(not(target_os = "espidf"))]
impl MqttTwinSession {
    /// Loopback session with an empty twin.
    pub fn simulated(router: Arc<TwinRouter>) -> Self {
        info!("MQTT(sim): loopback twin hub");
        Self {
            hub: Arc::new(Mutex::new(SimHub {
                online: true,
                ..SimHub::default()
            })),
            router,
        }
    }

    /// Handle for driving the hub side from a test.
    pub fn hub(&self) -> SimHubHandle {
        SimHubHandle {
            hub: self.hub.clone(),
            router: self.router.clone(),
        }
    }

    fn answer(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let rid = topic
            .split_once("?$rid=")
            .map(|(_, rid)| rid.to_owned())
            .unwrap_or_default();

        let reply = {
            let mut hub = self.hub.lock().map_err(|_| TransportError::Io)?;
            if !hub.online {
                return Err(TransportError::Io);
            }
            if topic.starts_with("$iothub/twin/GET/") {
                let doc = json!({
                    "desired": Value::Object(hub.desired.clone()),
                    "reported": Value::Object(hub.reported.clone()),
                });
                Some((format!("$iothub/twin/res/200/?$rid={rid}"), doc.to_string()))
            } else if topic.starts_with("$iothub/twin/PATCH/properties/reported/") {
                let patch: Value =
                    serde_json::from_slice(payload).map_err(|_| TransportError::Malformed)?;
                if let Value::Object(fields) = patch {
                    hub.reported.extend(fields);
                }
                Some((format!("$iothub/twin/res/204/?$rid={rid}"), String::new()))
            } else {
                if topic.starts_with("$iothub/methods/res/") {
                    hub.method_acks.push(topic.to_owned());
                }
                None
            }
        };

        // Dispatch outside the hub lock; the router may call back into the queue.
        if let Some((topic, body)) = reply {
            self.router.dispatch(&topic, body.as_bytes());
        }
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl TwinSession for MqttTwinSession {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        debug!("MQTT(sim): publish '{}' ({} bytes)", topic, payload.len());
        self.answer(topic, payload)
    }
}

/// Hub-side controls for the loopback session.
#[cfg(not(target_os = "espidf"))]
#[derive(Clone)]
pub struct SimHubHandle {
    hub: Arc<Mutex<SimHub>>,
    router: Arc<TwinRouter>,
}

#[cfg(not(target_os = "espidf"))]
impl SimHubHandle {
    /// Set a desired property and push the patch to the device.
    pub fn set_desired(&self, key: &str, value: Value) {
        let patch = {
            let Ok(mut hub) = self.hub.lock() else {
                return;
            };
            hub.version += 1;
            hub.desired.insert(key.to_owned(), value.clone());
            let version = hub.version;
            hub.desired.insert("$version".into(), version.into());
            json!({ key: value, "$version": version })
        };
        let topic = format!(
            "$iothub/twin/PATCH/properties/desired/?$version={}",
            patch["$version"]
        );
        self.router.dispatch(&topic, patch.to_string().as_bytes());
    }

    /// Invoke a direct method; the device's ack is recorded.
    pub fn invoke_method(&self, method: &str, rid: u32) {
        let topic = format!("$iothub/methods/POST/{method}/?$rid={rid}");
        if let Some(reply) = self.router.dispatch(&topic, b"{}") {
            if let Ok(mut hub) = self.hub.lock() {
                hub.method_acks.push(reply.topic);
            }
        }
    }

    pub fn reported(&self, key: &str) -> Option<Value> {
        self.hub.lock().ok()?.reported.get(key).cloned()
    }

    pub fn method_acks(&self) -> Vec<String> {
        self.hub
            .lock()
            .map(|h| h.method_acks.clone())
            .unwrap_or_default()
    }

    /// Take the hub offline: publishes fail until it comes back.
    pub fn set_online(&self, online: bool) {
        if let Ok(mut hub) = self.hub.lock() {
            hub.online = online;
        }
        if !online {
            warn!("MQTT(sim): hub offline");
            self.router.abort_pending();
        }
    }
}
