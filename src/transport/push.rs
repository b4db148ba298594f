//! Push transport: server-pushed `UpdateLight` events on the hub stream.
//!
//! `subscribe` delivers one fetch of the light resource, then a dedicated
//! thread holds a Server-Sent-Events stream open on the hub endpoint and
//! forwards every `UpdateLight` event.
//!
//! - Initial connect failure ⇒ one [`RemoteUpdate::Unreachable`], so the
//!   engine shows the fault pattern straight away.
//! - Dropped stream ⇒ reconnect after the keep-alive delay, silently.
//!   The engine is not involved in reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::app::ports::{HttpPort, Transport};
use crate::config::{TrafficLightConfig, TransportMode};
use crate::drivers::task_pin::{PUSH_TASK, spawn_on_core};
use crate::error::TransportError;
use crate::events::RemoteSink;
use crate::light::LightColor;

use super::sse::SseParser;
use super::{HUB_RESOURCE, LIGHT_RESOURCE, RemoteUpdate, UPDATE_EVENT, put_report, report_path};

struct StreamHandle {
    cancelled: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct PushTransport<H: HttpPort> {
    http: H,
    config: TrafficLightConfig,
    reconnect: Duration,
    stream: Option<StreamHandle>,
}

impl<H: HttpPort> PushTransport<H> {
    pub fn new(http: H, config: &TrafficLightConfig) -> Self {
        Self {
            http,
            config: config.clone(),
            reconnect: Duration::from_millis(u64::from(config.push_reconnect_ms)),
            stream: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.stream.is_some()
    }
}

impl<H: HttpPort> Transport for PushTransport<H> {
    fn mode(&self) -> TransportMode {
        TransportMode::Push
    }

    fn subscribe(&mut self, sink: RemoteSink) -> Result<(), TransportError> {
        self.unsubscribe();

        sink.deliver(self.fetch_once());

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let http = self.http.clone();
        let url = self.config.api_url(HUB_RESOURCE);
        let reconnect = self.reconnect;

        let thread = spawn_on_core(PUSH_TASK, move || {
            run_stream(http, &url, &sink, &flag, reconnect);
        })
        .map_err(|e| {
            error!("Push: stream thread failed to start: {}", e);
            TransportError::Unavailable
        })?;

        info!("Push: subscribed to {}", self.config.api_url(HUB_RESOURCE));
        self.stream = Some(StreamHandle { cancelled, thread });
        Ok(())
    }

    fn fetch_once(&mut self) -> RemoteUpdate {
        let url = self.config.api_url(LIGHT_RESOURCE);
        RemoteUpdate::from_response(self.http.get(&url))
    }

    fn report(&mut self, state: LightColor) -> Result<(), TransportError> {
        let url = self.config.api_url(&report_path(state));
        put_report(&mut self.http, &url)
    }

    fn unsubscribe(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.cancelled.store(true, Ordering::Release);
            stream.thread.thread().unpark();
            debug!("Push: stream cancelled");
        }
    }
}

/// Stream loop run on the `push` thread until cancelled.
fn run_stream<H: HttpPort>(
    mut http: H,
    url: &str,
    sink: &RemoteSink,
    cancelled: &AtomicBool,
    reconnect: Duration,
) {
    let mut parser = SseParser::new();
    let mut first_attempt = true;

    while !cancelled.load(Ordering::Acquire) {
        parser.reset();
        let mut received = false;

        let result = http.stream(url, &mut |chunk| {
            received = true;
            parser.feed(chunk, |event| {
                if event.event == UPDATE_EVENT {
                    debug!("Push: {} {}", UPDATE_EVENT, event.data);
                    sink.deliver(RemoteUpdate::Value(event.data));
                }
            });
            !cancelled.load(Ordering::Acquire)
        });

        if cancelled.load(Ordering::Acquire) {
            break;
        }

        match result {
            Err(e) if first_attempt && !received => {
                warn!("Push: hub connect failed: {}", e);
                sink.deliver(RemoteUpdate::Unreachable(e));
            }
            Err(e) => warn!(
                "Push: stream dropped: {} (reconnect in {} ms)",
                e,
                reconnect.as_millis()
            ),
            Ok(()) => info!(
                "Push: stream closed by server (reconnect in {} ms)",
                reconnect.as_millis()
            ),
        }
        first_attempt = false;

        sleep_unless_cancelled(reconnect, cancelled);
    }
    debug!("Push: stream thread exit");
}

fn sleep_unless_cancelled(delay: Duration, cancelled: &AtomicBool) {
    let deadline = Instant::now() + delay;
    while !cancelled.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::park_timeout(deadline - now);
    }
}
