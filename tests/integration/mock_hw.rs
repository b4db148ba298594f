//! Mock adapters for integration tests.
//!
//! Every mock records what the engine or transport asked of it so tests
//! can assert on the full history without GPIO, sockets or timers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use embedded_hal::delay::DelayNs;
use trafficlight::app::events::AppEvent;
use trafficlight::app::ports::{
    ActuatorPort, BlinkScheduler, EventSink, HttpPort, HttpResponse, Transport, TwinSession,
};
use trafficlight::config::TransportMode;
use trafficlight::error::TransportError;
use trafficlight::events::RemoteSink;
use trafficlight::light::{LightColor, OutputSet};
use trafficlight::transport::RemoteUpdate;

// ── Lamps ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockLamps {
    pub writes: Vec<OutputSet>,
}

#[allow(dead_code)]
impl MockLamps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lit(&self) -> OutputSet {
        self.writes.last().copied().unwrap_or(OutputSet::EMPTY)
    }
}

impl ActuatorPort for MockLamps {
    fn write(&mut self, outputs: OutputSet) {
        self.writes.push(outputs);
    }
}

// ── Transport ─────────────────────────────────────────────────

/// Scripted transport.  `fetch_once` pops `fetches` and falls back to
/// `default_fetch`; `subscribe` delivers one fetch like the real variants.
pub struct MockTransport {
    pub mode: TransportMode,
    pub fetches: VecDeque<RemoteUpdate>,
    pub default_fetch: RemoteUpdate,
    pub reports: Vec<LightColor>,
    pub report_error: Option<TransportError>,
    pub subscribe_error: Option<TransportError>,
    pub sink: Option<RemoteSink>,
    pub subscribes: u32,
    pub unsubscribes: u32,
    pub fetch_calls: u32,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new(mode: TransportMode) -> Self {
        let default_fetch = match mode {
            TransportMode::CloudTwin => RemoteUpdate::Desired(Default::default()),
            _ => RemoteUpdate::value("Green"),
        };
        Self {
            mode,
            fetches: VecDeque::new(),
            default_fetch,
            reports: Vec::new(),
            report_error: None,
            subscribe_error: None,
            sink: None,
            subscribes: 0,
            unsubscribes: 0,
            fetch_calls: 0,
        }
    }

    pub fn with_fetch(mut self, update: RemoteUpdate) -> Self {
        self.default_fetch = update;
        self
    }

    /// Delivery handle of the live subscription.
    pub fn live_sink(&self) -> RemoteSink {
        self.sink.clone().expect("transport not subscribed")
    }
}

impl Transport for MockTransport {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    fn subscribe(&mut self, sink: RemoteSink) -> Result<(), TransportError> {
        self.subscribes += 1;
        if let Some(e) = self.subscribe_error {
            return Err(e);
        }
        let initial = self.fetch_once();
        sink.deliver(initial);
        self.sink = Some(sink);
        Ok(())
    }

    fn fetch_once(&mut self) -> RemoteUpdate {
        self.fetch_calls += 1;
        self.fetches
            .pop_front()
            .unwrap_or_else(|| self.default_fetch.clone())
    }

    fn report(&mut self, state: LightColor) -> Result<(), TransportError> {
        self.reports.push(state);
        match self.report_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn unsubscribe(&mut self) {
        self.unsubscribes += 1;
        self.sink = None;
    }
}

// ── Blink scheduler ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkCall {
    Start { session: u32, period_ms: u32 },
    Stop,
}

#[derive(Default)]
pub struct MockBlinker {
    pub calls: Vec<BlinkCall>,
}

#[allow(dead_code)]
impl MockBlinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_session(&self) -> Option<u32> {
        match self.calls.last() {
            Some(BlinkCall::Start { session, .. }) => Some(*session),
            _ => None,
        }
    }
}

impl BlinkScheduler for MockBlinker {
    fn start_blink(&mut self, session: u32, period_ms: u32) {
        self.calls.push(BlinkCall::Start { session, period_ms });
    }

    fn stop_blink(&mut self) {
        self.calls.push(BlinkCall::Stop);
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct LogSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Delay ─────────────────────────────────────────────────────

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct ScriptedDelay {
    pub total_ns: u64,
    pub calls: u32,
}

impl DelayNs for ScriptedDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
        self.calls += 1;
    }
}

// ── HTTP ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpCall {
    Get(String),
    Put(String),
    Stream(String),
}

/// One scripted `stream` attempt.
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Deliver these chunks, then close cleanly.
    Chunks(Vec<&'static str>),
    /// Fail before any byte is read.
    Fail(TransportError),
}

#[derive(Default)]
struct HttpState {
    calls: Vec<HttpCall>,
    gets: VecDeque<Result<HttpResponse, TransportError>>,
    put_status: Option<Result<u16, TransportError>>,
    streams: VecDeque<StreamScript>,
}

/// Shared-state HTTP mock; clones (moved into transport threads) see the
/// same script and call log.
#[derive(Clone, Default)]
pub struct MockHttp {
    state: Arc<Mutex<HttpState>>,
}

#[allow(dead_code)]
impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_get(&self, status: u16, body: &str) {
        self.state.lock().unwrap().gets.push_back(Ok(HttpResponse {
            status,
            body: body.to_owned(),
        }));
    }

    pub fn push_get_error(&self, e: TransportError) {
        self.state.lock().unwrap().gets.push_back(Err(e));
    }

    pub fn set_put(&self, result: Result<u16, TransportError>) {
        self.state.lock().unwrap().put_status = Some(result);
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.state.lock().unwrap().streams.push_back(script);
    }

    pub fn calls(&self) -> Vec<HttpCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&HttpCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

impl HttpPort for MockHttp {
    fn get(&mut self, url: &str) -> Result<HttpResponse, TransportError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(HttpCall::Get(url.to_owned()));
        // An exhausted script behaves like an unreachable server.
        s.gets.pop_front().unwrap_or(Err(TransportError::ConnectFailed))
    }

    fn put(&mut self, url: &str) -> Result<u16, TransportError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(HttpCall::Put(url.to_owned()));
        s.put_status.unwrap_or(Ok(200))
    }

    fn stream(
        &mut self,
        url: &str,
        on_chunk: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<(), TransportError> {
        let script = {
            let mut s = self.state.lock().unwrap();
            s.calls.push(HttpCall::Stream(url.to_owned()));
            s.streams.pop_front()
        };
        match script {
            Some(StreamScript::Chunks(chunks)) => {
                for chunk in chunks {
                    if !on_chunk(chunk.as_bytes()) {
                        break;
                    }
                }
                Ok(())
            }
            Some(StreamScript::Fail(e)) => Err(e),
            None => Err(TransportError::ConnectFailed),
        }
    }
}

// ── Twin session ──────────────────────────────────────────────

/// Records publishes; the test plays the hub side through the router.
#[derive(Clone, Default)]
pub struct RecordingSession {
    pub published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    pub fail: Arc<Mutex<Option<TransportError>>>,
}

#[allow(dead_code)]
impl RecordingSession {
    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }
}

impl TwinSession for RecordingSession {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if let Some(e) = *self.fail.lock().unwrap() {
            return Err(e);
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), payload.to_vec()));
        Ok(())
    }
}
