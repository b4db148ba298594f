//! Integration tests for the transport variants against mock I/O.
//!
//! Polling and push run their real timer / stream threads over
//! [`MockHttp`]; the twin transport runs over a recording session with
//! the test playing the hub.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;

use crate::mock_hw::{
    HttpCall, LogSink, MockBlinker, MockHttp, MockLamps, RecordingSession, ScriptedDelay,
    StreamScript,
};

use trafficlight::adapters::mqtt::{MqttTwinSession, SimHubHandle};
use trafficlight::app::engine::{Engine, EngineSettings};
use trafficlight::app::ports::Transport;
use trafficlight::config::{TrafficLightConfig, TransportMode};
use trafficlight::error::TransportError;
use trafficlight::events::{Event, EventQueue};
use trafficlight::light::{LightColor, OutputSet};
use trafficlight::transport::polling::PollingTransport;
use trafficlight::transport::push::PushTransport;
use trafficlight::transport::twin::{TwinRouter, TwinTransport};
use trafficlight::transport::{Link, RemoteUpdate};

const BASE: &str = "http://lights.test/";

fn config(mode: TransportMode) -> TrafficLightConfig {
    let mut cfg = TrafficLightConfig {
        transport_mode: Some(mode),
        api_base_url: BASE.into(),
        polling_interval_ms: 100,
        push_reconnect_ms: 500,
        ..TrafficLightConfig::default()
    };
    cfg.normalise();
    cfg
}

/// Collect remote updates until `n` arrived or `timeout` passed.
fn collect(queue: &EventQueue, n: usize, timeout: Duration) -> Vec<RemoteUpdate> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while out.len() < n && Instant::now() < deadline {
        match queue.try_next() {
            Some(Event::Remote { update, .. }) => out.push(update),
            Some(_) => {}
            None => thread::sleep(Duration::from_millis(5)),
        }
    }
    out
}

// ── Polling ───────────────────────────────────────────────────

#[test]
fn polling_fetches_immediately_then_on_every_tick() {
    let http = MockHttp::new();
    for _ in 0..10 {
        http.push_get(200, "\"Orange\"");
    }
    let mut t = PollingTransport::new(http.clone(), &config(TransportMode::Polling));
    let queue = EventQueue::new();

    t.subscribe(queue.remote_sink(1)).unwrap();
    // The immediate fetch is delivered before subscribe returns.
    assert_eq!(queue.len(), 1);

    let updates = collect(&queue, 3, Duration::from_secs(2));
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|u| *u == RemoteUpdate::value("\"Orange\"")));
    assert!(http.calls().iter().all(|c| *c == HttpCall::Get(format!("{BASE}api/trafficlight"))));

    t.unsubscribe();
    assert!(!t.is_subscribed());
    let gets = http.count(|c| matches!(c, HttpCall::Get(_)));
    thread::sleep(Duration::from_millis(300));
    // At most one tick already in flight when cancelled.
    assert!(http.count(|c| matches!(c, HttpCall::Get(_))) <= gets + 1);
}

#[test]
fn polling_maps_errors_to_unreachable() {
    let http = MockHttp::new();
    http.push_get(503, "");
    let mut t = PollingTransport::new(http.clone(), &config(TransportMode::Polling));
    assert_eq!(
        t.fetch_once(),
        RemoteUpdate::Unreachable(TransportError::Status(503))
    );
    assert_eq!(
        t.fetch_once(),
        RemoteUpdate::Unreachable(TransportError::ConnectFailed)
    );
}

#[test]
fn report_puts_lowercase_colour() {
    let http = MockHttp::new();
    let mut t = PollingTransport::new(http.clone(), &config(TransportMode::Polling));
    t.report(LightColor::Broken).unwrap();
    assert_eq!(
        http.calls(),
        vec![HttpCall::Put(format!("{BASE}api/trafficlight/broken"))]
    );

    http.set_put(Ok(500));
    assert_eq!(t.report(LightColor::Red), Err(TransportError::Status(500)));
}

#[test]
fn polled_change_goes_straight_from_red_to_green() {
    let http = MockHttp::new();
    http.push_get(200, "Red");
    for _ in 0..30 {
        http.push_get(200, "Green");
    }
    let queue = EventQueue::new();
    let mut engine = Engine::new(
        MockLamps::new(),
        PollingTransport::new(http.clone(), &config(TransportMode::Polling)),
        MockBlinker::new(),
        LogSink::new(),
        queue.clone(),
        EngineSettings::default(),
    );
    engine.bootstrap(&mut ScriptedDelay::default());
    engine.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while engine.current() != LightColor::Green && Instant::now() < deadline {
        match queue.try_next() {
            Some(event) => {
                engine.handle(event);
            }
            None => thread::sleep(Duration::from_millis(5)),
        }
    }
    engine.shutdown();

    // Bootstrap wrote four sets; everything after is the remote value.
    let writes = &engine.actuator().writes[4..];
    assert_eq!(writes.first(), Some(&LightColor::Red.outputs()));
    assert_eq!(writes.last(), Some(&LightColor::Green.outputs()));
    assert!(!writes.contains(&OutputSet::EMPTY));
    assert!(!writes.contains(&OutputSet::FAULT));
}

// ── Push ──────────────────────────────────────────────────────

#[test]
fn push_forwards_update_light_events() {
    let http = MockHttp::new();
    http.push_get(200, "Green");
    http.push_stream(StreamScript::Chunks(vec![
        ": keep-alive\n\n",
        "event: UpdateLight\nda",
        "ta: Red\n\nevent: Other\ndata: x\n\n",
        "event: UpdateLight\ndata: Orange\n\n",
    ]));
    let mut t = PushTransport::new(http.clone(), &config(TransportMode::Push));
    let queue = EventQueue::new();

    t.subscribe(queue.remote_sink(7)).unwrap();
    let updates = collect(&queue, 3, Duration::from_secs(2));
    t.unsubscribe();

    assert_eq!(
        updates,
        vec![
            RemoteUpdate::value("Green"),
            RemoteUpdate::value("Red"),
            RemoteUpdate::value("Orange"),
        ]
    );
    assert!(http.calls().contains(&HttpCall::Stream(format!("{BASE}hubs/trafficlight"))));
}

#[test]
fn push_initial_connect_failure_is_unreachable() {
    let http = MockHttp::new();
    http.push_get(200, "Red");
    http.push_stream(StreamScript::Fail(TransportError::ConnectFailed));
    let mut t = PushTransport::new(http.clone(), &config(TransportMode::Push));
    let queue = EventQueue::new();

    t.subscribe(queue.remote_sink(1)).unwrap();
    let updates = collect(&queue, 2, Duration::from_secs(2));
    t.unsubscribe();

    assert_eq!(
        updates,
        vec![
            RemoteUpdate::value("Red"),
            RemoteUpdate::Unreachable(TransportError::ConnectFailed),
        ]
    );
}

#[test]
fn push_reconnects_silently_after_drop() {
    let http = MockHttp::new();
    http.push_get(200, "Green");
    http.push_stream(StreamScript::Chunks(vec!["event: UpdateLight\ndata: Red\n\n"]));
    http.push_stream(StreamScript::Fail(TransportError::Io));
    http.push_stream(StreamScript::Chunks(vec!["event: UpdateLight\ndata: Orange\n\n"]));
    let mut t = PushTransport::new(http.clone(), &config(TransportMode::Push));
    let queue = EventQueue::new();

    t.subscribe(queue.remote_sink(1)).unwrap();
    let updates = collect(&queue, 3, Duration::from_secs(3));
    t.unsubscribe();

    // The dropped connection in between produces nothing.
    assert_eq!(
        updates,
        vec![
            RemoteUpdate::value("Green"),
            RemoteUpdate::value("Red"),
            RemoteUpdate::value("Orange"),
        ]
    );
    assert!(http.count(|c| matches!(c, HttpCall::Stream(_))) >= 3);
}

// ── Cloud twin ────────────────────────────────────────────────

/// Answer the first twin GET the device publishes.
fn answer_get(session: RecordingSession, router: Arc<TwinRouter>, body: &'static str) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let get = session
                .topics()
                .into_iter()
                .find(|t| t.starts_with("$iothub/twin/GET/"));
            if let Some(topic) = get {
                let rid = topic.rsplit('=').next().unwrap().to_owned();
                // A stale ack first: must not satisfy the GET.
                router.dispatch("$iothub/twin/res/204/?$rid=999", b"");
                router.dispatch(&format!("$iothub/twin/res/200/?$rid={rid}"), body.as_bytes());
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    })
}

#[test]
fn twin_fetch_waits_for_matching_response() {
    let router = Arc::new(TwinRouter::new());
    let session = RecordingSession::default();
    let hub = answer_get(
        session.clone(),
        router.clone(),
        r#"{"desired":{"Light":"Orange","$version":4},"reported":{}}"#,
    );
    let mut t = TwinTransport::new(session, router);

    let desired = t.fetch_desired().unwrap();
    hub.join().unwrap();
    assert_eq!(desired.light, Some(LightColor::Orange));
    assert_eq!(desired.version, Some(4));
}

#[test]
fn twin_subscribe_routes_patches_and_alerts() {
    let router = Arc::new(TwinRouter::new());
    let session = RecordingSession::default();
    let hub = answer_get(session.clone(), router.clone(), r#"{"desired":{}}"#);
    let mut t = TwinTransport::new(session.clone(), router.clone());
    let queue = EventQueue::new();

    t.subscribe(queue.remote_sink(2)).unwrap();
    hub.join().unwrap();

    router.dispatch(
        "$iothub/twin/PATCH/properties/desired/?$version=5",
        br#"{"Light":"Red","$version":5}"#,
    );
    let ack = router
        .dispatch("$iothub/methods/POST/Alert/?$rid=42", b"{}")
        .unwrap();
    assert_eq!(ack.topic, "$iothub/methods/res/200/?$rid=42");

    let mut events = Vec::new();
    queue.drain(|e| events.push(e));
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[1],
        Event::Remote { subscription: 2, update: RemoteUpdate::Value(v) } if v == "Red"
    ));
    assert_eq!(events[2], Event::AlertCommand { subscription: 2 });

    t.unsubscribe();
    assert!(!router.is_attached());
}

#[test]
fn twin_report_publishes_reported_patch() {
    let router = Arc::new(TwinRouter::new());
    let session = RecordingSession::default();
    let mut t = TwinTransport::new(session.clone(), router);

    t.report(LightColor::Green).unwrap();
    let published = session.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    assert!(published[0].0.starts_with("$iothub/twin/PATCH/properties/reported/?$rid="));
    assert_eq!(published[0].1, br#"{"Light":"Green"}"#.to_vec());
}

#[test]
fn twin_publish_failure_is_unreachable() {
    let router = Arc::new(TwinRouter::new());
    let session = RecordingSession::default();
    *session.fail.lock().unwrap() = Some(TransportError::Io);
    let mut t = TwinTransport::new(session, router);
    assert_eq!(t.fetch_once(), RemoteUpdate::Unreachable(TransportError::Io));
}

// ── Link ──────────────────────────────────────────────────────

#[test]
fn link_delegates_to_selected_variant() {
    let http = MockHttp::new();
    http.push_get(200, "Red");
    let mut link: Link<MockHttp, RecordingSession> =
        Link::Polling(PollingTransport::new(http.clone(), &config(TransportMode::Polling)));

    assert_eq!(link.mode(), TransportMode::Polling);
    assert_eq!(link.fetch_once(), RemoteUpdate::value("Red"));
    link.report(LightColor::Off).unwrap();
    link.unsubscribe();
    link.unsubscribe();
    assert_eq!(
        http.calls().last(),
        Some(&HttpCall::Put(format!("{BASE}api/trafficlight/off")))
    );

    let twin: Link<MockHttp, RecordingSession> = Link::CloudTwin(TwinTransport::new(
        RecordingSession::default(),
        Arc::new(TwinRouter::new()),
    ));
    assert_eq!(twin.mode(), TransportMode::CloudTwin);
}

// ── Twin engine over the loopback hub ─────────────────────────

type TwinEngine = Engine<MockLamps, TwinTransport<MqttTwinSession>, MockBlinker, LogSink>;

fn twin_engine(initial: &str) -> (TwinEngine, EventQueue, SimHubHandle) {
    let router = Arc::new(TwinRouter::new());
    let session = MqttTwinSession::simulated(router.clone());
    let hub = session.hub();
    hub.set_desired("Light", json!(initial));

    let queue = EventQueue::new();
    let mut engine = Engine::new(
        MockLamps::new(),
        TwinTransport::new(session, router),
        MockBlinker::new(),
        LogSink::new(),
        queue.clone(),
        EngineSettings::default(),
    );
    engine.bootstrap(&mut ScriptedDelay::default());
    engine.start().unwrap();
    while let Some(event) = queue.try_next() {
        engine.handle(event);
    }
    (engine, queue, hub)
}

fn settle(engine: &mut TwinEngine, queue: &EventQueue) {
    while let Some(event) = queue.try_next() {
        assert!(engine.handle(event));
    }
}

#[test]
fn twin_patch_for_other_property_leaves_light_alone() {
    let (mut engine, queue, hub) = twin_engine("Red");
    assert_eq!(engine.current(), LightColor::Red);
    let writes = engine.actuator().writes.len();

    hub.set_desired("Brightness", json!(3));
    settle(&mut engine, &queue);

    assert_eq!(engine.current(), LightColor::Red);
    assert_eq!(engine.displayed(), LightColor::Red.outputs());
    assert_eq!(engine.actuator().writes.len(), writes);
    assert_eq!(hub.reported("Light"), Some(json!("Red")));
}

#[test]
fn twin_patch_with_unknown_light_shows_fault() {
    let (mut engine, queue, hub) = twin_engine("Green");

    hub.set_desired("Light", json!("Purple"));
    settle(&mut engine, &queue);
    assert_eq!(engine.current(), LightColor::Green);
    assert_eq!(engine.displayed(), OutputSet::FAULT);

    hub.set_desired("Light", json!(3));
    settle(&mut engine, &queue);
    assert_eq!(engine.current(), LightColor::Green);
    assert_eq!(engine.displayed(), OutputSet::FAULT);
    assert_eq!(hub.reported("Light"), Some(json!("Green")));

    hub.set_desired("Light", json!("Orange"));
    settle(&mut engine, &queue);
    assert_eq!(engine.current(), LightColor::Orange);
    assert_eq!(hub.reported("Light"), Some(json!("Orange")));
}
