//! Button pipeline: GPIO edges → debouncer → event queue → engine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use embedded_hal::digital::{ErrorKind, ErrorType, InputPin};
use embedded_hal_async::digital::Wait;

use crate::mock_hw::{LogSink, MockBlinker, MockLamps, MockTransport, ScriptedDelay};

use trafficlight::app::engine::{Engine, EngineSettings};
use trafficlight::config::TransportMode;
use trafficlight::drivers::button::{ButtonEvent, ButtonEvents, PinEdges, spawn_button_task};
use trafficlight::events::{Event, EventQueue};
use trafficlight::light::{LightColor, OutputSet};

/// Input pin replaying `(level_low, at_ms)` transitions.
struct ScriptedPin {
    script: VecDeque<(bool, u32)>,
    low: bool,
    now_ms: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

#[derive(Debug)]
struct ScriptEnded;

impl embedded_hal::digital::Error for ScriptEnded {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl ErrorType for ScriptedPin {
    type Error = ScriptEnded;
}

impl InputPin for ScriptedPin {
    fn is_high(&mut self) -> Result<bool, ScriptEnded> {
        Ok(!self.low)
    }
    fn is_low(&mut self) -> Result<bool, ScriptEnded> {
        Ok(self.low)
    }
}

impl ScriptedPin {
    fn step(&mut self) -> Result<(), ScriptEnded> {
        let (low, at) = self.script.pop_front().ok_or(ScriptEnded)?;
        self.low = low;
        self.now_ms.store(at, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}

impl Wait for ScriptedPin {
    async fn wait_for_high(&mut self) -> Result<(), ScriptEnded> {
        self.step()
    }
    async fn wait_for_low(&mut self) -> Result<(), ScriptEnded> {
        self.step()
    }
    async fn wait_for_rising_edge(&mut self) -> Result<(), ScriptEnded> {
        self.step()
    }
    async fn wait_for_falling_edge(&mut self) -> Result<(), ScriptEnded> {
        self.step()
    }
    async fn wait_for_any_edge(&mut self) -> Result<(), ScriptEnded> {
        self.step()
    }
}

fn scripted(edges: &[(bool, u32)]) -> ButtonEvents<PinEdges<ScriptedPin, impl FnMut() -> u32 + use<>>> {
    let now = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let clock = now.clone();
    let pin = ScriptedPin {
        script: edges.iter().copied().collect(),
        low: false,
        now_ms: now,
    };
    ButtonEvents::new(PinEdges::new(pin, move || {
        clock.load(std::sync::atomic::Ordering::Acquire)
    }))
}

#[test]
fn pin_edges_are_debounced_into_presses() {
    // Two bouncy presses 500 ms apart.
    let edges = [
        (true, 100),
        (false, 103),
        (true, 106),
        (false, 300),
        (true, 600),
        (false, 610),
        (true, 612),
        (false, 900),
    ];
    let presses: Vec<_> = scripted(&edges).collect();
    assert_eq!(presses, vec![ButtonEvent::Press, ButtonEvent::Press]);
}

#[test]
fn button_task_drives_engine_kill_and_revive() {
    let queue = EventQueue::new();
    let mut engine = Engine::new(
        MockLamps::new(),
        MockTransport::new(TransportMode::Polling),
        MockBlinker::new(),
        LogSink::new(),
        queue.clone(),
        EngineSettings::default(),
    );
    engine.bootstrap(&mut ScriptedDelay::default());
    engine.start().unwrap();

    let edges = [(true, 1000), (false, 1200), (true, 2000), (false, 2200)];
    spawn_button_task(scripted(&edges), queue.clone()).unwrap();

    // Initial fetch plus two presses.
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut presses = 0;
    while presses < 2 && Instant::now() < deadline {
        match queue.try_next() {
            Some(event @ Event::Button(_)) => {
                presses += 1;
                engine.handle(event);
                if presses == 1 {
                    assert_eq!(engine.current(), LightColor::Broken);
                    assert_eq!(engine.displayed(), OutputSet::BROKEN);
                }
            }
            Some(other) => {
                engine.handle(other);
            }
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    assert_eq!(presses, 2);
    assert!(!engine.is_dead());
    assert_eq!(engine.current(), LightColor::Green);
}
