//! Reconciliation engine: the single owner of the light state.
//!
//! [`Engine`] holds the current light, decides every transition and is
//! the only writer of the lamps and the only caller of
//! [`Transport::report`].  Button presses, remote updates, alert commands
//! and blink ticks all reach it through one [`EventQueue`] and are
//! handled strictly one at a time.
//!
//! ```text
//!  Button ───┐                       ┌──▶ ActuatorPort
//!  Transport ┼──▶ EventQueue ──▶ Engine ──▶ Transport::report
//!  Blinker ──┘                       └──▶ EventSink
//! ```
//!
//! Updates carry the id of the subscription (or alert session) that
//! produced them.  Anything tagged with an id that is no longer active
//! is dropped, so once `unsubscribe` or `stop_blink` returns, nothing
//! from the old source can change the light.
//!
//! ## Button semantics
//!
//! | Mode           | Alive / no alert             | Dead / alert active           |
//! |----------------|------------------------------|-------------------------------|
//! | Polling, Push  | kill: Broken {Red, Green}    | revive: Green, resubscribe    |
//! | CloudTwin      | cycle G→O→R→Off, report      | cancel alert, re-fetch, apply |

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::config::{TrafficLightConfig, TransportMode};
use crate::drivers::button::ButtonEvent;
use crate::error::{ApplyError, TransportError};
use crate::events::{Event, EventQueue, SubscriptionId};
use crate::light::{LightColor, OutputSet};
use crate::transport::{DesiredLight, RemoteUpdate};

use super::alert::AlertSession;
use super::bootstrap::run_lamp_test;
use super::events::{AppEvent, Cause};
use super::ports::{ActuatorPort, BlinkScheduler, EventSink, Transport};

// ───────────────────────────────────────────────────────────────
// Settings and results
// ───────────────────────────────────────────────────────────────

/// Timing knobs the engine needs from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub blink_period_ms: u32,
    pub bootstrap_step_ms: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            blink_period_ms: 500,
            bootstrap_step_ms: 1000,
        }
    }
}

impl From<&TrafficLightConfig> for EngineSettings {
    fn from(cfg: &TrafficLightConfig) -> Self {
        Self {
            blink_period_ms: cfg.blink_period_ms,
            bootstrap_step_ms: cfg.bootstrap_step_ms,
        }
    }
}

/// What a button press did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Polling/Push: link stopped, Broken shown.
    Killed,
    /// Polling/Push: Green shown, link restarted.
    Revived,
    /// Twin: advanced to the next colour of the cycle.
    Cycled,
    /// Twin: alert cancelled and desired state re-applied.
    AlertAcknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LightColor,
    pub to: LightColor,
    pub kind: TransitionKind,
}

// ───────────────────────────────────────────────────────────────
// Engine
// ───────────────────────────────────────────────────────────────

pub struct Engine<A, T, B, E> {
    actuator: A,
    transport: T,
    blinker: B,
    sink: E,
    queue: EventQueue,
    settings: EngineSettings,

    current: LightColor,
    displayed: OutputSet,
    dead: bool,
    alert: Option<AlertSession>,
    last_reported: Option<LightColor>,

    subscription: Option<SubscriptionId>,
    next_subscription: SubscriptionId,
    next_session: u32,
}

impl<A, T, B, E> Engine<A, T, B, E>
where
    A: ActuatorPort,
    T: Transport,
    B: BlinkScheduler,
    E: EventSink,
{
    /// Build an idle engine.  Nothing is written to the lamps until
    /// [`bootstrap`](Self::bootstrap).
    pub fn new(
        actuator: A,
        transport: T,
        blinker: B,
        sink: E,
        queue: EventQueue,
        settings: EngineSettings,
    ) -> Self {
        Self {
            actuator,
            transport,
            blinker,
            sink,
            queue,
            settings,
            current: LightColor::Off,
            displayed: OutputSet::EMPTY,
            dead: false,
            alert: None,
            last_reported: None,
            subscription: None,
            next_subscription: 1,
            next_session: 1,
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn current(&self) -> LightColor {
        self.current
    }

    /// Lamps most recently written.
    pub fn displayed(&self) -> OutputSet {
        self.displayed
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn alert_active(&self) -> bool {
        self.alert.is_some()
    }

    /// Last state the authority acknowledged receiving from us.
    pub fn last_reported(&self) -> Option<LightColor> {
        self.last_reported
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn blinker(&self) -> &B {
        &self.blinker
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Lamp test, then Off.  Must complete before [`start`](Self::start).
    pub fn bootstrap(&mut self, delay: &mut impl DelayNs) {
        run_lamp_test(&mut self.actuator, delay, self.settings.bootstrap_step_ms);
        self.displayed = OutputSet::EMPTY;
        self.set_current(LightColor::Off, Cause::Bootstrap);
        self.sink.emit(&AppEvent::Bootstrapped);
    }

    /// Subscribe the transport.  Remote events start flowing into the queue.
    pub fn start(&mut self) -> Result<(), TransportError> {
        self.subscribe()?;
        let mode = self.transport.mode();
        self.sink.emit(&AppEvent::Started(mode));
        info!("Engine started ({:?})", mode);
        Ok(())
    }

    /// Process queued events until [`Event::Shutdown`].
    pub fn run(&mut self) {
        loop {
            let event = self.queue.next();
            if !self.handle(event) {
                break;
            }
        }
        self.shutdown();
    }

    /// Release the transport and the blink timer.
    pub fn shutdown(&mut self) {
        self.unsubscribe();
        self.stop_alert();
        self.sink.emit(&AppEvent::Stopped);
        info!("Engine stopped");
    }

    /// Dispatch one event.  Returns `false` on [`Event::Shutdown`].
    pub fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::Button(press) => {
                let t = self.apply_button(press);
                debug!("Button: {:?} {} -> {}", t.kind, t.from, t.to);
            }
            Event::Remote {
                subscription,
                update,
            } => {
                if self.subscription == Some(subscription) {
                    // Failures are already shown and emitted.
                    let _ = self.apply_remote(update);
                } else {
                    debug!("Dropping update from inactive subscription {}", subscription);
                }
            }
            Event::AlertCommand { subscription } => {
                if self.subscription == Some(subscription) {
                    self.start_alert();
                } else {
                    debug!("Dropping alert from inactive subscription {}", subscription);
                }
            }
            Event::BlinkTick { session } => self.blink_tick(session),
            Event::Shutdown => return false,
        }
        true
    }

    // ── Remote updates ────────────────────────────────────────

    /// Apply one remote state proposal.
    ///
    /// On error the fault pattern {Orange, Red} is shown and the current
    /// light is left unchanged.
    pub fn apply_remote(&mut self, update: RemoteUpdate) -> Result<(), ApplyError> {
        self.apply_update(update, Cause::Remote)
    }

    fn apply_update(&mut self, update: RemoteUpdate, cause: Cause) -> Result<(), ApplyError> {
        match update {
            RemoteUpdate::Value(raw) => match LightColor::parse(&raw) {
                Some(color) => {
                    self.accept_remote(color, false, cause);
                    Ok(())
                }
                None => {
                    warn!("Remote value {:?} is not a light colour", raw);
                    self.show_fault(ApplyError::Unparseable);
                    Err(ApplyError::Unparseable)
                }
            },
            RemoteUpdate::Desired(DesiredLight { light, .. }) => {
                match light {
                    Some(color) => self.accept_remote(color, false, cause),
                    // No remote opinion yet: Off, and tell the twin so.
                    None => self.accept_remote(LightColor::Off, true, cause),
                }
                Ok(())
            }
            RemoteUpdate::Unreachable(e) => {
                warn!("Remote authority unreachable: {}", e);
                self.show_fault(ApplyError::Unreachable);
                Err(ApplyError::Unreachable)
            }
        }
    }

    fn accept_remote(&mut self, color: LightColor, force_report: bool, cause: Cause) {
        if self.alert.is_some() {
            // Stored only; the blink owns the lamps until acknowledged.
            debug!("Alert active: holding {} until acknowledged", color);
            self.set_current(color, cause);
            return;
        }

        self.show(color.outputs());
        self.set_current(color, cause);

        if self.transport.mode() == TransportMode::CloudTwin
            && (force_report || self.last_reported != Some(color))
        {
            self.report_best_effort(color);
        }
    }

    fn show_fault(&mut self, error: ApplyError) {
        if self.alert.is_some() {
            debug!("Alert active: not showing fault ({})", error);
        } else {
            self.show(OutputSet::FAULT);
        }
        self.sink.emit(&AppEvent::FaultShown(error));
    }

    // ── Button ────────────────────────────────────────────────

    /// React to a debounced press; behaviour depends on the transport mode.
    pub fn apply_button(&mut self, _press: ButtonEvent) -> Transition {
        match self.transport.mode() {
            TransportMode::Polling | TransportMode::Push => {
                if self.dead {
                    self.revive()
                } else {
                    self.kill()
                }
            }
            TransportMode::CloudTwin => {
                if self.alert.is_some() {
                    self.acknowledge_alert()
                } else {
                    self.cycle()
                }
            }
        }
    }

    fn kill(&mut self) -> Transition {
        let from = self.current;
        self.unsubscribe();
        self.dead = true;
        self.show(LightColor::Broken.outputs());
        self.set_current(LightColor::Broken, Cause::Button);
        self.sink.emit(&AppEvent::DeadChanged(true));
        self.report_best_effort(LightColor::Broken);
        Transition {
            from,
            to: LightColor::Broken,
            kind: TransitionKind::Killed,
        }
    }

    fn revive(&mut self) -> Transition {
        let from = self.current;
        self.report_best_effort(LightColor::Green);
        self.dead = false;
        self.show(LightColor::Green.outputs());
        self.set_current(LightColor::Green, Cause::Button);
        self.sink.emit(&AppEvent::DeadChanged(false));
        // Still dead without a subscription, so the next press revives again.
        if self.subscribe().is_err() {
            self.dead = true;
            self.sink.emit(&AppEvent::DeadChanged(true));
        }
        Transition {
            from,
            to: LightColor::Green,
            kind: TransitionKind::Revived,
        }
    }

    fn cycle(&mut self) -> Transition {
        let from = self.current;
        let to = from.next_in_cycle();
        self.show(to.outputs());
        self.set_current(to, Cause::Button);
        self.report_best_effort(to);
        Transition {
            from,
            to,
            kind: TransitionKind::Cycled,
        }
    }

    fn acknowledge_alert(&mut self) -> Transition {
        let from = self.current;
        self.stop_alert();
        // Re-read instead of trusting what was stored during the alert.
        let update = self.transport.fetch_once();
        let _ = self.apply_update(update, Cause::AlertAcknowledged);
        Transition {
            from,
            to: self.current,
            kind: TransitionKind::AlertAcknowledged,
        }
    }

    // ── Alert ─────────────────────────────────────────────────

    /// Begin (or restart) the blink session.  Cloud-twin only.
    pub fn start_alert(&mut self) {
        if self.transport.mode() != TransportMode::CloudTwin {
            warn!("Alert ignored in {:?} mode", self.transport.mode());
            return;
        }
        if self.alert.take().is_some() {
            self.blinker.stop_blink();
            debug!("Alert restarted");
        }

        let id = self.next_session;
        self.next_session = self.next_session.wrapping_add(1);
        let session = AlertSession::new(id, self.settings.blink_period_ms);

        self.show(session.outputs());
        self.blinker.start_blink(id, session.period_ms());
        self.alert = Some(session);
        self.sink.emit(&AppEvent::AlertStarted);
    }

    /// Toggle the blink if `session` is the active one.
    pub fn blink_tick(&mut self, session: u32) {
        let outputs = match self.alert.as_mut() {
            Some(s) if s.id() == session => s.toggle(),
            _ => {
                debug!("Dropping tick from inactive blink session {}", session);
                return;
            }
        };
        self.show(outputs);
    }

    fn stop_alert(&mut self) {
        if self.alert.take().is_some() {
            self.blinker.stop_blink();
            self.sink.emit(&AppEvent::AlertStopped);
        }
    }

    // ── Reporting ─────────────────────────────────────────────

    /// Report the current light to the authority.
    pub fn report_current(&mut self) -> Result<(), TransportError> {
        let state = self.current;
        self.transport.report(state)?;
        self.last_reported = Some(state);
        Ok(())
    }

    fn report_best_effort(&mut self, state: LightColor) {
        match self.transport.report(state) {
            Ok(()) => self.last_reported = Some(state),
            Err(error) => self.sink.emit(&AppEvent::ReportFailed { state, error }),
        }
    }

    // ── Internals ─────────────────────────────────────────────

    fn subscribe(&mut self) -> Result<(), TransportError> {
        let id = self.next_subscription;
        self.next_subscription = self.next_subscription.wrapping_add(1);
        self.subscription = Some(id);

        if let Err(e) = self.transport.subscribe(self.queue.remote_sink(id)) {
            warn!("Subscribe failed: {}", e);
            self.subscription = None;
            self.show_fault(ApplyError::Unreachable);
            return Err(e);
        }
        Ok(())
    }

    fn unsubscribe(&mut self) {
        self.transport.unsubscribe();
        self.subscription = None;
    }

    fn show(&mut self, outputs: OutputSet) {
        self.actuator.write(outputs);
        self.displayed = outputs;
    }

    fn set_current(&mut self, to: LightColor, cause: Cause) {
        let from = self.current;
        self.current = to;
        if from != to {
            self.sink.emit(&AppEvent::StateChanged { from, to, cause });
        }
    }
}
