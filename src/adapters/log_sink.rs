//! [`EventSink`] that prints one tagged line per engine event on the
//! serial console.

use log::{info, warn};

use crate::app::events::{AppEvent, Cause};
use crate::app::ports::EventSink;

#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

fn cause_tag(cause: Cause) -> &'static str {
    match cause {
        Cause::Bootstrap => "bootstrap",
        Cause::Remote => "remote",
        Cause::Button => "button",
        Cause::AlertAcknowledged => "alert-ack",
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Bootstrapped => {
                info!("BOOT  | lamp test complete, light Off");
            }
            AppEvent::Started(mode) => {
                info!("START | transport={:?}", mode);
            }
            AppEvent::StateChanged { from, to, cause } => {
                info!("STATE | {} -> {} ({})", from, to, cause_tag(*cause));
            }
            AppEvent::FaultShown(e) => {
                warn!("FAULT | {} (showing Orange+Red)", e);
            }
            AppEvent::DeadChanged(dead) => {
                info!("LINK  | {}", if *dead { "killed by button" } else { "revived by button" });
            }
            AppEvent::AlertStarted => {
                info!("ALERT | blinking");
            }
            AppEvent::AlertStopped => {
                info!("ALERT | stopped");
            }
            AppEvent::ReportFailed { state, error } => {
                warn!("REPORT| {} dropped: {}", state, error);
            }
            AppEvent::Stopped => {
                info!("STOP  | engine loop exited");
            }
        }
    }
}
