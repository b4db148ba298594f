//! Polling transport: periodic `GET` of the light resource.
//!
//! No persistent connection.  `subscribe` delivers one immediate fetch,
//! then a [`PeriodicTimer`] fetches again on every tick and forwards the
//! result whether or not it changed (level triggered).

use std::time::Duration;

use log::{debug, error, info};

use crate::app::ports::{HttpPort, Transport};
use crate::config::{TrafficLightConfig, TransportMode};
use crate::drivers::task_pin::POLL_TASK;
use crate::drivers::timer::PeriodicTimer;
use crate::error::TransportError;
use crate::events::RemoteSink;
use crate::light::LightColor;

use super::{LIGHT_RESOURCE, RemoteUpdate, put_report, report_path};

pub struct PollingTransport<H: HttpPort> {
    http: H,
    config: TrafficLightConfig,
    interval: Duration,
    timer: Option<PeriodicTimer>,
}

impl<H: HttpPort> PollingTransport<H> {
    pub fn new(http: H, config: &TrafficLightConfig) -> Self {
        Self {
            http,
            config: config.clone(),
            interval: Duration::from_millis(u64::from(config.polling_interval_ms)),
            timer: None,
        }
    }

    /// Whether a poll timer is currently installed.
    pub fn is_subscribed(&self) -> bool {
        self.timer.is_some()
    }
}

impl<H: HttpPort> Transport for PollingTransport<H> {
    fn mode(&self) -> TransportMode {
        TransportMode::Polling
    }

    fn subscribe(&mut self, sink: RemoteSink) -> Result<(), TransportError> {
        self.unsubscribe();

        sink.deliver(self.fetch_once());

        let mut http = self.http.clone();
        let url = self.config.api_url(LIGHT_RESOURCE);
        let timer = PeriodicTimer::start(POLL_TASK, self.interval, move || {
            sink.deliver(RemoteUpdate::from_response(http.get(&url)));
        })
        .map_err(|e| {
            error!("Polling: timer thread failed to start: {}", e);
            TransportError::Unavailable
        })?;

        info!(
            "Polling: every {} ms from {}",
            self.interval.as_millis(),
            self.config.api_url(LIGHT_RESOURCE)
        );
        self.timer = Some(timer);
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
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
            debug!("Polling: timer cancelled");
        }
    }
}
