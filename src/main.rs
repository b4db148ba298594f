//! Traffic-light firmware: main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  TrafficLightDriver  LogEventSink  NvsAdapter  WifiAdapter   │
//! │  (ActuatorPort)      (EventSink)   (Storage)   (boot net)    │
//! │  HttpClient          MqttTwinSession           TimerBlinker  │
//! │  (HttpPort)          (TwinSession)             (Blink)       │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │   Engine (reconciliation)  ◀── EventQueue ◀── button   │  │
//! │  │                                    ▲                   │  │
//! │  │        Link: Polling | Push | CloudTwin ───────────────┘  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Boot order: logger → NVS/config → lamps → network → transport →
//! lamp test → button task → subscribe → event loop.
#![deny(unused_must_use)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{PinDriver, Pull};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sntp::{EspSntp, SyncStatus};

use trafficlight::adapters::blink::TimerBlinker;
use trafficlight::adapters::http::HttpClient;
use trafficlight::adapters::log_sink::LogEventSink;
use trafficlight::adapters::mqtt::MqttTwinSession;
use trafficlight::adapters::nvs::NvsAdapter;
use trafficlight::adapters::time::Esp32TimeAdapter;
use trafficlight::adapters::wifi::{StationCredentials, WifiAdapter};
use trafficlight::app::engine::{Engine, EngineSettings};
use trafficlight::app::ports::ActuatorPort;
use trafficlight::config::{TrafficLightConfig, TransportMode};
use trafficlight::drivers::button::{ButtonEvents, PinEdges, spawn_button_task};
use trafficlight::drivers::light::TrafficLightDriver;
use trafficlight::events::EventQueue;
use trafficlight::light::OutputSet;
use trafficlight::pins;
use trafficlight::transport::credentials::ConnectionString;
use trafficlight::transport::polling::PollingTransport;
use trafficlight::transport::push::PushTransport;
use trafficlight::transport::twin::{TwinRouter, TwinTransport};
use trafficlight::transport::Link;

type DeviceLink = Link<HttpClient, MqttTwinSession>;

/// How long to wait for SNTP before giving up on a twin session.
const SNTP_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  TrafficLight v{}                 ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 2. Configuration ──────────────────────────────────────
    let nvs = NvsAdapter::new(nvs_partition.clone());
    let config = nvs.load_config();
    info!(
        "Config: mode={:?} api={} poll={} ms",
        config.mode(),
        config.api_base_url,
        config.polling_interval_ms
    );

    // ── 3. Lamps ──────────────────────────────────────────────
    info!(
        "Pins: green=GPIO{} orange=GPIO{} red=GPIO{} button=GPIO{}",
        pins::GREEN_LAMP_GPIO,
        pins::ORANGE_LAMP_GPIO,
        pins::RED_LAMP_GPIO,
        pins::BUTTON_GPIO
    );
    let io = peripherals.pins;
    let mut lamps = TrafficLightDriver::new(
        PinDriver::output(io.gpio27)?,
        PinDriver::output(io.gpio18)?,
        PinDriver::output(io.gpio4)?,
    );
    lamps.write(OutputSet::EMPTY);

    // ── 4. Network + transport ────────────────────────────────
    let time = Esp32TimeAdapter::new();
    let mut wifi = WifiAdapter::new(peripherals.modem, sysloop, Some(nvs_partition))?;

    let link = match connect(&mut wifi, &nvs, &config, &time) {
        Ok(link) => link,
        Err(e) => {
            // Nothing to reconcile against; leave the fault pattern up
            // and let the reset handler retry from scratch.
            error!("Startup failed: {:#}", e);
            lamps.write(OutputSet::FAULT);
            return Err(e);
        }
    };

    // ── 5. Engine ─────────────────────────────────────────────
    let queue = EventQueue::new();
    let mut engine = Engine::new(
        lamps,
        link,
        TimerBlinker::new(queue.clone()),
        LogEventSink::new(),
        queue.clone(),
        EngineSettings::from(&config),
    );
    engine.bootstrap(&mut FreeRtos);

    // ── 6. Button ─────────────────────────────────────────────
    let mut button = PinDriver::input(io.gpio23)?;
    button.set_pull(Pull::Up)?;
    let clock = time.clone();
    let presses = ButtonEvents::new(PinEdges::new(button, move || clock.uptime_ms()));
    spawn_button_task(presses, queue).context("button task")?;

    // ── 7. Run ────────────────────────────────────────────────
    if let Err(e) = engine.start() {
        // Shown as a fault; the button revives (polling/push) or the
        // hub re-sends (twin).
        warn!("Initial subscribe failed: {}", e);
    }
    info!("System ready. Entering event loop.");
    engine.run();

    info!("Event loop exited");
    Ok(())
}

/// Bring up WiFi and build the configured transport.
fn connect(
    wifi: &mut WifiAdapter,
    nvs: &NvsAdapter,
    config: &TrafficLightConfig,
    time: &Esp32TimeAdapter,
) -> Result<DeviceLink> {
    wifi.connect(&StationCredentials::try_from(config)?)?;

    let http = HttpClient::default();
    let link = match config.mode() {
        TransportMode::Polling => Link::Polling(PollingTransport::new(http, config)),
        TransportMode::Push => Link::Push(PushTransport::new(http, config)),
        TransportMode::CloudTwin => {
            let raw = if config.use_hardware_credential_store {
                nvs.twin_connection_string()
                    .map_err(|e| anyhow!("twin connection string: {e}"))?
            } else {
                config.connection_string.clone()
            };
            let cs = ConnectionString::parse(&raw).map_err(|e| anyhow!("{e}"))?;

            let now = wait_for_wall_clock(time)?;
            let creds = cs
                .mqtt_credentials(now, config.sas_token_ttl_secs)
                .map_err(|e| anyhow!("{e}"))?;

            let router = Arc::new(TwinRouter::new());
            let session = MqttTwinSession::connect(&creds, router.clone())
                .map_err(|e| anyhow!("MQTT connect to {}: {e}", cs.host_name))?;
            Link::CloudTwin(TwinTransport::new(session, router))
        }
    };
    Ok(link)
}

/// SAS tokens carry an absolute expiry, so the clock must be synced first.
fn wait_for_wall_clock(time: &Esp32TimeAdapter) -> Result<u64> {
    let sntp = EspSntp::new_default()?;
    let started = Instant::now();
    loop {
        if sntp.get_sync_status() == SyncStatus::Completed {
            if let Some(now) = time.unix_time_secs() {
                info!("SNTP: synced ({})", now);
                return Ok(now);
            }
        }
        if started.elapsed() > SNTP_TIMEOUT {
            return Err(anyhow!("SNTP sync timed out"));
        }
        FreeRtos::delay_ms(250);
    }
}
