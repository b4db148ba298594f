//! Device configuration.
//!
//! Resolved once at boot (NVS override → embedded `configuration.json` →
//! defaults) and handed to the core as already-validated values.  The
//! legacy client file shape (`ApiUrl`, `UseSignalR`,
//! `ApiPollingPeriodInMs`) is still accepted.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// JSON document compiled into the firmware image.
pub const EMBEDDED_CONFIG_JSON: &str = include_str!("../configuration.json");

/// How remote state reaches the device.  Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// Periodic `GET` of the light value.
    Polling,
    /// Server-pushed `UpdateLight` events on the hub stream.
    Push,
    /// Device twin (desired/reported properties) over MQTT.
    CloudTwin,
}

/// Core device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficLightConfig {
    // --- Transport ---
    /// Transport selection.  Falls back to `use_signal_r` when absent.
    pub transport_mode: Option<TransportMode>,
    /// Legacy switch: `true` = push hub, `false` = polling.
    #[serde(alias = "UseSignalR", skip_serializing)]
    pub use_signal_r: Option<bool>,
    /// Period between two `GET`s in polling mode (milliseconds).
    #[serde(alias = "ApiPollingPeriodInMs")]
    pub polling_interval_ms: u32,
    /// Base URL of the light API (polling and push).
    #[serde(alias = "ApiUrl")]
    pub api_base_url: String,
    /// Device-twin connection string (`HostName=…;DeviceId=…;SharedAccessKey=…`).
    pub connection_string: String,
    /// Read the connection string from the encrypted NVS namespace instead.
    pub use_hardware_credential_store: bool,

    // --- Network ---
    pub wifi_ssid: String,
    pub wifi_password: String,

    // --- Timing ---
    /// Alert blink half-period (milliseconds).
    pub blink_period_ms: u32,
    /// How long each lamp stays lit during the startup sequence (milliseconds).
    pub bootstrap_step_ms: u32,
    /// Keep-alive delay before the push stream reconnects (milliseconds).
    pub push_reconnect_ms: u32,
    /// Lifetime of the device-twin SAS token (seconds).
    pub sas_token_ttl_secs: u32,
}

impl Default for TrafficLightConfig {
    fn default() -> Self {
        Self {
            // Transport
            transport_mode: None,
            use_signal_r: None,
            polling_interval_ms: 500,
            api_base_url: "http://localhost/".into(),
            connection_string: String::new(),
            use_hardware_credential_store: false,

            // Network
            wifi_ssid: String::new(),
            wifi_password: String::new(),

            // Timing
            blink_period_ms: 500,
            bootstrap_step_ms: 1000,
            push_reconnect_ms: 5000,
            sas_token_ttl_secs: 3600,
        }
    }
}

impl TrafficLightConfig {
    /// Parse, normalise and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut cfg: Self = serde_json::from_str(json).map_err(|_| ConfigError::Parse)?;
        cfg.normalise();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Pick the boot configuration.  A stored override is used when it
    /// parses and validates; otherwise the embedded document, and as a
    /// last resort the compiled-in defaults.
    pub fn resolve(stored: Option<&[u8]>) -> Self {
        if let Some(bytes) = stored {
            match core::str::from_utf8(bytes)
                .map_err(|_| ConfigError::Parse)
                .and_then(Self::from_json)
            {
                Ok(cfg) => {
                    info!("Config: using stored override");
                    return cfg;
                }
                Err(e) => warn!("Config: stored override rejected ({}), using embedded", e),
            }
        }
        match Self::from_json(EMBEDDED_CONFIG_JSON) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("Config: embedded document rejected ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.normalise();
                cfg
            }
        }
    }

    /// The effective transport (explicit mode wins over the legacy flag).
    pub fn mode(&self) -> TransportMode {
        match (self.transport_mode, self.use_signal_r) {
            (Some(mode), _) => mode,
            (None, Some(true)) => TransportMode::Push,
            (None, _) => TransportMode::Polling,
        }
    }

    /// Resolve the legacy flag into `transport_mode` and make sure the base
    /// URL ends with a `/` so relative paths join cleanly.
    pub fn normalise(&mut self) {
        self.transport_mode = Some(self.mode());
        self.use_signal_r = None;
        self.api_base_url = self.api_base_url.trim().to_owned();
        if !self.api_base_url.ends_with('/') {
            self.api_base_url.push('/');
        }
    }

    /// Join a path onto the API base URL.
    pub fn api_url(&self, path: &str) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    /// Range-check every field.  Invalid values are rejected, not clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=60_000).contains(&self.polling_interval_ms) {
            return Err(ConfigError::ValidationFailed(
                "pollingIntervalMs must be 100–60000",
            ));
        }
        if !(100..=5_000).contains(&self.blink_period_ms) {
            return Err(ConfigError::ValidationFailed(
                "blinkPeriodMs must be 100–5000",
            ));
        }
        if self.bootstrap_step_ms > 10_000 {
            return Err(ConfigError::ValidationFailed(
                "bootstrapStepMs must be 0–10000",
            ));
        }
        if !(500..=300_000).contains(&self.push_reconnect_ms) {
            return Err(ConfigError::ValidationFailed(
                "pushReconnectMs must be 500–300000",
            ));
        }
        if !(60..=86_400).contains(&self.sas_token_ttl_secs) {
            return Err(ConfigError::ValidationFailed(
                "sasTokenTtlSecs must be 60–86400",
            ));
        }

        match self.mode() {
            TransportMode::Polling | TransportMode::Push => {
                let url = self.api_base_url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::ValidationFailed(
                        "apiBaseUrl must be an http(s) URL",
                    ));
                }
            }
            TransportMode::CloudTwin => {
                if !self.use_hardware_credential_store && self.connection_string.trim().is_empty() {
                    return Err(ConfigError::ValidationFailed(
                        "connectionString is required for CloudTwin unless useHardwareCredentialStore is set",
                    ));
                }
            }
        }
        Ok(())
    }
}
