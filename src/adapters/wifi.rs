//! Station-mode Wi-Fi bring-up.
//!
//! Runs once at boot, before any transport exists.  Credentials come from
//! `wifiSsid` / `wifiPassword` in the configuration and are validated
//! into [`StationCredentials`] first, so a typo fails fast instead of
//! burning the whole retry schedule.
//!
//! - **`target_os = "espidf"`**: `BlockingWifi<EspWifi>`; an attempt is
//!   configure → start → connect → wait for the netif to come up.
//! - **all other targets**: the host network is assumed to be up.
//!
//! Failed attempts are retried after 2 s, 4 s, 8 s … (capped at 60 s),
//! [`MAX_ATTEMPTS`] tries in total.

use core::fmt;
use std::time::Duration;

use log::{info, warn};

use crate::config::TrafficLightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    /// `wifiSsid` is empty.
    MissingSsid,
    /// Longer than 32 bytes or not printable ASCII.
    BadSsid,
    /// Not empty (open network) and not 8–64 bytes.
    BadPassphrase,
    /// The driver refused the request.
    Driver,
    /// Every attempt of the retry schedule failed.
    GaveUp { attempts: u32 },
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSsid => write!(f, "wifiSsid is not configured"),
            Self::BadSsid => write!(f, "wifiSsid must be 1-32 printable ASCII bytes"),
            Self::BadPassphrase => {
                write!(f, "wifiPassword must be empty (open) or 8-64 bytes")
            }
            Self::Driver => write!(f, "WiFi driver error"),
            Self::GaveUp { attempts } => write!(f, "not associated after {attempts} attempts"),
        }
    }
}

impl std::error::Error for WifiError {}

pub const MAX_ATTEMPTS: u32 = 5;
const FIRST_RETRY: Duration = Duration::from_secs(2);
const MAX_RETRY: Duration = Duration::from_secs(60);

/// Waits between consecutive attempts (`MAX_ATTEMPTS - 1` of them).
pub fn retry_delays() -> impl Iterator<Item = Duration> {
    core::iter::successors(Some(FIRST_RETRY), |d| Some((*d * 2).min(MAX_RETRY)))
        .take(MAX_ATTEMPTS as usize - 1)
}

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

/// SSID and passphrase that the driver will accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationCredentials {
    ssid: heapless::String<32>,
    passphrase: heapless::String<64>,
}

impl StationCredentials {
    pub fn new(ssid: &str, passphrase: &str) -> Result<Self, WifiError> {
        if ssid.is_empty() {
            return Err(WifiError::MissingSsid);
        }
        // Control and non-ASCII bytes confuse the driver's scan matching.
        if !ssid.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
            return Err(WifiError::BadSsid);
        }
        if !passphrase.is_empty() && passphrase.len() < 8 {
            return Err(WifiError::BadPassphrase);
        }
        Ok(Self {
            ssid: ssid.try_into().map_err(|()| WifiError::BadSsid)?,
            passphrase: passphrase
                .try_into()
                .map_err(|()| WifiError::BadPassphrase)?,
        })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// No passphrase: associate without authentication.
    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }
}

impl TryFrom<&TrafficLightConfig> for StationCredentials {
    type Error = WifiError;

    fn try_from(config: &TrafficLightConfig) -> Result<Self, WifiError> {
        Self::new(config.wifi_ssid.trim(), &config.wifi_password)
    }
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

pub struct WifiAdapter {
    up: bool,

    #[cfg(target_os = "espidf")]
    wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: esp_idf_svc::hal::modem::Modem,
        sysloop: esp_idf_svc::eventloop::EspSystemEventLoop,
        nvs: Option<esp_idf_svc::nvs::EspDefaultNvsPartition>,
    ) -> Result<Self, WifiError> {
        use esp_idf_svc::wifi::{BlockingWifi, EspWifi};

        let driver = EspWifi::new(modem, sysloop.clone(), nvs).map_err(|e| {
            warn!("WiFi: driver init failed: {}", e);
            WifiError::Driver
        })?;
        let wifi = BlockingWifi::wrap(driver, sysloop).map_err(|_| WifiError::Driver)?;
        Ok(Self { up: false, wifi })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self { up: false }
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    /// Associate and wait for an address, following [`retry_delays`].
    pub fn connect(&mut self, creds: &StationCredentials) -> Result<(), WifiError> {
        let mut delays = retry_delays();
        let mut attempt = 1;
        loop {
            match self.associate(creds) {
                Ok(()) => {
                    self.up = true;
                    info!("WiFi: up on '{}' (attempt {})", creds.ssid(), attempt);
                    return Ok(());
                }
                Err(e) => match delays.next() {
                    Some(wait) => {
                        warn!("WiFi: attempt {} failed ({}), retry in {:?}", attempt, e, wait);
                        std::thread::sleep(wait);
                        attempt += 1;
                    }
                    None => return Err(WifiError::GaveUp { attempts: attempt }),
                },
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn associate(&mut self, creds: &StationCredentials) -> Result<(), WifiError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let conf = Configuration::Client(ClientConfiguration {
            ssid: creds.ssid.clone(),
            password: creds.passphrase.clone(),
            auth_method: if creds.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });

        let driver = |e: esp_idf_svc::sys::EspError| {
            warn!("WiFi: {}", e);
            WifiError::Driver
        };
        self.wifi.set_configuration(&conf).map_err(driver)?;
        if !self.wifi.is_started().map_err(driver)? {
            self.wifi.start().map_err(driver)?;
        }
        self.wifi.connect().map_err(driver)?;
        self.wifi.wait_netif_up().map_err(driver)
    }

    #[cfg(not(target_os = "espidf"))]
    fn associate(&mut self, creds: &StationCredentials) -> Result<(), WifiError> {
        info!("WiFi(sim): '{}' assumed reachable", creds.ssid());
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}
