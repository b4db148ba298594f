//! Device-twin credentials: connection string parsing and SAS tokens.
//!
//! The hub authenticates the device with a Shared Access Signature used
//! as the MQTT password:
//!
//! ```text
//! resource = url_encode("{HostName}/devices/{DeviceId}")
//! sig      = base64(HMAC-SHA256(base64_decode(SharedAccessKey),
//!                               "{resource}\n{expiry}"))
//! token    = "SharedAccessSignature sr={resource}&sig={url_encode(sig)}&se={expiry}"
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::ConfigError;

/// IoT Hub MQTT API version sent in the username.
pub const API_VERSION: &str = "2021-04-12";

/// Parsed `HostName=…;DeviceId=…;SharedAccessKey=…` string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    shared_access_key: String,
}

// The key is a secret; keep it out of logs.
impl core::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Everything the MQTT client needs to open the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttCredentials {
    pub url: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut host_name = None;
        let mut device_id = None;
        let mut key = None;

        for part in raw.trim().split(';').filter(|p| !p.trim().is_empty()) {
            let (name, value) = part
                .split_once('=')
                .ok_or(ConfigError::ConnectionString("expected Name=Value pairs"))?;
            let value = value.trim();
            match name.trim() {
                n if n.eq_ignore_ascii_case("HostName") => host_name = Some(value),
                n if n.eq_ignore_ascii_case("DeviceId") => device_id = Some(value),
                n if n.eq_ignore_ascii_case("SharedAccessKey") => key = Some(value),
                // GatewayHostName, ModuleId, … are not used by this device.
                _ => {}
            }
        }

        let host_name = host_name
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::ConnectionString("HostName missing"))?;
        let device_id = device_id
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::ConnectionString("DeviceId missing"))?;
        let key = key
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::ConnectionString("SharedAccessKey missing"))?;
        if STANDARD.decode(key).is_err() {
            return Err(ConfigError::ConnectionString(
                "SharedAccessKey is not base64",
            ));
        }

        Ok(Self {
            host_name: host_name.to_owned(),
            device_id: device_id.to_owned(),
            shared_access_key: key.to_owned(),
        })
    }

    /// SAS token valid until `expiry_unix` (seconds since the epoch).
    pub fn sas_token(&self, expiry_unix: u64) -> Result<String, ConfigError> {
        let resource = url_encode(&format!("{}/devices/{}", self.host_name, self.device_id));
        let key = STANDARD
            .decode(&self.shared_access_key)
            .map_err(|_| ConfigError::ConnectionString("SharedAccessKey is not base64"))?;

        let to_sign = format!("{resource}\n{expiry_unix}");
        let sig = hmac_sha256::HMAC::mac(to_sign.as_bytes(), &key);
        let sig = url_encode(&STANDARD.encode(sig));

        Ok(format!(
            "SharedAccessSignature sr={resource}&sig={sig}&se={expiry_unix}"
        ))
    }

    /// MQTT session parameters, with a token issued at `now_unix`.
    pub fn mqtt_credentials(
        &self,
        now_unix: u64,
        ttl_secs: u32,
    ) -> Result<MqttCredentials, ConfigError> {
        Ok(MqttCredentials {
            url: format!("mqtts://{}:8883", self.host_name),
            client_id: self.device_id.clone(),
            username: format!(
                "{}/{}/?api-version={}",
                self.host_name, self.device_id, API_VERSION
            ),
            password: self.sas_token(now_unix + u64::from(ttl_secs))?,
        })
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
pub fn url_encode(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(HEX[usize::from(b >> 4)] as char);
                out.push(HEX[usize::from(b & 0x0F)] as char);
            }
        }
    }
    out
}
