//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements      | Connects to                    |
//! |------------|-----------------|--------------------------------|
//! | `blink`    | BlinkScheduler  | Core-pinned periodic timer     |
//! | `http`     | HttpPort        | EspHttpConnection / std::net   |
//! | `log_sink` | EventSink       | Serial log output              |
//! | `mqtt`     | TwinSession     | EspMqttClient / loopback hub   |
//! | `nvs`      | StoragePort     | NVS / in-memory store          |
//! | `time`     | (uptime, clock) | ESP32 system timer             |
//! | `wifi`     | (boot network)  | ESP-IDF WiFi STA               |

pub mod blink;
pub mod http;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod time;
pub mod wifi;
