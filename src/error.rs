//! Unified error types for the traffic-light firmware.
//!
//! A single top-level [`Error`] enum that every subsystem converts into,
//! keeping `main`'s error handling uniform.  The per-subsystem enums are
//! `Copy` so they can be logged, stored in events and compared in tests
//! without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A remote value could not be applied.
    Apply(ApplyError),
    /// The remote authority could not be reached or rejected a request.
    Transport(TransportError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// Persistent storage failed.
    Storage(StorageError),
    /// A lamp output could not be driven.
    Actuator(ActuatorError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apply(e) => write!(f, "apply: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Apply errors (engine)
// ---------------------------------------------------------------------------

/// Why a remote update was not applied.  In both cases the engine shows
/// the fault pattern and keeps the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyError {
    /// The payload does not name a known light colour.
    Unparseable,
    /// The transport could not obtain a value from the authority.
    Unreachable,
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable => write!(f, "remote value is not a light colour"),
            Self::Unreachable => write!(f, "remote authority unreachable"),
        }
    }
}

impl From<ApplyError> for Error {
    fn from(e: ApplyError) -> Self {
        Self::Apply(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Could not open a connection to the authority.
    ConnectFailed,
    /// The request was sent but the authority answered with a non-success status.
    Status(u16),
    /// Reading or writing the connection failed mid-way.
    Io,
    /// The response body or twin document could not be decoded.
    Malformed,
    /// The operation is not available on this platform or transport.
    Unavailable,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::Status(code) => write!(f, "unexpected status {code}"),
            Self::Io => write!(f, "I/O error"),
            Self::Malformed => write!(f, "malformed response"),
            Self::Unavailable => write!(f, "not available"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    Parse,
    /// A field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// The device-twin connection string is missing a required part.
    ConnectionString(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "configuration is not valid JSON"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::ConnectionString(msg) => write!(f, "connection string: {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Stored value is larger than the caller's buffer allows.
    TooLarge,
    /// Generic I/O error from the NVS backend.
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::TooLarge => write!(f, "value too large"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// GPIO set failed for the named lamp.
    GpioWriteFailed(&'static str),
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed(lamp) => write!(f, "GPIO write failed ({lamp} lamp)"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
