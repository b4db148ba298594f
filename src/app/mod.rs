//! Application core: the reconciliation engine, zero direct I/O.
//!
//! The [`engine::Engine`] owns the displayed state and reacts to button
//! presses, remote updates and alert ticks.  All interaction with lamps,
//! transports and timers goes through the **port traits** in [`ports`],
//! keeping this layer fully testable without real peripherals.

pub mod alert;
pub mod bootstrap;
pub mod engine;
pub mod events;
pub mod ports;
