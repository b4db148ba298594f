//! Startup lamp test.
//!
//! Runs once before any event source is started: each lamp alone, in
//! the fixed order Green → Orange → Red, for one step each, then dark.

use embedded_hal::delay::DelayNs;
use log::info;

use crate::app::ports::ActuatorPort;
use crate::light::{Output, OutputSet};

/// Cycle every lamp and finish with all lamps off.
pub fn run_lamp_test<A, D>(actuator: &mut A, delay: &mut D, step_ms: u32)
where
    A: ActuatorPort,
    D: DelayNs,
{
    info!("Bootstrap: lamp test ({} ms per lamp)", step_ms);
    for lamp in Output::ALL {
        actuator.write(OutputSet::only(lamp));
        if step_ms > 0 {
            delay.delay_ms(step_ms);
        }
    }
    actuator.write(OutputSet::EMPTY);
}
