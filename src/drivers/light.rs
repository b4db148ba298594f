//! Three-lamp traffic-light driver.
//!
//! One digital output per lamp, active HIGH.  Generic over
//! `embedded_hal::digital::OutputPin` so the same driver runs on the
//! ESP-IDF `PinDriver`s and on recording pins in tests.
//!
//! Every write sets all three lamps, so composite displays (fault,
//! broken, blink phases) never show a half-updated pattern for longer
//! than the three GPIO writes take.

use embedded_hal::digital::OutputPin;
use log::error;

use crate::app::ports::ActuatorPort;
use crate::error::ActuatorError;
use crate::light::{Output, OutputSet};

pub struct TrafficLightDriver<G, O, R> {
    green: G,
    orange: O,
    red: R,
    lit: OutputSet,
}

impl<G, O, R> TrafficLightDriver<G, O, R>
where
    G: OutputPin,
    O: OutputPin,
    R: OutputPin,
{
    pub fn new(green: G, orange: O, red: R) -> Self {
        Self {
            green,
            orange,
            red,
            lit: OutputSet::EMPTY,
        }
    }

    /// Drive every lamp to match `outputs`.
    pub fn try_write(&mut self, outputs: OutputSet) -> Result<(), ActuatorError> {
        set_lamp(&mut self.green, outputs.contains(Output::Green), Output::Green)?;
        set_lamp(&mut self.orange, outputs.contains(Output::Orange), Output::Orange)?;
        set_lamp(&mut self.red, outputs.contains(Output::Red), Output::Red)?;
        self.lit = outputs;
        Ok(())
    }

    /// Last set written successfully.
    pub fn lit(&self) -> OutputSet {
        self.lit
    }

    pub fn release(self) -> (G, O, R) {
        (self.green, self.orange, self.red)
    }
}

fn set_lamp<P: OutputPin>(pin: &mut P, on: bool, lamp: Output) -> Result<(), ActuatorError> {
    let res = if on { pin.set_high() } else { pin.set_low() };
    res.map_err(|_| ActuatorError::GpioWriteFailed(lamp.name()))
}

impl<G, O, R> ActuatorPort for TrafficLightDriver<G, O, R>
where
    G: OutputPin,
    O: OutputPin,
    R: OutputPin,
{
    fn write(&mut self, outputs: OutputSet) {
        if let Err(e) = self.try_write(outputs) {
            // No fallback: a lamp we cannot drive means the displayed
            // state is unknown.  The panic handler reboots the device.
            error!("Lamp driver: {} while showing {:?}", e, outputs);
            panic!("lamp actuator failure: {e}");
        }
    }
}
