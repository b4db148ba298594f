//! Lamp and button drivers, plus the threading helpers they run on.

pub mod button;
pub mod light;
pub mod task_pin;
pub mod timer;
