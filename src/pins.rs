//! GPIO pin assignments for the traffic-light board.
//!
//! Single source of truth: `main` opens the pins listed here and hands
//! the drivers to the light and button modules.  Keep the two in sync
//! when rewiring the lamp harness.

// ---------------------------------------------------------------------------
// Lamps (active HIGH, one relay/MOSFET per lamp)
// ---------------------------------------------------------------------------

pub const GREEN_LAMP_GPIO: i32 = 27;
pub const ORANGE_LAMP_GPIO: i32 = 18;
pub const RED_LAMP_GPIO: i32 = 4;

// ---------------------------------------------------------------------------
// User button (active-low with internal pull-up)
// ---------------------------------------------------------------------------

/// Momentary push-button; a falling edge is a press.
pub const BUTTON_GPIO: i32 = 23;
