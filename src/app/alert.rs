//! Alert blink session (cloud-twin mode).
//!
//! ```text
//! Inactive ──(Alert command)──▶ Active{Orange} ⇄ Active{Red}
//!    ▲                                  │ tick every period
//!    └──────────(button press)──────────┘
//! ```
//!
//! The session only tracks the blink phase.  Starting and stopping the
//! tick source and re-syncing the light afterwards is the engine's job.

use crate::light::{Output, OutputSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Orange,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertSession {
    id: u32,
    period_ms: u32,
    phase: Phase,
}

impl AlertSession {
    /// New session, showing Orange first.
    pub fn new(id: u32, period_ms: u32) -> Self {
        Self {
            id,
            period_ms,
            phase: Phase::Orange,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    /// Lamps for the current phase.
    pub fn outputs(&self) -> OutputSet {
        match self.phase {
            Phase::Orange => OutputSet::only(Output::Orange),
            Phase::Red => OutputSet::only(Output::Red),
        }
    }

    /// Advance one phase and return the new lamps.
    pub fn toggle(&mut self) -> OutputSet {
        self.phase = match self.phase {
            Phase::Orange => Phase::Red,
            Phase::Red => Phase::Orange,
        };
        self.outputs()
    }
}
