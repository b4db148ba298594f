//! Light colours and lamp output sets.
//!
//! [`LightColor`] is the logical state the engine reasons about;
//! [`OutputSet`] is what the actuator physically lights.  Every display,
//! including the composite ones, is computed as a full set and written
//! in one go.

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Physical outputs
// ---------------------------------------------------------------------------

/// One of the three lamps of the traffic light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Output {
    Green = 0b001,
    Orange = 0b010,
    Red = 0b100,
}

impl Output {
    /// Every lamp, in bootstrap order.
    pub const ALL: [Self; 3] = [Self::Green, Self::Orange, Self::Red];

    /// Return the bitmask for this lamp.
    pub const fn mask(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Red => "red",
        }
    }
}

/// Set of lamps that should be lit.  Lamps not in the set are dark.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputSet(u8);

impl OutputSet {
    pub const EMPTY: Self = Self(0);

    /// Orange and Red lit together: the remote value could not be obtained
    /// or understood.
    pub const FAULT: Self = Self(Output::Orange.mask() | Output::Red.mask());

    /// Red and Green lit together: the button-triggered broken override.
    pub const BROKEN: Self = Self(Output::Red.mask() | Output::Green.mask());

    pub const fn only(output: Output) -> Self {
        Self(output.mask())
    }

    pub const fn with(self, output: Output) -> Self {
        Self(self.0 | output.mask())
    }

    pub const fn contains(self, output: Output) -> bool {
        self.0 & output.mask() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl FromIterator<Output> for OutputSet {
    fn from_iter<I: IntoIterator<Item = Output>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl fmt::Debug for OutputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(Output::ALL.iter().filter(|o| self.contains(**o)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Logical colour
// ---------------------------------------------------------------------------

/// The logical state of the traffic light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightColor {
    Green,
    Orange,
    Red,
    Off,
    /// Composite Red+Green override raised from the button.
    Broken,
}

impl LightColor {
    pub const ALL: [Self; 5] = [Self::Green, Self::Orange, Self::Red, Self::Off, Self::Broken];

    /// Lamps lit for this colour.
    pub const fn outputs(self) -> OutputSet {
        match self {
            Self::Green => OutputSet::only(Output::Green),
            Self::Orange => OutputSet::only(Output::Orange),
            Self::Red => OutputSet::only(Output::Red),
            Self::Off => OutputSet::EMPTY,
            Self::Broken => OutputSet::BROKEN,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Green => "Green",
            Self::Orange => "Orange",
            Self::Red => "Red",
            Self::Off => "Off",
            Self::Broken => "Broken",
        }
    }

    /// Lower-cased name, used as the report path segment.
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Red => "red",
            Self::Off => "off",
            Self::Broken => "broken",
        }
    }

    /// Parse a remote value.
    ///
    /// Case-insensitive; surrounding whitespace and one layer of double
    /// quotes (the API returns a JSON string) are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed)
            .trim();
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(unquoted))
    }

    /// Next colour of the manual cycle used in device-twin mode.
    pub const fn next_in_cycle(self) -> Self {
        match self {
            Self::Green => Self::Orange,
            Self::Orange => Self::Red,
            Self::Red | Self::Broken => Self::Off,
            Self::Off => Self::Green,
        }
    }
}

impl fmt::Display for LightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
