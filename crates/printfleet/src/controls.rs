use serde::{Deserialize, Serialize};

/// A controllable fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fan {
    /// Part cooling fan.
    Part = 1,
    /// Auxiliary fan.
    Auxiliary = 2,
    /// Chamber fan.
    Chamber = 3,
}

impl Fan {
    /// Returns the fan index used by `M106`.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// A controllable light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightNode {
    /// Chamber light.
    ChamberLight,
    /// Work light.
    WorkLight,
    /// Part light.
    PartLight,
}

impl LightNode {
    /// Returns the wire name of the light.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChamberLight => "chamber_light",
            Self::WorkLight => "work_light",
            Self::PartLight => "part_light",
        }
    }

    pub(crate) fn from_wire(value: &str) -> Option<Self> {
        match value {
            "chamber_light" => Some(Self::ChamberLight),
            "work_light" => Some(Self::WorkLight),
            "part_light" => Some(Self::PartLight),
            _ => None,
        }
    }
}

/// Light mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightMode {
    /// Light on.
    On,
    /// Light off.
    Off,
    /// Light flashing.
    Flashing,
}

impl LightMode {
    /// Returns the wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Flashing => "flashing",
        }
    }

    pub(crate) fn from_wire(value: &str) -> Option<Self> {
        match value {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "flashing" => Some(Self::Flashing),
            _ => None,
        }
    }
}

/// Timing of a flashing light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlashPattern {
    /// Milliseconds on per cycle.
    pub on_time: u32,
    /// Milliseconds off per cycle.
    pub off_time: u32,
    /// Number of cycles.
    pub loop_times: u32,
    /// Milliseconds between cycles.
    pub interval_time: u32,
}

impl Default for FlashPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashPattern {
    /// Creates a [`FlashPattern`] with the device defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            on_time: 500,
            off_time: 500,
            loop_times: 1,
            interval_time: 1000,
        }
    }

    /// Sets the on and off times.
    #[must_use]
    #[inline]
    pub const fn times(mut self, on_time: u32, off_time: u32) -> Self {
        self.on_time = on_time;
        self.off_time = off_time;
        self
    }

    /// Sets the number of cycles.
    #[must_use]
    #[inline]
    pub const fn loop_times(mut self, loop_times: u32) -> Self {
        self.loop_times = loop_times;
        self
    }

    /// Sets the interval between cycles.
    #[must_use]
    #[inline]
    pub const fn interval_time(mut self, interval_time: u32) -> Self {
        self.interval_time = interval_time;
        self
    }
}

/// Print speed profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrintSpeed {
    /// Silent.
    Silent = 1,
    /// Standard.
    Standard = 2,
    /// Sport.
    Sport = 3,
    /// Ludicrous.
    Ludicrous = 4,
}

impl PrintSpeed {
    /// Returns the speed level sent to the device.
    #[must_use]
    pub const fn level(self) -> u8 {
        self as u8
    }

    /// Returns the profile matching a reported speed level.
    #[must_use]
    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Silent),
            2 => Some(Self::Standard),
            3 => Some(Self::Sport),
            4 => Some(Self::Ludicrous),
            _ => None,
        }
    }
}
