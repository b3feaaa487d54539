use alloc::format;
use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::de;

/// Severity of a health record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Printing cannot continue.
    Fatal,
    /// Printing is paused until the condition is cleared.
    Serious,
    /// A common recoverable condition.
    Common,
    /// Informational.
    Info,
    /// Severity not recognized.
    Unknown,
}

/// Device module raising a health record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Module {
    /// Main board.
    Mainboard,
    /// Camera-based inspection module.
    XCam,
    /// Automatic material system.
    Ams,
    /// Toolhead.
    Toolhead,
    /// Motion controller.
    MotionController,
    /// Module not recognized.
    Default,
}

/// A health management system record reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct HmsRecord {
    /// Attribute word: module, unit and part identifiers.
    #[serde(deserialize_with = "de::number")]
    pub attr: u32,
    /// Code word: severity and error identifiers.
    #[serde(deserialize_with = "de::number")]
    pub code: u32,
}

impl HmsRecord {
    /// Creates a [`HmsRecord`].
    #[must_use]
    pub const fn new(attr: u32, code: u32) -> Self {
        Self { attr, code }
    }

    /// Returns the record [`Severity`].
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self.code >> 16 {
            1 => Severity::Fatal,
            2 => Severity::Serious,
            3 => Severity::Common,
            4 => Severity::Info,
            _ => Severity::Unknown,
        }
    }

    /// Returns the [`Module`] raising the record.
    #[must_use]
    pub const fn module(&self) -> Module {
        match (self.attr >> 24) & 0xff {
            0x05 => Module::Mainboard,
            0x0C => Module::XCam,
            0x07 => Module::Ams,
            0x08 => Module::Toolhead,
            0x03 => Module::MotionController,
            _ => Module::Default,
        }
    }

    /// Returns the record code in the `AAAA_BBBB_CCCC_DDDD` form used by
    /// the vendor documentation.
    ///
    /// Returns `None` when either word is zero.
    #[must_use]
    pub fn code(&self) -> Option<String> {
        if self.attr == 0 || self.code == 0 {
            return None;
        }

        Some(format!(
            "{:04X}_{:04X}_{:04X}_{:04X}",
            self.attr >> 16,
            self.attr & 0xffff,
            self.code >> 16,
            self.code & 0xffff
        ))
    }
}
