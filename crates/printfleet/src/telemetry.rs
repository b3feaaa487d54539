use alloc::string::String;
use alloc::vec::Vec;

use log::warn;

use serde::{Deserialize, Serialize};

use crate::de;
use crate::error::Result;
use crate::hms::HmsRecord;
use crate::macros::{merge_fields, merge_integers};

/// Field-granular reconciliation of a partial report into a complete one.
///
/// The law is the same for every telemetry record:
///
/// - a non-empty scalar overwrites the target field
/// - an empty scalar (`0`, `0.0`, `false`, `""`) leaves the target untouched
/// - nested records merge field by field
/// - lists are replaced as a whole when the fragment list is non-empty
///
/// An empty value is indistinguishable from an absent one, so a device can
/// never lower a field back to zero through a partial report.
pub trait Merge {
    /// Merges `fragment` into `self`.
    fn merge(&mut self, fragment: Self);
}

merge_integers!(u8, u32, i32, u64);

impl Merge for f64 {
    #[inline]
    fn merge(&mut self, fragment: Self) {
        if fragment != 0.0 {
            *self = fragment;
        }
    }
}

impl Merge for bool {
    #[inline]
    fn merge(&mut self, fragment: Self) {
        if fragment {
            *self = true;
        }
    }
}

impl Merge for String {
    #[inline]
    fn merge(&mut self, fragment: Self) {
        if !fragment.is_empty() {
            *self = fragment;
        }
    }
}

impl<T> Merge for Vec<T> {
    #[inline]
    fn merge(&mut self, fragment: Self) {
        if !fragment.is_empty() {
            *self = fragment;
        }
    }
}

impl<T: Merge> Merge for Option<T> {
    fn merge(&mut self, fragment: Self) {
        if let Some(fragment) = fragment {
            match self {
                Some(current) => current.merge(fragment),
                None => *self = Some(fragment),
            }
        }
    }
}

/// Print job lifecycle state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum GcodeState {
    /// No job.
    Idle,
    /// A job is being prepared.
    Prepare,
    /// A job is printing.
    Running,
    /// A job is paused.
    Pause,
    /// The last job completed.
    Finish,
    /// The last job failed.
    Failed,
    /// The state has never been reported or is not recognized.
    Unknown,
}

impl GcodeState {
    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Prepare => "PREPARE",
            Self::Running => "RUNNING",
            Self::Pause => "PAUSE",
            Self::Finish => "FINISH",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether a job is currently loaded on the device.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Prepare | Self::Running | Self::Pause)
    }
}

impl From<&str> for GcodeState {
    fn from(value: &str) -> Self {
        match value {
            "IDLE" => Self::Idle,
            "PREPARE" => Self::Prepare,
            "RUNNING" => Self::Running,
            "PAUSE" => Self::Pause,
            "FINISH" => Self::Finish,
            "FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for GcodeState {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<GcodeState> for &'static str {
    fn from(state: GcodeState) -> Self {
        state.as_str()
    }
}

impl core::fmt::Display for GcodeState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_str().fmt(f)
    }
}

// A reported state always replaces the previous one, including `Unknown`.
impl Merge for GcodeState {
    #[inline]
    fn merge(&mut self, fragment: Self) {
        *self = fragment;
    }
}

/// An `RGBA` color decoded from a filament tray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha.
    pub a: u8,
}

impl Rgba {
    /// Decodes an `RRGGBBAA` or `RRGGBB` hexadecimal string.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let channel = |index: usize| {
            hex.get(index..index + 2)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
        };

        match hex.len() {
            8 => Some(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            6 => Some(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: u8::MAX,
            }),
            _ => None,
        }
    }
}

/// A filament tray, either inside an `AMS` unit or on the external spool
/// holder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tray {
    /// Tray index inside its unit.
    #[serde(deserialize_with = "de::number")]
    pub id: u32,
    /// Hexadecimal colors of the filament, one per color for multi-color
    /// filaments.
    pub cols: Vec<String>,
    /// Overall hexadecimal color of the filament.
    pub tray_color: String,
    /// Filament type, such as `PLA`.
    pub tray_type: String,
    /// Detailed filament type.
    pub tray_sub_brands: String,
    /// Minimum nozzle temperature for this filament.
    #[serde(deserialize_with = "de::number")]
    pub nozzle_temp_min: f64,
    /// Maximum nozzle temperature for this filament.
    #[serde(deserialize_with = "de::number")]
    pub nozzle_temp_max: f64,
    /// Bed temperature for this filament.
    #[serde(deserialize_with = "de::number")]
    pub bed_temp: f64,
    /// Drying temperature.
    #[serde(deserialize_with = "de::number")]
    pub drying_temp: f64,
    /// Drying time in hours.
    #[serde(deserialize_with = "de::number")]
    pub drying_time: u32,
    /// Filament diameter in millimeters.
    #[serde(deserialize_with = "de::number")]
    pub tray_diameter: f64,
    /// Estimated spool weight in grams.
    #[serde(deserialize_with = "de::number")]
    pub tray_weight: u32,
}

impl Tray {
    /// Decodes the filament colors.
    ///
    /// Entries that are not valid hexadecimal colors are skipped.
    #[must_use]
    pub fn colors(&self) -> Vec<Rgba> {
        self.cols
            .iter()
            .filter_map(|hex| {
                let color = Rgba::from_hex(hex);
                if color.is_none() {
                    warn!("Skipping invalid tray color `{hex}`");
                }
                color
            })
            .collect()
    }

    /// Decodes the overall filament color.
    #[must_use]
    pub fn color(&self) -> Option<Rgba> {
        Rgba::from_hex(&self.tray_color)
    }
}

impl Merge for Tray {
    fn merge(&mut self, fragment: Self) {
        merge_fields!(
            self,
            fragment,
            [
                id,
                cols,
                tray_color,
                tray_type,
                tray_sub_brands,
                nozzle_temp_min,
                nozzle_temp_max,
                bed_temp,
                drying_temp,
                drying_time,
                tray_diameter,
                tray_weight,
            ]
        );
    }
}

/// An automatic material system unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmsUnit {
    /// Unit index.
    #[serde(deserialize_with = "de::number")]
    pub id: u32,
    /// Humidity level, from `0` (dry) to `5` (wet).
    #[serde(deserialize_with = "de::number")]
    pub humidity: u32,
    /// Temperature inside the unit.
    #[serde(deserialize_with = "de::number")]
    pub temp: f64,
    /// Trays of the unit.
    pub tray: Vec<Tray>,
}

/// The automatic material system section of a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmsReport {
    /// Connected units.
    pub ams: Vec<AmsUnit>,
    /// Tray currently feeding the toolhead.
    #[serde(deserialize_with = "de::text")]
    pub tray_now: String,
}

impl Merge for AmsReport {
    fn merge(&mut self, fragment: Self) {
        merge_fields!(self, fragment, [ams, tray_now]);
    }
}

/// State of a single light.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightReport {
    /// Light name, such as `chamber_light`.
    pub node: String,
    /// Light mode, such as `on`.
    pub mode: String,
}

impl LightReport {
    /// Returns the reported light, if recognized.
    #[must_use]
    pub fn light_node(&self) -> Option<crate::controls::LightNode> {
        crate::controls::LightNode::from_wire(&self.node)
    }

    /// Returns the reported mode, if recognized.
    #[must_use]
    pub fn light_mode(&self) -> Option<crate::controls::LightMode> {
        crate::controls::LightMode::from_wire(&self.mode)
    }
}

/// Device status carried under the `print` key of a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintStatus {
    /// Bed temperature.
    #[serde(deserialize_with = "de::number")]
    pub bed_temper: f64,
    /// Bed target temperature.
    #[serde(deserialize_with = "de::number")]
    pub bed_target_temper: f64,
    /// Nozzle temperature.
    #[serde(deserialize_with = "de::number")]
    pub nozzle_temper: f64,
    /// Nozzle target temperature.
    #[serde(deserialize_with = "de::number")]
    pub nozzle_target_temper: f64,
    /// Chamber temperature.
    #[serde(deserialize_with = "de::number")]
    pub chamber_temper: f64,
    /// Part cooling fan duty.
    #[serde(deserialize_with = "de::number")]
    pub cooling_fan_speed: u32,
    /// Auxiliary fan duty.
    #[serde(deserialize_with = "de::number")]
    pub big_fan1_speed: u32,
    /// Chamber fan duty.
    #[serde(deserialize_with = "de::number")]
    pub big_fan2_speed: u32,
    /// Heatbreak fan duty.
    #[serde(deserialize_with = "de::number")]
    pub heatbreak_fan_speed: u32,
    /// File of the current job.
    pub gcode_file: String,
    /// Preparation progress of the current job file.
    #[serde(deserialize_with = "de::number")]
    pub gcode_file_prepare_percent: u32,
    /// Job lifecycle state.
    #[serde(deserialize_with = "de::non_blank")]
    pub gcode_state: Option<GcodeState>,
    /// Job progress percentage.
    #[serde(deserialize_with = "de::number")]
    pub mc_percent: u8,
    /// Remaining job time in minutes.
    #[serde(deserialize_with = "de::number")]
    pub mc_remaining_time: u32,
    /// Motion controller error code.
    #[serde(deserialize_with = "de::text")]
    pub mc_print_error_code: String,
    /// Print error code.
    #[serde(deserialize_with = "de::number")]
    pub print_error: u32,
    /// Current layer.
    #[serde(deserialize_with = "de::number")]
    pub layer_num: u32,
    /// Total layers of the current job.
    #[serde(deserialize_with = "de::number")]
    pub total_layer_num: u32,
    /// Print speed level.
    #[serde(deserialize_with = "de::number")]
    pub spd_lvl: u8,
    /// Light states.
    pub lights_report: Vec<LightReport>,
    /// Automatic material system.
    pub ams: Option<AmsReport>,
    /// External spool holder.
    pub vt_tray: Option<Tray>,
    /// Active health records.
    pub hms: Vec<HmsRecord>,
    /// Installed nozzle diameter.
    #[serde(deserialize_with = "de::text")]
    pub nozzle_diameter: String,
    /// Installed nozzle type.
    pub nozzle_type: String,
    /// Wireless signal strength, such as `-45dBm`.
    pub wifi_signal: String,
    /// Whether a storage card is inserted.
    pub sdcard: bool,
}

impl Merge for PrintStatus {
    fn merge(&mut self, fragment: Self) {
        merge_fields!(
            self,
            fragment,
            [
                bed_temper,
                bed_target_temper,
                nozzle_temper,
                nozzle_target_temper,
                chamber_temper,
                cooling_fan_speed,
                big_fan1_speed,
                big_fan2_speed,
                heatbreak_fan_speed,
                gcode_file,
                gcode_file_prepare_percent,
                gcode_state,
                mc_percent,
                mc_remaining_time,
                mc_print_error_code,
                print_error,
                layer_num,
                total_layer_num,
                spd_lvl,
                lights_report,
                ams,
                vt_tray,
                hms,
                nozzle_diameter,
                nozzle_type,
                wifi_signal,
                sdcard,
            ]
        );
    }
}

/// The reconciled view of a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySnapshot {
    /// Device status.
    pub print: PrintStatus,
}

/// A partial report. Every field may be absent.
pub type TelemetryFragment = TelemetrySnapshot;

impl TelemetrySnapshot {
    /// Parses a report payload.
    ///
    /// Parsing is all-or-nothing: a malformed payload never yields a
    /// partially populated fragment.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when the payload is not a valid report.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(Into::into)
    }

    /// Returns the job lifecycle state, [`GcodeState::Unknown`] when it
    /// was never reported.
    #[must_use]
    pub fn gcode_state(&self) -> GcodeState {
        self.print.gcode_state.unwrap_or(GcodeState::Unknown)
    }
}

impl Merge for TelemetrySnapshot {
    fn merge(&mut self, fragment: Self) {
        merge_fields!(self, fragment, [print]);
    }
}
