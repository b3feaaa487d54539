use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use hashbrown::DefaultHashBuilder;

use indexmap::map::{IndexMap, Iter};

use serde_json::{Map, Value};

use crate::controls::{Fan, FlashPattern, LightMode, LightNode, PrintSpeed};
use crate::error::{Error, ErrorKind, Result};
use crate::gcode;

/// Maximum fan duty accepted by `M106`.
pub const MAX_FAN_DUTY: u32 = 255;

/// Logical channel a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Job control and machine-control lines.
    Print,
    /// Device peripherals.
    System,
    /// Telemetry refresh.
    Pushing,
    /// Device information.
    Info,
}

impl Channel {
    /// Returns the top-level payload key of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::System => "system",
            Self::Pushing => "pushing",
            Self::Info => "info",
        }
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Command parameters, in insertion order.
pub type Params = IndexMap<String, Value, DefaultHashBuilder>;

/// A validated device command.
///
/// A command is immutable once built. The sequence number is supplied only
/// when the command is serialized for a send.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    channel: Channel,
    verb: &'static str,
    params: Params,
}

impl Command {
    fn new(channel: Channel, verb: &'static str) -> Self {
        Self {
            channel,
            verb,
            params: Params::with_hasher(DefaultHashBuilder::default()),
        }
    }

    fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    // Lines built from typed values are valid by construction.
    fn gcode_unchecked(line: String) -> Self {
        Self::new(Channel::Print, "gcode_line").param("param", line)
    }

    /// Returns the command [`Channel`].
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Returns the command verb.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        self.verb
    }

    /// Returns the command parameters.
    #[must_use]
    pub const fn params(&self) -> &Params {
        &self.params
    }

    /// Returns an iterator over the command parameters.
    #[must_use]
    #[inline]
    pub fn iter(&self) -> Iter<'_, String, Value> {
        self.params.iter()
    }

    /// Builds the wire payload for the given sequence number.
    ///
    /// `{ "<channel>": { "command": "<verb>", "sequence_id": "<n>", ... } }`
    #[must_use]
    pub fn payload(&self, sequence_id: u64) -> Value {
        let mut body = Map::new();
        body.insert("command".into(), Value::from(self.verb));
        body.insert("sequence_id".into(), Value::from(sequence_id.to_string()));
        for (name, value) in &self.params {
            body.insert(name.clone(), value.clone());
        }

        let mut message = Map::new();
        message.insert(self.channel.as_str().into(), Value::Object(body));
        Value::Object(message)
    }

    /// Serializes the wire payload for the given sequence number.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn to_bytes(&self, sequence_id: u64) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.payload(sequence_id)).map_err(Into::into)
    }

    /// Requests a complete telemetry report.
    #[must_use]
    pub fn push_all() -> Self {
        Self::new(Channel::Pushing, "pushall")
    }

    /// Requests the firmware and module versions.
    #[must_use]
    pub fn get_version() -> Self {
        Self::new(Channel::Info, "get_version")
    }

    /// Pauses the current job.
    #[must_use]
    pub fn pause() -> Self {
        Self::new(Channel::Print, "pause")
    }

    /// Resumes the current job.
    #[must_use]
    pub fn resume() -> Self {
        Self::new(Channel::Print, "resume")
    }

    /// Stops the current job.
    #[must_use]
    pub fn stop() -> Self {
        Self::new(Channel::Print, "stop")
    }

    /// Sends a single machine-control line.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidGcode`] error if the line is not valid.
    pub fn gcode_line(line: &str) -> Result<Self> {
        gcode::validate(line)?;
        Ok(Self::gcode_unchecked(line.into()))
    }

    /// Prints a machine-control file stored on the device.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidParameter`] error if the path is empty.
    pub fn gcode_file(path: &str) -> Result<Self> {
        if path.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "The file path must not be empty.",
            ));
        }
        Ok(Self::new(Channel::Print, "gcode_file").param("param", path))
    }

    /// Starts a project print.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidParameter`] error if the plate is `0`
    /// or the url is empty.
    pub fn project_file(print: &ProjectPrint) -> Result<Self> {
        if print.plate == 0 {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "Plate numbers start from 1.",
            ));
        }
        if print.url.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "The project url must not be empty.",
            ));
        }

        let ams_mapping = if print.ams_mapping.is_empty() {
            Value::from("")
        } else {
            Value::from(print.ams_mapping.clone())
        };

        Ok(Self::new(Channel::Print, "project_file")
            .param("param", format!("Metadata/plate_{}.gcode", print.plate))
            .param("project_id", "0")
            .param("profile_id", "0")
            .param("task_id", "0")
            .param("subtask_id", "0")
            .param("subtask_name", print.subtask_name.as_str())
            .param("file", "")
            .param("url", print.url.as_str())
            .param("md5", "")
            .param("timelapse", print.timelapse)
            .param("bed_type", "auto")
            .param("bed_levelling", print.calibrate)
            .param("flow_cali", print.calibrate)
            .param("vibration_cali", print.calibrate)
            .param("layer_inspect", print.inspect_layers)
            .param("ams_mapping", ams_mapping)
            .param("use_ams", print.use_ams))
    }

    /// Changes the print speed profile.
    #[must_use]
    pub fn print_speed(speed: PrintSpeed) -> Self {
        Self::new(Channel::Print, "print_speed").param("param", speed.level().to_string())
    }

    /// Runs the selected calibrations.
    #[must_use]
    pub fn calibration(calibration: Calibration) -> Self {
        Self::new(Channel::Print, "calibration").param("param", calibration.bitmask().to_string())
    }

    /// Turns a light on or off.
    #[must_use]
    pub fn led_control(node: LightNode, mode: LightMode) -> Self {
        Self::led(node, mode, FlashPattern::new())
    }

    /// Makes a light flash.
    #[must_use]
    pub fn led_flashing(node: LightNode, pattern: FlashPattern) -> Self {
        Self::led(node, LightMode::Flashing, pattern)
    }

    // The timing fields only matter when flashing, but the device requires
    // them for every mode.
    fn led(node: LightNode, mode: LightMode, pattern: FlashPattern) -> Self {
        Self::new(Channel::System, "ledctrl")
            .param("led_node", node.as_str())
            .param("led_mode", mode.as_str())
            .param("led_on_time", pattern.on_time)
            .param("led_off_time", pattern.off_time)
            .param("loop_times", pattern.loop_times)
            .param("interval_time", pattern.interval_time)
    }

    /// Sets the bed target temperature, optionally waiting until it is
    /// reached.
    #[must_use]
    pub fn set_bed_temperature(celsius: u32, wait: bool) -> Self {
        let code = if wait { "M190" } else { "M140" };
        Self::gcode_unchecked(format!("{code} S{celsius}"))
    }

    /// Sets the nozzle target temperature, optionally waiting until it is
    /// reached.
    #[must_use]
    pub fn set_nozzle_temperature(celsius: u32, wait: bool) -> Self {
        let code = if wait { "M109" } else { "M104" };
        Self::gcode_unchecked(format!("{code} S{celsius}"))
    }

    /// Sets a fan duty.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidParameter`] error if `duty` exceeds
    /// [`MAX_FAN_DUTY`].
    pub fn set_fan_speed(fan: Fan, duty: u32) -> Result<Self> {
        if duty > MAX_FAN_DUTY {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                format!("Fan duty {duty} is outside 0..={MAX_FAN_DUTY}."),
            ));
        }
        Ok(Self::gcode_unchecked(format!("M106 P{} S{duty}", fan.index())))
    }
}

/// Calibrations to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Calibration {
    bed_leveling: bool,
    vibration_compensation: bool,
    motor_noise_cancellation: bool,
}

impl Calibration {
    /// Creates an empty [`Calibration`] selection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bed_leveling: false,
            vibration_compensation: false,
            motor_noise_cancellation: false,
        }
    }

    /// Adds bed leveling.
    #[must_use]
    #[inline]
    pub const fn bed_leveling(mut self) -> Self {
        self.bed_leveling = true;
        self
    }

    /// Adds vibration compensation.
    #[must_use]
    #[inline]
    pub const fn vibration_compensation(mut self) -> Self {
        self.vibration_compensation = true;
        self
    }

    /// Adds motor noise cancellation.
    #[must_use]
    #[inline]
    pub const fn motor_noise_cancellation(mut self) -> Self {
        self.motor_noise_cancellation = true;
        self
    }

    /// Returns the selection bit mask sent to the device.
    #[must_use]
    pub const fn bitmask(&self) -> u32 {
        let mut mask = 0;
        if self.bed_leveling {
            mask |= 1 << 1;
        }
        if self.vibration_compensation {
            mask |= 1 << 2;
        }
        if self.motor_noise_cancellation {
            mask |= 1 << 3;
        }
        mask
    }
}

/// Options of a project print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPrint {
    url: String,
    plate: u32,
    subtask_name: String,
    use_ams: bool,
    timelapse: bool,
    calibrate: bool,
    inspect_layers: bool,
    ams_mapping: Vec<i32>,
}

impl ProjectPrint {
    /// Creates a [`ProjectPrint`] for the project at `url`, such as
    /// `ftp:///model.gcode.3mf`, printing plate 1.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            plate: 1,
            subtask_name: String::new(),
            use_ams: false,
            timelapse: false,
            calibrate: false,
            inspect_layers: false,
            ams_mapping: Vec::new(),
        }
    }

    /// Sets the plate to print.
    #[must_use]
    #[inline]
    pub const fn plate(mut self, plate: u32) -> Self {
        self.plate = plate;
        self
    }

    /// Sets the job name shown by the device.
    #[must_use]
    pub fn subtask_name(mut self, name: impl Into<String>) -> Self {
        self.subtask_name = name.into();
        self
    }

    /// Feeds filament from the automatic material system.
    #[must_use]
    #[inline]
    pub const fn use_ams(mut self, use_ams: bool) -> Self {
        self.use_ams = use_ams;
        self
    }

    /// Records a timelapse.
    #[must_use]
    #[inline]
    pub const fn timelapse(mut self, timelapse: bool) -> Self {
        self.timelapse = timelapse;
        self
    }

    /// Runs bed leveling, flow and vibration calibration before printing.
    #[must_use]
    #[inline]
    pub const fn calibrate(mut self, calibrate: bool) -> Self {
        self.calibrate = calibrate;
        self
    }

    /// Inspects the first layers.
    #[must_use]
    #[inline]
    pub const fn inspect_layers(mut self, inspect_layers: bool) -> Self {
        self.inspect_layers = inspect_layers;
        self
    }

    /// Maps project filaments to material system trays.
    #[must_use]
    pub fn ams_mapping(mut self, mapping: Vec<i32>) -> Self {
        self.ams_mapping = mapping;
        self
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use serde_json::json;

    use super::{Calibration, Channel, Command, ProjectPrint};
    use crate::controls::{Fan, FlashPattern, LightMode, LightNode, PrintSpeed};
    use crate::error::ErrorKind;

    #[test]
    fn payload_shape() {
        assert_eq!(
            Command::pause().payload(7),
            json!({ "print": { "command": "pause", "sequence_id": "7" } })
        );
        assert_eq!(
            Command::push_all().payload(0),
            json!({ "pushing": { "command": "pushall", "sequence_id": "0" } })
        );
        assert_eq!(Command::get_version().channel(), Channel::Info);
    }

    #[test]
    fn payload_bytes() {
        let bytes = Command::stop().to_bytes(3).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            value,
            json!({ "print": { "command": "stop", "sequence_id": "3" } })
        );
    }

    #[test]
    fn gcode_lines() {
        let command = Command::gcode_line("G28 ; home").unwrap();
        assert_eq!(
            command.payload(1),
            json!({
                "print": { "command": "gcode_line", "sequence_id": "1", "param": "G28 ; home" }
            })
        );

        assert_eq!(
            Command::gcode_line("G1 x10").unwrap_err().kind(),
            ErrorKind::InvalidGcode
        );
    }

    #[test]
    fn temperatures() {
        let param = |command: Command| command.params()["param"].clone();

        assert_eq!(param(Command::set_bed_temperature(60, false)), json!("M140 S60"));
        assert_eq!(param(Command::set_bed_temperature(60, true)), json!("M190 S60"));
        assert_eq!(param(Command::set_nozzle_temperature(215, false)), json!("M104 S215"));
        assert_eq!(param(Command::set_nozzle_temperature(215, true)), json!("M109 S215"));
    }

    #[test]
    fn fan_duty_bounds() {
        let command = Command::set_fan_speed(Fan::Auxiliary, 255).unwrap();
        assert_eq!(command.params()["param"], json!("M106 P2 S255"));

        let error = Command::set_fan_speed(Fan::Part, 256).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn lights() {
        assert_eq!(
            Command::led_control(LightNode::ChamberLight, LightMode::On).payload(2),
            json!({
                "system": {
                    "command": "ledctrl",
                    "sequence_id": "2",
                    "led_node": "chamber_light",
                    "led_mode": "on",
                    "led_on_time": 500,
                    "led_off_time": 500,
                    "loop_times": 1,
                    "interval_time": 1000,
                }
            })
        );

        let flashing = Command::led_flashing(
            LightNode::WorkLight,
            FlashPattern::new().times(200, 300).loop_times(5),
        );
        assert_eq!(flashing.params()["led_mode"], json!("flashing"));
        assert_eq!(flashing.params()["led_on_time"], json!(200));
        assert_eq!(flashing.params()["loop_times"], json!(5));
    }

    #[test]
    fn speed_and_calibration() {
        assert_eq!(
            Command::print_speed(PrintSpeed::Sport).params()["param"],
            json!("3")
        );

        let calibration = Calibration::new()
            .bed_leveling()
            .motor_noise_cancellation();
        assert_eq!(calibration.bitmask(), 0b1010);
        assert_eq!(
            Command::calibration(calibration).params()["param"],
            json!("10")
        );
    }

    #[test]
    fn project_print() {
        let print = ProjectPrint::new("ftp:///cube.gcode.3mf")
            .plate(2)
            .use_ams(true)
            .ams_mapping(vec![0, 2]);
        let command = Command::project_file(&print).unwrap();

        assert_eq!(command.verb(), "project_file");
        assert_eq!(command.params()["param"], json!("Metadata/plate_2.gcode"));
        assert_eq!(command.params()["url"], json!("ftp:///cube.gcode.3mf"));
        assert_eq!(command.params()["use_ams"], json!(true));
        assert_eq!(command.params()["ams_mapping"], json!([0, 2]));
        assert_eq!(command.params()["bed_levelling"], json!(false));

        let unmapped = Command::project_file(&ProjectPrint::new("ftp:///a.3mf")).unwrap();
        assert_eq!(unmapped.params()["ams_mapping"], json!(""));

        assert_eq!(
            Command::project_file(&print.clone().plate(0)).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );
        assert_eq!(
            Command::project_file(&ProjectPrint::new(" ")).unwrap_err().kind(),
            ErrorKind::InvalidParameter
        );
    }

    #[test]
    fn gcode_file_path() {
        assert_eq!(
            Command::gcode_file("/sdcard/cube.gcode").unwrap().params()["param"],
            json!("/sdcard/cube.gcode")
        );
        assert!(Command::gcode_file("").is_err());
    }
}
