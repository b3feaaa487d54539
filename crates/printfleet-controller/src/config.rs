use std::time::Duration;

/// Default username for local connections.
pub const DEFAULT_USERNAME: &str = "bblp";
/// Default port of the telemetry and command broker.
pub const DEFAULT_MQTT_PORT: u16 = 8883;
/// Default port of the camera stream.
pub const DEFAULT_CAMERA_PORT: u16 = 6000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(5);
const DEFAULT_STREAM_BACKOFF: Duration = Duration::from_secs(5);

/// Connection settings of a single printer.
///
/// The configuration is the immutable identity of a device once it has been
/// registered.
#[derive(Clone, PartialEq, Eq)]
pub struct PrinterConfig {
    host: String,
    access_code: String,
    serial: String,
    username: String,
    mqtt_port: u16,
    camera_port: u16,
    timeout: Duration,
    refresh_threshold: Duration,
    stream_backoff: Duration,
    sequence_base: u64,
    cloud: bool,
}

// The access code is a credential.
impl std::fmt::Debug for PrinterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterConfig")
            .field("host", &self.host)
            .field("serial", &self.serial)
            .field("username", &self.username)
            .field("mqtt_port", &self.mqtt_port)
            .field("camera_port", &self.camera_port)
            .field("timeout", &self.timeout)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("stream_backoff", &self.stream_backoff)
            .field("sequence_base", &self.sequence_base)
            .field("cloud", &self.cloud)
            .finish_non_exhaustive()
    }
}

impl PrinterConfig {
    /// Creates a [`PrinterConfig`] for a printer reachable on the local
    /// network.
    #[must_use]
    #[inline]
    pub fn new(
        host: impl Into<String>,
        access_code: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            access_code: access_code.into(),
            serial: serial.into(),
            username: DEFAULT_USERNAME.into(),
            mqtt_port: DEFAULT_MQTT_PORT,
            camera_port: DEFAULT_CAMERA_PORT,
            timeout: DEFAULT_TIMEOUT,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            stream_backoff: DEFAULT_STREAM_BACKOFF,
            sequence_base: 0,
            cloud: false,
        }
    }

    /// Creates a [`PrinterConfig`] for a printer reached through the cloud
    /// broker.
    ///
    /// The camera is not reachable in this mode.
    #[must_use]
    #[inline]
    pub fn cloud(
        broker: impl Into<String>,
        serial: impl Into<String>,
        username: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(broker, token, serial);
        config.username = username.into();
        config.cloud = true;
        config
    }

    /// Sets a different username.
    #[must_use]
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Sets the broker port.
    #[must_use]
    pub const fn mqtt_port(mut self, port: u16) -> Self {
        self.mqtt_port = port;
        self
    }

    /// Sets the camera port.
    #[must_use]
    pub const fn camera_port(mut self, port: u16) -> Self {
        self.camera_port = port;
        self
    }

    /// Sets the timeout of connections and single frame captures.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how old telemetry may get before a read requests a refresh.
    #[must_use]
    pub const fn refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Sets the wait between camera stream reconnections.
    #[must_use]
    pub const fn stream_backoff(mut self, backoff: Duration) -> Self {
        self.stream_backoff = backoff;
        self
    }

    /// Sets the first command sequence number.
    #[must_use]
    pub const fn sequence_base(mut self, base: u64) -> Self {
        self.sequence_base = base;
        self
    }

    /// Returns the printer address.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the access code, or the account token in cloud mode.
    #[must_use]
    pub fn access_code(&self) -> &str {
        &self.access_code
    }

    /// Returns the printer serial number, which identifies the device.
    #[must_use]
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the broker username.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.username
    }

    /// Returns the broker port.
    #[must_use]
    pub const fn broker_port(&self) -> u16 {
        self.mqtt_port
    }

    /// Returns the camera port.
    #[must_use]
    pub const fn media_port(&self) -> u16 {
        self.camera_port
    }

    /// Returns the operation timeout.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the telemetry refresh threshold.
    #[must_use]
    pub const fn telemetry_refresh_threshold(&self) -> Duration {
        self.refresh_threshold
    }

    /// Returns the camera stream reconnection backoff.
    #[must_use]
    pub const fn media_backoff(&self) -> Duration {
        self.stream_backoff
    }

    /// Returns the first command sequence number.
    #[must_use]
    pub const fn first_sequence_id(&self) -> u64 {
        self.sequence_base
    }

    /// Whether the printer is reached through the cloud broker.
    #[must_use]
    pub const fn is_cloud(&self) -> bool {
        self.cloud
    }

    /// Whether the camera stream can be reached.
    #[must_use]
    pub const fn has_camera(&self) -> bool {
        !self.cloud
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::{DEFAULT_CAMERA_PORT, DEFAULT_MQTT_PORT, PrinterConfig};

    pub(crate) fn create_config(serial: &str) -> PrinterConfig {
        PrinterConfig::new("127.0.0.1", "12345678", serial)
    }

    #[test]
    fn defaults() {
        let config = create_config("01P00A000000001");

        assert_eq!(config.user(), "bblp");
        assert_eq!(config.broker_port(), DEFAULT_MQTT_PORT);
        assert_eq!(config.media_port(), DEFAULT_CAMERA_PORT);
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.telemetry_refresh_threshold(), Duration::from_secs(5));
        assert_eq!(config.media_backoff(), Duration::from_secs(5));
        assert_eq!(config.first_sequence_id(), 0);
        assert!(config.has_camera());
    }

    #[test]
    fn cloud_mode() {
        let config = PrinterConfig::cloud("us.mqtt.bambulab.com", "01S00A", "u_42", "token");

        assert!(config.is_cloud());
        assert!(!config.has_camera());
        assert_eq!(config.user(), "u_42");
        assert_eq!(config.access_code(), "token");
        assert_eq!(config.host(), "us.mqtt.bambulab.com");
    }

    #[test]
    fn access_code_is_not_printed() {
        let debug = format!("{:?}", create_config("01P00A000000001"));

        assert!(debug.contains("01P00A000000001"));
        assert!(!debug.contains("12345678"));
    }
}
