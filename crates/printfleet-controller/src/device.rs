use std::sync::Arc;

use printfleet::command::Calibration;
use printfleet::controls::{Fan, FlashPattern, LightMode, LightNode, PrintSpeed};
use printfleet::hms::HmsRecord;
use printfleet::{Command, GcodeState, PrintEvent, ProjectPrint, TelemetrySnapshot};

use tokio::sync::Mutex;
use tokio::sync::broadcast::Receiver;
use tokio::time::Instant;

use tracing::{debug, info};

use crate::camera::framer::MediaFrame;
use crate::camera::{CameraClient, FrameReceiver, MediaConnector, StreamState, TlsMediaConnector};
use crate::config::PrinterConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::file_transfer::FileTransfer;
use crate::mqtt::{MqttSession, MqttTransport};
use crate::sequencer::{CommandTransport, Sequencer};
use crate::telemetry::TelemetryEngine;

/// A session with a single printer.
///
/// A handle joins the telemetry mirror, the command sequencer, the camera
/// and the storage of one device. It is created disconnected and can be
/// connected and disconnected any number of times. The telemetry snapshot
/// outlives every connection.
pub struct DeviceHandle {
    config: PrinterConfig,
    sequencer: Arc<Sequencer>,
    engine: Arc<TelemetryEngine>,
    // Present when commands go through the device broker.
    mqtt: Option<Arc<MqttTransport>>,
    session: Mutex<Option<MqttSession>>,
    camera: Option<CameraClient>,
    file_transfer: Option<Arc<dyn FileTransfer>>,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("config", &self.config)
            .field("camera", &self.camera.is_some())
            .field("file_transfer", &self.file_transfer.is_some())
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    /// Creates a [`DeviceHandle`] which talks to the printer through its
    /// broker and reads its camera over `TLS`.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Transport`] error if the `TLS` configuration
    /// cannot be built.
    pub fn new(config: PrinterConfig) -> Result<Self> {
        let transport = Arc::new(MqttTransport::new());

        let camera = if config.has_camera() {
            let connector = TlsMediaConnector::new(&config)?;
            Some(CameraClient::new(&config, Arc::new(connector)))
        } else {
            None
        };

        let mut handle = Self::with_transport(config, transport.clone());
        handle.mqtt = Some(transport);
        handle.camera = camera;
        Ok(handle)
    }

    /// Creates a [`DeviceHandle`] which publishes commands through the given
    /// transport.
    ///
    /// Reports must be fed through [`DeviceHandle::ingest`].
    #[must_use]
    pub fn with_transport(config: PrinterConfig, transport: Arc<dyn CommandTransport>) -> Self {
        let sequencer = Arc::new(Sequencer::new(
            config.serial(),
            config.first_sequence_id(),
            transport,
        ));
        let engine = Arc::new(TelemetryEngine::new(
            config.serial(),
            config.telemetry_refresh_threshold(),
            Arc::clone(&sequencer),
        ));

        Self {
            config,
            sequencer,
            engine,
            mqtt: None,
            session: Mutex::new(None),
            camera: None,
            file_transfer: None,
        }
    }

    /// Reads the camera through the given connector.
    #[must_use]
    pub fn with_media_connector(mut self, connector: Arc<dyn MediaConnector>) -> Self {
        self.camera = Some(CameraClient::new(&self.config, connector));
        self
    }

    /// Sets the storage access of the device.
    #[must_use]
    pub fn with_file_transfer(mut self, file_transfer: Arc<dyn FileTransfer>) -> Self {
        self.file_transfer = Some(file_transfer);
        self
    }

    /// Returns the device identifier, its serial number.
    #[must_use]
    pub fn id(&self) -> &str {
        self.config.serial()
    }

    /// Returns the device configuration.
    #[must_use]
    pub const fn config(&self) -> &PrinterConfig {
        &self.config
    }

    /// Connects to the device and requests a complete report.
    ///
    /// Connecting an already connected device does nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Transport`] or [`ErrorKind::Timeout`] error
    /// if the device cannot be reached.
    pub async fn connect(&self) -> Result<()> {
        if let Some(transport) = &self.mqtt {
            let mut session = self.session.lock().await;
            if session.is_some() {
                debug!(serial = self.id(), "Already connected");
                return Ok(());
            }

            let connected = MqttSession::connect(&self.config, Arc::clone(&self.engine)).await?;
            transport.attach(connected.client());
            *session = Some(connected);
        }

        self.engine.refresh().await?;
        info!(serial = self.id(), "Device connected");

        Ok(())
    }

    /// Disconnects from the device and stops its camera stream.
    ///
    /// The telemetry snapshot is kept.
    pub async fn disconnect(&self) {
        if let Some(camera) = &self.camera {
            camera.stop_stream().await;
        }

        if let Some(transport) = &self.mqtt {
            transport.detach();
        }

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.disconnect().await;
            info!(serial = self.id(), "Device disconnected");
        }
    }

    /// Whether the device broker session is open.
    ///
    /// Always `true` for devices using a custom transport.
    pub async fn is_connected(&self) -> bool {
        self.mqtt.is_none() || self.session.lock().await.is_some()
    }

    /// Returns the latest telemetry, requesting a refresh in the background
    /// when it is stale.
    #[must_use]
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.engine.read_snapshot()
    }

    /// Merges a raw report into the telemetry snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Protocol`] error for a malformed payload,
    /// which is dropped.
    pub fn ingest(&self, payload: &[u8]) -> Result<()> {
        self.engine.ingest(payload)
    }

    /// Returns the job lifecycle state.
    #[must_use]
    pub fn gcode_state(&self) -> GcodeState {
        self.engine.gcode_state()
    }

    /// Returns the health records currently reported by the device.
    #[must_use]
    pub fn hms_errors(&self) -> Vec<HmsRecord> {
        self.engine
            .peek()
            .print
            .hms
            .into_iter()
            .filter(|record| record.code().is_some())
            .collect()
    }

    /// Returns when the last report was merged.
    #[must_use]
    pub fn last_update(&self) -> Option<Instant> {
        self.engine.last_update()
    }

    /// Subscribes to job lifecycle events.
    #[must_use]
    pub fn subscribe_events(&self) -> Receiver<PrintEvent> {
        self.engine.subscribe()
    }

    /// Requests a complete report right away.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request could not be sent.
    pub async fn refresh(&self) -> Result<u64> {
        self.engine.refresh().await
    }

    /// Publishes a command and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn publish(&self, command: &Command) -> Result<u64> {
        self.sequencer.publish(command).await
    }

    /// Returns the number the next command will be sent with.
    pub async fn next_sequence_id(&self) -> u64 {
        self.sequencer.next_sequence_id().await
    }

    /// Pauses the current job.
    ///
    /// Returns [`None`] without sending anything when the job is already
    /// paused or the state is unknown.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn pause(&self) -> Result<Option<u64>> {
        self.guarded(Command::pause(), |state| {
            matches!(state, GcodeState::Pause | GcodeState::Unknown)
        })
        .await
    }

    /// Resumes the current job.
    ///
    /// Returns [`None`] without sending anything when the job is already
    /// running or the state is unknown.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn resume(&self) -> Result<Option<u64>> {
        self.guarded(Command::resume(), |state| {
            matches!(state, GcodeState::Running | GcodeState::Unknown)
        })
        .await
    }

    /// Stops the current job.
    ///
    /// Returns [`None`] without sending anything when the device is idle.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn stop(&self) -> Result<Option<u64>> {
        self.guarded(Command::stop(), |state| state == GcodeState::Idle)
            .await
    }

    async fn guarded(
        &self,
        command: Command,
        skip: impl FnOnce(GcodeState) -> bool,
    ) -> Result<Option<u64>> {
        let state = self.engine.gcode_state();
        if skip(state) {
            debug!(
                serial = self.id(),
                verb = command.verb(),
                state = state.as_str(),
                "Command skipped"
            );
            return Ok(None);
        }

        self.publish(&command).await.map(Some)
    }

    /// Sends machine-control lines, one command per line.
    ///
    /// Every line is validated before the first one is sent.
    ///
    /// # Errors
    ///
    /// - A line is not valid, nothing is sent
    /// - A command could not be sent, the following lines are not sent
    pub async fn send_gcode<S: AsRef<str>>(&self, lines: &[S]) -> Result<Vec<u64>> {
        let commands = lines
            .iter()
            .map(|line| Command::gcode_line(line.as_ref()))
            .collect::<printfleet::error::Result<Vec<_>>>()?;

        let mut sequence_ids = Vec::with_capacity(commands.len());
        for command in &commands {
            sequence_ids.push(self.publish(command).await?);
        }
        Ok(sequence_ids)
    }

    /// Sets the bed target temperature.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn set_bed_temperature(&self, celsius: u32, wait: bool) -> Result<u64> {
        self.publish(&Command::set_bed_temperature(celsius, wait))
            .await
    }

    /// Sets the nozzle target temperature.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn set_nozzle_temperature(&self, celsius: u32, wait: bool) -> Result<u64> {
        self.publish(&Command::set_nozzle_temperature(celsius, wait))
            .await
    }

    /// Sets a fan duty, from `0` to [`printfleet::command::MAX_FAN_DUTY`].
    ///
    /// # Errors
    ///
    /// - The duty is out of range, nothing is sent
    /// - The command could not be sent
    pub async fn set_fan_speed(&self, fan: Fan, duty: u32) -> Result<u64> {
        let command = Command::set_fan_speed(fan, duty)?;
        self.publish(&command).await
    }

    /// Turns a light on or off.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn set_light(&self, node: LightNode, mode: LightMode) -> Result<u64> {
        self.publish(&Command::led_control(node, mode)).await
    }

    /// Makes a light flash.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn flash_light(&self, node: LightNode, pattern: FlashPattern) -> Result<u64> {
        self.publish(&Command::led_flashing(node, pattern)).await
    }

    /// Changes the print speed profile.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn set_print_speed(&self, speed: PrintSpeed) -> Result<u64> {
        self.publish(&Command::print_speed(speed)).await
    }

    /// Runs the selected calibrations.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the command could not be sent.
    pub async fn calibrate(&self, calibration: Calibration) -> Result<u64> {
        self.publish(&Command::calibration(calibration)).await
    }

    /// Prints a machine-control file stored on the device.
    ///
    /// # Errors
    ///
    /// - The path is empty, nothing is sent
    /// - The command could not be sent
    pub async fn print_gcode_file(&self, path: &str) -> Result<u64> {
        let command = Command::gcode_file(path)?;
        self.publish(&command).await
    }

    /// Starts a project print.
    ///
    /// # Errors
    ///
    /// - The plate or the url are not valid, nothing is sent
    /// - The command could not be sent
    pub async fn start_project_print(&self, print: &ProjectPrint) -> Result<u64> {
        let command = Command::project_file(print)?;
        self.publish(&command).await
    }

    /// Captures a single camera image.
    ///
    /// # Errors
    ///
    /// - The device has no reachable camera
    /// - The capture failed or timed out
    pub async fn capture_frame(&self) -> Result<MediaFrame> {
        self.camera()?.capture_frame().await
    }

    /// Starts the camera stream.
    ///
    /// # Errors
    ///
    /// - The device has no reachable camera
    /// - A stream is already active
    pub async fn start_stream(&self) -> Result<FrameReceiver> {
        self.camera()?.start_stream().await
    }

    /// Stops the camera stream, if any.
    pub async fn stop_stream(&self) {
        if let Some(camera) = &self.camera {
            camera.stop_stream().await;
        }
    }

    /// Returns the camera stream state.
    pub async fn stream_state(&self) -> StreamState {
        match &self.camera {
            Some(camera) => camera.stream_state().await,
            None => StreamState::Idle,
        }
    }

    /// Returns the device storage access, if any.
    #[must_use]
    pub fn file_transfer(&self) -> Option<&Arc<dyn FileTransfer>> {
        self.file_transfer.as_ref()
    }

    fn camera(&self) -> Result<&CameraClient> {
        self.camera.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::Stream,
                format!("No camera available for `{}`", self.id()),
            )
        })
    }
}
