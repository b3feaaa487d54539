/// Authentication and image framing of the camera byte stream.
pub mod framer;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::ClientConfig;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::PrinterConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::tls;

use framer::{FrameExtractor, MediaFrame, READ_CHUNK, auth_block};

/// A bidirectional byte stream to a camera.
pub trait MediaIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> MediaIo for T {}

/// Opens connections to a camera.
pub trait MediaConnector: Send + Sync {
    /// Opens a new connection.
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn MediaIo>>>;
}

/// Opens `TLS` connections to the camera of a printer.
#[derive(Debug)]
pub struct TlsMediaConnector {
    host: String,
    port: u16,
    config: Arc<ClientConfig>,
}

impl TlsMediaConnector {
    /// Creates a [`TlsMediaConnector`] for the printer camera.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Transport`] error if the `TLS` configuration
    /// cannot be built.
    pub fn new(config: &PrinterConfig) -> Result<Self> {
        Ok(Self {
            host: config.host().into(),
            port: config.media_port(),
            config: tls::printer_config()?,
        })
    }
}

impl MediaConnector for TlsMediaConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn MediaIo>>> {
        Box::pin(async move {
            let server_name = tls::server_name(&self.host)?;
            let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            let stream = TlsConnector::from(Arc::clone(&self.config))
                .connect(server_name, stream)
                .await?;

            Ok(Box::new(stream) as Box<dyn MediaIo>)
        })
    }
}

/// Camera stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Not started.
    Idle,
    /// Connecting and authenticating.
    Connecting,
    /// Receiving images.
    Streaming,
    /// Waiting before reconnecting after a failure.
    Backoff,
    /// Stopped.
    Stopped,
}

/// Receives the images of a running camera stream.
///
/// Images are handed over only while a consumer is waiting in
/// [`FrameReceiver::next_frame`]. Images produced in between are dropped,
/// so a slow consumer always gets a recent image.
///
/// Dropping the receiver ends the stream.
#[derive(Debug)]
pub struct FrameReceiver {
    frames: flume::Receiver<MediaFrame>,
    state: watch::Receiver<StreamState>,
}

impl FrameReceiver {
    /// Waits for the next image.
    ///
    /// Returns [`None`] once the stream has stopped.
    pub async fn next_frame(&self) -> Option<MediaFrame> {
        self.frames.recv_async().await.ok()
    }

    /// Returns the current stream state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Returns a receiver of stream state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }
}

struct StreamSession {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct StreamSlot {
    session: Option<StreamSession>,
    state: Option<watch::Receiver<StreamState>>,
}

#[derive(Clone)]
struct StreamSettings {
    serial: String,
    username: String,
    access_code: String,
    timeout: Duration,
    backoff: Duration,
    connector: Arc<dyn MediaConnector>,
}

impl StreamSettings {
    async fn open(&self) -> Result<Box<dyn MediaIo>> {
        let mut io = self.connector.connect().await?;
        io.write_all(&auth_block(&self.username, &self.access_code))
            .await?;
        io.flush().await?;
        Ok(io)
    }

    // Every read is bounded, a silent camera is a failed one.
    async fn read_frame(
        &self,
        io: &mut Box<dyn MediaIo>,
        extractor: &mut FrameExtractor,
    ) -> Result<MediaFrame> {
        let mut chunk = [0; READ_CHUNK];
        loop {
            if let Some(frame) = extractor.next_frame() {
                return Ok(frame);
            }

            let read = timeout(self.timeout, io.read(&mut chunk))
                .await
                .map_err(|_| {
                    Error::new(
                        ErrorKind::Timeout,
                        format!(
                            "Camera of `{}` sent nothing within {:?}",
                            self.serial, self.timeout
                        ),
                    )
                })??;
            if read == 0 {
                return Err(Error::new(
                    ErrorKind::Stream,
                    format!(
                        "Camera of `{}` closed the stream, {} bytes of an incomplete image dropped",
                        self.serial,
                        extractor.buffered()
                    ),
                ));
            }
            extractor.push(&chunk[..read]);
        }
    }
}

/// The camera of one printer.
pub struct CameraClient {
    settings: StreamSettings,
    slot: Mutex<StreamSlot>,
}

impl std::fmt::Debug for CameraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraClient")
            .field("serial", &self.settings.serial)
            .field("timeout", &self.settings.timeout)
            .field("backoff", &self.settings.backoff)
            .finish_non_exhaustive()
    }
}

impl CameraClient {
    /// Creates a [`CameraClient`] using the given connector.
    #[must_use]
    pub fn new(config: &PrinterConfig, connector: Arc<dyn MediaConnector>) -> Self {
        Self {
            settings: StreamSettings {
                serial: config.serial().into(),
                username: config.user().into(),
                access_code: config.access_code().into(),
                timeout: config.operation_timeout(),
                backoff: config.media_backoff(),
                connector,
            },
            slot: Mutex::new(StreamSlot::default()),
        }
    }

    /// Captures a single image on a dedicated connection.
    ///
    /// # Errors
    ///
    /// - The connection or the authentication failed
    /// - The camera closed the connection before a complete image
    /// - No image arrived within the configured timeout
    pub async fn capture_frame(&self) -> Result<MediaFrame> {
        let capture = async {
            let mut io = self.settings.open().await?;
            let frame = self
                .settings
                .read_frame(&mut io, &mut FrameExtractor::new())
                .await?;
            if let Err(e) = io.shutdown().await {
                debug!(serial = %self.settings.serial, "Camera shutdown failed: {e}");
            }
            Ok(frame)
        };

        timeout(self.settings.timeout, capture).await.map_err(|_| {
            Error::new(
                ErrorKind::Timeout,
                format!(
                    "No image from the camera of `{}` within {:?}",
                    self.settings.serial, self.settings.timeout
                ),
            )
        })?
    }

    /// Starts a supervised camera stream.
    ///
    /// The stream reconnects after every failure, waiting for the configured
    /// backoff, until [`CameraClient::stop_stream`] is called or the
    /// returned [`FrameReceiver`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Stream`] error if a stream is already active.
    pub async fn start_stream(&self) -> Result<FrameReceiver> {
        let mut slot = self.slot.lock().await;

        if slot
            .session
            .as_ref()
            .is_some_and(|session| !session.handle.is_finished())
        {
            return Err(Error::new(
                ErrorKind::Stream,
                format!(
                    "A camera stream is already active for `{}`",
                    self.settings.serial
                ),
            ));
        }

        let (frames_tx, frames_rx) = flume::bounded(0);
        let (state_tx, state_rx) = watch::channel(StreamState::Idle);
        let cancellation_token = CancellationToken::new();

        let worker = StreamWorker {
            settings: self.settings.clone(),
            frames: frames_tx,
            state: state_tx,
            cancellation_token: cancellation_token.clone(),
        };
        let handle = tokio::spawn(worker.run());

        slot.session = Some(StreamSession {
            cancellation_token,
            handle,
        });
        slot.state = Some(state_rx.clone());

        Ok(FrameReceiver {
            frames: frames_rx,
            state: state_rx,
        })
    }

    /// Stops the active stream, if any, and waits for it to terminate.
    ///
    /// A pending reconnection backoff is interrupted.
    pub async fn stop_stream(&self) {
        let session = self.slot.lock().await.session.take();

        if let Some(session) = session {
            session.cancellation_token.cancel();
            if let Err(e) = session.handle.await {
                error!("Failed to await the camera task: {e}");
            }
        }
    }

    /// Returns the state of the last started stream.
    pub async fn stream_state(&self) -> StreamState {
        self.slot
            .lock()
            .await
            .state
            .as_ref()
            .map_or(StreamState::Idle, |state| *state.borrow())
    }
}

struct StreamWorker {
    settings: StreamSettings,
    frames: flume::Sender<MediaFrame>,
    state: watch::Sender<StreamState>,
    cancellation_token: CancellationToken,
}

impl StreamWorker {
    async fn run(self) {
        let serial = self.settings.serial.clone();

        loop {
            self.state.send_replace(StreamState::Connecting);

            let outcome = tokio::select! {
                () = self.cancellation_token.cancelled() => break,
                outcome = self.stream() => outcome,
            };

            match outcome {
                // The consumer is gone.
                Ok(()) => break,
                Err(e) => {
                    warn!(%serial, "Camera stream interrupted: {e}");
                    if self.frames.is_disconnected() {
                        break;
                    }

                    self.state.send_replace(StreamState::Backoff);
                    tokio::select! {
                        () = self.cancellation_token.cancelled() => break,
                        () = sleep(self.settings.backoff) => {}
                    }
                }
            }
        }

        self.state.send_replace(StreamState::Stopped);
        info!(%serial, "Camera stream stopped");
    }

    async fn stream(&self) -> Result<()> {
        let mut io = timeout(self.settings.timeout, self.settings.open()).await??;
        self.state.send_replace(StreamState::Streaming);
        debug!(serial = %self.settings.serial, "Camera stream connected");

        let mut extractor = FrameExtractor::new();
        loop {
            let frame = self.settings.read_frame(&mut io, &mut extractor).await?;
            match self.frames.try_send(frame) {
                Ok(()) | Err(flume::TrySendError::Full(_)) => {}
                Err(flume::TrySendError::Disconnected(_)) => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use crate::config::PrinterConfig;
    use crate::error::{Error, ErrorKind, Result};

    use super::framer::tests::create_frame;
    use super::framer::{AUTH_BLOCK_LEN, auth_block};
    use super::{CameraClient, MediaConnector, MediaIo, StreamState};

    const WAIT: Duration = Duration::from_secs(5);

    // Every connection hands its device side to the test.
    struct ScriptedConnector {
        devices: mpsc::UnboundedSender<DuplexStream>,
        attempts: AtomicUsize,
        refuse: bool,
    }

    impl ScriptedConnector {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
            let (devices, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                devices,
                attempts: AtomicUsize::new(0),
                refuse: false,
            });
            (connector, rx)
        }

        fn refusing() -> Arc<Self> {
            let (devices, _) = mpsc::unbounded_channel();
            Arc::new(Self {
                devices,
                attempts: AtomicUsize::new(0),
                refuse: true,
            })
        }
    }

    impl MediaConnector for ScriptedConnector {
        fn connect(&self) -> BoxFuture<'_, Result<Box<dyn MediaIo>>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                if self.refuse {
                    return Err(Error::new(ErrorKind::Transport, "Connection refused."));
                }
                let (client, device) = duplex(64 * 1024);
                let _ = self.devices.send(device);
                Ok(Box::new(client) as Box<dyn MediaIo>)
            })
        }
    }

    fn create_camera(connector: Arc<dyn MediaConnector>, backoff: Duration) -> CameraClient {
        crate::init_test_logging();
        let config = PrinterConfig::new("127.0.0.1", "12345678", "01S00A")
            .timeout(Duration::from_secs(2))
            .stream_backoff(backoff);
        CameraClient::new(&config, connector)
    }

    async fn accept(devices: &mut mpsc::UnboundedReceiver<DuplexStream>) -> DuplexStream {
        let mut device = timeout(WAIT, devices.recv()).await.unwrap().unwrap();
        let mut block = [0; AUTH_BLOCK_LEN];
        device.read_exact(&mut block).await.unwrap();
        assert_eq!(block, auth_block("bblp", "12345678"));
        device
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capture_single_frame() {
        let (connector, mut devices) = ScriptedConnector::new();
        let camera = create_camera(connector, Duration::from_secs(1));
        let frame = create_frame(b"snapshot");

        let device = tokio::spawn({
            let frame = frame.clone();
            async move {
                let mut device = accept(&mut devices).await;
                device.write_all(b"noise").await.unwrap();
                device.write_all(&frame[..5]).await.unwrap();
                device.write_all(&frame[5..]).await.unwrap();
                device
            }
        });

        let captured = camera.capture_frame().await.unwrap();
        assert_eq!(captured.as_bytes(), frame.as_slice());
        drop(device.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capture_fails_on_early_close() {
        let (connector, mut devices) = ScriptedConnector::new();
        let camera = create_camera(connector, Duration::from_secs(1));

        tokio::spawn(async move {
            let mut device = accept(&mut devices).await;
            // Half an image, then close.
            device.write_all(&create_frame(b"cut")[..6]).await.unwrap();
        });

        let error = camera.capture_frame().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Stream);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_times_out() {
        let (connector, mut devices) = ScriptedConnector::new();
        let camera = create_camera(connector, Duration::from_secs(1));

        let device = tokio::spawn(async move {
            let device = accept(&mut devices).await;
            // Keep the connection open without sending anything.
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(device);
        });

        let error = camera.capture_frame().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
        device.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stream_delivers_and_reconnects() {
        let (connector, mut devices) = ScriptedConnector::new();
        let camera = create_camera(connector.clone(), Duration::from_millis(20));
        let receiver = camera.start_stream().await.unwrap();

        let first = create_frame(b"first");
        let second = create_frame(b"second");

        let consumer = tokio::spawn(async move {
            let a = receiver.next_frame().await;
            let b = receiver.next_frame().await;
            (receiver, a, b)
        });

        // The consumer is waiting, so the image is handed over.
        let mut device = accept(&mut devices).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.write_all(&first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Connection lost: the stream reconnects after the backoff.
        drop(device);
        let mut device = accept(&mut devices).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.write_all(&second).await.unwrap();

        let (receiver, a, b) = timeout(WAIT, consumer).await.unwrap().unwrap();
        assert_eq!(a.unwrap().as_bytes(), first.as_slice());
        assert_eq!(b.unwrap().as_bytes(), second.as_slice());
        assert!(connector.attempts.load(Ordering::SeqCst) >= 2);
        assert_eq!(receiver.state(), StreamState::Streaming);

        camera.stop_stream().await;
        assert_eq!(receiver.state(), StreamState::Stopped);
        assert_eq!(camera.stream_state().await, StreamState::Stopped);
        assert_eq!(receiver.next_frame().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_reconnects() {
        let (connector, mut devices) = ScriptedConnector::new();
        let camera = create_camera(connector.clone(), Duration::from_secs(1));
        let receiver = camera.start_stream().await.unwrap();
        let mut state = receiver.watch_state();

        // Authenticated and kept open, but no image ever arrives.
        let silent = accept(&mut devices).await;

        state
            .wait_for(|state| *state == StreamState::Backoff)
            .await
            .unwrap();
        let _fresh = accept(&mut devices).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        camera.stop_stream().await;
        assert_eq!(receiver.state(), StreamState::Stopped);
        drop(silent);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_without_consumer_are_dropped() {
        let (connector, mut devices) = ScriptedConnector::new();
        let camera = create_camera(connector, Duration::from_secs(1));
        let receiver = Arc::new(camera.start_stream().await.unwrap());

        let mut device = accept(&mut devices).await;

        // Nobody is waiting for this one.
        device.write_all(&create_frame(b"stale")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let consumer = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.next_frame().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let fresh = create_frame(b"fresh");
        device.write_all(&fresh).await.unwrap();

        let frame = timeout(WAIT, consumer).await.unwrap().unwrap().unwrap();
        assert_eq!(frame.as_bytes(), fresh.as_slice());

        camera.stop_stream().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_stream_is_rejected() {
        let (connector, _devices) = ScriptedConnector::new();
        let camera = create_camera(connector, Duration::from_secs(1));

        let _receiver = camera.start_stream().await.unwrap();
        let error = camera.start_stream().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Stream);

        camera.stop_stream().await;

        // A stopped stream can be started again.
        let _receiver = camera.start_stream().await.unwrap();
        camera.stop_stream().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_interrupts_backoff() {
        let connector = ScriptedConnector::refusing();
        let camera = create_camera(connector.clone(), Duration::from_secs(3600));
        let receiver = camera.start_stream().await.unwrap();

        let mut state = receiver.watch_state();
        timeout(WAIT, state.wait_for(|state| *state == StreamState::Backoff))
            .await
            .unwrap()
            .unwrap();

        timeout(WAIT, camera.stop_stream()).await.unwrap();
        assert_eq!(receiver.state(), StreamState::Stopped);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_receiver_ends_stream() {
        let (connector, mut devices) = ScriptedConnector::new();
        let camera = create_camera(connector, Duration::from_secs(1));
        let receiver = camera.start_stream().await.unwrap();
        let mut state = receiver.watch_state();

        let mut device = accept(&mut devices).await;
        drop(receiver);
        device.write_all(&create_frame(b"unwanted")).await.unwrap();

        timeout(WAIT, state.wait_for(|state| *state == StreamState::Stopped))
            .await
            .unwrap()
            .unwrap();
    }
}
