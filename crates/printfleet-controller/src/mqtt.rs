use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::PrinterConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::sequencer::CommandTransport;
use crate::telemetry::{TelemetryEngine, report_topic};
use crate::tls;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
// Complete reports of printers with several material units exceed the
// library default.
const MAX_PACKET_SIZE: usize = 1024 * 1024;
const REQUEST_CAPACITY: usize = 64;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Publishes commands on the broker session of a device.
///
/// The transport is detached while the device is disconnected, and every
/// publish then fails with a [`ErrorKind::Transport`] error.
#[derive(Default)]
pub struct MqttTransport {
    client: RwLock<Option<AsyncClient>>,
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl MqttTransport {
    /// Creates a detached [`MqttTransport`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a broker session is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn attach(&self, client: AsyncClient) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
    }

    pub(crate) fn detach(&self) {
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl CommandTransport for MqttTransport {
    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let client = self
                .client
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();

            let Some(client) = client else {
                return Err(Error::new(
                    ErrorKind::Transport,
                    format!("Cannot publish on `{topic}`: not connected"),
                ));
            };

            client
                .publish(topic, QoS::AtMostOnce, false, payload)
                .await
                .map_err(Error::from)
        })
    }
}

/// A live broker session of one device.
///
/// A single task polls the connection: it feeds reports to the telemetry
/// engine, subscribes again after every reconnection and retries after
/// connection errors until the session is closed.
pub(crate) struct MqttSession {
    client: AsyncClient,
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MqttSession {
    pub(crate) async fn connect(
        config: &PrinterConfig,
        engine: Arc<TelemetryEngine>,
    ) -> Result<Self> {
        let (client, mut event_loop) = AsyncClient::new(options(config)?, REQUEST_CAPACITY);

        timeout(
            config.operation_timeout(),
            wait_for_connection(&mut event_loop),
        )
        .await
        .map_err(|_| {
            Error::new(
                ErrorKind::Timeout,
                format!(
                    "No answer from `{}` within {:?}",
                    config.host(),
                    config.operation_timeout()
                ),
            )
        })??;

        let topic = report_topic(config.serial());
        client.subscribe(topic.as_str(), QoS::AtMostOnce).await?;

        info!(serial = config.serial(), "Connected to the device broker");

        let cancellation_token = CancellationToken::new();
        let handle = tokio::spawn(run_event_loop(
            event_loop,
            client.clone(),
            topic,
            engine,
            cancellation_token.clone(),
        ));

        Ok(Self {
            client,
            cancellation_token,
            handle,
        })
    }

    pub(crate) fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    pub(crate) async fn disconnect(self) {
        // Best effort: the request is only queued.
        if let Err(e) = self.client.try_disconnect() {
            debug!("Failed to queue the disconnection: {e}");
        }

        // Stop the loop.
        self.cancellation_token.cancel();

        if let Err(e) = self.handle.await {
            error!("Failed to await the telemetry task: {e}");
        }
    }
}

fn options(config: &PrinterConfig) -> Result<MqttOptions> {
    let client_id = format!("printfleet_{}_{}", config.serial(), std::process::id());

    let mut options = MqttOptions::new(client_id, config.host(), config.broker_port());
    options.set_credentials(config.user(), config.access_code());
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    let tls_config = if config.is_cloud() {
        tls::broker_config()?
    } else {
        tls::printer_config()?
    };
    options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
        tls_config,
    )));

    Ok(options)
}

async fn wait_for_connection(event_loop: &mut EventLoop) -> Result<()> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = event_loop.poll().await? {
            return Ok(());
        }
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    topic: String,
    engine: Arc<TelemetryEngine>,
    cancellation_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancellation_token.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic == topic {
                    // Malformed reports are logged and dropped by the engine.
                    let _ = engine.ingest(&publish.payload);
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(%topic, "Reconnected, subscribing again");
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                    warn!(%topic, "Failed to subscribe again: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(%topic, "Connection error: {e}");
                tokio::select! {
                    () = cancellation_token.cancelled() => break,
                    () = sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    debug!(%topic, "Telemetry task stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use printfleet::Command;

    use crate::config::tests::create_config;
    use crate::error::ErrorKind;
    use crate::sequencer::{CommandTransport, Sequencer};

    use super::{MqttTransport, options};

    #[tokio::test]
    async fn detached_transport_fails() {
        let transport = Arc::new(MqttTransport::new());
        assert!(!transport.is_attached());

        let error = transport
            .publish("device/01S00A/request", b"{}".to_vec())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Transport);

        // The number is still consumed.
        let sequencer = Sequencer::new("01S00A", 0, transport);
        assert!(sequencer.publish(&Command::pause()).await.is_err());
        assert_eq!(sequencer.next_sequence_id().await, 1);
    }

    #[test]
    fn broker_options() {
        let config = create_config("01S00A");
        let options = options(&config).unwrap();

        assert_eq!(
            options.broker_address(),
            ("127.0.0.1".to_owned(), 8883)
        );
        assert!(options.client_id().starts_with("printfleet_01S00A_"));
    }
}
