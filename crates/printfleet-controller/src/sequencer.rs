use std::sync::Arc;

use futures_util::future::BoxFuture;

use printfleet::Command;

use tokio::sync::Mutex;

use tracing::debug;

use crate::error::Result;

/// The channel commands are published on.
///
/// The future resolves once the transport has accepted the payload for
/// delivery. Acceptance says nothing about the device executing the command.
pub trait CommandTransport: Send + Sync {
    /// Publishes `payload` on `topic`.
    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<()>>;
}

/// Returns the topic a device reads commands from.
#[must_use]
pub fn request_topic(serial: &str) -> String {
    format!("device/{serial}/request")
}

/// Assigns sequence numbers to the commands of one device and publishes
/// them.
///
/// The counter lock is held across the transport send, so concurrent
/// callers obtain distinct consecutive numbers and their payloads leave in
/// numbering order.
pub struct Sequencer {
    serial: String,
    topic: String,
    transport: Arc<dyn CommandTransport>,
    next: Mutex<u64>,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("serial", &self.serial)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    /// Creates a [`Sequencer`] whose first command gets the number `base`.
    #[must_use]
    pub fn new(serial: &str, base: u64, transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            serial: serial.into(),
            topic: request_topic(serial),
            transport,
            next: Mutex::new(base),
        }
    }

    /// Publishes a command and returns the sequence number it was sent
    /// with.
    ///
    /// Every call consumes one number, even when the transport fails.
    /// Failed sends are not retried.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the payload could not be sent.
    pub async fn publish(&self, command: &Command) -> Result<u64> {
        let mut next = self.next.lock().await;

        let sequence_id = *next;
        let payload = command.to_bytes(sequence_id)?;
        *next += 1;

        debug!(
            serial = %self.serial,
            sequence_id,
            channel = %command.channel(),
            verb = command.verb(),
            "Publishing command"
        );

        self.transport.publish(&self.topic, payload).await?;

        Ok(sequence_id)
    }

    /// Returns the number the next command will be sent with.
    pub async fn next_sequence_id(&self) -> u64 {
        *self.next.lock().await
    }

    /// Returns the topic commands are published on.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
