use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use printfleet::events::transitions;
use printfleet::{Command, GcodeState, Merge, PrintEvent, TelemetryFragment, TelemetrySnapshot};

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::time::Instant;

use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::sequencer::Sequencer;

// Lifecycle events kept for slow observers.
const EVENT_CAPACITY: usize = 64;

/// Returns the topic a device publishes its reports on.
#[must_use]
pub fn report_topic(serial: &str) -> String {
    format!("device/{serial}/report")
}

struct Mirror {
    snapshot: TelemetrySnapshot,
    last_update: Option<Instant>,
}

/// Reconciles the partial reports of one device into a snapshot.
///
/// Merges are mutually exclusive. Reads never wait for I/O: they return
/// the latest snapshot, possibly stale, and request a refresh in the
/// background once the last one is older than the configured threshold.
pub struct TelemetryEngine {
    serial: String,
    mirror: Mutex<Mirror>,
    sequencer: Arc<Sequencer>,
    threshold: Duration,
    origin: Instant,
    // Milliseconds since `origin`.
    last_refresh: AtomicU64,
    events: Sender<PrintEvent>,
}

impl std::fmt::Debug for TelemetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryEngine")
            .field("serial", &self.serial)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl TelemetryEngine {
    /// Creates a [`TelemetryEngine`] which requests refreshes through
    /// `sequencer`.
    ///
    /// The creation instant counts as the last refresh.
    #[must_use]
    pub fn new(serial: &str, threshold: Duration, sequencer: Arc<Sequencer>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            serial: serial.into(),
            mirror: Mutex::new(Mirror {
                snapshot: TelemetrySnapshot::default(),
                last_update: None,
            }),
            sequencer,
            threshold,
            origin: Instant::now(),
            last_refresh: AtomicU64::new(0),
            events,
        }
    }

    /// Merges a raw report into the snapshot.
    ///
    /// A payload that cannot be decoded is logged as a warning and dropped as
    /// a whole, and the snapshot is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Protocol`] error for a malformed payload.
    pub fn ingest(&self, payload: &[u8]) -> Result<()> {
        let fragment = TelemetryFragment::from_slice(payload).map_err(|e| {
            warn!(serial = %self.serial, "Dropping malformed report: {}", e.description());
            Error::unlogged(
                ErrorKind::Protocol,
                format!("Malformed report: {}", e.description()),
            )
        })?;

        let events = {
            let mut mirror = self.lock();
            let before = mirror.snapshot.print.clone();
            mirror.snapshot.merge(fragment);
            mirror.last_update = Some(Instant::now());
            transitions(&before, &mirror.snapshot.print)
        };

        for event in events {
            debug!(serial = %self.serial, ?event, "Lifecycle transition");
            // No observers is fine.
            let _ = self.events.send(event);
        }

        Ok(())
    }

    /// Returns the latest snapshot and, when it has not been refreshed
    /// within the threshold, requests a refresh in the background.
    ///
    /// Concurrent readers trigger at most one refresh per threshold window.
    /// Outside a `tokio` runtime no refresh is requested.
    #[must_use]
    pub fn read_snapshot(&self) -> TelemetrySnapshot {
        self.refresh_if_stale();
        self.peek()
    }

    /// Returns the latest snapshot without any side effect.
    #[must_use]
    pub fn peek(&self) -> TelemetrySnapshot {
        self.lock().snapshot.clone()
    }

    /// Returns the job lifecycle state without any side effect.
    #[must_use]
    pub fn gcode_state(&self) -> GcodeState {
        self.lock().snapshot.gcode_state()
    }

    /// Returns when the last report was merged, [`None`] if none was.
    #[must_use]
    pub fn last_update(&self) -> Option<Instant> {
        self.lock().last_update
    }

    /// Subscribes to the lifecycle transitions detected while merging.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<PrintEvent> {
        self.events.subscribe()
    }

    /// Requests a complete report right away and restarts the refresh
    /// window.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the request could not be sent.
    pub async fn refresh(&self) -> Result<u64> {
        self.last_refresh.store(self.elapsed_millis(), Ordering::Release);
        self.sequencer.publish(&Command::push_all()).await
    }

    fn refresh_if_stale(&self) {
        let now = self.elapsed_millis();
        let last = self.last_refresh.load(Ordering::Acquire);
        if now.saturating_sub(last) <= duration_millis(self.threshold) {
            return;
        }

        // Only the reader that wins the swap sends the refresh.
        if self
            .last_refresh
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(serial = %self.serial, "No runtime available to refresh telemetry");
            return;
        };

        let sequencer = Arc::clone(&self.sequencer);
        let serial = self.serial.clone();
        runtime.spawn(async move {
            debug!(%serial, "Telemetry is stale, requesting a refresh");
            if let Err(e) = sequencer.publish(&Command::push_all()).await {
                warn!(%serial, "Telemetry refresh failed: {e}");
            }
        });
    }

    fn elapsed_millis(&self) -> u64 {
        duration_millis(self.origin.elapsed())
    }

    fn lock(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
