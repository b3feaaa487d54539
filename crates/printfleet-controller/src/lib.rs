//! The `printfleet-controller` library crate keeps a fleet of networked 3D
//! printers in sync and drives them.
//!
//! For every printer, a [`DeviceHandle`](device::DeviceHandle):
//!
//! - Mirrors the device telemetry, reconciling its partial reports and
//!   requesting complete ones when they get stale
//! - Publishes sequence-numbered commands, skipping those which the
//!   current job state makes meaningless
//! - Captures camera images and runs a supervised camera stream which
//!   reconnects after failures
//!
//! A [`Fleet`](fleet::Fleet) runs operations over many devices, either
//! concurrently, collecting every failure, or one at a time, stopping at the
//! first one.
//!
//! Printers reachable only through the vendor cloud are listed by the
//! [`CloudClient`](cloud::CloudClient).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Camera connection, authentication and streaming.
pub mod camera;
/// Vendor account service.
pub mod cloud;
/// Printer connection settings.
pub mod config;
/// Single printer sessions.
pub mod device;
/// Error handling.
pub mod error;
/// Device storage access.
pub mod file_transfer;
/// Operations over many printers.
pub mod fleet;
/// Broker session and command transport.
pub mod mqtt;
/// Command numbering and publication.
pub mod sequencer;
/// Telemetry reconciliation.
pub mod telemetry;
/// `TLS` client configurations.
pub mod tls;

pub use config::PrinterConfig;
pub use device::DeviceHandle;
pub use fleet::Fleet;

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
