//! The `printfleet` library crate describes the protocol spoken by networked
//! 3D printers, without performing any I/O.
//!
//! It provides:
//!
//! - A telemetry model together with the [`Merge`] law used to reconcile
//!   partial device reports into a complete [`TelemetrySnapshot`]
//! - Typed [`Command`] builders which validate their parameters before any
//!   byte leaves the process
//! - A validator for machine-control (G-code) lines
//! - Decoding of health management system records
//! - Detection of print job lifecycle transitions between two snapshots
//!
//! This crate is `no_std` and only requires an allocator, so it can be used
//! both by controllers and by constrained gateways.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Typed device commands and their wire payloads.
pub mod command;
/// Fans, lights and print speed profiles.
pub mod controls;
/// Errors of the protocol layer.
pub mod error;
/// Print job lifecycle transitions.
pub mod events;
/// Machine-control line validation.
pub mod gcode;
/// Health management system records.
pub mod hms;
/// Telemetry model and reconciliation.
pub mod telemetry;

mod de;
mod macros;

pub use command::{Calibration, Channel, Command, ProjectPrint};
pub use events::PrintEvent;
pub use telemetry::{GcodeState, Merge, TelemetryFragment, TelemetrySnapshot};
