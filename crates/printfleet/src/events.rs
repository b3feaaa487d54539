use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::telemetry::{GcodeState, PrintStatus};

/// A print job lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintEvent {
    /// A new job file started.
    Started {
        /// Job file name.
        file: String,
    },
    /// The job was paused.
    Paused,
    /// The job was resumed.
    Resumed,
    /// The job was stopped before completion.
    Stopped,
    /// The job completed.
    Finished,
    /// The job failed.
    Failed,
    /// The device reported an error code.
    Error {
        /// Reported code.
        code: String,
    },
    /// Job progress changed.
    Progress {
        /// Completion percentage.
        percent: u8,
    },
    /// Remaining job time changed.
    RemainingTime {
        /// Remaining minutes.
        minutes: u32,
    },
}

/// Computes the lifecycle transitions between two successive states of the
/// same device.
#[must_use]
pub fn transitions(before: &PrintStatus, after: &PrintStatus) -> Vec<PrintEvent> {
    let mut events = Vec::new();

    if after.gcode_file != before.gcode_file && !after.gcode_file.is_empty() {
        events.push(PrintEvent::Started {
            file: after.gcode_file.clone(),
        });
    }

    if after.gcode_state != before.gcode_state {
        let event = match (before.gcode_state, after.gcode_state) {
            (_, Some(GcodeState::Pause)) => Some(PrintEvent::Paused),
            (Some(GcodeState::Pause), Some(GcodeState::Running)) => Some(PrintEvent::Resumed),
            (Some(previous), Some(GcodeState::Idle)) if previous.is_active() => {
                Some(PrintEvent::Stopped)
            }
            (_, Some(GcodeState::Finish)) => Some(PrintEvent::Finished),
            (_, Some(GcodeState::Failed)) => Some(PrintEvent::Failed),
            _ => None,
        };
        events.extend(event);
    }

    if after.mc_print_error_code != before.mc_print_error_code
        && !after.mc_print_error_code.is_empty()
        && after.mc_print_error_code != "0"
    {
        events.push(PrintEvent::Error {
            code: after.mc_print_error_code.clone(),
        });
    }

    if after.print_error != before.print_error && after.print_error != 0 {
        events.push(PrintEvent::Error {
            code: format!("{:08X}", after.print_error),
        });
    }

    if after.mc_percent != before.mc_percent {
        events.push(PrintEvent::Progress {
            percent: after.mc_percent,
        });
    }

    if after.mc_remaining_time != before.mc_remaining_time {
        events.push(PrintEvent::RemainingTime {
            minutes: after.mc_remaining_time,
        });
    }

    events
}
