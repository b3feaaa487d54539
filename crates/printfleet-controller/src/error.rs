use std::borrow::Cow;

use tracing::error;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Errors encountered while connecting to or talking with a device.
    Transport,
    /// Errors encountered while decoding data sent by a device.
    Protocol,
    /// Errors caused by an invalid machine-control line.
    InvalidGcode,
    /// Errors caused by an invalid parameter.
    InvalidParameter,
    /// Errors related to the camera stream.
    Stream,
    /// Errors related to fleet management.
    Fleet,
    /// Errors returned by the cloud account service.
    Cloud,
    /// Errors related to device file storage.
    FileTransfer,
    /// An operation did not complete in time.
    Timeout,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::Protocol => "Protocol",
            Self::InvalidGcode => "Invalid Gcode",
            Self::InvalidParameter => "Invalid Parameter",
            Self::Stream => "Stream",
            Self::Fleet => "Fleet",
            Self::Cloud => "Cloud",
            Self::FileTransfer => "File Transfer",
            Self::Timeout => "Timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// Controller error.
#[derive(Clone, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        let description = description.into();
        error!("{}", description.as_ref());
        Self { kind, description }
    }

    // For failures the caller already reported at a lower level.
    pub(crate) fn unlogged(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    fn format(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl From<printfleet::error::Error> for Error {
    fn from(e: printfleet::error::Error) -> Self {
        use printfleet::error::ErrorKind as ProtocolKind;

        let kind = match e.kind() {
            ProtocolKind::InvalidGcode => ErrorKind::InvalidGcode,
            ProtocolKind::InvalidParameter => ErrorKind::InvalidParameter,
            ProtocolKind::Serialization => ErrorKind::Protocol,
        };
        Self::new(kind, e.description().to_owned())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(e: rumqttc::ClientError) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for Error {
    fn from(e: rumqttc::ConnectionError) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<tokio_rustls::rustls::Error> for Error {
    fn from(e: tokio_rustls::rustls::Error) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::new(ErrorKind::Cloud, e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorKind::Timeout, e.to_string())
    }
}

impl std::error::Error for Error {}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// A failure of a single device during a fleet operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFailure {
    /// Device identifier.
    pub id: String,
    /// The failure.
    pub error: Error,
}

/// Failures collected from a concurrent fleet operation.
///
/// Every failure is tagged with the identifier of the device that produced
/// it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetError {
    failures: Vec<DeviceFailure>,
    missing: Vec<usize>,
}

impl FleetError {
    pub(crate) fn push(&mut self, id: String, error: Error) {
        self.failures.push(DeviceFailure { id, error });
    }

    pub(crate) fn push_missing(&mut self, index: usize) {
        self.missing.push(index);
    }

    pub(crate) fn into_result(self) -> std::result::Result<(), Self> {
        if self.failures.is_empty() && self.missing.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Returns the device failures.
    #[must_use]
    pub fn failures(&self) -> &[DeviceFailure] {
        &self.failures
    }

    /// Returns the requested indices which did not match any device.
    #[must_use]
    pub fn missing_indices(&self) -> &[usize] {
        &self.missing
    }

    /// Returns the failure of the given device, if any.
    #[must_use]
    pub fn failure(&self, id: &str) -> Option<&Error> {
        self.failures
            .iter()
            .find(|failure| failure.id == id)
            .map(|failure| &failure.error)
    }
}

impl std::fmt::Display for FleetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} device operations failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.id, failure.error)?;
        }
        for index in &self.missing {
            write!(f, "; no device at index {index}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FleetError {}
