//! Error taxonomy for the printer bridge.
//!
//! Every failure that reaches the app layer is a [`CommandError`]: a numeric
//! code from the fixed [`ErrorCode`] table, its static message, and optional
//! diagnostic text from the underlying cause. Lower layers use their own
//! `thiserror` enums ([`TransportError`], [`DriverError`]) which the session
//! converts at the operation boundary.

use serde::{Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Fixed code table shared with the app layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    AdapterUnavailable = 1,
    NoDevices = 2,
    InvalidLineCount = 3,
    FeedFailed = 4,
    PrintFailed = 5,
    StatusFailed = 6,
    TemperatureFailed = 7,
    BarcodePrintFailed = 8,
    SelfTestFailed = 9,
    BarcodeConfigFailed = 10,
    ImagePrintFailed = 11,
    InvalidAddress = 12,
    ConnectFailed = 13,
    DisconnectFailed = 14,
    InvalidArgument = 15,
    UnsupportedCommand = 16,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::AdapterUnavailable => "Bluetooth adapter not available",
            ErrorCode::NoDevices => "No Bluetooth devices found",
            ErrorCode::InvalidLineCount => "Line count must be between 0 and 255",
            ErrorCode::FeedFailed => "Failed to feed paper",
            ErrorCode::PrintFailed => "Failed to print",
            ErrorCode::StatusFailed => "Failed to query status",
            ErrorCode::TemperatureFailed => "Failed to query temperature",
            ErrorCode::BarcodePrintFailed => "Failed to print barcode",
            ErrorCode::SelfTestFailed => "Failed to print self test page",
            ErrorCode::BarcodeConfigFailed => "Failed to set barcode configuration",
            ErrorCode::ImagePrintFailed => "Failed to print image",
            ErrorCode::InvalidAddress => "Invalid Bluetooth address",
            ErrorCode::ConnectFailed => "Failed to connect to printer",
            ErrorCode::DisconnectFailed => "Failed to disconnect printer",
            ErrorCode::InvalidArgument => "Invalid command argument",
            ErrorCode::UnsupportedCommand => "Unsupported command",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.code())
    }
}

// ---------------------------------------------------------------------------
// Command error (crosses the router boundary)
// ---------------------------------------------------------------------------

/// Structured failure returned to the caller of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub code: ErrorCode,
    pub exception: Option<String>,
}

impl CommandError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            exception: None,
        }
    }

    /// Attach the underlying cause's message as diagnostic context.
    pub fn with_cause(code: ErrorCode, cause: impl fmt::Display) -> Self {
        Self {
            code,
            exception: Some(cause.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "errorCode": self.code.code(),
            "message": self.code.message(),
        });
        if let Some(ref exception) = self.exception {
            obj["exception"] = exception.clone().into();
        }
        obj
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exception {
            Some(cause) => write!(f, "{}: {cause}", self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for CommandError {}

impl Serialize for CommandError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Transport / driver errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("failed to open {target}: {reason}")]
    Open { target: String, reason: String },
    #[error("no bound port for {0}")]
    UnknownDevice(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("printer not connected")]
    NotConnected,
    #[error("{0} is not supported by this printer")]
    Unsupported(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("no response from printer")]
    NoResponse,
    #[error("image decode: {0}")]
    Decode(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DriverError {
    /// Whether the failure came from the link rather than the printer
    /// rejecting a command. A link failure ends the connection.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            DriverError::NotConnected
                | DriverError::Transport(TransportError::Io(_))
                | DriverError::Transport(TransportError::Closed)
                | DriverError::Transport(TransportError::NotConnected)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
