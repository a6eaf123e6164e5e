//! Diagnostic engine error types.

use thiserror::Error;
use vsc_link::TransportError;
use vsc_protocol::ScanResult;

use crate::uds::NegativeResponseCode;

/// Errors from the adapter controller, codec users, and odometer engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiagError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("adapter initialization failed: {0}")]
    AdapterInit(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("negative response to service 0x{service:02X}: {nrc}")]
    NegativeResponse {
        service: u8,
        nrc: NegativeResponseCode,
    },

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("safety violation: {0} is not a read-only request")]
    SafetyViolation(String),
}

impl DiagError {
    /// True when the link to the adapter is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DiagError::Transport(t) if t.is_disconnect())
    }

    /// An expected outcome on vehicles lacking the feature, not a fault.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, DiagError::NotSupported(_))
    }
}

/// Convenience alias for diagnostic results.
pub type DiagResult<T> = Result<T, DiagError>;

/// Failure to decode adapter text into a typed value. Never aborts a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no data")]
    NoData,

    #[error("response marker {0} not found")]
    MarkerNotFound(String),

    #[error("need {need} data bytes, got {got}")]
    TooShort { need: usize, got: usize },

    #[error("negative response to service 0x{service:02X}: {nrc}")]
    Negative {
        service: u8,
        nrc: NegativeResponseCode,
    },

    #[error("adapter reported {0}")]
    Adapter(String),
}

impl From<DecodeError> for DiagError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::NoData | DecodeError::MarkerNotFound(_) => {
                DiagError::NotSupported(e.to_string())
            }
            DecodeError::Negative { service, nrc } => DiagError::NegativeResponse { service, nrc },
            DecodeError::TooShort { .. } | DecodeError::Adapter(_) => {
                DiagError::Protocol(e.to_string())
            }
        }
    }
}

/// A scan-level failure. Carries whatever was read before it happened.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("adapter initialization failed: {source}")]
    AdapterInit {
        source: DiagError,
        partial: Box<ScanResult>,
    },

    #[error("connection to the adapter was lost: {source}")]
    Disconnected {
        source: DiagError,
        partial: Box<ScanResult>,
    },

    #[error("scan cancelled")]
    Cancelled { partial: Box<ScanResult> },
}

impl ScanError {
    /// The result as far as the scan got.
    pub fn partial(&self) -> &ScanResult {
        match self {
            ScanError::AdapterInit { partial, .. }
            | ScanError::Disconnected { partial, .. }
            | ScanError::Cancelled { partial } => partial,
        }
    }

    pub fn into_partial(self) -> ScanResult {
        match self {
            ScanError::AdapterInit { partial, .. }
            | ScanError::Disconnected { partial, .. }
            | ScanError::Cancelled { partial } => *partial,
        }
    }

    /// Single actionable message for the user.
    pub fn user_message(&self) -> &'static str {
        let source = match self {
            ScanError::Cancelled { .. } => return "Scan cancelled.",
            ScanError::AdapterInit { source, .. } | ScanError::Disconnected { source, .. } => source,
        };
        match source {
            DiagError::Transport(TransportError::Timeout { .. }) => {
                "Timed out waiting for the adapter. Check that the ignition is on and retry."
            }
            DiagError::Transport(TransportError::NotConnected | TransportError::Connection(_)) => {
                "Not connected to the adapter. Reconnect and retry."
            }
            DiagError::Transport(_) => "Could not communicate with the adapter. Reconnect and retry.",
            _ => "The adapter did not initialize. Unplug it, plug it back in, and retry.",
        }
    }
}
