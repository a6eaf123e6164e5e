//! Transport error types.

use thiserror::Error;

/// Errors surfaced by the transport session and BLE links.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("timed out after {timeout_ms}ms waiting for response to {command}")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("no usable write/notify characteristic pair")]
    NoUsableCharacteristics,

    #[error("BLE error: {0}")]
    Ble(String),
}

impl TransportError {
    /// True when the link itself is gone (as opposed to one slow command).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected | TransportError::Connection(_)
        )
    }
}

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;
