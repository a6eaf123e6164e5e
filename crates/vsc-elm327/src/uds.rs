//! UDS (ISO 14229) request strings and response evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::find;
use crate::error::DecodeError;

pub const SID_DIAGNOSTIC_SESSION: u8 = 0x10;
pub const SID_READ_DATA_BY_ID: u8 = 0x22;
pub const SID_SECURITY_ACCESS: u8 = 0x27;
pub const SID_TESTER_PRESENT: u8 = 0x3E;

/// Negative response service id.
pub const NEGATIVE_RESPONSE: u8 = 0x7F;
/// Offset added to a request SID in its positive response.
pub const POSITIVE_OFFSET: u8 = 0x40;

/// DiagnosticSessionControl: default session.
pub const DEFAULT_SESSION: &str = "1001";
/// DiagnosticSessionControl: extended diagnostic session.
pub const EXTENDED_SESSION: &str = "1003";
/// TesterPresent with a response expected.
pub const TESTER_PRESENT: &str = "3E00";
/// SecurityAccess: request seed, level 1.
pub const SECURITY_SEED: &str = "2701";

/// ReadDataByIdentifier request text, e.g. `222203`.
pub fn read_did(did: u16) -> String {
    format!("{SID_READ_DATA_BY_ID:02X}{did:04X}")
}

/// UDS Negative Response Code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegativeResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLengthOrFormat,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,
    /// 0x78: the ECU will answer later; not a failure on its own.
    ResponsePending,
    ServiceNotSupportedInActiveSession,
    Unknown(u8),
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrFormat,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceededNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x78 => Self::ResponsePending,
            0x7F => Self::ServiceNotSupportedInActiveSession,
            other => Self::Unknown(other),
        }
    }
}

impl NegativeResponseCode {
    pub fn code(self) -> u8 {
        match self {
            Self::GeneralReject => 0x10,
            Self::ServiceNotSupported => 0x11,
            Self::SubFunctionNotSupported => 0x12,
            Self::IncorrectMessageLengthOrFormat => 0x13,
            Self::BusyRepeatRequest => 0x21,
            Self::ConditionsNotCorrect => 0x22,
            Self::RequestSequenceError => 0x24,
            Self::RequestOutOfRange => 0x31,
            Self::SecurityAccessDenied => 0x33,
            Self::InvalidKey => 0x35,
            Self::ExceededNumberOfAttempts => 0x36,
            Self::RequiredTimeDelayNotExpired => 0x37,
            Self::ResponsePending => 0x78,
            Self::ServiceNotSupportedInActiveSession => 0x7F,
            Self::Unknown(code) => code,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::GeneralReject => "general reject",
            Self::ServiceNotSupported => "service not supported",
            Self::SubFunctionNotSupported => "sub-function not supported",
            Self::IncorrectMessageLengthOrFormat => "incorrect message length or format",
            Self::BusyRepeatRequest => "busy, repeat request",
            Self::ConditionsNotCorrect => "conditions not correct",
            Self::RequestSequenceError => "request sequence error",
            Self::RequestOutOfRange => "request out of range",
            Self::SecurityAccessDenied => "security access denied",
            Self::InvalidKey => "invalid key",
            Self::ExceededNumberOfAttempts => "exceeded number of attempts",
            Self::RequiredTimeDelayNotExpired => "required time delay not expired",
            Self::ResponsePending => "response pending",
            Self::ServiceNotSupportedInActiveSession => "service not supported in active session",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.code(), self.description())
    }
}

/// Evaluate the messages one ECU sent for a request to `service`.
///
/// `echo` is the request parameter the positive response must repeat (the
/// DID for 0x22, the sub-function for 0x10/0x27/0x3E). Returns the bytes
/// after the echo. A positive response wins over any number of
/// response-pending (0x78) messages; any other negative response is
/// reported as `DecodeError::Negative`.
pub fn evaluate(messages: &[Vec<u8>], service: u8, echo: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let positive: Vec<u8> = [&[service + POSITIVE_OFFSET][..], echo].concat();
    let mut negative = None;
    let mut saw_data = false;

    for msg in messages {
        if msg.is_empty() {
            continue;
        }
        saw_data = true;
        if let Some(at) = find(msg, &positive) {
            return Ok(msg[at + positive.len()..].to_vec());
        }
        if let Some(at) = find(msg, &[NEGATIVE_RESPONSE, service]) {
            let nrc = msg
                .get(at + 2)
                .map(|b| NegativeResponseCode::from(*b))
                .unwrap_or(NegativeResponseCode::GeneralReject);
            // keep the most informative: a final NRC beats "pending"
            if negative.is_none() || nrc != NegativeResponseCode::ResponsePending {
                negative = Some(nrc);
            }
        }
    }

    match negative {
        Some(nrc) => Err(DecodeError::Negative { service, nrc }),
        None if saw_data => Err(DecodeError::MarkerNotFound(format!(
            "{:02X} {}",
            service + POSITIVE_OFFSET,
            echo.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
        ))),
        None => Err(DecodeError::NoData),
    }
}

/// Big-endian value of a DID payload, sized by the bytes actually received.
///
/// ECUs often return fewer bytes than documented, so the width is never
/// taken from the DID table. Payloads longer than four bytes use the first
/// four.
pub fn decode_dynamic(data: &[u8]) -> Option<u32> {
    match data.len() {
        0 | 1 => None,
        n => Some(
            data[..n.min(4)]
                .iter()
                .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
        ),
    }
}
