//! OBD-II codec: pure functions from adapter text to typed values. No I/O.
//!
//! Malformed or absent markers yield a `DecodeError`, never a panic, so a
//! caller's larger read sequence always continues.

pub mod dtc;
pub mod frames;
pub mod pid;
pub mod vin;

pub use dtc::{decode_dtc_pair, decode_dtcs, dtc_request};
pub use frames::{EcuMessages, Reply, classify, parse_messages, parse_response};
pub use pid::{PidValue, decode_mil, decode_pid_value, pid_data, pid_request, read_pid};
pub use vin::{VIN_REQUEST, decode_vin, encode_vin};

use crate::error::DecodeError;

/// Position of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Map adapter-level failures to decode errors; `Ok` for data.
pub(crate) fn require_data(raw: &str) -> Result<(), DecodeError> {
    match classify(raw) {
        Reply::Data => Ok(()),
        Reply::NoData => Err(DecodeError::NoData),
        Reply::Unknown => Err(DecodeError::Adapter("?".into())),
        Reply::Error(e) => Err(DecodeError::Adapter(e)),
    }
}
