//! Mode 09 PID 02: Vehicle Identification Number.

use vsc_protocol::{PRIMARY_ECU, ParsedVin, VIN_LENGTH};

use super::frames::{self, Reply};
use super::find;

/// VIN request.
pub const VIN_REQUEST: &str = "0902";

const VIN_MARKER: [u8; 2] = [0x49, 0x02];

/// Decode a `0902` response. Never fails: problems yield an invalid VIN.
pub fn decode_vin(raw: &str) -> ParsedVin {
    match frames::classify(raw) {
        Reply::Data => {}
        Reply::NoData => return ParsedVin::invalid("no data"),
        Reply::Unknown => return ParsedVin::invalid("request rejected by adapter"),
        Reply::Error(e) => return ParsedVin::invalid(e),
    }

    let messages = frames::parse_messages(raw);
    let bytes = frames::select_ecu(&messages, PRIMARY_ECU, |m| vin_bytes(m).is_some())
        .and_then(|(_, m)| vin_bytes(m))
        .or_else(|| after_marker(&frames::flat_bytes(raw)));

    let Some(bytes) = bytes else {
        return ParsedVin::invalid("VIN marker 49 02 not found");
    };
    let vin: String = bytes
        .into_iter()
        .filter(u8::is_ascii_alphanumeric)
        .map(|b| char::from(b).to_ascii_uppercase())
        .take(VIN_LENGTH)
        .collect();
    ParsedVin::from_chars(vin)
}

/// VIN payload bytes from one ECU's messages.
fn vin_bytes(messages: &[Vec<u8>]) -> Option<Vec<u8>> {
    // Pre-CAN protocols: one `49 02 <seq> d d d d` message per line.
    let numbered: Vec<&Vec<u8>> = messages
        .iter()
        .filter(|m| m.len() > 3 && m.starts_with(&VIN_MARKER))
        .collect();
    if numbered.len() > 1 {
        return Some(numbered.iter().flat_map(|m| m[3..].iter().copied()).collect());
    }
    after_marker(&messages.concat())
}

/// Bytes after `49 02`, minus the message-count byte.
fn after_marker(bytes: &[u8]) -> Option<Vec<u8>> {
    let at = find(bytes, &VIN_MARKER)?;
    let rest = &bytes[at + VIN_MARKER.len()..];
    let rest = match rest.first() {
        Some(count) if !count.is_ascii_alphanumeric() => &rest[1..],
        _ => rest,
    };
    Some(rest.to_vec())
}

/// Render a VIN as an adapter would print a `0902` response, prompt included.
///
/// `header` selects headers-on ISO-TP output (e.g. `Some("7E8")`) or the
/// headers-off indexed format.
pub fn encode_vin(vin: &str, header: Option<&str>) -> String {
    let mut payload = vec![VIN_MARKER[0], VIN_MARKER[1], 0x01];
    payload.extend(vin.bytes());
    let mut text = frames::encode_frames(header, &payload).join("\r");
    text.push_str("\r\r>");
    text
}
