//! Mode 03 / 07 / 0A: stored, pending, and permanent DTCs.

use vsc_protocol::{DtcCategory, DtcKind, DtcType, PRIMARY_ECU, ParsedDtc};

use super::{frames, require_data};
use crate::dtc_db;
use crate::error::DecodeError;

/// Request text for a DTC list (`03`, `07`, `0A`).
pub fn dtc_request(kind: DtcKind) -> String {
    format!("{:02X}", kind.mode())
}

/// Decode two raw bytes into a DTC code string (e.g., "P0300").
///
/// `00 00` is padding and yields `None`.
pub fn decode_dtc_pair(b1: u8, b2: u8) -> Option<String> {
    if b1 == 0x00 && b2 == 0x00 {
        return None;
    }

    let letter = DtcType::from_high_bits(b1 >> 6).letter();
    let digit1 = (b1 >> 4) & 0x03;
    let digit2 = b1 & 0x0F;
    let digit3 = (b2 >> 4) & 0x0F;
    let digit4 = b2 & 0x0F;

    Some(format!("{letter}{digit1}{digit2:X}{digit3:X}{digit4:X}"))
}

/// Full `ParsedDtc` for a raw byte pair.
pub fn parsed_dtc(b1: u8, b2: u8) -> Option<ParsedDtc> {
    let code = decode_dtc_pair(b1, b2)?;
    let dtc_type = DtcType::from_high_bits(b1 >> 6);
    let category = DtcCategory::classify(dtc_type, (b1 >> 4) & 0x03);
    Some(ParsedDtc {
        description: dtc_db::describe(&code, dtc_type, category),
        code,
        dtc_type,
        category,
    })
}

/// Decode a DTC list response from the preferred ECU (7E8 if it answered).
pub fn decode_dtcs(raw: &str, kind: DtcKind) -> Result<Vec<ParsedDtc>, DecodeError> {
    require_data(raw)?;
    let sid = kind.response_sid();
    let messages = frames::parse_messages(raw);
    let (_, ecu_messages) = frames::select_ecu(&messages, PRIMARY_ECU, |m| {
        m.iter().any(|msg| msg.contains(&sid))
    })
    .ok_or_else(|| DecodeError::MarkerNotFound(format!("{sid:02X}")))?;

    let mut dtcs: Vec<ParsedDtc> = Vec::new();
    for msg in ecu_messages {
        let Some(at) = msg.iter().position(|b| *b == sid) else {
            continue;
        };
        let mut rest = &msg[at + 1..];
        // CAN responses carry a DTC count byte; pairs alone are even
        if rest.len() % 2 == 1 {
            rest = &rest[1..];
        }
        for dtc in rest
            .chunks_exact(2)
            .filter_map(|pair| parsed_dtc(pair[0], pair[1]))
        {
            if !dtcs.iter().any(|d| d.code == dtc.code) {
                dtcs.push(dtc);
            }
        }
    }
    Ok(dtcs)
}
