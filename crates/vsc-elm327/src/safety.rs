//! Request safety guard: the engine only ever reads.
//!
//! Allowed OBD-II modes:
//! - 0x01: current data
//! - 0x03 / 0x07 / 0x0A: stored, pending, permanent DTCs
//! - 0x09: vehicle information (VIN)
//!
//! Allowed UDS services: 0x10 session control, 0x22 ReadDataByIdentifier,
//! 0x27 security-access seed requests, 0x3E TesterPresent.
//!
//! Everything else (Mode 0x04 clear DTCs, UDS writes, routines, resets) is
//! rejected before it reaches the adapter. AT commands configure the
//! adapter itself and always pass.

/// OBD-II modes allowed on the wire.
pub const ALLOWED_MODES: &[u8] = &[0x01, 0x03, 0x07, 0x09, 0x0A];

/// UDS services allowed on the wire.
pub const ALLOWED_SERVICES: &[u8] = &[0x10, 0x22, 0x27, 0x3E];

/// Security access sub-functions that request a seed (odd values).
fn is_seed_request(sub_function: u8) -> bool {
    sub_function % 2 == 1
}

pub fn is_mode_allowed(mode: u8) -> bool {
    ALLOWED_MODES.contains(&mode)
}

/// Whether a command string may be sent to the adapter.
pub fn is_request_allowed(command: &str) -> bool {
    let cmd: String = command
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();

    if cmd.starts_with("AT") {
        return true;
    }
    let Some(first) = cmd.get(..2).and_then(|b| u8::from_str_radix(b, 16).ok()) else {
        return false;
    };
    if is_mode_allowed(first) {
        return true;
    }
    if !ALLOWED_SERVICES.contains(&first) {
        return false;
    }
    if first == 0x27 {
        // seed requests only; sending a key is never needed for reads
        return cmd
            .get(2..4)
            .and_then(|b| u8::from_str_radix(b, 16).ok())
            .is_some_and(is_seed_request);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_modes() {
        assert!(is_mode_allowed(0x01)); // Current data
        assert!(is_mode_allowed(0x03)); // Stored DTCs
        assert!(is_mode_allowed(0x07)); // Pending DTCs
        assert!(is_mode_allowed(0x09)); // Vehicle info
        assert!(is_mode_allowed(0x0A)); // Permanent DTCs
    }

    #[test]
    fn blocked_modes() {
        assert!(!is_mode_allowed(0x04)); // Clear DTCs, write
        assert!(!is_mode_allowed(0x08)); // Control on-board, write
    }

    #[test]
    fn requests() {
        assert!(is_request_allowed("ATZ"));
        assert!(is_request_allowed("at sh 7e0"));
        assert!(is_request_allowed("0902"));
        assert!(is_request_allowed("222203"));
        assert!(is_request_allowed("1003"));
        assert!(is_request_allowed("3E00"));
        assert!(is_request_allowed("2701"));

        assert!(!is_request_allowed("04"));
        assert!(!is_request_allowed("2702AABBCCDD")); // send key
        assert!(!is_request_allowed("2EF19012")); // WriteDataByIdentifier
        assert!(!is_request_allowed("1101")); // ECU reset
        assert!(!is_request_allowed("14FFFFFF")); // clear diagnostic info
        assert!(!is_request_allowed("ZZ"));
        assert!(!is_request_allowed(""));
    }
}
