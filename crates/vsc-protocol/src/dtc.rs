use serde::{Deserialize, Serialize};

/// A decoded OBD-II Diagnostic Trouble Code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDtc {
    /// Five-character code: type letter + four hex digits (e.g., "P0300").
    pub code: String,
    /// Human-readable description (from the DTC table, or a generic fallback).
    pub description: String,
    /// System letter derived from the top two bits of the high byte.
    #[serde(rename = "type")]
    pub dtc_type: DtcType,
    /// SAE J2012 category derived from the first digit.
    pub category: DtcCategory,
}

/// DTC system type (first character of the code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DtcType {
    /// P: Powertrain (engine, transmission).
    P,
    /// C: Chassis (ABS, steering).
    C,
    /// B: Body (airbags, AC, lighting).
    B,
    /// U: Network/Communication (CAN bus errors).
    U,
}

impl DtcType {
    /// Map the top two bits of a DTC high byte to a type letter.
    pub fn from_high_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => DtcType::P,
            1 => DtcType::C,
            2 => DtcType::B,
            _ => DtcType::U,
        }
    }

    pub fn letter(self) -> char {
        match self {
            DtcType::P => 'P',
            DtcType::C => 'C',
            DtcType::B => 'B',
            DtcType::U => 'U',
        }
    }

    pub fn system_name(self) -> &'static str {
        match self {
            DtcType::P => "Powertrain",
            DtcType::C => "Chassis",
            DtcType::B => "Body",
            DtcType::U => "Network",
        }
    }
}

/// Whether the code is SAE-defined or manufacturer-defined (second character).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtcCategory {
    /// Digit 0, 2 for P codes, 3 for B/C/U codes: SAE/ISO controlled.
    Generic,
    /// Digit 1, 2 for B/C/U codes: manufacturer controlled.
    ManufacturerSpecific,
    /// P3xxx: split between SAE and manufacturer ranges.
    Mixed,
}

impl DtcCategory {
    /// Category from the type and the first numeric digit (0–3).
    pub fn classify(dtc_type: DtcType, digit: u8) -> Self {
        match (dtc_type, digit) {
            (_, 0) => DtcCategory::Generic,
            (_, 1) => DtcCategory::ManufacturerSpecific,
            (DtcType::P, 2) => DtcCategory::Generic,
            (DtcType::P, _) => DtcCategory::Mixed,
            (_, 2) => DtcCategory::ManufacturerSpecific,
            _ => DtcCategory::Generic,
        }
    }
}

/// Which OBD-II service the DTC list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtcKind {
    /// Mode 03: confirmed codes.
    Stored,
    /// Mode 07: detected during the current or last drive cycle.
    Pending,
    /// Mode 0A: cannot be cleared by a scan tool.
    Permanent,
}

impl DtcKind {
    /// OBD-II request mode byte.
    pub fn mode(self) -> u8 {
        match self {
            DtcKind::Stored => 0x03,
            DtcKind::Pending => 0x07,
            DtcKind::Permanent => 0x0A,
        }
    }

    /// Positive response echo byte (mode + 0x40).
    pub fn response_sid(self) -> u8 {
        self.mode() + 0x40
    }
}

impl ParsedDtc {
    /// Parse the DTC type from a code string.
    pub fn parse_type(code: &str) -> Option<DtcType> {
        match code.chars().next() {
            Some('P' | 'p') => Some(DtcType::P),
            Some('C' | 'c') => Some(DtcType::C),
            Some('B' | 'b') => Some(DtcType::B),
            Some('U' | 'u') => Some(DtcType::U),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtc_type_from_bits() {
        assert_eq!(DtcType::from_high_bits(0), DtcType::P);
        assert_eq!(DtcType::from_high_bits(1), DtcType::C);
        assert_eq!(DtcType::from_high_bits(2), DtcType::B);
        assert_eq!(DtcType::from_high_bits(3), DtcType::U);
    }

    #[test]
    fn dtc_type_parsing() {
        assert_eq!(ParsedDtc::parse_type("P0300"), Some(DtcType::P));
        assert_eq!(ParsedDtc::parse_type("c0035"), Some(DtcType::C));
        assert_eq!(ParsedDtc::parse_type("U0100"), Some(DtcType::U));
        assert_eq!(ParsedDtc::parse_type("X0100"), None);
    }

    #[test]
    fn category_rules() {
        assert_eq!(DtcCategory::classify(DtcType::P, 0), DtcCategory::Generic);
        assert_eq!(
            DtcCategory::classify(DtcType::P, 1),
            DtcCategory::ManufacturerSpecific
        );
        assert_eq!(DtcCategory::classify(DtcType::P, 2), DtcCategory::Generic);
        assert_eq!(DtcCategory::classify(DtcType::P, 3), DtcCategory::Mixed);
        assert_eq!(
            DtcCategory::classify(DtcType::U, 2),
            DtcCategory::ManufacturerSpecific
        );
        assert_eq!(DtcCategory::classify(DtcType::U, 3), DtcCategory::Generic);
    }

    #[test]
    fn kind_mode_bytes() {
        assert_eq!(DtcKind::Stored.response_sid(), 0x43);
        assert_eq!(DtcKind::Pending.response_sid(), 0x47);
        assert_eq!(DtcKind::Permanent.response_sid(), 0x4A);
    }

    #[test]
    fn dtc_serializes_type_letter() {
        let dtc = ParsedDtc {
            code: "P0300".into(),
            description: "Random/Multiple Cylinder Misfire Detected".into(),
            dtc_type: DtcType::P,
            category: DtcCategory::Generic,
        };
        let json = serde_json::to_value(&dtc).unwrap();
        assert_eq!(json["type"], "P");
        assert_eq!(json["category"], "generic");
    }
}
