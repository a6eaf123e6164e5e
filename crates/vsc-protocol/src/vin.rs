use serde::{Deserialize, Serialize};

/// Number of characters in a complete VIN.
pub const VIN_LENGTH: usize = 17;

/// Vehicle Identification Number recovered from a Mode 09 / PID 02 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedVin {
    /// Recovered characters (uppercase alphanumerics, may be short when invalid).
    pub vin: String,
    /// True iff exactly 17 characters were recovered.
    pub valid: bool,
    /// Why the VIN is invalid, if it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParsedVin {
    /// Build from recovered characters; validity is decided by length alone.
    pub fn from_chars(vin: String) -> Self {
        if vin.len() == VIN_LENGTH {
            Self {
                vin,
                valid: true,
                error: None,
            }
        } else {
            let error = format!("recovered {} of {VIN_LENGTH} characters", vin.len());
            Self {
                vin,
                valid: false,
                error: Some(error),
            }
        }
    }

    /// Marker used when the VIN could not be read at all.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            vin: String::new(),
            valid: false,
            error: Some(reason.into()),
        }
    }

    /// World Manufacturer Identifier (first three characters), valid VINs only.
    pub fn wmi(&self) -> Option<&str> {
        if self.valid { self.vin.get(..3) } else { None }
    }

    /// Model year character (position 10), valid VINs only.
    pub fn model_year_code(&self) -> Option<char> {
        if self.valid {
            self.vin.chars().nth(9)
        } else {
            None
        }
    }
}
