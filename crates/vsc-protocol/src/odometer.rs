use serde::{Deserialize, Serialize};

/// Odometer value recovered from the vehicle, in kilometres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdometerReading {
    pub km: f64,
    /// Response id of the ECU that answered (e.g., "7E8", "77E").
    pub ecu: String,
    pub source: OdometerSource,
}

/// How the odometer value was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OdometerSource {
    /// Mode 01 PID A6.
    StandardPid,
    /// UDS ReadDataByIdentifier against a manufacturer DID.
    ManufacturerDid {
        did: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        manufacturer: Option<String>,
    },
}

impl OdometerReading {
    pub fn miles(&self) -> f64 {
        self.km * 0.621_371
    }
}
