use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Response id of the primary engine controller on 11-bit CAN.
pub const PRIMARY_ECU: &str = "7E8";

/// Key used when the adapter returned data without CAN headers.
pub const UNKNOWN_ECU: &str = "000";

/// Responding-ECU id (e.g., "7E8") → that ECU's payload bytes for one request.
///
/// Built fresh per request; ordered by id so iteration is deterministic.
pub type EcuResponseMap = BTreeMap<String, Vec<u8>>;

/// A value decoded independently from every responding ECU, plus the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerEcu<T> {
    /// The aggregate value (preferred ECU, else the first that decoded).
    pub value: T,
    /// Which ECU the aggregate came from.
    pub ecu: String,
    /// Every ECU that produced a decodable value.
    pub by_ecu: BTreeMap<String, T>,
}

impl<T: Clone> PerEcu<T> {
    /// Pick the aggregate from `by_ecu`, preferring `preferred` when present.
    ///
    /// Returns `None` when no ECU decoded a value.
    pub fn from_map(by_ecu: BTreeMap<String, T>, preferred: &str) -> Option<Self> {
        let (ecu, value) = match by_ecu.get(preferred) {
            Some(v) => (preferred.to_string(), v.clone()),
            None => {
                let (id, v) = by_ecu.iter().next()?;
                (id.clone(), v.clone())
            }
        };
        Some(Self { value, ecu, by_ecu })
    }

    /// Number of ECUs that answered with a decodable value.
    pub fn ecu_count(&self) -> usize {
        self.by_ecu.len()
    }
}
