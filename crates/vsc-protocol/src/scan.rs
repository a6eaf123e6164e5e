use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dtc::ParsedDtc;
use crate::ecu::PerEcu;
use crate::odometer::{OdometerReading, OdometerSource};
use crate::status::{FuelSystemStatus, MilStatus, SecondaryAirStatus};
use crate::vin::ParsedVin;

/// Marker rendered for fields the vehicle did not provide.
pub const UNAVAILABLE: &str = "N/A";

/// Scan orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Idle,
    Initializing,
    ReadingVin,
    ReadingMil,
    ReadingDtcs,
    ReadingDistance,
    ReadingTime,
    ReadingWarmups,
    ReadingMilDistance,
    ReadingFuelAirStatus,
    ReadingOdometer,
    Complete,
    Failed,
    Cancelled,
}

/// Progress notification emitted at the start of every scan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub stage: ScanStage,
    /// 0.0 – 1.0.
    pub fraction: f32,
    pub message: String,
}

/// Aggregate snapshot of one scan.
///
/// Every optional field is `None` when the read was unavailable; the scan
/// continues past such fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: ScanStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub vin: ParsedVin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    pub mil: Option<PerEcu<MilStatus>>,
    pub stored_dtcs: Option<Vec<ParsedDtc>>,
    pub pending_dtcs: Option<Vec<ParsedDtc>>,
    pub permanent_dtcs: Option<Vec<ParsedDtc>>,
    pub distance_since_cleared_km: Option<u32>,
    pub time_since_cleared_min: Option<u32>,
    pub warmups_since_cleared: Option<u8>,
    pub mil_distance_km: Option<u32>,
    pub mil_time_min: Option<u32>,
    pub fuel_system: Option<PerEcu<FuelSystemStatus>>,
    pub secondary_air: Option<PerEcu<SecondaryAirStatus>>,
    pub odometer: Option<OdometerReading>,
}

impl ScanResult {
    /// Empty result at the start of a scan.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            scan_id: Uuid::now_v7(),
            device_id: device_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            stage: ScanStage::Idle,
            adapter_version: None,
            protocol: None,
            vin: ParsedVin::invalid("not read"),
            manufacturer: None,
            mil: None,
            stored_dtcs: None,
            pending_dtcs: None,
            permanent_dtcs: None,
            distance_since_cleared_km: None,
            time_since_cleared_min: None,
            warmups_since_cleared: None,
            mil_distance_km: None,
            mil_time_min: None,
            fuel_system: None,
            secondary_air: None,
            odometer: None,
        }
    }

    /// Stamp the terminal stage and finish time.
    pub fn finish(&mut self, stage: ScanStage) {
        self.stage = stage;
        self.finished_at = Some(Utc::now());
    }

    /// Total of stored + pending + permanent codes that were readable.
    pub fn total_dtcs(&self) -> usize {
        [&self.stored_dtcs, &self.pending_dtcs, &self.permanent_dtcs]
            .iter()
            .filter_map(|l| l.as_ref().map(Vec::len))
            .sum()
    }

    /// Human-readable report; unavailable fields render as "N/A".
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let vin = if self.vin.valid {
            self.vin.vin.clone()
        } else {
            UNAVAILABLE.to_string()
        };
        lines.push(format!("VIN: {vin}"));
        lines.push(format!(
            "Protocol: {}",
            self.protocol.as_deref().unwrap_or(UNAVAILABLE)
        ));

        let mil = match &self.mil {
            Some(m) => format!(
                "{} ({} DTC(s) reported by {})",
                if m.value.mil_on { "ON" } else { "OFF" },
                m.value.dtc_count,
                m.ecu
            ),
            None => UNAVAILABLE.to_string(),
        };
        lines.push(format!("MIL: {mil}"));

        for (label, list) in [
            ("Stored DTCs", &self.stored_dtcs),
            ("Pending DTCs", &self.pending_dtcs),
            ("Permanent DTCs", &self.permanent_dtcs),
        ] {
            let text = match list {
                Some(l) if l.is_empty() => "none".to_string(),
                Some(l) => l
                    .iter()
                    .map(|d| d.code.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                None => UNAVAILABLE.to_string(),
            };
            lines.push(format!("{label}: {text}"));
        }

        lines.push(format!(
            "Distance since cleared: {}",
            fmt_opt(self.distance_since_cleared_km, "km")
        ));
        lines.push(format!(
            "Time since cleared: {}",
            fmt_opt(self.time_since_cleared_min, "min")
        ));
        lines.push(format!(
            "Warm-ups since cleared: {}",
            fmt_opt(self.warmups_since_cleared, "")
        ));
        lines.push(format!(
            "Distance with MIL on: {}",
            fmt_opt(self.mil_distance_km, "km")
        ));

        let odometer = match &self.odometer {
            Some(o) => {
                let via = match &o.source {
                    OdometerSource::StandardPid => "PID A6".to_string(),
                    OdometerSource::ManufacturerDid { did, .. } => format!("DID {did:04X}"),
                };
                format!("{:.1} km ({via} from {})", o.km, o.ecu)
            }
            None => UNAVAILABLE.to_string(),
        };
        lines.push(format!("Odometer: {odometer}"));

        lines.join("\n")
    }
}

fn fmt_opt<T: std::fmt::Display>(value: Option<T>, unit: &str) -> String {
    match value {
        Some(v) if unit.is_empty() => v.to_string(),
        Some(v) => format!("{v} {unit}"),
        None => UNAVAILABLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_result_has_nothing_read() {
        let result = ScanResult::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(result.stage, ScanStage::Idle);
        assert!(!result.vin.valid);
        assert_eq!(result.total_dtcs(), 0);
        assert!(result.finished_at.is_none());
    }

    #[test]
    fn summary_marks_unavailable_fields() {
        let mut result = ScanResult::new("dev");
        result.stored_dtcs = Some(Vec::new());
        result.distance_since_cleared_km = Some(1520);
        let summary = result.summary();
        assert!(summary.contains("VIN: N/A"));
        assert!(summary.contains("Stored DTCs: none"));
        assert!(summary.contains("Pending DTCs: N/A"));
        assert!(summary.contains("Distance since cleared: 1520 km"));
        assert!(summary.contains("Odometer: N/A"));
    }

    #[test]
    fn finish_stamps_time() {
        let mut result = ScanResult::new("dev");
        result.finish(ScanStage::Complete);
        assert_eq!(result.stage, ScanStage::Complete);
        assert!(result.finished_at.is_some());
    }

    #[test]
    fn result_roundtrip() {
        let mut result = ScanResult::new("dev");
        result.vin = ParsedVin::from_chars("1FAHP0CD55L047824".into());
        let json = serde_json::to_string(&result).unwrap();
        let back: ScanResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.vin.vin, "1FAHP0CD55L047824");
        assert_eq!(back.scan_id, result.scan_id);
    }
}
