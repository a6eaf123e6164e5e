//! Mode 01 PID decoders.
//!
//! Every decoder locates the `41 <PID>` echo in each responding ECU's
//! messages and decodes ECUs independently, returning the aggregate plus
//! the per-ECU map.

use std::collections::BTreeMap;

use serde::Serialize;
use vsc_protocol::{
    FuelLoopStatus, FuelSystemStatus, IgnitionType, MilStatus, Monitor, MonitorState,
    PRIMARY_ECU, PerEcu, SecondaryAirStatus,
};

use super::{find, frames, require_data};
use crate::error::DecodeError;

pub const PID_SUPPORTED_01_20: u8 = 0x00;
pub const PID_MONITOR_STATUS: u8 = 0x01;
pub const PID_FUEL_SYSTEM: u8 = 0x03;
pub const PID_SECONDARY_AIR: u8 = 0x12;
pub const PID_DISTANCE_WITH_MIL: u8 = 0x21;
pub const PID_WARMUPS_SINCE_CLEARED: u8 = 0x30;
pub const PID_DISTANCE_SINCE_CLEARED: u8 = 0x31;
pub const PID_TIME_WITH_MIL: u8 = 0x4D;
pub const PID_TIME_SINCE_CLEARED: u8 = 0x4E;
pub const PID_ODOMETER: u8 = 0xA6;

/// Positive response to Mode 01.
const MODE01_RESPONSE: u8 = 0x41;

/// Request text for a Mode 01 PID (e.g. `0101`).
pub fn pid_request(pid: u8) -> String {
    format!("01{pid:02X}")
}

/// Data bytes following `41 <pid>`, per responding ECU.
pub fn pid_data(raw: &str, pid: u8) -> Result<BTreeMap<String, Vec<u8>>, DecodeError> {
    require_data(raw)?;
    let marker = [MODE01_RESPONSE, pid];
    let data: BTreeMap<String, Vec<u8>> = frames::parse_messages(raw)
        .into_iter()
        .filter_map(|(ecu, messages)| {
            let bytes = messages.iter().find_map(|m| {
                find(m, &marker).map(|at| m[at + marker.len()..].to_vec())
            })?;
            Some((ecu, bytes))
        })
        .collect();
    if data.is_empty() {
        return Err(DecodeError::MarkerNotFound(format!("41 {pid:02X}")));
    }
    Ok(data)
}

/// Decode `pid` from every ECU with `decode`; ECUs whose data is too short
/// are dropped. Fails only when no ECU decodes.
fn per_ecu<T: Clone>(
    raw: &str,
    pid: u8,
    decode: impl Fn(&[u8]) -> Result<T, DecodeError>,
) -> Result<PerEcu<T>, DecodeError> {
    let mut last_err = None;
    let mut values = BTreeMap::new();
    for (ecu, data) in pid_data(raw, pid)? {
        match decode(&data) {
            Ok(v) => {
                values.insert(ecu, v);
            }
            Err(e) => last_err = Some(e),
        }
    }
    PerEcu::from_map(values, PRIMARY_ECU)
        .ok_or_else(|| last_err.unwrap_or(DecodeError::TooShort { need: 1, got: 0 }))
}

fn need(data: &[u8], n: usize) -> Result<(), DecodeError> {
    if data.len() < n {
        return Err(DecodeError::TooShort {
            need: n,
            got: data.len(),
        });
    }
    Ok(())
}

fn word(data: &[u8]) -> Result<u32, DecodeError> {
    need(data, 2)?;
    Ok((u32::from(data[0]) << 8) | u32::from(data[1]))
}

// ── PID 00: supported PIDs ────────────────────────────────────

/// PIDs 0x01–0x20 flagged as supported in a PID 00 bitmap.
pub fn supported_from_bitmap(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    need(data, 4)?;
    let bits = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    Ok((0..32u8)
        .filter(|i| bits & (0x8000_0000 >> i) != 0)
        .map(|i| i + 1)
        .collect())
}

/// Union of the PIDs every ECU advertises in its PID 00 response.
pub fn decode_supported(raw: &str) -> Result<Vec<u8>, DecodeError> {
    let per = per_ecu(raw, PID_SUPPORTED_01_20, supported_from_bitmap)?;
    let mut all: Vec<u8> = per.by_ecu.into_values().flatten().collect();
    all.sort_unstable();
    all.dedup();
    Ok(all)
}

// ── PID 01: MIL and readiness ─────────────────────────────────

const CONTINUOUS: [Monitor; 3] = [Monitor::Misfire, Monitor::FuelSystem, Monitor::Components];

// Bit order within bytes C (available) and D (incomplete).
const SPARK: [Option<Monitor>; 8] = [
    Some(Monitor::Catalyst),
    Some(Monitor::HeatedCatalyst),
    Some(Monitor::EvaporativeSystem),
    Some(Monitor::SecondaryAirSystem),
    Some(Monitor::AcRefrigerant),
    Some(Monitor::OxygenSensor),
    Some(Monitor::OxygenSensorHeater),
    Some(Monitor::EgrSystem),
];

const COMPRESSION: [Option<Monitor>; 8] = [
    Some(Monitor::NmhcCatalyst),
    Some(Monitor::NoxScrMonitor),
    None,
    Some(Monitor::BoostPressure),
    None,
    Some(Monitor::ExhaustGasSensor),
    Some(Monitor::PmFilter),
    Some(Monitor::EgrVvtSystem),
];

/// Decode the four PID 01 data bytes.
///
/// Byte A carries the MIL (bit 7) and DTC count. Readiness comes from
/// B–D; a one-byte reply still yields MIL and count with no monitors.
pub fn mil_from_bytes(data: &[u8]) -> Result<MilStatus, DecodeError> {
    need(data, 1)?;
    let a = data[0];
    let mut status = MilStatus {
        mil_on: a & 0x80 != 0,
        dtc_count: a & 0x7F,
        ignition: IgnitionType::Spark,
        monitors: Vec::new(),
    };
    if data.len() < 4 {
        return Ok(status);
    }

    let (b, c, d) = (data[1], data[2], data[3]);
    if b & 0x08 != 0 {
        status.ignition = IgnitionType::Compression;
    }
    for (i, monitor) in CONTINUOUS.into_iter().enumerate() {
        if b & (1 << i) != 0 {
            status.monitors.push(MonitorState {
                monitor,
                complete: b & (1 << (i + 4)) == 0,
            });
        }
    }
    let table = match status.ignition {
        IgnitionType::Spark => &SPARK,
        IgnitionType::Compression => &COMPRESSION,
    };
    for (i, monitor) in table.iter().enumerate() {
        let Some(monitor) = monitor else { continue };
        if c & (1 << i) != 0 {
            status.monitors.push(MonitorState {
                monitor: *monitor,
                complete: d & (1 << i) == 0,
            });
        }
    }
    Ok(status)
}

/// Decode a `0101` response: MIL on/off, DTC count, readiness.
pub fn decode_mil(raw: &str) -> Result<PerEcu<MilStatus>, DecodeError> {
    per_ecu(raw, PID_MONITOR_STATUS, mil_from_bytes)
}

// ── Counters since codes cleared ──────────────────────────────

/// PID 31: distance travelled since codes cleared, km.
pub fn decode_distance_since_cleared(raw: &str) -> Result<PerEcu<u32>, DecodeError> {
    per_ecu(raw, PID_DISTANCE_SINCE_CLEARED, word)
}

/// PID 4E: engine run time since codes cleared, minutes.
pub fn decode_time_since_cleared(raw: &str) -> Result<PerEcu<u32>, DecodeError> {
    per_ecu(raw, PID_TIME_SINCE_CLEARED, word)
}

/// PID 30: warm-up cycles since codes cleared.
pub fn decode_warmups(raw: &str) -> Result<PerEcu<u8>, DecodeError> {
    per_ecu(raw, PID_WARMUPS_SINCE_CLEARED, |d| {
        need(d, 1)?;
        Ok(d[0])
    })
}

/// PID 21: distance travelled with the MIL on, km.
pub fn decode_mil_distance(raw: &str) -> Result<PerEcu<u32>, DecodeError> {
    per_ecu(raw, PID_DISTANCE_WITH_MIL, word)
}

/// PID 4D: engine run time with the MIL on, minutes.
pub fn decode_mil_time(raw: &str) -> Result<PerEcu<u32>, DecodeError> {
    per_ecu(raw, PID_TIME_WITH_MIL, word)
}

// ── Fuel / air ────────────────────────────────────────────────

pub fn decode_fuel_system(raw: &str) -> Result<PerEcu<FuelSystemStatus>, DecodeError> {
    per_ecu(raw, PID_FUEL_SYSTEM, |d| {
        need(d, 1)?;
        Ok(FuelSystemStatus {
            system1: FuelLoopStatus::from_byte(d[0]),
            system2: d.get(1).copied().and_then(FuelLoopStatus::from_byte),
        })
    })
}

pub fn decode_secondary_air(raw: &str) -> Result<PerEcu<SecondaryAirStatus>, DecodeError> {
    per_ecu(raw, PID_SECONDARY_AIR, |d| {
        need(d, 1)?;
        Ok(SecondaryAirStatus::from_byte(d[0]))
    })
}

// ── PID A6: odometer ──────────────────────────────────────────

/// PID A6: odometer in km (4 bytes, 0.1 km per unit).
pub fn decode_odometer_pid(raw: &str) -> Result<PerEcu<f64>, DecodeError> {
    per_ecu(raw, PID_ODOMETER, |d| {
        need(d, 4)?;
        let units = u32::from_be_bytes([d[0], d[1], d[2], d[3]]);
        Ok(f64::from(units) / 10.0)
    })
}

// ── Live data ─────────────────────────────────────────────────

/// Decoded PID value with metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PidValue {
    pub pid: u8,
    pub name: &'static str,
    pub value: f64,
    pub unit: &'static str,
}

struct PidSpec {
    name: &'static str,
    unit: &'static str,
    bytes: usize,
    formula: fn(&[u8]) -> f64,
}

const fn spec(
    name: &'static str,
    unit: &'static str,
    bytes: usize,
    formula: fn(&[u8]) -> f64,
) -> Option<PidSpec> {
    Some(PidSpec {
        name,
        unit,
        bytes,
        formula,
    })
}

fn pid_spec(pid: u8) -> Option<PidSpec> {
    match pid {
        0x04 => spec("Engine Load", "%", 1, |d| f64::from(d[0]) * 100.0 / 255.0),
        0x05 => spec("Coolant Temperature", "°C", 1, |d| f64::from(d[0]) - 40.0),
        0x06 => spec("Short Term Fuel Trim B1", "%", 1, |d| {
            (f64::from(d[0]) - 128.0) * 100.0 / 128.0
        }),
        0x07 => spec("Long Term Fuel Trim B1", "%", 1, |d| {
            (f64::from(d[0]) - 128.0) * 100.0 / 128.0
        }),
        0x0B => spec("Intake MAP", "kPa", 1, |d| f64::from(d[0])),
        0x0C => spec("Engine RPM", "rpm", 2, |d| {
            (f64::from(d[0]) * 256.0 + f64::from(d[1])) / 4.0
        }),
        0x0D => spec("Vehicle Speed", "km/h", 1, |d| f64::from(d[0])),
        0x0E => spec("Timing Advance", "°", 1, |d| f64::from(d[0]) / 2.0 - 64.0),
        0x0F => spec("Intake Air Temp", "°C", 1, |d| f64::from(d[0]) - 40.0),
        0x10 => spec("MAF Rate", "g/s", 2, |d| {
            (f64::from(d[0]) * 256.0 + f64::from(d[1])) / 100.0
        }),
        0x11 => spec("Throttle Position", "%", 1, |d| f64::from(d[0]) * 100.0 / 255.0),
        0x1F => spec("Run Time Since Start", "s", 2, |d| {
            f64::from(d[0]) * 256.0 + f64::from(d[1])
        }),
        0x21 => spec("Distance With MIL On", "km", 2, |d| {
            f64::from(d[0]) * 256.0 + f64::from(d[1])
        }),
        0x2F => spec("Fuel Level", "%", 1, |d| f64::from(d[0]) * 100.0 / 255.0),
        0x30 => spec("Warm-ups Since Codes Cleared", "", 1, |d| f64::from(d[0])),
        0x31 => spec("Distance Since Codes Cleared", "km", 2, |d| {
            f64::from(d[0]) * 256.0 + f64::from(d[1])
        }),
        0x33 => spec("Barometric Pressure", "kPa", 1, |d| f64::from(d[0])),
        0x42 => spec("Control Module Voltage", "V", 2, |d| {
            (f64::from(d[0]) * 256.0 + f64::from(d[1])) / 1000.0
        }),
        0x46 => spec("Ambient Air Temp", "°C", 1, |d| f64::from(d[0]) - 40.0),
        0x4D => spec("Time With MIL On", "min", 2, |d| {
            f64::from(d[0]) * 256.0 + f64::from(d[1])
        }),
        0x4E => spec("Time Since Codes Cleared", "min", 2, |d| {
            f64::from(d[0]) * 256.0 + f64::from(d[1])
        }),
        0x5C => spec("Engine Oil Temp", "°C", 1, |d| f64::from(d[0]) - 40.0),
        0xA6 => spec("Odometer", "km", 4, |d| {
            f64::from(u32::from_be_bytes([d[0], d[1], d[2], d[3]])) / 10.0
        }),
        _ => None,
    }
}

/// Decode a PID value from the raw data bytes (after SID and PID echo).
pub fn decode_pid_value(pid: u8, data: &[u8]) -> Result<PidValue, DecodeError> {
    let spec = pid_spec(pid).ok_or_else(|| DecodeError::MarkerNotFound(format!("PID {pid:02X}")))?;
    need(data, spec.bytes)?;
    Ok(PidValue {
        pid,
        name: spec.name,
        value: (spec.formula)(data),
        unit: spec.unit,
    })
}

/// Decode a Mode 01 live-data response for `pid`.
pub fn read_pid(raw: &str, pid: u8) -> Result<PerEcu<PidValue>, DecodeError> {
    if pid_spec(pid).is_none() {
        return Err(DecodeError::MarkerNotFound(format!("PID {pid:02X}")));
    }
    per_ecu(raw, pid, |d| decode_pid_value(pid, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mil_on_with_three_codes() {
        let mil = decode_mil("7E8 06 41 01 83 00 00 00 >").unwrap();
        assert!(mil.value.mil_on);
        assert_eq!(mil.value.dtc_count, 3);
        assert_eq!(mil.ecu, "7E8");
        assert!(mil.value.monitors.is_empty());
    }

    #[test]
    fn mil_off_headerless() {
        let mil = decode_mil("41 01 00 07 65 00\r>").unwrap();
        assert!(!mil.value.mil_on);
        assert_eq!(mil.value.dtc_count, 0);
        assert_eq!(mil.ecu, vsc_protocol::UNKNOWN_ECU);
    }

    #[test]
    fn readiness_monitors_spark() {
        // B=0x07: all continuous supported and complete.
        // C=0x65: catalyst, evap, O2 sensor and O2 heater supported.
        // D=0x04: evap incomplete.
        let status = mil_from_bytes(&[0x00, 0x07, 0x65, 0x04]).unwrap();
        assert_eq!(status.ignition, IgnitionType::Spark);
        let incomplete: Vec<Monitor> = status.incomplete_monitors().map(|m| m.monitor).collect();
        assert_eq!(incomplete, vec![Monitor::EvaporativeSystem]);
        assert!(status
            .monitors
            .iter()
            .any(|m| m.monitor == Monitor::Catalyst && m.complete));
        assert_eq!(status.monitors.len(), 3 + 4);
        assert!(!status.ready());
    }

    #[test]
    fn readiness_monitors_compression() {
        let status = mil_from_bytes(&[0x00, 0x0F, 0x41, 0x40]).unwrap();
        assert_eq!(status.ignition, IgnitionType::Compression);
        let names: Vec<Monitor> = status.monitors.iter().map(|m| m.monitor).collect();
        assert!(names.contains(&Monitor::NmhcCatalyst));
        assert!(names.contains(&Monitor::PmFilter));
        let pm = status
            .monitors
            .iter()
            .find(|m| m.monitor == Monitor::PmFilter)
            .unwrap();
        assert!(!pm.complete);
    }

    #[test]
    fn continuous_incomplete_bits() {
        // misfire supported, incomplete (bit 4)
        let status = mil_from_bytes(&[0x00, 0x11, 0x00, 0x00]).unwrap();
        assert_eq!(
            status.monitors,
            vec![MonitorState {
                monitor: Monitor::Misfire,
                complete: false
            }]
        );
    }

    #[test]
    fn per_ecu_mil_keeps_every_module() {
        let raw = "7E9 06 41 01 00 04 00 00\r7E8 06 41 01 81 07 65 04\r>";
        let mil = decode_mil(raw).unwrap();
        assert_eq!(mil.ecu, "7E8");
        assert_eq!(mil.ecu_count(), 2);
        assert!(mil.value.mil_on);
        assert!(!mil.by_ecu["7E9"].mil_on);
    }

    #[test]
    fn first_ecu_when_7e8_absent() {
        let raw = "7EA 06 41 01 82 00 00 00\r7E9 06 41 01 01 00 00 00\r>";
        let mil = decode_mil(raw).unwrap();
        assert_eq!(mil.ecu, "7E9");
        assert_eq!(mil.value.dtc_count, 1);
    }

    #[test]
    fn two_byte_counters() {
        let d = decode_distance_since_cleared("7E8 04 41 31 01 2C\r>").unwrap();
        assert_eq!(d.value, 300);
        let t = decode_time_since_cleared("7E8 04 41 4E 00 3C\r>").unwrap();
        assert_eq!(t.value, 60);
        let m = decode_mil_distance("7E8 04 41 21 00 0A\r>").unwrap();
        assert_eq!(m.value, 10);
        let mt = decode_mil_time("7E8 04 41 4D 00 05\r>").unwrap();
        assert_eq!(mt.value, 5);
        let w = decode_warmups("7E8 03 41 30 12\r>").unwrap();
        assert_eq!(w.value, 18);
    }

    #[test]
    fn counter_too_short() {
        assert_eq!(
            decode_distance_since_cleared("7E8 03 41 31 01\r>"),
            Err(DecodeError::TooShort { need: 2, got: 1 })
        );
    }

    #[test]
    fn fuel_and_secondary_air() {
        let fuel = decode_fuel_system("7E8 04 41 03 02 00\r>").unwrap();
        assert_eq!(fuel.value.system1, Some(FuelLoopStatus::ClosedLoop));
        assert_eq!(fuel.value.system2, None);

        let air = decode_secondary_air("7E8 03 41 12 04\r>").unwrap();
        assert_eq!(air.value, SecondaryAirStatus::OutsideOrOff);
    }

    #[test]
    fn odometer_pid_scale() {
        let odo = decode_odometer_pid("7E8 06 41 A6 00 12 D6 87\r>").unwrap();
        assert!((odo.value - 123_456.7).abs() < 1e-6);
        assert!(matches!(
            decode_odometer_pid("7E8 04 41 A6 00 12\r>"),
            Err(DecodeError::TooShort { need: 4, got: 2 })
        ));
    }

    #[test]
    fn supported_bitmap() {
        let pids = decode_supported("7E8 06 41 00 BE 3F A8 13\r>").unwrap();
        assert!(pids.contains(&0x01));
        assert!(pids.contains(&0x03));
        assert!(pids.contains(&0x20));
        assert!(!pids.contains(&0x02));
    }

    #[test]
    fn missing_echo_and_no_data() {
        assert!(matches!(
            decode_mil("7E8 03 41 0D 3C\r>"),
            Err(DecodeError::MarkerNotFound(_))
        ));
        assert_eq!(decode_mil("NO DATA\r>"), Err(DecodeError::NoData));
        assert!(matches!(
            decode_mil("CAN ERROR\r>"),
            Err(DecodeError::Adapter(_))
        ));
    }

    #[test]
    fn live_values() {
        let rpm = read_pid("7E8 04 41 0C 1A F8\r>", 0x0C).unwrap();
        assert_eq!(rpm.value.value, 1726.0);
        assert_eq!(rpm.value.unit, "rpm");

        let speed = decode_pid_value(0x0D, &[0x3C]).unwrap();
        assert_eq!(speed.value, 60.0);

        let coolant = decode_pid_value(0x05, &[0x7B]).unwrap();
        assert_eq!(coolant.value, 83.0);

        assert!(decode_pid_value(0x0C, &[0x1A]).is_err());
        assert!(read_pid("7E8 03 41 FE 00\r>", 0xFE).is_err());
    }

    #[test]
    fn request_text() {
        assert_eq!(pid_request(PID_MONITOR_STATUS), "0101");
        assert_eq!(pid_request(PID_ODOMETER), "01A6");
    }
}
