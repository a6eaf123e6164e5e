//! Static DTC description table: match-based lookup of common SAE codes.
//!
//! Codes not in the table get a generic description built from their
//! system and category.

use vsc_protocol::{DtcCategory, DtcType};

/// Look up a DTC description. Input is case-insensitive.
pub fn lookup(code: &str) -> Option<&'static str> {
    let code = code.to_uppercase();
    let description = match code.as_str() {
        // ===== Powertrain: Fuel and Air Metering =====
        "P0100" => "Mass or Volume Air Flow Circuit Malfunction",
        "P0101" => "Mass or Volume Air Flow Circuit Range/Performance",
        "P0102" => "Mass or Volume Air Flow Circuit Low Input",
        "P0103" => "Mass or Volume Air Flow Circuit High Input",
        "P0110" => "Intake Air Temperature Circuit Malfunction",
        "P0113" => "Intake Air Temperature Circuit High Input",
        "P0115" => "Engine Coolant Temperature Circuit Malfunction",
        "P0117" => "Engine Coolant Temperature Circuit Low Input",
        "P0118" => "Engine Coolant Temperature Circuit High Input",
        "P0120" => "Throttle Position Sensor Circuit Malfunction",
        "P0121" => "Throttle Position Sensor Circuit Range/Performance",
        "P0128" => "Coolant Thermostat Below Regulating Temperature",
        "P0130" => "O2 Sensor Circuit Malfunction (Bank 1, Sensor 1)",
        "P0131" => "O2 Sensor Circuit Low Voltage (Bank 1, Sensor 1)",
        "P0133" => "O2 Sensor Circuit Slow Response (Bank 1, Sensor 1)",
        "P0135" => "O2 Sensor Heater Circuit Malfunction (Bank 1, Sensor 1)",
        "P0141" => "O2 Sensor Heater Circuit Malfunction (Bank 1, Sensor 2)",
        "P0171" => "System Too Lean (Bank 1)",
        "P0172" => "System Too Rich (Bank 1)",
        "P0174" => "System Too Lean (Bank 2)",
        "P0175" => "System Too Rich (Bank 2)",
        // ===== Powertrain: Fuel Injection =====
        "P0200" => "Injector Circuit Malfunction",
        "P0201" => "Injector Circuit Malfunction - Cylinder 1",
        "P0234" => "Turbocharger Overboost Condition",
        "P0299" => "Turbocharger Underboost Condition",
        // ===== Powertrain: Ignition / Misfire =====
        "P0300" => "Random/Multiple Cylinder Misfire Detected",
        "P0301" => "Cylinder 1 Misfire Detected",
        "P0302" => "Cylinder 2 Misfire Detected",
        "P0303" => "Cylinder 3 Misfire Detected",
        "P0304" => "Cylinder 4 Misfire Detected",
        "P0305" => "Cylinder 5 Misfire Detected",
        "P0306" => "Cylinder 6 Misfire Detected",
        "P0325" => "Knock Sensor 1 Circuit Malfunction (Bank 1)",
        "P0335" => "Crankshaft Position Sensor A Circuit Malfunction",
        "P0340" => "Camshaft Position Sensor Circuit Malfunction",
        // ===== Powertrain: Emission Controls =====
        "P0401" => "Exhaust Gas Recirculation Flow Insufficient",
        "P0402" => "Exhaust Gas Recirculation Flow Excessive",
        "P0411" => "Secondary Air Injection System Incorrect Flow",
        "P0420" => "Catalyst System Efficiency Below Threshold (Bank 1)",
        "P0430" => "Catalyst System Efficiency Below Threshold (Bank 2)",
        "P0440" => "Evaporative Emission Control System Malfunction",
        "P0441" => "Evaporative Emission Control System Incorrect Purge Flow",
        "P0442" => "Evaporative Emission Control System Leak Detected (Small Leak)",
        "P0446" => "Evaporative Emission Control System Vent Control Circuit",
        "P0455" => "Evaporative Emission Control System Leak Detected (Gross Leak)",
        "P0456" => "Evaporative Emission Control System Leak Detected (Very Small Leak)",
        // ===== Powertrain: Speed / Idle Control =====
        "P0500" => "Vehicle Speed Sensor Malfunction",
        "P0505" => "Idle Control System Malfunction",
        "P0506" => "Idle Control System RPM Lower Than Expected",
        "P0507" => "Idle Control System RPM Higher Than Expected",
        "P0562" => "System Voltage Low",
        "P0563" => "System Voltage High",
        // ===== Powertrain: Computer / Transmission =====
        "P0600" => "Serial Communication Link Malfunction",
        "P0601" => "Internal Control Module Memory Check Sum Error",
        "P0606" => "Control Module Processor Fault",
        "P0700" => "Transmission Control System Malfunction",
        "P0715" => "Input/Turbine Speed Sensor Circuit Malfunction",
        "P0740" => "Torque Converter Clutch Circuit Malfunction",
        "P0750" => "Shift Solenoid A Malfunction",
        // ===== Powertrain: Diesel =====
        "P2002" => "Diesel Particulate Filter Efficiency Below Threshold (Bank 1)",
        "P2463" => "Diesel Particulate Filter Restriction - Soot Accumulation",
        // ===== Chassis =====
        "C0035" => "Left Front Wheel Speed Sensor Circuit",
        "C0040" => "Right Front Wheel Speed Sensor Circuit",
        "C0045" => "Left Rear Wheel Speed Sensor Circuit",
        "C0050" => "Right Rear Wheel Speed Sensor Circuit",
        "C0561" => "System Disabled Information Stored",
        // ===== Body =====
        "B0001" => "Driver Frontal Stage 1 Deployment Control",
        "B0100" => "Electronic Frontal Sensor 1",
        "B1000" => "ECU Malfunction",
        // ===== Network =====
        "U0001" => "High Speed CAN Communication Bus",
        "U0073" => "Control Module Communication Bus Off",
        "U0100" => "Lost Communication With ECM/PCM",
        "U0101" => "Lost Communication With TCM",
        "U0121" => "Lost Communication With Anti-Lock Brake System Control Module",
        "U0140" => "Lost Communication With Body Control Module",
        "U0155" => "Lost Communication With Instrument Panel Cluster Control Module",
        _ => return None,
    };
    Some(description)
}

/// Description for any code: the table entry, else a generic one.
pub fn describe(code: &str, dtc_type: DtcType, category: DtcCategory) -> String {
    if let Some(description) = lookup(code) {
        return description.to_string();
    }
    let kind = match category {
        DtcCategory::Generic => "generic",
        DtcCategory::ManufacturerSpecific => "manufacturer-specific",
        DtcCategory::Mixed => "generic or manufacturer-specific",
    };
    format!("{} fault ({kind})", dtc_type.system_name())
}
