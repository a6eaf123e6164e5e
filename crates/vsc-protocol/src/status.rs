use serde::{Deserialize, Serialize};

/// Mode 01 PID 01: monitor status since DTCs cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilStatus {
    /// Malfunction Indicator Lamp commanded on (bit 7 of byte A).
    pub mil_on: bool,
    /// Number of confirmed emissions-related DTCs (low 7 bits of byte A).
    pub dtc_count: u8,
    /// Engine type advertised in byte B bit 3.
    pub ignition: IgnitionType,
    /// Readiness monitors the ECU reports as supported.
    pub monitors: Vec<MonitorState>,
}

impl MilStatus {
    /// Monitors that are supported but have not completed.
    pub fn incomplete_monitors(&self) -> impl Iterator<Item = &MonitorState> {
        self.monitors.iter().filter(|m| !m.complete)
    }

    /// Emissions-ready when every supported monitor has completed.
    pub fn ready(&self) -> bool {
        self.monitors.iter().all(|m| m.complete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnitionType {
    Spark,
    Compression,
}

/// Emissions readiness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    // Continuous (byte B).
    Misfire,
    FuelSystem,
    Components,
    // Spark ignition (bytes C/D).
    Catalyst,
    HeatedCatalyst,
    EvaporativeSystem,
    SecondaryAirSystem,
    AcRefrigerant,
    OxygenSensor,
    OxygenSensorHeater,
    EgrSystem,
    // Compression ignition (bytes C/D).
    NmhcCatalyst,
    NoxScrMonitor,
    BoostPressure,
    ExhaustGasSensor,
    PmFilter,
    EgrVvtSystem,
}

/// A supported monitor and whether its test has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    pub monitor: Monitor,
    pub complete: bool,
}

/// Mode 01 PID 03 loop status for one fuel system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelLoopStatus {
    /// Open loop due to insufficient engine temperature.
    OpenLoopCold,
    /// Closed loop, using oxygen sensor feedback.
    ClosedLoop,
    /// Open loop due to engine load or fuel cut.
    OpenLoopLoad,
    /// Open loop due to system failure.
    OpenLoopFailure,
    /// Closed loop with a fault in at least one feedback sensor.
    ClosedLoopFault,
    Unknown(u8),
}

impl FuelLoopStatus {
    /// Decode one status byte; `0` means the system is not present.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => None,
            0x01 => Some(FuelLoopStatus::OpenLoopCold),
            0x02 => Some(FuelLoopStatus::ClosedLoop),
            0x04 => Some(FuelLoopStatus::OpenLoopLoad),
            0x08 => Some(FuelLoopStatus::OpenLoopFailure),
            0x10 => Some(FuelLoopStatus::ClosedLoopFault),
            other => Some(FuelLoopStatus::Unknown(other)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FuelLoopStatus::OpenLoopCold => "open loop (engine cold)",
            FuelLoopStatus::ClosedLoop => "closed loop",
            FuelLoopStatus::OpenLoopLoad => "open loop (load/decel)",
            FuelLoopStatus::OpenLoopFailure => "open loop (system failure)",
            FuelLoopStatus::ClosedLoopFault => "closed loop (feedback fault)",
            FuelLoopStatus::Unknown(_) => "unknown",
        }
    }
}

/// Mode 01 PID 03: status of fuel systems 1 and 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelSystemStatus {
    pub system1: Option<FuelLoopStatus>,
    pub system2: Option<FuelLoopStatus>,
}

/// Mode 01 PID 12: commanded secondary air status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryAirStatus {
    Upstream,
    DownstreamOfCatalyst,
    OutsideOrOff,
    PumpOnForDiagnostics,
    Unknown(u8),
}

impl SecondaryAirStatus {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => SecondaryAirStatus::Upstream,
            0x02 => SecondaryAirStatus::DownstreamOfCatalyst,
            0x04 => SecondaryAirStatus::OutsideOrOff,
            0x08 => SecondaryAirStatus::PumpOnForDiagnostics,
            other => SecondaryAirStatus::Unknown(other),
        }
    }
}
