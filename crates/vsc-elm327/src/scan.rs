//! Scan orchestrator: runs every read in order, reports progress, and
//! downgrades non-critical failures to unavailable fields.
//!
//! Fatal outcomes are adapter-initialization failure, a lost connection,
//! and cancellation; each returns the partial result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vsc_protocol::{DtcKind, ParsedDtc, ParsedVin, ScanProgress, ScanResult, ScanStage};

use crate::adapter::AdapterController;
use crate::codec::{self, pid};
use crate::error::{DecodeError, DiagError, ScanError};
use crate::odometer::{Manufacturer, OdometerConfig, OdometerEngine};

/// Which optional reads a scan performs.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_true")]
    pub read_permanent_dtcs: bool,
    #[serde(default = "default_true")]
    pub read_fuel_air_status: bool,
    #[serde(default = "default_true")]
    pub read_odometer: bool,
    #[serde(default)]
    pub odometer: OdometerConfig,
}

fn default_true() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            read_permanent_dtcs: true,
            read_fuel_air_status: true,
            read_odometer: true,
            odometer: OdometerConfig::default(),
        }
    }
}

/// Cooperative cancellation, checked between scan steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress fraction and message at the start of each stage.
fn stage_progress(stage: ScanStage) -> (f32, &'static str) {
    match stage {
        ScanStage::Idle => (0.0, "Waiting"),
        ScanStage::Initializing => (0.0, "Initializing adapter"),
        ScanStage::ReadingVin => (0.1, "Reading VIN"),
        ScanStage::ReadingDtcs => (0.2, "Reading trouble codes"),
        ScanStage::ReadingMil => (0.35, "Reading check-engine status"),
        ScanStage::ReadingDistance => (0.45, "Reading distance since codes cleared"),
        ScanStage::ReadingTime => (0.5, "Reading time since codes cleared"),
        ScanStage::ReadingWarmups => (0.55, "Reading warm-up cycles"),
        ScanStage::ReadingMilDistance => (0.6, "Reading distance with check-engine light on"),
        ScanStage::ReadingFuelAirStatus => (0.65, "Reading fuel and air system status"),
        ScanStage::ReadingOdometer => (0.7, "Reading odometer"),
        ScanStage::Complete => (1.0, "Scan complete"),
        ScanStage::Failed => (1.0, "Scan failed"),
        ScanStage::Cancelled => (1.0, "Scan cancelled"),
    }
}

enum Abort {
    Cancelled,
    Init(DiagError),
    Disconnected(DiagError),
}

/// Runs scans against one adapter. One scan at a time per adapter.
pub struct ScanOrchestrator {
    adapter: Arc<AdapterController>,
    odometer: OdometerEngine,
    config: ScanConfig,
    cancel: CancelFlag,
    progress: Option<mpsc::UnboundedSender<ScanProgress>>,
}

impl ScanOrchestrator {
    pub fn new(adapter: Arc<AdapterController>, config: ScanConfig) -> Self {
        Self {
            adapter,
            odometer: OdometerEngine::new(config.odometer.clone()),
            config,
            cancel: CancelFlag::new(),
            progress: None,
        }
    }

    /// Send a `ScanProgress` on `tx` at the start of every stage.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Handle that cancels the running (or next) scan.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn adapter(&self) -> &Arc<AdapterController> {
        &self.adapter
    }

    /// Run one scan against `device_id`'s adapter.
    pub async fn run(&self, device_id: &str) -> Result<ScanResult, ScanError> {
        let mut result = ScanResult::new(device_id);
        info!(scan_id = %result.scan_id, device = %device_id, "scan started");

        let outcome = self.steps(&mut result).await;
        let stage = match &outcome {
            Ok(()) => ScanStage::Complete,
            Err(Abort::Cancelled) => ScanStage::Cancelled,
            Err(_) => ScanStage::Failed,
        };
        result.finish(stage);
        self.report(stage);

        match outcome {
            Ok(()) => {
                info!(
                    scan_id = %result.scan_id,
                    vin_valid = result.vin.valid,
                    dtcs = result.total_dtcs(),
                    "scan complete"
                );
                Ok(result)
            }
            Err(Abort::Cancelled) => {
                info!(scan_id = %result.scan_id, "scan cancelled");
                Err(ScanError::Cancelled {
                    partial: Box::new(result),
                })
            }
            Err(Abort::Init(source)) => {
                warn!(scan_id = %result.scan_id, error = %source, "adapter initialization failed");
                Err(ScanError::AdapterInit {
                    source,
                    partial: Box::new(result),
                })
            }
            Err(Abort::Disconnected(source)) => {
                warn!(scan_id = %result.scan_id, error = %source, "connection lost during scan");
                Err(ScanError::Disconnected {
                    source,
                    partial: Box::new(result),
                })
            }
        }
    }

    async fn steps(&self, r: &mut ScanResult) -> Result<(), Abort> {
        self.enter(r, ScanStage::Initializing)?;
        if let Err(e) = self.adapter.initialize().await {
            return Err(if e.is_disconnect() {
                Abort::Disconnected(e)
            } else {
                Abort::Init(e)
            });
        }
        r.adapter_version = self.adapter.version();
        r.protocol = self.adapter.protocol().map(|p| p.to_string());

        self.enter(r, ScanStage::ReadingVin)?;
        r.vin = match self.adapter.send_raw(codec::VIN_REQUEST).await {
            Ok(raw) => codec::decode_vin(&raw),
            Err(e) if e.is_disconnect() => return Err(Abort::Disconnected(e)),
            Err(e) => {
                warn!(error = %e, "VIN read failed, continuing without VIN");
                ParsedVin::invalid(e.to_string())
            }
        };
        r.manufacturer = r
            .vin
            .wmi()
            .and_then(Manufacturer::from_wmi)
            .map(|m| m.name().to_string());

        self.enter(r, ScanStage::ReadingDtcs)?;
        r.stored_dtcs = self.read_dtcs(DtcKind::Stored).await?;
        r.pending_dtcs = self.read_dtcs(DtcKind::Pending).await?;
        if self.config.read_permanent_dtcs {
            r.permanent_dtcs = self.read_dtcs(DtcKind::Permanent).await?;
        }

        self.enter(r, ScanStage::ReadingMil)?;
        r.mil = self
            .read(pid::PID_MONITOR_STATUS, pid::decode_mil)
            .await?;

        self.enter(r, ScanStage::ReadingDistance)?;
        r.distance_since_cleared_km = self
            .read(pid::PID_DISTANCE_SINCE_CLEARED, |raw| {
                pid::decode_distance_since_cleared(raw).map(|p| p.value)
            })
            .await?;

        self.enter(r, ScanStage::ReadingTime)?;
        r.time_since_cleared_min = self
            .read(pid::PID_TIME_SINCE_CLEARED, |raw| {
                pid::decode_time_since_cleared(raw).map(|p| p.value)
            })
            .await?;

        self.enter(r, ScanStage::ReadingWarmups)?;
        r.warmups_since_cleared = self
            .read(pid::PID_WARMUPS_SINCE_CLEARED, |raw| {
                pid::decode_warmups(raw).map(|p| p.value)
            })
            .await?;

        self.enter(r, ScanStage::ReadingMilDistance)?;
        r.mil_distance_km = self
            .read(pid::PID_DISTANCE_WITH_MIL, |raw| {
                pid::decode_mil_distance(raw).map(|p| p.value)
            })
            .await?;
        r.mil_time_min = self
            .read(pid::PID_TIME_WITH_MIL, |raw| {
                pid::decode_mil_time(raw).map(|p| p.value)
            })
            .await?;

        if self.config.read_fuel_air_status {
            self.enter(r, ScanStage::ReadingFuelAirStatus)?;
            r.fuel_system = self
                .read(pid::PID_FUEL_SYSTEM, pid::decode_fuel_system)
                .await?;
            r.secondary_air = self
                .read(pid::PID_SECONDARY_AIR, pid::decode_secondary_air)
                .await?;
        }

        if self.config.read_odometer {
            self.enter(r, ScanStage::ReadingOdometer)?;
            r.odometer = match self.odometer.read(&self.adapter, &r.vin).await {
                Ok(reading) => Some(reading),
                Err(e) if e.is_disconnect() => return Err(Abort::Disconnected(e)),
                Err(e) => {
                    info!(reason = %e, "odometer unavailable");
                    None
                }
            };
        }

        // a cancel requested during the last read still wins
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        Ok(())
    }

    /// Check for cancellation, then move to `stage` and report it.
    fn enter(&self, r: &mut ScanResult, stage: ScanStage) -> Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        r.stage = stage;
        self.report(stage);
        Ok(())
    }

    fn report(&self, stage: ScanStage) {
        let (fraction, message) = stage_progress(stage);
        info!(stage = ?stage, fraction, "{message}");
        if let Some(tx) = &self.progress {
            let _ = tx.send(ScanProgress {
                stage,
                fraction,
                message: message.to_string(),
            });
        }
    }

    /// One Mode 01 read. Anything but a lost connection yields `None`.
    async fn read<T>(
        &self,
        pid: u8,
        decode: impl FnOnce(&str) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, Abort> {
        let command = pid::pid_request(pid);
        let raw = match self.adapter.send_raw(&command).await {
            Ok(raw) => raw,
            Err(e) if e.is_disconnect() => return Err(Abort::Disconnected(e)),
            Err(e) => {
                warn!(command = %command, error = %e, "read failed, marking unavailable");
                return Ok(None);
            }
        };
        match decode(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(command = %command, reason = %e, "unavailable");
                Ok(None)
            }
        }
    }

    /// Stored and pending lists treat `NO DATA` as "no codes"; the permanent
    /// list treats it as unsupported.
    async fn read_dtcs(&self, kind: DtcKind) -> Result<Option<Vec<ParsedDtc>>, Abort> {
        let command = codec::dtc_request(kind);
        let raw = match self.adapter.send_raw(&command).await {
            Ok(raw) => raw,
            Err(e) if e.is_disconnect() => return Err(Abort::Disconnected(e)),
            Err(e) => {
                warn!(command = %command, error = %e, "DTC read failed, marking unavailable");
                return Ok(None);
            }
        };
        match codec::decode_dtcs(&raw, kind) {
            Ok(dtcs) => {
                debug!(kind = ?kind, count = dtcs.len(), "DTCs");
                Ok(Some(dtcs))
            }
            Err(DecodeError::NoData) if kind != DtcKind::Permanent => Ok(Some(Vec::new())),
            Err(e) => {
                debug!(kind = ?kind, reason = %e, "DTC list unavailable");
                Ok(None)
            }
        }
    }
}
