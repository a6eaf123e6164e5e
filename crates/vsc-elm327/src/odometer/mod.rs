//! Odometer discovery: standard PID A6 first, then a bounded search over
//! manufacturer UDS DIDs behind physical ECU addressing.
//!
//! The search mutates the adapter's header and receive filter; every exit
//! path (success, exhaustion, error, budget timeout) restores functional
//! addressing before returning.

pub mod did_table;
pub mod manufacturer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};
use vsc_protocol::{OdometerReading, OdometerSource, ParsedVin, UNKNOWN_ECU};

use crate::adapter::AdapterController;
use crate::codec::frames;
use crate::codec::pid::{self, PID_ODOMETER};
use crate::codec::{find, require_data};
use crate::error::{DecodeError, DiagError, DiagResult};
use crate::uds::{self, SID_READ_DATA_BY_ID};

pub use did_table::{DidSpec, EcuAddress, candidate_dids, ecu_order};
pub use manufacturer::{DidFamily, Manufacturer};

/// Odometer discovery settings, loadable from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct OdometerConfig {
    /// Wall-clock budget for the whole discovery.
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
    /// DID reads allowed across all ECUs.
    #[serde(default = "default_max_did_attempts")]
    pub max_did_attempts: usize,
    /// Smallest plausible odometer value, km. Zero is always rejected.
    #[serde(default = "default_min_km")]
    pub min_km: f64,
    /// Largest plausible odometer value, km.
    #[serde(default = "default_max_km")]
    pub max_km: f64,
}

fn default_budget_ms() -> u64 {
    60_000
}

fn default_max_did_attempts() -> usize {
    24
}

fn default_min_km() -> f64 {
    1.0
}

fn default_max_km() -> f64 {
    2_000_000.0
}

impl Default for OdometerConfig {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            max_did_attempts: default_max_did_attempts(),
            min_km: default_min_km(),
            max_km: default_max_km(),
        }
    }
}

impl OdometerConfig {
    pub fn is_plausible(&self, km: f64) -> bool {
        km > 0.0 && km >= self.min_km && km <= self.max_km
    }
}

/// A decoded DID value and the ECU whose response carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidValue {
    pub ecu: String,
    pub value: u32,
}

/// Decode a ReadDataByIdentifier response for `did` addressed to `ecu`.
///
/// The addressed response id is preferred. If another ECU answered instead
/// (receive filter not honoured) its id is reported, never `ecu`.
/// Headerless text is attributed to `ecu`. Negative responses are errors.
/// The value width is the number of bytes actually received.
pub fn decode_did(raw: &str, ecu: &str, did: u16) -> Result<DidValue, DecodeError> {
    require_data(raw)?;
    let echo = did.to_be_bytes();
    let messages = frames::parse_messages(raw);
    let structured = match frames::select_ecu(&messages, ecu, |m| !m.is_empty()) {
        Some((id, msgs)) => uds::evaluate(msgs, SID_READ_DATA_BY_ID, &echo).map(|d| (id, d)),
        None => Err(DecodeError::NoData),
    };
    let (responder, data) = match structured {
        Ok((id, data)) if id == UNKNOWN_ECU => (ecu.to_string(), data),
        Ok((id, data)) => (id.to_string(), data),
        Err(e @ DecodeError::Negative { .. }) => return Err(e),
        Err(e) => {
            let flat = frames::flat_bytes(raw);
            let marker = [SID_READ_DATA_BY_ID + uds::POSITIVE_OFFSET, echo[0], echo[1]];
            // only unambiguous when at most one ECU is in the text
            let single = messages.keys().filter(|k| *k != UNKNOWN_ECU).count() <= 1;
            let owner = messages
                .keys()
                .find(|k| *k != UNKNOWN_ECU)
                .cloned()
                .unwrap_or_else(|| ecu.to_string());
            match find(&flat, &marker) {
                Some(at) if single => (owner, flat[at + marker.len()..].to_vec()),
                _ => return Err(e),
            }
        }
    };
    let value = uds::decode_dynamic(&data).ok_or(DecodeError::TooShort {
        need: 2,
        got: data.len(),
    })?;
    Ok(DidValue {
        ecu: responder,
        value,
    })
}

// ── Engine ───────────────────────────────────────────────────

pub struct OdometerEngine {
    config: OdometerConfig,
}

impl OdometerEngine {
    pub fn new(config: OdometerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OdometerConfig {
        &self.config
    }

    /// Find the odometer. `NotSupported` when nothing plausible answered or
    /// the budget ran out; only a lost connection is otherwise an error.
    pub async fn read(
        &self,
        adapter: &AdapterController,
        vin: &ParsedVin,
    ) -> DiagResult<OdometerReading> {
        let budget = Duration::from_millis(self.config.budget_ms);
        let in_session = AtomicBool::new(false);
        match tokio::time::timeout(budget, self.discover(adapter, vin, &in_session)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(budget_ms = self.config.budget_ms, "odometer search exceeded its budget");
                if in_session.load(Ordering::SeqCst) {
                    best_effort(adapter, uds::DEFAULT_SESSION).await;
                }
                restore_addressing(adapter).await;
                Err(DiagError::NotSupported("odometer search timed out".into()))
            }
        }
    }

    async fn discover(
        &self,
        adapter: &AdapterController,
        vin: &ParsedVin,
        in_session: &AtomicBool,
    ) -> DiagResult<OdometerReading> {
        if let Some(reading) = self.standard_pid(adapter).await? {
            return Ok(reading);
        }

        let manufacturer = vin.wmi().and_then(Manufacturer::from_wmi);
        let family = manufacturer.map(Manufacturer::family);
        let discovered = probe(adapter).await?;
        let order = ecu_order(family, &discovered);
        let dids = candidate_dids(family);
        info!(
            manufacturer = ?manufacturer,
            ecus = order.len(),
            dids = dids.len(),
            "searching manufacturer DIDs"
        );

        let result = self
            .search(adapter, &order, &dids, manufacturer, in_session)
            .await;
        restore_addressing(adapter).await;
        result
    }

    async fn standard_pid(&self, adapter: &AdapterController) -> DiagResult<Option<OdometerReading>> {
        let raw = match adapter.send_raw(&pid::pid_request(PID_ODOMETER)).await {
            Ok(raw) => raw,
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => {
                debug!(error = %e, "PID A6 request failed");
                return Ok(None);
            }
        };
        let per = match pid::decode_odometer_pid(&raw) {
            Ok(per) => per,
            Err(e) => {
                debug!(error = %e, "PID A6 not supported");
                return Ok(None);
            }
        };
        let found = std::iter::once((per.ecu.clone(), per.value))
            .chain(per.by_ecu.into_iter())
            .find(|(_, km)| self.config.is_plausible(*km));
        match found {
            Some((ecu, km)) => {
                info!(km, ecu = %ecu, "odometer from PID A6");
                Ok(Some(OdometerReading {
                    km,
                    ecu,
                    source: OdometerSource::StandardPid,
                }))
            }
            None => {
                debug!(km = per.value, "PID A6 value implausible");
                Ok(None)
            }
        }
    }

    async fn search(
        &self,
        adapter: &AdapterController,
        order: &[EcuAddress],
        dids: &[DidSpec],
        manufacturer: Option<Manufacturer>,
        in_session: &AtomicBool,
    ) -> DiagResult<OdometerReading> {
        let mut attempts = 0usize;
        for ecu in order {
            if attempts >= self.config.max_did_attempts {
                break;
            }
            if !address(adapter, ecu, in_session).await? {
                debug!(ecu = %ecu.request, "could not set header, skipping ECU");
                continue;
            }
            let found = self
                .read_dids(adapter, ecu, dids, manufacturer, &mut attempts)
                .await;
            if ecu.extended_session {
                best_effort(adapter, uds::DEFAULT_SESSION).await;
                in_session.store(false, Ordering::SeqCst);
            }
            if let Some(reading) = found? {
                return Ok(reading);
            }
        }
        debug!(attempts, "no odometer DID answered");
        Err(DiagError::NotSupported(format!(
            "no plausible odometer DID after {attempts} attempts"
        )))
    }

    async fn read_dids(
        &self,
        adapter: &AdapterController,
        ecu: &EcuAddress,
        dids: &[DidSpec],
        manufacturer: Option<Manufacturer>,
        attempts: &mut usize,
    ) -> DiagResult<Option<OdometerReading>> {
        for spec in dids {
            if *attempts >= self.config.max_did_attempts {
                debug!(attempts = *attempts, "DID attempt cap reached");
                break;
            }
            *attempts += 1;

            let raw = match adapter.send_raw(&uds::read_did(spec.did)).await {
                Ok(raw) => raw,
                Err(e) if e.is_disconnect() => return Err(e),
                Err(e) => {
                    debug!(ecu = %ecu.response, did = %format!("{:04X}", spec.did), error = %e, "DID read failed");
                    continue;
                }
            };
            let decoded = decode_did(&raw, &ecu.response, spec.did);
            let DidValue { ecu: responder, value } = match decoded {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!(ecu = %ecu.response, did = %format!("{:04X}", spec.did), error = %e, "DID rejected");
                    continue;
                }
            };
            let km = f64::from(value) * spec.scale;
            if !self.config.is_plausible(km) {
                debug!(ecu = %ecu.response, did = %format!("{:04X}", spec.did), km, "implausible odometer value");
                continue;
            }
            if responder != ecu.response {
                warn!(addressed = %ecu.response, responder = %responder, "DID answered by a different ECU");
            }
            info!(ecu = %responder, did = %format!("{:04X}", spec.did), km, label = spec.label, "odometer from DID");
            return Ok(Some(OdometerReading {
                km,
                ecu: responder,
                source: OdometerSource::ManufacturerDid {
                    did: spec.did,
                    manufacturer: manufacturer.map(|m| m.name().to_string()),
                },
            }));
        }
        Ok(None)
    }
}

impl Default for OdometerEngine {
    fn default() -> Self {
        Self::new(OdometerConfig::default())
    }
}

// ── Adapter addressing ───────────────────────────────────────

/// Functional TesterPresent: response ids of every ECU that answered.
async fn probe(adapter: &AdapterController) -> DiagResult<Vec<String>> {
    match adapter.send_raw(uds::TESTER_PRESENT).await {
        Ok(raw) => {
            let ids: Vec<String> = frames::parse_messages(&raw)
                .into_keys()
                .filter(|id| id != UNKNOWN_ECU)
                .collect();
            debug!(ecus = ?ids, "functional probe");
            Ok(ids)
        }
        Err(e) if e.is_disconnect() => Err(e),
        Err(e) => {
            debug!(error = %e, "functional probe failed");
            Ok(Vec::new())
        }
    }
}

/// Send an AT command; true when acknowledged.
async fn at_ok(adapter: &AdapterController, cmd: &str) -> DiagResult<bool> {
    match adapter.send(cmd).await {
        Ok(raw) => Ok(frames::clean_lines(&raw).iter().any(|l| l == "OK")),
        Err(e) if e.is_disconnect() => Err(e),
        Err(e) => {
            debug!(command = %cmd, error = %e, "AT command not accepted");
            Ok(false)
        }
    }
}

/// Set the header, accepting either spelling the adapter understands.
async fn set_header(adapter: &AdapterController, header: &str) -> DiagResult<bool> {
    Ok(at_ok(adapter, &format!("ATSH{header}")).await?
        || at_ok(adapter, &format!("ATSH {header}")).await?)
}

/// Address one ECU physically and open its session if it needs one.
///
/// `in_session` is raised before the session request so an aborted search
/// still returns the ECU to its default session.
async fn address(
    adapter: &AdapterController,
    ecu: &EcuAddress,
    in_session: &AtomicBool,
) -> DiagResult<bool> {
    if !set_header(adapter, &ecu.request).await? {
        return Ok(false);
    }
    at_ok(adapter, &format!("ATCRA{}", ecu.response)).await?;
    at_ok(adapter, "ATAL").await?;
    at_ok(adapter, "ATCFC1").await?;

    if ecu.extended_session {
        in_session.store(true, Ordering::SeqCst);
        match adapter.send(uds::EXTENDED_SESSION).await {
            Ok(_) => debug!(ecu = %ecu.response, "extended session"),
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => debug!(ecu = %ecu.response, error = %e, "extended session refused"),
        }
        // seed only; key computation is manufacturer-proprietary
        match adapter.send(uds::SECURITY_SEED).await {
            Ok(_) => debug!(ecu = %ecu.response, "security seed received"),
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => debug!(ecu = %ecu.response, error = %e, "security access skipped"),
        }
    }
    Ok(true)
}

async fn best_effort(adapter: &AdapterController, cmd: &str) {
    if let Err(e) = adapter.send(cmd).await {
        debug!(command = %cmd, error = %e, "ignored");
    }
}

/// Back to functional addressing with automatic receive filtering.
pub async fn restore_addressing(adapter: &AdapterController) {
    if !set_header(adapter, did_table::FUNCTIONAL_HEADER)
        .await
        .unwrap_or(false)
    {
        warn!("could not restore functional header");
    }
    best_effort(adapter, "ATCRA").await;
    best_effort(adapter, "ATAR").await;
}
