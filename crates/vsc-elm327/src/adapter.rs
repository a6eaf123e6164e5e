//! ELM327 adapter controller: initialization state machine and the
//! classified `send` primitive every upper layer uses.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vsc_link::CommandTransport;

use crate::codec::frames::{self, Reply};
use crate::codec::pid;
use crate::error::{DecodeError, DiagError, DiagResult};
use crate::safety;
use crate::uds;

/// Adapter reset. Failure here is fatal to initialization.
pub const RESET: &str = "ATZ";
/// Query the active protocol number.
pub const DESCRIBE_PROTOCOL: &str = "ATDPN";
/// Warm-up request: Mode 01 supported PIDs 01–20.
pub const WARM_UP: &str = "0100";

/// Configuration steps after reset, in order. Failures are logged only.
pub const INIT_SEQUENCE: &[(&str, &str)] = &[
    ("ATE0", "echo off"),
    ("ATL0", "linefeeds off"),
    ("ATH1", "headers on"),
    ("ATS1", "spaces on"),
    ("ATSTFF", "maximum timeout"),
    ("ATAT1", "adaptive timing on"),
    ("ATSP0", "automatic protocol"),
];

// ── Types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Uninitialized,
    Resetting,
    Configuring,
    ProtocolDetect,
    WarmingUp,
    Ready,
    Failed,
}

/// OBD-II protocols an ELM327 can speak (`ATSPn` / `ATDPN` numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (5 baud init)
    Iso14230_4KwpSlow,
    /// ISO 14230-4 KWP (fast init)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Can29bit250,
    /// SAE J1939 CAN (29 bit ID, 250 kbaud)
    SaeJ1939,
    /// User1 CAN (11 bit ID, 125 kbaud)
    User1Can,
    /// User2 CAN (11 bit ID, 50 kbaud)
    User2Can,
}

impl ObdProtocol {
    /// Protocol from its ELM327 number (`0`–`C`).
    pub fn from_number(n: u8) -> Option<Self> {
        let protocol = match n {
            0x0 => Self::Auto,
            0x1 => Self::J1850Pwm,
            0x2 => Self::J1850Vpw,
            0x3 => Self::Iso9141_2,
            0x4 => Self::Iso14230_4KwpSlow,
            0x5 => Self::Iso14230_4KwpFast,
            0x6 => Self::Can11bit500,
            0x7 => Self::Can29bit500,
            0x8 => Self::Can11bit250,
            0x9 => Self::Can29bit250,
            0xA => Self::SaeJ1939,
            0xB => Self::User1Can,
            0xC => Self::User2Can,
            _ => return None,
        };
        Some(protocol)
    }

    pub fn number(self) -> u8 {
        match self {
            Self::Auto => 0x0,
            Self::J1850Pwm => 0x1,
            Self::J1850Vpw => 0x2,
            Self::Iso9141_2 => 0x3,
            Self::Iso14230_4KwpSlow => 0x4,
            Self::Iso14230_4KwpFast => 0x5,
            Self::Can11bit500 => 0x6,
            Self::Can29bit500 => 0x7,
            Self::Can11bit250 => 0x8,
            Self::Can29bit250 => 0x9,
            Self::SaeJ1939 => 0xA,
            Self::User1Can => 0xB,
            Self::User2Can => 0xC,
        }
    }

    /// Get the ELM327 AT command that selects this protocol.
    pub fn to_elm_command(self) -> String {
        format!("ATSP{:X}", self.number())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "Automatic",
            Self::J1850Pwm => "SAE J1850 PWM",
            Self::J1850Vpw => "SAE J1850 VPW",
            Self::Iso9141_2 => "ISO 9141-2",
            Self::Iso14230_4KwpSlow => "ISO 14230-4 KWP (5 baud init)",
            Self::Iso14230_4KwpFast => "ISO 14230-4 KWP (fast init)",
            Self::Can11bit500 => "ISO 15765-4 CAN (11 bit ID, 500 kbaud)",
            Self::Can29bit500 => "ISO 15765-4 CAN (29 bit ID, 500 kbaud)",
            Self::Can11bit250 => "ISO 15765-4 CAN (11 bit ID, 250 kbaud)",
            Self::Can29bit250 => "ISO 15765-4 CAN (29 bit ID, 250 kbaud)",
            Self::SaeJ1939 => "SAE J1939 CAN",
            Self::User1Can => "User1 CAN",
            Self::User2Can => "User2 CAN",
        }
    }

    /// Check if this is a CAN protocol
    pub fn is_can(self) -> bool {
        self.number() >= 0x6
    }
}

/// Protocol reported by `ATDPN`, e.g. `A6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedProtocol {
    pub protocol: ObdProtocol,
    /// Found by automatic search (`A` prefix).
    pub automatic: bool,
}

impl DetectedProtocol {
    /// Parse an `ATDPN` response.
    pub fn parse(raw: &str) -> Option<Self> {
        let line = frames::clean_lines(raw).into_iter().next()?;
        let (automatic, digit) = match line.strip_prefix('A') {
            Some(rest) if !rest.is_empty() => (true, rest),
            _ => (false, line.as_str()),
        };
        if digit.len() != 1 {
            return None;
        }
        let n = u8::from_str_radix(digit, 16).ok()?;
        Some(Self {
            protocol: ObdProtocol::from_number(n)?,
            automatic,
        })
    }
}

impl fmt::Display for DetectedProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.automatic {
            write!(f, "{} (auto)", self.protocol.name())
        } else {
            f.write_str(self.protocol.name())
        }
    }
}

#[derive(Debug)]
struct AdapterInfo {
    state: AdapterState,
    version: Option<String>,
    protocol: Option<DetectedProtocol>,
    supported_pids: Vec<u8>,
}

// ── Controller ───────────────────────────────────────────────

/// Drives one adapter over a command transport.
///
/// Owns no connection: the transport (normally a `TransportSession`) is
/// injected by the composition root.
pub struct AdapterController {
    transport: Arc<dyn CommandTransport>,
    info: Mutex<AdapterInfo>,
}

impl AdapterController {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            transport,
            info: Mutex::new(AdapterInfo {
                state: AdapterState::Uninitialized,
                version: None,
                protocol: None,
                supported_pids: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> AdapterState {
        self.lock().state
    }

    /// Version banner from the reset response, e.g. `ELM327 v1.5`.
    pub fn version(&self) -> Option<String> {
        self.lock().version.clone()
    }

    /// Protocol cached after initialization.
    pub fn protocol(&self) -> Option<DetectedProtocol> {
        self.lock().protocol
    }

    /// Mode 01 PIDs the vehicle advertised during warm-up.
    pub fn supported_pids(&self) -> Vec<u8> {
        self.lock().supported_pids.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdapterInfo> {
        self.info.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: AdapterState) {
        let mut info = self.lock();
        if info.state != state {
            debug!(from = ?info.state, to = ?state, "adapter state");
            info.state = state;
        }
    }

    /// Run the full initialization sequence.
    ///
    /// Only a failed reset or a lost connection is an error; every other
    /// step is lenient.
    pub async fn initialize(&self) -> DiagResult<()> {
        {
            let mut info = self.lock();
            info.version = None;
            info.protocol = None;
            info.supported_pids.clear();
        }

        self.set_state(AdapterState::Resetting);
        let banner = match self.transport.send(RESET).await {
            Ok(raw) => raw,
            Err(e) => {
                self.set_state(AdapterState::Failed);
                return Err(e.into());
            }
        };
        if let Reply::Unknown | Reply::Error(_) = frames::classify(&banner) {
            self.set_state(AdapterState::Failed);
            return Err(DiagError::AdapterInit(format!(
                "reset rejected: {}",
                banner.trim_end_matches(['>', '\r', '\n'])
            )));
        }
        let version = frames::clean_lines(&banner)
            .into_iter()
            .find(|l| l.contains("ELM") || l.contains("STN") || l.starts_with('V'));
        info!(version = ?version, "adapter reset");
        self.lock().version = version;

        self.set_state(AdapterState::Configuring);
        for (cmd, label) in INIT_SEQUENCE {
            match self.transport.send(cmd).await {
                Ok(raw) if frames::clean_lines(&raw).iter().any(|l| l == "OK") => {
                    debug!(command = %cmd, "{label}");
                }
                Ok(raw) => {
                    warn!(command = %cmd, response = %raw.trim_end(), "{label}: not acknowledged");
                }
                Err(e) if e.is_disconnect() => {
                    self.set_state(AdapterState::Failed);
                    return Err(e.into());
                }
                Err(e) => warn!(command = %cmd, error = %e, "{label} failed, continuing"),
            }
        }

        self.set_state(AdapterState::ProtocolDetect);
        match self.transport.send(DESCRIBE_PROTOCOL).await {
            Ok(raw) => {
                let protocol = DetectedProtocol::parse(&raw);
                match protocol {
                    Some(p) => info!(protocol = %p, "protocol"),
                    None => warn!(response = %raw.trim_end(), "unrecognized protocol response"),
                }
                self.lock().protocol = protocol;
            }
            Err(e) if e.is_disconnect() => {
                self.set_state(AdapterState::Failed);
                return Err(e.into());
            }
            Err(e) => warn!(error = %e, "protocol query failed"),
        }

        self.set_state(AdapterState::WarmingUp);
        match self.transport.send(WARM_UP).await {
            Ok(raw) => match pid::decode_supported(&raw) {
                Ok(pids) => {
                    debug!(count = pids.len(), "supported PIDs");
                    self.lock().supported_pids = pids;
                }
                Err(e) => debug!(error = %e, "warm-up returned no PID bitmap"),
            },
            Err(e) if e.is_disconnect() => {
                self.set_state(AdapterState::Failed);
                return Err(e.into());
            }
            Err(e) => warn!(error = %e, "warm-up failed, continuing"),
        }

        self.set_state(AdapterState::Ready);
        Ok(())
    }

    /// Send a request and return the raw response text.
    ///
    /// Errors only for safety rejections and transport failures; the text
    /// is left for a decoder to interpret.
    pub async fn send_raw(&self, command: &str) -> DiagResult<String> {
        if !safety::is_request_allowed(command) {
            warn!(command = %command, "blocked non-read-only request");
            return Err(DiagError::SafetyViolation(command.to_string()));
        }
        Ok(self.transport.send(command).await?)
    }

    /// Send a request and classify the response.
    ///
    /// `NO DATA` is `NotSupported`; `?` and bus/adapter error phrases are
    /// `Protocol`; a UDS negative response with no positive answer from any
    /// ECU is `NegativeResponse`.
    pub async fn send(&self, command: &str) -> DiagResult<String> {
        let raw = self.send_raw(command).await?;
        match frames::classify(&raw) {
            Reply::Data => {}
            Reply::NoData => return Err(DiagError::NotSupported(format!("{command}: no data"))),
            Reply::Unknown => {
                return Err(DiagError::Protocol(format!("{command}: rejected by adapter")));
            }
            Reply::Error(phrase) => return Err(DiagError::Protocol(format!("{command}: {phrase}"))),
        }
        if let Some(service) = uds_service(command) {
            let messages = frames::parse_messages(&raw);
            let mut negative = None;
            for ecu_messages in messages.values() {
                match uds::evaluate(ecu_messages, service, &[]) {
                    Ok(_) => return Ok(raw),
                    Err(e @ DecodeError::Negative { .. }) => {
                        negative.get_or_insert(e);
                    }
                    Err(_) => {}
                }
            }
            if let Some(e) = negative {
                return Err(e.into());
            }
        }
        Ok(raw)
    }
}

/// UDS service id of a request, if it is one.
fn uds_service(command: &str) -> Option<u8> {
    let cmd = command.trim();
    if cmd.len() < 4 || cmd.to_ascii_uppercase().starts_with("AT") {
        return None;
    }
    let sid = u8::from_str_radix(cmd.get(..2)?, 16).ok()?;
    safety::ALLOWED_SERVICES.contains(&sid).then_some(sid)
}
