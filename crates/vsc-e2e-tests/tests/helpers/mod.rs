//! Shared harness for end-to-end tests.
//!
//! `SimulatedVehicle` is a `BleLink` that behaves like an ELM327 plugged
//! into a car: it tracks the header and diagnostic session, answers
//! functional OBD requests and physical UDS reads, and streams every
//! response back in small notify fragments.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use vsc_elm327::codec::{encode_vin, frames};
use vsc_elm327::{AdapterController, ScanConfig, ScanOrchestrator};
use vsc_link::gatt::uuid_from_u16;
use vsc_link::{
    BleLink, CharProps, GattCharacteristic, GattService, LinkEvent, SelectedCharacteristics,
    SessionConfig, TransportError, TransportResult, TransportSession,
};

pub const FORD_VIN: &str = "1FAHP0CD55L047824";
pub const GOLF_VIN: &str = "WVWZZZ1KZ6W000001";

const FUNCTIONAL: &str = "7DF";

/// One ECU reachable by physical addressing.
#[derive(Debug, Clone)]
pub struct SimEcu {
    pub request: String,
    pub response: String,
    /// DIDs answer only inside the extended session.
    pub needs_extended: bool,
    pub dids: HashMap<u16, Vec<u8>>,
}

impl SimEcu {
    pub fn new(request: &str, response: &str) -> Self {
        Self {
            request: request.to_string(),
            response: response.to_string(),
            needs_extended: false,
            dids: HashMap::new(),
        }
    }

    pub fn extended(mut self) -> Self {
        self.needs_extended = true;
        self
    }

    pub fn with_did(mut self, did: u16, data: &[u8]) -> Self {
        self.dids.insert(did, data.to_vec());
        self
    }
}

/// What the car answers.
#[derive(Debug, Clone, Default)]
pub struct VehicleProfile {
    /// Functional (7DF) request → response lines, without the prompt.
    pub functional: HashMap<String, String>,
    pub ecus: Vec<SimEcu>,
}

impl VehicleProfile {
    pub fn answer(mut self, request: &str, lines: &str) -> Self {
        let lines = lines.trim_end_matches(['\r', '>']);
        self.functional.insert(request.to_string(), lines.to_string());
        self
    }

    pub fn ecu(mut self, ecu: SimEcu) -> Self {
        self.ecus.push(ecu);
        self
    }

    /// Ford Focus with two OBD ECUs, two stored codes, and the odometer
    /// only in the instrument cluster (DID 404C).
    pub fn ford_focus() -> Self {
        Self::default()
            .answer("0100", "7E8 06 41 00 BE 3F A8 13")
            .answer("0902", &encode_vin(FORD_VIN, Some("7E8")))
            .answer("03", "7E8 06 43 02 01 33 03 00")
            .answer("07", "NO DATA")
            .answer("0A", "NO DATA")
            .answer("0101", "7E8 06 41 01 82 07 65 04\r7E9 06 41 01 00 04 00 00")
            .answer("0103", "7E8 04 41 03 02 00")
            .answer("0112", "7E8 03 41 12 04")
            .answer("0121", "7E8 04 41 21 00 0A")
            .answer("0130", "7E8 03 41 30 12")
            .answer("0131", "7E8 04 41 31 01 2C")
            .answer("014D", "7E8 04 41 4D 00 05")
            .answer("014E", "7E8 04 41 4E 00 3C")
            .ecu(SimEcu::new("7E0", "7E8"))
            .ecu(SimEcu::new("720", "728").with_did(0x404C, &[0x01, 0xE2, 0x40]))
    }

    /// VW Golf: odometer in the 714/77E cluster behind the extended session.
    pub fn vw_golf() -> Self {
        Self::default()
            .answer("0100", "7E8 06 41 00 BE 3E B8 11")
            .answer("0902", &encode_vin(GOLF_VIN, Some("7E8")))
            .answer("03", "NO DATA")
            .answer("07", "NO DATA")
            .answer("0A", "7E8 02 4A 00")
            .answer("0101", "7E8 06 41 01 00 07 E5 00")
            .answer("0131", "7E8 04 41 31 00 00")
            .ecu(SimEcu::new("7E0", "7E8"))
            .ecu(
                SimEcu::new("714", "77E")
                    .extended()
                    .with_did(0x2203, &[0x00, 0xD4, 0x31]),
            )
    }
}

#[derive(Debug)]
struct AdapterState {
    header: String,
    extended: bool,
}

impl Default for AdapterState {
    fn default() -> Self {
        Self {
            header: FUNCTIONAL.to_string(),
            extended: false,
        }
    }
}

/// ELM327 + vehicle behind a fragmenting BLE link.
pub struct SimulatedVehicle {
    profile: Mutex<VehicleProfile>,
    adapter: Mutex<AdapterState>,
    fragment_size: usize,
    fragment_delay: Duration,
    silent: Mutex<HashSet<String>>,
    drop_on: Mutex<Option<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    writes: Mutex<Vec<String>>,
    connects: AtomicUsize,
    failing_connects: AtomicU32,
    streaming: Arc<AtomicUsize>,
    overlaps: AtomicUsize,
}

impl SimulatedVehicle {
    pub fn new(profile: VehicleProfile) -> Self {
        Self {
            profile: Mutex::new(profile),
            adapter: Mutex::new(AdapterState::default()),
            fragment_size: 6,
            fragment_delay: Duration::from_millis(3),
            silent: Mutex::new(HashSet::new()),
            drop_on: Mutex::new(None),
            events: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            failing_connects: AtomicU32::new(0),
            streaming: Arc::new(AtomicUsize::new(0)),
            overlaps: AtomicUsize::new(0),
        }
    }

    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    /// `command` is accepted but never answered.
    pub fn set_silent(&self, command: &str) {
        self.silent.lock().unwrap().insert(command.to_string());
    }

    /// Drop the connection the next time `command` is written.
    pub fn drop_on(&self, command: &str) {
        *self.drop_on.lock().unwrap() = Some(command.to_string());
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn overlapping_writes(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn header(&self) -> String {
        self.adapter.lock().unwrap().header.clone()
    }

    /// Full response text for `command`, prompt included.
    fn respond(&self, command: &str) -> String {
        let body = self.respond_lines(command);
        format!("{body}\r\r>")
    }

    fn respond_lines(&self, command: &str) -> String {
        let mut adapter = self.adapter.lock().unwrap();
        if command == "ATZ" {
            *adapter = AdapterState::default();
            return "\r\rELM327 v1.5".to_string();
        }
        if command == "ATDPN" {
            return "A6".to_string();
        }
        if let Some(header) = command.strip_prefix("ATSH") {
            adapter.header = header.trim().to_string();
            return "OK".to_string();
        }
        if command.starts_with("AT") {
            return "OK".to_string();
        }

        let profile = self.profile.lock().unwrap();
        if adapter.header == FUNCTIONAL {
            if command == "3E00" {
                let lines: Vec<String> = profile
                    .ecus
                    .iter()
                    .map(|e| format!("{} 02 7E 00", e.response))
                    .collect();
                return if lines.is_empty() {
                    "NO DATA".to_string()
                } else {
                    lines.join("\r")
                };
            }
            return profile
                .functional
                .get(command)
                .cloned()
                .unwrap_or_else(|| "NO DATA".to_string());
        }

        let Some(ecu) = profile.ecus.iter().find(|e| e.request == adapter.header) else {
            return "NO DATA".to_string();
        };
        let id = ecu.response.as_str();
        match command {
            "3E00" => format!("{id} 02 7E 00"),
            "1003" => {
                adapter.extended = true;
                format!("{id} 06 50 03 00 32 01 F4")
            }
            "1001" => {
                adapter.extended = false;
                format!("{id} 06 50 01 00 32 01 F4")
            }
            "2701" => format!("{id} 04 67 01 5A A5"),
            _ => match parse_did_request(command) {
                Some(_) if ecu.needs_extended && !adapter.extended => {
                    format!("{id} 03 7F 22 7F")
                }
                Some(did) => match ecu.dids.get(&did) {
                    Some(data) => {
                        let mut payload = vec![0x62, (did >> 8) as u8, (did & 0xFF) as u8];
                        payload.extend_from_slice(data);
                        frames::encode_frames(Some(id), &payload).join("\r")
                    }
                    None => format!("{id} 03 7F 22 31"),
                },
                None => "NO DATA".to_string(),
            },
        }
    }
}

fn parse_did_request(command: &str) -> Option<u16> {
    let hex = command.strip_prefix("22")?;
    if hex.len() != 4 {
        return None;
    }
    u16::from_str_radix(hex, 16).ok()
}

fn services() -> Vec<GattService> {
    // single write+notify characteristic, like most clone adapters
    let service = uuid_from_u16(0xFFE0);
    vec![GattService {
        uuid: service,
        characteristics: vec![GattCharacteristic {
            uuid: uuid_from_u16(0xFFE1),
            service_uuid: service,
            properties: CharProps {
                write_without_response: true,
                notify: true,
                ..Default::default()
            },
        }],
    }]
}

#[async_trait]
impl BleLink for SimulatedVehicle {
    async fn connect(&self, _device_id: &str) -> TransportResult<Vec<GattService>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Connection("simulated connect failure".into()));
        }
        Ok(services())
    }

    async fn open(
        &self,
        _chars: &SelectedCharacteristics,
    ) -> TransportResult<mpsc::UnboundedReceiver<LinkEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write(&self, _chars: &SelectedCharacteristics, data: &[u8]) -> TransportResult<()> {
        let command = String::from_utf8_lossy(data).trim().to_ascii_uppercase();
        self.writes.lock().unwrap().push(command.clone());
        if self.streaming.load(Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let drop_now = {
            let mut drop_on = self.drop_on.lock().unwrap();
            if drop_on.as_deref() == Some(command.as_str()) {
                drop_on.take();
                true
            } else {
                false
            }
        };
        if drop_now {
            if let Some(tx) = self.events.lock().unwrap().take() {
                let _ = tx.send(LinkEvent::Disconnected);
            }
            return Ok(());
        }
        if self.silent.lock().unwrap().contains(&command) {
            return Ok(());
        }

        let Some(tx) = self.events.lock().unwrap().clone() else {
            return Err(TransportError::NotConnected);
        };
        let fragments: Vec<Vec<u8>> = self
            .respond(&command)
            .as_bytes()
            .chunks(self.fragment_size)
            .map(<[u8]>::to_vec)
            .collect();
        let delay = self.fragment_delay;
        let streaming = self.streaming.clone();
        streaming.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            for fragment in fragments {
                tokio::time::sleep(delay).await;
                if tx.send(LinkEvent::Data(fragment)).is_err() {
                    break;
                }
            }
            streaming.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.events.lock().unwrap().take();
        Ok(())
    }
}

/// Session, adapter, and orchestrator over one simulated vehicle.
pub struct Harness {
    pub vehicle: Arc<SimulatedVehicle>,
    pub session: TransportSession,
    pub adapter: Arc<AdapterController>,
}

impl Harness {
    pub async fn connected(vehicle: SimulatedVehicle) -> Self {
        Self::connected_with(vehicle, SessionConfig::default()).await
    }

    pub async fn connected_with(vehicle: SimulatedVehicle, config: SessionConfig) -> Self {
        let vehicle = Arc::new(vehicle);
        let session = TransportSession::new(vehicle.clone(), config);
        session.connect("SIM-OBDII").await.unwrap();
        let adapter = Arc::new(AdapterController::new(Arc::new(session.clone())));
        Self {
            vehicle,
            session,
            adapter,
        }
    }

    pub fn orchestrator(&self) -> ScanOrchestrator {
        ScanOrchestrator::new(self.adapter.clone(), ScanConfig::default())
    }
}
