//! Scripted BLE link for tests: no radio required.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};
use crate::gatt::{CharProps, GattCharacteristic, GattService, SelectedCharacteristics, uuid_from_u16};
use crate::link::{BleLink, LinkEvent};

/// Response for commands with no script entry.
const UNKNOWN_COMMAND: &str = "?\r\r>";

/// Mock link that answers written commands from a script.
///
/// Responses are streamed back as notify fragments of `fragment_size`
/// bytes, `fragment_delay` apart, so completion detection is exercised
/// the same way a real adapter exercises it.
pub struct MockLink {
    services: Vec<GattService>,
    fragment_size: usize,
    fragment_delay: Duration,
    responses: Mutex<HashMap<String, String>>,
    silent: Mutex<HashSet<String>>,
    writes: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    connects: AtomicUsize,
    failing_connects: AtomicU32,
    failing_writes: AtomicBool,
    streaming: Arc<AtomicUsize>,
    overlaps: AtomicUsize,
}

impl MockLink {
    /// A link exposing the common FFF0/FFF1/FFF2 adapter layout.
    pub fn new() -> Self {
        let service = uuid_from_u16(0xFFF0);
        Self {
            services: vec![GattService {
                uuid: service,
                characteristics: vec![
                    GattCharacteristic {
                        uuid: uuid_from_u16(0xFFF1),
                        service_uuid: service,
                        properties: CharProps {
                            notify: true,
                            ..Default::default()
                        },
                    },
                    GattCharacteristic {
                        uuid: uuid_from_u16(0xFFF2),
                        service_uuid: service,
                        properties: CharProps {
                            write: true,
                            write_without_response: true,
                            ..Default::default()
                        },
                    },
                ],
            }],
            fragment_size: 20,
            fragment_delay: Duration::from_millis(5),
            responses: Mutex::new(HashMap::new()),
            silent: Mutex::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            connects: AtomicUsize::new(0),
            failing_connects: AtomicU32::new(0),
            failing_writes: AtomicBool::new(false),
            streaming: Arc::new(AtomicUsize::new(0)),
            overlaps: AtomicUsize::new(0),
        }
    }

    pub fn with_services(mut self, services: Vec<GattService>) -> Self {
        self.services = services;
        self
    }

    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    /// Script the full response text (including the prompt) for `command`.
    pub fn set_response(&self, command: &str, response: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(normalize(command), response.to_string());
    }

    /// `command` is accepted but never answered.
    pub fn set_silent(&self, command: &str) {
        self.silent.lock().unwrap().insert(normalize(command));
    }

    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.failing_writes.store(fail, Ordering::SeqCst);
    }

    /// Simulate the peripheral dropping the connection.
    pub fn inject_disconnect(&self) {
        if let Some(tx) = self.events.lock().unwrap().take() {
            let _ = tx.send(LinkEvent::Disconnected);
        }
    }

    /// Commands written so far, without the trailing carriage return.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Writes that arrived while a previous response was still streaming.
    pub fn overlapping_writes(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(command: &str) -> String {
    command.trim().to_ascii_uppercase()
}

#[async_trait]
impl BleLink for MockLink {
    async fn connect(&self, _device_id: &str) -> TransportResult<Vec<GattService>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Connection("mock connect failure".into()));
        }
        Ok(self.services.clone())
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
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Ble("mock write rejected".into()));
        }
        let command = normalize(&String::from_utf8_lossy(data));
        self.writes.lock().unwrap().push(command.clone());

        if self.streaming.load(Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if self.silent.lock().unwrap().contains(&command) {
            return Ok(());
        }

        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&command)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_COMMAND.to_string());
        let Some(tx) = self.events.lock().unwrap().clone() else {
            return Err(TransportError::NotConnected);
        };

        let fragments: Vec<Vec<u8>> = response
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
