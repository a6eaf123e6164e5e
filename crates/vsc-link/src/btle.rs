//! `BleLink` backed by the host Bluetooth stack via `btleplug`.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::gatt::{CharProps, GattCharacteristic, GattService, SelectedCharacteristics};
use crate::link::{BleLink, LinkEvent};

/// Interval between peripheral list polls while scanning.
const SCAN_POLL: Duration = Duration::from_millis(250);

fn ble_err(e: btleplug::Error) -> TransportError {
    TransportError::Ble(e.to_string())
}

/// Real BLE link using the first adapter the platform reports.
pub struct BtleLink {
    discovery_timeout: Duration,
    adapter: Mutex<Option<Adapter>>,
    peripheral: Mutex<Option<Peripheral>>,
    forwarder: StdMutex<Option<JoinHandle<()>>>,
}

impl BtleLink {
    pub fn new(discovery_timeout: Duration) -> Self {
        Self {
            discovery_timeout,
            adapter: Mutex::new(None),
            peripheral: Mutex::new(None),
            forwarder: StdMutex::new(None),
        }
    }

    async fn adapter(&self) -> TransportResult<Adapter> {
        let mut slot = self.adapter.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }
        let manager = Manager::new().await.map_err(ble_err)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(ble_err)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Ble("no BLE adapter found".into()))?;
        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    async fn find_peripheral(&self, adapter: &Adapter, device_id: &str) -> TransportResult<Peripheral> {
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_err)?;

        let search = async {
            loop {
                let peripherals = adapter.peripherals().await.unwrap_or_default();
                if let Some(p) = peripherals
                    .into_iter()
                    .find(|p| p.id().to_string() == device_id)
                {
                    return p;
                }
                tokio::time::sleep(SCAN_POLL).await;
            }
        };
        let found = tokio::time::timeout(self.discovery_timeout, search).await;
        let _ = adapter.stop_scan().await;

        found.map_err(|_| {
            TransportError::Connection(format!(
                "device {device_id} not found within {}ms",
                self.discovery_timeout.as_millis()
            ))
        })
    }

    async fn connected_peripheral(&self) -> TransportResult<Peripheral> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn stop_forwarder(&self) {
        let handle = self
            .forwarder
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

fn find_characteristic(peripheral: &Peripheral, service: Uuid, uuid: Uuid) -> TransportResult<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid && c.service_uuid == service)
        .ok_or(TransportError::NoUsableCharacteristics)
}

fn to_props(flags: CharPropFlags) -> CharProps {
    CharProps {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

#[async_trait]
impl BleLink for BtleLink {
    async fn connect(&self, device_id: &str) -> TransportResult<Vec<GattService>> {
        let adapter = self.adapter().await?;
        let peripheral = self.find_peripheral(&adapter, device_id).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(TransportError::Connection(format!(
                "service discovery failed: {e}"
            )));
        }

        let services: Vec<GattService> = peripheral
            .services()
            .into_iter()
            .map(|s| GattService {
                uuid: s.uuid,
                characteristics: s
                    .characteristics
                    .into_iter()
                    .map(|c| GattCharacteristic {
                        uuid: c.uuid,
                        service_uuid: c.service_uuid,
                        properties: to_props(c.properties),
                    })
                    .collect(),
            })
            .collect();
        info!(device = %device_id, services = services.len(), "BLE connected");

        *self.peripheral.lock().await = Some(peripheral);
        Ok(services)
    }

    async fn open(
        &self,
        chars: &SelectedCharacteristics,
    ) -> TransportResult<mpsc::UnboundedReceiver<LinkEvent>> {
        let peripheral = self.connected_peripheral().await?;
        let adapter = self.adapter().await?;
        let notify = find_characteristic(&peripheral, chars.notify_service, chars.notify_uuid)?;

        peripheral.subscribe(&notify).await.map_err(ble_err)?;
        let mut notifications = peripheral.notifications().await.map_err(ble_err)?;
        let mut central = adapter.events().await.map_err(ble_err)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let notify_uuid = chars.notify_uuid;
        let id = peripheral.id();
        self.stop_forwarder();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    n = notifications.next() => match n {
                        Some(n) if n.uuid == notify_uuid => {
                            if tx.send(LinkEvent::Data(n.value)).is_err() {
                                return;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                    e = central.next() => match e {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => break,
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            warn!("BLE peripheral disconnected");
            let _ = tx.send(LinkEvent::Disconnected);
        });
        *self
            .forwarder
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);

        debug!(notify = %notify_uuid, "subscribed to notifications");
        Ok(rx)
    }

    async fn write(&self, chars: &SelectedCharacteristics, data: &[u8]) -> TransportResult<()> {
        let peripheral = self.connected_peripheral().await?;
        let write = find_characteristic(&peripheral, chars.write_service, chars.write_uuid)?;
        let kind = if chars.write_with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        peripheral.write(&write, data, kind).await.map_err(ble_err)
    }

    async fn disconnect(&self) -> TransportResult<()> {
        self.stop_forwarder();
        let peripheral = self.peripheral.lock().await.take();
        match peripheral {
            Some(p) => p.disconnect().await.map_err(ble_err),
            None => Ok(()),
        }
    }
}
