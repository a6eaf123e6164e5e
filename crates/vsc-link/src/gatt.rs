//! GATT model and write/notify characteristic selection.
//!
//! ELM327 BLE clones expose their serial bridge under a handful of vendor
//! service layouts. Selection runs three tiers, first hit wins:
//! 1. known service patterns with fixed write/notify characteristics,
//! 2. any single non-standard service offering both write and notify,
//! 3. a cross-service pair (write from one service, notify from another).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build a 128-bit UUID from a Bluetooth SIG 16-bit short id.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_fields(
        short as u32,
        0x0000,
        0x1000,
        &[0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb],
    )
}

/// Generic Access.
const GAP_SERVICE: Uuid = uuid_from_u16(0x1800);
/// Generic Attribute.
const GATT_SERVICE: Uuid = uuid_from_u16(0x1801);
/// Device Information.
const DEVICE_INFO_SERVICE: Uuid = uuid_from_u16(0x180A);

const STANDARD_SERVICES: &[Uuid] = &[GAP_SERVICE, GATT_SERVICE, DEVICE_INFO_SERVICE];

/// A vendor layout: service plus the characteristics used for each direction.
struct KnownPattern {
    service: Uuid,
    write: Uuid,
    notify: Uuid,
}

const KNOWN_PATTERNS: &[KnownPattern] = &[
    // Vgate / Veepeak / most "OBDII" clones
    KnownPattern {
        service: uuid_from_u16(0xFFF0),
        write: uuid_from_u16(0xFFF2),
        notify: uuid_from_u16(0xFFF1),
    },
    // HM-10 style bridges: one characteristic for both directions
    KnownPattern {
        service: uuid_from_u16(0xFFE0),
        write: uuid_from_u16(0xFFE1),
        notify: uuid_from_u16(0xFFE1),
    },
    KnownPattern {
        service: uuid_from_u16(0x18F0),
        write: uuid_from_u16(0x2AF1),
        notify: uuid_from_u16(0x2AF0),
    },
    // Microchip transparent UART
    KnownPattern {
        service: Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455),
        write: Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3),
        notify: Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616),
    },
    // OBDLink CX / MX+
    KnownPattern {
        service: Uuid::from_u128(0xe7810a71_73ae_499d_8c15_faa9aef0c3f2),
        write: Uuid::from_u128(0xbef8d6c9_9c21_4c9e_b632_bd58c1009f9f),
        notify: Uuid::from_u128(0xbef8d6c9_9c21_4c9e_b632_bd58c1009f9f),
    },
];

/// Characteristic property flags relevant to the serial bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharProps {
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn notifies(&self) -> bool {
        self.notify || self.indicate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharProps,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// The write/notify pair used for the life of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedCharacteristics {
    pub write_service: Uuid,
    pub write_uuid: Uuid,
    pub notify_service: Uuid,
    pub notify_uuid: Uuid,
    /// True when the write characteristic only supports acknowledged writes.
    pub write_with_response: bool,
}

impl SelectedCharacteristics {
    fn from_pair(write: &GattCharacteristic, notify: &GattCharacteristic) -> Self {
        Self {
            write_service: write.service_uuid,
            write_uuid: write.uuid,
            notify_service: notify.service_uuid,
            notify_uuid: notify.uuid,
            write_with_response: !write.properties.write_without_response,
        }
    }
}

/// Pick the write/notify pair, or `None` when the device has no usable pair.
pub fn select_characteristics(services: &[GattService]) -> Option<SelectedCharacteristics> {
    known_pattern(services)
        .or_else(|| same_service(services))
        .or_else(|| cross_service(services))
}

fn find_char(service: &GattService, uuid: Uuid) -> Option<&GattCharacteristic> {
    service.characteristics.iter().find(|c| c.uuid == uuid)
}

fn known_pattern(services: &[GattService]) -> Option<SelectedCharacteristics> {
    KNOWN_PATTERNS.iter().find_map(|pattern| {
        let service = services.iter().find(|s| s.uuid == pattern.service)?;
        let write = find_char(service, pattern.write).filter(|c| c.properties.writable())?;
        let notify = find_char(service, pattern.notify).filter(|c| c.properties.notifies())?;
        Some(SelectedCharacteristics::from_pair(write, notify))
    })
}

/// Prefer write-without-response when several writable characteristics exist.
fn best_writer<'a>(
    chars: impl Iterator<Item = &'a GattCharacteristic>,
) -> Option<&'a GattCharacteristic> {
    let writers: Vec<_> = chars.filter(|c| c.properties.writable()).collect();
    writers
        .iter()
        .find(|c| c.properties.write_without_response)
        .or_else(|| writers.first())
        .copied()
}

fn custom_services(services: &[GattService]) -> impl Iterator<Item = &GattService> {
    services
        .iter()
        .filter(|s| !STANDARD_SERVICES.contains(&s.uuid))
}

fn same_service(services: &[GattService]) -> Option<SelectedCharacteristics> {
    custom_services(services).find_map(|service| {
        let write = best_writer(service.characteristics.iter())?;
        let notify = service
            .characteristics
            .iter()
            .find(|c| c.properties.notifies())?;
        Some(SelectedCharacteristics::from_pair(write, notify))
    })
}

fn cross_service(services: &[GattService]) -> Option<SelectedCharacteristics> {
    let write = best_writer(custom_services(services).flat_map(|s| s.characteristics.iter()))?;
    let notify = custom_services(services)
        .flat_map(|s| s.characteristics.iter())
        .find(|c| c.properties.notifies())?;
    Some(SelectedCharacteristics::from_pair(write, notify))
}
