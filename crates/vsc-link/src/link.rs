//! Seams between the transport session, the host BLE stack, and upper layers.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportResult;
use crate::gatt::{GattService, SelectedCharacteristics};

/// Event delivered by a link after `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One notify-characteristic fragment, as received.
    Data(Vec<u8>),
    /// The peripheral dropped the connection.
    Disconnected,
}

/// Host BLE stack abstraction.
///
/// Implementations: [`crate::btle::BtleLink`] (btleplug) and
/// [`crate::mock::MockLink`] (tests).
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Connect to `device_id` and return its discovered GATT services.
    async fn connect(&self, device_id: &str) -> TransportResult<Vec<GattService>>;

    /// Subscribe to the notify characteristic. Fragments and link loss are
    /// delivered on the returned channel until `disconnect`.
    async fn open(
        &self,
        chars: &SelectedCharacteristics,
    ) -> TransportResult<mpsc::UnboundedReceiver<LinkEvent>>;

    /// Write raw bytes to the write characteristic.
    async fn write(&self, chars: &SelectedCharacteristics, data: &[u8]) -> TransportResult<()>;

    /// Tear the connection down. Must not report `LinkEvent::Disconnected`.
    async fn disconnect(&self) -> TransportResult<()>;
}

/// The single `send(command) -> response` primitive the adapter layer uses.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send one command (without terminator) and return the raw response text.
    async fn send(&self, command: &str) -> TransportResult<String>;
}
