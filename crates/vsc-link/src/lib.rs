//! BLE transport session for ELM327-class OBD-II adapters.
//!
//! Turns a stream of notify-characteristic fragments into discrete
//! command/response transactions:
//! - `BleLink` trait over the host BLE stack (mockable in tests)
//! - `select_characteristics` three-tier write/notify discovery
//! - `ResponseBuffer` prompt / terminal-error completion detection
//! - `TransportSession` single-in-flight FIFO queue with per-class timeouts,
//!   throttling, state listeners, and bounded reconnection
//! - `MockLink` for testing without a radio
//! - `BtleLink` on top of `btleplug` (feature `btle`)

pub mod buffer;
pub mod command;
pub mod config;
pub mod error;
pub mod gatt;
pub mod link;
pub mod mock;
pub mod session;

#[cfg(feature = "btle")]
pub mod btle;

// Re-exports for convenience.
pub use buffer::ResponseBuffer;
pub use command::CommandClass;
pub use config::{CommandTimeouts, SessionConfig};
pub use error::{TransportError, TransportResult};
pub use gatt::{CharProps, GattCharacteristic, GattService, SelectedCharacteristics};
pub use link::{BleLink, CommandTransport, LinkEvent};
pub use mock::MockLink;
pub use session::{ConnectionState, ListenerId, TransportSession};

#[cfg(feature = "btle")]
pub use btle::BtleLink;
