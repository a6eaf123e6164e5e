//! ELM327 diagnostic engine for vscan.
//!
//! Modules:
//! - `adapter`: AT-command initialization state machine and the classified
//!   `send` primitive over a [`vsc_link::CommandTransport`]
//! - `codec`: pure decoders from adapter text to VIN, DTC, MIL, and PID values
//! - `uds`: ReadDataByIdentifier / session requests and negative responses
//! - `odometer`: standard PID then manufacturer-DID odometer discovery
//! - `scan`: end-to-end scan with progress and cooperative cancellation
//!
//! All requests pass the `safety` guard: only read-only OBD modes and
//! read/session UDS services ever reach the adapter.

pub mod adapter;
pub mod codec;
pub mod dtc_db;
pub mod error;
pub mod mock;
pub mod odometer;
pub mod safety;
pub mod scan;
pub mod uds;

// Re-exports for convenience.
pub use adapter::{AdapterController, AdapterState, DetectedProtocol, ObdProtocol};
pub use error::{DecodeError, DiagError, DiagResult, ScanError};
pub use mock::MockElm;
pub use odometer::{OdometerConfig, OdometerEngine};
pub use scan::{CancelFlag, ScanConfig, ScanOrchestrator};
pub use uds::NegativeResponseCode;
