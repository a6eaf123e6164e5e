//! vscan agent: wires a BLE transport session, the ELM327 adapter
//! controller, and the scan orchestrator into one command-line run.

pub mod config;
pub mod runner;
