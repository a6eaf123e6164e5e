pub mod dtc;
pub mod ecu;
pub mod odometer;
pub mod scan;
pub mod status;
pub mod vin;

pub use dtc::*;
pub use ecu::*;
pub use odometer::*;
pub use scan::*;
pub use status::*;
pub use vin::*;
