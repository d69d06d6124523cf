//! Telemetry Layer
//!
//! Ingestion boundary to the simulation: decoded packets in, directives out.

pub mod control;
pub mod packet;
pub mod relay;

pub use control::{ControlError, Directive, SessionControl};
pub use packet::{CarUpdate, RawPacket, TelemetryEvent};
pub use relay::{RelayConfig, RelayHandle, TelemetryRelay};
