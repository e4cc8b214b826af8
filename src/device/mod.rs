//! Device data model for Renpho scales.
//!
//! Turns advertisement payloads and GATT poll readouts into immutable
//! [`DeviceSnapshot`]s. Parsing is pure and degrades gracefully: unknown or
//! truncated optional fields are dropped, only structurally invalid payloads
//! are rejected.

pub mod discovery;
pub mod metrics;
pub mod parser;
pub mod snapshot;

pub use discovery::{DeviceDiscovery, DiscoveredDevice};
pub use metrics::{DeviceClass, MetricDescriptor, MetricKey, Unit};
pub use parser::{parse_advertisement, parse_poll_result};
pub use snapshot::{DeviceInfo, DeviceSnapshot, PollReadout};
