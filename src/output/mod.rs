//! Outbound sinks for processed entity states.

pub mod mqtt;

pub use mqtt::{MqttDriver, MqttSink};
