//! Passive data processors.
//!
//! A processor subscribes to a device coordinator and keeps a display-ready
//! entity view of the merged stream. Several processors (sensor platform,
//! diagnostics platform) can subscribe to the same coordinator.

pub mod descriptions;
pub mod passive;

pub use descriptions::{EntityCategory, EntityDescription, StateClass, entity_description};
pub use passive::{EntityKey, EntityState, ListenerId, NewEntity, PassiveDataProcessor, ProcessorUpdate};
