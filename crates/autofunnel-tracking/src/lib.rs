//! Runtime side of customer journeys: turning active journeys into tracking
//! hooks and fanning conversion events out to the configured sinks.

pub mod attribution;
pub mod bootstrap;
pub mod conversions;
pub mod dom;
pub mod emitter;
pub mod forwarder;
pub mod registry;
pub mod sinks;

pub use attribution::SessionAttributionStore;
pub use forwarder::{ConversionForwarder, ForwardReport, SinkSelection};
pub use registry::TrackingRegistry;
