use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use autofunnel_core::event::{CanonicalEvent, TrackingContext};

use crate::forwarder::{ConversionForwarder, SinkSelection};

/// Receives canonical events from click listeners.
///
/// Listeners are synchronous, so implementations must not block.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: CanonicalEvent, selection: SinkSelection);
}

/// Hands each emitted event to the forwarder on a spawned task.
pub struct ForwardingEmitter {
    forwarder: Arc<ConversionForwarder>,
    context: TrackingContext,
    runtime: Handle,
}

impl ForwardingEmitter {
    /// Must be called from within a tokio runtime.
    pub fn new(forwarder: Arc<ConversionForwarder>, context: TrackingContext) -> Self {
        Self {
            forwarder,
            context,
            runtime: Handle::current(),
        }
    }
}

impl EventEmitter for ForwardingEmitter {
    fn emit(&self, event: CanonicalEvent, selection: SinkSelection) {
        let forwarder = Arc::clone(&self.forwarder);
        let context = self.context.clone();
        debug!(event_name = %event.event_name, "Click event emitted");
        self.runtime.spawn(async move {
            forwarder.forward(&event, &context, selection).await;
        });
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use autofunnel_core::config::SinkConfig;
    use autofunnel_core::journey::EventType;
    use autofunnel_core::store::TrackingEventStore;

    use crate::attribution::SessionAttributionStore;
    use crate::forwarder::mock::MemoryEventStore;

    use super::*;

    #[tokio::test]
    async fn forwarding_emitter_reaches_every_sink() {
        let store = Arc::new(MemoryEventStore::default());
        let (forwarder, data_layer, _) = ConversionForwarder::from_config(
            &SinkConfig::default(),
            Arc::clone(&store) as Arc<dyn TrackingEventStore>,
            Arc::new(SessionAttributionStore::new()),
        )
        .expect("forwarder");
        let emitter = ForwardingEmitter::new(
            Arc::new(forwarder),
            TrackingContext {
                session_id: "sess-1".to_string(),
                ..TrackingContext::default()
            },
        );

        emitter.emit(
            CanonicalEvent::new(EventType::Lead, "Apply Clicked"),
            SinkSelection::default(),
        );

        for _ in 0..50 {
            if !store.events.lock().expect("lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(data_layer.records().len(), 1);
        assert_eq!(store.events.lock().expect("lock")[0].session_id, "sess-1");
    }
}
