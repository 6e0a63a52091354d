use std::time::Duration;

use tracing::{error, info};

use autofunnel_core::store::JourneyStore;

use crate::registry::{RegisterOutcome, TrackingRegistry};

/// Register every active journey with auto tracking enabled.
///
/// Returns the number of registered journeys afterwards. A store failure is
/// logged and leaves the registry as it was.
pub async fn initialize_active_journeys(store: &dyn JourneyStore, registry: &TrackingRegistry) -> usize {
    let journeys = match store.list_active_journeys().await {
        Ok(journeys) => journeys,
        Err(e) => {
            error!(error = %e, "Error initializing active journeys");
            return registry.len();
        }
    };

    let mut registered = 0;
    for journey in journeys.iter().filter(|j| j.auto_tracking_enabled) {
        if let RegisterOutcome::Registered { .. } = registry.register(journey) {
            registered += 1;
        }
    }

    let total = registry.len();
    info!(newly_registered = registered, total, "Initialized active customer journeys");
    total
}

/// Startup variant: wait `delay` first so the host can finish loading.
pub async fn initialize_after_delay(
    store: &dyn JourneyStore,
    registry: &TrackingRegistry,
    delay: Duration,
) -> usize {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    initialize_active_journeys(store, registry).await
}

/// Clear every registration and table, then register active journeys again.
pub async fn reinitialize(store: &dyn JourneyStore, registry: &TrackingRegistry) -> usize {
    registry.reset();
    initialize_active_journeys(store, registry).await
}
