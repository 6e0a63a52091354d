use async_trait::async_trait;
use tracing::error;

use autofunnel_core::event::TrackingEvent;
use autofunnel_core::funnel::StepReach;
use autofunnel_core::journey::{Journey, JourneyStep, JourneyUpdate, NewJourney, NewStep};
use autofunnel_core::store::{JourneyStore, TrackingEventStore};

use crate::queries::{journeys, tracking_events};
use crate::DuckDbBackend;

#[async_trait]
impl JourneyStore for DuckDbBackend {
    async fn list_journeys(&self) -> anyhow::Result<Vec<Journey>> {
        journeys::list_journeys_inner(self)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to list journeys"))
    }

    async fn list_active_journeys(&self) -> anyhow::Result<Vec<Journey>> {
        journeys::list_active_journeys_inner(self)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to list active journeys"))
    }

    async fn get_journey(&self, journey_id: &str) -> anyhow::Result<Option<Journey>> {
        journeys::get_journey_inner(self, journey_id)
            .await
            .inspect_err(|e| error!(journey_id, error = %e, "Failed to load journey"))
    }

    async fn get_journey_by_route(&self, route: &str) -> anyhow::Result<Option<Journey>> {
        journeys::get_journey_by_route_inner(self, route)
            .await
            .inspect_err(|e| error!(route, error = %e, "Failed to load journey by route"))
    }

    async fn get_journey_steps(&self, journey_id: &str) -> anyhow::Result<Vec<JourneyStep>> {
        journeys::get_journey_steps_inner(self, journey_id)
            .await
            .inspect_err(|e| error!(journey_id, error = %e, "Failed to load journey steps"))
    }

    async fn create_journey(
        &self,
        journey: NewJourney,
        steps: Vec<NewStep>,
    ) -> anyhow::Result<Journey> {
        let name = journey.name.clone();
        journeys::create_journey_inner(self, journey, steps)
            .await
            .inspect_err(|e| error!(name = %name, error = %e, "Failed to create journey"))
    }

    async fn update_journey(
        &self,
        journey_id: &str,
        update: JourneyUpdate,
    ) -> anyhow::Result<Option<Journey>> {
        journeys::update_journey_inner(self, journey_id, update)
            .await
            .inspect_err(|e| error!(journey_id, error = %e, "Failed to update journey"))
    }

    async fn delete_journey(&self, journey_id: &str) -> anyhow::Result<bool> {
        journeys::delete_journey_inner(self, journey_id)
            .await
            .inspect_err(|e| error!(journey_id, error = %e, "Failed to delete journey"))
    }

    async fn toggle_journey_status(&self, journey_id: &str) -> anyhow::Result<Option<Journey>> {
        journeys::toggle_journey_status_inner(self, journey_id)
            .await
            .inspect_err(|e| error!(journey_id, error = %e, "Failed to toggle journey status"))
    }

    async fn activate_journey(&self, journey_id: &str) -> anyhow::Result<Option<Journey>> {
        journeys::activate_journey_inner(self, journey_id)
            .await
            .inspect_err(|e| error!(journey_id, error = %e, "Failed to activate journey"))
    }
}

#[async_trait]
impl TrackingEventStore for DuckDbBackend {
    async fn insert_tracking_event(&self, event: &TrackingEvent) -> anyhow::Result<()> {
        tracking_events::insert_tracking_event_inner(self, event)
            .await
            .inspect_err(|e| {
                error!(event_type = %event.event_type, error = %e, "Failed to store tracking event")
            })
    }

    async fn has_tracking_event(&self, user_id: &str, event_type: &str) -> anyhow::Result<bool> {
        tracking_events::has_tracking_event_inner(self, user_id, event_type)
            .await
            .inspect_err(|e| error!(event_type, error = %e, "Failed to query tracking events"))
    }

    async fn journey_step_reach(&self, journey_id: &str) -> anyhow::Result<Vec<StepReach>> {
        tracking_events::journey_step_reach_inner(self, journey_id)
            .await
            .inspect_err(|e| error!(journey_id, error = %e, "Failed to load journey step reach"))
    }
}
