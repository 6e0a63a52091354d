//! Storage abstractions consumed by the tracking runtime and the HTTP layer.

use async_trait::async_trait;

use crate::event::TrackingEvent;
use crate::funnel::StepReach;
use crate::journey::{Journey, JourneyStep, JourneyUpdate, NewJourney, NewStep};

/// CRUD persistence for journeys and their steps.
///
/// Every returned [`Journey`] carries its steps ordered by `step_order`
/// ascending. Failures are logged by the implementation and propagated;
/// nothing is retried.
#[async_trait]
pub trait JourneyStore: Send + Sync + 'static {
    /// All journeys, newest first.
    async fn list_journeys(&self) -> anyhow::Result<Vec<Journey>>;

    /// Journeys with status `active`, newest first.
    async fn list_active_journeys(&self) -> anyhow::Result<Vec<Journey>>;

    async fn get_journey(&self, journey_id: &str) -> anyhow::Result<Option<Journey>>;

    /// The active journey whose primary route is exactly `route`.
    async fn get_journey_by_route(&self, route: &str) -> anyhow::Result<Option<Journey>>;

    async fn get_journey_steps(&self, journey_id: &str) -> anyhow::Result<Vec<JourneyStep>>;

    /// Insert the journey and its steps atomically.
    async fn create_journey(
        &self,
        journey: NewJourney,
        steps: Vec<NewStep>,
    ) -> anyhow::Result<Journey>;

    /// Returns `Ok(None)` when the journey does not exist.
    async fn update_journey(
        &self,
        journey_id: &str,
        update: JourneyUpdate,
    ) -> anyhow::Result<Option<Journey>>;

    /// Removes the journey and its steps. Returns `false` when absent.
    async fn delete_journey(&self, journey_id: &str) -> anyhow::Result<bool>;

    /// Flip active <-> paused in one conditional statement.
    async fn toggle_journey_status(&self, journey_id: &str) -> anyhow::Result<Option<Journey>>;

    async fn activate_journey(&self, journey_id: &str) -> anyhow::Result<Option<Journey>>;
}

/// The append-only analytics ledger.
#[async_trait]
pub trait TrackingEventStore: Send + Sync + 'static {
    async fn insert_tracking_event(&self, event: &TrackingEvent) -> anyhow::Result<()>;

    /// Whether `user_id` has at least one event of `event_type`.
    async fn has_tracking_event(&self, user_id: &str, event_type: &str) -> anyhow::Result<bool>;

    /// Distinct (actor, step order) pairs recorded for a journey's steps.
    async fn journey_step_reach(&self, journey_id: &str) -> anyhow::Result<Vec<StepReach>>;
}
