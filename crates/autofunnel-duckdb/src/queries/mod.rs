pub mod journeys;
pub mod tracking_events;
