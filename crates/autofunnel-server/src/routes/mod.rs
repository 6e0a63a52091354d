pub mod health;
pub mod journeys;
pub mod tracking;
