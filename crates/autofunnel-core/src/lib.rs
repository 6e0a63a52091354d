pub mod config;
pub mod error;
pub mod event;
pub mod funnel;
pub mod gtm_export;
pub mod journey;
pub mod store;
