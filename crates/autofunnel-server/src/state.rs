use std::sync::Arc;

use tracing::info;

use autofunnel_core::config::Config;
use autofunnel_core::journey::Journey;
use autofunnel_core::store::TrackingEventStore;
use autofunnel_duckdb::DuckDbBackend;
use autofunnel_tracking::bootstrap;
use autofunnel_tracking::conversions::ConversionTracker;
use autofunnel_tracking::sinks::{DataLayerSink, PixelSink};
use autofunnel_tracking::{ConversionForwarder, SessionAttributionStore, TrackingRegistry};

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// Journey repository and event ledger. Internally uses
    /// `Arc<tokio::sync::Mutex<Connection>>`.
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Journeys currently wired for tracking.
    pub registry: Arc<TrackingRegistry>,

    pub forwarder: Arc<ConversionForwarder>,

    pub conversions: ConversionTracker,

    /// Kept for inspection; also owned by `forwarder` when enabled.
    pub data_layer: Arc<DataLayerSink>,

    pub pixel: Arc<PixelSink>,
}

impl AppState {
    /// Construct a new `AppState` wrapping the given backend and config.
    pub fn new(db: DuckDbBackend, config: Config) -> anyhow::Result<Self> {
        let db = Arc::new(db);
        let events = Arc::clone(&db) as Arc<dyn TrackingEventStore>;
        let (forwarder, data_layer, pixel) = ConversionForwarder::from_config(
            &config.sinks,
            Arc::clone(&events),
            Arc::new(SessionAttributionStore::with_limits(
                config.sessions.max_sessions,
                config.sessions.ttl(),
            )),
        )?;
        let forwarder = Arc::new(forwarder);

        Ok(Self {
            conversions: ConversionTracker::new(Arc::clone(&forwarder), events),
            db,
            config: Arc::new(config),
            registry: Arc::new(TrackingRegistry::new()),
            forwarder,
            data_layer,
            pixel,
        })
    }

    pub fn attribution(&self) -> &SessionAttributionStore {
        self.forwarder.attribution()
    }

    /// Bring the registry in line with a journey that was just written.
    pub fn sync_registration(&self, journey: &Journey) {
        if let Some(outcome) = self.registry.refresh(journey) {
            info!(journey_id = %journey.id, outcome = ?outcome, "Journey registration refreshed");
        }
    }

    /// Startup registration pass, run once after the configured delay.
    pub async fn run_startup_registration(self: Arc<Self>) {
        let count = bootstrap::initialize_after_delay(
            &*self.db,
            &self.registry,
            self.config.registration_delay(),
        )
        .await;
        info!(registered = count, "Startup journey registration finished");
    }
}
