use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use autofunnel_core::config::SinkConfig;
use autofunnel_core::event::{CanonicalEvent, TrackingContext};
use autofunnel_core::journey::Journey;
use autofunnel_core::store::TrackingEventStore;

use crate::attribution::SessionAttributionStore;
use crate::sinks::{
    ConversionSink, DataLayerSink, EventLogSink, ForwardedEvent, PixelSink, SinkKind,
};

/// Which sinks an event may reach. Per-journey flags turn off the tag
/// manager and pixel; the event ledger is always written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkSelection {
    #[serde(default = "default_true")]
    pub data_layer: bool,
    #[serde(default = "default_true")]
    pub pixel: bool,
    #[serde(default = "default_true")]
    pub event_log: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SinkSelection {
    fn default() -> Self {
        Self {
            data_layer: true,
            pixel: true,
            event_log: true,
        }
    }
}

impl SinkSelection {
    pub fn for_journey(journey: &Journey) -> Self {
        Self {
            data_layer: journey.gtm_enabled,
            pixel: journey.facebook_pixel_enabled,
            event_log: true,
        }
    }

    pub fn allows(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::DataLayer => self.data_layer,
            SinkKind::Pixel => self.pixel,
            SinkKind::EventLog => self.event_log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkFailure {
    pub sink: &'static str,
    pub error: String,
}

/// What happened to one forwarded event, per sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    pub event_type: String,
    pub event_name: String,
    pub session_id: String,
    pub delivered: Vec<&'static str>,
    pub failed: Vec<SinkFailure>,
    pub skipped: Vec<&'static str>,
}

impl ForwardReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fans one canonical event out to every selected sink.
///
/// Sinks run concurrently and each one fails on its own: an error is logged
/// and reported, never propagated to the caller and never short-circuits the
/// other sinks.
pub struct ConversionForwarder {
    sinks: Vec<Arc<dyn ConversionSink>>,
    attribution: Arc<SessionAttributionStore>,
}

impl ConversionForwarder {
    pub fn new(attribution: Arc<SessionAttributionStore>) -> Self {
        Self {
            sinks: Vec::new(),
            attribution,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ConversionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Build the configured sinks in data layer, pixel, event log order.
    ///
    /// The concrete data layer and pixel sinks are returned alongside so the
    /// caller can inspect their queues.
    pub fn from_config(
        config: &SinkConfig,
        events: Arc<dyn TrackingEventStore>,
        attribution: Arc<SessionAttributionStore>,
    ) -> anyhow::Result<(Self, Arc<DataLayerSink>, Arc<PixelSink>)> {
        let data_layer = Arc::new(DataLayerSink::with_capacity(
            config.gtm_container_id.clone(),
            config.queue_capacity,
        ));
        let pixel = Arc::new(match &config.pixel_endpoint {
            Some(endpoint) => PixelSink::http(
                reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(5))
                    .build()?,
                endpoint.clone(),
                config.pixel_id.clone(),
            ),
            None => PixelSink::bounded_queue(config.queue_capacity),
        });

        let mut forwarder = Self::new(attribution);
        if config.data_layer_enabled {
            forwarder = forwarder.with_sink(Arc::clone(&data_layer) as Arc<dyn ConversionSink>);
        }
        if config.pixel_enabled {
            forwarder = forwarder.with_sink(Arc::clone(&pixel) as Arc<dyn ConversionSink>);
        }
        if config.event_log_enabled {
            forwarder = forwarder.with_sink(Arc::new(EventLogSink::new(events)));
        }
        info!(
            sinks = ?forwarder.sink_names(),
            pixel_endpoint = ?config.pixel_endpoint,
            "Conversion forwarder configured"
        );
        Ok((forwarder, data_layer, pixel))
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn attribution(&self) -> &Arc<SessionAttributionStore> {
        &self.attribution
    }

    pub async fn forward(
        &self,
        event: &CanonicalEvent,
        context: &TrackingContext,
        selection: SinkSelection,
    ) -> ForwardReport {
        let mut context = context.clone();
        if context.session_id.trim().is_empty() {
            context.session_id = uuid::Uuid::new_v4().to_string();
        }

        let forwarded = ForwardedEvent {
            event: event.clone(),
            attribution: self.attribution.load(&context.session_id),
            context,
            timestamp: Utc::now(),
        };

        let (selected, skipped): (Vec<_>, Vec<_>) = self
            .sinks
            .iter()
            .partition(|sink| selection.allows(sink.kind()));

        // join_all polls in order, so sinks that never await finish on the
        // first poll before any I/O-bound sink runs.
        let outcomes = join_all(selected.into_iter().map(|sink| {
            let forwarded = &forwarded;
            async move { (sink.name(), sink.deliver(forwarded).await) }
        }))
        .await;

        let mut report = ForwardReport {
            event_type: forwarded.event.event_type.as_str().to_string(),
            event_name: forwarded.event.event_name.clone(),
            session_id: forwarded.context.session_id.clone(),
            delivered: Vec::new(),
            failed: Vec::new(),
            skipped: skipped.into_iter().map(|s| s.name()).collect(),
        };

        for (sink, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    debug!(sink, event_type = %report.event_type, "Sink delivered");
                    report.delivered.push(sink);
                }
                Err(e) => {
                    warn!(
                        sink,
                        event_type = %report.event_type,
                        error = %e,
                        "Sink failed (isolated)"
                    );
                    report.failed.push(SinkFailure {
                        sink,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            event_type = %report.event_type,
            event_name = %report.event_name,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Conversion tracked"
        );
        report
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use autofunnel_core::event::TrackingEvent;
    use autofunnel_core::funnel::StepReach;

    use super::*;

    /// In-memory ledger; `fail` makes every insert error.
    #[derive(Default)]
    pub struct MemoryEventStore {
        pub events: Mutex<Vec<TrackingEvent>>,
        pub fail: bool,
    }

    #[async_trait]
    impl TrackingEventStore for MemoryEventStore {
        async fn insert_tracking_event(&self, event: &TrackingEvent) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("ledger unavailable");
            }
            self.events
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .push(event.clone());
            Ok(())
        }

        async fn has_tracking_event(&self, user_id: &str, event_type: &str) -> anyhow::Result<bool> {
            Ok(self
                .events
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned"))?
                .iter()
                .any(|e| e.user_id.as_deref() == Some(user_id) && e.event_type == event_type))
        }

        async fn journey_step_reach(&self, _journey_id: &str) -> anyhow::Result<Vec<StepReach>> {
            Ok(Vec::new())
        }
    }
}
