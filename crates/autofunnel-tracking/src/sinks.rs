//! Conversion sinks: the tag-manager data layer, the ad-pixel bridge, and the
//! persistent event ledger.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use autofunnel_core::event::{Attribution, CanonicalEvent, TrackingContext, TrackingEvent};
use autofunnel_core::store::TrackingEventStore;

/// Meta pixel standard event names. Anything else goes out as a custom event.
const STANDARD_PIXEL_EVENTS: &[&str] = &[
    "PageView",
    "ViewContent",
    "Lead",
    "CompleteRegistration",
    "InitiateCheckout",
    "Purchase",
    "AddToCart",
    "AddPaymentInfo",
    "AddToWishlist",
    "Contact",
    "CustomizeProduct",
    "Donate",
    "FindLocation",
    "Schedule",
    "Search",
    "StartTrial",
    "SubmitApplication",
    "Subscribe",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    DataLayer,
    Pixel,
    EventLog,
}

/// An event as handed to every sink: the canonical event plus who/where and
/// the session's attribution.
#[derive(Debug, Clone)]
pub struct ForwardedEvent {
    pub event: CanonicalEvent,
    pub context: TrackingContext,
    pub attribution: Attribution,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ConversionSink: Send + Sync {
    fn kind(&self) -> SinkKind;

    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &ForwardedEvent) -> anyhow::Result<()>;
}

/// Records kept by an in-process queue when no capacity is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Fixed-size queue. Once full, each push drops the oldest entry.
struct RingBuffer<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
}

impl<T: Clone> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY))),
        }
    }

    /// Returns the entry evicted to make room, if any.
    fn push(&self, item: T) -> Option<T> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        evicted
    }

    /// Oldest first.
    fn snapshot(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Tag-manager queue holding the most recent records.
pub struct DataLayerSink {
    container_id: Option<String>,
    records: RingBuffer<Map<String, Value>>,
}

impl Default for DataLayerSink {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DataLayerSink {
    pub fn new(container_id: Option<String>) -> Self {
        Self::with_capacity(container_id, DEFAULT_QUEUE_CAPACITY)
    }

    /// A zero capacity is raised to one.
    pub fn with_capacity(container_id: Option<String>, capacity: usize) -> Self {
        Self {
            container_id,
            records: RingBuffer::new(capacity),
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity
    }

    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.records.snapshot()
    }
}

/// `{event, eventName, eventType, ...metadata, ...attribution, timestamp}`;
/// later keys overwrite earlier ones.
pub fn data_layer_record(forwarded: &ForwardedEvent) -> Map<String, Value> {
    let event = &forwarded.event;
    let mut record = Map::new();
    record.insert("event".to_string(), event.data_layer_name().into());
    record.insert("eventName".to_string(), event.event_name.clone().into());
    record.insert("eventType".to_string(), event.event_type.as_str().into());
    record.extend(event.metadata.clone());
    record.extend(forwarded.attribution.to_map());
    record.insert(
        "timestamp".to_string(),
        forwarded
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .into(),
    );
    record
}

#[async_trait]
impl ConversionSink for DataLayerSink {
    fn kind(&self) -> SinkKind {
        SinkKind::DataLayer
    }

    fn name(&self) -> &'static str {
        "data_layer"
    }

    async fn deliver(&self, event: &ForwardedEvent) -> anyhow::Result<()> {
        let record = data_layer_record(event);
        debug!(event = ?record.get("event"), "Data layer push");
        if let Some(evicted) = self.records.push(record) {
            debug!(event = ?evicted.get("event"), "Data layer full, oldest record dropped");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelAction {
    #[serde(rename = "track")]
    Track,
    #[serde(rename = "trackCustom")]
    TrackCustom,
}

/// One pixel invocation: `fbq(action, event, payload)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixelCall {
    pub action: PixelAction,
    pub event: String,
    pub payload: Map<String, Value>,
}

/// Map internal event types onto Meta standard events where one exists.
pub fn pixel_event_name(event_type: &str) -> &str {
    match event_type {
        "InitialRegistration" => "CompleteRegistration",
        "LeadComplete" => "Lead",
        "ApplicationSubmission" => "SubmitApplication",
        "ComienzaSolicitud" => "InitiateCheckout",
        "PersonalInformationComplete" => "CompleteRegistration",
        "ConversionLandingPage" => "Lead",
        other => other,
    }
}

pub fn pixel_call(forwarded: &ForwardedEvent) -> PixelCall {
    let event = pixel_event_name(forwarded.event.event_type.as_str()).to_string();
    let action = if STANDARD_PIXEL_EVENTS.contains(&event.as_str()) {
        PixelAction::Track
    } else {
        PixelAction::TrackCustom
    };

    let mut payload = Map::new();
    payload.insert(
        "content_name".to_string(),
        forwarded.event.event_name.clone().into(),
    );
    if let Some(url) = &forwarded.context.page_url {
        payload.insert("event_source_url".to_string(), url.clone().into());
    }
    payload.extend(forwarded.event.metadata.clone());
    payload.extend(forwarded.attribution.to_map());

    PixelCall {
        action,
        event,
        payload,
    }
}

enum PixelTarget {
    /// The most recent calls are kept in process, in order.
    Queue(RingBuffer<PixelCall>),
    /// Calls are POSTed as JSON to a collector endpoint.
    Http {
        client: reqwest::Client,
        endpoint: String,
        pixel_id: Option<String>,
    },
}

pub struct PixelSink {
    target: PixelTarget,
}

impl PixelSink {
    pub fn queue() -> Self {
        Self::bounded_queue(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn bounded_queue(capacity: usize) -> Self {
        Self {
            target: PixelTarget::Queue(RingBuffer::new(capacity)),
        }
    }

    pub fn http(client: reqwest::Client, endpoint: String, pixel_id: Option<String>) -> Self {
        Self {
            target: PixelTarget::Http {
                client,
                endpoint,
                pixel_id,
            },
        }
    }

    /// Calls recorded by a queue target; always empty for HTTP targets.
    pub fn calls(&self) -> Vec<PixelCall> {
        match &self.target {
            PixelTarget::Queue(calls) => calls.snapshot(),
            PixelTarget::Http { .. } => Vec::new(),
        }
    }
}

#[async_trait]
impl ConversionSink for PixelSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Pixel
    }

    fn name(&self) -> &'static str {
        "pixel"
    }

    async fn deliver(&self, event: &ForwardedEvent) -> anyhow::Result<()> {
        let call = pixel_call(event);
        match &self.target {
            PixelTarget::Queue(calls) => {
                debug!(action = ?call.action, event = %call.event, "Pixel call queued");
                if let Some(evicted) = calls.push(call) {
                    debug!(event = %evicted.event, "Pixel queue full, oldest call dropped");
                }
            }
            PixelTarget::Http {
                client,
                endpoint,
                pixel_id,
            } => {
                client
                    .post(endpoint)
                    .json(&json!({
                        "pixel_id": pixel_id,
                        "action": call.action,
                        "event": call.event,
                        "payload": call.payload,
                    }))
                    .send()
                    .await?
                    .error_for_status()?;
                debug!(event = %call.event, endpoint = %endpoint, "Pixel call sent");
            }
        }
        Ok(())
    }
}

/// Writes every forwarded event to the `tracking_events` ledger.
pub struct EventLogSink {
    store: Arc<dyn TrackingEventStore>,
}

impl EventLogSink {
    pub fn new(store: Arc<dyn TrackingEventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ConversionSink for EventLogSink {
    fn kind(&self) -> SinkKind {
        SinkKind::EventLog
    }

    fn name(&self) -> &'static str {
        "event_log"
    }

    async fn deliver(&self, event: &ForwardedEvent) -> anyhow::Result<()> {
        let mut row = TrackingEvent::from_canonical(&event.event, &event.context, &event.attribution);
        row.created_at = event.timestamp;
        self.store.insert_tracking_event(&row).await
    }
}
