use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::journey::EventType;

/// The normalized (type, name, metadata) triple emitted when a step fires,
/// before any sink-specific formatting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event_type: EventType,
    pub event_name: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CanonicalEvent {
    pub fn new(event_type: EventType, event_name: impl Into<String>) -> Self {
        Self {
            event_type,
            event_name: event_name.into(),
            metadata: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: &Map<String, Value>) -> Self {
        for (key, value) in metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        self
    }

    /// `"Lead Captured"` -> `"lead_captured"`, the tag-manager event key.
    pub fn data_layer_name(&self) -> String {
        self.event_name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .to_lowercase()
    }
}

/// Who and where an event happened, supplied by the caller of the forwarder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingContext {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
}

/// Campaign and click-id data captured once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbclid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gclid: Option<String>,
}

impl Attribution {
    /// Read utm parameters and click ids from a landing URL's query string.
    ///
    /// Returns `None` for an unparseable URL. Empty values are dropped.
    pub fn from_landing_url(landing_url: &str, referrer: Option<&str>) -> Option<Self> {
        let parsed = url::Url::parse(landing_url).ok()?;
        let mut attribution = Attribution {
            referrer: referrer
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            ..Attribution::default()
        };
        for (key, value) in parsed.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "utm_source" => &mut attribution.utm_source,
                "utm_medium" => &mut attribution.utm_medium,
                "utm_campaign" => &mut attribution.utm_campaign,
                "utm_term" => &mut attribution.utm_term,
                "utm_content" => &mut attribution.utm_content,
                "fbclid" => &mut attribution.fbclid,
                "gclid" => &mut attribution.gclid,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.to_string());
            }
        }
        Some(attribution)
    }

    pub fn is_empty(&self) -> bool {
        *self == Attribution::default()
    }

    /// Attribution fields as a flat JSON object, omitting absent ones.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// One row of the append-only `tracking_events` ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: String,
    pub event_name: String,
    pub event_type: String,
    pub user_id: Option<String>,
    pub session_id: String,
    pub metadata: Map<String, Value>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub page_url: Option<String>,
    pub referrer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn from_canonical(
        event: &CanonicalEvent,
        context: &TrackingContext,
        attribution: &Attribution,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_name: event.event_name.clone(),
            event_type: event.event_type.as_str().to_string(),
            user_id: context.user_id.clone(),
            session_id: context.session_id.clone(),
            metadata: event.metadata.clone(),
            utm_source: attribution.utm_source.clone(),
            utm_medium: attribution.utm_medium.clone(),
            utm_campaign: attribution.utm_campaign.clone(),
            utm_term: attribution.utm_term.clone(),
            utm_content: attribution.utm_content.clone(),
            page_url: context.page_url.clone(),
            referrer: attribution.referrer.clone(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_layer_name_is_snake_cased() {
        let event = CanonicalEvent::new(EventType::Lead, "Form Submitted:  credit app");
        assert_eq!(event.data_layer_name(), "form_submitted:_credit_app");
        let event = CanonicalEvent::new(EventType::Lead, "Lead Captured");
        assert_eq!(event.data_layer_name(), "lead_captured");
    }

    #[test]
    fn attribution_is_read_from_landing_url() {
        let attribution = Attribution::from_landing_url(
            "https://example.mx/financiamientos?utm_source=facebook&utm_medium=cpc&utm_campaign=otono&fbclid=abc&utm_term=",
            Some("https://m.facebook.com/"),
        )
        .unwrap_or_default();
        assert_eq!(attribution.utm_source.as_deref(), Some("facebook"));
        assert_eq!(attribution.utm_medium.as_deref(), Some("cpc"));
        assert_eq!(attribution.utm_campaign.as_deref(), Some("otono"));
        assert_eq!(attribution.utm_term, None);
        assert_eq!(attribution.fbclid.as_deref(), Some("abc"));
        assert_eq!(attribution.referrer.as_deref(), Some("https://m.facebook.com/"));

        let map = attribution.to_map();
        assert_eq!(map.get("utm_source"), Some(&Value::from("facebook")));
        assert!(!map.contains_key("gclid"));
    }

    #[test]
    fn unparseable_landing_url_yields_none() {
        assert!(Attribution::from_landing_url("not a url", None).is_none());
    }

    #[test]
    fn tracking_event_copies_context_and_attribution() {
        let event = CanonicalEvent::new(EventType::LeadComplete, "Lead Complete").with("value", 250_000);
        let context = TrackingContext {
            session_id: "sess_1".to_string(),
            user_id: Some("user_1".to_string()),
            page_url: Some("/escritorio/aplicacion".to_string()),
        };
        let attribution = Attribution {
            utm_source: Some("google".to_string()),
            ..Attribution::default()
        };
        let row = TrackingEvent::from_canonical(&event, &context, &attribution);
        assert_eq!(row.event_type, "LeadComplete");
        assert_eq!(row.session_id, "sess_1");
        assert_eq!(row.user_id.as_deref(), Some("user_1"));
        assert_eq!(row.utm_source.as_deref(), Some("google"));
        assert_eq!(row.metadata.get("value"), Some(&Value::from(250_000)));
    }
}
