//! Google Tag Manager container export for a journey.
//!
//! The container uses placeholder account/container ids; the user imports it
//! into their own workspace and GTM rewrites them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::journey::{Journey, StepSelector, TriggerType};

const ACCOUNT_ID: &str = "ACCOUNT_ID";
const CONTAINER_ID: &str = "CONTAINER_ID";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GtmParameter {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
    pub value: String,
}

impl GtmParameter {
    fn template(key: &str, value: impl Into<String>) -> Self {
        Self {
            kind: "template".to_string(),
            key: key.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GtmCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub parameter: Vec<GtmParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GtmTrigger {
    pub account_id: String,
    pub container_id: String,
    pub trigger_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<GtmCondition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_event_filter: Option<Vec<GtmCondition>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GtmTag {
    pub account_id: String,
    pub container_id: String,
    pub tag_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub parameter: Vec<GtmParameter>,
    pub firing_trigger_id: Vec<String>,
    pub tag_firing_option: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GtmContainerVersion {
    pub path: String,
    pub account_id: String,
    pub container_id: String,
    pub container_version_id: String,
    pub name: String,
    pub description: String,
    pub tag: Vec<GtmTag>,
    pub trigger: Vec<GtmTrigger>,
    pub variable: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GtmExport {
    pub export_format_version: u32,
    pub export_time: String,
    pub container_version: GtmContainerVersion,
}

fn gtm_trigger_type(trigger_type: TriggerType) -> &'static str {
    match trigger_type {
        TriggerType::Pageview => "pageview",
        TriggerType::ButtonClick => "click",
        TriggerType::FormSubmit => "formSubmission",
        TriggerType::Custom => "customEvent",
        _ => "pageview",
    }
}

fn condition(kind: &str, arg0: &str, arg1: impl Into<String>) -> Vec<GtmCondition> {
    vec![GtmCondition {
        kind: kind.to_string(),
        parameter: vec![
            GtmParameter::template("arg0", arg0),
            GtmParameter::template("arg1", arg1),
        ],
    }]
}

fn event_parameter(name: &str, value: &str) -> Value {
    json!({
        "type": "map",
        "map": [
            { "type": "template", "key": "name", "value": name },
            { "type": "template", "key": "value", "value": value }
        ]
    })
}

/// Build one trigger and one GA4 event tag per step.
pub fn export_journey_to_gtm(journey: &Journey, exported_at: DateTime<Utc>) -> GtmExport {
    let mut tags = Vec::with_capacity(journey.steps.len());
    let mut triggers = Vec::with_capacity(journey.steps.len());

    for step in &journey.steps {
        let trigger_id = format!("trigger_{}_step_{}", journey.id, step.step_order);
        let tag_id = format!("tag_{}_step_{}", journey.id, step.step_order);

        let filter = match step.trigger_type {
            TriggerType::Pageview => Some(condition("equals", "{{Page Path}}", &step.page_route)),
            TriggerType::ButtonClick => match step.selector() {
                Some(StepSelector::TextContains(text)) => {
                    Some(condition("contains", "{{Click Text}}", text))
                }
                Some(selector) => selector
                    .to_css()
                    .map(|css| condition("matchCssSelector", "{{Click Element}}", css)),
                None => None,
            },
            TriggerType::FormSubmit => {
                Some(condition("contains", "{{Page Path}}", &step.page_route))
            }
            _ => None,
        };
        let custom_event_filter = match step.trigger_type {
            TriggerType::Custom => Some(condition("equals", "{{_event}}", &step.event_name)),
            _ => None,
        };

        triggers.push(GtmTrigger {
            account_id: ACCOUNT_ID.to_string(),
            container_id: CONTAINER_ID.to_string(),
            trigger_id: trigger_id.clone(),
            name: format!("{} - {}", journey.name, step.step_name),
            kind: gtm_trigger_type(step.trigger_type).to_string(),
            filter,
            custom_event_filter,
        });

        let event_parameters = Value::Array(vec![
            event_parameter("event_category", "customer_journey"),
            event_parameter("journey_name", &journey.name),
            event_parameter("step_name", &step.step_name),
            event_parameter("step_order", &step.step_order.to_string()),
        ]);

        tags.push(GtmTag {
            account_id: ACCOUNT_ID.to_string(),
            container_id: CONTAINER_ID.to_string(),
            tag_id,
            name: format!("GA4 - {}", step.event_name),
            kind: "gaawe".to_string(),
            parameter: vec![
                GtmParameter::template("eventName", step.event_type.as_str()),
                GtmParameter::template("measurementId", "{{GA4 Measurement ID}}"),
                GtmParameter {
                    kind: "list".to_string(),
                    key: "eventParameters".to_string(),
                    value: event_parameters.to_string(),
                },
            ],
            firing_trigger_id: vec![trigger_id],
            tag_firing_option: "oncePerEvent".to_string(),
        });
    }

    GtmExport {
        export_format_version: 2,
        export_time: exported_at.to_rfc3339(),
        container_version: GtmContainerVersion {
            path: format!("accounts/{ACCOUNT_ID}/containers/{CONTAINER_ID}/versions/0"),
            account_id: ACCOUNT_ID.to_string(),
            container_id: CONTAINER_ID.to_string(),
            container_version_id: "0".to_string(),
            name: format!("{} - Customer Journey", journey.name),
            description: format!(
                "Auto-generated GTM configuration for {} customer journey. Created on {}.",
                journey.name,
                exported_at.format("%Y-%m-%d")
            ),
            tag: tags,
            trigger: triggers,
            variable: Vec::new(),
        },
    }
}

/// Flat description of a journey's events for manual implementation.
pub fn export_journey_events(journey: &Journey) -> Value {
    let events: Vec<Value> = journey
        .steps
        .iter()
        .map(|step| {
            json!({
                "step_order": step.step_order,
                "step_name": step.step_name,
                "event_type": step.event_type.as_str(),
                "event_name": step.event_name,
                "page_route": step.page_route,
                "trigger_type": step.trigger_type.as_str(),
                "trigger_selector": step.selector().and_then(|s| s.to_css()),
                "description": step.step_description,
            })
        })
        .collect();

    json!({
        "journey_name": journey.name,
        "journey_route": journey.route,
        "landing_page": journey.landing_page,
        "description": journey.description,
        "events": events,
        "tracking_config": {
            "auto_tracking_enabled": journey.auto_tracking_enabled,
            "gtm_enabled": journey.gtm_enabled,
            "facebook_pixel_enabled": journey.facebook_pixel_enabled,
        }
    })
}

/// Download file name for an export, e.g. `gtm-credito-express-1700000000000.json`.
pub fn export_file_name(prefix: &str, journey: &Journey, exported_at: DateTime<Utc>) -> String {
    let slug = journey
        .name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    format!("{prefix}-{slug}-{}.json", exported_at.timestamp_millis())
}
