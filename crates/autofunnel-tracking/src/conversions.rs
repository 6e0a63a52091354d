//! Named conversion presets for the dealership funnel.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use autofunnel_core::event::{CanonicalEvent, TrackingContext};
use autofunnel_core::journey::EventType;
use autofunnel_core::store::TrackingEventStore;

use crate::forwarder::{ConversionForwarder, ForwardReport, SinkSelection};

const APPLICATION_PAGE: &str = "/escritorio/aplicacion";
const LANDING_PAGE: &str = "/financiamientos";
const CURRENCY: &str = "MXN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionPreset {
    Registration,
    Lead,
    LandingPage,
    PageView,
    ViewContent,
    FormSubmission,
    ApplicationStarted,
    ApplicationSubmitted,
    PersonalInformation,
    BankProfiling,
    InitialRegistration,
}

impl FromStr for ConversionPreset {
    type Err = ConversionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(raw.to_string()))
            .map_err(|_| ConversionError::UnknownPreset(raw.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("unknown conversion preset: {0}")]
    UnknownPreset(String),

    #[error("{0} is required for this conversion")]
    MissingField(&'static str),
}

/// Caller input for a preset: who, free-form metadata, and the one or two
/// preset-specific labels (form name, content name, bank, sign-in method).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversionRequest {
    #[serde(flatten)]
    pub context: TrackingContext,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ConversionRequest {
    fn label(&self, field: &'static str) -> Result<&str, ConversionError> {
        self.label
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ConversionError::MissingField(field))
    }

    fn page_path(&self) -> Option<String> {
        let url = self.context.page_url.as_deref()?;
        let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
        let path = without_scheme
            .find('/')
            .map_or("/", |idx| &without_scheme[idx..]);
        Some(path.split(['?', '#']).next().unwrap_or("/").to_string())
    }
}

fn completed(mut metadata: Map<String, Value>, page: &str, content_name: &str) -> Map<String, Value> {
    metadata.insert("page".to_string(), page.into());
    metadata.insert("content_name".to_string(), content_name.into());
    metadata.insert("status".to_string(), "completed".into());
    metadata
}

pub struct ConversionTracker {
    forwarder: Arc<ConversionForwarder>,
    events: Arc<dyn TrackingEventStore>,
}

impl ConversionTracker {
    pub fn new(forwarder: Arc<ConversionForwarder>, events: Arc<dyn TrackingEventStore>) -> Self {
        Self { forwarder, events }
    }

    async fn send(
        &self,
        context: &TrackingContext,
        event_type: EventType,
        event_name: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> ForwardReport {
        let event = CanonicalEvent {
            event_type,
            event_name: event_name.into(),
            metadata,
        };
        self.forwarder
            .forward(&event, context, SinkSelection::default())
            .await
    }

    pub async fn track(
        &self,
        preset: ConversionPreset,
        request: ConversionRequest,
    ) -> Result<Vec<ForwardReport>, ConversionError> {
        let page = request.page_path();
        let context = &request.context;
        let mut metadata = request.metadata.clone();

        let report = match preset {
            ConversionPreset::Registration => {
                if let Some(page) = page {
                    metadata.insert("page".to_string(), page.into());
                }
                self.send(context, EventType::CompleteRegistration, "User Registration Complete", metadata)
                    .await
            }
            ConversionPreset::Lead => {
                if let Some(page) = page {
                    metadata.insert("page".to_string(), page.into());
                }
                self.send(context, EventType::Lead, "Lead Captured", metadata)
                    .await
            }
            ConversionPreset::LandingPage => {
                let metadata = completed(metadata, LANDING_PAGE, "Conversion Landing Page");
                self.send(context, EventType::ConversionLandingPage, "Conversion Landing Page", metadata)
                    .await
            }
            ConversionPreset::PageView => {
                let name = request
                    .label
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .or_else(|| page.clone())
                    .unwrap_or_else(|| "Page View".to_string());
                if let Some(url) = &context.page_url {
                    metadata.insert("url".to_string(), url.clone().into());
                }
                if let Some(page) = page {
                    metadata.insert("path".to_string(), page.into());
                }
                self.send(context, EventType::PageView, name, metadata).await
            }
            ConversionPreset::ViewContent => {
                let content_name = request.label("label")?;
                let content_type = request
                    .content_type
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or(ConversionError::MissingField("content_type"))?;
                metadata.insert("contentName".to_string(), content_name.into());
                metadata.insert("contentType".to_string(), content_type.into());
                if let Some(page) = page {
                    metadata.insert("page".to_string(), page.into());
                }
                self.send(
                    context,
                    EventType::ViewContent,
                    format!("View {content_type}: {content_name}"),
                    metadata,
                )
                .await
            }
            ConversionPreset::FormSubmission => {
                let form_name = request.label("label")?;
                metadata.insert("formName".to_string(), form_name.into());
                if let Some(page) = page {
                    metadata.insert("page".to_string(), page.into());
                }
                self.send(context, EventType::Lead, format!("Form Submitted: {form_name}"), metadata)
                    .await
            }
            ConversionPreset::ApplicationStarted => {
                metadata.insert("page".to_string(), APPLICATION_PAGE.into());
                metadata.insert("applicationStage".to_string(), "started".into());
                metadata.insert("content_name".to_string(), "Comienza Solicitud".into());
                metadata.insert("status".to_string(), "started".into());
                self.send(context, EventType::ApplicationStarted, "Comienza Solicitud", metadata)
                    .await
            }
            ConversionPreset::ApplicationSubmitted => {
                return self.application_submitted(context, metadata).await;
            }
            ConversionPreset::PersonalInformation => {
                let metadata = completed(metadata, "/escritorio/profile", "Personal Information Complete");
                self.send(
                    context,
                    EventType::PersonalInformationComplete,
                    "Personal Information Complete",
                    metadata,
                )
                .await
            }
            ConversionPreset::BankProfiling => {
                let bank = request.label("label")?;
                metadata.insert("recommendedBank".to_string(), bank.into());
                let metadata = completed(
                    metadata,
                    "/escritorio/perfilacion-bancaria",
                    "Perfilacion Bancaria Complete",
                );
                self.send(
                    context,
                    EventType::BankProfilingComplete,
                    "Perfilacion Bancaria Complete",
                    metadata,
                )
                .await
            }
            ConversionPreset::InitialRegistration => {
                let method = request.label("label").unwrap_or("email_otp");
                metadata.insert("method".to_string(), method.into());
                if let Some(user_id) = &context.user_id {
                    metadata.insert("userId".to_string(), user_id.clone().into());
                }
                let metadata = completed(metadata, "/acceder", "Initial Registration");
                self.send(context, EventType::InitialRegistration, "Initial Registration", metadata)
                    .await
            }
        };
        Ok(vec![report])
    }

    /// Always records `ApplicationSubmission`; adds `LeadComplete` only for
    /// users who earlier converted on the landing page.
    async fn application_submitted(
        &self,
        context: &TrackingContext,
        metadata: Map<String, Value>,
    ) -> Result<Vec<ForwardReport>, ConversionError> {
        let Some(user_id) = context.user_id.as_deref() else {
            warn!("ApplicationSubmission not tracked: no user id");
            return Err(ConversionError::MissingField("user_id"));
        };

        let from_landing_page = match self
            .events
            .has_tracking_event(user_id, EventType::ConversionLandingPage.as_str())
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to check for landing page conversion");
                false
            }
        };

        let value = metadata.get("vehiclePrice").cloned().unwrap_or(json!(0));
        let submission_metadata = |content_name: &str| {
            let mut m = metadata.clone();
            m.insert("page".to_string(), APPLICATION_PAGE.into());
            m.insert("applicationStage".to_string(), "submitted".into());
            m.insert("value".to_string(), value.clone());
            m.insert("currency".to_string(), CURRENCY.into());
            m.insert("content_name".to_string(), content_name.into());
            m.insert("status".to_string(), "completed".into());
            m.insert("from_landing_page".to_string(), from_landing_page.into());
            m
        };

        let mut reports = vec![
            self.send(
                context,
                EventType::ApplicationSubmission,
                "Application Submission",
                submission_metadata("Application Submission"),
            )
            .await,
        ];

        if from_landing_page {
            reports.push(
                self.send(
                    context,
                    EventType::LeadComplete,
                    "Lead Complete",
                    submission_metadata("Lead Complete"),
                )
                .await,
            );
            info!(user_id, "LeadComplete tracked for landing page user");
        } else {
            info!(user_id, "LeadComplete skipped: no landing page conversion");
        }
        Ok(reports)
    }
}
