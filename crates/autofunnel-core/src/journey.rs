//! Customer journey definitions: journeys, their ordered steps, and the
//! rules for building and editing them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::JourneyError;

const MAX_NAME_LEN: usize = 100;
const MAX_ROUTE_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    #[default]
    Draft,
    Active,
    Paused,
}

impl JourneyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::Draft => "draft",
            JourneyStatus::Active => "active",
            JourneyStatus::Paused => "paused",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, JourneyError> {
        match raw {
            "draft" => Ok(JourneyStatus::Draft),
            "active" => Ok(JourneyStatus::Active),
            "paused" => Ok(JourneyStatus::Paused),
            other => Err(JourneyError::InvalidStoredValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }

    /// draft -> active <-> paused; nothing goes back to draft.
    pub fn can_transition_to(&self, next: JourneyStatus) -> bool {
        use JourneyStatus::*;
        matches!(
            (self, next),
            (Draft, Draft)
                | (Draft, Active)
                | (Active, Active)
                | (Active, Paused)
                | (Paused, Paused)
                | (Paused, Active)
        )
    }

    /// The status a toggle moves to. Drafts have no toggle target.
    pub fn toggled(&self) -> Option<JourneyStatus> {
        match self {
            JourneyStatus::Active => Some(JourneyStatus::Paused),
            JourneyStatus::Paused => Some(JourneyStatus::Active),
            JourneyStatus::Draft => None,
        }
    }
}

impl fmt::Display for JourneyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Pageview,
    ButtonClick,
    FormSubmit,
    Scroll,
    TimeOnPage,
    ElementVisible,
    VideoPlay,
    Custom,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Pageview => "pageview",
            TriggerType::ButtonClick => "button_click",
            TriggerType::FormSubmit => "form_submit",
            TriggerType::Scroll => "scroll",
            TriggerType::TimeOnPage => "time_on_page",
            TriggerType::ElementVisible => "element_visible",
            TriggerType::VideoPlay => "video_play",
            TriggerType::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, JourneyError> {
        match raw {
            "pageview" => Ok(TriggerType::Pageview),
            "button_click" => Ok(TriggerType::ButtonClick),
            "form_submit" => Ok(TriggerType::FormSubmit),
            "scroll" => Ok(TriggerType::Scroll),
            "time_on_page" => Ok(TriggerType::TimeOnPage),
            "element_visible" => Ok(TriggerType::ElementVisible),
            "video_play" => Ok(TriggerType::VideoPlay),
            "custom" => Ok(TriggerType::Custom),
            other => Err(JourneyError::InvalidStoredValue {
                column: "trigger_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonIdentifierType {
    TextContains,
    CssId,
    CssClass,
    CssSelector,
}

impl ButtonIdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ButtonIdentifierType::TextContains => "text_contains",
            ButtonIdentifierType::CssId => "css_id",
            ButtonIdentifierType::CssClass => "css_class",
            ButtonIdentifierType::CssSelector => "css_selector",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, JourneyError> {
        match raw {
            "text_contains" => Ok(ButtonIdentifierType::TextContains),
            "css_id" => Ok(ButtonIdentifierType::CssId),
            "css_class" => Ok(ButtonIdentifierType::CssClass),
            "css_selector" => Ok(ButtonIdentifierType::CssSelector),
            other => Err(JourneyError::InvalidStoredValue {
                column: "button_identifier_type",
                value: other.to_string(),
            }),
        }
    }
}

/// Conversion event types known to the forwarding sinks. Anything else is
/// carried through verbatim as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    PageView,
    ViewContent,
    CompleteRegistration,
    Lead,
    LeadComplete,
    InitialRegistration,
    ConversionLandingPage,
    PersonalInformationComplete,
    BankProfilingComplete,
    ApplicationStarted,
    ApplicationSubmission,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::PageView => "PageView",
            EventType::ViewContent => "ViewContent",
            EventType::CompleteRegistration => "CompleteRegistration",
            EventType::Lead => "Lead",
            EventType::LeadComplete => "LeadComplete",
            EventType::InitialRegistration => "InitialRegistration",
            EventType::ConversionLandingPage => "ConversionLandingPage",
            EventType::PersonalInformationComplete => "PersonalInformationComplete",
            EventType::BankProfilingComplete => "PerfilacionBancariaComplete",
            EventType::ApplicationStarted => "ComienzaSolicitud",
            EventType::ApplicationSubmission => "ApplicationSubmission",
            EventType::Custom(raw) => raw.as_str(),
        }
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "PageView" => EventType::PageView,
            "ViewContent" => EventType::ViewContent,
            "CompleteRegistration" => EventType::CompleteRegistration,
            "Lead" => EventType::Lead,
            "LeadComplete" => EventType::LeadComplete,
            "InitialRegistration" => EventType::InitialRegistration,
            "ConversionLandingPage" => EventType::ConversionLandingPage,
            "PersonalInformationComplete" => EventType::PersonalInformationComplete,
            "PerfilacionBancariaComplete" => EventType::BankProfilingComplete,
            "ComienzaSolicitud" => EventType::ApplicationStarted,
            "ApplicationSubmission" => EventType::ApplicationSubmission,
            _ => EventType::Custom(raw),
        }
    }
}

impl From<&str> for EventType {
    fn from(raw: &str) -> Self {
        EventType::from(raw.to_string())
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Custom(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a button-click step locates its target elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepSelector {
    Css(String),
    Id(String),
    Class(String),
    TextContains(String),
}

impl StepSelector {
    /// Prefer the explicit identifier pair; fall back to the raw selector.
    pub fn resolve(
        identifier_type: Option<ButtonIdentifierType>,
        identifier: Option<&str>,
        trigger_selector: Option<&str>,
    ) -> Option<Self> {
        let identifier = identifier.map(str::trim).filter(|v| !v.is_empty());
        if let (Some(kind), Some(value)) = (identifier_type, identifier) {
            let value = value.to_string();
            return Some(match kind {
                ButtonIdentifierType::TextContains => StepSelector::TextContains(value),
                ButtonIdentifierType::CssId => {
                    StepSelector::Id(value.trim_start_matches('#').to_string())
                }
                ButtonIdentifierType::CssClass => {
                    StepSelector::Class(value.trim_start_matches('.').to_string())
                }
                ButtonIdentifierType::CssSelector => StepSelector::Css(value),
            });
        }
        trigger_selector
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| StepSelector::Css(v.to_string()))
    }

    /// CSS form of the selector; text matching has none.
    pub fn to_css(&self) -> Option<String> {
        match self {
            StepSelector::Css(raw) => Some(raw.clone()),
            StepSelector::Id(id) => Some(format!("#{id}")),
            StepSelector::Class(class) => Some(format!(".{class}")),
            StepSelector::TextContains(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneyStep {
    pub id: String,
    pub journey_id: String,
    pub step_order: u32,
    pub step_name: String,
    pub step_description: Option<String>,
    pub page_route: String,
    pub page_title: Option<String>,
    pub event_type: EventType,
    pub event_name: String,
    pub event_description: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_selector: Option<String>,
    pub trigger_conditions: Map<String, Value>,
    pub event_metadata: Map<String, Value>,
    pub button_identifier_type: Option<ButtonIdentifierType>,
    pub button_identifier: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JourneyStep {
    pub fn selector(&self) -> Option<StepSelector> {
        StepSelector::resolve(
            self.button_identifier_type,
            self.button_identifier.as_deref(),
            self.trigger_selector.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub id: String,
    pub name: String,
    pub route: String,
    pub landing_page: String,
    pub description: Option<String>,
    pub status: JourneyStatus,
    pub auto_tracking_enabled: bool,
    pub gtm_enabled: bool,
    pub facebook_pixel_enabled: bool,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub steps: Vec<JourneyStep>,
}

impl Journey {
    pub fn is_active(&self) -> bool {
        self.status == JourneyStatus::Active
    }

    /// Active journeys with auto tracking are the ones the startup pass wires up.
    pub fn should_auto_track(&self) -> bool {
        self.is_active() && self.auto_tracking_enabled
    }
}

/// A step as submitted by an editor, before it belongs to a stored journey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStep {
    #[serde(default)]
    pub step_order: Option<u32>,
    pub step_name: String,
    #[serde(default)]
    pub step_description: Option<String>,
    pub page_route: String,
    #[serde(default)]
    pub page_title: Option<String>,
    pub event_type: EventType,
    pub event_name: String,
    #[serde(default)]
    pub event_description: Option<String>,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_selector: Option<String>,
    #[serde(default)]
    pub trigger_conditions: Map<String, Value>,
    #[serde(default)]
    pub event_metadata: Map<String, Value>,
    #[serde(default)]
    pub button_identifier_type: Option<ButtonIdentifierType>,
    #[serde(default)]
    pub button_identifier: Option<String>,
}

impl NewStep {
    /// A page-view step with defaults for everything optional.
    pub fn pageview(
        step_name: impl Into<String>,
        page_route: impl Into<String>,
        event_type: EventType,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            step_order: None,
            step_name: step_name.into(),
            step_description: None,
            page_route: page_route.into(),
            page_title: None,
            event_type,
            event_name: event_name.into(),
            event_description: None,
            trigger_type: TriggerType::Pageview,
            trigger_selector: None,
            trigger_conditions: Map::new(),
            event_metadata: Map::new(),
            button_identifier_type: None,
            button_identifier: None,
        }
    }

    pub fn with_trigger(mut self, trigger_type: TriggerType) -> Self {
        self.trigger_type = trigger_type;
        self
    }

    pub fn with_button(mut self, kind: ButtonIdentifierType, identifier: impl Into<String>) -> Self {
        self.trigger_type = TriggerType::ButtonClick;
        self.button_identifier_type = Some(kind);
        self.button_identifier = Some(identifier.into());
        self
    }

    pub fn selector(&self) -> Option<StepSelector> {
        StepSelector::resolve(
            self.button_identifier_type,
            self.button_identifier.as_deref(),
            self.trigger_selector.as_deref(),
        )
    }

    pub fn validate(&self) -> Result<(), JourneyError> {
        if self.step_name.trim().is_empty() {
            return Err(JourneyError::validation(
                "step_name",
                "step name must not be empty",
            ));
        }
        if self.page_route.trim().is_empty() {
            return Err(JourneyError::validation(
                "page_route",
                "page route must not be empty",
            ));
        }
        if self.page_route.len() > MAX_ROUTE_LEN {
            return Err(JourneyError::validation(
                "page_route",
                format!("page route must be {MAX_ROUTE_LEN} characters or fewer"),
            ));
        }
        if self.event_name.trim().is_empty() {
            return Err(JourneyError::validation(
                "event_name",
                "event name must not be empty",
            ));
        }
        if self.event_type.as_str().trim().is_empty() {
            return Err(JourneyError::validation(
                "event_type",
                "event type must not be empty",
            ));
        }
        if self.trigger_type == TriggerType::ButtonClick && self.selector().is_none() {
            let field = if self.button_identifier_type.is_some() {
                "button_identifier"
            } else {
                "trigger_selector"
            };
            return Err(JourneyError::validation(
                field,
                "button click steps need an identifier value",
            ));
        }
        Ok(())
    }
}

pub fn validate_steps(steps: &[NewStep]) -> Result<(), JourneyError> {
    for step in steps {
        step.validate()?;
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), JourneyError> {
    if name.trim().is_empty() {
        return Err(JourneyError::validation("name", "name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(JourneyError::validation(
            "name",
            format!("name must be {MAX_NAME_LEN} characters or fewer"),
        ));
    }
    Ok(())
}

fn validate_route(field: &'static str, route: &str) -> Result<(), JourneyError> {
    if route.trim().is_empty() {
        return Err(JourneyError::validation(field, "route must not be empty"));
    }
    if route.len() > MAX_ROUTE_LEN {
        return Err(JourneyError::validation(
            field,
            format!("route must be {MAX_ROUTE_LEN} characters or fewer"),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJourney {
    pub name: String,
    pub route: String,
    #[serde(default)]
    pub landing_page: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<JourneyStatus>,
    #[serde(default)]
    pub auto_tracking_enabled: Option<bool>,
    #[serde(default)]
    pub gtm_enabled: Option<bool>,
    #[serde(default)]
    pub facebook_pixel_enabled: Option<bool>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewJourney {
    pub fn new(name: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route: route.into(),
            landing_page: None,
            description: None,
            status: None,
            auto_tracking_enabled: None,
            gtm_enabled: None,
            facebook_pixel_enabled: None,
            created_by: None,
        }
    }

    /// Landing route, defaulting to the primary route when left blank.
    pub fn landing_page_or_route(&self) -> String {
        self.landing_page
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.route.trim())
            .to_string()
    }

    pub fn validate(&self) -> Result<(), JourneyError> {
        validate_name(&self.name)?;
        validate_route("route", &self.route)?;
        if let Some(landing) = &self.landing_page {
            if landing.len() > MAX_ROUTE_LEN {
                return Err(JourneyError::validation(
                    "landing_page",
                    format!("route must be {MAX_ROUTE_LEN} characters or fewer"),
                ));
            }
        }
        Ok(())
    }
}

/// Body of a create request: journey columns plus its initial steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJourneyRequest {
    #[serde(flatten)]
    pub journey: NewJourney,
    #[serde(default)]
    pub steps: Vec<NewStep>,
}

/// Absent field is `None`, explicit `null` is `Some(None)`.
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update. `steps`, when present, replaces the whole step list.
///
/// An empty `landing_page` resets it to the route. `description: null`
/// clears the description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JourneyUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub landing_page: Option<String>,
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub status: Option<JourneyStatus>,
    #[serde(default)]
    pub auto_tracking_enabled: Option<bool>,
    #[serde(default)]
    pub gtm_enabled: Option<bool>,
    #[serde(default)]
    pub facebook_pixel_enabled: Option<bool>,
    #[serde(default)]
    pub steps: Option<Vec<NewStep>>,
}

impl JourneyUpdate {
    pub fn status(status: JourneyStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.route.is_none()
            && self.landing_page.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.auto_tracking_enabled.is_none()
            && self.gtm_enabled.is_none()
            && self.facebook_pixel_enabled.is_none()
            && self.steps.is_none()
    }

    pub fn validate(&self) -> Result<(), JourneyError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(route) = &self.route {
            validate_route("route", route)?;
        }
        if let Some(landing) = self.landing_page.as_deref().filter(|l| !l.trim().is_empty()) {
            validate_route("landing_page", landing)?;
        }
        if let Some(steps) = &self.steps {
            validate_steps(steps)?;
        }
        Ok(())
    }

    pub fn merged_route(&self, current: &Journey) -> String {
        self.route
            .as_deref()
            .map(str::trim)
            .unwrap_or(&current.route)
            .to_string()
    }

    /// A landing page that matched the old route keeps following the route.
    pub fn merged_landing_page(&self, current: &Journey) -> String {
        match self.landing_page.as_deref().map(str::trim) {
            Some("") => self.merged_route(current),
            Some(landing) => landing.to_string(),
            None if current.landing_page == current.route => self.merged_route(current),
            None => current.landing_page.clone(),
        }
    }

    /// Blank descriptions are stored as NULL.
    pub fn merged_description(&self, current: &Journey) -> Option<String> {
        match &self.description {
            None => current.description.clone(),
            Some(description) => description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        }
    }
}

/// An editable, always-contiguous list of steps.
///
/// Every mutation leaves `step_order` values at exactly 1..=len in list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepList {
    steps: Vec<NewStep>,
}

impl StepList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts by requested order (unnumbered steps keep their relative place
    /// after numbered ones) and renumbers.
    pub fn from_steps(mut steps: Vec<NewStep>) -> Self {
        steps.sort_by_key(|s| s.step_order.unwrap_or(u32::MAX));
        let mut list = Self { steps };
        list.renumber();
        list
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn as_slice(&self) -> &[NewStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<NewStep> {
        self.steps
    }

    pub fn orders(&self) -> Vec<u32> {
        self.steps.iter().filter_map(|s| s.step_order).collect()
    }

    /// Appends with order `max + 1` and returns the assigned order.
    pub fn append(&mut self, mut step: NewStep) -> u32 {
        let next = self
            .steps
            .iter()
            .filter_map(|s| s.step_order)
            .max()
            .unwrap_or(0)
            + 1;
        step.step_order = Some(next);
        self.steps.push(step);
        next
    }

    pub fn move_up(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.steps.len() {
            return false;
        }
        self.steps.swap(index - 1, index);
        self.renumber();
        true
    }

    pub fn move_down(&mut self, index: usize) -> bool {
        if index + 1 >= self.steps.len() {
            return false;
        }
        self.steps.swap(index, index + 1);
        self.renumber();
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<NewStep> {
        if index >= self.steps.len() {
            return None;
        }
        let removed = self.steps.remove(index);
        self.renumber();
        Some(removed)
    }

    pub fn renumber(&mut self) {
        for (idx, step) in self.steps.iter_mut().enumerate() {
            step.step_order = Some(idx as u32 + 1);
        }
    }
}

/// Route matching for step page routes.
///
/// `*` and `:param` segments match any single segment; a trailing `*` also
/// matches any number of remaining segments. Query strings, fragments and
/// trailing slashes on `path` are ignored.
pub fn route_matches(pattern: &str, path: &str) -> bool {
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    for (idx, segment) in pattern_segments.iter().enumerate() {
        let is_last = idx + 1 == pattern_segments.len();
        if *segment == "*" && is_last {
            return path_segments.len() > idx;
        }
        let Some(actual) = path_segments.get(idx) else {
            return false;
        };
        if *segment == "*" || segment.starts_with(':') {
            continue;
        }
        if segment != actual {
            return false;
        }
    }
    pattern_segments.len() == path_segments.len()
}
