//! Journey event registration.
//!
//! A [`TrackingRegistry`] turns the steps of active journeys into live
//! tracking hooks:
//!
//! - `pageview` steps become route-keyed page events that pages look up on load;
//! - `button_click` steps become click bindings, attached to matching elements
//!   by [`TrackingRegistry::wire_clicks`];
//! - `form_submit` steps become route-keyed form handler descriptors.
//!
//! Registration is idempotent per journey id. Listeners attached to elements
//! are never detached; unregistering only stops new wiring.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use autofunnel_core::event::CanonicalEvent;
use autofunnel_core::journey::{
    route_matches, EventType, Journey, JourneyStep, StepSelector, TriggerType,
};

use crate::dom::Document;
use crate::emitter::EventEmitter;
use crate::forwarder::SinkSelection;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEventEntry {
    pub journey_id: String,
    pub journey_name: String,
    pub event_type: EventType,
    pub event_name: String,
    pub step_order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormHandlerEntry {
    pub journey_id: String,
    pub journey_name: String,
    pub event_type: EventType,
    pub event_name: String,
    pub step_order: u32,
    pub metadata: Map<String, Value>,
}

/// A click step ready to be attached: where to listen and what to emit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickBinding {
    pub journey_id: String,
    pub step_order: u32,
    pub page_route: String,
    pub selector: StepSelector,
    pub event: CanonicalEvent,
    pub selection: SinkSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingId,
    NoSteps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered { steps: usize },
    AlreadyRegistered,
    Skipped { reason: SkipReason },
}

/// Route key -> entries from every registered journey bound to that route,
/// in registration order. The newest entry answers lookups.
type RouteTable<T> = BTreeMap<String, Vec<T>>;

trait RouteEntry: Clone {
    fn journey_id(&self) -> &str;
    fn step_order(&self) -> u32;
}

impl RouteEntry for PageEventEntry {
    fn journey_id(&self) -> &str {
        &self.journey_id
    }

    fn step_order(&self) -> u32 {
        self.step_order
    }
}

impl RouteEntry for FormHandlerEntry {
    fn journey_id(&self) -> &str {
        &self.journey_id
    }

    fn step_order(&self) -> u32 {
        self.step_order
    }
}

/// Add an entry, replacing one with the same (journey id, step order).
fn insert_route<T: RouteEntry>(table: &mut RouteTable<T>, route: &str, entry: T) {
    let entries = table.entry(route.to_string()).or_default();
    entries.retain(|e| {
        e.journey_id() != entry.journey_id() || e.step_order() != entry.step_order()
    });
    entries.push(entry);
}

/// Drop one journey's entries, and any route left without entries.
fn remove_journey<T: RouteEntry>(table: &mut RouteTable<T>, journey_id: &str) {
    table.retain(|_, entries| {
        entries.retain(|e| e.journey_id() != journey_id);
        !entries.is_empty()
    });
}

fn effective<T: RouteEntry>(table: &RouteTable<T>) -> BTreeMap<String, T> {
    table
        .iter()
        .filter_map(|(route, entries)| entries.last().map(|e| (route.clone(), e.clone())))
        .collect()
}

#[derive(Default)]
struct RegistryState {
    journeys: BTreeSet<String>,
    page_events: RouteTable<PageEventEntry>,
    form_handlers: RouteTable<FormHandlerEntry>,
    click_bindings: Vec<ClickBinding>,
}

/// The click event a `button_click` step emits. Step metadata is merged
/// last and may override the journey keys.
pub fn click_event(journey: &Journey, step: &JourneyStep) -> CanonicalEvent {
    CanonicalEvent::new(step.event_type.clone(), step.event_name.clone())
        .with("journeyId", journey.id.clone())
        .with("journeyName", journey.name.clone())
        .with("stepOrder", step.step_order)
        .with("stepName", step.step_name.clone())
        .with("pageRoute", step.page_route.clone())
        .with("triggerType", TriggerType::ButtonClick.as_str())
        .with_metadata(&step.event_metadata)
}

#[derive(Default)]
pub struct TrackingRegistry {
    state: Mutex<RegistryState>,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, journey: &Journey) -> RegisterOutcome {
        if journey.id.trim().is_empty() {
            warn!(journey_name = %journey.name, "Journey has no id; not registering");
            return RegisterOutcome::Skipped {
                reason: SkipReason::MissingId,
            };
        }
        if journey.steps.is_empty() {
            warn!(journey_name = %journey.name, "Journey has no steps to register");
            return RegisterOutcome::Skipped {
                reason: SkipReason::NoSteps,
            };
        }

        let mut state = self.state();
        if state.journeys.contains(&journey.id) {
            debug!(journey_id = %journey.id, "Journey already registered");
            return RegisterOutcome::AlreadyRegistered;
        }

        let selection = SinkSelection::for_journey(journey);
        for step in &journey.steps {
            match step.trigger_type {
                TriggerType::Pageview => {
                    insert_route(
                        &mut state.page_events,
                        &step.page_route,
                        PageEventEntry {
                            journey_id: journey.id.clone(),
                            journey_name: journey.name.clone(),
                            event_type: step.event_type.clone(),
                            event_name: step.event_name.clone(),
                            step_order: step.step_order,
                        },
                    );
                }
                TriggerType::ButtonClick => match step.selector() {
                    Some(selector) => state.click_bindings.push(ClickBinding {
                        journey_id: journey.id.clone(),
                        step_order: step.step_order,
                        page_route: step.page_route.clone(),
                        selector,
                        event: click_event(journey, step),
                        selection,
                    }),
                    None => warn!(
                        journey_id = %journey.id,
                        step_order = step.step_order,
                        "Click step has no selector; not wired"
                    ),
                },
                TriggerType::FormSubmit => {
                    insert_route(
                        &mut state.form_handlers,
                        &step.page_route,
                        FormHandlerEntry {
                            journey_id: journey.id.clone(),
                            journey_name: journey.name.clone(),
                            event_type: step.event_type.clone(),
                            event_name: step.event_name.clone(),
                            step_order: step.step_order,
                            metadata: step.event_metadata.clone(),
                        },
                    );
                }
                other => debug!(
                    journey_id = %journey.id,
                    trigger_type = other.as_str(),
                    "Trigger type has no automatic hook"
                ),
            }
        }
        state.journeys.insert(journey.id.clone());

        info!(
            journey_id = %journey.id,
            journey_name = %journey.name,
            steps = journey.steps.len(),
            "Journey registered"
        );
        RegisterOutcome::Registered {
            steps: journey.steps.len(),
        }
    }

    /// Forget a journey and its table entries. Returns whether it was registered.
    pub fn unregister(&self, journey_id: &str) -> bool {
        let mut state = self.state();
        let removed = state.journeys.remove(journey_id);
        remove_journey(&mut state.page_events, journey_id);
        remove_journey(&mut state.form_handlers, journey_id);
        state.click_bindings.retain(|b| b.journey_id != journey_id);
        if removed {
            info!(journey_id, "Journey unregistered");
        }
        removed
    }

    /// Re-apply a journey after it changed: drop the old registration and
    /// register again if it should still be tracked.
    pub fn refresh(&self, journey: &Journey) -> Option<RegisterOutcome> {
        self.unregister(&journey.id);
        journey
            .should_auto_track()
            .then(|| self.register(journey))
    }

    pub fn reset(&self) {
        *self.state() = RegistryState::default();
        debug!("Tracking registry cleared");
    }

    pub fn is_registered(&self, journey_id: &str) -> bool {
        self.state().journeys.contains(journey_id)
    }

    pub fn registered_journeys(&self) -> Vec<String> {
        self.state().journeys.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().journeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Page event for a path: an exact route key first, then the first
    /// matching pattern in key order. When several journeys share a route
    /// the most recently registered one answers.
    pub fn page_event_for(&self, path: &str) -> Option<PageEventEntry> {
        lookup_route(&self.state().page_events, path)
    }

    pub fn form_handler_for(&self, path: &str) -> Option<FormHandlerEntry> {
        lookup_route(&self.state().form_handlers, path)
    }

    /// The entry answering lookups on each route.
    pub fn page_events(&self) -> BTreeMap<String, PageEventEntry> {
        effective(&self.state().page_events)
    }

    pub fn form_handlers(&self) -> BTreeMap<String, FormHandlerEntry> {
        effective(&self.state().form_handlers)
    }

    pub fn click_bindings(&self) -> Vec<ClickBinding> {
        self.state().click_bindings.clone()
    }

    pub fn click_binding(&self, journey_id: &str, step_order: u32) -> Option<ClickBinding> {
        self.state()
            .click_bindings
            .iter()
            .find(|b| b.journey_id == journey_id && b.step_order == step_order)
            .cloned()
    }

    /// Attach click listeners for every binding once the document is ready.
    ///
    /// Call again after each navigation. Elements already carrying the
    /// tracked marker are left alone, so repeated calls never double-fire.
    /// Returns the number of listeners attached by this call.
    pub async fn wire_clicks(&self, doc: &dyn Document, emitter: Arc<dyn EventEmitter>) -> usize {
        doc.ready().await;

        let bindings = self.click_bindings();
        let mut attached = 0;
        for binding in bindings {
            for element in doc.query_selector_all(&binding.selector) {
                if !element.mark_tracked() {
                    continue;
                }
                let emitter = Arc::clone(&emitter);
                let event = binding.event.clone();
                let selection = binding.selection;
                element.add_click_listener(Box::new(move || {
                    emitter.emit(event.clone(), selection);
                }));
                attached += 1;
            }
        }

        if attached > 0 {
            debug!(attached, "Click listeners attached");
        }
        attached
    }
}

fn lookup_route<T: RouteEntry>(table: &RouteTable<T>, path: &str) -> Option<T> {
    let bare = path.split(['?', '#']).next().unwrap_or_default();
    if let Some(entry) = table.get(bare).and_then(|entries| entries.last()) {
        return Some(entry.clone());
    }
    table
        .iter()
        .find(|(pattern, _)| route_matches(pattern, path))
        .and_then(|(_, entries)| entries.last().cloned())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use autofunnel_core::journey::{ButtonIdentifierType, JourneyStatus};

    use crate::dom::{VirtualDocument, VirtualElement};
    use crate::emitter::mock::RecordingEmitter;

    use super::*;

    fn step(order: u32, name: &str, route: &str, trigger: TriggerType) -> JourneyStep {
        JourneyStep {
            id: format!("jstep_{order}"),
            journey_id: "jrn_test".to_string(),
            step_order: order,
            step_name: name.to_string(),
            step_description: None,
            page_route: route.to_string(),
            page_title: None,
            event_type: EventType::Lead,
            event_name: format!("{name} Event"),
            event_description: None,
            trigger_type: trigger,
            trigger_selector: None,
            trigger_conditions: Map::new(),
            event_metadata: Map::new(),
            button_identifier_type: None,
            button_identifier: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn journey(steps: Vec<JourneyStep>) -> Journey {
        Journey {
            id: "jrn_test".to_string(),
            name: "Financing".to_string(),
            route: "/financiamientos".to_string(),
            landing_page: "/financiamientos".to_string(),
            description: None,
            status: JourneyStatus::Active,
            auto_tracking_enabled: true,
            gtm_enabled: true,
            facebook_pixel_enabled: false,
            created_by: None,
            created_at: String::new(),
            updated_at: String::new(),
            steps,
        }
    }

    fn click_step(order: u32) -> JourneyStep {
        let mut s = step(order, "Apply", "/financiamientos", TriggerType::ButtonClick);
        s.button_identifier_type = Some(ButtonIdentifierType::CssId);
        s.button_identifier = Some("apply-now".to_string());
        s.event_metadata.insert("cta".to_string(), json!("hero"));
        s
    }

    fn full_journey() -> Journey {
        journey(vec![
            step(1, "Landing", "/financiamientos", TriggerType::Pageview),
            click_step(2),
            step(3, "Form", "/escritorio/aplicacion", TriggerType::FormSubmit),
            step(4, "Scroll", "/financiamientos", TriggerType::Scroll),
        ])
    }

    #[test]
    fn registering_twice_is_a_no_op() {
        let registry = TrackingRegistry::new();
        let j = full_journey();
        assert_eq!(registry.register(&j), RegisterOutcome::Registered { steps: 4 });
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.click_bindings().len(), 1);

        assert_eq!(registry.register(&j), RegisterOutcome::AlreadyRegistered);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.click_bindings().len(), 1);
    }

    #[test]
    fn journeys_without_id_or_steps_are_skipped() {
        let registry = TrackingRegistry::new();
        assert_eq!(
            registry.register(&journey(vec![])),
            RegisterOutcome::Skipped {
                reason: SkipReason::NoSteps
            }
        );
        let mut anonymous = full_journey();
        anonymous.id = String::new();
        assert_eq!(
            registry.register(&anonymous),
            RegisterOutcome::Skipped {
                reason: SkipReason::MissingId
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn steps_land_in_their_tables() {
        let registry = TrackingRegistry::new();
        registry.register(&full_journey());

        let page = registry
            .page_event_for("/financiamientos?utm_source=fb")
            .expect("page event");
        assert_eq!(page.step_order, 1);
        assert_eq!(page.journey_name, "Financing");

        let form = registry
            .form_handler_for("/escritorio/aplicacion")
            .expect("form handler");
        assert_eq!(form.step_order, 3);
        assert!(registry.form_handler_for("/financiamientos").is_none());

        let binding = registry.click_binding("jrn_test", 2).expect("click binding");
        assert!(registry.click_binding("jrn_test", 1).is_none());
        assert_eq!(binding.selector, StepSelector::Id("apply-now".to_string()));
        assert!(binding.selection.data_layer);
        assert!(!binding.selection.pixel);
    }

    #[test]
    fn wildcard_routes_match_concrete_paths() {
        let registry = TrackingRegistry::new();
        registry.register(&journey(vec![step(
            1,
            "Vehicle",
            "/autos/*",
            TriggerType::Pageview,
        )]));
        assert!(registry.page_event_for("/autos/mazda-3-2021").is_some());
        assert!(registry.page_event_for("/otros").is_none());
    }

    #[test]
    fn click_event_carries_journey_and_step_details() {
        let j = full_journey();
        let event = click_event(&j, &j.steps[1]);
        assert_eq!(event.event_name, "Apply Event");
        assert_eq!(event.metadata.get("journeyId"), Some(&json!("jrn_test")));
        assert_eq!(event.metadata.get("journeyName"), Some(&json!("Financing")));
        assert_eq!(event.metadata.get("stepOrder"), Some(&json!(2)));
        assert_eq!(event.metadata.get("stepName"), Some(&json!("Apply")));
        assert_eq!(event.metadata.get("pageRoute"), Some(&json!("/financiamientos")));
        assert_eq!(event.metadata.get("triggerType"), Some(&json!("button_click")));
        assert_eq!(event.metadata.get("cta"), Some(&json!("hero")));
    }

    #[test]
    fn unregister_and_reset_clear_tables() {
        let registry = TrackingRegistry::new();
        registry.register(&full_journey());
        assert!(registry.unregister("jrn_test"));
        assert!(!registry.is_registered("jrn_test"));
        assert!(registry.page_event_for("/financiamientos").is_none());
        assert!(registry.click_bindings().is_empty());
        assert!(!registry.unregister("jrn_test"));

        registry.register(&full_journey());
        registry.reset();
        assert!(registry.is_empty());
        assert!(registry.form_handlers().is_empty());
    }

    #[test]
    fn refresh_drops_paused_journeys() {
        let registry = TrackingRegistry::new();
        let mut j = full_journey();
        assert_eq!(
            registry.refresh(&j),
            Some(RegisterOutcome::Registered { steps: 4 })
        );
        j.status = JourneyStatus::Paused;
        assert_eq!(registry.refresh(&j), None);
        assert!(!registry.is_registered("jrn_test"));
    }

    fn other_journey(status: JourneyStatus) -> Journey {
        let mut other = journey(vec![
            step(1, "Shared landing", "/financiamientos", TriggerType::Pageview),
            step(2, "Shared form", "/escritorio/aplicacion", TriggerType::FormSubmit),
        ]);
        other.id = "jrn_other".to_string();
        other.name = "Other".to_string();
        other.status = status;
        other
    }

    #[test]
    fn shared_routes_survive_the_other_journey_leaving() {
        let registry = TrackingRegistry::new();
        registry.register(&full_journey());
        registry.register(&other_journey(JourneyStatus::Active));
        assert_eq!(
            registry
                .page_event_for("/financiamientos")
                .expect("page event")
                .journey_id,
            "jrn_other"
        );

        assert_eq!(registry.refresh(&other_journey(JourneyStatus::Paused)), None);
        assert!(registry.is_registered("jrn_test"));

        let page = registry.page_event_for("/financiamientos").expect("page event");
        assert_eq!(page.journey_id, "jrn_test");
        assert_eq!(page.step_order, 1);
        let form = registry
            .form_handler_for("/escritorio/aplicacion")
            .expect("form handler");
        assert_eq!(form.journey_id, "jrn_test");
        assert_eq!(registry.page_events().len(), 1);
    }

    #[test]
    fn unregistering_the_only_journey_on_a_route_drops_the_route() {
        let registry = TrackingRegistry::new();
        registry.register(&full_journey());
        registry.register(&other_journey(JourneyStatus::Active));
        registry.unregister("jrn_other");
        registry.unregister("jrn_test");
        assert!(registry.page_events().is_empty());
        assert!(registry.form_handlers().is_empty());
        assert!(registry.page_event_for("/financiamientos").is_none());
    }

    #[tokio::test]
    async fn wiring_clicks_is_idempotent_per_element() {
        let registry = TrackingRegistry::new();
        registry.register(&full_journey());

        let doc = VirtualDocument::loaded();
        let button = doc.insert(VirtualElement::new("button").with_id("apply-now"));
        let emitter = Arc::new(RecordingEmitter::default());

        assert_eq!(registry.wire_clicks(&doc, emitter.clone()).await, 1);
        assert_eq!(registry.wire_clicks(&doc, emitter.clone()).await, 0);
        assert_eq!(button.listener_count(), 1);

        button.click();
        assert_eq!(emitter.names(), vec!["Apply Event"]);

        // Elements rendered after a pass are picked up by the next one.
        let late = doc.insert(VirtualElement::new("a").with_id("apply-now"));
        assert_eq!(registry.wire_clicks(&doc, emitter.clone()).await, 1);
        late.click();
        assert_eq!(emitter.names().len(), 2);
    }

    #[tokio::test]
    async fn listeners_keep_firing_after_unregister() {
        let registry = TrackingRegistry::new();
        registry.register(&full_journey());
        let doc = VirtualDocument::loaded();
        let button = doc.insert(VirtualElement::new("button").with_id("apply-now"));
        let emitter = Arc::new(RecordingEmitter::default());
        registry.wire_clicks(&doc, emitter.clone()).await;

        registry.unregister("jrn_test");
        button.click();
        assert_eq!(emitter.names().len(), 1);
    }
}
