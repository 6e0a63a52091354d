//! The slice of a host page that click wiring needs: a one-shot readiness
//! signal, selector queries, and per-element listeners plus a tracked marker.
//!
//! [`VirtualDocument`] is an in-process page for embedders without a real DOM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use autofunnel_core::journey::StepSelector;

pub type ClickListener = Box<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait Document: Send + Sync {
    /// Resolves once the page is ready for queries. Idempotent.
    async fn ready(&self);

    fn query_selector_all(&self, selector: &StepSelector) -> Vec<Arc<dyn Element>>;
}

pub trait Element: Send + Sync {
    /// Set the tracked marker. Returns `false` if it was already set.
    fn mark_tracked(&self) -> bool;

    fn add_click_listener(&self, listener: ClickListener);
}

pub struct VirtualElement {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    text: String,
    tracked: AtomicBool,
    listeners: Mutex<Vec<ClickListener>>,
}

impl VirtualElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            id: None,
            classes: Vec::new(),
            text: String::new(),
            tracked: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every attached click listener in attach order.
    pub fn click(&self) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener();
        }
    }

    fn matches(&self, selector: &StepSelector) -> bool {
        match selector {
            StepSelector::Id(id) => self.id.as_deref() == Some(id.as_str()),
            StepSelector::Class(class) => self.classes.iter().any(|c| c == class),
            StepSelector::TextContains(needle) => self.text.contains(needle.as_str()),
            StepSelector::Css(raw) => raw
                .split(',')
                .filter_map(|part| CompoundSelector::parse(part.trim()))
                .any(|compound| compound.matches(self)),
        }
    }
}

impl Element for VirtualElement {
    fn mark_tracked(&self) -> bool {
        !self.tracked.swap(true, Ordering::SeqCst)
    }

    fn add_click_listener(&self, listener: ClickListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

/// `tag#id.class.class` with every part optional. Combinators, attribute
/// and pseudo selectors are unsupported and match nothing.
#[derive(Debug, Default, PartialEq)]
struct CompoundSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl CompoundSelector {
    fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let mut selector = CompoundSelector::default();
        let mut chars = raw.chars().peekable();

        let tag: String = std::iter::from_fn(|| chars.next_if(|c| is_name_char(*c))).collect();
        if !tag.is_empty() {
            selector.tag = Some(tag.to_ascii_lowercase());
        }

        while let Some(prefix) = chars.next() {
            let name: String =
                std::iter::from_fn(|| chars.next_if(|c| is_name_char(*c))).collect();
            if name.is_empty() {
                return None;
            }
            match prefix {
                '#' => selector.id = Some(name),
                '.' => selector.classes.push(name),
                _ => return None,
            }
        }
        Some(selector)
    }

    fn matches(&self, element: &VirtualElement) -> bool {
        if let Some(tag) = &self.tag {
            if *tag != element.tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        self.classes
            .iter()
            .all(|class| element.classes.iter().any(|c| c == class))
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

pub struct VirtualDocument {
    elements: Mutex<Vec<Arc<VirtualElement>>>,
    ready: watch::Sender<bool>,
}

impl Default for VirtualDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDocument {
    /// A document that is still loading.
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            elements: Mutex::new(Vec::new()),
            ready,
        }
    }

    pub fn loaded() -> Self {
        let doc = Self::new();
        doc.mark_ready();
        doc
    }

    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Render an element into the page.
    pub fn insert(&self, element: VirtualElement) -> Arc<VirtualElement> {
        let element = Arc::new(element);
        self.elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&element));
        element
    }

    pub fn len(&self) -> usize {
        self.elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Document for VirtualDocument {
    async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so this only errs if it is dropped mid-wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn query_selector_all(&self, selector: &StepSelector) -> Vec<Arc<dyn Element>> {
        self.elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|element| element.matches(selector))
            .map(|element| Arc::clone(element) as Arc<dyn Element>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> (VirtualDocument, Arc<VirtualElement>, Arc<VirtualElement>) {
        let doc = VirtualDocument::loaded();
        let apply = doc.insert(
            VirtualElement::new("button")
                .with_id("apply-now")
                .with_class("cta")
                .with_class("primary")
                .with_text("Solicitar financiamiento"),
        );
        let link = doc.insert(VirtualElement::new("a").with_class("cta").with_text("Ver autos"));
        (doc, apply, link)
    }

    #[test]
    fn simple_selectors_match_by_id_class_and_text() {
        let (doc, _, _) = page();
        assert_eq!(
            doc.query_selector_all(&StepSelector::Id("apply-now".into())).len(),
            1
        );
        assert_eq!(doc.query_selector_all(&StepSelector::Class("cta".into())).len(), 2);
        assert_eq!(
            doc.query_selector_all(&StepSelector::TextContains("Solicitar".into()))
                .len(),
            1
        );
    }

    #[test]
    fn css_selectors_support_compounds_and_lists() {
        let (doc, _, _) = page();
        let count = |raw: &str| doc.query_selector_all(&StepSelector::Css(raw.into())).len();
        assert_eq!(count("button.cta"), 1);
        assert_eq!(count("#apply-now"), 1);
        assert_eq!(count(".cta.primary"), 1);
        assert_eq!(count("a, #apply-now"), 2);
        assert_eq!(count("BUTTON"), 1);
        assert_eq!(count("div .cta"), 0);
        assert_eq!(count("[data-track]"), 0);
    }

    #[test]
    fn tracked_marker_is_set_once() {
        let (_, apply, _) = page();
        assert!(apply.mark_tracked());
        assert!(!apply.mark_tracked());
        assert!(apply.is_tracked());
    }

    #[tokio::test]
    async fn ready_waits_for_load() {
        let doc = Arc::new(VirtualDocument::new());
        let waiter = {
            let doc = Arc::clone(&doc);
            tokio::spawn(async move { doc.ready().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        doc.mark_ready();
        waiter.await.expect("ready task");
        assert!(doc.is_ready());
        doc.ready().await;
    }
}
