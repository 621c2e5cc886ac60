use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;

mod debounce;
mod enhance;
mod html;
mod location;
mod selector;

pub use debounce::{Debounced, debounce};
pub use enhance::{EnhanceOptions, install};
pub use location::Location;

use selector::{SelectorPart, matches_chain, parse_selector_groups};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    Runtime(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::TypeMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {selector}: expected {expected}, actual {actual}"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
    pub(crate) value: String,
    pub(crate) disabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
    id_index: HashMap<String, NodeId>,
}

impl Dom {
    pub(crate) fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let disabled = attrs.contains_key("disabled");
        let element = Element {
            tag_name,
            attrs,
            value,
            disabled,
        };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.insert(id_attr, id);
        }
        id
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|element| element.tag_name.as_str())
    }

    pub(crate) fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes[node_id.0].parent
    }

    pub(crate) fn children(&self, node_id: NodeId) -> &[NodeId] {
        &self.nodes[node_id.0].children
    }

    pub(crate) fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|element| element.attrs.get(name).cloned())
    }

    pub(crate) fn attr_ref(&self, node_id: NodeId, name: &str) -> Option<&str> {
        self.element(node_id)
            .and_then(|element| element.attrs.get(name))
            .map(String::as_str)
    }

    pub(crate) fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        if name == "id" {
            if let Some(old) = self.attr(node_id, "id") {
                self.id_index.remove(&old);
            }
            self.id_index.insert(value.to_string(), node_id);
        }
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("attribute target is not an element".into()))?;
        element.attrs.insert(name.to_string(), value.to_string());
        match name {
            "value" => element.value = value.to_string(),
            "disabled" => element.disabled = true,
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn remove_attr(&mut self, node_id: NodeId, name: &str) -> Result<()> {
        if name == "id" {
            if let Some(old) = self.attr(node_id, "id") {
                self.id_index.remove(&old);
            }
        }
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("attribute target is not an element".into()))?;
        element.attrs.remove(name);
        if name == "disabled" {
            element.disabled = false;
        }
        Ok(())
    }

    pub(crate) fn class_tokens_of(&self, node_id: NodeId) -> Vec<String> {
        class_tokens(self.attr_ref(node_id, "class"))
    }

    pub(crate) fn has_class(&self, node_id: NodeId, class_name: &str) -> bool {
        self.element(node_id)
            .map(|element| has_class(element, class_name))
            .unwrap_or(false)
    }

    pub(crate) fn add_class(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        if !classes.iter().any(|token| token == class_name) {
            classes.push(class_name.to_string());
            set_class_attr(element, &classes);
        }
        Ok(())
    }

    pub(crate) fn remove_class(&mut self, node_id: NodeId, class_name: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("classList target is not an element".into()))?;
        let mut classes = class_tokens(element.attrs.get("class").map(String::as_str));
        classes.retain(|token| token != class_name);
        set_class_attr(element, &classes);
        Ok(())
    }

    pub(crate) fn toggle_class(&mut self, node_id: NodeId, class_name: &str) -> Result<bool> {
        if self.has_class(node_id, class_name) {
            self.remove_class(node_id, class_name)?;
            Ok(false)
        } else {
            self.add_class(node_id, class_name)?;
            Ok(true)
        }
    }

    pub(crate) fn value(&self, node_id: NodeId) -> Result<String> {
        self.element(node_id)
            .map(|element| element.value.clone())
            .ok_or_else(|| Error::Runtime("value target is not an element".into()))
    }

    pub(crate) fn set_value(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::Runtime("value target is not an element".into()))?;
        element.value = value.to_string();
        Ok(())
    }

    pub(crate) fn disabled(&self, node_id: NodeId) -> bool {
        self.element(node_id)
            .map(|element| element.disabled)
            .unwrap_or(false)
    }

    pub(crate) fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    pub(crate) fn text_content(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    pub(crate) fn elements_in_document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            if self.element(node).is_some() {
                out.push(node);
            }
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub(crate) fn descendant_elements(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[root.0].children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if self.element(node).is_some() {
                out.push(node);
            }
            for child in self.nodes[node.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    pub(crate) fn find_ancestor_by_tag(&self, node_id: NodeId, tag: &str) -> Option<NodeId> {
        let mut cursor = self.parent(node_id);
        while let Some(node) = cursor {
            if self
                .tag_name(node)
                .map(|t| t.eq_ignore_ascii_case(tag))
                .unwrap_or(false)
            {
                return Some(node);
            }
            cursor = self.parent(node);
        }
        None
    }

    pub(crate) fn find_self_or_ancestor_by_tag(&self, node_id: NodeId, tag: &str) -> Option<NodeId> {
        if self
            .tag_name(node_id)
            .map(|t| t.eq_ignore_ascii_case(tag))
            .unwrap_or(false)
        {
            return Some(node_id);
        }
        self.find_ancestor_by_tag(node_id, tag)
    }

    pub(crate) fn dump_node(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            NodeType::Text(text) => escape_html_text_for_serialization(text),
            NodeType::Element(element) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                let mut names: Vec<&String> = element.attrs.keys().collect();
                names.sort();
                for name in names {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_html_attr_for_serialization(&element.attrs[name]));
                    out.push('"');
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str("</");
                out.push_str(&element.tag_name);
                out.push('>');
                out
            }
        }
    }

    fn describe_node(&self, node_id: NodeId) -> String {
        match self.element(node_id) {
            Some(element) => match element.attrs.get("id") {
                Some(id) => format!("{}#{}", element.tag_name, id),
                None => element.tag_name.clone(),
            },
            None => "#text".into(),
        }
    }
}

pub(crate) fn class_tokens(class_attr: Option<&str>) -> Vec<String> {
    class_attr
        .map(|value| {
            value
                .split_ascii_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

pub(crate) fn has_class(element: &Element, class_name: &str) -> bool {
    element
        .attrs
        .get("class")
        .map(|value| value.split_ascii_whitespace().any(|token| token == class_name))
        .unwrap_or(false)
}

pub(crate) fn set_class_attr(element: &mut Element, classes: &[String]) {
    if classes.is_empty() {
        element.attrs.remove("class");
    } else {
        element.attrs.insert("class".into(), classes.join(" "));
    }
}

pub(crate) fn escape_html_text_for_serialization(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn escape_html_attr_for_serialization(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for (taken, ch) in value.chars().enumerate() {
        if taken >= max_chars {
            out.push('…');
            break;
        }
        out.push(ch);
    }
    out
}

pub(crate) type HandlerFn = Rc<dyn Fn(&mut Page, &mut EventState) -> Result<()>>;

#[derive(Clone)]
pub(crate) struct Listener {
    id: i64,
    capture: bool,
    handler: HandlerFn,
}

#[derive(Default, Clone)]
pub(crate) struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Listener>>>,
}

impl ListenerStore {
    fn add(&mut self, node_id: NodeId, event: String, listener: Listener) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event)
            .or_default()
            .push(listener);
    }

    fn remove(&mut self, node_id: NodeId, event: &str, listener_id: i64) -> bool {
        let Some(events) = self.map.get_mut(&node_id) else {
            return false;
        };
        let Some(listeners) = events.get_mut(event) else {
            return false;
        };

        if let Some(pos) = listeners
            .iter()
            .position(|listener| listener.id == listener_id)
        {
            listeners.remove(pos);
            if listeners.is_empty() {
                events.remove(event);
            }
            if events.is_empty() {
                self.map.remove(&node_id);
            }
            return true;
        }

        false
    }

    fn get(&self, node_id: NodeId, event: &str, capture: bool) -> Vec<Listener> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .map(|listeners| {
                listeners
                    .iter()
                    .filter(|listener| listener.capture == capture)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct EventState {
    event_type: String,
    pub(crate) target: NodeId,
    pub(crate) current_target: NodeId,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub url: String,
    pub new_tab: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub action: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBehavior {
    Auto,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollBlock {
    Start,
    Center,
    End,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scroll {
    pub target: String,
    pub behavior: ScrollBehavior,
    pub block: ScrollBlock,
}

pub(crate) type TaskFn = Rc<dyn Fn(&mut Page) -> Result<()>>;

#[derive(Clone)]
struct ScheduledTask {
    id: i64,
    due_at: i64,
    order: i64,
    task: TaskFn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(i64);

pub(crate) type ObserverFn = Rc<dyn Fn(&mut Page, &[IntersectionEntry], ObserverId) -> Result<()>>;

#[derive(Clone)]
pub(crate) struct IntersectionEntry {
    pub(crate) target: NodeId,
    pub(crate) is_intersecting: bool,
}

#[derive(Clone)]
struct ObserverState {
    id: i64,
    callback: ObserverFn,
    observed: Vec<NodeId>,
}

const STACK_RESERVE_BYTES: usize = 32 * 1024 * 1024;

pub struct Page {
    pub(crate) dom: Dom,
    listeners: ListenerStore,
    pub(crate) location: Location,
    task_queue: Vec<ScheduledTask>,
    now_ms: i64,
    timer_step_limit: usize,
    next_timer_id: i64,
    next_task_order: i64,
    next_listener_id: i64,
    observers: Vec<ObserverState>,
    next_observer_id: i64,
    observer_supported: bool,
    navigations: Vec<Navigation>,
    submissions: Vec<Submission>,
    scrolls: Vec<Scroll>,
    trace: bool,
    trace_events: bool,
    trace_timers: bool,
    trace_observers: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("dom", &self.dom)
            .field("location", &self.location)
            .field("now_ms", &self.now_ms)
            .field("timer_step_limit", &self.timer_step_limit)
            .field("next_timer_id", &self.next_timer_id)
            .field("next_task_order", &self.next_task_order)
            .field("next_listener_id", &self.next_listener_id)
            .field("next_observer_id", &self.next_observer_id)
            .field("observer_supported", &self.observer_supported)
            .field("task_queue_len", &self.task_queue.len())
            .field("observers_len", &self.observers.len())
            .field("navigations", &self.navigations)
            .field("submissions", &self.submissions)
            .field("scrolls", &self.scrolls)
            .field("trace", &self.trace)
            .field("trace_events", &self.trace_events)
            .field("trace_timers", &self.trace_timers)
            .field("trace_observers", &self.trace_observers)
            .field("trace_logs", &self.trace_logs)
            .field("trace_log_limit", &self.trace_log_limit)
            .field("trace_to_stderr", &self.trace_to_stderr)
            .finish_non_exhaustive()
    }
}

impl Page {
    pub fn from_html(html: &str) -> Result<Self> {
        Self::from_html_with_url("https://example.org/", html)
    }

    pub fn from_html_with_url(url: &str, html: &str) -> Result<Self> {
        let location = Location::parse(url)
            .ok_or_else(|| Error::Runtime(format!("invalid document url: {url}")))?;
        let dom = html::parse_html(html)?;
        Ok(Self {
            dom,
            listeners: ListenerStore::default(),
            location,
            task_queue: Vec::new(),
            now_ms: 0,
            timer_step_limit: 10_000,
            next_timer_id: 1,
            next_task_order: 0,
            next_listener_id: 1,
            observers: Vec::new(),
            next_observer_id: 1,
            observer_supported: true,
            navigations: Vec::new(),
            submissions: Vec::new(),
            scrolls: Vec::new(),
            trace: false,
            trace_events: true,
            trace_timers: true,
            trace_observers: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_timers(&mut self, enabled: bool) {
        self.trace_timers = enabled;
    }

    pub fn set_trace_observers(&mut self, enabled: bool) {
        self.trace_observers = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::Runtime(
                "set_timer_step_limit requires at least 1 step".into(),
            ));
        }
        self.timer_step_limit = max_steps;
        Ok(())
    }

    pub fn click(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        stacker::grow(STACK_RESERVE_BYTES, || self.click_node(target))
    }

    pub fn submit(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        stacker::grow(STACK_RESERVE_BYTES, || {
            let form = if self
                .dom
                .tag_name(target)
                .map(|t| t.eq_ignore_ascii_case("form"))
                .unwrap_or(false)
            {
                Some(target)
            } else {
                self.resolve_form_for_submit(target)
            };

            if let Some(form_id) = form {
                self.submit_form(form_id)?;
            }
            Ok(())
        })
    }

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        stacker::grow(STACK_RESERVE_BYTES, || {
            self.dispatch_event(target, event)?;
            Ok(())
        })
    }

    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }

        let tag = self
            .dom
            .tag_name(target)
            .ok_or_else(|| Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: "non-element".into(),
            })?
            .to_ascii_lowercase();

        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }

        self.dom.set_value(target, text)?;
        self.dispatch_event(target, "input")?;
        Ok(())
    }

    fn click_node(&mut self, target: NodeId) -> Result<()> {
        if self.dom.disabled(target) {
            return Ok(());
        }

        let click_outcome = self.dispatch_event(target, "click")?;
        if click_outcome.default_prevented {
            return Ok(());
        }

        if is_submit_control(&self.dom, target) {
            if let Some(form_id) = self.resolve_form_for_submit(target) {
                self.submit_form(form_id)?;
            }
            return Ok(());
        }

        self.run_anchor_default(target)
    }

    fn run_anchor_default(&mut self, target: NodeId) -> Result<()> {
        let Some(anchor) = self.dom.find_self_or_ancestor_by_tag(target, "a") else {
            return Ok(());
        };
        let Some(href) = self.dom.attr(anchor, "href") else {
            return Ok(());
        };

        if let Some(fragment) = href.strip_prefix('#') {
            if fragment.is_empty() {
                return Ok(());
            }
            if let Some(node) = self.dom.by_id(fragment) {
                self.scroll_node_into_view(node, ScrollBehavior::Auto, ScrollBlock::Start)?;
            }
            return Ok(());
        }

        self.record_navigation(&href, false);
        Ok(())
    }

    fn submit_form(&mut self, form: NodeId) -> Result<()> {
        let outcome = self.dispatch_event(form, "submit")?;
        if outcome.default_prevented {
            return Ok(());
        }

        let action = self
            .dom
            .attr(form, "action")
            .unwrap_or_else(|| self.location.pathname().to_string());
        let method = self
            .dom
            .attr(form, "method")
            .map(|method| method.to_ascii_lowercase())
            .unwrap_or_else(|| "get".into());
        let fields = self.collect_form_fields(form);
        self.trace_event_line(format!(
            "[event] submit action={action} method={method} fields={}",
            fields.len()
        ));
        self.submissions.push(Submission {
            action,
            method,
            fields,
        });
        Ok(())
    }

    fn collect_form_fields(&self, form: NodeId) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        for node in self.dom.descendant_elements(form) {
            let Some(tag) = self.dom.tag_name(node) else {
                continue;
            };
            let tag = tag.to_ascii_lowercase();
            if tag != "input" && tag != "textarea" && tag != "select" {
                continue;
            }
            if self.dom.disabled(node) {
                continue;
            }
            let Some(name) = self.dom.attr(node, "name") else {
                continue;
            };
            let value = self.dom.value(node).unwrap_or_default();
            fields.push((name, value));
        }
        fields
    }

    fn resolve_form_for_submit(&self, target: NodeId) -> Option<NodeId> {
        if self
            .dom
            .tag_name(target)
            .map(|t| t.eq_ignore_ascii_case("form"))
            .unwrap_or(false)
        {
            return Some(target);
        }
        self.dom.find_ancestor_by_tag(target, "form")
    }

    pub(crate) fn add_listener(
        &mut self,
        node: NodeId,
        event_type: &str,
        capture: bool,
        handler: HandlerFn,
    ) -> i64 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.add(
            node,
            event_type.to_string(),
            Listener {
                id,
                capture,
                handler,
            },
        );
        id
    }

    pub(crate) fn remove_listener(&mut self, node: NodeId, event_type: &str, id: i64) -> bool {
        self.listeners.remove(node, event_type, id)
    }

    pub(crate) fn dispatch_event(
        &mut self,
        target: NodeId,
        event_type: &str,
    ) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }
        path.reverse();

        if path.is_empty() {
            self.trace_event_done(&event, "empty_path");
            return Ok(event);
        }

        // Capture phase.
        if path.len() >= 2 {
            for node in &path[..path.len() - 1] {
                event.current_target = *node;
                self.invoke_listeners(*node, &mut event, true)?;
                if event.propagation_stopped {
                    self.trace_event_done(&event, "propagation_stopped");
                    return Ok(event);
                }
            }
        }

        // Target phase: capture listeners first.
        event.current_target = target;
        self.invoke_listeners(target, &mut event, true)?;
        if event.propagation_stopped {
            self.trace_event_done(&event, "propagation_stopped");
            return Ok(event);
        }

        // Target phase: bubble listeners.
        self.invoke_listeners(target, &mut event, false)?;
        if event.propagation_stopped {
            self.trace_event_done(&event, "propagation_stopped");
            return Ok(event);
        }

        // Bubble phase.
        if path.len() >= 2 {
            for node in path[..path.len() - 1].iter().rev() {
                event.current_target = *node;
                self.invoke_listeners(*node, &mut event, false)?;
                if event.propagation_stopped {
                    self.trace_event_done(&event, "propagation_stopped");
                    return Ok(event);
                }
            }
        }

        self.trace_event_done(&event, "completed");
        Ok(event)
    }

    fn invoke_listeners(
        &mut self,
        node: NodeId,
        event: &mut EventState,
        capture: bool,
    ) -> Result<()> {
        let listeners = self.listeners.get(node, event.event_type.as_str(), capture);
        for listener in listeners {
            (listener.handler)(self, event)?;
        }
        Ok(())
    }

    pub fn schedule_timeout(
        &mut self,
        wait_ms: i64,
        task: impl Fn(&mut Page) -> Result<()> + 'static,
    ) -> Result<i64> {
        if wait_ms < 0 {
            return Err(Error::Runtime(
                "schedule_timeout requires non-negative milliseconds".into(),
            ));
        }
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let order = self.next_task_order;
        self.next_task_order += 1;
        let due_at = self.now_ms.saturating_add(wait_ms);
        self.task_queue.push(ScheduledTask {
            id,
            due_at,
            order,
            task: Rc::new(task),
        });
        self.trace_timer_line(format!("[timer] schedule id={id} due_at={due_at}"));
        Ok(id)
    }

    pub fn clear_timer(&mut self, timer_id: i64) -> bool {
        let before = self.task_queue.len();
        self.task_queue.retain(|task| task.id != timer_id);
        let existed = self.task_queue.len() != before;
        self.trace_timer_line(format!("[timer] clear id={timer_id} existed={existed}"));
        existed
    }

    pub fn clear_all_timers(&mut self) -> usize {
        let cleared = self.task_queue.len();
        self.task_queue.clear();
        self.trace_timer_line(format!("[timer] clear_all cleared={cleared}"));
        cleared
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .task_queue
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn advance_time(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::Runtime(
                "advance_time requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance delta_ms={} from={} to={} ran_due={}",
            delta_ms, from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn advance_time_to(&mut self, target_ms: i64) -> Result<()> {
        if target_ms < self.now_ms {
            return Err(Error::Runtime(format!(
                "advance_time_to requires target >= now_ms (target={target_ms}, now_ms={})",
                self.now_ms
            )));
        }
        let from = self.now_ms;
        self.now_ms = target_ms;
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] advance_to from={} to={} ran_due={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        let from = self.now_ms;
        let ran = self.run_timer_queue(None, true)?;
        self.trace_timer_line(format!(
            "[timer] flush from={} to={} ran={}",
            from, self.now_ms, ran
        ));
        Ok(())
    }

    pub fn run_due_timers(&mut self) -> Result<usize> {
        let ran = self.run_due_timers_internal()?;
        self.trace_timer_line(format!(
            "[timer] run_due now_ms={} ran={}",
            self.now_ms, ran
        ));
        Ok(ran)
    }

    fn run_due_timers_internal(&mut self) -> Result<usize> {
        self.run_timer_queue(Some(self.now_ms), false)
    }

    fn run_timer_queue(&mut self, due_limit: Option<i64>, advance_clock: bool) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(next_idx) = self.next_task_index(due_limit) {
            steps += 1;
            if steps > self.timer_step_limit {
                return Err(Error::Runtime(format!(
                    "timer step limit exceeded (limit={}, now_ms={})",
                    self.timer_step_limit, self.now_ms
                )));
            }
            let task = self.task_queue.remove(next_idx);
            if advance_clock && task.due_at > self.now_ms {
                self.now_ms = task.due_at;
            }
            self.trace_timer_line(format!(
                "[timer] run id={} due_at={} now_ms={}",
                task.id, task.due_at, self.now_ms
            ));
            (task.task)(self)?;
        }
        Ok(steps)
    }

    fn next_task_index(&self, due_limit: Option<i64>) -> Option<usize> {
        let mut best: Option<(usize, i64, i64)> = None;
        for (idx, task) in self.task_queue.iter().enumerate() {
            if let Some(limit) = due_limit {
                if task.due_at > limit {
                    continue;
                }
            }
            match best {
                Some((_, due, order)) if (task.due_at, task.order) >= (due, order) => {}
                _ => best = Some((idx, task.due_at, task.order)),
            }
        }
        best.map(|(idx, _, _)| idx)
    }

    pub(crate) fn create_observer(&mut self, callback: ObserverFn) -> ObserverId {
        let id = self.next_observer_id;
        self.next_observer_id += 1;
        self.observers.push(ObserverState {
            id,
            callback,
            observed: Vec::new(),
        });
        self.trace_observer_line(format!("[observer] create id={id}"));
        ObserverId(id)
    }

    pub(crate) fn observe(&mut self, observer: ObserverId, node: NodeId) {
        let description = self.dom.describe_node(node);
        if let Some(state) = self.observers.iter_mut().find(|state| state.id == observer.0) {
            if !state.observed.contains(&node) {
                state.observed.push(node);
            }
        }
        self.trace_observer_line(format!(
            "[observer] observe id={} target={description}",
            observer.0
        ));
    }

    pub(crate) fn unobserve(&mut self, observer: ObserverId, node: NodeId) {
        let description = self.dom.describe_node(node);
        if let Some(state) = self.observers.iter_mut().find(|state| state.id == observer.0) {
            state.observed.retain(|observed| *observed != node);
        }
        self.trace_observer_line(format!(
            "[observer] unobserve id={} target={description}",
            observer.0
        ));
    }

    pub fn set_intersection_observer_supported(&mut self, supported: bool) {
        self.observer_supported = supported;
    }

    pub fn intersection_observer_supported(&self) -> bool {
        self.observer_supported
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn observed_count(&self) -> usize {
        self.observers.iter().map(|state| state.observed.len()).sum()
    }

    pub fn reveal(&mut self, selector: &str) -> Result<usize> {
        let node = self.select_one(selector)?;
        stacker::grow(STACK_RESERVE_BYTES, || self.reveal_node(node))
    }

    pub(crate) fn reveal_node(&mut self, node: NodeId) -> Result<usize> {
        let watching = self
            .observers
            .iter()
            .filter(|state| state.observed.contains(&node))
            .map(|state| (state.id, state.callback.clone()))
            .collect::<Vec<_>>();

        let mut delivered = 0usize;
        for (id, callback) in watching {
            let still_watching = self
                .observers
                .iter()
                .any(|state| state.id == id && state.observed.contains(&node));
            if !still_watching {
                continue;
            }
            let entries = [IntersectionEntry {
                target: node,
                is_intersecting: true,
            }];
            callback(self, &entries, ObserverId(id))?;
            delivered += 1;
        }

        self.trace_observer_line(format!(
            "[observer] reveal target={} delivered={delivered}",
            self.dom.describe_node(node)
        ));
        Ok(delivered)
    }

    pub(crate) fn scroll_node_into_view(
        &mut self,
        node: NodeId,
        behavior: ScrollBehavior,
        block: ScrollBlock,
    ) -> Result<()> {
        let target = self.dom.describe_node(node);
        self.trace_event_line(format!("[event] scroll target={target} behavior={behavior:?}"));
        self.scrolls.push(Scroll {
            target,
            behavior,
            block,
        });
        self.reveal_node(node)?;
        Ok(())
    }

    fn record_navigation(&mut self, url: &str, new_tab: bool) {
        self.trace_event_line(format!("[event] navigate url={url} new_tab={new_tab}"));
        self.navigations.push(Navigation {
            url: url.to_string(),
            new_tab,
        });
    }

    pub(crate) fn open_new_tab(&mut self, url: &str) {
        self.record_navigation(url, true);
    }

    pub fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    pub fn opened_tabs(&self) -> Vec<String> {
        self.navigations
            .iter()
            .filter(|navigation| navigation.new_tab)
            .map(|navigation| navigation.url.clone())
            .collect()
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn scrolls(&self) -> &[Scroll] {
        &self.scrolls
    }

    pub(crate) fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.select_all_ids(selector)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    pub(crate) fn select_first(&self, selector: &str) -> Result<Option<NodeId>> {
        Ok(self.select_all_ids(selector)?.into_iter().next())
    }

    pub(crate) fn select_all_ids(&self, selector: &str) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;

        if let [group] = groups.as_slice() {
            if let [part] = group.as_slice() {
                if let Some(id) = part.step.id_only() {
                    return Ok(self.dom.by_id(id).into_iter().collect());
                }
            }
        }

        Ok(self
            .dom
            .elements_in_document_order()
            .into_iter()
            .filter(|node| self.node_matches_groups(*node, &groups))
            .collect())
    }

    pub(crate) fn select_all_within(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;
        Ok(self
            .dom
            .descendant_elements(root)
            .into_iter()
            .filter(|node| self.node_matches_groups(*node, &groups))
            .collect())
    }

    fn node_matches_groups(&self, node: NodeId, groups: &[Vec<SelectorPart>]) -> bool {
        groups
            .iter()
            .any(|group| matches_chain(&self.dom, node, group))
    }

    pub fn query_count(&self, selector: &str) -> Result<usize> {
        Ok(self.select_all_ids(selector)?.len())
    }

    pub fn exists(&self, selector: &str) -> Result<bool> {
        Ok(!self.select_all_ids(selector)?.is_empty())
    }

    pub fn text(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.text_content(target))
    }

    pub fn value(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.dom.value(target)
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.attr(target, name))
    }

    pub fn has_class(&self, selector: &str, class_name: &str) -> Result<bool> {
        let target = self.select_one(selector)?;
        Ok(self.dom.has_class(target, class_name))
    }

    pub fn classes_of(&self, selector: &str) -> Result<Vec<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.class_tokens_of(target))
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        self.select_one(selector)?;
        Ok(())
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_value(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.value(target)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_has_class(&self, selector: &str, class_name: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if !self.dom.has_class(target, class_name) {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("class {class_name}"),
                actual: self.dom.class_tokens_of(target).join(" "),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    fn trace_event_done(&mut self, event: &EventState, outcome: &str) {
        if self.trace && self.trace_events {
            let line = format!(
                "[event] type={} target={} outcome={outcome} prevented={}",
                event.event_type,
                self.dom.describe_node(event.target),
                event.default_prevented
            );
            self.push_trace_line(line);
        }
    }

    fn trace_event_line(&mut self, line: String) {
        if self.trace && self.trace_events {
            self.push_trace_line(line);
        }
    }

    fn trace_timer_line(&mut self, line: String) {
        if self.trace && self.trace_timers {
            self.push_trace_line(line);
        }
    }

    fn trace_observer_line(&mut self, line: String) {
        if self.trace && self.trace_observers {
            self.push_trace_line(line);
        }
    }

    fn push_trace_line(&mut self, line: String) {
        if self.trace_to_stderr {
            eprintln!("{line}");
        }
        self.trace_logs.push(line);
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
    }
}

fn is_submit_control(dom: &Dom, node: NodeId) -> bool {
    let Some(tag) = dom.tag_name(node) else {
        return false;
    };
    let tag = tag.to_ascii_lowercase();
    if tag == "button" {
        return dom
            .attr_ref(node, "type")
            .map(|value| value.eq_ignore_ascii_case("submit"))
            .unwrap_or(true);
    }
    if tag == "input" {
        return dom
            .attr_ref(node, "type")
            .map(|value| value.eq_ignore_ascii_case("submit"))
            .unwrap_or(false);
    }
    false
}
