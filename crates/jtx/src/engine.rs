//! The reactive core.
//!
//! The engine owns the document arena, the definition registry, and the
//! binding-to-dependency graph. Every outside entry point (event dispatch,
//! host delivery, timer fire) funnels into `tick`, which drains the render
//! queue: pending state keys persist and announce themselves, then every
//! binding attached to a changed definition reruns exactly once. Writes
//! made during those reruns land in the next flush, so progress is
//! monotonic and a flush always terminates.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::dom::{html, Document, NodeId};
use crate::expr::eval::{self, EvalError, EvalHost};
use crate::expr::Program;
use crate::host::{ConnId, Host, HttpRequest, HttpResponse, RequestId, StreamEvent};
use crate::util;
use crate::value::Value;

pub mod binding;
pub mod events;
pub mod graph;
pub mod list;
pub mod on_attr;
pub mod registry;
pub mod scope;
pub mod source;
pub mod state;
pub mod timers;

use binding::{Binding, BindingKind};
use events::EmittedEvent;
use graph::{BindingId, DepGraph};
use list::ListBinding;
use registry::{DefId, Definition, Registry};
use timers::{TimerAction, TimerId, Timers};

/// Prefix of every binding attribute (`jtx-if`, `jtx-text`, ...).
pub const JTX_PREFIX: &str = "jtx-";
/// Marker attribute toggled by `jtx-show` and the status slots.
pub const HIDDEN_ATTR: &str = "hidden";

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HandlerId(pub u32);

pub(crate) struct Handler {
    pub element: NodeId,
    pub program: Program,
    /// Item locals captured when the handler was created inside a list item.
    pub locals: FxHashMap<Arc<str>, Value>,
}

pub(crate) struct Listener {
    pub event: String,
    pub handler: HandlerId,
}

/// Evaluation environment: the element anchoring scope resolution, the
/// per-run locals, and the `$event` payload for handlers.
pub(crate) struct Env {
    pub element: NodeId,
    pub locals: FxHashMap<Arc<str>, Value>,
    pub event: Option<Value>,
}

impl Env {
    pub fn at(element: NodeId) -> Self {
        Self {
            element,
            locals: FxHashMap::default(),
            event: None,
        }
    }

    pub fn with_locals(element: NodeId, locals: FxHashMap<Arc<str>, Value>) -> Self {
        Self {
            element,
            locals,
            event: None,
        }
    }
}

pub(crate) enum Deferred {
    /// An `onload` source activation posted for the next tick.
    Activate(DefId),
}

pub struct Engine {
    pub(crate) doc: Document,
    pub(crate) registry: Registry,
    pub(crate) graph: DepGraph,
    pub(crate) bindings: Vec<Option<Binding>>,
    pub(crate) node_bindings: FxHashMap<NodeId, Vec<BindingId>>,
    pub(crate) if_placeholders: FxHashMap<NodeId, BindingId>,
    pub(crate) handlers: Vec<Option<Handler>>,
    pub(crate) node_handlers: FxHashMap<NodeId, Vec<HandlerId>>,
    pub(crate) listeners: FxHashMap<NodeId, Vec<Listener>>,
    pub(crate) model_bindings: FxHashMap<NodeId, Vec<BindingId>>,
    pub(crate) changed: FxHashSet<DefId>,
    pub(crate) deferred: Vec<Deferred>,
    pub(crate) timers: Timers,
    pub(crate) node_timers: FxHashMap<NodeId, Vec<TimerId>>,
    pub(crate) idle_waiters: Vec<DefId>,
    pub(crate) visible_waiters: FxHashMap<NodeId, DefId>,
    pub(crate) pending_http: FxHashMap<RequestId, DefId>,
    pub(crate) stream_conns: FxHashMap<ConnId, DefId>,
    pub(crate) host: Host,
    sanitizer: Option<Box<dyn Fn(&str) -> String>>,
    pub(crate) current_binding: Option<BindingId>,
    pub(crate) events: Vec<EmittedEvent>,
    pub(crate) processed: FxHashSet<NodeId>,
}

impl Engine {
    pub fn new(host: Host) -> Self {
        Self {
            doc: Document::new(),
            registry: Registry::default(),
            graph: DepGraph::default(),
            bindings: Vec::new(),
            node_bindings: FxHashMap::default(),
            if_placeholders: FxHashMap::default(),
            handlers: Vec::new(),
            node_handlers: FxHashMap::default(),
            listeners: FxHashMap::default(),
            model_bindings: FxHashMap::default(),
            changed: FxHashSet::default(),
            deferred: Vec::new(),
            timers: Timers::default(),
            node_timers: FxHashMap::default(),
            idle_waiters: Vec::new(),
            visible_waiters: FxHashMap::default(),
            pending_http: FxHashMap::default(),
            stream_conns: FxHashMap::default(),
            host,
            sanitizer: None,
            current_binding: None,
            events: Vec::new(),
            processed: FxHashSet::default(),
        }
    }

    /// Load a server-rendered document and compile it.
    pub fn from_html(markup: &str, host: Host) -> Self {
        let mut engine = Self::new(host);
        engine.doc = html::load_document(markup);
        engine.init(None);
        engine
    }

    // ── Compilation ───────────────────────────────────────────────────

    /// Compile a subtree: discover definitions first (document order, so
    /// later bindings see earlier names), then attach bindings.
    pub fn init(&mut self, root: Option<NodeId>) {
        let root = root.unwrap_or_else(|| self.doc.root());
        let elements = self.scan_elements(root);

        for &node in &elements {
            if self.processed.contains(&node) {
                continue;
            }
            let tag = self.doc.tag(node).map(str::to_string);
            match tag.as_deref() {
                Some("state") => {
                    state::init_state(self, node, None, false);
                }
                Some("src") => {
                    source::init_source(self, node, false);
                }
                _ => {}
            }
        }

        let no_locals = FxHashMap::default();
        for node in elements {
            if self.processed.contains(&node) {
                continue;
            }
            let tag = self.doc.tag(node).map(str::to_string);
            match tag.as_deref() {
                Some("insert") => list::init_insert(self, node),
                Some("template" | "loading" | "error" | "empty") => {
                    self.processed.insert(node);
                }
                // Definition elements still take `jtx-on` listeners so
                // authors can react to their init/update/error events.
                _ => binding::bind_element(self, node, &no_locals),
            }
        }

        self.tick();
    }

    /// Pre-order elements of a subtree, not descending into `<template>`
    /// (blueprints compile per rendered item, not at scan time).
    fn scan_elements(&self, root: NodeId) -> Vec<NodeId> {
        let mut elements = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if self.doc.is_element(node) {
                elements.push(node);
                if self.doc.tag(node) == Some("template") {
                    continue;
                }
            }
            let children = self.doc.children(node);
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }
        elements
    }

    // ── Scheduler ─────────────────────────────────────────────────────

    pub(crate) fn mark_changed(&mut self, def: DefId) {
        self.changed.insert(def);
    }

    fn has_work(&self) -> bool {
        if !self.changed.is_empty() || !self.deferred.is_empty() {
            return true;
        }
        self.registry.ids().into_iter().any(|id| {
            self.registry
                .state(id)
                .map(|state| !state.pending.is_empty())
                .unwrap_or(false)
        })
    }

    /// Drain the render queue until quiescent. One iteration is one
    /// microtask flush; re-entrant writes land in the next iteration.
    pub fn tick(&mut self) {
        let mut rounds = 0;
        while self.has_work() {
            let deferred = std::mem::take(&mut self.deferred);
            for task in deferred {
                match task {
                    Deferred::Activate(def) => source::activate(self, def),
                }
            }
            self.flush();
            rounds += 1;
            if rounds > 64 {
                log::warn!("render queue did not settle after {rounds} flushes");
                break;
            }
        }
    }

    /// One microtask flush: settle pending state keys (persist, URL sync,
    /// `update` events), then rerun the bindings of the changed set.
    fn flush(&mut self) {
        let pending_states: Vec<DefId> = self
            .registry
            .ids()
            .into_iter()
            .filter(|&id| {
                self.registry
                    .state(id)
                    .map(|state| !state.pending.is_empty())
                    .unwrap_or(false)
            })
            .collect();
        for id in pending_states {
            state::flush_pending(self, id);
        }

        let mut changed: Vec<DefId> = self.changed.drain().collect();
        changed.sort();
        let affected = self.graph.bindings_of(&changed);
        log::debug!("flush: {} changed, {} bindings", changed.len(), affected.len());
        for binding_id in affected {
            self.run_binding(binding_id);
        }
    }

    // ── Bindings ──────────────────────────────────────────────────────

    pub(crate) fn add_binding(&mut self, binding: Binding) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        self.node_bindings
            .entry(binding.element)
            .or_default()
            .push(id);
        if let BindingKind::If { placeholder, .. } = &binding.kind {
            self.if_placeholders.insert(*placeholder, id);
        }
        self.bindings.push(Some(binding));
        id
    }

    pub(crate) fn binding(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(id.0 as usize)?.as_ref()
    }

    pub(crate) fn set_if_parked(&mut self, id: BindingId, value: bool) {
        if let Some(Some(binding)) = self.bindings.get_mut(id.0 as usize) {
            if let BindingKind::If { parked, .. } = &mut binding.kind {
                *parked = value;
            }
        }
    }

    pub(crate) fn with_list_binding<R>(
        &mut self,
        id: BindingId,
        f: impl FnOnce(&mut ListBinding) -> R,
    ) -> Option<R> {
        match self.bindings.get_mut(id.0 as usize)?.as_mut()? {
            Binding {
                kind: BindingKind::List(list),
                ..
            } => Some(f(list)),
            _ => None,
        }
    }

    /// Rerun one binding: edges rebuilt from scratch, errors contained.
    pub(crate) fn run_binding(&mut self, id: BindingId) {
        if self.binding(id).is_none() {
            return;
        }
        self.graph.clear_binding(id);
        let previous = self.current_binding.replace(id);
        binding::apply_binding(self, id);
        self.current_binding = previous;
    }

    pub(crate) fn add_handler(&mut self, handler: Handler) -> HandlerId {
        let id = HandlerId(self.handlers.len() as u32);
        self.node_handlers
            .entry(handler.element)
            .or_default()
            .push(id);
        self.handlers.push(Some(handler));
        id
    }

    fn run_handler(&mut self, id: HandlerId, event: Option<Value>) {
        let Some(handler) = self.handlers.get(id.0 as usize).and_then(Option::as_ref) else {
            return;
        };
        let element = handler.element;
        let program = handler.program.clone();
        let locals = handler.locals.clone();
        if !self.doc.is_valid(element) {
            return;
        }
        let env = Env {
            element,
            locals,
            event,
        };
        let mut cx = EvalCx { engine: self, env: &env };
        if let Err(error) = eval::run_program(&mut cx, &program) {
            log::warn!("handler failed: {error}");
        }
    }

    // ── Evaluation plumbing ───────────────────────────────────────────

    pub(crate) fn eval_program(
        &mut self,
        env: &Env,
        program: &Program,
    ) -> Result<Value, EvalError> {
        let mut cx = EvalCx { engine: self, env };
        eval::run_program(&mut cx, program)
    }

    fn eval_program_scalar(
        &mut self,
        env: &Env,
        program: &Program,
    ) -> Result<Value, EvalError> {
        let mut cx = EvalCx { engine: self, env };
        eval::run_program_scalar(&mut cx, program)
    }

    /// Binding-run evaluation: failures are logged and become `None` so the
    /// caller can fall back per §"no error escapes the scheduler".
    pub(crate) fn eval_binding_expr(
        &mut self,
        _id: BindingId,
        element: NodeId,
        program: &Program,
    ) -> Option<Value> {
        let env = Env::at(element);
        match self.eval_program(&env, program) {
            Ok(value) => Some(value),
            Err(error) => {
                log::warn!("binding expression `{}` failed: {error}", program.source);
                None
            }
        }
    }

    pub(crate) fn eval_binding_scalar(
        &mut self,
        _id: BindingId,
        element: NodeId,
        program: &Program,
    ) -> Option<Value> {
        let env = Env::at(element);
        match self.eval_program_scalar(&env, program) {
            Ok(value) => Some(value),
            Err(error) => {
                log::warn!("binding expression `{}` failed: {error}", program.source);
                None
            }
        }
    }

    pub(crate) fn ref_path_for_binding(
        &mut self,
        _id: BindingId,
        env: &Env,
        name: &str,
        path: &[String],
    ) -> Value {
        let mut cx = EvalCx { engine: self, env };
        cx.ref_path(name, path)
    }

    /// Model capture and handler writes share this path: write into the
    /// state resolved from `element`, mark the key pending, queue a render.
    pub(crate) fn write_state_path(
        &mut self,
        element: NodeId,
        name: &str,
        path: &[String],
        value: Value,
    ) {
        let env = Env::at(element);
        let mut cx = EvalCx { engine: self, env: &env };
        if let Err(error) = cx.ref_assign(name, path, value) {
            log::warn!("model write to `@{name}` failed: {error}");
        }
    }

    pub(crate) fn record_dep(&mut self, def: DefId) {
        if let Some(binding) = self.current_binding {
            self.graph.record(binding, def);
        }
    }

    // ── Events ────────────────────────────────────────────────────────

    /// Dispatch a bubbling event: log it, run model captures for native
    /// control events, then run every matching `jtx-on` listener on the
    /// target and its ancestors.
    pub(crate) fn fire(&mut self, target: NodeId, name: &str, detail: Value) {
        self.events.push(EmittedEvent {
            target,
            name: name.to_string(),
            detail: detail.clone(),
        });

        if name == "input" || name == "change" {
            binding::model_capture(self, target);
        }

        let mut to_run = Vec::new();
        for node in self.doc.ancestors_inclusive(target) {
            if let Some(listeners) = self.listeners.get(&node) {
                for listener in listeners {
                    if listener.event == name {
                        to_run.push(listener.handler);
                    }
                }
            }
        }
        if to_run.is_empty() {
            return;
        }
        let event_value = Value::object([
            ("type", Value::text(name)),
            ("detail", detail),
        ]);
        for handler in to_run {
            self.run_handler(handler, Some(event_value.clone()));
        }
    }

    /// Public entry: dispatch an event and settle the render queue.
    pub fn dispatch(&mut self, target: NodeId, event: &str, detail: Value) {
        self.fire(target, event, detail);
        self.tick();
    }

    pub fn click(&mut self, target: NodeId) {
        self.dispatch(target, "click", Value::Null);
    }

    /// Simulate typing: set the control's value, then dispatch `input`.
    pub fn input(&mut self, target: NodeId, text: &str) {
        self.doc.set_attr(target, "value", text);
        self.dispatch(target, "input", Value::text(text));
    }

    /// Drain and return the event log.
    pub fn take_events(&mut self) -> Vec<EmittedEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Host deliveries ───────────────────────────────────────────────

    /// Completion of a ticketed source fetch. A response for a request the
    /// engine no longer tracks is dropped (a newer fetch superseded it —
    /// the last writer wins by writing last).
    pub fn http_response(&mut self, id: RequestId, result: Result<HttpResponse, String>) {
        if let Some(def) = self.pending_http.remove(&id) {
            source::on_http_response(self, def, result);
        }
        self.tick();
    }

    /// Resolve every pending fetch the host can answer immediately.
    pub fn pump_http(&mut self) {
        loop {
            let pending = self.host.http.take_pending();
            if pending.is_empty() {
                break;
            }
            let mut completions = Vec::new();
            for (id, request) in pending {
                match self.host.http.try_complete(&request) {
                    Some(result) => completions.push((id, result)),
                    None => log::debug!("fetch {} has no immediate completion", request.url),
                }
            }
            if completions.is_empty() {
                break;
            }
            for (id, result) in completions {
                self.http_response(id, result);
            }
        }
    }

    pub fn stream_event(&mut self, conn: ConnId, event: StreamEvent) {
        if let Some(&def) = self.stream_conns.get(&conn) {
            source::on_stream_event(self, def, event);
        }
        self.tick();
    }

    /// Advance virtual time; due timers fire in deadline order.
    pub fn advance_time(&mut self, ms: u64) {
        let fired = self.timers.advance(ms);
        for (owner, action) in fired {
            if !self.doc.is_valid(owner) {
                continue;
            }
            match action {
                TimerAction::RunHandler(handler) => self.run_handler(handler, None),
                TimerAction::FetchSource(def) => source::activate(self, def),
                TimerAction::IdleFallback(def) => {
                    if let Some(at) = self.idle_waiters.iter().position(|&d| d == def) {
                        self.idle_waiters.remove(at);
                        source::activate(self, def);
                    }
                }
            }
        }
        self.tick();
    }

    /// The host reports an idle period: idle-armed sources fetch now.
    pub fn signal_idle(&mut self) {
        let waiting = std::mem::take(&mut self.idle_waiters);
        for def in waiting {
            source::activate(self, def);
        }
        self.tick();
    }

    /// The host reports an element became visible (intersection).
    pub fn element_visible(&mut self, element: NodeId) {
        if let Some(def) = self.visible_waiters.remove(&element) {
            source::activate(self, def);
        }
        self.tick();
    }

    /// Force a named source to refresh. Returns false for unknown names.
    pub fn refresh(&mut self, name: &str) -> bool {
        let Some(def) = self.registry.global_source(name) else {
            log::warn!("refresh: no source named `{name}`");
            return false;
        };
        source::refresh(self, def);
        self.tick();
        true
    }

    // ── Sanitizer and HTML insertion ──────────────────────────────────

    /// Install the sanitizer invoked for every `html` insertion.
    pub fn set_html_sanitizer(&mut self, sanitizer: impl Fn(&str) -> String + 'static) {
        self.sanitizer = Some(Box::new(sanitizer));
    }

    pub(crate) fn sanitize(&self, markup: &str) -> String {
        match &self.sanitizer {
            Some(sanitizer) => sanitizer(markup),
            None => markup.to_string(),
        }
    }

    pub(crate) fn set_inner_html(&mut self, element: NodeId, markup: &str) {
        let removed = self.doc.remove_children(element);
        self.cleanup_removed(removed);
        html::append_fragment(&mut self.doc, element, markup);
    }

    // ── Removal and cleanup ───────────────────────────────────────────

    /// Remove a subtree through the engine so reactive resources die with
    /// it. This is the DOM-removal hook of the design: bindings drop their
    /// graph rows, timers and stream connections close, definitions leave
    /// the registry (globals only while they still hold their name).
    pub fn remove_node(&mut self, node: NodeId) {
        let removed = self.doc.remove_subtree(node);
        self.cleanup_removed(removed);
        self.tick();
    }

    pub(crate) fn cleanup_removed(&mut self, removed: Vec<NodeId>) {
        let mut queue = removed;
        while let Some(node) = queue.pop() {
            self.processed.remove(&node);
            self.listeners.remove(&node);
            self.visible_waiters.remove(&node);

            if let Some(handler_ids) = self.node_handlers.remove(&node) {
                for handler in handler_ids {
                    if let Some(slot) = self.handlers.get_mut(handler.0 as usize) {
                        *slot = None;
                    }
                }
            }
            if let Some(timer_ids) = self.node_timers.remove(&node) {
                for timer in timer_ids {
                    self.timers.cancel(timer);
                }
            }

            // A removed placeholder takes its parked `jtx-if` element along.
            if let Some(binding_id) = self.if_placeholders.remove(&node) {
                let parked_element = match self.binding(binding_id) {
                    Some(Binding {
                        element,
                        kind: BindingKind::If { parked: true, .. },
                    }) => Some(*element),
                    _ => None,
                };
                if let Some(element) = parked_element {
                    queue.extend(self.doc.remove_subtree(element));
                }
            }

            self.model_bindings.remove(&node);
            if let Some(binding_ids) = self.node_bindings.remove(&node) {
                for binding_id in binding_ids {
                    enum Aux {
                        IfStandIn { placeholder: NodeId, parked: bool },
                        List,
                        None,
                    }
                    let aux = match self.binding(binding_id) {
                        Some(Binding {
                            kind:
                                BindingKind::If {
                                    placeholder,
                                    parked,
                                    ..
                                },
                            ..
                        }) => Aux::IfStandIn {
                            placeholder: *placeholder,
                            parked: *parked,
                        },
                        Some(Binding {
                            kind: BindingKind::List(_),
                            ..
                        }) => Aux::List,
                        _ => Aux::None,
                    };
                    self.graph.clear_binding(binding_id);
                    if let Some(slot) = self.bindings.get_mut(binding_id.0 as usize) {
                        *slot = None;
                    }
                    match aux {
                        Aux::List => list::on_list_removed(self, node),
                        Aux::IfStandIn {
                            placeholder,
                            parked,
                        } => {
                            self.if_placeholders.remove(&placeholder);
                            // Whichever stand-in is currently out of the
                            // tree dies with the binding.
                            if !parked && self.doc.is_valid(placeholder) {
                                queue.extend(self.doc.remove_subtree(placeholder));
                            }
                        }
                        Aux::None => {}
                    }
                }
            }

            if let Some(def_id) = self.registry.def_at(node) {
                if matches!(self.registry.get(def_id), Some(Definition::Source(_))) {
                    source::teardown(self, def_id);
                }
                self.registry.remove(def_id);
                self.graph.remove_def(def_id);
                self.changed.remove(&def_id);
            }
        }
    }

    // ── Introspection ─────────────────────────────────────────────────

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut Host {
        &mut self.host
    }

    /// The page query string as the host currently sees it.
    pub fn url_query(&self) -> String {
        self.host.url.query()
    }

    /// Raw durable-store entry (`jtx:<state>:<key>`).
    pub fn storage_get(&self, key: &str) -> Option<String> {
        self.host.storage.get(key)
    }

    pub fn doc_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn to_html(&self) -> String {
        html::to_html(&self.doc, self.doc.root())
    }

    /// Current value map of a global state, for inspection.
    pub fn state_value(&self, name: &str) -> Option<Value> {
        let id = self.registry.global_state(name)?;
        Some(self.registry.state(id)?.snapshot())
    }

    /// Current status string of a global source.
    pub fn source_status(&self, name: &str) -> Option<&'static str> {
        let id = self.registry.global_source(name)?;
        Some(self.registry.source(id)?.status.as_str())
    }

    pub fn source_value(&self, name: &str) -> Option<Value> {
        let id = self.registry.global_source(name)?;
        Some(self.registry.source(id)?.value.clone())
    }
}

// ── The evaluator's view of the engine ────────────────────────────────

struct EvalCx<'a> {
    engine: &'a mut Engine,
    env: &'a Env,
}

impl EvalCx<'_> {
    fn resolve(&mut self, name: &str) -> Option<DefId> {
        let found = scope::resolve(self.engine, self.env.element, name);
        if let Some(def) = found {
            self.engine.record_dep(def);
        }
        found
    }

    fn element_info(&self) -> Value {
        let element = self.env.element;
        let doc = &self.engine.doc;
        let mut fields = vec![(
            "tag",
            Value::text(doc.tag(element).unwrap_or_default()),
        )];
        for attr in ["id", "name", "value"] {
            if let Some(found) = doc.attr(element, attr) {
                fields.push((attr, Value::text(found)));
            }
        }
        fields.push(("checked", Value::Bool(doc.has_attr(element, "checked"))));
        Value::object(fields)
    }
}

impl EvalHost for EvalCx<'_> {
    fn local(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.env.locals.get(name) {
            return Some(value.clone());
        }
        match name {
            "$event" => self.env.event.clone(),
            "$el" => Some(self.element_info()),
            _ => None,
        }
    }

    fn ref_value(&mut self, name: &str) -> Value {
        match self.resolve(name) {
            Some(def_id) => match self.engine.registry.get(def_id) {
                Some(Definition::State(state)) => state.snapshot(),
                Some(Definition::Source(src)) => src.value.clone(),
                None => Value::object([] as [(&str, Value); 0]),
            },
            None => {
                log::warn!("unknown reference `@{name}`");
                Value::object([] as [(&str, Value); 0])
            }
        }
    }

    fn ref_path(&mut self, name: &str, path: &[String]) -> Value {
        let Some(def_id) = self.resolve(name) else {
            log::warn!("unknown reference `@{name}`");
            return Value::Null;
        };
        let Some((first, rest)) = path.split_first() else {
            return self.ref_value(name);
        };
        let base = match self.engine.registry.get(def_id) {
            Some(Definition::State(state)) => state.get(first),
            Some(Definition::Source(src)) => match first.as_str() {
                "$status" => Value::text(src.status.as_str()),
                "$error" => src
                    .error
                    .as_ref()
                    .map(|error| error.to_value())
                    .unwrap_or(Value::Null),
                other => eval::member_of(&src.value, other),
            },
            None => return Value::Null,
        };
        let mut value = base;
        for segment in rest {
            value = eval::member_of(&value, segment);
        }
        value
    }

    fn ref_coerced(&mut self, name: &str) -> Value {
        match self.resolve(name) {
            Some(def_id) => match self.engine.registry.get(def_id) {
                Some(Definition::State(state)) => state.coerced(),
                Some(Definition::Source(src)) => src.value.clone(),
                None => Value::Null,
            },
            None => {
                log::warn!("unknown reference `@{name}`");
                Value::object([] as [(&str, Value); 0])
            }
        }
    }

    fn ref_assign(
        &mut self,
        name: &str,
        path: &[String],
        value: Value,
    ) -> Result<(), EvalError> {
        let Some((first, rest)) = path.split_first() else {
            return Err(EvalError::BadAssignTarget);
        };
        let Some(def_id) = self.resolve(name) else {
            return Err(EvalError::Message(format!("unknown reference `@{name}`")));
        };
        let Some(state) = self.engine.registry.state_mut(def_id) else {
            return Err(EvalError::ReadOnly(name.to_string()));
        };
        let key = state.canonical_key(first);
        let mut slot = state.value.get(key.as_str()).cloned().unwrap_or(Value::Null);
        if rest.is_empty() {
            slot = value;
        } else {
            util::set_path(&mut slot, rest, value);
        }
        state.value.insert(Arc::from(key.as_str()), slot);
        state.pending.insert(key);
        self.engine.mark_changed(def_id);
        Ok(())
    }

    fn ref_method(
        &mut self,
        name: &str,
        method: &str,
        _args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        if method != "refresh" {
            return Err(EvalError::NotCallable(method.to_string()));
        }
        let Some(def_id) = self.resolve(name) else {
            return Err(EvalError::Message(format!("unknown reference `@{name}`")));
        };
        if self.engine.registry.source(def_id).is_none() {
            return Err(EvalError::Message(format!("`@{name}` is not a source")));
        }
        source::refresh(self.engine, def_id);
        Ok(Value::Null)
    }

    fn call_helper(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        match name {
            "emit" => {
                let event = args
                    .first()
                    .map(Value::to_text)
                    .filter(|event| !event.is_empty())
                    .ok_or_else(|| EvalError::Message("emit needs an event name".into()))?;
                let detail = args.get(1).cloned().unwrap_or(Value::Null);
                self.engine.fire(self.env.element, &event, detail);
                Ok(Value::Null)
            }
            "refresh" => {
                let target = args
                    .first()
                    .map(Value::to_text)
                    .filter(|target| !target.is_empty())
                    .ok_or_else(|| EvalError::Message("refresh needs a source".into()))?;
                match scope::resolve(self.engine, self.env.element, &target)
                    .filter(|&def| self.engine.registry.source(def).is_some())
                    .or_else(|| self.engine.registry.global_source(&target))
                {
                    Some(def) => {
                        source::refresh(self.engine, def);
                        Ok(Value::Null)
                    }
                    None => {
                        log::warn!("refresh: no source named `{target}`");
                        Ok(Value::Null)
                    }
                }
            }
            "get" | "post" | "put" | "patch" | "del" => {
                let method = match name {
                    "get" => "GET",
                    "post" => "POST",
                    "put" => "PUT",
                    "patch" => "PATCH",
                    _ => "DELETE",
                };
                let url = args
                    .first()
                    .map(Value::to_text)
                    .filter(|url| !url.is_empty())
                    .ok_or_else(|| EvalError::Message(format!("{name} needs a url")))?;
                let body = args.get(1).filter(|body| !body.is_null());
                let mut headers: Vec<(String, String)> = args
                    .get(2)
                    .and_then(Value::as_object)
                    .map(|fields| {
                        fields
                            .iter()
                            .map(|(key, value)| (key.to_string(), value.to_text()))
                            .collect()
                    })
                    .unwrap_or_default();
                let body = body.map(|value| {
                    if !headers
                        .iter()
                        .any(|(key, _)| key.eq_ignore_ascii_case("content-type"))
                    {
                        headers.push(("content-type".into(), "application/json".into()));
                    }
                    value.to_json()
                });
                let request = HttpRequest {
                    method,
                    url,
                    headers,
                    body,
                };
                let response = self
                    .engine
                    .host
                    .http
                    .perform(request)
                    .map_err(EvalError::Http)?;
                if !response.is_success() {
                    return Err(EvalError::Http(format!("HTTP {}", response.status)));
                }
                if response.status == 204 || response.body.trim().is_empty() {
                    return Ok(Value::Null);
                }
                Value::from_json(&response.body)
                    .map_err(|error| EvalError::Http(error.to_string()))
            }
            other => Err(EvalError::UnknownHelper(other.to_string())),
        }
    }
}

