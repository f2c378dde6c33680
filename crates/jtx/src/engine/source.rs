//! Data sources: `<src name="..." url="..." fetch="..." ...>`.
//!
//! One model covers single-shot HTTP and streaming feeds: a source is an
//! observable value with a status, a last error, and optional status slot
//! elements whose visibility follows the status machine. The transport is
//! inferred from the URL scheme.

use crate::dom::NodeId;
use crate::expr::{self, Program};
use crate::host::{HttpRequest, StreamEvent, StreamKind};
use crate::util;
use crate::value::Value;

use super::registry::{DefId, Definition};
use super::{Engine, Env};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Http,
    Sse,
    Ws,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Http => "http",
            SourceKind::Sse => "sse",
            SourceKind::Ws => "ws",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Idle,
    Loading,
    Ready,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Idle => "idle",
            SourceStatus::Loading => "loading",
            SourceStatus::Ready => "ready",
            SourceStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Network,
    Format,
    Connection,
}

impl SourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceErrorKind::Network => "network",
            SourceErrorKind::Format => "format",
            SourceErrorKind::Connection => "connection",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub raw: Option<String>,
}

impl SourceError {
    pub fn to_value(&self) -> Value {
        let mut fields = vec![
            ("type", Value::text(self.kind.as_str())),
            ("message", Value::text(self.message.as_str())),
        ];
        if let Some(status) = self.status {
            fields.push(("status", Value::int(status as i64)));
        }
        if let Some(raw) = &self.raw {
            fields.push(("raw", Value::text(raw.as_str())));
        }
        Value::object(fields)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchModes {
    pub onload: bool,
    pub idle: bool,
    pub visible: bool,
    pub manual: bool,
    pub every_ms: Option<u64>,
}

impl FetchModes {
    fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self {
                onload: true,
                ..Self::default()
            };
        };
        let mut modes = Self::default();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if let Some(duration) = entry.strip_prefix("every ") {
                match util::parse_duration_ms(duration) {
                    Some(ms) => modes.every_ms = Some(ms),
                    None => log::warn!("unparseable fetch interval `{entry}`"),
                }
            } else {
                match entry {
                    "onload" => modes.onload = true,
                    "idle" => modes.idle = true,
                    "visible" => modes.visible = true,
                    "manual" => modes.manual = true,
                    other => log::warn!("unknown fetch mode `{other}`"),
                }
            }
        }
        if !(modes.onload || modes.idle || modes.visible || modes.manual)
            && modes.every_ms.is_none()
        {
            modes.onload = true;
        }
        modes
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSlots {
    pub loading: Option<NodeId>,
    pub error: Option<NodeId>,
    pub empty: Option<NodeId>,
}

#[derive(Debug)]
pub struct SourceDef {
    pub name: String,
    pub element: NodeId,
    pub url: String,
    pub kind: SourceKind,
    pub value: Value,
    pub status: SourceStatus,
    pub error: Option<SourceError>,
    pub select: Option<Vec<String>>,
    pub sse_event: Option<String>,
    pub fetch_modes: FetchModes,
    pub headers_program: Option<Program>,
    pub slots: StatusSlots,
    pub conn: Option<crate::host::ConnId>,
    pub opened_once: bool,
    pub scoped: bool,
}

pub fn init_source(engine: &mut Engine, element: NodeId, scoped: bool) -> Option<DefId> {
    let Some(name) = engine.doc.attr(element, "name").map(str::to_string) else {
        log::warn!("<src> without a name is ignored");
        return None;
    };
    let Some(url) = engine.doc.attr(element, "url").map(str::to_string) else {
        log::warn!("source `{name}` has no url; ignored");
        return None;
    };

    let kind = if url.starts_with("sse:") {
        SourceKind::Sse
    } else if url.starts_with("ws:") || url.starts_with("wss:") {
        SourceKind::Ws
    } else {
        SourceKind::Http
    };

    let select = engine
        .doc
        .attr(element, "select")
        .map(util::parse_path)
        .filter(|path| !path.is_empty());
    let sse_event = engine
        .doc
        .attr(element, "sse-event")
        .map(str::to_string)
        .filter(|event| !event.is_empty());
    let fetch_modes = FetchModes::parse(engine.doc.attr(element, "fetch"));
    let headers_program = engine.doc.attr(element, "headers").and_then(|raw| {
        match expr::compile_expression(raw) {
            Ok(program) => Some(program),
            Err(error) => {
                log::warn!("source `{name}` headers expression is invalid: {error}");
                None
            }
        }
    });

    // Status slots start hidden; the status updater is their only toggle.
    let mut slots = StatusSlots::default();
    for child in engine.doc.element_children(element) {
        match engine.doc.tag(child) {
            Some("loading") => slots.loading = Some(child),
            Some("error") => slots.error = Some(child),
            Some("empty") => slots.empty = Some(child),
            _ => {}
        }
    }
    for slot in [slots.loading, slots.error, slots.empty].into_iter().flatten() {
        engine.doc.set_attr(slot, super::HIDDEN_ATTR, "");
    }

    let def = SourceDef {
        name: name.clone(),
        element,
        url,
        kind,
        value: Value::Null,
        status: SourceStatus::Idle,
        error: None,
        select,
        sse_event,
        fetch_modes: fetch_modes.clone(),
        headers_program,
        slots,
        conn: None,
        opened_once: false,
        scoped,
    };

    let id = if scoped {
        engine.registry.insert_scoped(Definition::Source(def))
    } else {
        match engine.registry.insert_global(Definition::Source(def)) {
            Ok(id) => id,
            Err(Definition::Source(mut shadow)) => {
                log::warn!("source name `{name}` is already registered; keeping it scoped");
                shadow.scoped = true;
                engine.registry.insert_scoped(Definition::Source(shadow))
            }
            Err(other) => engine.registry.insert_scoped(other),
        }
    };

    engine.fire(element, "init", Value::object([("name", Value::text(name))]));

    // Arm the configured fetch triggers.
    if fetch_modes.onload {
        engine.deferred.push(super::Deferred::Activate(id));
    }
    if fetch_modes.idle {
        engine.idle_waiters.push(id);
        // Fallback: a short timeout fires if the host never reports idle.
        let timer = engine.timers.schedule(
            200,
            None,
            element,
            super::timers::TimerAction::IdleFallback(id),
        );
        engine.node_timers.entry(element).or_default().push(timer);
    }
    if fetch_modes.visible {
        engine.visible_waiters.insert(element, id);
    }
    if let Some(interval) = fetch_modes.every_ms {
        let timer = engine.timers.schedule(
            interval,
            Some(interval),
            element,
            super::timers::TimerAction::FetchSource(id),
        );
        engine.node_timers.entry(element).or_default().push(timer);
    }

    Some(id)
}

/// The status updater: the single place `status` changes, so the slots can
/// never disagree with it.
pub fn set_status(engine: &mut Engine, def_id: DefId, status: SourceStatus) {
    let Some(source) = engine.registry.source_mut(def_id) else {
        return;
    };
    source.status = status;
    let slots = source.slots;
    let show_loading = status == SourceStatus::Loading;
    let show_error = status == SourceStatus::Error;
    let show_empty = status == SourceStatus::Ready && source.value.is_empty_like();

    for (slot, visible) in [
        (slots.loading, show_loading),
        (slots.error, show_error),
        (slots.empty, show_empty),
    ] {
        if let Some(slot) = slot {
            if visible {
                engine.doc.remove_attr(slot, super::HIDDEN_ATTR);
            } else {
                engine.doc.set_attr(slot, super::HIDDEN_ATTR, "");
            }
        }
    }
}

/// Start (or restart) a source: begin an HTTP fetch, or (re)open a stream.
pub fn activate(engine: &mut Engine, def_id: DefId) {
    let Some(source) = engine.registry.source(def_id) else {
        return;
    };
    match source.kind {
        SourceKind::Http => begin_fetch(engine, def_id),
        SourceKind::Sse | SourceKind::Ws => open_stream(engine, def_id),
    }
}

fn eval_headers(engine: &mut Engine, def_id: DefId) -> Vec<(String, String)> {
    let Some(source) = engine.registry.source(def_id) else {
        return Vec::new();
    };
    let Some(program) = source.headers_program.clone() else {
        return Vec::new();
    };
    let element = source.element;
    let name = source.name.clone();
    let env = Env::at(element);
    match engine.eval_program(&env, &program) {
        Ok(Value::Object(fields)) => fields
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_text()))
            .collect(),
        Ok(_) => Vec::new(),
        Err(error) => {
            log::warn!("source `{name}` headers evaluation failed: {error}");
            Vec::new()
        }
    }
}

fn begin_fetch(engine: &mut Engine, def_id: DefId) {
    // Headers are re-evaluated on every fetch so they can read live state.
    let headers = eval_headers(engine, def_id);
    let Some(source) = engine.registry.source(def_id) else {
        return;
    };
    let element = source.element;
    let url = source.url.clone();
    let name = source.name.clone();

    set_status(engine, def_id, SourceStatus::Loading);
    engine.mark_changed(def_id);

    let header_detail = Value::object(
        headers
            .iter()
            .map(|(key, value)| (key.as_str(), Value::text(value.as_str()))),
    );
    engine.fire(
        element,
        "fetch",
        Value::object([
            ("url", Value::text(url.as_str())),
            ("headers", header_detail),
        ]),
    );
    log::debug!("source `{name}` fetching {url}");

    let request = HttpRequest {
        method: "GET",
        url,
        headers,
        body: None,
    };
    let request_id = engine.host.http.begin(request);
    engine.pending_http.insert(request_id, def_id);
}

fn open_stream(engine: &mut Engine, def_id: DefId) {
    let origin = engine.host.url.origin();
    let prior = engine
        .registry
        .source_mut(def_id)
        .and_then(|source| source.conn.take());
    if let Some(conn) = prior {
        engine.stream_conns.remove(&conn);
        engine.host.streams.close(conn);
    }
    let Some(source) = engine.registry.source(def_id) else {
        return;
    };
    let (connect_url, kind) = match source.kind {
        SourceKind::Sse => (
            source.url.strip_prefix("sse:").unwrap_or(&source.url).to_string(),
            StreamKind::Sse,
        ),
        SourceKind::Ws => (util::normalize_ws_url(&source.url, &origin), StreamKind::Ws),
        SourceKind::Http => return,
    };
    let first_open = !source.opened_once;

    let conn = engine.host.streams.connect(&connect_url, kind);
    engine.stream_conns.insert(conn, def_id);
    if let Some(source) = engine.registry.source_mut(def_id) {
        source.conn = Some(conn);
    }
    if first_open {
        set_status(engine, def_id, SourceStatus::Loading);
        engine.mark_changed(def_id);
    }
}

/// `refresh` re-runs HTTP fetches and tears down + reopens streams.
pub fn refresh(engine: &mut Engine, def_id: DefId) {
    activate(engine, def_id);
}

fn record_error(engine: &mut Engine, def_id: DefId, error: SourceError) {
    let Some(source) = engine.registry.source_mut(def_id) else {
        return;
    };
    let element = source.element;
    let name = source.name.clone();
    source.error = Some(error.clone());

    let mut detail = vec![
        ("name", Value::text(name.as_str())),
        ("type", Value::text(error.kind.as_str())),
        ("message", Value::text(error.message.as_str())),
    ];
    if let Some(status) = error.status {
        detail.push(("status", Value::int(status as i64)));
    }
    if let Some(raw) = &error.raw {
        detail.push(("raw", Value::text(raw.as_str())));
    }
    engine.fire(element, "error", Value::object(detail));
    set_status(engine, def_id, SourceStatus::Error);
    engine.mark_changed(def_id);
}

fn apply_payload(engine: &mut Engine, def_id: DefId, payload: Value) {
    let Some(source) = engine.registry.source_mut(def_id) else {
        return;
    };
    let element = source.element;
    let name = source.name.clone();
    let value = match &source.select {
        Some(path) => util::get_path(&payload, path),
        None => payload,
    };
    source.value = value.clone();
    source.error = None;

    engine.fire(
        element,
        "update",
        Value::object([("name", Value::text(name)), ("value", value)]),
    );
    set_status(engine, def_id, SourceStatus::Ready);
    engine.mark_changed(def_id);
}

/// Completion of a ticketed HTTP fetch.
pub fn on_http_response(
    engine: &mut Engine,
    def_id: DefId,
    result: Result<crate::host::HttpResponse, String>,
) {
    match result {
        Err(message) => record_error(
            engine,
            def_id,
            SourceError {
                kind: SourceErrorKind::Network,
                status: None,
                message,
                raw: None,
            },
        ),
        Ok(response) if !response.is_success() => record_error(
            engine,
            def_id,
            SourceError {
                kind: SourceErrorKind::Network,
                status: Some(response.status),
                message: format!("HTTP {}", response.status),
                raw: Some(response.body),
            },
        ),
        Ok(response) => {
            // 204 and empty bodies are a valid "no value".
            if response.status == 204 || response.body.trim().is_empty() {
                apply_payload(engine, def_id, Value::Null);
                return;
            }
            match Value::from_json(&response.body) {
                Ok(payload) => apply_payload(engine, def_id, payload),
                Err(error) => record_error(
                    engine,
                    def_id,
                    SourceError {
                        kind: SourceErrorKind::Format,
                        status: None,
                        message: error.to_string(),
                        raw: Some(response.body),
                    },
                ),
            }
        }
    }
}

/// A transport event from the host's stream connector.
pub fn on_stream_event(engine: &mut Engine, def_id: DefId, event: StreamEvent) {
    match event {
        StreamEvent::Open => {
            let Some(source) = engine.registry.source_mut(def_id) else {
                return;
            };
            source.opened_once = true;
            let element = source.element;
            let kind = source.kind;
            let name = source.name.clone();
            engine.fire(
                element,
                "open",
                Value::object([
                    ("name", Value::text(name)),
                    ("type", Value::text(kind.as_str())),
                ]),
            );
            set_status(engine, def_id, SourceStatus::Ready);
            engine.mark_changed(def_id);
        }
        StreamEvent::Message {
            event_type,
            data,
            last_event_id,
        } => on_stream_message(engine, def_id, event_type, data, last_event_id),
        StreamEvent::Error(message) => record_error(
            engine,
            def_id,
            SourceError {
                kind: SourceErrorKind::Connection,
                status: None,
                message,
                raw: None,
            },
        ),
        StreamEvent::Closed { code, reason } => {
            let Some(source) = engine.registry.source_mut(def_id) else {
                return;
            };
            let element = source.element;
            let name = source.name.clone();
            let conn = source.conn.take();
            if let Some(conn) = conn {
                engine.stream_conns.remove(&conn);
            }
            let mut detail = vec![("name", Value::text(name))];
            if let Some(code) = code {
                detail.push(("code", Value::int(code as i64)));
            }
            if let Some(reason) = reason {
                detail.push(("reason", Value::text(reason)));
            }
            engine.fire(element, "close", Value::object(detail));
        }
    }
}

fn on_stream_message(
    engine: &mut Engine,
    def_id: DefId,
    event_type: Option<String>,
    data: String,
    last_event_id: Option<String>,
) {
    let Some(source) = engine.registry.source(def_id) else {
        return;
    };
    let element = source.element;
    let name = source.name.clone();
    let kind = source.kind;
    let filter = source.sse_event.clone();

    let type_name = event_type.clone().unwrap_or_else(|| "message".to_string());
    let mut detail = vec![
        ("name", Value::text(name.as_str())),
        ("type", Value::text(type_name.as_str())),
        ("data", Value::text(data.as_str())),
    ];
    if let Some(id) = &last_event_id {
        detail.push(("lastEventId", Value::text(id.as_str())));
    }
    engine.fire(element, "message", Value::object(detail.clone()));

    // Custom SSE event types also fan out as their own events so authors
    // can listen with `jtx-on="tick: ..."`.
    if type_name != "message" {
        engine.fire(element, &type_name, Value::object(detail));
    }

    // Does this message update the value?
    let updates = match (&filter, kind) {
        (Some(wanted), _) => type_name == *wanted,
        (None, SourceKind::Sse) => type_name == "message",
        (None, _) => true,
    };
    if !updates {
        return;
    }

    if data.trim().is_empty() {
        apply_payload(engine, def_id, Value::Null);
        return;
    }
    match Value::from_json(&data) {
        Ok(payload) => apply_payload(engine, def_id, payload),
        Err(error) => record_error(
            engine,
            def_id,
            SourceError {
                kind: SourceErrorKind::Format,
                status: None,
                message: error.to_string(),
                raw: Some(data),
            },
        ),
    }
}

/// Tear down a source when its element leaves the tree.
pub fn teardown(engine: &mut Engine, def_id: DefId) {
    let conn = engine
        .registry
        .source_mut(def_id)
        .and_then(|source| source.conn.take());
    if let Some(conn) = conn {
        engine.stream_conns.remove(&conn);
        engine.host.streams.close(conn);
    }
    engine.idle_waiters.retain(|&waiting| waiting != def_id);
}
