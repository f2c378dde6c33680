//! Shared helpers for the scenario tests.

use jtx::dom::NodeId;
use jtx::host::{Host, MemoryStorage, MemoryStreams, MemoryUrl, ScriptedHttp};
use jtx::{EmittedEvent, Engine};

/// Build an engine over an in-memory host.
pub fn engine_from(markup: &str) -> Engine {
    Engine::from_html(markup, Host::in_memory())
}

/// Build an engine with scripted HTTP responses queued up front.
#[allow(dead_code)]
pub fn engine_with_http(markup: &str, script: impl FnOnce(&mut ScriptedHttp)) -> Engine {
    let mut http = ScriptedHttp::default();
    script(&mut http);
    let host = Host {
        storage: Box::new(MemoryStorage::default()),
        http: Box::new(http),
        streams: Box::new(MemoryStreams::default()),
        url: Box::new(MemoryUrl::default()),
    };
    Engine::from_html(markup, host)
}

pub fn text_of(engine: &Engine, id: &str) -> String {
    let node = engine
        .doc()
        .element_by_id(id)
        .unwrap_or_else(|| panic!("no element with id `{id}`"));
    engine.doc().text_content(node)
}

pub fn by_id(engine: &Engine, id: &str) -> NodeId {
    engine
        .doc()
        .element_by_id(id)
        .unwrap_or_else(|| panic!("no element with id `{id}`"))
}

/// Texts of the rendered items inside an insert element, in order.
#[allow(dead_code)]
pub fn item_texts(engine: &Engine, insert_id: &str) -> Vec<String> {
    let insert = by_id(engine, insert_id);
    engine
        .doc()
        .children(insert)
        .into_iter()
        .filter(|&child| engine.doc().attr(child, "jtx-key").is_some())
        .map(|child| engine.doc().text_content(child))
        .collect()
}

/// Keys of the rendered items inside an insert element, in order.
#[allow(dead_code)]
pub fn item_keys(engine: &Engine, insert_id: &str) -> Vec<String> {
    let insert = by_id(engine, insert_id);
    engine
        .doc()
        .children(insert)
        .into_iter()
        .filter_map(|child| engine.doc().attr(child, "jtx-key").map(str::to_string))
        .collect()
}

#[allow(dead_code)]
pub fn events_named<'e>(events: &'e [EmittedEvent], name: &str) -> Vec<&'e EmittedEvent> {
    events.iter().filter(|event| event.name == name).collect()
}

/// Is the element visible (no `hidden` marker)?
#[allow(dead_code)]
pub fn visible(engine: &Engine, id: &str) -> bool {
    !engine.doc().has_attr(by_id(engine, id), "hidden")
}
