//! State definitions: `<state name="..." key="expr" ...>`.
//!
//! Every non-reserved attribute seeds one key by evaluating its value once.
//! Keys listed in `persist` mirror to durable storage under
//! `jtx:<name>:<key>`; keys in `persist-url` mirror to the query string.
//! Scoped instances (inside list items) can be rebuilt from a snapshot so
//! user-visible state survives a re-render.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::dom::NodeId;
use crate::expr;
use crate::util;
use crate::value::Value;

use super::registry::{DefId, Definition};
use super::{Engine, Env};

#[derive(Debug)]
pub struct StateDef {
    pub name: String,
    pub element: NodeId,
    pub value: BTreeMap<Arc<str>, Value>,
    pub persisted: Vec<String>,
    pub url_keys: Vec<String>,
    /// Keys written since the last flush.
    pub pending: BTreeSet<String>,
    /// Lowercased key -> canonical key, for case-insensitive access.
    pub aliases: FxHashMap<String, String>,
    pub scoped: bool,
}

impl StateDef {
    /// Map a key through the alias table; unseen keys become their own
    /// canonical spelling.
    pub fn canonical_key(&mut self, key: &str) -> String {
        let lowered = key.to_ascii_lowercase();
        if let Some(existing) = self.aliases.get(&lowered) {
            return existing.clone();
        }
        self.aliases.insert(lowered, key.to_string());
        key.to_string()
    }

    pub fn lookup_key(&self, key: &str) -> Option<&str> {
        self.aliases.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Value {
        let canonical = match self.lookup_key(key) {
            Some(found) => found,
            None => key,
        };
        self.value.get(canonical).cloned().unwrap_or(Value::Null)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        let canonical = self.canonical_key(key);
        self.value.insert(Arc::from(canonical.as_str()), value);
    }

    pub fn snapshot(&self) -> Value {
        Value::Object(Arc::new(self.value.clone()))
    }

    /// The canonical single value for scalar contexts: the first present
    /// key among `title`/`text`/`name`/`value`, or the only key's value.
    pub fn coerced(&self) -> Value {
        for key in ["title", "text", "name", "value"] {
            if let Some(found) = self.value.get(key) {
                return found.clone();
            }
        }
        if self.value.len() == 1 {
            return self.value.values().next().cloned().unwrap_or(Value::Null);
        }
        self.snapshot()
    }
}

const RESERVED_ATTRS: &[&str] = &["name", "persist", "persist-url"];

fn csv_attr(engine: &Engine, element: NodeId, name: &str) -> Vec<String> {
    engine
        .doc
        .attr(element, name)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Initialize a `<state>` element. `restore` carries a prior scoped
/// instance's values (keyed restoration across list re-renders).
pub fn init_state(
    engine: &mut Engine,
    element: NodeId,
    restore: Option<BTreeMap<Arc<str>, Value>>,
    scoped: bool,
) -> Option<DefId> {
    let Some(name) = engine.doc.attr(element, "name").map(str::to_string) else {
        log::warn!("<state> without a name is ignored");
        return None;
    };

    let mut def = StateDef {
        name: name.clone(),
        element,
        value: BTreeMap::new(),
        persisted: csv_attr(engine, element, "persist"),
        url_keys: csv_attr(engine, element, "persist-url"),
        pending: BTreeSet::new(),
        aliases: FxHashMap::default(),
        scoped,
    };

    // Seed keys from attribute expressions, evaluated once.
    let mut seed_errors: Vec<(String, String)> = Vec::new();
    for (attr_name, attr_value) in engine.doc.attrs(element) {
        if RESERVED_ATTRS.contains(&attr_name.as_str())
            || attr_name.starts_with(super::JTX_PREFIX)
        {
            continue;
        }
        let seeded = expr::compile_expression(&attr_value)
            .map_err(|error| error.to_string())
            .and_then(|program| {
                let env = Env::at(element);
                engine
                    .eval_program(&env, &program)
                    .map_err(|error| error.to_string())
            });
        match seeded {
            Ok(value) => def.insert(&attr_name, value),
            Err(message) => {
                log::warn!("state `{name}` key `{attr_name}` failed to initialize: {message}");
                def.insert(&attr_name, Value::Null);
                seed_errors.push((attr_name, message));
            }
        }
    }

    // Durable storage restore, tolerating missing or malformed entries.
    for key in def.persisted.clone() {
        let storage_key = format!("jtx:{name}:{key}");
        match engine.host.storage.get(&storage_key) {
            Some(raw) => match Value::from_json(&raw) {
                Ok(value) => def.insert(&key, value),
                Err(error) => {
                    log::warn!("state `{name}` persisted key `{key}` is malformed: {error}");
                    seed_errors.push((key, error.to_string()));
                }
            },
            None => {}
        }
    }

    // URL restore: JSON if it parses, raw text otherwise.
    for key in def.url_keys.clone() {
        let query = engine.host.url.query();
        let pairs = util::parse_query(&query);
        if let Some((_, raw)) = pairs.iter().find(|(param, _)| param == &key) {
            let value = Value::from_json(raw).unwrap_or_else(|_| Value::text(raw.as_str()));
            def.insert(&key, value);
        }
    }

    // Scoped rebuilds restore the previous instance's values wholesale.
    if let Some(previous) = restore {
        for (key, value) in previous {
            def.insert(&key, value);
        }
    }

    let snapshot = def.snapshot();
    let id = if scoped {
        engine.registry.insert_scoped(Definition::State(def))
    } else {
        match engine.registry.insert_global(Definition::State(def)) {
            Ok(id) => id,
            Err(Definition::State(mut shadow)) => {
                // The first definition keeps the name; this one stays
                // element-scoped so descendants still resolve it lexically.
                log::warn!("state name `{name}` is already registered; keeping it scoped");
                shadow.scoped = true;
                engine.registry.insert_scoped(Definition::State(shadow))
            }
            Err(other) => engine.registry.insert_scoped(other),
        }
    };

    for (key, message) in seed_errors {
        engine.fire(
            element,
            "error",
            Value::object([
                ("name", Value::text(name.as_str())),
                ("key", Value::text(key)),
                ("error", Value::text(message)),
            ]),
        );
    }
    engine.fire(
        element,
        "init",
        Value::object([
            ("name", Value::text(name.as_str())),
            ("value", snapshot),
        ]),
    );
    Some(id)
}

/// Flush one state's pending keys: persist, sync the URL, fire `update`.
pub fn flush_pending(engine: &mut Engine, def_id: DefId) {
    let Some(state) = engine.registry.state_mut(def_id) else {
        return;
    };
    if state.pending.is_empty() {
        return;
    }
    let element = state.element;
    let name = state.name.clone();
    let keys: Vec<String> = std::mem::take(&mut state.pending).into_iter().collect();
    let snapshot = state.snapshot();
    let persisted = state.persisted.clone();
    let url_keys = state.url_keys.clone();

    for key in &keys {
        if persisted.iter().any(|p| p == key) {
            let value = snapshot.get(key).cloned().unwrap_or(Value::Null);
            engine
                .host
                .storage
                .set(&format!("jtx:{name}:{key}"), &value.to_json());
        }
    }

    if keys.iter().any(|key| url_keys.iter().any(|u| u == key)) {
        sync_url(engine, &snapshot, &url_keys);
    }

    engine.fire(
        element,
        "update",
        Value::object([
            ("name", Value::text(name)),
            ("keys", Value::list(keys.into_iter().map(Value::text))),
            ("value", snapshot),
        ]),
    );
}

/// Rewrite the query string for this state's URL-persisted keys. A null
/// value deletes its parameter; everything else is JSON-encoded.
fn sync_url(engine: &mut Engine, snapshot: &Value, url_keys: &[String]) {
    let query = engine.host.url.query();
    let mut pairs = util::parse_query(&query);
    for key in url_keys {
        let value = snapshot.get(key).cloned().unwrap_or(Value::Null);
        pairs.retain(|(param, _)| param != key);
        if !value.is_null() {
            pairs.push((key.clone(), value.to_json()));
        }
    }
    let encoded = util::encode_query(&pairs);
    engine.host.url.replace_query(&encoded);
}
