//! The `<insert>` engine.
//!
//! Scalar inserts behave like `text`/`html` bindings that also participate
//! in their enclosing source's status slots. List inserts materialize a
//! keyed collection from a `<template>` blueprint under one of four
//! strategies, with a sliding window for the streaming ones.
//!
//! Event ordering within one update is fixed: `remove` (window trimming and
//! replacements) fires first, then slot visibility is reconciled, then
//! `init`/`add`/`update`/`empty`.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::dom::{html, NodeId};
use crate::expr::{self, Program};
use crate::value::Value;

use super::binding::{bind_element, Binding, BindingKind};
use super::graph::BindingId;
use super::registry::Definition;
use super::source::SourceStatus;
use super::{Engine, Env};

/// Marker attribute carrying the rendered item's key.
pub const ITEM_KEY_ATTR: &str = "jtx-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseStrategy {
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
    pub base: BaseStrategy,
    pub merge: bool,
}

pub(crate) struct ListBinding {
    pub item_var: Arc<str>,
    pub key_var: Option<Arc<str>>,
    pub rhs: Program,
    pub key_program: Option<Program>,
    pub strategy: Strategy,
    pub window: Option<usize>,
    /// Blueprint root inside the `<template>` child.
    pub template_root: NodeId,
    /// Merge bookkeeping: rendered keys in order, with their nodes.
    pub merge_keys: IndexMap<String, NodeId>,
    /// Scoped-state values captured per item key, restored on rebuild.
    pub scope_snapshots: FxHashMap<String, Vec<(String, BTreeMap<Arc<str>, Value>)>>,
    pub seen_nonempty: bool,
    pub last_count: usize,
}

fn parse_strategy(raw: Option<&str>) -> Strategy {
    let mut base = None;
    let mut merge = false;
    if let Some(raw) = raw {
        for token in raw.split([' ', ',', '-']).map(str::trim) {
            match token {
                "" => {}
                "replace" => base = Some(BaseStrategy::Replace),
                "append" => base = Some(BaseStrategy::Append),
                "prepend" => base = Some(BaseStrategy::Prepend),
                "merge" => merge = true,
                other => log::warn!("unknown list strategy token `{other}`"),
            }
        }
    }
    Strategy {
        // Bare `merge` composes with append
        base: base.unwrap_or(if merge {
            BaseStrategy::Append
        } else {
            BaseStrategy::Replace
        }),
        merge,
    }
}

/// Initialize an `<insert>` element: scalar when `text`/`html` is present,
/// list when `for` is.
pub(crate) fn init_insert(engine: &mut Engine, element: NodeId) {
    if engine.processed.contains(&element) {
        return;
    }
    engine.processed.insert(element);

    // Status slot children start hidden.
    for child in engine.doc.element_children(element) {
        if matches!(engine.doc.tag(child), Some("loading" | "error" | "empty")) {
            engine.doc.set_attr(child, super::HIDDEN_ATTR, "");
        }
    }

    if let Some(for_attr) = engine.doc.attr(element, "for").map(str::to_string) {
        init_list(engine, element, &for_attr);
        return;
    }

    let (html_mode, raw) = match engine.doc.attr(element, "text") {
        Some(raw) => (false, raw.to_string()),
        None => match engine.doc.attr(element, "html") {
            Some(raw) => (true, raw.to_string()),
            None => {
                log::warn!("<insert> needs `for`, `text` or `html`");
                return;
            }
        },
    };
    let program = match expr::compile_expression(&raw) {
        Ok(program) => program,
        Err(error) => {
            log::warn!("invalid <insert> expression: {error}");
            return;
        }
    };
    let initial = content_html(engine, element);
    let id = engine.add_binding(Binding {
        element,
        kind: BindingKind::ScalarInsert {
            html_mode,
            program,
            initial,
        },
    });
    engine.run_binding(id);
}

fn init_list(engine: &mut Engine, element: NodeId, for_attr: &str) {
    let Some((lhs, rhs_src)) = split_for(for_attr) else {
        insert_error(engine, element, format!("malformed for=\"{for_attr}\""));
        return;
    };
    let mut vars = lhs.split(',').map(str::trim);
    let item_var: Arc<str> = match vars.next().filter(|v| !v.is_empty()) {
        Some(var) => Arc::from(var),
        None => {
            insert_error(engine, element, "missing item variable".to_string());
            return;
        }
    };
    let key_var: Option<Arc<str>> = vars.next().filter(|v| !v.is_empty()).map(Arc::from);

    let rhs = match expr::compile_expression(rhs_src) {
        Ok(program) => program,
        Err(error) => {
            insert_error(engine, element, format!("invalid list expression: {error}"));
            return;
        }
    };
    let key_program = match engine.doc.attr(element, "key").map(str::to_string) {
        Some(raw) => match expr::compile_expression(&raw) {
            Ok(program) => Some(program),
            Err(error) => {
                insert_error(engine, element, format!("invalid key expression: {error}"));
                return;
            }
        },
        None => None,
    };
    let strategy = parse_strategy(engine.doc.attr(element, "strategy"));
    let window = engine
        .doc
        .attr(element, "window")
        .and_then(|raw| raw.trim().parse::<usize>().ok());
    if window.is_none() && strategy.base != BaseStrategy::Replace {
        log::warn!("list strategy without a window renders unbounded");
    }

    // The blueprint: one <template> child with exactly one root element.
    let template = engine
        .doc
        .element_children(element)
        .into_iter()
        .find(|&child| engine.doc.tag(child) == Some("template"));
    let Some(template) = template else {
        insert_error(engine, element, "missing <template>".to_string());
        return;
    };
    let roots = engine.doc.element_children(template);
    let [template_root] = roots.as_slice() else {
        insert_error(
            engine,
            element,
            "template must have exactly one root element".to_string(),
        );
        return;
    };

    let id = engine.add_binding(Binding {
        element,
        kind: BindingKind::List(Box::new(ListBinding {
            item_var,
            key_var,
            rhs,
            key_program,
            strategy,
            window,
            template_root: *template_root,
            merge_keys: IndexMap::new(),
            scope_snapshots: FxHashMap::default(),
            seen_nonempty: false,
            last_count: 0,
        })),
    });
    engine.run_binding(id);
}

/// Split `"<lhs> in <rhs>"` at the first ` in ` outside any nesting; the
/// left side is short so a plain find is enough.
fn split_for(for_attr: &str) -> Option<(&str, &str)> {
    let at = for_attr.find(" in ")?;
    let (lhs, rhs) = for_attr.split_at(at);
    Some((lhs.trim(), rhs[" in ".len()..].trim()))
}

fn insert_error(engine: &mut Engine, element: NodeId, message: String) {
    log::warn!("<insert>: {message}");
    engine.fire(
        element,
        "error",
        Value::object([("error", Value::text(message))]),
    );
}

// ── Update entry point ────────────────────────────────────────────────

pub(crate) fn apply_insert(engine: &mut Engine, id: BindingId) {
    enum Which {
        Scalar {
            html_mode: bool,
            program: Program,
            initial: String,
        },
        List(ListConfig),
    }
    let Some(binding) = engine.binding(id) else {
        return;
    };
    let element = binding.element;
    let which = match &binding.kind {
        BindingKind::ScalarInsert {
            html_mode,
            program,
            initial,
        } => Which::Scalar {
            html_mode: *html_mode,
            program: program.clone(),
            initial: initial.clone(),
        },
        BindingKind::List(list) => Which::List(ListConfig {
            item_var: list.item_var.clone(),
            key_var: list.key_var.clone(),
            rhs: list.rhs.clone(),
            key_program: list.key_program.clone(),
            strategy: list.strategy,
            window: list.window,
            template_root: list.template_root,
        }),
        _ => return,
    };

    match which {
        Which::Scalar {
            html_mode,
            program,
            initial,
        } => apply_scalar(engine, id, element, html_mode, &program, &initial),
        Which::List(config) => apply_list(engine, id, element, config),
    }
}

struct ListConfig {
    item_var: Arc<str>,
    key_var: Option<Arc<str>>,
    rhs: Program,
    key_program: Option<Program>,
    strategy: Strategy,
    window: Option<usize>,
    template_root: NodeId,
}

// ── Scalar insert ─────────────────────────────────────────────────────

fn apply_scalar(
    engine: &mut Engine,
    id: BindingId,
    element: NodeId,
    html_mode: bool,
    program: &Program,
    initial: &str,
) {
    let value = engine
        .eval_binding_scalar(id, element, program)
        .unwrap_or(Value::Null);

    if value.is_null() {
        // Restore the original content; slot elements stay untouched.
        set_content_html(engine, element, initial);
    } else if html_mode {
        let markup = engine.sanitize(&value.to_text());
        set_content_html(engine, element, &markup);
    } else {
        set_content_text(engine, element, &value.to_text());
    }

    reconcile_slots(engine, element, value.is_empty_like());
}

/// Slot visibility for an insert: loading/error follow the enclosing
/// source when there is one; empty follows the insert's own content.
fn reconcile_slots(engine: &mut Engine, element: NodeId, is_empty: bool) {
    let source_status = enclosing_source_status(engine, element);
    let show_loading = source_status == Some(SourceStatus::Loading);
    let show_error = source_status == Some(SourceStatus::Error);
    let show_empty =
        is_empty && matches!(source_status, None | Some(SourceStatus::Ready));

    for child in engine.doc.element_children(element) {
        let visible = match engine.doc.tag(child) {
            Some("loading") => show_loading,
            Some("error") => show_error,
            Some("empty") => show_empty,
            _ => continue,
        };
        if visible {
            engine.doc.remove_attr(child, super::HIDDEN_ATTR);
        } else {
            engine.doc.set_attr(child, super::HIDDEN_ATTR, "");
        }
    }
}

fn enclosing_source_status(engine: &Engine, element: NodeId) -> Option<SourceStatus> {
    for node in engine.doc.ancestors_inclusive(element) {
        if let Some(def_id) = engine.registry.def_at(node) {
            if let Some(Definition::Source(source)) = engine.registry.get(def_id) {
                return Some(source.status);
            }
        }
    }
    None
}

fn is_slot_or_template(engine: &Engine, node: NodeId) -> bool {
    matches!(
        engine.doc.tag(node),
        Some("template" | "loading" | "error" | "empty")
    )
}

/// Children forming the insert's content region (items / scalar content).
fn content_children(engine: &Engine, element: NodeId) -> Vec<NodeId> {
    engine
        .doc
        .children(element)
        .into_iter()
        .filter(|&child| !(engine.doc.is_element(child) && is_slot_or_template(engine, child)))
        .collect()
}

fn content_html(engine: &Engine, element: NodeId) -> String {
    let mut out = String::new();
    for child in content_children(engine, element) {
        out.push_str(&html::to_html(&engine.doc, child));
    }
    out
}

fn clear_content(engine: &mut Engine, element: NodeId) {
    for child in content_children(engine, element) {
        let removed = engine.doc.remove_subtree(child);
        engine.cleanup_removed(removed);
    }
}

fn set_content_text(engine: &mut Engine, element: NodeId, text: &str) {
    clear_content(engine, element);
    let node = engine.doc.create_text(text);
    engine.doc.append_child(element, node);
}

fn set_content_html(engine: &mut Engine, element: NodeId, markup: &str) {
    clear_content(engine, element);
    html::append_fragment(&mut engine.doc, element, markup);
}

// ── List insert ───────────────────────────────────────────────────────

/// An incoming item before key derivation.
struct Incoming {
    /// Iteration key: list index or object key.
    iter_key: Value,
    fallback_key: String,
    value: Value,
}

fn apply_list(engine: &mut Engine, id: BindingId, element: NodeId, config: ListConfig) {
    let collection = match engine.eval_binding_expr(id, element, &config.rhs) {
        Some(value) => value,
        // Expression failure: leave the DOM untouched.
        None => return,
    };

    // Shape the collection into an ordered batch.
    let incoming: Vec<Incoming> = match &collection {
        Value::List(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| Incoming {
                iter_key: Value::int(index as i64),
                fallback_key: index.to_string(),
                value: item.clone(),
            })
            .collect(),
        Value::Object(fields) => {
            if config.key_var.is_none() {
                insert_error(
                    engine,
                    element,
                    "object iteration needs a key variable (for=\"item, key in ...\")"
                        .to_string(),
                );
                return;
            }
            fields
                .iter()
                .map(|(key, item)| Incoming {
                    iter_key: Value::text(key.as_ref()),
                    fallback_key: key.to_string(),
                    value: item.clone(),
                })
                .collect()
        }
        // Scalars (null included) iterate as a single item.
        other => vec![Incoming {
            iter_key: Value::int(0),
            fallback_key: "0".to_string(),
            value: other.clone(),
        }],
    };

    // Derive and validate keys before touching the DOM.
    let mut batch: Vec<(String, Incoming)> = Vec::with_capacity(incoming.len());
    for (index, item) in incoming.into_iter().enumerate() {
        let key = match &config.key_program {
            Some(program) => {
                let locals = item_locals(&config, &item, index, &collection);
                let env = Env::with_locals(element, locals);
                match engine.eval_program(&env, program) {
                    Ok(value) if !value.is_null() => value.to_text(),
                    Ok(_) => String::new(),
                    Err(error) => {
                        insert_error(engine, element, format!("key derivation failed: {error}"));
                        return;
                    }
                }
            }
            None => item.fallback_key.clone(),
        };
        if key.is_empty() {
            insert_error(engine, element, "item key is null or empty".to_string());
            return;
        }
        batch.push((key, item));
    }

    if config.strategy.merge {
        // Last one wins, first position kept.
        let mut deduped: IndexMap<String, Incoming> = IndexMap::new();
        for (key, item) in batch {
            deduped.insert(key, item);
        }
        batch = deduped.into_iter().collect();
    } else {
        let mut seen = std::collections::BTreeSet::new();
        for (key, _) in &batch {
            if !seen.insert(key.clone()) {
                insert_error(engine, element, format!("duplicate item key `{key}`"));
                return;
            }
        }
    }

    let mut removed_keys: Vec<String> = Vec::new();
    let mut added: Vec<Value> = Vec::new();
    let mut updated: Vec<Value> = Vec::new();

    if config.strategy.merge {
        apply_merge(
            engine, id, element, &config, &collection, batch, &mut removed_keys, &mut added,
            &mut updated,
        );
    } else {
        match config.strategy.base {
            BaseStrategy::Replace => apply_replace(
                engine, id, element, &config, &collection, batch, &mut removed_keys, &mut added,
            ),
            BaseStrategy::Append | BaseStrategy::Prepend => apply_stream(
                engine, id, element, &config, &collection, batch, &mut removed_keys, &mut added,
            ),
        }
    }

    // Events, in the contract's order.
    let count = rendered_items(engine, element).len();
    if !removed_keys.is_empty() {
        engine.fire(
            element,
            "remove",
            Value::object([(
                "keys",
                Value::list(removed_keys.into_iter().map(Value::text)),
            )]),
        );
    }
    reconcile_slots(engine, element, count == 0);

    let (was_empty_before, first_nonempty) = engine
        .with_list_binding(id, |list| {
            let was = list.last_count > 0 && count == 0;
            let first = count > 0 && !list.seen_nonempty;
            if first {
                list.seen_nonempty = true;
            }
            list.last_count = count;
            (was, first)
        })
        .unwrap_or((false, false));

    if first_nonempty {
        engine.fire(
            element,
            "init",
            Value::object([("count", Value::int(count as i64))]),
        );
    }
    if !added.is_empty() {
        engine.fire(element, "add", Value::object([("items", Value::list(added))]));
    }
    if !updated.is_empty() {
        engine.fire(
            element,
            "update",
            Value::object([("items", Value::list(updated))]),
        );
    }
    if was_empty_before {
        engine.fire(element, "empty", Value::object([] as [(&str, Value); 0]));
    }
}

fn item_locals(
    config: &ListConfig,
    item: &Incoming,
    index: usize,
    collection: &Value,
) -> FxHashMap<Arc<str>, Value> {
    let mut locals = FxHashMap::default();
    locals.insert(config.item_var.clone(), item.value.clone());
    locals.insert(Arc::from("$"), item.value.clone());
    locals.insert(Arc::from("$index"), Value::int(index as i64));
    locals.insert(Arc::from("$key"), Value::text(item.iter_key.to_text()));
    locals.insert(Arc::from("$root"), collection.clone());
    if let Some(key_var) = &config.key_var {
        locals.insert(key_var.clone(), item.iter_key.clone());
    }
    locals
}

/// Rendered item nodes (children carrying the key marker), in order.
fn rendered_items(engine: &Engine, element: NodeId) -> Vec<(String, NodeId)> {
    engine
        .doc
        .children(element)
        .into_iter()
        .filter_map(|child| {
            engine
                .doc
                .attr(child, ITEM_KEY_ATTR)
                .map(|key| (key.to_string(), child))
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn apply_replace(
    engine: &mut Engine,
    id: BindingId,
    element: NodeId,
    config: &ListConfig,
    collection: &Value,
    batch: Vec<(String, Incoming)>,
    removed_keys: &mut Vec<String>,
    added: &mut Vec<Value>,
) {
    // Tear down the current items, snapshotting their scoped state by key.
    for (key, node) in rendered_items(engine, element) {
        let snapshot = snapshot_scoped(engine, node);
        if !snapshot.is_empty() {
            engine.with_list_binding(id, |list| {
                list.scope_snapshots.insert(key.clone(), snapshot);
            });
        }
        removed_keys.push(key);
        let removed = engine.doc.remove_subtree(node);
        engine.cleanup_removed(removed);
    }

    for (index, (key, item)) in batch.into_iter().enumerate() {
        let restore = engine
            .with_list_binding(id, |list| list.scope_snapshots.remove(&key))
            .flatten()
            .unwrap_or_default();
        added.push(item.value.clone());
        let _ = render_item(
            engine, config, element, None, &key, item, index, collection, restore,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_stream(
    engine: &mut Engine,
    _id: BindingId,
    element: NodeId,
    config: &ListConfig,
    collection: &Value,
    batch: Vec<(String, Incoming)>,
    removed_keys: &mut Vec<String>,
    added: &mut Vec<Value>,
) {
    let prepend = config.strategy.base == BaseStrategy::Prepend;

    let mut before = if prepend {
        rendered_items(engine, element).first().map(|(_, node)| *node)
    } else {
        None
    };

    for (index, (key, item)) in batch.into_iter().enumerate() {
        added.push(item.value.clone());
        let Some(node) = render_item(
            engine,
            config,
            element,
            before,
            &key,
            item,
            index,
            collection,
            Vec::new(),
        ) else {
            continue;
        };
        if prepend {
            // Keep batch order: later items insert after earlier ones.
            before = engine.doc.next_sibling(node);
        }
    }

    // Window trimming from the opposite end of the arrival direction.
    if let Some(window) = config.window {
        let items = rendered_items(engine, element);
        let overflow = items.len().saturating_sub(window);
        let trim: Vec<(String, NodeId)> = if prepend {
            items.iter().rev().take(overflow).cloned().collect()
        } else {
            items.iter().take(overflow).cloned().collect()
        };
        for (key, node) in trim {
            removed_keys.push(key);
            let removed = engine.doc.remove_subtree(node);
            engine.cleanup_removed(removed);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_merge(
    engine: &mut Engine,
    id: BindingId,
    element: NodeId,
    config: &ListConfig,
    collection: &Value,
    batch: Vec<(String, Incoming)>,
    removed_keys: &mut Vec<String>,
    added: &mut Vec<Value>,
    updated: &mut Vec<Value>,
) {
    let prepend = config.strategy.base == BaseStrategy::Prepend;

    for (index, (key, item)) in batch.into_iter().enumerate() {
        let existing = engine
            .with_list_binding(id, |list| list.merge_keys.get(&key).copied())
            .flatten();

        let item_value = item.value.clone();
        if let Some(node) = existing {
            // Replace in place, carrying scoped state across.
            let restore = snapshot_scoped(engine, node);
            let Some(new_node) = render_item(
                engine,
                config,
                element,
                Some(node),
                &key,
                item,
                index,
                collection,
                restore,
            ) else {
                continue;
            };
            updated.push(item_value);
            let removed = engine.doc.remove_subtree(node);
            engine.cleanup_removed(removed);
            engine.with_list_binding(id, |list| {
                list.merge_keys.insert(key.clone(), new_node);
            });
        } else {
            let before = if prepend {
                rendered_items(engine, element).first().map(|(_, n)| *n)
            } else {
                None
            };
            let Some(node) = render_item(
                engine,
                config,
                element,
                before,
                &key,
                item,
                index,
                collection,
                Vec::new(),
            ) else {
                continue;
            };
            added.push(item_value);
            engine.with_list_binding(id, |list| {
                if prepend {
                    list.merge_keys.shift_insert(0, key.clone(), node);
                } else {
                    list.merge_keys.insert(key.clone(), node);
                }
            });
        }
    }

    // Trim: append trims the head, prepend trims the tail.
    if let Some(window) = config.window {
        loop {
            let over = engine
                .with_list_binding(id, |list| {
                    if list.merge_keys.len() > window {
                        let at = if prepend { list.merge_keys.len() - 1 } else { 0 };
                        list.merge_keys.shift_remove_index(at)
                    } else {
                        None
                    }
                })
                .flatten();
            let Some((key, node)) = over else {
                break;
            };
            removed_keys.push(key);
            let removed = engine.doc.remove_subtree(node);
            engine.cleanup_removed(removed);
        }
    }
}

/// Clone the blueprint, place it, and compile it for one item.
#[allow(clippy::too_many_arguments)]
fn render_item(
    engine: &mut Engine,
    config: &ListConfig,
    element: NodeId,
    before: Option<NodeId>,
    key: &str,
    item: Incoming,
    index: usize,
    collection: &Value,
    restore: Vec<(String, BTreeMap<Arc<str>, Value>)>,
) -> Option<NodeId> {
    let clone = engine.doc.clone_subtree(config.template_root)?;
    engine.doc.set_attr(clone, ITEM_KEY_ATTR, key);
    engine.doc.insert_before(element, clone, before);

    let locals = item_locals(config, &item, index, collection);
    compile_item_node(engine, clone, &locals, &restore);
    Some(clone)
}

/// Walk a freshly cloned item subtree: local-referencing `jtx-*` attributes
/// are evaluated once and stripped (item dynamism comes from re-rendering,
/// not from live snapshots); the rest become ordinary reactive bindings.
/// Nested definitions initialize as scoped.
fn compile_item_node(
    engine: &mut Engine,
    node: NodeId,
    locals: &FxHashMap<Arc<str>, Value>,
    restore: &[(String, BTreeMap<Arc<str>, Value>)],
) {
    if !engine.doc.is_element(node) {
        return;
    }
    let tag = engine.doc.tag(node).map(str::to_string);
    match tag.as_deref() {
        Some("template") => return,
        Some("state") => {
            let name = engine.doc.attr(node, "name").map(str::to_string);
            let snapshot = name.and_then(|name| {
                restore
                    .iter()
                    .find(|(snap_name, _)| *snap_name == name)
                    .map(|(_, values)| values.clone())
            });
            super::state::init_state(engine, node, snapshot, true);
            bind_element(engine, node, locals);
        }
        Some("src") => {
            super::source::init_source(engine, node, true);
            bind_element(engine, node, locals);
        }
        Some("insert") => {
            init_insert(engine, node);
            return;
        }
        _ => {
            let local_names: Vec<&str> = locals.keys().map(|k| k.as_ref()).collect();
            for (attr_name, attr_value) in engine.doc.attrs(node) {
                let Some(directive) = attr_name.strip_prefix(super::JTX_PREFIX) else {
                    continue;
                };
                if directive == "on" || directive == "model" || directive == "key" {
                    continue; // handled by bind_element / marker
                }
                let Ok(program) = expr::compile_expression(&attr_value) else {
                    continue; // bind_element will log it
                };
                if !expr::references_local(&program, &local_names) {
                    continue;
                }
                engine.doc.remove_attr(node, &attr_name);
                let env = Env::with_locals(node, locals.clone());
                let value = match engine.eval_program(&env, &program) {
                    Ok(value) => value,
                    Err(error) => {
                        log::warn!("item attribute `{attr_name}` failed: {error}");
                        Value::Null
                    }
                };
                if !apply_static(engine, node, directive, &value) {
                    // A falsy static `jtx-if` removed the node.
                    return;
                }
            }
            bind_element(engine, node, locals);
        }
    }

    for child in engine.doc.children(node) {
        compile_item_node(engine, child, locals, restore);
    }
}

/// Apply a directive once, outside the reactive graph. Returns false when
/// the node was removed.
fn apply_static(engine: &mut Engine, node: NodeId, directive: &str, value: &Value) -> bool {
    match directive {
        "if" => {
            if !value.truthy() {
                let removed = engine.doc.remove_subtree(node);
                engine.cleanup_removed(removed);
                return false;
            }
        }
        "show" => {
            if value.truthy() {
                engine.doc.remove_attr(node, super::HIDDEN_ATTR);
            } else {
                engine.doc.set_attr(node, super::HIDDEN_ATTR, "");
            }
        }
        "text" => {
            let removed = engine.doc.set_text_content(node, &value.to_text());
            engine.cleanup_removed(removed);
        }
        "html" => {
            let markup = engine.sanitize(&value.to_text());
            engine.set_inner_html(node, &markup);
        }
        other => {
            if let Some(attr) = other.strip_prefix("attr-") {
                match value {
                    Value::Null | Value::Bool(false) => engine.doc.remove_attr(node, attr),
                    Value::Bool(true) => engine.doc.set_attr(node, attr, ""),
                    value => engine.doc.set_attr(node, attr, &value.to_text()),
                }
            }
        }
    }
    true
}

/// Scoped state values inside an item subtree, captured for restoration.
fn snapshot_scoped(
    engine: &Engine,
    node: NodeId,
) -> Vec<(String, BTreeMap<Arc<str>, Value>)> {
    let mut snapshots = Vec::new();
    for descendant in engine.doc.collect_subtree(node) {
        if let Some(def_id) = engine.registry.def_at(descendant) {
            if let Some(state) = engine.registry.state(def_id) {
                if state.scoped {
                    snapshots.push((state.name.clone(), state.value.clone()));
                }
            }
        }
    }
    snapshots
}

/// `clear` fires when the list element itself leaves the document.
pub(crate) fn on_list_removed(engine: &mut Engine, element: NodeId) {
    engine.fire(element, "clear", Value::object([] as [(&str, Value); 0]));
}
