//! Per-attribute bindings: `jtx-if`, `jtx-show`, `jtx-text`, `jtx-html`,
//! `jtx-attr-*`, `jtx-model`, `jtx-on`.
//!
//! A binding is an element plus an update function; on every run it
//! re-reads its expression (recording dependencies) and mutates the host
//! element. `jtx-on` is not a binding — it registers listeners and interval
//! timers that run handler programs.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::dom::{html, NodeId};
use crate::expr::{self, Expr, Program};
use crate::value::Value;

use super::graph::BindingId;
use super::list::ListBinding;
use super::on_attr::{parse_on_attribute, OnEvent};
use super::timers::TimerAction;
use super::{Engine, Env, Handler, Listener};

pub(crate) struct Binding {
    pub element: NodeId,
    pub kind: BindingKind,
}

pub(crate) enum BindingKind {
    If {
        program: Program,
        /// Comment node standing in for the element while it is out of the
        /// tree; the element itself is parked for reinsertion.
        placeholder: NodeId,
        parked: bool,
    },
    Show {
        program: Program,
    },
    Text {
        program: Program,
        initial: String,
    },
    Html {
        program: Program,
        initial: String,
    },
    Attr {
        name: String,
        program: Program,
    },
    /// Write-back half of `jtx-model`: state change -> control value.
    Model {
        state: String,
        path: Vec<String>,
    },
    /// `<insert text=...>` / `<insert html=...>`
    ScalarInsert {
        html_mode: bool,
        program: Program,
        initial: String,
    },
    List(Box<ListBinding>),
}

/// Scan one element's attributes and register bindings/listeners.
/// `locals` carries list item locals for handlers created inside items.
pub(crate) fn bind_element(
    engine: &mut Engine,
    element: NodeId,
    locals: &FxHashMap<Arc<str>, Value>,
) {
    if engine.processed.contains(&element) {
        return;
    }
    engine.processed.insert(element);

    for (attr_name, attr_value) in engine.doc.attrs(element) {
        let Some(directive) = attr_name.strip_prefix(super::JTX_PREFIX) else {
            continue;
        };
        match directive {
            "if" | "show" | "text" | "html" => {
                let program = match expr::compile_expression(&attr_value) {
                    Ok(program) => program,
                    Err(error) => {
                        log::warn!("invalid `{attr_name}` expression: {error}");
                        continue;
                    }
                };
                let kind = match directive {
                    "if" => {
                        let placeholder = engine.doc.create_comment("jtx-if");
                        BindingKind::If {
                            program,
                            placeholder,
                            parked: false,
                        }
                    }
                    "show" => BindingKind::Show { program },
                    "text" => BindingKind::Text {
                        program,
                        initial: engine.doc.text_content(element),
                    },
                    _ => BindingKind::Html {
                        program,
                        initial: html::inner_html(&engine.doc, element),
                    },
                };
                let id = engine.add_binding(Binding { element, kind });
                engine.run_binding(id);
            }
            "model" => bind_model(engine, element, &attr_value),
            "on" => bind_on(engine, element, &attr_value, locals),
            _ if directive.starts_with("attr-") => {
                let target_attr = directive["attr-".len()..].to_string();
                match expr::compile_expression(&attr_value) {
                    Ok(program) => {
                        let id = engine.add_binding(Binding {
                            element,
                            kind: BindingKind::Attr {
                                name: target_attr,
                                program,
                            },
                        });
                        engine.run_binding(id);
                    }
                    Err(error) => log::warn!("invalid `{attr_name}` expression: {error}"),
                }
            }
            "key" => {} // rendered item marker, not a directive
            other => log::warn!("unknown binding attribute `jtx-{other}`"),
        }
    }
}

fn bind_model(engine: &mut Engine, element: NodeId, attr_value: &str) {
    let program = match expr::compile_expression(attr_value) {
        Ok(program) => program,
        Err(error) => {
            log::warn!("invalid `jtx-model` expression: {error}");
            return;
        }
    };
    // The model target must be a static @state.path chain.
    let Some((state, path)) = static_ref_path(program.body.first()) else {
        log::warn!("`jtx-model` expects a `@state.path` target, got `{attr_value}`");
        return;
    };
    if path.is_empty() {
        log::warn!("`jtx-model` needs a key below the state: `{attr_value}`");
        return;
    }
    let id = engine.add_binding(Binding {
        element,
        kind: BindingKind::Model { state, path },
    });
    engine.model_bindings.entry(element).or_default().push(id);
    engine.run_binding(id);
}

fn static_ref_path(expr: Option<&Expr>) -> Option<(String, Vec<String>)> {
    fn collect(expr: &Expr, path: &mut Vec<String>) -> Option<String> {
        match expr {
            Expr::Ref(name) => Some(name.to_string()),
            Expr::Member(inner, key) => {
                let name = collect(inner, path)?;
                path.push(key.to_string());
                Some(name)
            }
            Expr::Index(inner, index) => {
                let name = collect(inner, path)?;
                if let Expr::Literal(value) = index.as_ref() {
                    path.push(value.to_text());
                    Some(name)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
    let mut path = Vec::new();
    let name = collect(expr?, &mut path)?;
    Some((name, path))
}

fn bind_on(
    engine: &mut Engine,
    element: NodeId,
    attr_value: &str,
    locals: &FxHashMap<Arc<str>, Value>,
) {
    for entry in parse_on_attribute(attr_value) {
        let program = match expr::compile_statements(&entry.code) {
            Ok(program) => program,
            Err(error) => {
                log::warn!("invalid handler `{}`: {error}", entry.code);
                continue;
            }
        };
        let handler = engine.add_handler(Handler {
            element,
            program,
            locals: locals.clone(),
        });
        match entry.event {
            OnEvent::Named(event) => {
                engine
                    .listeners
                    .entry(element)
                    .or_default()
                    .push(Listener { event, handler });
            }
            OnEvent::Every(interval_ms) => {
                let timer = engine.timers.schedule(
                    interval_ms,
                    Some(interval_ms),
                    element,
                    TimerAction::RunHandler(handler),
                );
                engine.node_timers.entry(element).or_default().push(timer);
            }
        }
    }
}

/// Owned snapshot of a binding's update recipe, so the update can borrow
/// the engine mutably while it runs.
enum Update {
    If {
        program: Program,
        placeholder: NodeId,
        parked: bool,
    },
    Show {
        program: Program,
    },
    Text {
        program: Program,
        initial: String,
    },
    Html {
        program: Program,
        initial: String,
    },
    Attr {
        name: String,
        program: Program,
    },
    Model {
        state: String,
        path: Vec<String>,
    },
    Insert,
}

/// One update of a non-list binding. Expression failures are logged and the
/// binding falls back: text/html restore their initial content, everything
/// else behaves as if the expression yielded null.
pub(crate) fn apply_binding(engine: &mut Engine, id: BindingId) {
    let Some(binding) = engine.binding(id) else {
        return;
    };
    let element = binding.element;
    let update = match &binding.kind {
        BindingKind::If {
            program,
            placeholder,
            parked,
        } => Update::If {
            program: program.clone(),
            placeholder: *placeholder,
            parked: *parked,
        },
        BindingKind::Show { program } => Update::Show {
            program: program.clone(),
        },
        BindingKind::Text { program, initial } => Update::Text {
            program: program.clone(),
            initial: initial.clone(),
        },
        BindingKind::Html { program, initial } => Update::Html {
            program: program.clone(),
            initial: initial.clone(),
        },
        BindingKind::Attr { name, program } => Update::Attr {
            name: name.clone(),
            program: program.clone(),
        },
        BindingKind::Model { state, path } => Update::Model {
            state: state.clone(),
            path: path.clone(),
        },
        BindingKind::ScalarInsert { .. } | BindingKind::List(_) => Update::Insert,
    };
    if !engine.doc.is_valid(element) {
        return;
    }

    match update {
        Update::If {
            program,
            placeholder,
            parked,
        } => {
            // While parked the element is out of the tree; the placeholder
            // holds its position and anchors scope resolution.
            let anchor = if parked { placeholder } else { element };
            let truthy = engine
                .eval_binding_expr(id, anchor, &program)
                .map(|value| value.truthy())
                .unwrap_or(false);
            if truthy && parked {
                // Reinsert at the placeholder's position.
                let Some(parent) = engine.doc.parent(placeholder) else {
                    return;
                };
                engine.doc.insert_before(parent, element, Some(placeholder));
                engine.doc.detach(placeholder);
                engine.set_if_parked(id, false);
            } else if !truthy && !parked {
                let Some(parent) = engine.doc.parent(element) else {
                    return;
                };
                engine.doc.insert_before(parent, placeholder, Some(element));
                engine.doc.detach(element);
                engine.set_if_parked(id, true);
            }
        }
        Update::Show { program } => {
            let truthy = engine
                .eval_binding_expr(id, element, &program)
                .map(|value| value.truthy())
                .unwrap_or(false);
            if truthy {
                engine.doc.remove_attr(element, super::HIDDEN_ATTR);
            } else {
                engine.doc.set_attr(element, super::HIDDEN_ATTR, "");
            }
        }
        Update::Text { program, initial } => {
            let value = engine
                .eval_binding_scalar(id, element, &program)
                .unwrap_or(Value::Null);
            let text = if value.is_null() { initial } else { value.to_text() };
            let removed = engine.doc.set_text_content(element, &text);
            engine.cleanup_removed(removed);
        }
        Update::Html { program, initial } => {
            let value = engine
                .eval_binding_scalar(id, element, &program)
                .unwrap_or(Value::Null);
            let markup = if value.is_null() {
                initial
            } else {
                engine.sanitize(&value.to_text())
            };
            engine.set_inner_html(element, &markup);
        }
        Update::Attr { name, program } => {
            let value = engine
                .eval_binding_scalar(id, element, &program)
                .unwrap_or(Value::Null);
            match value {
                Value::Null | Value::Bool(false) => engine.doc.remove_attr(element, &name),
                Value::Bool(true) => engine.doc.set_attr(element, &name, ""),
                other => engine.doc.set_attr(element, &name, &other.to_text()),
            }
        }
        Update::Model { state, path } => {
            // Read through the eval host so the dependency is recorded.
            let env = Env::at(element);
            let value = engine.ref_path_for_binding(id, &env, &state, &path);
            write_control(engine, element, &value);
        }
        Update::Insert => {
            super::list::apply_insert(engine, id);
        }
    }
}

// ── Form controls ─────────────────────────────────────────────────────

/// Type-aware read of a form control's current value.
pub(crate) fn read_control(engine: &Engine, element: NodeId) -> Value {
    let doc = &engine.doc;
    match doc.tag(element) {
        Some("input") => match doc.attr(element, "type") {
            Some("checkbox") => Value::Bool(doc.has_attr(element, "checked")),
            Some("number") | Some("range") => doc
                .attr(element, "value")
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .map(Value::number)
                .unwrap_or(Value::Null),
            _ => Value::text(doc.attr(element, "value").unwrap_or_default()),
        },
        Some("select") => {
            let options: Vec<NodeId> = doc
                .collect_subtree(element)
                .into_iter()
                .filter(|&node| doc.tag(node) == Some("option"))
                .collect();
            let option_value = |node: NodeId| {
                doc.attr(node, "value")
                    .map(str::to_string)
                    .unwrap_or_else(|| doc.text_content(node))
            };
            if doc.has_attr(element, "multiple") {
                Value::list(
                    options
                        .iter()
                        .filter(|&&node| doc.has_attr(node, "selected"))
                        .map(|&node| Value::text(option_value(node))),
                )
            } else {
                options
                    .iter()
                    .find(|&&node| doc.has_attr(node, "selected"))
                    .map(|&node| Value::text(option_value(node)))
                    .or_else(|| doc.attr(element, "value").map(Value::text))
                    .unwrap_or(Value::Null)
            }
        }
        Some("textarea") => doc
            .attr(element, "value")
            .map(Value::text)
            .unwrap_or_else(|| Value::text(doc.text_content(element))),
        _ => Value::text(doc.attr(element, "value").unwrap_or_default()),
    }
}

/// Push a model-shaped value back into the control.
fn write_control(engine: &mut Engine, element: NodeId, value: &Value) {
    let tag = engine.doc.tag(element).map(str::to_string);
    match tag.as_deref() {
        Some("input") if engine.doc.attr(element, "type") == Some("checkbox") => {
            if value.truthy() {
                engine.doc.set_attr(element, "checked", "");
            } else {
                engine.doc.remove_attr(element, "checked");
            }
        }
        Some("select") if engine.doc.has_attr(element, "multiple") => {
            let wanted: Vec<String> = value
                .as_list()
                .map(|items| items.iter().map(Value::to_text).collect())
                .unwrap_or_default();
            let options: Vec<NodeId> = engine
                .doc
                .collect_subtree(element)
                .into_iter()
                .filter(|&node| engine.doc.tag(node) == Some("option"))
                .collect();
            for option in options {
                let option_value = engine
                    .doc
                    .attr(option, "value")
                    .map(str::to_string)
                    .unwrap_or_else(|| engine.doc.text_content(option));
                if wanted.contains(&option_value) {
                    engine.doc.set_attr(option, "selected", "");
                } else {
                    engine.doc.remove_attr(option, "selected");
                }
            }
        }
        Some("textarea") => {
            engine.doc.set_attr(element, "value", &value.to_text());
        }
        _ => {
            engine.doc.set_attr(element, "value", &value.to_text());
        }
    }
}

/// `input`/`change` landed on an element: run its model captures.
pub(crate) fn model_capture(engine: &mut Engine, target: NodeId) {
    let Some(ids) = engine.model_bindings.get(&target).cloned() else {
        return;
    };
    for id in ids {
        let Some(binding) = engine.binding(id) else {
            continue;
        };
        let BindingKind::Model { state, path } = &binding.kind else {
            continue;
        };
        let (state, path) = (state.clone(), path.clone());
        let value = read_control(engine, target);
        engine.write_state_path(target, &state, &path, value);
    }
}
