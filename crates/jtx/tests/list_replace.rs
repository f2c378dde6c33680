//! Replace-strategy lists: keyed rendering, full remove/add event pairing,
//! batch validation.

mod harness;

use harness::{by_id, engine_from, events_named, item_keys, item_texts};
use jtx::Value;

const LIST: &str = r#"
<state name="ui" items="[{id: 1, title: 'A'}, {id: 2, title: 'B'}]">
  <insert id="list" for="item in @ui.items" key="item.id">
    <template><li jtx-text="item.title"></li></template>
  </insert>
  <button id="swap" jtx-on="click: @ui.items = [{id: 2, title: 'B2'}, {id: 3, title: 'C'}]"></button>
  <button id="clear" jtx-on="click: @ui.items = []"></button>
</state>
"#;

#[test]
fn initial_render_is_keyed() {
    let mut engine = engine_from(LIST);
    assert_eq!(item_keys(&engine, "list"), vec!["1", "2"]);
    assert_eq!(item_texts(&engine, "list"), vec!["A", "B"]);

    let events = engine.take_events();
    // The state fires its own `init`; the list's carries a count.
    let list_init: Vec<_> = events
        .iter()
        .filter(|event| event.name == "init" && event.detail.get("count").is_some())
        .collect();
    assert_eq!(list_init.len(), 1);
    assert_eq!(list_init[0].detail.get("count"), Some(&Value::int(2)));
    assert_eq!(events_named(&events, "add").len(), 1);
}

#[test]
fn replace_emits_remove_then_add() {
    let mut engine = engine_from(LIST);
    engine.take_events();
    engine.click(by_id(&engine, "swap"));

    assert_eq!(item_keys(&engine, "list"), vec!["2", "3"]);
    assert_eq!(item_texts(&engine, "list"), vec!["B2", "C"]);

    let events = engine.take_events();
    let remove_at = events.iter().position(|e| e.name == "remove").unwrap();
    let add_at = events.iter().position(|e| e.name == "add").unwrap();
    assert!(remove_at < add_at, "remove must precede add");

    assert_eq!(events[remove_at].detail_keys(), vec!["1", "2"]);
    let added = events[add_at].detail.get("items").unwrap().clone();
    let titles: Vec<String> = added
        .as_list()
        .unwrap()
        .iter()
        .map(|item| item.get("title").cloned().unwrap_or(Value::Null).to_text())
        .collect();
    assert_eq!(titles, vec!["B2", "C"]);

    // Removed keys are gone from the rendered set
    assert!(!item_keys(&engine, "list").contains(&"1".to_string()));
}

#[test]
fn emptying_fires_empty_event() {
    let mut engine = engine_from(LIST);
    engine.take_events();
    engine.click(by_id(&engine, "clear"));

    assert!(item_keys(&engine, "list").is_empty());
    let events = engine.take_events();
    assert_eq!(events_named(&events, "empty").len(), 1);
    assert_eq!(events_named(&events, "remove").len(), 1);
    assert!(events_named(&events, "add").is_empty());
}

#[test]
fn duplicate_keys_reject_the_batch() {
    let mut engine = engine_from(
        r#"
<state name="ui" items="[{id: 1, t: 'a'}]">
  <insert id="list" for="item in @ui.items" key="item.id">
    <template><li jtx-text="item.t"></li></template>
  </insert>
  <button id="dup" jtx-on="click: @ui.items = [{id: 7, t: 'x'}, {id: 7, t: 'y'}]"></button>
</state>
"#,
    );
    assert_eq!(item_texts(&engine, "list"), vec!["a"]);
    engine.take_events();
    engine.click(by_id(&engine, "dup"));

    // The DOM is untouched and an error event fired
    assert_eq!(item_texts(&engine, "list"), vec!["a"]);
    let events = engine.take_events();
    assert_eq!(events_named(&events, "error").len(), 1);
}

#[test]
fn null_key_rejects_the_batch() {
    let mut engine = engine_from(
        r#"
<state name="ui" items="[{t: 'missing id'}]">
  <insert id="list" for="item in @ui.items" key="item.id">
    <template><li jtx-text="item.t"></li></template>
  </insert>
</state>
"#,
    );
    assert!(item_texts(&engine, "list").is_empty());
    let events = engine.take_events();
    assert_eq!(events_named(&events, "error").len(), 1);
}

#[test]
fn object_iteration_uses_keys() {
    let engine = engine_from(
        r#"
<state name="ui" scores="{ ada: 3, bob: 5 }">
  <insert id="list" for="score, who in @ui.scores">
    <template><li jtx-text="who + ': ' + score"></li></template>
  </insert>
</state>
"#,
    );
    assert_eq!(item_texts(&engine, "list"), vec!["ada: 3", "bob: 5"]);
    assert_eq!(item_keys(&engine, "list"), vec!["ada", "bob"]);
}

#[test]
fn object_iteration_without_key_variable_errors() {
    let mut engine = engine_from(
        r#"
<state name="ui" scores="{ ada: 3 }">
  <insert id="list" for="score in @ui.scores">
    <template><li jtx-text="score"></li></template>
  </insert>
</state>
"#,
    );
    assert!(item_texts(&engine, "list").is_empty());
    let events = engine.take_events();
    assert!(!events_named(&events, "error").is_empty());
}

#[test]
fn scalar_value_renders_single_item() {
    let engine = engine_from(
        r#"
<state name="ui" only="'hello'">
  <insert id="list" for="item in @ui.only">
    <template><li jtx-text="item"></li></template>
  </insert>
</state>
"#,
    );
    assert_eq!(item_texts(&engine, "list"), vec!["hello"]);
}

#[test]
fn index_and_root_locals() {
    let engine = engine_from(
        r#"
<state name="ui" items="['x', 'y']">
  <insert id="list" for="item in @ui.items">
    <template><li jtx-text="$index + '/' + $root.length + ':' + item"></li></template>
  </insert>
</state>
"#,
    );
    assert_eq!(item_texts(&engine, "list"), vec!["0/2:x", "1/2:y"]);
}
