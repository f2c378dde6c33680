//! Streaming strategies: append/prepend with windows, merge updates in
//! place, trimming from the opposite end of arrival.

mod harness;

use harness::{by_id, engine_from, events_named, item_keys, item_texts};

const MERGE_FEED: &str = r#"
<state name="feed" batch="[]">
  <insert id="log" for="m in @feed.batch" key="m.id" strategy="append merge" window="2">
    <template><li jtx-text="m.t"></li></template>
  </insert>
  <button id="b1" jtx-on="click: @feed.batch = [{id: 1, t: 'alpha'}]"></button>
  <button id="b2" jtx-on="click: @feed.batch = [{id: 2, t: 'beta'}]"></button>
  <button id="b3" jtx-on="click: @feed.batch = [{id: 1, t: 'alpha2'}]"></button>
  <button id="b4" jtx-on="click: @feed.batch = [{id: 3, t: 'gamma'}]"></button>
</state>
"#;

#[test]
fn append_merge_with_window_two() {
    let mut engine = engine_from(MERGE_FEED);
    assert!(item_texts(&engine, "log").is_empty());

    engine.click(by_id(&engine, "b1"));
    assert_eq!(item_texts(&engine, "log"), vec!["alpha"]);

    engine.click(by_id(&engine, "b2"));
    assert_eq!(item_texts(&engine, "log"), vec!["alpha", "beta"]);

    // Same key arrives again: replaced in place, position kept
    engine.take_events();
    engine.click(by_id(&engine, "b3"));
    assert_eq!(item_texts(&engine, "log"), vec!["alpha2", "beta"]);
    let events = engine.take_events();
    assert_eq!(events_named(&events, "update").len(), 2); // state + list
    assert!(events_named(&events, "remove").is_empty());

    // A new key overflows the window; the head is trimmed
    engine.click(by_id(&engine, "b4"));
    assert_eq!(item_texts(&engine, "log"), vec!["beta", "gamma"]);
    let events = engine.take_events();
    let removes = events_named(&events, "remove");
    assert_eq!(removes.len(), 1);
    assert_eq!(removes[0].detail_keys(), vec!["1"]);
    assert_eq!(item_keys(&engine, "log"), vec!["2", "3"]);
}

#[test]
fn merge_retains_items_absent_from_the_batch() {
    let mut engine = engine_from(MERGE_FEED);
    engine.click(by_id(&engine, "b1"));
    engine.click(by_id(&engine, "b2"));
    // Batch [id:1] does not mention id:2, which must survive
    engine.click(by_id(&engine, "b3"));
    assert_eq!(item_keys(&engine, "log"), vec!["1", "2"]);
}

#[test]
fn merge_deduplicates_last_wins() {
    let mut engine = engine_from(
        r#"
<state name="feed" batch="[]">
  <insert id="log" for="m in @feed.batch" key="m.id" strategy="merge" window="5">
    <template><li jtx-text="m.t"></li></template>
  </insert>
  <button id="send" jtx-on="click: @feed.batch = [{id: 1, t: 'first'}, {id: 1, t: 'second'}]"></button>
</state>
"#,
    );
    engine.click(by_id(&engine, "send"));
    assert_eq!(item_texts(&engine, "log"), vec!["second"]);
    assert_eq!(item_keys(&engine, "log"), vec!["1"]);
}

#[test]
fn plain_append_accumulates_batches() {
    let mut engine = engine_from(
        r#"
<state name="feed" batch="[]" n="0">
  <insert id="log" for="m in @feed.batch" key="@feed.n + '-' + $index" strategy="append" window="3">
    <template><li jtx-text="m"></li></template>
  </insert>
  <button id="send" jtx-on="click: @feed.n++; @feed.batch = ['m' + @feed.n]"></button>
</state>
"#,
    );
    let send = by_id(&engine, "send");
    engine.click(send);
    engine.click(send);
    assert_eq!(item_texts(&engine, "log"), vec!["m1", "m2"]);

    engine.click(send);
    engine.click(send);
    // Window 3: the oldest entry fell off the head
    assert_eq!(item_texts(&engine, "log"), vec!["m2", "m3", "m4"]);
}

#[test]
fn prepend_inserts_at_the_front_and_trims_the_tail() {
    let mut engine = engine_from(
        r#"
<state name="feed" batch="[]" n="0">
  <insert id="log" for="m in @feed.batch" key="m" strategy="prepend" window="2">
    <template><li jtx-text="m"></li></template>
  </insert>
  <button id="send" jtx-on="click: @feed.n++; @feed.batch = ['m' + @feed.n]"></button>
</state>
"#,
    );
    let send = by_id(&engine, "send");
    engine.click(send);
    engine.click(send);
    assert_eq!(item_texts(&engine, "log"), vec!["m2", "m1"]);

    engine.take_events();
    engine.click(send);
    assert_eq!(item_texts(&engine, "log"), vec!["m3", "m2"]);
    let events = engine.take_events();
    let removes = events_named(&events, "remove");
    assert_eq!(removes.len(), 1);
    assert_eq!(removes[0].detail_keys(), vec!["m1"]);
}

#[test]
fn prepend_keeps_batch_order() {
    let mut engine = engine_from(
        r#"
<state name="feed" batch="[]">
  <insert id="log" for="m in @feed.batch" key="m" strategy="prepend" window="10">
    <template><li jtx-text="m"></li></template>
  </insert>
  <button id="send" jtx-on="click: @feed.batch = ['a', 'b']"></button>
</state>
"#,
    );
    engine.click(by_id(&engine, "send"));
    // The batch lands at the front in batch order
    assert_eq!(item_texts(&engine, "log"), vec!["a", "b"]);
}
