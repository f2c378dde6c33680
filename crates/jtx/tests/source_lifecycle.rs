//! Source status machine: slots follow the status exclusively, errors keep
//! the last value, streams route through the shared message handler.

mod harness;

use harness::{by_id, engine_from, engine_with_http, events_named, text_of, visible};
use jtx::{StreamEvent, Value};

const MANUAL: &str = r#"
<src name="o" url="/x" fetch="manual">
  <loading id="slot-loading">Loading...</loading>
  <error id="slot-error">Failed</error>
  <empty id="slot-empty">Nothing here</empty>
</src>
"#;

#[test]
fn manual_source_walks_the_status_machine() {
    let mut engine = engine_with_http(MANUAL, |http| {
        http.respond("/x", 500, "");
        http.respond("/x", 200, "[]");
    });

    assert_eq!(engine.source_status("o"), Some("idle"));
    assert!(!visible(&engine, "slot-loading"));
    assert!(!visible(&engine, "slot-error"));
    assert!(!visible(&engine, "slot-empty"));

    // refresh flips to loading and reveals only the loading slot
    engine.refresh("o");
    assert_eq!(engine.source_status("o"), Some("loading"));
    assert!(visible(&engine, "slot-loading"));
    assert!(!visible(&engine, "slot-error"));

    // 500 response: error slot only, error record populated
    engine.take_events();
    engine.pump_http();
    assert_eq!(engine.source_status("o"), Some("error"));
    assert!(!visible(&engine, "slot-loading"));
    assert!(visible(&engine, "slot-error"));
    assert!(!visible(&engine, "slot-empty"));

    let events = engine.take_events();
    let errors = events_named(&events, "error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].detail.get("type"), Some(&Value::text("network")));
    assert_eq!(errors[0].detail.get("status"), Some(&Value::int(500)));

    // a successful refresh with an empty body: ready + empty slot
    engine.refresh("o");
    engine.pump_http();
    assert_eq!(engine.source_status("o"), Some("ready"));
    assert!(visible(&engine, "slot-empty"));
    assert!(!visible(&engine, "slot-error"));
    assert_eq!(engine.source_value("o"), Some(Value::list([])));
}

#[test]
fn onload_fetch_applies_select_path() {
    let mut engine = engine_with_http(
        r#"<src name="user" url="/me" select="data.profile"></src>
           <span id="who" jtx-text="@user.name"></span>"#,
        |http| {
            http.respond(
                "/me",
                200,
                r#"{"data": {"profile": {"name": "ada"}}}"#,
            );
        },
    );
    engine.pump_http();
    assert_eq!(engine.source_status("user"), Some("ready"));
    assert_eq!(
        engine.source_value("user").unwrap().get("name"),
        Some(&Value::text("ada"))
    );
    // The span sits outside the source element, so the global fallback
    // does not apply; it keeps its initial (empty) text.
    assert_eq!(text_of(&engine, "who"), "");
}

#[test]
fn bindings_inside_source_see_the_value() {
    let mut engine = engine_with_http(
        r#"<src name="user" url="/me">
             <span id="who" jtx-text="@user.name"></span>
           </src>"#,
        |http| {
            http.respond("/me", 200, r#"{"name": "ada"}"#);
        },
    );
    engine.pump_http();
    assert_eq!(text_of(&engine, "who"), "ada");
}

#[test]
fn malformed_body_is_a_format_error_and_keeps_value() {
    let mut engine = engine_with_http(
        r#"<src name="o" url="/x" fetch="manual"></src>"#,
        |http| {
            http.respond("/x", 200, r#"{"n": 1}"#);
            http.respond("/x", 200, "{not json");
        },
    );
    engine.refresh("o");
    engine.pump_http();
    assert_eq!(
        engine.source_value("o"),
        Some(Value::object([("n", Value::int(1))]))
    );

    engine.take_events();
    engine.refresh("o");
    engine.pump_http();
    assert_eq!(engine.source_status("o"), Some("error"));
    // The last good value is retained
    assert_eq!(
        engine.source_value("o"),
        Some(Value::object([("n", Value::int(1))]))
    );
    let events = engine.take_events();
    let errors = events_named(&events, "error");
    assert_eq!(errors[0].detail.get("type"), Some(&Value::text("format")));
}

#[test]
fn http_204_yields_null() {
    let mut engine = engine_with_http(
        r#"<src name="o" url="/gone" fetch="manual"></src>"#,
        |http| {
            http.respond("/gone", 204, "");
        },
    );
    engine.refresh("o");
    engine.pump_http();
    assert_eq!(engine.source_status("o"), Some("ready"));
    assert_eq!(engine.source_value("o"), Some(Value::Null));
}

#[test]
fn headers_reevaluate_against_live_state() {
    let mut engine = engine_with_http(
        r#"
<state name="auth" token="'t1'">
  <src name="api" url="/api" fetch="manual" headers="{ authorization: 'Bearer ' + @auth.token }"></src>
  <button id="rotate" jtx-on="click: @auth.token = 't2'"></button>
</state>
"#,
        |http| {
            http.respond("/api", 200, "1");
            http.respond("/api", 200, "2");
        },
    );
    engine.take_events();
    engine.refresh("api");
    engine.click(by_id(&engine, "rotate"));
    engine.refresh("api");

    let events = engine.take_events();
    let fetches = events_named(&events, "fetch");
    assert_eq!(fetches.len(), 2);
    let header_of = |event: &jtx::EmittedEvent| {
        event
            .detail
            .get("headers")
            .and_then(|headers| headers.get("authorization"))
            .cloned()
    };
    assert_eq!(header_of(fetches[0]), Some(Value::text("Bearer t1")));
    assert_eq!(header_of(fetches[1]), Some(Value::text("Bearer t2")));
}

#[test]
fn sse_source_filters_event_types() {
    let mut engine = engine_from(
        r#"
<src name="feed" url="sse:/events" sse-event="tick">
  <span id="n" jtx-text="@feed.n"></span>
</src>
"#,
    );
    // onload connects on the first tick; the memory connector hands out
    // connection ids starting at 1.
    assert_eq!(engine.source_status("feed"), Some("loading"));
    engine.stream_event(1, StreamEvent::Open);
    assert_eq!(engine.source_status("feed"), Some("ready"));

    engine.take_events();
    engine.stream_event(
        1,
        StreamEvent::Message {
            event_type: Some("tick".to_string()),
            data: r#"{"n": 7}"#.to_string(),
            last_event_id: Some("1".to_string()),
        },
    );
    assert_eq!(text_of(&engine, "n"), "7");
    let events = engine.take_events();
    assert_eq!(events_named(&events, "message").len(), 1);
    assert_eq!(events_named(&events, "update").len(), 1);
    // The filtered type also fans out under its own name
    assert_eq!(events_named(&events, "tick").len(), 1);

    // A default message does not update the value when a filter is set
    engine.take_events();
    engine.stream_event(
        1,
        StreamEvent::Message {
            event_type: None,
            data: r#"{"n": 99}"#.to_string(),
            last_event_id: None,
        },
    );
    assert_eq!(text_of(&engine, "n"), "7");
    let events = engine.take_events();
    assert_eq!(events_named(&events, "message").len(), 1);
    assert!(events_named(&events, "update").is_empty());
}

#[test]
fn stream_parse_failure_keeps_value() {
    let mut engine = engine_from(r#"<src name="ws" url="ws://feed/live"></src>"#);
    engine.stream_event(1, StreamEvent::Open);
    engine.stream_event(
        1,
        StreamEvent::Message {
            event_type: None,
            data: "42".to_string(),
            last_event_id: None,
        },
    );
    assert_eq!(engine.source_value("ws"), Some(Value::int(42)));

    engine.take_events();
    engine.stream_event(
        1,
        StreamEvent::Message {
            event_type: None,
            data: "{broken".to_string(),
            last_event_id: None,
        },
    );
    assert_eq!(engine.source_value("ws"), Some(Value::int(42)));
    let events = engine.take_events();
    let errors = events_named(&events, "error");
    assert_eq!(errors[0].detail.get("type"), Some(&Value::text("format")));
}

#[test]
fn transport_error_and_close_events() {
    let mut engine = engine_from(r#"<src name="ws" url="ws://feed/live"></src>"#);
    engine.stream_event(1, StreamEvent::Open);

    engine.take_events();
    engine.stream_event(1, StreamEvent::Error("connection reset".to_string()));
    assert_eq!(engine.source_status("ws"), Some("error"));
    let events = engine.take_events();
    assert_eq!(
        events_named(&events, "error")[0].detail.get("type"),
        Some(&Value::text("connection"))
    );

    engine.stream_event(
        1,
        StreamEvent::Closed {
            code: Some(1006),
            reason: Some("abnormal".to_string()),
        },
    );
    let events = engine.take_events();
    let closes = events_named(&events, "close");
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].detail.get("code"), Some(&Value::int(1006)));
}

#[test]
fn every_mode_fetches_on_interval() {
    let mut engine = engine_with_http(
        r#"<src name="poll" url="/tick" fetch="every 5s"></src>"#,
        |http| {
            http.respond("/tick", 200, "1");
            http.respond("/tick", 200, "2");
        },
    );
    assert_eq!(engine.source_status("poll"), Some("idle"));

    engine.advance_time(5_000);
    engine.pump_http();
    assert_eq!(engine.source_value("poll"), Some(Value::int(1)));

    engine.advance_time(5_000);
    engine.pump_http();
    assert_eq!(engine.source_value("poll"), Some(Value::int(2)));
}

#[test]
fn idle_mode_fetches_on_idle_or_fallback_timeout() {
    let mut engine = engine_with_http(
        r#"<src name="lazy" url="/data" fetch="idle"></src>"#,
        |http| {
            http.respond("/data", 200, "1");
        },
    );
    assert_eq!(engine.source_status("lazy"), Some("idle"));

    engine.signal_idle();
    engine.pump_http();
    assert_eq!(engine.source_value("lazy"), Some(Value::int(1)));

    // The fallback timer finds nothing left to do
    engine.advance_time(1_000);
    assert_eq!(engine.source_value("lazy"), Some(Value::int(1)));
}

#[test]
fn idle_fallback_fires_without_an_idle_signal() {
    let mut engine = engine_with_http(
        r#"<src name="lazy" url="/data" fetch="idle"></src>"#,
        |http| {
            http.respond("/data", 200, "2");
        },
    );
    engine.advance_time(500);
    engine.pump_http();
    assert_eq!(engine.source_value("lazy"), Some(Value::int(2)));
}

#[test]
fn visible_mode_waits_for_intersection() {
    let mut engine = engine_with_http(
        r#"<src id="lazy" name="lazy" url="/data" fetch="visible"></src>"#,
        |http| {
            http.respond("/data", 200, "7");
        },
    );
    engine.pump_http();
    assert_eq!(engine.source_status("lazy"), Some("idle"));

    let element = by_id(&engine, "lazy");
    engine.element_visible(element);
    engine.pump_http();
    assert_eq!(engine.source_value("lazy"), Some(Value::int(7)));

    // Firing again does not re-arm
    engine.element_visible(element);
    assert!(engine.take_events().iter().filter(|e| e.name == "fetch").count() <= 2);
}
