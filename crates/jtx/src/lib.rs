//! jtx: declarative reactive bindings over server-rendered documents.
//!
//! The engine scans a document for `<state>`, `<src>` and `<insert>`
//! definitions and `jtx-*` attribute bindings, compiles the attribute
//! expressions once, and keeps the affected nodes in sync as values change.
//! The document lives in an in-memory arena; network, storage, URL and
//! timers are reached through host traits, so everything runs headlessly.

pub mod dom;
pub mod engine;
pub mod expr;
pub mod host;
pub mod util;
pub mod value;

pub use engine::events::EmittedEvent;
pub use engine::Engine;
pub use host::{Host, HttpResponse, MemoryStorage, MemoryUrl, ScriptedHttp, StreamEvent};
pub use value::Value;
