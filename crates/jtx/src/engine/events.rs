//! Engine events.
//!
//! Everything the engine tells the author goes out as a bubbling event on
//! the relevant element, with a `Value` detail. Dispatches are also recorded
//! in an inspection log so embedders and tests can observe ordering without
//! wiring listeners.

use crate::dom::NodeId;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub target: NodeId,
    pub name: String,
    pub detail: Value,
}

impl EmittedEvent {
    /// Convenience for assertions: `detail.keys` as strings.
    pub fn detail_keys(&self) -> Vec<String> {
        self.detail
            .get("keys")
            .and_then(|keys| keys.as_list().cloned())
            .map(|keys| keys.iter().map(Value::to_text).collect())
            .unwrap_or_default()
    }
}
