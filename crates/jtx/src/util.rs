//! Path navigation, duration parsing and query-string helpers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::value::Value;

/// Split a dotted path (`user.address.city`) into segments.
/// Empty segments are dropped so `select=".data."` behaves like `data`.
pub fn parse_path(path: &str) -> Vec<String> {
    path.split('.')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Navigate a value along path segments. Numeric segments index lists.
/// A missing step yields `Null`.
pub fn get_path(value: &Value, path: &[String]) -> Value {
    let mut current = value.clone();
    for segment in path {
        current = match &current {
            Value::Object(fields) => fields.get(segment.as_str()).cloned().unwrap_or(Value::Null),
            Value::List(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index).cloned())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

/// Write through a path, creating intermediate objects for missing steps.
/// Numeric segments write into lists when a list is already there.
pub fn set_path(target: &mut Value, path: &[String], new_value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = new_value;
        return;
    };
    match target {
        Value::Object(fields) => {
            let fields = Arc::make_mut(fields);
            let slot = fields
                .entry(Arc::from(head.as_str()))
                .or_insert(Value::Null);
            set_path(slot, rest, new_value);
        }
        Value::List(items) => {
            if let Ok(index) = head.parse::<usize>() {
                let items = Arc::make_mut(items);
                if index < items.len() {
                    set_path(&mut items[index], rest, new_value);
                }
            }
        }
        _ => {
            // Replace the scalar with an object carrying the new branch.
            let mut fields = BTreeMap::new();
            let mut slot = Value::Null;
            set_path(&mut slot, rest, new_value);
            fields.insert(Arc::from(head.as_str()), slot);
            *target = Value::Object(Arc::new(fields));
        }
    }
}

/// Parse a duration like `250ms`, `5s`, `2m`, `1h` into milliseconds.
/// A bare number is milliseconds.
pub fn parse_duration_ms(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let (digits, unit) = match text.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(at) => text.split_at(at),
        None => (text, ""),
    };
    let amount: f64 = digits.parse().ok()?;
    let factor = match unit.trim() {
        "" | "ms" => 1.0,
        "s" => 1_000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        _ => return None,
    };
    Some((amount * factor) as u64)
}

/// Decode a query string (`a=1&b=%22x%22`) into ordered pairs.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    let query = query.strip_prefix('?').unwrap_or(query);
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Encode pairs back into a query string (no leading `?`).
pub fn encode_query(pairs: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Normalize a `ws:`/`wss:` URL against the page origin, so relative and
/// cross-protocol forms open against the right host.
pub fn normalize_ws_url(raw: &str, origin: &str) -> String {
    if raw.starts_with("ws://") || raw.starts_with("wss://") {
        return raw.to_string();
    }
    let Ok(base) = url::Url::parse(origin) else {
        return raw.to_string();
    };
    let ws_scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let stripped = raw
        .strip_prefix("wss:")
        .or_else(|| raw.strip_prefix("ws:"))
        .unwrap_or(raw);
    match base.join(stripped) {
        Ok(mut joined) => {
            let _ = joined.set_scheme(ws_scheme);
            joined.to_string()
        }
        Err(_) => raw.to_string(),
    }
}
