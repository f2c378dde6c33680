//! Parser for the `jtx-on` attribute.
//!
//! The attribute packs several `event: code` pairs into one string, so the
//! scanner must know which `;` and `:` are separators and which belong to
//! the handler code (ternaries, object literals, string bodies). It tracks
//! quote state — single, double, backtick with `${}` depth — and
//! bracket/brace/paren depth; only top-level characters separate.

use crate::util::parse_duration_ms;

#[derive(Debug, Clone, PartialEq)]
pub enum OnEvent {
    Named(String),
    /// `every <duration>` — a periodic handler rather than a listener.
    Every(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnEntry {
    pub event: OnEvent,
    pub code: String,
}

pub fn parse_on_attribute(input: &str) -> Vec<OnEntry> {
    let mut entries: Vec<(String, String)> = Vec::new();

    for segment in split_top_level(input, ';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        match split_first_top_level(segment, ':') {
            Some((event, code)) => {
                entries.push((event.trim().to_string(), code.trim().to_string()));
            }
            None => {
                // No event name: this clause continues the previous entry's
                // code, so a handler can span several `;`-separated pieces.
                if let Some((_, code)) = entries.last_mut() {
                    if !code.is_empty() {
                        code.push_str("; ");
                    }
                    code.push_str(segment);
                }
            }
        }
    }

    entries
        .into_iter()
        .filter(|(_, code)| !code.is_empty())
        .map(|(event, code)| {
            let event = match event
                .strip_prefix("every ")
                .or_else(|| event.strip_prefix("every\t"))
                .and_then(parse_duration_ms)
            {
                Some(interval) => OnEvent::Every(interval),
                None => OnEvent::Named(event),
            };
            OnEntry { event, code }
        })
        .collect()
}

#[derive(Default)]
struct ScanState {
    in_single: bool,
    in_double: bool,
    /// Backtick nesting can't occur, but `${}` inside one can.
    in_template: bool,
    template_expr_depth: usize,
    bracket_depth: i32,
    escaped: bool,
}

impl ScanState {
    fn step(&mut self, character: char) {
        if self.escaped {
            self.escaped = false;
            return;
        }
        match character {
            '\\' if self.in_single || self.in_double || self.in_template => {
                self.escaped = true;
            }
            '\'' if !self.in_double && !self.in_template => {
                self.in_single = !self.in_single;
            }
            '"' if !self.in_single && !self.in_template => {
                self.in_double = !self.in_double;
            }
            '`' if !self.in_single && !self.in_double => {
                if self.in_template && self.template_expr_depth == 0 {
                    self.in_template = false;
                } else if !self.in_template {
                    self.in_template = true;
                }
            }
            '{' if self.in_template => self.template_expr_depth += 1,
            '}' if self.in_template && self.template_expr_depth > 0 => {
                self.template_expr_depth -= 1;
            }
            '(' | '[' | '{' if !self.in_string() => self.bracket_depth += 1,
            ')' | ']' | '}' if !self.in_string() => self.bracket_depth -= 1,
            _ => {}
        }
    }

    fn in_string(&self) -> bool {
        self.in_single || self.in_double || self.in_template
    }

    fn at_top_level(&self) -> bool {
        !self.in_string() && self.bracket_depth <= 0
    }
}

fn split_top_level(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut state = ScanState::default();

    for character in input.chars() {
        if character == separator && state.at_top_level() {
            parts.push(std::mem::take(&mut current));
        } else {
            state.step(character);
            current.push(character);
        }
    }
    parts.push(current);
    parts
}

fn split_first_top_level(input: &str, separator: char) -> Option<(&str, &str)> {
    let mut state = ScanState::default();
    for (at, character) in input.char_indices() {
        if character == separator && state.at_top_level() {
            return Some((&input[..at], &input[at + character.len_utf8()..]));
        }
        state.step(character);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(event: &str, code: &str) -> OnEntry {
        OnEntry {
            event: OnEvent::Named(event.to_string()),
            code: code.to_string(),
        }
    }

    #[test]
    fn single_entry() {
        assert_eq!(
            parse_on_attribute("click: @ui.counter++"),
            vec![named("click", "@ui.counter++")]
        );
    }

    #[test]
    fn multiple_entries() {
        assert_eq!(
            parse_on_attribute("click: @ui.a = 1; change: @ui.b = 2"),
            vec![named("click", "@ui.a = 1"), named("change", "@ui.b = 2")]
        );
    }

    #[test]
    fn ternary_colon_is_not_a_separator() {
        assert_eq!(
            parse_on_attribute("click: @ui.mode = @ui.on ? 'day' : 'night'"),
            vec![named("click", "@ui.mode = @ui.on ? 'day' : 'night'")]
        );
    }

    #[test]
    fn object_literal_is_not_split() {
        assert_eq!(
            parse_on_attribute("submit: emit('save', { id: 1, tags: ['a;b'] })"),
            vec![named("submit", "emit('save', { id: 1, tags: ['a;b'] })")]
        );
    }

    #[test]
    fn string_semicolon_is_not_a_separator() {
        assert_eq!(
            parse_on_attribute("click: @ui.text = 'a; b: c'"),
            vec![named("click", "@ui.text = 'a; b: c'")]
        );
    }

    #[test]
    fn continuation_clause_appends_to_previous_code() {
        assert_eq!(
            parse_on_attribute("click: @ui.a = 1; @ui.b = 2"),
            vec![named("click", "@ui.a = 1; @ui.b = 2")]
        );
    }

    #[test]
    fn template_with_interpolation_and_colon() {
        assert_eq!(
            parse_on_attribute("click: @ui.msg = `at: ${@ui.time}; ok`"),
            vec![named("click", "@ui.msg = `at: ${@ui.time}; ok`")]
        );
    }

    #[test]
    fn every_duration_entries() {
        let entries = parse_on_attribute("every 5s: refresh('feed'); click: @ui.n++");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, OnEvent::Every(5_000));
        assert_eq!(entries[0].code, "refresh('feed')");
        assert_eq!(entries[1].event, OnEvent::Named("click".to_string()));
    }

    #[test]
    fn empty_code_entries_are_dropped() {
        assert!(parse_on_attribute("click:").is_empty());
        assert!(parse_on_attribute("  ;  ; ").is_empty());
    }
}
