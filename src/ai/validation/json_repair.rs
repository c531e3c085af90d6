//! JSON Repair Parser
//!
//! Best-effort extraction of a JSON object from raw model text.
//!
//! Four ordered tiers, each more aggressive than the last, stopping at the
//! first candidate that parses:
//!
//! - **Direct**: first `{` to last `}`
//! - **Balanced**: first `{` to the brace that brings depth back to zero
//! - **Heuristic**: trailing commas removed, missing newline-separated commas inserted
//! - **Closed**: unterminated string and unclosed containers closed at the cut point
//!
//! Repairs only remove or close syntax. Field values are never invented.

use serde_json::Value;
use tracing::{debug, trace};

use crate::constants::repair as repair_constants;

// =============================================================================
// Outcome Types
// =============================================================================

/// Tier that produced a successful parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairTier {
    /// Tier A: first `{` to last `}`
    Direct,
    /// Tier B: balanced-brace match
    Balanced,
    /// Tier C: heuristic textual repair
    Heuristic,
    /// Tier D: closers appended to truncated output
    Closed,
}

impl RepairTier {
    /// Whether the text itself had to be modified
    pub fn was_repaired(&self) -> bool {
        matches!(self, Self::Heuristic | Self::Closed)
    }
}

impl std::fmt::Display for RepairTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Balanced => write!(f, "balanced"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why no structured value could be extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    EmptyResponse,
    NoJsonObject,
    SyntaxError,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::NoJsonObject => write!(f, "no JSON object found"),
            Self::SyntaxError => write!(f, "syntax error after repair attempts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValue {
    pub value: Value,
    pub tier: RepairTier,
}

/// Exactly one of a value or a failure reason
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(ParsedValue),
    Failed(ParseFailure),
}

impl ParseOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Parsed(parsed) => Some(&parsed.value),
            Self::Failed(_) => None,
        }
    }

    pub fn tier(&self) -> Option<RepairTier> {
        match self {
            Self::Parsed(parsed) => Some(parsed.tier),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<ParseFailure> {
        match self {
            Self::Parsed(_) => None,
            Self::Failed(reason) => Some(*reason),
        }
    }
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Parse raw model text through all repair tiers
pub fn parse_model_output(raw: &str) -> ParseOutcome {
    JsonRepairer::new().parse(raw)
}

/// Strip a surrounding markdown code fence (```json ... ```), if any
pub fn strip_code_fences(s: &str) -> &str {
    let mut result = s.trim();

    if result.starts_with("```") {
        result = match result.find('\n') {
            Some(first_newline) => &result[first_newline + 1..],
            None => result.trim_start_matches('`'),
        };
    }

    if let Some(stripped) = result.trim_end().strip_suffix("```") {
        result = stripped;
    }

    result.trim()
}

// =============================================================================
// JsonRepairer
// =============================================================================

/// Tiered JSON repair parser. Stateless; never panics on any input.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRepairer;

impl JsonRepairer {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: &str) -> ParseOutcome {
        if raw.trim().is_empty() {
            return ParseOutcome::Failed(ParseFailure::EmptyResponse);
        }

        let Some(start) = raw.find('{') else {
            debug!(target: "docsift::repair", preview = %preview(raw), "No JSON object in response");
            return ParseOutcome::Failed(ParseFailure::NoJsonObject);
        };
        let tail = &raw[start..];

        // Tier A
        if let Some(end) = tail.rfind('}')
            && let Some(value) = lenient_parse(&tail[..=end])
        {
            return parsed(value, RepairTier::Direct);
        }

        // Tier B
        let balanced = balanced_slice(tail);
        if let Some(slice) = balanced
            && let Some(value) = lenient_parse(slice)
        {
            return parsed(value, RepairTier::Balanced);
        }

        // Tier C works on the balanced slice, or everything after `{` when unbalanced
        let repaired = heuristic_repair(balanced.unwrap_or(tail));
        if let Some(value) = lenient_parse(&repaired) {
            return parsed(value, RepairTier::Heuristic);
        }

        // Tier D
        if let Some(closed) = close_truncated(&repaired)
            && let Some(value) = lenient_parse(&closed)
        {
            return parsed(value, RepairTier::Closed);
        }

        debug!(target: "docsift::repair", preview = %preview(raw), "All repair tiers failed");
        ParseOutcome::Failed(ParseFailure::SyntaxError)
    }
}

fn parsed(value: Value, tier: RepairTier) -> ParseOutcome {
    if tier.was_repaired() {
        debug!(target: "docsift::repair", %tier, "JSON recovered after repair");
    } else {
        trace!(target: "docsift::repair", %tier, "JSON parsed");
    }
    ParseOutcome::Parsed(ParsedValue { value, tier })
}

/// Leading slice of `s` for log lines
pub(crate) fn preview(s: &str) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(repair_constants::PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Strict parse, then a second try with raw control characters escaped inside strings
fn lenient_parse(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Some(value),
        Err(_) => {
            let escaped = escape_control_chars(candidate)?;
            serde_json::from_str::<Value>(&escaped).ok()
        }
    }
}

/// Escape control characters inside string literals; `None` when nothing changed
fn escape_control_chars(s: &str) -> Option<String> {
    let mut result = String::with_capacity(s.len() + 16);
    let mut in_string = false;
    let mut escape = false;
    let mut changed = false;

    for ch in s.chars() {
        if escape {
            escape = false;
            result.push(ch);
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape = true;
                result.push(ch);
            }
            '"' => {
                in_string = !in_string;
                result.push(ch);
            }
            c if in_string && (c as u32) < 0x20 => {
                changed = true;
                match c {
                    '\n' => result.push_str("\\n"),
                    '\r' => result.push_str("\\r"),
                    '\t' => result.push_str("\\t"),
                    other => result.push_str(&format!("\\u{:04x}", other as u32)),
                }
            }
            _ => result.push(ch),
        }
    }

    changed.then_some(result)
}

// =============================================================================
// Tier B: Balanced Slice
// =============================================================================

/// Slice from the leading `{` to the brace that returns depth to zero
fn balanced_slice(s: &str) -> Option<&str> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

// =============================================================================
// Tier C: Heuristic Repair
// =============================================================================

fn heuristic_repair(s: &str) -> String {
    insert_missing_commas(&fix_trailing_commas(s))
}

/// Insert a comma where `}` or `]` is followed, across a newline, by an opening quote
fn insert_missing_commas(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    let chars: Vec<char> = s.chars().collect();
    let mut in_string = false;
    let mut escape = false;

    for (i, &ch) in chars.iter().enumerate() {
        result.push(ch);

        if escape {
            escape = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '}' | ']' if !in_string => {
                let mut j = i + 1;
                let mut saw_newline = false;
                while j < chars.len() && chars[j].is_whitespace() {
                    saw_newline |= chars[j] == '\n';
                    j += 1;
                }

                if saw_newline && j < chars.len() && chars[j] == '"' {
                    result.push(',');
                }
            }
            _ => {}
        }
    }

    result
}

/// Remove commas that directly precede `]` or `}` (outside strings)
fn fix_trailing_commas(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut in_string = false;
    let mut escape = false;

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];

        if escape {
            escape = false;
        } else if ch == '\\' && in_string {
            escape = true;
        } else if ch == '"' {
            in_string = !in_string;
        } else if ch == ',' && !in_string {
            // Look ahead, skipping whitespace
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }

            if j < chars.len() && (chars[j] == ']' || chars[j] == '}') {
                i += 1;
                continue;
            }
        }

        result.push(ch);
        i += 1;
    }

    result
}

// =============================================================================
// Tier D: Close Truncated Output
// =============================================================================

/// Close a truncated object: finish an open string, drop a dangling comma or
/// key, then append the missing closers in stack order.
///
/// Returns `None` when nothing is left open.
fn close_truncated(s: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut string_start = 0;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape = true,
            '"' => {
                if !in_string {
                    string_start = i;
                }
                in_string = !in_string;
            }
            '{' | '[' if !in_string => stack.push(ch),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut result = s.to_string();
    if in_string {
        if escape {
            // Dangling backslash would escape the closing quote
            result.pop();
        }
        result.push('"');
    }

    trim_dangling(&mut result, string_start, stack.last() == Some(&'{'));

    for opener in stack.iter().rev() {
        result.push(if *opener == '{' { '}' } else { ']' });
    }

    Some(result)
}

/// Remove syntax that cannot be completed without inventing a value:
/// trailing commas, a key with no value, or a key with no colon.
fn trim_dangling(s: &mut String, last_string_start: usize, in_object: bool) {
    loop {
        let trimmed_len = s.trim_end().len();
        s.truncate(trimmed_len);

        if s.ends_with(',') {
            s.pop();
            continue;
        }

        if s.ends_with(':') {
            s.pop();
            let trimmed_len = s.trim_end().len();
            s.truncate(trimmed_len);
            if let Some(key_start) = last_string_start_before(s) {
                s.truncate(key_start);
            }
            continue;
        }

        // A bare string right after `{` or `,` inside an object is a key
        if in_object && s.ends_with('"') && last_string_start < s.len() {
            let before = s[..last_string_start].trim_end();
            if before.ends_with('{') || before.ends_with(',') {
                s.truncate(last_string_start);
                continue;
            }
        }

        break;
    }
}

/// Start index of the string literal that ends `s`
fn last_string_start_before(s: &str) -> Option<usize> {
    if !s.ends_with('"') {
        return None;
    }
    let body = &s[..s.len() - 1];
    let mut search_end = body.len();

    while let Some(pos) = body[..search_end].rfind('"') {
        let backslashes = body[..pos].chars().rev().take_while(|c| *c == '\\').count();
        if backslashes % 2 == 0 {
            return Some(pos);
        }
        search_end = pos;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn value_of(raw: &str) -> Value {
        match parse_model_output(raw) {
            ParseOutcome::Parsed(p) => p.value,
            ParseOutcome::Failed(reason) => panic!("expected value, got failure: {reason}"),
        }
    }

    #[test]
    fn test_empty_response() {
        assert_eq!(
            parse_model_output(""),
            ParseOutcome::Failed(ParseFailure::EmptyResponse)
        );
        assert_eq!(
            parse_model_output("  \n\t"),
            ParseOutcome::Failed(ParseFailure::EmptyResponse)
        );
    }

    #[test]
    fn test_no_braces() {
        assert_eq!(
            parse_model_output("hello, no braces"),
            ParseOutcome::Failed(ParseFailure::NoJsonObject)
        );
    }

    #[test]
    fn test_clean_object_is_direct() {
        let outcome = parse_model_output(r#"{"colors": ["red", "blue"]}"#);
        assert_eq!(outcome.tier(), Some(RepairTier::Direct));
        assert_eq!(outcome.value(), Some(&json!({"colors": ["red", "blue"]})));
    }

    #[test]
    fn test_prose_around_object() {
        let outcome = parse_model_output("Here you go:\n{\"a\": 1}\nHope this helps!");
        assert_eq!(outcome.tier(), Some(RepairTier::Direct));
        assert_eq!(outcome.value(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_trailing_prose_with_brace_uses_balanced() {
        let outcome = parse_model_output(r#"{"a": 1} and also {not json}"#);
        assert_eq!(outcome.tier(), Some(RepairTier::Balanced));
        assert_eq!(outcome.value(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_balance() {
        let outcome = parse_model_output(r#"{"text": "a } b { c"} trailing }"#);
        assert_eq!(outcome.tier(), Some(RepairTier::Balanced));
        assert_eq!(outcome.value(), Some(&json!({"text": "a } b { c"})));
    }

    #[test]
    fn test_trailing_comma_uses_heuristic() {
        let outcome = parse_model_output(r#"{"a": 1,}"#);
        assert_eq!(outcome.tier(), Some(RepairTier::Heuristic));
        assert_eq!(outcome.value(), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_trailing_comma_in_array() {
        assert_eq!(
            value_of(r#"{"files": [{"path": "test.rs"},]}"#),
            json!({"files": [{"path": "test.rs"}]})
        );
    }

    #[test]
    fn test_comma_inside_string_is_kept() {
        assert_eq!(
            value_of(r#"{"a": "x,}", "b": [1,],}"#),
            json!({"a": "x,}", "b": [1]})
        );
    }

    #[test]
    fn test_missing_comma_across_newline() {
        let raw = "{\"a\": {\"x\": 1}\n  \"b\": [2]\n  \"c\": 3}";
        let outcome = parse_model_output(raw);
        assert_eq!(outcome.tier(), Some(RepairTier::Heuristic));
        assert_eq!(outcome.value(), Some(&json!({"a": {"x": 1}, "b": [2], "c": 3})));
    }

    #[test]
    fn test_truncated_nested_object_is_closed() {
        let outcome = parse_model_output(r#"{"a": {"b": 1"#);
        assert_eq!(outcome.tier(), Some(RepairTier::Closed));
        assert_eq!(outcome.value(), Some(&json!({"a": {"b": 1}})));
    }

    #[test]
    fn test_truncated_inside_array_and_string() {
        assert_eq!(
            value_of(r#"{"tags": ["invoice", "tax"#),
            json!({"tags": ["invoice", "tax"]})
        );
    }

    #[test]
    fn test_truncated_after_comma_and_key() {
        assert_eq!(value_of(r#"{"a": 1, "b": "#), json!({"a": 1}));
        assert_eq!(value_of(r#"{"a": 1, "b"#), json!({"a": 1}));
        assert_eq!(value_of(r#"{"a": [1, 2,"#), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_raw_newline_inside_string_is_lenient() {
        assert_eq!(
            value_of("{\"note\": \"line one\nline two\"}"),
            json!({"note": "line one\nline two"})
        );
    }

    #[test]
    fn test_balanced_but_broken_is_syntax_error() {
        assert_eq!(
            parse_model_output(r#"{"a": 1 "b": 2}"#),
            ParseOutcome::Failed(ParseFailure::SyntaxError)
        );
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fences("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_failure_display_strings() {
        assert_eq!(ParseFailure::EmptyResponse.to_string(), "empty response");
        assert_eq!(ParseFailure::NoJsonObject.to_string(), "no JSON object found");
        assert_eq!(
            ParseFailure::SyntaxError.to_string(),
            "syntax error after repair attempts"
        );
    }

    fn json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 ,:{}\\[\\]]{0,12}".prop_map(Value::String),
        ]
    }

    fn json_object() -> impl Strategy<Value = Value> {
        let leaf = json_leaf();
        let nested = leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        });
        prop::collection::btree_map("[a-z]{1,6}", nested, 1..5)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    proptest! {
        #[test]
        fn prop_valid_object_is_idempotent(value in json_object()) {
            let text = serde_json::to_string(&value).unwrap();
            let outcome = parse_model_output(&text);
            prop_assert_eq!(outcome.tier(), Some(RepairTier::Direct));
            prop_assert_eq!(outcome.value(), Some(&value));
        }

        #[test]
        fn prop_extraneous_text_is_recovered_by_a_or_b(
            value in json_object(),
            prefix in "[a-zA-Z .:\n]{0,30}",
            suffix in "[a-zA-Z .!}\n]{0,30}",
        ) {
            let text = format!("{}{}{}", prefix, serde_json::to_string_pretty(&value).unwrap(), suffix);
            let outcome = parse_model_output(&text);
            prop_assert!(matches!(outcome.tier(), Some(RepairTier::Direct | RepairTier::Balanced)));
            prop_assert_eq!(outcome.value(), Some(&value));
        }

        #[test]
        fn prop_single_trailing_comma_is_removed(
            keys in prop::collection::btree_set("[a-z]{1,6}", 1..5),
            numbers in prop::collection::vec(any::<i32>(), 1..5),
            in_array in any::<bool>(),
        ) {
            let body: Vec<String> = keys.iter().map(|k| format!("\"{}\": 1", k)).collect();
            let list: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
            let (broken, expected) = if in_array {
                (
                    format!("{{{}, \"items\": [{},]}}", body.join(", "), list.join(", ")),
                    format!("{{{}, \"items\": [{}]}}", body.join(", "), list.join(", ")),
                )
            } else {
                (
                    format!("{{{},}}", body.join(", ")),
                    format!("{{{}}}", body.join(", ")),
                )
            };
            let expected: Value = serde_json::from_str(&expected).unwrap();
            let outcome = parse_model_output(&broken);
            prop_assert_eq!(outcome.tier(), Some(RepairTier::Heuristic));
            prop_assert_eq!(outcome.value(), Some(&expected));
        }

        #[test]
        fn prop_missing_closing_braces_are_appended(depth in 1usize..8, leaf in any::<i32>()) {
            let mut text = String::new();
            for level in 0..depth {
                text.push_str(&format!("{{\"k{}\": ", level));
            }
            text.push_str(&leaf.to_string());

            let outcome = parse_model_output(&text);
            prop_assert_eq!(outcome.tier(), Some(RepairTier::Closed));

            let mut expected = json!(leaf);
            for level in (0..depth).rev() {
                expected = json!({ format!("k{}", level): expected });
            }
            prop_assert_eq!(outcome.value(), Some(&expected));
        }
    }
}
