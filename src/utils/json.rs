//! Loose JSON parsing and type-narrowing helpers
//!
//! Trace payloads carry stringified JSON produced by several upstream
//! serializers. Some of it is not valid JSON: bare backslashes in Windows paths
//! or regexes, unquoted keys, single quotes, `key=value` maps, and Python
//! `repr` literals. [`parse_loose`] tries a strict parse first and only then a
//! sanitize-and-reparse pass, so valid input is never rewritten.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

/// `{key:` / `, key=` with an unquoted key
static BARE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_\-.]*)\s*(?:=|:)\s*").expect("valid regex")
});

/// `: bareword,` / `: bareword}` / `: bareword]`
static BARE_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(:\s*)([A-Za-z_][A-Za-z0-9_\-.]*)(\s*[,}\]])").expect("valid regex")
});

/// `{key=` / `, key=` opening a Java-style `toString` map entry
static EQUALS_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_\-.]*)\s*=").expect("valid regex")
});

static PY_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(True|False|None)\b").expect("valid regex"));

static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

/// Piece of the input, either outside or inside a string literal
enum Segment {
    Code(String),
    /// A string literal, already re-quoted with double quotes
    Literal(String),
}

fn is_json_escape(c: char) -> bool {
    matches!(c, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u')
}

/// Split input into code and string literal segments.
///
/// Single-quoted literals are rewritten as double-quoted ones and bare
/// backslashes inside literals are escaped.
fn split_segments(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut code = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '"' && c != '\'' {
            code.push(c);
            continue;
        }
        if !code.is_empty() {
            segments.push(Segment::Code(std::mem::take(&mut code)));
        }

        let quote = c;
        let mut literal = String::from('"');
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.peek().copied() {
                    Some('\'') if quote == '\'' => {
                        chars.next();
                        literal.push('\'');
                    }
                    Some(next) if is_json_escape(next) => {
                        chars.next();
                        literal.push('\\');
                        literal.push(next);
                    }
                    _ => literal.push_str("\\\\"),
                },
                ch if ch == quote => break,
                '"' => literal.push_str("\\\""),
                '\n' => literal.push_str("\\n"),
                '\r' => literal.push_str("\\r"),
                '\t' => literal.push_str("\\t"),
                other => literal.push(other),
            }
        }
        literal.push('"');
        segments.push(Segment::Literal(literal));
    }

    if !code.is_empty() {
        segments.push(Segment::Code(code));
    }
    segments
}

fn json_quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

fn is_scalar_literal(text: &str) -> bool {
    matches!(text, "True" | "False" | "None")
        || matches!(
            serde_json::from_str::<Value>(text),
            Ok(Value::Number(_) | Value::Bool(_) | Value::Null)
        )
}

/// One `key=` occurrence inside a code segment
struct EqualsKey<'a> {
    start: usize,
    end: usize,
    prefix: &'a str,
    key: &'a str,
}

/// Rewrite `{a=b c, d=1}` maps into quoted keys and values.
///
/// A value runs until the next `key=` or the closing bracket, so values may
/// contain spaces and commas. Nested maps and lists are left to the later
/// passes.
fn split_equals_pairs(code: &str) -> Vec<Segment> {
    let keys: Vec<EqualsKey> = EQUALS_KEY
        .captures_iter(code)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(EqualsKey {
                start: whole.start(),
                end: whole.end(),
                prefix: caps.get(1)?.as_str(),
                key: caps.get(2)?.as_str(),
            })
        })
        .collect();
    if keys.is_empty() {
        return vec![Segment::Code(code.to_string())];
    }

    let mut segments = Vec::new();
    let mut cursor = 0;
    for (index, entry) in keys.iter().enumerate() {
        let next = keys.get(index + 1);
        segments.push(Segment::Code(format!(
            "{}{}",
            &code[cursor..entry.start],
            entry.prefix
        )));
        segments.push(Segment::Literal(json_quote(entry.key)));
        segments.push(Segment::Code(": ".to_string()));

        let region_end = next.map_or(code.len(), |n| n.start);
        let region = &code[entry.end..region_end];
        let value_len = region
            .trim_end_matches(|c: char| c == '}' || c == ']' || c.is_whitespace())
            .len();
        let (value, closers) = region.split_at(value_len);
        let trimmed = value.trim();

        if trimmed.is_empty() {
            let nested = next.is_some_and(|n| n.prefix.starts_with('{'));
            let literal_follows = region_end == code.len() && closers.is_empty();
            if !nested && !literal_follows {
                segments.push(Segment::Literal(json_quote("")));
            }
        } else if trimmed.starts_with(['[', '{']) || is_scalar_literal(trimmed) {
            segments.push(Segment::Code(value.to_string()));
        } else {
            segments.push(Segment::Literal(json_quote(trimmed)));
        }
        segments.push(Segment::Code(closers.to_string()));
        cursor = region_end;
    }
    segments
}

fn repair_code(code: &str) -> String {
    let code = PY_LITERAL.replace_all(code, |caps: &Captures| match &caps[1] {
        "True" => "true",
        "False" => "false",
        _ => "null",
    });
    let code = BARE_KEY.replace_all(&code, "$1\"$2\": ");
    let code = BARE_VALUE.replace_all(&code, |caps: &Captures| {
        let word = &caps[2];
        if matches!(word, "true" | "false" | "null") {
            format!("{}{}{}", &caps[1], word, &caps[3])
        } else {
            format!("{}\"{}\"{}", &caps[1], word, &caps[3])
        }
    });
    TRAILING_COMMA.replace_all(&code, "$1").into_owned()
}

/// Rewrite loosely formatted JSON into something `serde_json` can parse.
///
/// The result is not guaranteed to be valid JSON; callers should still parse
/// and fall back on failure.
pub fn sanitize(input: &str) -> String {
    split_segments(input)
        .into_iter()
        .flat_map(|segment| match segment {
            Segment::Code(code) => split_equals_pairs(&code),
            literal => vec![literal],
        })
        .map(|segment| match segment {
            Segment::Code(code) => repair_code(&code),
            Segment::Literal(literal) => literal,
        })
        .collect()
}

/// Parse JSON strictly, then with [`sanitize`], returning `None` if both fail.
pub fn parse_loose(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    match serde_json::from_str::<Value>(&sanitize(trimmed)) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::trace!("Loose JSON parse failed, keeping text as-is: {}", e);
            None
        }
    }
}

/// Parse loose JSON, keeping the original text as a JSON string on failure.
pub fn parse_or_text(text: &str) -> Value {
    parse_loose(text).unwrap_or_else(|| Value::String(text.to_string()))
}

/// Parse loose JSON, only accepting objects and arrays.
pub fn parse_structured(text: &str) -> Option<Value> {
    parse_loose(text).filter(|v| v.is_object() || v.is_array())
}

// ============================================================================
// Type narrowing
// ============================================================================

/// Borrow a string field of an object
pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Borrow a non-empty string field of an object
pub fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    str_field(value, key).filter(|s| !s.trim().is_empty())
}

/// Borrow an object field of an object
pub fn object_field<'a>(value: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    value.get(key).and_then(Value::as_object)
}

/// Read an integral number field, accepting floats without a fraction
pub fn int_field(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(as_integer)
}

/// Narrow a JSON value to an integer
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

/// Render a JSON value as text: strings verbatim, everything else serialized
pub fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a scalar or structured value as text, skipping nulls
pub fn opt_text_of(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(text_of(v)),
    }
}

/// Key added by [`serialize_bounded`] when it had to drop entries
pub const TRUNCATED_MARKER: &str = "metadata_truncated";

/// Serialize an object in at most `max` bytes.
///
/// An object that does not fit loses whole top-level keys, in key order, and
/// gains a `metadata_truncated` marker, so the result is always valid JSON.
/// Returns `None` when not even the marker fits.
pub fn serialize_bounded(object: Map<String, Value>, max: usize) -> Option<String> {
    let value = Value::Object(object);
    let full = value.to_string();
    if full.len() <= max {
        return Some(full);
    }
    let Value::Object(object) = value else {
        return None;
    };

    let mut kept = Map::new();
    kept.insert(TRUNCATED_MARKER.to_string(), Value::Bool(true));
    let mut len = Value::Object(kept.clone()).to_string().len();

    for (key, value) in object {
        if key == TRUNCATED_MARKER {
            continue;
        }
        // `,"key":value`
        let entry = Value::String(key.clone()).to_string().len() + value.to_string().len() + 2;
        if len + entry <= max {
            len += entry;
            kept.insert(key, value);
        }
    }

    (len <= max).then(|| Value::Object(kept).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_json_parses_unchanged() {
        let text = r#"{"a": [1, 2.5, "x\\y"], "b": {"c": null, "d": true}}"#;
        assert_eq!(
            parse_loose(text),
            Some(serde_json::from_str::<Value>(text).unwrap())
        );
    }

    #[test]
    fn test_sanitize_of_valid_json_parses_to_same_value() {
        let text = r#"{"path": "C:\\temp", "list": ["a", "b"], "n": -3}"#;
        let direct: Value = serde_json::from_str(text).unwrap();
        let sanitized: Value = serde_json::from_str(&sanitize(text)).unwrap();
        assert_eq!(direct, sanitized);
    }

    #[test]
    fn test_bare_backslashes_are_escaped() {
        let value = parse_loose(r#"{"path": "C:\temp\data"}"#).unwrap();
        assert_eq!(value, json!({"path": "C:\\temp\\data"}));
    }

    #[test]
    fn test_single_quotes_and_python_literals() {
        let value = parse_loose("{'name': 'O\\'Hara', 'ok': True, 'v': None, 'q': 'say \"hi\"'}")
            .unwrap();
        assert_eq!(
            value,
            json!({"name": "O'Hara", "ok": true, "v": null, "q": "say \"hi\""})
        );
    }

    #[test]
    fn test_key_equals_value_maps() {
        let value = parse_loose("[{name=city, type=string, value=Seattle}]").unwrap();
        assert_eq!(
            value,
            json!([{"name": "city", "type": "string", "value": "Seattle"}])
        );
    }

    #[test]
    fn test_equals_maps_with_spaces_and_nesting() {
        let value = parse_loose("[{text=Book a flight to Paris, type=text}]").unwrap();
        assert_eq!(value, json!([{"text": "Book a flight to Paris", "type": "text"}]));

        let value = parse_loose("{outer={inner=1, flag=True}, name='x y', empty=}").unwrap();
        assert_eq!(
            value,
            json!({"outer": {"inner": 1, "flag": true}, "name": "x y", "empty": ""})
        );
    }

    #[test]
    fn test_unquoted_keys_with_bare_words() {
        let value = parse_loose("{location: Paris, days: 3, flag: false,}").unwrap();
        assert_eq!(value, json!({"location": "Paris", "days": 3, "flag": false}));
    }

    #[test]
    fn test_colons_inside_strings_are_untouched() {
        let value = parse_loose(r#"{'text': 'a, b: c', n: 1}"#).unwrap();
        assert_eq!(value, json!({"text": "a, b: c", "n": 1}));
    }

    #[test]
    fn test_unparseable_text_falls_back() {
        assert_eq!(parse_loose("just some words"), None);
        assert_eq!(parse_or_text("just some words"), json!("just some words"));
        assert_eq!(parse_loose("   "), None);
    }

    #[test]
    fn test_parse_structured_rejects_scalars() {
        assert_eq!(parse_structured("42"), None);
        assert_eq!(parse_structured("[1]"), Some(json!([1])));
    }

    #[test]
    fn test_type_narrowing() {
        let v = json!({"s": "x", "blank": "  ", "i": 3, "f": 4.0, "g": 4.5, "o": {}});
        assert_eq!(str_field(&v, "s"), Some("x"));
        assert_eq!(non_empty_str(&v, "blank"), None);
        assert_eq!(int_field(&v, "i"), Some(3));
        assert_eq!(int_field(&v, "f"), Some(4));
        assert_eq!(int_field(&v, "g"), None);
        assert_eq!(int_field(&v, "s"), None);
        assert!(object_field(&v, "o").is_some());
        assert_eq!(text_of(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(opt_text_of(Some(&Value::Null)), None);
    }

    #[test]
    fn test_serialize_bounded_fits() {
        let object = json!({"a": 1, "b": "two"}).as_object().cloned().unwrap();
        assert_eq!(serialize_bounded(object, 64).as_deref(), Some(r#"{"a":1,"b":"two"}"#));
    }

    #[test]
    fn test_serialize_bounded_drops_whole_keys() {
        let object = json!({"big": "x".repeat(100), "small": "ok"})
            .as_object()
            .cloned()
            .unwrap();
        let bounded = serialize_bounded(object, 48).unwrap();
        assert!(bounded.len() <= 48);

        let parsed: Value = serde_json::from_str(&bounded).unwrap();
        assert_eq!(parsed, json!({"metadata_truncated": true, "small": "ok"}));
    }

    #[test]
    fn test_serialize_bounded_too_small_for_marker() {
        let object = json!({"big": "x".repeat(100)}).as_object().cloned().unwrap();
        assert_eq!(serialize_bounded(object, 8), None);
    }
}
