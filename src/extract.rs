//! Best-effort JSON extraction from free-form model output.
//!
//! Models asked for JSON routinely wrap it in prose, code fences, or
//! Python-style single quoting. [`extract_json`] runs an ordered chain of
//! recovery strategies over the raw text and returns the first structure
//! that parses. It never fails loudly: callers get `None` when every
//! strategy has been exhausted and decide themselves whether to re-issue
//! the request.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// A single recovery strategy: raw text in, parsed structure or nothing out.
type Strategy = fn(&str) -> Option<Value>;

/// Strategies in the order they are attempted. Later entries are
/// progressively lossier; the last one is a blanket quote swap and is
/// only reached when everything else has failed.
const STRATEGIES: &[Strategy] = &[
    parse_direct,
    parse_json_fence,
    parse_any_fence,
    parse_brace_span,
    parse_with_quote_repair,
    parse_python_literal,
    parse_swapped_quotes,
];

/// Extract one JSON structure from an arbitrary text blob.
///
/// Returns `None` if no strategy produces valid JSON. Never panics.
pub fn extract_json(text: &str) -> Option<Value> {
    STRATEGIES.iter().find_map(|strategy| strategy(text))
}

fn json_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").expect("valid regex"))
}

fn any_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```\s*(\{.*?\})\s*```").expect("valid regex"))
}

fn quoted_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([^"]+)":\s*"([^"]*(?:"[^"]*)*)""#).expect("valid regex")
    })
}

/// Strategy 1: the whole text is already valid JSON.
fn parse_direct(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Strategy 2: a ```json fenced block containing an object.
fn parse_json_fence(text: &str) -> Option<Value> {
    let caps = json_fence_re().captures(text)?;
    serde_json::from_str(caps.get(1)?.as_str()).ok()
}

/// Strategy 3: any fenced block containing an object, no language label.
fn parse_any_fence(text: &str) -> Option<Value> {
    let caps = any_fence_re().captures(text)?;
    serde_json::from_str(caps.get(1)?.as_str()).ok()
}

/// Strategy 4: the greedy span from the first `{` to the last `}`.
fn parse_brace_span(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Strategy 5: escape unescaped interior quotes inside `"key": "value"`
/// pairs, then reparse. Handles values that themselves contain `"`.
fn parse_with_quote_repair(text: &str) -> Option<Value> {
    let repaired = quoted_pair_re().replace_all(text, |caps: &regex::Captures| {
        let key = &caps[1];
        let value = caps[2].replace('"', "\\\"");
        format!("\"{}\": \"{}\"", key, value)
    });
    serde_json::from_str(&repaired).ok()
}

/// Strategy 6: Python-literal mapping (single-quoted strings, True/False/None).
///
/// Rewrites single-quoted strings into JSON strings and the three Python
/// keywords into their JSON counterparts, then reparses. String-aware, so
/// apostrophes inside double-quoted strings survive.
fn parse_python_literal(text: &str) -> Option<Value> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                // Single-quoted string: collect until the closing quote,
                // honoring backslash escapes, and re-emit as JSON.
                let mut inner = String::new();
                let mut closed = false;
                while let Some(c2) = chars.next() {
                    match c2 {
                        '\\' => {
                            if let Some(esc) = chars.next() {
                                match esc {
                                    '\'' => inner.push('\''),
                                    other => {
                                        inner.push('\\');
                                        inner.push(other);
                                    }
                                }
                            }
                        }
                        '\'' => {
                            closed = true;
                            break;
                        }
                        other => inner.push(other),
                    }
                }
                if !closed {
                    return None;
                }
                out.push('"');
                out.push_str(&inner.replace('"', "\\\""));
                out.push('"');
            }
            '"' => {
                // Pass a double-quoted string through untouched.
                out.push('"');
                while let Some(c2) = chars.next() {
                    out.push(c2);
                    if c2 == '\\' {
                        if let Some(esc) = chars.next() {
                            out.push(esc);
                        }
                    } else if c2 == '"' {
                        break;
                    }
                }
            }
            c if c.is_alphabetic() => {
                let mut word = String::new();
                word.push(c);
                while let Some(&c2) = chars.peek() {
                    if c2.is_alphanumeric() || c2 == '_' {
                        word.push(c2);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    other => out.push_str(other),
                }
            }
            other => out.push(other),
        }
    }

    serde_json::from_str(out.trim()).ok()
}

/// Strategy 7: blanket single-to-double quote swap. Intentionally lossy;
/// corrupts apostrophes inside values, so it runs last.
fn parse_swapped_quotes(text: &str) -> Option<Value> {
    serde_json::from_str(&text.replace('\'', "\"")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_json_parses() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn json_fence_is_unwrapped() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text), Some(json!({"a": 1})));
    }

    #[test]
    fn unlabeled_fence_is_unwrapped() {
        let text = "```\n{\"chapters\": []}\n```";
        assert_eq!(extract_json(text), Some(json!({"chapters": []})));
    }

    #[test]
    fn brace_span_in_prose() {
        let text = "Sure! The analysis is {\"genres\": [\"sci-fi\"]} as requested.";
        assert_eq!(extract_json(text), Some(json!({"genres": ["sci-fi"]})));
    }

    #[test]
    fn fenced_object_matches_inner_span_parse() {
        // Whatever noise wraps it, extraction must equal parsing the
        // innermost brace span directly.
        let inner = r#"{"issues": [], "strengths": ["pacing"]}"#;
        let wrapped = format!("Analysis below.\n```json\n{}\n```\nDone.", inner);
        let direct: Value = serde_json::from_str(inner).unwrap();
        assert_eq!(extract_json(&wrapped), Some(direct));
    }

    #[test]
    fn python_dict_literal() {
        let text = "{'title': 'Chapter One', 'done': True, 'notes': None}";
        assert_eq!(
            extract_json(text),
            Some(json!({"title": "Chapter One", "done": true, "notes": null}))
        );
    }

    #[test]
    fn python_literal_preserves_apostrophes_in_double_quotes() {
        let text = r#"{"title": "the baker's son", 'kind': 'chapter'}"#;
        assert_eq!(
            extract_json(text),
            Some(json!({"title": "the baker's son", "kind": "chapter"}))
        );
    }

    #[test]
    fn nothing_found_returns_none() {
        assert_eq!(extract_json("no structure here at all"), None);
        assert_eq!(extract_json(""), None);
    }

    #[test]
    fn truncated_object_returns_none() {
        assert_eq!(extract_json(r#"{"a": [1, 2"#), None);
    }
}
