//! Shared utility functions for the analysis relay.

use std::sync::LazyLock;

use regex::Regex;

/// Whole-line `//` or `#` comments, and markdown code fence lines.
static COMMENT_OR_FENCE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(//.*|#.*|```[A-Za-z0-9_-]*[ \t]*)$").expect("static regex is valid")
});

/// Body of a ```` ```json ```` (or unlabeled) markdown fence.
static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").expect("static regex is valid")
});

/// Extract a JSON object from text that may contain other content.
/// Uses brace-counting to find the first balanced JSON object. Braces inside
/// string literals are not counted.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    balanced_object_at(text, start).map(str::to_string)
}

/// The balanced `{...}` starting at byte `start`, if it closes.
fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Remove trailing commas before `}` or `]`, leaving string contents alone.
pub fn strip_trailing_commas(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut pending_comma: Option<String> = None;

    for ch in json.chars() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        if let Some(buffered) = pending_comma.as_mut() {
            if ch.is_whitespace() {
                buffered.push(ch);
                continue;
            }
            let buffered = pending_comma.take().unwrap_or_default();
            if ch == '}' || ch == ']' {
                // Drop the comma, keep the whitespace after it.
                out.push_str(&buffered[1..]);
            } else {
                out.push_str(&buffered);
            }
        }

        match ch {
            ',' => pending_comma = Some(String::from(",")),
            '"' => {
                in_string = true;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    if let Some(buffered) = pending_comma {
        out.push_str(&buffered);
    }
    out
}

/// Make a loosely formatted, model-produced document parseable.
///
/// A fenced ```` ```json ```` block wins when it holds an object. Otherwise
/// every `{` in the text (comment and fence lines dropped) is tried in order
/// and the first balanced candidate that parses as a non-empty object, after
/// trailing commas are stripped, is returned. An empty object is only used
/// when nothing else parses. Returns `None` when no object can be located.
pub fn sanitize_json(text: &str) -> Option<String> {
    JSON_FENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .find_map(|body| first_object(body.as_str()))
        .or_else(|| first_object(text))
}

fn first_object(text: &str) -> Option<String> {
    let text = COMMENT_OR_FENCE_LINE.replace_all(text, "");
    let mut empty = None;
    for (start, _) in text.match_indices('{') {
        let Some(candidate) = balanced_object_at(&text, start) else {
            continue;
        };
        let cleaned = strip_trailing_commas(candidate);
        match serde_json::from_str::<serde_json::Value>(&cleaned) {
            Ok(serde_json::Value::Object(map)) if !map.is_empty() => return Some(cleaned),
            Ok(serde_json::Value::Object(_)) => {
                empty.get_or_insert(cleaned);
            }
            _ => {}
        }
    }
    empty
}

/// Truncate a message to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
