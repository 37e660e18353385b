//! Normalizes the JSON shapes produced by the upstream parsers into one text
//! stream.
//!
//! Recognized shapes: flat `texts` lists, `body.children` reference graphs,
//! per-page `pages` lists, OCR `results` lists and the generic
//! `content`/`text`/`value`/`data` fields. Anything else contributes nothing.
//! Extraction never fails; the worst case is an empty string.

use serde_json::{Map, Value};

const GENERIC_KEYS: [&str; 4] = ["content", "text", "value", "data"];
const TEXT_REF_PREFIX: &str = "#/texts/";
const FRAGMENT_SEPARATOR: &str = "\n\n";

/// Extracts every text fragment of `document`, in document order, joined by a
/// blank line. Empty and whitespace-only fragments are dropped.
pub fn extract_text(document: &Value) -> String {
    match document {
        Value::String(text) => text.clone(),
        Value::Array(items) => join_fragments(extract_from_list(items)),
        Value::Object(object) => join_fragments(extract_from_object(document, object)),
        _ => String::new(),
    }
}

/// Walks a `#/`-prefixed, slash-separated path through `document`.
///
/// All-digit segments index into arrays; any other segment is an object key.
/// A missing key, an out-of-range index or a type mismatch yields `None`.
pub fn resolve_reference<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let remainder = path.strip_prefix("#/")?;

    remainder.split('/').try_fold(document, |current, segment| {
        if is_index_segment(segment) {
            let index = segment.parse::<usize>().ok()?;
            current.as_array()?.get(index)
        } else {
            current.as_object()?.get(segment)
        }
    })
}

fn is_index_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit())
}

fn extract_from_list(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.clone()),
            Value::Object(object) => first_generic_field(object),
            _ => None,
        })
        .collect()
}

fn extract_from_object(document: &Value, object: &Map<String, Value>) -> Vec<String> {
    let mut fragments = Vec::new();

    if let Some(texts) = object.get("texts").and_then(Value::as_array) {
        fragments.extend(text_fields(texts));
    }

    if let Some(children) = object
        .get("body")
        .and_then(Value::as_object)
        .and_then(|body| body.get("children"))
        .and_then(Value::as_array)
    {
        for child in children {
            let Some(reference) = child.get("$ref").and_then(Value::as_str) else {
                continue;
            };
            if !reference.starts_with(TEXT_REF_PREFIX) {
                continue;
            }
            if let Some(text) = resolve_reference(document, reference)
                .and_then(Value::as_object)
                .and_then(|resolved| resolved.get("text"))
            {
                fragments.push(coerce_to_string(text));
            }
        }
    }

    for key in GENERIC_KEYS {
        if let Some(value) = object.get(key) {
            fragments.push(coerce_to_string(value));
        }
    }

    if let Some(pages) = object.get("pages").and_then(Value::as_array) {
        for page in pages {
            match page {
                Value::String(text) => fragments.push(text.clone()),
                Value::Object(page) => fragments.extend(extract_from_page(page)),
                _ => {}
            }
        }
    }

    if let Some(results) = object.get("results").and_then(Value::as_array) {
        fragments.extend(text_fields(results));
    }

    fragments
}

fn extract_from_page(page: &Map<String, Value>) -> Vec<String> {
    if let Some(texts) = page.get("texts") {
        return texts.as_array().map(|texts| text_fields(texts)).unwrap_or_default();
    }

    if let Some(results) = page.get("results") {
        return results
            .as_array()
            .map(|results| text_fields(results))
            .unwrap_or_default();
    }

    let status = page.get("status").or_else(|| page.get("success"));
    if status.map_or(true, is_truthy) {
        return first_generic_field(page).into_iter().collect();
    }

    Vec::new()
}

/// `text` field of every object entry (the `texts` and OCR-hit shapes).
fn text_fields(entries: &[Value]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| entry.as_object()?.get("text"))
        .map(coerce_to_string)
        .collect()
}

fn first_generic_field(object: &Map<String, Value>) -> Option<String> {
    GENERIC_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .map(coerce_to_string)
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(object) => !object.is_empty(),
    }
}

fn join_fragments(fragments: Vec<String>) -> String {
    fragments
        .into_iter()
        .filter(|fragment| !fragment.trim().is_empty())
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}
