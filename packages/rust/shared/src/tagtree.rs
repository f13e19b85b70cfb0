//! The attributes/text tree convention for parsed feed items.
//!
//! Feed parsers represent an item as a JSON object whose fields are either a
//! plain scalar, an `{attributes, text}` wrapper, or an array of those. This
//! module models that convention as an explicit sum type ([`TagShape`]) so
//! extraction and rewriting are total over a closed set of cases instead of
//! probing object shape at runtime.

use serde_json::{Map, Value};

/// Key holding element attributes in a wrapped field.
pub const ATTRIBUTES_KEY: &str = "attributes";

/// Key holding element text in a wrapped field.
pub const TEXT_KEY: &str = "text";

// ---------------------------------------------------------------------------
// TagShape
// ---------------------------------------------------------------------------

/// The closed set of shapes a content field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagShape<'a> {
    /// The field is absent from the tree.
    Missing,
    /// A plain scalar (string or other primitive).
    Scalar(&'a Value),
    /// An object carrying an `attributes` key and optional `text`.
    Attributed(&'a Map<String, Value>),
    /// An array of scalars and/or attributed objects.
    List(&'a Vec<Value>),
}

/// Classify the value stored under `tag` in an item tree.
pub fn classify<'a>(tree: &'a Value, tag: &str) -> TagShape<'a> {
    match tree.get(tag) {
        None | Some(Value::Null) => TagShape::Missing,
        Some(Value::Array(items)) => TagShape::List(items),
        Some(Value::Object(map)) if map.contains_key(ATTRIBUTES_KEY) => {
            TagShape::Attributed(map)
        }
        Some(other) => TagShape::Scalar(other),
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract the text content of `tree[tag]`.
///
/// Strings are used directly; attributed wrappers yield their `text`
/// sub-key; absent or non-text values yield the empty string. For arrays
/// the first element's text is used (feed parsers only produce multi-entry
/// arrays for repeated identical tags).
pub fn extract_tag_text(tree: &Value, tag: &str) -> String {
    match classify(tree, tag) {
        TagShape::Missing => String::new(),
        TagShape::Scalar(value) => scalar_text(value),
        TagShape::Attributed(map) => wrapped_text(map),
        TagShape::List(items) => items.first().map(element_text).unwrap_or_default(),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn wrapped_text(map: &Map<String, Value>) -> String {
    match map.get(TEXT_KEY) {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}

fn element_text(value: &Value) -> String {
    match value {
        Value::Object(map) if map.contains_key(ATTRIBUTES_KEY) => wrapped_text(map),
        other => scalar_text(other),
    }
}

// ---------------------------------------------------------------------------
// Rewrite
// ---------------------------------------------------------------------------

/// Rewrite `tree[tag]` with `new_value`, preserving attributes.
///
/// Returns a new tree; the input is never mutated. Rules, applied uniformly:
/// - array: each element with an `attributes` key gets its `text` replaced,
///   every other element is replaced wholesale;
/// - single attributed object: `text` replaced, `attributes` untouched;
/// - scalar: replaced wholesale;
/// - missing tag: tree returned unchanged.
pub fn modify_tag_content(tree: &Value, tag: &str, new_value: &str) -> Value {
    let mut out = tree.clone();

    let replacement = match classify(tree, tag) {
        TagShape::Missing => return out,
        TagShape::Scalar(_) => Value::String(new_value.to_string()),
        TagShape::Attributed(map) => rewrite_wrapped(map, new_value),
        TagShape::List(items) => Value::Array(
            items
                .iter()
                .map(|element| rewrite_element(element, new_value))
                .collect(),
        ),
    };

    if let Value::Object(map) = &mut out {
        map.insert(tag.to_string(), replacement);
    }
    out
}

fn rewrite_wrapped(map: &Map<String, Value>, new_value: &str) -> Value {
    let mut map = map.clone();
    map.insert(TEXT_KEY.to_string(), Value::String(new_value.to_string()));
    Value::Object(map)
}

fn rewrite_element(element: &Value, new_value: &str) -> Value {
    match element {
        Value::Object(map) if map.contains_key(ATTRIBUTES_KEY) => {
            rewrite_wrapped(map, new_value)
        }
        _ => Value::String(new_value.to_string()),
    }
}
