//! Model output parsing.
//!
//! Models wrap JSON in code fences, prepend chatter, or append
//! explanations. Extraction tries, in order: the whole reply, the body of
//! the first fenced block, then the outermost `{…}` span. Anything that
//! still does not yield a JSON object is a
//! [`ModelError::MalformedResponse`].

use crate::types::Scenario;
use crate::ModelError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Extract the JSON object a model reply carries.
///
/// # Errors
///
/// [`ModelError::MalformedResponse`] if no candidate parses to an object.
pub fn json_object(raw: &str) -> Result<Map<String, Value>, ModelError> {
    let trimmed = raw.trim();
    let candidates = [Some(trimmed), fenced_body(trimmed), brace_span(trimmed)];

    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
        .ok_or_else(|| {
            ModelError::MalformedResponse(format!(
                "no JSON object in {} character reply",
                raw.chars().count()
            ))
        })
}

/// Extract the reply's JSON object and deserialize it as `T`.
///
/// # Errors
///
/// [`ModelError::MalformedResponse`] if extraction or deserialization fails.
pub fn json_as<T: DeserializeOwned>(raw: &str) -> Result<T, ModelError> {
    let map = json_object(raw)?;
    serde_json::from_value(Value::Object(map))
        .map_err(|e| ModelError::MalformedResponse(format!("unexpected shape: {e}")))
}

/// Scenarios listed under the first of `keys` present in `reply`.
///
/// Items are converted one at a time: an item that does not deserialize,
/// or has neither title nor description, is dropped and the rest are kept.
/// `None` when no key is present or its value is not an array.
pub fn scenario_list(reply: &Map<String, Value>, keys: &[&str]) -> Option<Vec<Scenario>> {
    let items = keys.iter().find_map(|key| reply.get(*key))?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| serde_json::from_value::<Scenario>(item.clone()).ok())
            .filter(|s| !(s.title.trim().is_empty() && s.description.trim().is_empty()))
            .collect(),
    )
}

/// Body of the first ```` ``` ```` fenced block, skipping a language tag.
fn fenced_body(s: &str) -> Option<&str> {
    let open = s.find("```")?;
    let after_fence = &s[open + 3..];
    let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// From the first `{` to the last `}`, inclusive.
fn brace_span(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}
