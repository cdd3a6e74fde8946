//! Coercion of free-form backend output into well-formed analysis data.
//!
//! Every backend funnels its reply text through [`normalize_analysis`] or
//! [`normalize_chat_reply`]. Neither can fail: missing or wrong-shaped fields
//! are replaced by fixed fallbacks.

use serde_json::{Map, Value};
use std::ops::Range;

use crate::analysis::{AnalysisPatch, AnalysisResult, ChatResponse, ColorSwatch, DetectedObject};

pub const FALLBACK_TAG: &str = "image";
pub const FALLBACK_MOOD: &str = "neutral";
pub const FALLBACK_SCENE: &str = "unknown";
pub const FALLBACK_DESCRIPTION: &str = "No description";
pub const FALLBACK_TITLE: &str = "Untitled";

/// Longest description taken from raw text when the reply had no usable JSON.
pub const RAW_DESCRIPTION_LIMIT: usize = 300;

const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if trimmed.starts_with("```") {
        if let Some(newline) = trimmed.find('\n') {
            let body = &trimmed[newline + 1..];
            if let Some(end) = body.rfind("```") {
                return body[..end].trim();
            }
            return body.trim();
        }
    }
    trimmed
}

/// Locate a JSON object inside `text`.
///
/// The outermost `{ ... }` span is tried first. If that does not parse, the
/// first brace that opens a complete object wins, which handles prose with
/// stray braces after the payload.
pub fn find_json_object(text: &str) -> Option<(Map<String, Value>, Range<usize>)> {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str(&text[start..=end]) {
                return Some((map, start..end + 1));
            }
        }
    }

    for (start, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            let end = start + stream.byte_offset();
            return Some((map, start..end));
        }
    }

    None
}

/// Turn any backend reply into a valid [`AnalysisResult`].
pub fn normalize_analysis(raw: &str) -> AnalysisResult {
    let text = strip_code_fences(raw);
    match find_json_object(text) {
        Some((object, _)) => analysis_from_object(&object),
        None => {
            tracing::warn!(
                length = raw.len(),
                "Backend reply contained no JSON object, using fallback metadata"
            );
            fallback_analysis(text)
        }
    }
}

fn analysis_from_object(object: &Map<String, Value>) -> AnalysisResult {
    let tags = object
        .get("tags")
        .map(string_list)
        .filter(|tags| !tags.is_empty())
        .unwrap_or_else(|| vec![FALLBACK_TAG.to_string()]);

    let objects = object.get("objects").map(object_list).unwrap_or_default();

    let colors = object
        .get("colors")
        .map(color_list)
        .filter(|colors| !colors.is_empty())
        .unwrap_or_else(|| vec![ColorSwatch::neutral_gray()]);

    AnalysisResult {
        tags,
        objects,
        colors,
        mood: text_field(object, &["mood"]).unwrap_or_else(|| FALLBACK_MOOD.to_string()),
        scene: text_field(object, &["scene"]).unwrap_or_else(|| FALLBACK_SCENE.to_string()),
        description: text_field(object, &["description"])
            .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string()),
        suggested_title: text_field(object, &["suggestedTitle", "suggested_title", "title"])
            .unwrap_or_else(|| FALLBACK_TITLE.to_string()),
    }
}

fn fallback_analysis(text: &str) -> AnalysisResult {
    let text = text.trim();
    let description = if text.is_empty() {
        FALLBACK_DESCRIPTION.to_string()
    } else {
        text.chars().take(RAW_DESCRIPTION_LIMIT).collect()
    };

    AnalysisResult {
        tags: vec![FALLBACK_TAG.to_string()],
        objects: Vec::new(),
        colors: vec![ColorSwatch::neutral_gray()],
        mood: FALLBACK_MOOD.to_string(),
        scene: FALLBACK_SCENE.to_string(),
        description,
        suggested_title: FALLBACK_TITLE.to_string(),
    }
}

/// Normalize a chat reply. A reply without a `message` field keeps whatever
/// prose surrounded the JSON, or the whole text.
pub fn normalize_chat_reply(raw: &str) -> ChatResponse {
    let text = strip_code_fences(raw);

    if let Some((object, span)) = find_json_object(text) {
        let updated_metadata = object.get("updatedMetadata").and_then(normalize_patch);
        let message = text_field(&object, &["message", "response"]).unwrap_or_else(|| {
            let prose = format!("{} {}", &text[..span.start], &text[span.end..]);
            let prose = prose.trim();
            if !prose.is_empty() {
                prose.to_string()
            } else if updated_metadata.is_some() {
                "Metadata updated.".to_string()
            } else {
                text.to_string()
            }
        });
        return ChatResponse {
            message,
            updated_metadata,
        };
    }

    let message = if text.is_empty() {
        "No response".to_string()
    } else {
        text.to_string()
    };
    ChatResponse {
        message,
        updated_metadata: None,
    }
}

/// Keep only the well-formed fields of a partial update. `None` when nothing usable remains.
pub fn normalize_patch(value: &Value) -> Option<AnalysisPatch> {
    let object = value.as_object()?;

    let patch = AnalysisPatch {
        tags: object
            .get("tags")
            .map(string_list)
            .filter(|tags| !tags.is_empty()),
        objects: object
            .get("objects")
            .filter(|v| v.is_array())
            .map(object_list),
        colors: object
            .get("colors")
            .map(color_list)
            .filter(|colors| !colors.is_empty()),
        mood: text_field(object, &["mood"]),
        scene: text_field(object, &["scene"]),
        description: text_field(object, &["description"]),
        suggested_title: text_field(object, &["suggestedTitle", "suggested_title", "title"]),
    };

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

fn text_field(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| object.get(*name))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strings from an array, or from a comma-separated string.
fn string_list(value: &Value) -> Vec<String> {
    let items: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let mut tags: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !tags.iter().any(|t| t == item) {
            tags.push(item.to_string());
        }
    }
    tags
}

fn object_list(value: &Value) -> Vec<DetectedObject> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) if !name.trim().is_empty() => Some(DetectedObject {
                name: name.trim().to_string(),
                confidence: DEFAULT_CONFIDENCE,
            }),
            Value::Object(map) => {
                let name = text_field(map, &["name", "label"])?;
                let confidence = map
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .filter(|c| c.is_finite())
                    .map(|c| c.clamp(0.0, 1.0))
                    .unwrap_or(DEFAULT_CONFIDENCE);
                Some(DetectedObject { name, confidence })
            }
            _ => None,
        })
        .collect()
}

fn color_list(value: &Value) -> Vec<ColorSwatch> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let map = item.as_object()?;
            let hex = map.get("hex").and_then(Value::as_str).and_then(normalize_hex)?;
            let name = text_field(map, &["name"]).unwrap_or_else(|| hex.clone());
            let percentage = map
                .get("percentage")
                .and_then(Value::as_f64)
                .filter(|p| p.is_finite())
                .map(|p| p.clamp(0.0, 100.0))
                .unwrap_or(0.0);
            Some(ColorSwatch {
                hex,
                name,
                percentage,
            })
        })
        .collect()
}

/// Canonical `#RRGGBB` form of a hex colour. Accepts 3 or 6 digits with or
/// without the leading `#`.
fn normalize_hex(raw: &str) -> Option<String> {
    let digits = raw.trim().trim_start_matches('#');
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match digits.len() {
        6 => Some(format!("#{}", digits.to_ascii_uppercase())),
        3 => {
            let expanded: String = digits.chars().flat_map(|c| [c, c]).collect();
            Some(format!("#{}", expanded.to_ascii_uppercase()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_well_formed(result: &AnalysisResult) {
        assert!(!result.tags.is_empty());
        assert!(!result.colors.is_empty());
        assert!(!result.mood.is_empty());
        assert!(!result.scene.is_empty());
        assert!(!result.description.is_empty());
        assert!(!result.suggested_title.is_empty());
    }

    #[test]
    fn test_plain_prose_gets_fallbacks() {
        let result = normalize_analysis("hello");
        assert_well_formed(&result);
        assert_eq!(result.tags, vec![FALLBACK_TAG]);
        assert_eq!(result.colors, vec![ColorSwatch::neutral_gray()]);
        assert_eq!(result.mood, FALLBACK_MOOD);
        assert_eq!(result.scene, FALLBACK_SCENE);
        assert_eq!(result.description, "hello");
        assert_eq!(result.suggested_title, FALLBACK_TITLE);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        for raw in ["", "   ", "{", "}{", "{\"tags\": [", "\u{0}\u{1}binary"] {
            assert_well_formed(&normalize_analysis(raw));
        }
        assert_eq!(normalize_analysis("").description, FALLBACK_DESCRIPTION);
    }

    #[test]
    fn test_long_prose_is_truncated() {
        let raw = "é".repeat(RAW_DESCRIPTION_LIMIT + 50);
        let result = normalize_analysis(&raw);
        assert_eq!(result.description.chars().count(), RAW_DESCRIPTION_LIMIT);
    }

    #[test]
    fn test_fenced_json_is_parsed() {
        let raw = "Here you go:\n```json\n{\"tags\":[\"beach\",\"sea\"],\"mood\":\"calm\",\
                   \"scene\":\"coast\",\"description\":\"Waves.\",\"suggestedTitle\":\"Shore\",\
                   \"objects\":[{\"name\":\"boat\",\"confidence\":0.7}],\
                   \"colors\":[{\"hex\":\"#0a6ebd\",\"name\":\"Blue\",\"percentage\":60}]}\n```";
        let result = normalize_analysis(raw);
        assert_eq!(result.tags, vec!["beach", "sea"]);
        assert_eq!(result.mood, "calm");
        assert_eq!(result.suggested_title, "Shore");
        assert_eq!(result.objects[0].name, "boat");
        assert_eq!(result.colors[0].hex, "#0A6EBD");
        assert_eq!(result.colors[0].percentage, 60.0);
    }

    #[test]
    fn test_wrong_shaped_fields_fall_back_individually() {
        let raw = json!({
            "tags": "sunset, beach , sunset",
            "objects": [{"name": "dog", "confidence": 7}, {"confidence": 0.2}, "cat", 4],
            "colors": [{"hex": "not-a-colour"}, {"hex": "fa0"}],
            "mood": 3,
            "scene": "",
            "suggestedTitle": null
        })
        .to_string();

        let result = normalize_analysis(&raw);
        assert_eq!(result.tags, vec!["sunset", "beach"]);
        assert_eq!(result.objects.len(), 2);
        assert_eq!(result.objects[0].confidence, 1.0);
        assert_eq!(result.objects[1].name, "cat");
        assert_eq!(result.objects[1].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(result.colors.len(), 1);
        assert_eq!(result.colors[0].hex, "#FFAA00");
        assert_eq!(result.colors[0].name, "#FFAA00");
        assert_eq!(result.mood, FALLBACK_MOOD);
        assert_eq!(result.scene, FALLBACK_SCENE);
        assert_eq!(result.description, FALLBACK_DESCRIPTION);
        assert_eq!(result.suggested_title, FALLBACK_TITLE);
    }

    #[test]
    fn test_empty_lists_use_fallbacks() {
        let result = normalize_analysis(r#"{"tags": [], "colors": []}"#);
        assert_eq!(result.tags, vec![FALLBACK_TAG]);
        assert_eq!(result.colors, vec![ColorSwatch::neutral_gray()]);
    }

    #[test]
    fn test_json_followed_by_prose_with_braces() {
        let raw = r#"{"tags":["a"],"mood":"happy"} Note: {this is not json}"#;
        let result = normalize_analysis(raw);
        assert_eq!(result.tags, vec!["a"]);
        assert_eq!(result.mood, "happy");
    }

    #[test]
    fn test_chat_reply_with_metadata() {
        let raw = r#"{"message": "Done, added a tag.", "updatedMetadata": {"tags": ["x", "y"], "mood": ""}}"#;
        let reply = normalize_chat_reply(raw);
        assert_eq!(reply.message, "Done, added a tag.");
        let patch = reply.updated_metadata.unwrap();
        assert_eq!(patch.tags, Some(vec!["x".to_string(), "y".to_string()]));
        assert!(patch.mood.is_none());
    }

    #[test]
    fn test_chat_reply_plain_text() {
        let reply = normalize_chat_reply("It looks like a sunset.");
        assert_eq!(reply.message, "It looks like a sunset.");
        assert!(reply.updated_metadata.is_none());

        assert_eq!(normalize_chat_reply("").message, "No response");
    }

    #[test]
    fn test_chat_reply_without_message_field() {
        let reply = normalize_chat_reply(r#"Sure. {"updatedMetadata": {"suggestedTitle": "Dusk"}}"#);
        assert_eq!(reply.message, "Sure.");
        assert_eq!(
            reply.updated_metadata.unwrap().suggested_title.as_deref(),
            Some("Dusk")
        );

        let reply = normalize_chat_reply(r#"{"updatedMetadata": {"scene": "city"}}"#);
        assert_eq!(reply.message, "Metadata updated.");
    }

    #[test]
    fn test_patch_rejects_non_objects_and_empty() {
        assert!(normalize_patch(&json!("tags")).is_none());
        assert!(normalize_patch(&json!({})).is_none());
        assert!(normalize_patch(&json!({"tags": [], "mood": 5})).is_none());
    }
}
