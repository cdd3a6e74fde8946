//! Analysis results produced by vision backends, and the edits a user or a
//! chat session may apply to them once they are attached to an image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An object recognised in an image with the backend's confidence (0-1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    pub confidence: f64,
}

/// A dominant colour. Percentages across a result need not sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorSwatch {
    pub hex: String,
    pub name: String,
    pub percentage: f64,
}

impl ColorSwatch {
    pub fn new(hex: &str, name: &str, percentage: f64) -> Self {
        Self {
            hex: hex.to_string(),
            name: name.to_string(),
            percentage,
        }
    }

    /// Swatch used when a backend reports no usable colours.
    pub fn neutral_gray() -> Self {
        Self::new("#888888", "Gray", 100.0)
    }
}

/// Structured metadata extracted from one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub tags: Vec<String>,
    pub objects: Vec<DetectedObject>,
    pub colors: Vec<ColorSwatch>,
    pub mood: String,
    pub scene: String,
    pub description: String,
    pub suggested_title: String,
}

impl AnalysisResult {
    /// Apply a partial update. Fields absent from the patch are kept.
    pub fn merge(&mut self, patch: AnalysisPatch) {
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(objects) = patch.objects {
            self.objects = objects;
        }
        if let Some(colors) = patch.colors {
            self.colors = colors;
        }
        if let Some(mood) = patch.mood {
            self.mood = mood;
        }
        if let Some(scene) = patch.scene {
            self.scene = scene;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(title) = patch.suggested_title {
            self.suggested_title = title;
        }
    }

    /// Append a tag. Returns false when the trimmed tag is empty or already present.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        if tag.is_empty() || self.tags.iter().any(|t| t == tag) {
            return false;
        }
        self.tags.push(tag.to_string());
        true
    }

    /// Remove every occurrence of `tag`. Returns true if anything was removed.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        self.tags.len() != before
    }
}

/// Partial analysis result, as returned by a chat turn that edits metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<DetectedObject>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<ColorSwatch>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_title: Option<String>,
}

impl AnalysisPatch {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none()
            && self.objects.is_none()
            && self.colors.is_none()
            && self.mood.is_none()
            && self.scene.is_none()
            && self.description.is_none()
            && self.suggested_title.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Reply from a chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub message: String,
    pub updated_metadata: Option<AnalysisPatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnalysisResult {
        AnalysisResult {
            tags: vec!["a".to_string(), "b".to_string()],
            objects: vec![DetectedObject {
                name: "tree".to_string(),
                confidence: 0.9,
            }],
            colors: vec![ColorSwatch::neutral_gray()],
            mood: "calm".to_string(),
            scene: "forest".to_string(),
            description: "Trees.".to_string(),
            suggested_title: "Woods".to_string(),
        }
    }

    #[test]
    fn test_tag_edits() {
        let mut result = sample();
        assert!(result.remove_tag("a"));
        assert_eq!(result.tags, vec!["b"]);
        assert!(result.add_tag("c"));
        assert_eq!(result.tags, vec!["b", "c"]);
    }

    #[test]
    fn test_add_tag_rejects_blank_and_duplicate() {
        let mut result = sample();
        assert!(!result.add_tag("   "));
        assert!(!result.add_tag(" b "));
        assert_eq!(result.tags, vec!["a", "b"]);
        assert!(!result.remove_tag("zzz"));
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut result = sample();
        result.merge(AnalysisPatch {
            mood: Some("joyful".to_string()),
            tags: Some(vec!["x".to_string()]),
            ..Default::default()
        });
        assert_eq!(result.mood, "joyful");
        assert_eq!(result.tags, vec!["x"]);
        assert_eq!(result.scene, "forest");
        assert_eq!(result.suggested_title, "Woods");
    }

    #[test]
    fn test_result_uses_camel_case_fields() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("suggestedTitle").is_some());
        assert!(json.get("suggested_title").is_none());

        let patch: AnalysisPatch =
            serde_json::from_str(r#"{"suggestedTitle":"New"}"#).unwrap();
        assert_eq!(patch.suggested_title.as_deref(), Some("New"));
        assert!(!patch.is_empty());
        assert!(AnalysisPatch::default().is_empty());
    }
}
