//! Persisted records. Field names are camelCase on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::{AnalysisResult, ChatMessage};

/// Generate an opaque record id with a readable prefix.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// An analysed image in the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: String,
    pub filename: String,
    /// JPEG data URL
    pub thumbnail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    /// Back-reference to the batch this image belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chat_history: Vec<ChatMessage>,
    pub added_at: DateTime<Utc>,
}

impl Image {
    pub fn new(filename: &str, thumbnail: String, result: Option<AnalysisResult>) -> Self {
        Self {
            id: new_id("img"),
            filename: filename.to_string(),
            thumbnail,
            result,
            batch_id: None,
            chat_history: Vec::new(),
            added_at: Utc::now(),
        }
    }

    /// Title to show for this image: the suggested title if analysed, else the filename.
    pub fn display_title(&self) -> &str {
        self.result
            .as_ref()
            .map(|r| r.suggested_title.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.filename)
    }
}

/// Fields of an image a caller may replace. Batch membership is managed by
/// the batch operations only.
#[derive(Debug, Clone, Default)]
pub struct ImagePatch {
    pub filename: Option<String>,
    pub result: Option<AnalysisResult>,
    pub chat_history: Option<Vec<ChatMessage>>,
}

/// A named, user-curated grouping of images.
///
/// `image_ids` is a display hint; membership is decided by each image's `batch_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub image_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expanded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Complete => "complete",
            QueueStatus::Error => "error",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted image awaiting or undergoing analysis.
///
/// The raw image bytes are never part of this record; they live in the
/// queue engine's memory and are gone after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub thumbnail: String,
    pub filename: String,
    pub added_at: DateTime<Utc>,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(filename: &str, thumbnail: String) -> Self {
        Self {
            id: new_id("queue"),
            thumbnail,
            filename: filename.to_string(),
            added_at: Utc::now(),
            status: QueueStatus::Pending,
            error_message: None,
            completed_at: None,
        }
    }
}

/// Bounding box in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A detected face, optionally linked to a person
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceData {
    pub id: String,
    pub image_id: String,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_gender: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Input for storing a newly detected face
#[derive(Debug, Clone)]
pub struct NewFace {
    pub image_id: String,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    pub estimated_age: Option<u32>,
    pub estimated_gender: Option<String>,
}

/// Editable face fields. Person links change only through assignment.
#[derive(Debug, Clone, Default)]
pub struct FacePatch {
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f64>,
    pub estimated_age: Option<u32>,
    pub estimated_gender: Option<String>,
}

/// A named identity owning a set of faces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub face_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
