use crate::analysis::AnalysisResult;

/// Prompt sent with every analysis request.
pub const ANALYSIS_PROMPT: &str = "Analyze this image and extract metadata. Return JSON:\n\
{\"tags\":[\"keyword1\",\"keyword2\"],\
\"objects\":[{\"name\":\"object\",\"confidence\":0.9}],\
\"colors\":[{\"hex\":\"#RRGGBB\",\"name\":\"color\",\"percentage\":30}],\
\"mood\":\"word\",\"scene\":\"type\",\"description\":\"1-2 sentence description\",\
\"suggestedTitle\":\"title\"}\n\n\
Return only valid JSON.";

const REPLY_FORMAT: &str = "Respond as JSON: {\"message\": \"your response\", \
\"updatedMetadata\": {...}} where updatedMetadata is optional and only present \
if the user asked for changes. updatedMetadata uses the same field names as the \
metadata (tags, objects, colors, mood, scene, description, suggestedTitle).";

/// System text for a chat turn: the image's current metadata plus the reply format.
pub fn chat_system_prompt(metadata: &AnalysisResult) -> String {
    let objects = metadata
        .objects
        .iter()
        .map(|o| o.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are analyzing an image. Current metadata:\n\
         - Title: {}\n\
         - Description: {}\n\
         - Tags: {}\n\
         - Objects: {}\n\
         - Mood: {}\n\
         - Scene: {}\n\n\
         If the user asks to modify metadata, include an \"updatedMetadata\" object in your JSON response.\n\n\
         {}",
        metadata.suggested_title,
        metadata.description,
        metadata.tags.join(", "),
        objects,
        metadata.mood,
        metadata.scene,
        REPLY_FORMAT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ColorSwatch, DetectedObject};

    #[test]
    fn test_chat_prompt_lists_metadata() {
        let metadata = AnalysisResult {
            tags: vec!["beach".to_string(), "sunset".to_string()],
            objects: vec![DetectedObject {
                name: "palm".to_string(),
                confidence: 0.8,
            }],
            colors: vec![ColorSwatch::neutral_gray()],
            mood: "calm".to_string(),
            scene: "coast".to_string(),
            description: "A beach.".to_string(),
            suggested_title: "Golden Hour".to_string(),
        };

        let prompt = chat_system_prompt(&metadata);
        assert!(prompt.contains("Title: Golden Hour"));
        assert!(prompt.contains("Tags: beach, sunset"));
        assert!(prompt.contains("Objects: palm"));
        assert!(prompt.contains("updatedMetadata"));
    }
}
