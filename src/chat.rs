//! Conversational follow-up about one analysed image.

use crate::adapters::{ImageData, VisionAdapter};
use crate::analysis::ChatMessage;
use crate::store::{Image, ImagePatch, Store, StoreError, StoreResult};

/// Outcome of one chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub reply: ChatMessage,
    /// The adapter call failed and `reply` carries the error text.
    pub failed: bool,
    /// The reply changed the image's analysis.
    pub metadata_updated: bool,
    pub image: Image,
}

/// Send `message` about an image and record both sides of the exchange.
///
/// Adapter failures do not fail the call: they become an `Error: ...`
/// assistant reply in the history. Store failures are returned.
pub fn chat_about_image(
    store: &Store,
    adapter: &dyn VisionAdapter,
    model: &str,
    image_id: &str,
    message: &str,
) -> StoreResult<ChatTurn> {
    let image = store
        .image(image_id)?
        .ok_or_else(|| StoreError::not_found("image", image_id))?;
    let mut result = image
        .result
        .clone()
        .ok_or_else(|| StoreError::MissingResult(image_id.to_string()))?;

    let prior = image.chat_history.clone();
    let mut history = prior.clone();
    history.push(ChatMessage::user(message));

    let response = ImageData::from_data_url(&image.thumbnail)
        .and_then(|data| adapter.chat(&data, &result, message, &prior, model));

    let (reply, failed, patch) = match response {
        Ok(response) => (
            ChatMessage::assistant(response.message),
            false,
            response.updated_metadata.filter(|patch| !patch.is_empty()),
        ),
        Err(e) => {
            tracing::error!(image = %image_id, adapter = adapter.name(), error = %e, "Chat failed");
            (ChatMessage::assistant(format!("Error: {}", e)), true, None)
        }
    };
    history.push(reply.clone());

    let metadata_updated = patch.is_some();
    if let Some(patch) = patch {
        tracing::info!(image = %image_id, "Chat updated image metadata");
        result.merge(patch);
    }

    let image = store.update_image(
        image_id,
        ImagePatch {
            chat_history: Some(history),
            result: metadata_updated.then_some(result),
            ..Default::default()
        },
    )?;

    Ok(ChatTurn {
        reply,
        failed,
        metadata_updated,
        image,
    })
}
