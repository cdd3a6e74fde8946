//! Library images and the edits made to their analysis results.

use crate::analysis::{AnalysisPatch, AnalysisResult, ChatMessage};

use super::models::{Batch, FaceData, Image, ImagePatch, Person};
use super::schema::{BATCHES_KEY, FACES_KEY, IMAGES_KEY, PERSONS_KEY};
use super::{Store, StoreError, StoreResult};

impl Store {
    pub fn images(&self) -> StoreResult<Vec<Image>> {
        self.load(IMAGES_KEY)
    }

    pub fn image(&self, id: &str) -> StoreResult<Option<Image>> {
        Ok(self.images()?.into_iter().find(|img| img.id == id))
    }

    /// Append an image to the library. Images keep insertion order.
    pub fn add_image(&self, image: Image) -> StoreResult<()> {
        let mut images = self.images()?;
        images.push(image);
        self.save(IMAGES_KEY, &images)
    }

    pub fn update_image(&self, id: &str, patch: ImagePatch) -> StoreResult<Image> {
        self.modify_image(id, |img| {
            if let Some(filename) = patch.filename {
                img.filename = filename;
            }
            if let Some(result) = patch.result {
                img.result = Some(result);
            }
            if let Some(history) = patch.chat_history {
                img.chat_history = history;
            }
            Ok(())
        })
    }

    /// Attach (or replace) the analysis result of an image.
    pub fn attach_result(&self, id: &str, result: AnalysisResult) -> StoreResult<Image> {
        self.update_image(
            id,
            ImagePatch {
                result: Some(result),
                ..Default::default()
            },
        )
    }

    /// Merge a partial result into the stored one.
    pub fn merge_result(&self, id: &str, patch: AnalysisPatch) -> StoreResult<Image> {
        self.modify_image(id, |img| {
            let result = img
                .result
                .as_mut()
                .ok_or_else(|| StoreError::MissingResult(img.id.clone()))?;
            result.merge(patch);
            Ok(())
        })
    }

    pub fn add_tag(&self, id: &str, tag: &str) -> StoreResult<Image> {
        self.modify_image(id, |img| {
            let result = img
                .result
                .as_mut()
                .ok_or_else(|| StoreError::MissingResult(img.id.clone()))?;
            result.add_tag(tag);
            Ok(())
        })
    }

    pub fn remove_tag(&self, id: &str, tag: &str) -> StoreResult<Image> {
        self.modify_image(id, |img| {
            let result = img
                .result
                .as_mut()
                .ok_or_else(|| StoreError::MissingResult(img.id.clone()))?;
            result.remove_tag(tag);
            Ok(())
        })
    }

    pub fn set_chat_history(&self, id: &str, history: Vec<ChatMessage>) -> StoreResult<Image> {
        self.update_image(
            id,
            ImagePatch {
                chat_history: Some(history),
                ..Default::default()
            },
        )
    }

    /// Remove an image together with its faces. Faces are also dropped from
    /// their persons, and the id is dropped from batch lists.
    pub fn remove_image(&self, id: &str) -> StoreResult<bool> {
        let mut images = self.images()?;
        let before = images.len();
        images.retain(|img| img.id != id);
        if images.len() == before {
            return Ok(false);
        }

        let mut faces: Vec<FaceData> = self.load(FACES_KEY)?;
        let removed_faces: Vec<String> = faces
            .iter()
            .filter(|f| f.image_id == id)
            .map(|f| f.id.clone())
            .collect();
        faces.retain(|f| f.image_id != id);

        let mut persons: Vec<Person> = self.load(PERSONS_KEY)?;
        let now = chrono::Utc::now();
        for person in persons.iter_mut() {
            let count = person.face_ids.len();
            person.face_ids.retain(|fid| !removed_faces.contains(fid));
            if person.face_ids.len() != count {
                person.updated_at = now;
            }
        }

        let mut batches: Vec<Batch> = self.load(BATCHES_KEY)?;
        for batch in batches.iter_mut() {
            batch.image_ids.retain(|iid| iid != id);
        }

        self.commit(vec![
            (IMAGES_KEY, Some(Self::encode(&images)?)),
            (FACES_KEY, Some(Self::encode(&faces)?)),
            (PERSONS_KEY, Some(Self::encode(&persons)?)),
            (BATCHES_KEY, Some(Self::encode(&batches)?)),
        ])?;
        Ok(true)
    }

    /// Clear the library: images, batches and faces. Persons are kept with
    /// empty face sets.
    pub fn clear_images(&self) -> StoreResult<()> {
        let mut persons: Vec<Person> = self.load(PERSONS_KEY)?;
        let now = chrono::Utc::now();
        for person in persons.iter_mut().filter(|p| !p.face_ids.is_empty()) {
            person.face_ids.clear();
            person.updated_at = now;
        }

        self.commit(vec![
            (IMAGES_KEY, None),
            (BATCHES_KEY, None),
            (FACES_KEY, None),
            (PERSONS_KEY, Some(Self::encode(&persons)?)),
        ])
    }

    fn modify_image<F>(&self, id: &str, f: F) -> StoreResult<Image>
    where
        F: FnOnce(&mut Image) -> StoreResult<()>,
    {
        let mut images = self.images()?;
        let image = images
            .iter_mut()
            .find(|img| img.id == id)
            .ok_or_else(|| StoreError::not_found("image", id))?;
        f(image)?;
        let updated = image.clone();
        self.save(IMAGES_KEY, &images)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ColorSwatch;
    use crate::store::{BoundingBox, NewFace};

    fn store() -> Store {
        Store::open_in_memory(10 * 1024 * 1024).unwrap()
    }

    fn result_with_tags(tags: &[&str]) -> AnalysisResult {
        AnalysisResult {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            objects: Vec::new(),
            colors: vec![ColorSwatch::neutral_gray()],
            mood: "neutral".to_string(),
            scene: "unknown".to_string(),
            description: String::new(),
            suggested_title: "Untitled".to_string(),
        }
    }

    #[test]
    fn test_tag_edits_persist() {
        let store = store();
        let image = Image::new("a.jpg", "data:".to_string(), Some(result_with_tags(&["a", "b"])));
        let id = image.id.clone();
        store.add_image(image).unwrap();

        store.remove_tag(&id, "a").unwrap();
        let fresh = store.image(&id).unwrap().unwrap();
        assert_eq!(fresh.result.unwrap().tags, vec!["b"]);

        store.add_tag(&id, "c").unwrap();
        let fresh = store.image(&id).unwrap().unwrap();
        assert_eq!(fresh.result.unwrap().tags, vec!["b", "c"]);
    }

    #[test]
    fn test_tag_edit_without_result_fails() {
        let store = store();
        let image = Image::new("a.jpg", "data:".to_string(), None);
        let id = image.id.clone();
        store.add_image(image).unwrap();

        assert!(matches!(
            store.add_tag(&id, "x"),
            Err(StoreError::MissingResult(_))
        ));
        assert!(matches!(
            store.add_tag("missing", "x"),
            Err(StoreError::NotFound { kind: "image", .. })
        ));
    }

    #[test]
    fn test_merge_result_is_partial() {
        let store = store();
        let image = Image::new("a.jpg", "data:".to_string(), Some(result_with_tags(&["a"])));
        let id = image.id.clone();
        store.add_image(image).unwrap();

        store
            .merge_result(
                &id,
                AnalysisPatch {
                    suggested_title: Some("Harbour".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = store.image(&id).unwrap().unwrap().result.unwrap();
        assert_eq!(result.suggested_title, "Harbour");
        assert_eq!(result.tags, vec!["a"]);
    }

    #[test]
    fn test_remove_image_cascades_faces() {
        let store = store();
        let image = Image::new("a.jpg", "data:".to_string(), None);
        let id = image.id.clone();
        store.add_image(image).unwrap();

        let face = store
            .add_face(NewFace {
                image_id: id.clone(),
                bounding_box: BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
                confidence: 0.9,
                estimated_age: None,
                estimated_gender: None,
            })
            .unwrap();
        let person = store.create_person("Ada").unwrap();
        store.assign_face_to_person(&face.id, &person.id).unwrap();
        let batch = store.create_batch("trip", &[id.clone()]).unwrap();

        assert!(store.remove_image(&id).unwrap());
        assert!(store.faces().unwrap().is_empty());
        assert!(store.person(&person.id).unwrap().unwrap().face_ids.is_empty());
        assert!(store.batch(&batch.id).unwrap().unwrap().image_ids.is_empty());
        assert!(!store.remove_image(&id).unwrap());
    }

    #[test]
    fn test_clear_images_keeps_persons() {
        let store = store();
        let image = Image::new("a.jpg", "data:".to_string(), None);
        store.add_image(image).unwrap();
        store.create_person("Ada").unwrap();

        store.clear_images().unwrap();
        assert!(store.images().unwrap().is_empty());
        assert!(store.batches().unwrap().is_empty());
        assert_eq!(store.persons().unwrap().len(), 1);
    }
}
