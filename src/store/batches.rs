//! Batches of library images.
//!
//! A batch's `image_ids` list may drift from reality; the authoritative
//! membership is each image's `batch_id`.

use chrono::Utc;

use super::models::{new_id, Batch, Image};
use super::schema::{BATCHES_KEY, IMAGES_KEY};
use super::{Store, StoreError, StoreResult};

impl Store {
    pub fn batches(&self) -> StoreResult<Vec<Batch>> {
        self.load(BATCHES_KEY)
    }

    pub fn batch(&self, id: &str) -> StoreResult<Option<Batch>> {
        Ok(self.batches()?.into_iter().find(|b| b.id == id))
    }

    /// Create a batch and point every listed image that exists at it.
    /// Unknown ids are kept in the batch list and otherwise ignored.
    pub fn create_batch(&self, name: &str, image_ids: &[String]) -> StoreResult<Batch> {
        let batch = Batch {
            id: new_id("batch"),
            name: name.to_string(),
            image_ids: image_ids.to_vec(),
            created_at: Utc::now(),
            expanded: true,
        };

        let mut batches = self.batches()?;
        batches.push(batch.clone());

        let mut images = self.images()?;
        for image in images.iter_mut().filter(|img| image_ids.contains(&img.id)) {
            image.batch_id = Some(batch.id.clone());
        }

        self.commit(vec![
            (BATCHES_KEY, Some(Self::encode(&batches)?)),
            (IMAGES_KEY, Some(Self::encode(&images)?)),
        ])?;
        Ok(batch)
    }

    pub fn rename_batch(&self, id: &str, name: &str) -> StoreResult<Batch> {
        self.modify_batch(id, |batch| batch.name = name.to_string())
    }

    pub fn toggle_batch_expanded(&self, id: &str) -> StoreResult<Batch> {
        self.modify_batch(id, |batch| batch.expanded = !batch.expanded)
    }

    /// Delete a batch and clear the batch reference on every image that
    /// currently points to it. Images are never deleted. Returns whether the
    /// batch record existed.
    pub fn delete_batch(&self, id: &str) -> StoreResult<bool> {
        let mut batches = self.batches()?;
        let before = batches.len();
        batches.retain(|b| b.id != id);
        let existed = batches.len() != before;

        let mut images = self.images()?;
        for image in images.iter_mut() {
            if image.batch_id.as_deref() == Some(id) {
                image.batch_id = None;
            }
        }

        self.commit(vec![
            (BATCHES_KEY, Some(Self::encode(&batches)?)),
            (IMAGES_KEY, Some(Self::encode(&images)?)),
        ])?;
        Ok(existed)
    }

    /// Images whose live batch reference is `id`, in library order.
    pub fn batch_members(&self, id: &str) -> StoreResult<Vec<Image>> {
        Ok(self
            .images()?
            .into_iter()
            .filter(|img| img.batch_id.as_deref() == Some(id))
            .collect())
    }

    /// Images that belong to no batch.
    pub fn unbatched_images(&self) -> StoreResult<Vec<Image>> {
        Ok(self
            .images()?
            .into_iter()
            .filter(|img| img.batch_id.is_none())
            .collect())
    }

    /// Remove every batch and every image's batch reference.
    pub fn clear_batches(&self) -> StoreResult<()> {
        let mut images = self.images()?;
        for image in images.iter_mut() {
            image.batch_id = None;
        }
        self.commit(vec![
            (BATCHES_KEY, None),
            (IMAGES_KEY, Some(Self::encode(&images)?)),
        ])
    }

    fn modify_batch<F>(&self, id: &str, f: F) -> StoreResult<Batch>
    where
        F: FnOnce(&mut Batch),
    {
        let mut batches = self.batches()?;
        let batch = batches
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| StoreError::not_found("batch", id))?;
        f(batch);
        let updated = batch.clone();
        self.save(BATCHES_KEY, &batches)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_images(count: usize) -> (Store, Vec<String>) {
        let store = Store::open_in_memory(10 * 1024 * 1024).unwrap();
        let mut ids = Vec::new();
        for i in 0..count {
            let image = Image::new(&format!("img{}.jpg", i), "data:".to_string(), None);
            ids.push(image.id.clone());
            store.add_image(image).unwrap();
        }
        (store, ids)
    }

    #[test]
    fn test_create_batch_ignores_missing_ids() {
        let (store, ids) = store_with_images(2);
        let requested = vec![ids[0].clone(), "img-missing".to_string()];

        let batch = store.create_batch("trip", &requested).unwrap();

        assert_eq!(batch.image_ids, requested);
        let first = store.image(&ids[0]).unwrap().unwrap();
        assert_eq!(first.batch_id.as_deref(), Some(batch.id.as_str()));
        let second = store.image(&ids[1]).unwrap().unwrap();
        assert!(second.batch_id.is_none());
        assert_eq!(store.batch_members(&batch.id).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_batch_uses_live_membership() {
        let (store, ids) = store_with_images(3);
        let batch = store.create_batch("trip", &ids[..1]).unwrap();

        // Point a second image at the batch without going through the list
        let mut images = store.images().unwrap();
        images[2].batch_id = Some(batch.id.clone());
        store.save(IMAGES_KEY, &images).unwrap();

        assert!(store.delete_batch(&batch.id).unwrap());

        let images = store.images().unwrap();
        assert_eq!(images.len(), 3);
        assert!(images.iter().all(|img| img.batch_id.as_deref() != Some(batch.id.as_str())));
        assert!(store.batch(&batch.id).unwrap().is_none());
    }

    #[test]
    fn test_moving_image_to_new_batch() {
        let (store, ids) = store_with_images(1);
        let first = store.create_batch("first", &ids).unwrap();
        let second = store.create_batch("second", &ids).unwrap();

        assert!(store.batch_members(&first.id).unwrap().is_empty());
        assert_eq!(store.batch_members(&second.id).unwrap().len(), 1);

        // Deleting the stale batch leaves the image in the newer one
        store.delete_batch(&first.id).unwrap();
        let image = store.image(&ids[0]).unwrap().unwrap();
        assert_eq!(image.batch_id.as_deref(), Some(second.id.as_str()));
    }

    #[test]
    fn test_rename_and_toggle() {
        let (store, ids) = store_with_images(1);
        let batch = store.create_batch("trip", &ids).unwrap();
        assert!(batch.expanded);

        let renamed = store.rename_batch(&batch.id, "holiday").unwrap();
        assert_eq!(renamed.name, "holiday");
        let toggled = store.toggle_batch_expanded(&batch.id).unwrap();
        assert!(!toggled.expanded);

        assert!(matches!(
            store.rename_batch("nope", "x"),
            Err(StoreError::NotFound { kind: "batch", .. })
        ));
    }

    #[test]
    fn test_clear_batches() {
        let (store, ids) = store_with_images(2);
        store.create_batch("trip", &ids).unwrap();
        store.clear_batches().unwrap();
        assert!(store.batches().unwrap().is_empty());
        assert_eq!(store.unbatched_images().unwrap().len(), 2);
    }
}
