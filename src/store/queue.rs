//! Persisted queue items. Only the queue engine mutates these.

use chrono::Utc;

use super::models::{Image, QueueItem, QueueStatus};
use super::schema::{IMAGES_KEY, QUEUE_KEY};
use super::{Store, StoreError, StoreResult};

impl Store {
    pub fn queue_items(&self) -> StoreResult<Vec<QueueItem>> {
        self.load(QUEUE_KEY)
    }

    pub fn queue_item(&self, id: &str) -> StoreResult<Option<QueueItem>> {
        Ok(self.queue_items()?.into_iter().find(|item| item.id == id))
    }

    pub(crate) fn push_queue_item(&self, item: QueueItem) -> StoreResult<()> {
        let mut items = self.queue_items()?;
        items.push(item);
        self.save(QUEUE_KEY, &items)
    }

    pub(crate) fn modify_queue_item<F>(&self, id: &str, f: F) -> StoreResult<QueueItem>
    where
        F: FnOnce(&mut QueueItem),
    {
        let mut items = self.queue_items()?;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| StoreError::not_found("queue item", id))?;
        f(item);
        let updated = item.clone();
        self.save(QUEUE_KEY, &items)?;
        Ok(updated)
    }

    /// Apply `f` to every item; `f` returns true when it changed the item.
    /// Returns how many changed.
    pub(crate) fn update_queue_items<F>(&self, mut f: F) -> StoreResult<usize>
    where
        F: FnMut(&mut QueueItem) -> bool,
    {
        let mut items = self.queue_items()?;
        let changed = items.iter_mut().map(|item| f(item)).filter(|c| *c).count();
        if changed > 0 {
            self.save(QUEUE_KEY, &items)?;
        }
        Ok(changed)
    }

    /// Mark an item complete and append its image in one write.
    pub(crate) fn complete_queue_item(&self, id: &str, image: Image) -> StoreResult<QueueItem> {
        let mut items = self.queue_items()?;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| StoreError::not_found("queue item", id))?;
        item.status = QueueStatus::Complete;
        item.error_message = None;
        item.completed_at = Some(Utc::now());
        let updated = item.clone();

        let mut images = self.images()?;
        images.push(image);

        self.commit(vec![
            (QUEUE_KEY, Some(Self::encode(&items)?)),
            (IMAGES_KEY, Some(Self::encode(&images)?)),
        ])?;
        Ok(updated)
    }

    /// Keep only the items matching `keep`. Returns how many were removed.
    pub(crate) fn retain_queue_items<F>(&self, keep: F) -> StoreResult<usize>
    where
        F: Fn(&QueueItem) -> bool,
    {
        let mut items = self.queue_items()?;
        let before = items.len();
        items.retain(|item| keep(item));
        let removed = before - items.len();
        if removed > 0 {
            self.save(QUEUE_KEY, &items)?;
        }
        Ok(removed)
    }

    pub(crate) fn clear_queue_items(&self) -> StoreResult<()> {
        self.commit(vec![(QUEUE_KEY, None)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_queue_item_writes_both_collections() {
        let store = Store::open_in_memory(1024 * 1024).unwrap();
        let item = QueueItem::new("a.jpg", "data:image/jpeg;base64,AA".to_string());
        store.push_queue_item(item.clone()).unwrap();

        let image = Image::new("a.jpg", item.thumbnail.clone(), None);
        let done = store.complete_queue_item(&item.id, image.clone()).unwrap();

        assert_eq!(done.status, QueueStatus::Complete);
        assert!(done.completed_at.is_some());
        assert_eq!(store.images().unwrap(), vec![image]);
    }

    #[test]
    fn test_complete_over_quota_changes_nothing() {
        let store = Store::open_in_memory(400).unwrap();
        let item = QueueItem::new("a.jpg", "t".to_string());
        store.push_queue_item(item.clone()).unwrap();

        let image = Image::new("a.jpg", "x".repeat(500), None);
        let err = store.complete_queue_item(&item.id, image).unwrap_err();

        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        assert!(store.images().unwrap().is_empty());
        assert_eq!(
            store.queue_item(&item.id).unwrap().unwrap().status,
            QueueStatus::Pending
        );
    }

    #[test]
    fn test_update_and_retain() {
        let store = Store::open_in_memory(1024 * 1024).unwrap();
        for name in ["a", "b", "c"] {
            store.push_queue_item(QueueItem::new(name, String::new())).unwrap();
        }

        let changed = store
            .update_queue_items(|item| {
                if item.filename == "b" {
                    item.status = QueueStatus::Error;
                    true
                } else {
                    false
                }
            })
            .unwrap();
        assert_eq!(changed, 1);

        let removed = store
            .retain_queue_items(|item| item.status != QueueStatus::Error)
            .unwrap();
        assert_eq!(removed, 1);
        let names: Vec<_> = store
            .queue_items()
            .unwrap()
            .into_iter()
            .map(|item| item.filename)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
