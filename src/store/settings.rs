//! Configuration store: credentials, backend selection and queue flags,
//! persisted next to the entity collections.

use std::collections::BTreeMap;

use super::schema::{
    ADAPTER_KEY, API_KEYS_KEY, AUTO_PROCESS_KEY, FACE_DETECTION_KEY, LOCAL_URL_KEY, MODEL_KEY,
};
use super::{Store, StoreResult};

pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434";

impl Store {
    /// Stored credentials keyed by adapter key.
    pub fn api_keys(&self) -> StoreResult<BTreeMap<String, String>> {
        let Some(raw) = self.read_value(API_KEYS_KEY)? else {
            return Ok(BTreeMap::new());
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Discarding undecodable credential map");
            BTreeMap::new()
        }))
    }

    pub fn api_key(&self, adapter: &str) -> StoreResult<Option<String>> {
        Ok(self.api_keys()?.remove(adapter))
    }

    /// Store a credential. A blank key removes it.
    pub fn set_api_key(&self, adapter: &str, key: &str) -> StoreResult<()> {
        let mut keys = self.api_keys()?;
        let key = key.trim();
        if key.is_empty() {
            keys.remove(adapter);
        } else {
            keys.insert(adapter.to_string(), key.to_string());
        }
        self.commit(vec![(API_KEYS_KEY, Some(serde_json::to_string(&keys)?))])
    }

    pub fn remove_api_key(&self, adapter: &str) -> StoreResult<()> {
        self.set_api_key(adapter, "")
    }

    pub fn local_endpoint(&self) -> StoreResult<String> {
        Ok(self
            .read_value(LOCAL_URL_KEY)?
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOCAL_URL.to_string()))
    }

    pub fn set_local_endpoint(&self, url: &str) -> StoreResult<()> {
        let url = url.trim().trim_end_matches('/');
        self.commit(vec![(LOCAL_URL_KEY, Some(url.to_string()))])
    }

    pub fn selected_adapter(&self) -> StoreResult<Option<String>> {
        self.read_value(ADAPTER_KEY)
    }

    pub fn set_selected_adapter(&self, adapter: &str) -> StoreResult<()> {
        self.commit(vec![(ADAPTER_KEY, Some(adapter.to_string()))])
    }

    pub fn selected_model(&self) -> StoreResult<Option<String>> {
        Ok(self.read_value(MODEL_KEY)?.filter(|m| !m.is_empty()))
    }

    pub fn set_selected_model(&self, model: Option<&str>) -> StoreResult<()> {
        self.commit(vec![(MODEL_KEY, model.map(str::to_string))])
    }

    /// Whether new submissions are processed right away. Off unless set.
    pub fn auto_process(&self) -> StoreResult<bool> {
        self.read_flag(AUTO_PROCESS_KEY)
    }

    pub fn set_auto_process(&self, enabled: bool) -> StoreResult<()> {
        self.write_flag(AUTO_PROCESS_KEY, enabled)
    }

    /// Store `enabled` as the auto-process flag unless one is already set.
    pub fn seed_auto_process(&self, enabled: bool) -> StoreResult<bool> {
        if self.read_value(AUTO_PROCESS_KEY)?.is_some() {
            return Ok(false);
        }
        self.write_flag(AUTO_PROCESS_KEY, enabled)?;
        Ok(true)
    }

    pub fn face_detection_enabled(&self) -> StoreResult<bool> {
        self.read_flag(FACE_DETECTION_KEY)
    }

    pub fn set_face_detection_enabled(&self, enabled: bool) -> StoreResult<()> {
        self.write_flag(FACE_DETECTION_KEY, enabled)
    }

    fn read_flag(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read_value(key)?.as_deref() == Some("true"))
    }

    fn write_flag(&self, key: &'static str, enabled: bool) -> StoreResult<()> {
        self.commit(vec![(key, Some(enabled.to_string()))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = Store::open_in_memory(1024).unwrap();
        assert_eq!(store.local_endpoint().unwrap(), DEFAULT_LOCAL_URL);
        assert!(!store.auto_process().unwrap());
        assert!(!store.face_detection_enabled().unwrap());
        assert!(store.selected_adapter().unwrap().is_none());
        assert!(store.api_keys().unwrap().is_empty());
    }

    #[test]
    fn test_api_keys_roundtrip_and_blank_removes() {
        let store = Store::open_in_memory(1024).unwrap();
        store.set_api_key("openai", " sk-test ").unwrap();
        assert_eq!(store.api_key("openai").unwrap().as_deref(), Some("sk-test"));

        store.set_api_key("openai", "  ").unwrap();
        assert!(store.api_key("openai").unwrap().is_none());
    }

    #[test]
    fn test_seed_auto_process_keeps_existing_choice() {
        let store = Store::open_in_memory(1024).unwrap();
        assert!(store.seed_auto_process(true).unwrap());
        assert!(store.auto_process().unwrap());

        store.set_auto_process(false).unwrap();
        assert!(!store.seed_auto_process(true).unwrap());
        assert!(!store.auto_process().unwrap());
    }

    #[test]
    fn test_flags_and_endpoint() {
        let store = Store::open_in_memory(1024).unwrap();
        store.set_auto_process(true).unwrap();
        assert!(store.auto_process().unwrap());
        store.set_auto_process(false).unwrap();
        assert!(!store.auto_process().unwrap());

        store.set_local_endpoint("http://gpu-box:11434/").unwrap();
        assert_eq!(store.local_endpoint().unwrap(), "http://gpu-box:11434");

        store.set_selected_model(Some("llava")).unwrap();
        assert_eq!(store.selected_model().unwrap().as_deref(), Some("llava"));
        store.set_selected_model(None).unwrap();
        assert!(store.selected_model().unwrap().is_none());
    }
}
