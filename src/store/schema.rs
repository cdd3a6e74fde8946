pub const SCHEMA: &str = r#"
-- Every collection and setting is one JSON value under a fixed key
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

// Entity collections
pub const IMAGES_KEY: &str = "metalens_images";
pub const BATCHES_KEY: &str = "metalens_batches";
pub const QUEUE_KEY: &str = "metalens_queue";
pub const FACES_KEY: &str = "metalens_faces";
pub const PERSONS_KEY: &str = "metalens_persons";

// Configuration store
pub const API_KEYS_KEY: &str = "metalens_api_keys";
pub const LOCAL_URL_KEY: &str = "metalens_ollama_url";
pub const ADAPTER_KEY: &str = "metalens_adapter";
pub const MODEL_KEY: &str = "metalens_model";
pub const AUTO_PROCESS_KEY: &str = "metalens_auto_process_queue";
pub const FACE_DETECTION_KEY: &str = "metalens_face_detection_enabled";
