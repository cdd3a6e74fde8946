//! Offline backend producing plausible random metadata. Always configured.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

use super::{AdapterError, AdapterKind, ImageData, VisionAdapter};
use crate::analysis::{AnalysisResult, ColorSwatch, DetectedObject};

const TAG_SETS: [[&str; 5]; 5] = [
    ["nature", "landscape", "outdoor", "scenic", "mountains"],
    ["portrait", "person", "face", "human", "professional"],
    ["urban", "city", "architecture", "building", "street"],
    ["food", "cuisine", "delicious", "restaurant", "meal"],
    ["animal", "wildlife", "pet", "cute", "nature"],
];

const MOODS: [&str; 5] = ["serene", "vibrant", "mysterious", "joyful", "contemplative"];

const SCENES: [&str; 5] = [
    "outdoor daylight",
    "indoor studio",
    "sunset golden hour",
    "urban night",
    "natural forest",
];

const PALETTE: [(&str, &str, f64); 5] = [
    ("#8B5CF6", "Purple", 35.0),
    ("#3B82F6", "Blue", 25.0),
    ("#10B981", "Green", 20.0),
    ("#F59E0B", "Amber", 12.0),
    ("#EF4444", "Red", 8.0),
];

pub struct MockAdapter {
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl MockAdapter {
    /// `latency` is the average simulated request time; each call varies it
    /// by up to 20% either way.
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible output for tests and demos.
    pub fn seeded(latency: Duration, seed: u64) -> Self {
        Self {
            latency,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl VisionAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        AdapterKind::Mock.display_name()
    }

    fn models(&self) -> Vec<String> {
        AdapterKind::Mock
            .default_models()
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    fn analyze(&self, _image: &ImageData, _model: &str) -> Result<AnalysisResult, AdapterError> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.latency.is_zero() {
            let jitter = rng.gen_range(0.8..1.2);
            std::thread::sleep(self.latency.mul_f64(jitter));
        }

        let tags = TAG_SETS[rng.gen_range(0..TAG_SETS.len())];
        let mood = MOODS[rng.gen_range(0..MOODS.len())];
        let scene = SCENES[rng.gen_range(0..SCENES.len())];

        let mut palette = PALETTE.to_vec();
        palette.shuffle(&mut *rng);
        let colors = palette
            .into_iter()
            .take(4)
            .map(|(hex, name, pct)| ColorSwatch::new(hex, name, pct))
            .collect();

        let objects = vec![
            DetectedObject {
                name: tags[0].to_string(),
                confidence: 0.95 + rng.gen_range(0.0..0.05),
            },
            DetectedObject {
                name: tags[1].to_string(),
                confidence: 0.85 + rng.gen_range(0.0..0.1),
            },
            DetectedObject {
                name: tags[2].to_string(),
                confidence: 0.7 + rng.gen_range(0.0..0.15),
            },
        ];

        Ok(AnalysisResult {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            objects,
            colors,
            mood: mood.to_string(),
            scene: scene.to_string(),
            description: format!(
                "A {} {} scene featuring {}.",
                mood,
                scene,
                tags[..3].join(", ")
            ),
            suggested_title: format!("{} {}", capitalize(tags[0]), capitalize(mood)),
        })
    }

    fn is_configured(&self) -> bool {
        true
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
