use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::analysis::AnalysisResult;
use crate::store::{Image, Store};

pub const EXPORT_VERSION: &str = "1.0";

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "JSON",
            ExportFormat::Csv => "CSV",
        }
    }

    /// Pick a format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportFormat::Csv,
            _ => ExportFormat::Json,
        }
    }
}

/// Envelope of a JSON export.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData<'a> {
    pub version: &'static str,
    pub exported_at: DateTime<Utc>,
    pub count: usize,
    pub results: Vec<&'a AnalysisResult>,
}

impl<'a> ExportData<'a> {
    pub fn new(results: Vec<&'a AnalysisResult>) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: Utc::now(),
            count: results.len(),
            results,
        }
    }
}

/// `metalens-export-YYYY-MM-DD.json`
pub fn default_export_filename(date: NaiveDate) -> String {
    format!("metalens-export-{}.json", date.format("%Y-%m-%d"))
}

/// Export the analysed images of the library (or only `image_ids`, when
/// given) to `output_path`. Images without a result are skipped.
pub fn export_library(
    store: &Store,
    image_ids: Option<&[String]>,
    output_path: &Path,
    format: ExportFormat,
) -> Result<usize> {
    let images: Vec<Image> = store
        .images()?
        .into_iter()
        .filter(|img| img.result.is_some())
        .filter(|img| image_ids.map_or(true, |ids| ids.contains(&img.id)))
        .collect();

    match format {
        ExportFormat::Json => export_json(&images, output_path)?,
        ExportFormat::Csv => export_csv(&images, output_path)?,
    }

    tracing::info!(count = images.len(), path = %output_path.display(), format = format.name(), "Exported results");
    Ok(images.len())
}

fn export_json(images: &[Image], output_path: &Path) -> Result<()> {
    let data = ExportData::new(images.iter().filter_map(|img| img.result.as_ref()).collect());
    let json = serde_json::to_string_pretty(&data)?;
    let mut file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn export_csv(images: &[Image], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    wtr.write_record([
        "id",
        "filename",
        "title",
        "description",
        "tags",
        "objects",
        "colors",
        "mood",
        "scene",
        "added_at",
    ])?;

    for image in images {
        let Some(result) = image.result.as_ref() else {
            continue;
        };
        let objects: Vec<String> = result
            .objects
            .iter()
            .map(|o| format!("{} ({:.2})", o.name, o.confidence))
            .collect();
        let colors: Vec<&str> = result.colors.iter().map(|c| c.hex.as_str()).collect();

        wtr.write_record([
            image.id.as_str(),
            image.filename.as_str(),
            result.suggested_title.as_str(),
            result.description.as_str(),
            &result.tags.join("; "),
            &objects.join("; "),
            &colors.join("; "),
            result.mood.as_str(),
            result.scene.as_str(),
            &image.added_at.to_rfc3339(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::normalize::normalize_analysis;
    use tempfile::tempdir;

    fn store_with_images() -> Store {
        let store = Store::open_in_memory(5 * 1024 * 1024).unwrap();
        store
            .add_image(Image::new(
                "peak.jpg",
                "data:image/jpeg;base64,AA==".to_string(),
                Some(normalize_analysis(
                    r##"{"tags":["nature","landscape"],"objects":[{"name":"mountain","confidence":0.95}],"colors":[{"hex":"#007ACC","name":"Blue","percentage":40}],"mood":"serene","scene":"outdoor daylight","description":"A mountain","suggestedTitle":"Mountain Serenity"}"##,
                )),
            ))
            .unwrap();
        store
            .add_image(Image::new("pending.jpg", "data:image/jpeg;base64,AA==".to_string(), None))
            .unwrap();
        store
    }

    #[test]
    fn test_default_filename() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(default_export_filename(date), "metalens-export-2024-03-09.json");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("out.CSV")), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_path(Path::new("out.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("out")), ExportFormat::Json);
    }

    #[test]
    fn test_json_export_envelope() {
        let store = store_with_images();
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.json");

        let count = export_library(&store, None, &path, ExportFormat::Json).unwrap();
        assert_eq!(count, 1);

        let data: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data["version"], "1.0");
        assert_eq!(data["count"], 1);
        assert!(data["exportedAt"].as_str().unwrap().parse::<DateTime<Utc>>().is_ok());
        assert_eq!(data["results"][0]["tags"][0], "nature");
        assert_eq!(data["results"][0]["suggestedTitle"], "Mountain Serenity");
    }

    #[test]
    fn test_empty_export() {
        let store = Store::open_in_memory(5 * 1024 * 1024).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.json");

        assert_eq!(export_library(&store, None, &path, ExportFormat::Json).unwrap(), 0);
        let data: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data["count"], 0);
        assert_eq!(data["results"], serde_json::json!([]));
    }

    #[test]
    fn test_csv_export_rows() {
        let store = store_with_images();
        let dir = tempdir().unwrap();
        let path = dir.path().join("export.csv");

        export_library(&store, None, &path, ExportFormat::Csv).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "peak.jpg");
        assert_eq!(&rows[0][4], "nature; landscape");
        assert_eq!(&rows[0][5], "mountain (0.95)");
        assert_eq!(&rows[0][6], "#007ACC");
    }

    #[test]
    fn test_export_selected_ids() {
        let store = store_with_images();
        let dir = tempdir().unwrap();
        let path = dir.path().join("none.json");

        let ids = vec!["img_other".to_string()];
        assert_eq!(
            export_library(&store, Some(&ids), &path, ExportFormat::Json).unwrap(),
            0
        );
    }
}
