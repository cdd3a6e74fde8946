use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Whether `path` has one of `extensions` (case-insensitive, no dot).
pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.iter().any(|e| e.to_lowercase() == ext))
}

/// Expand command-line inputs into image files.
///
/// Files are kept in the order given, whatever their extension. Directories
/// are walked recursively and their matches appended sorted by path.
pub fn discover_images(inputs: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();

    for input in inputs {
        if input.is_file() {
            images.push(input.clone());
        } else if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| has_image_extension(p, extensions))
                .collect();
            found.sort();
            tracing::debug!(dir = %input.display(), count = found.len(), "Discovered images");
            images.extend(found);
        } else {
            bail!("No such file or directory: {}", input.display());
        }
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    fn extensions() -> Vec<String> {
        vec!["jpg".to_string(), "jpeg".to_string(), "png".to_string()]
    }

    #[test]
    fn test_discover_images_in_directory() {
        let dir = tempdir().unwrap();

        File::create(dir.path().join("photo2.png")).unwrap();
        File::create(dir.path().join("photo1.JPG")).unwrap();
        File::create(dir.path().join("document.txt")).unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        File::create(dir.path().join("subdir/photo3.jpeg")).unwrap();

        let images = discover_images(&[dir.path().to_path_buf()], &extensions()).unwrap();
        assert_eq!(images.len(), 3);
        assert!(images.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_explicit_files_keep_order() {
        let dir = tempdir().unwrap();
        let b = dir.path().join("b.png");
        let a = dir.path().join("a.webp");
        File::create(&b).unwrap();
        File::create(&a).unwrap();

        let images = discover_images(&[b.clone(), a.clone()], &extensions()).unwrap();
        assert_eq!(images, vec![b, a]);
    }

    #[test]
    fn test_missing_input_is_error() {
        let dir = tempdir().unwrap();
        assert!(discover_images(&[dir.path().join("nope")], &extensions()).is_err());
    }
}
