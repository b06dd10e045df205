// src/generator.rs
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::FilterError;
use crate::models::StorageUri;
use crate::services::flood::{DERIVATIVE_GENERATE, FloodControl};
use crate::services::ImageProcessor;
use crate::storage::LocalStorage;

static STAGING_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.[0-9a-f]{32}\.").expect("staging name pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Generated,
}

pub struct DerivativeGenerator {
    storage: LocalStorage,
    processor: ImageProcessor,
    flood: FloodControl,
}

impl DerivativeGenerator {
    pub fn new(storage: LocalStorage, processor: ImageProcessor, flood: FloodControl) -> Self {
        Self {
            storage,
            processor,
            flood,
        }
    }

    /// Removes staging files older than `max_age` left below `root` by builds that never
    /// finished. Returns how many were removed.
    pub fn sweep_staging(root: &Path, max_age: Duration) -> Result<usize, FilterError> {
        if !root.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                removed += Self::sweep_staging(&path, max_age)?;
                continue;
            }
            let name = entry.file_name();
            if !file_type.is_file() || !STAGING_NAME.is_match(&name.to_string_lossy()) {
                continue;
            }
            let age = entry
                .metadata()?
                .modified()?
                .elapsed()
                .unwrap_or_default();
            if age >= max_age {
                fs::remove_file(&path)?;
                log::info!("Removed stale staging file {}", path.display());
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn ensure(
        &self,
        destination: &StorageUri,
        source: &Path,
        resize: Option<(u32, u32)>,
    ) -> Result<CacheStatus, FilterError> {
        if self.storage.exists(destination) {
            log::debug!("Derivative cache hit: {}", destination);
            return Ok(CacheStatus::Hit);
        }

        self.flood.admit(DERIVATIVE_GENERATE).await?;

        let storage = self.storage.clone();
        let processor = self.processor;
        let destination_uri = destination.clone();
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || {
            publish(&storage, processor, &destination_uri, &source, resize)
        })
        .await
        .map_err(|e| FilterError::GenerationFailed(format!("generation task failed: {}", e)))??;

        log::info!("Generated derivative {}", destination);
        Ok(CacheStatus::Generated)
    }
}

fn publish(
    storage: &LocalStorage,
    processor: ImageProcessor,
    destination: &StorageUri,
    source: &Path,
    resize: Option<(u32, u32)>,
) -> Result<(), FilterError> {
    let final_path = storage.prepare_directory(destination)?;
    let staging = staging_path(&final_path);

    let result = build(storage, processor, source, &staging, resize).and_then(|()| {
        match fs::rename(&staging, &final_path) {
            Ok(()) => Ok(()),
            // A concurrent build already published the same derivative.
            Err(_) if final_path.is_file() => Ok(()),
            Err(e) => Err(e.into()),
        }
    });
    if staging.exists() {
        let _ = fs::remove_file(&staging);
    }
    result
}

fn build(
    storage: &LocalStorage,
    processor: ImageProcessor,
    source: &Path,
    staging: &Path,
    resize: Option<(u32, u32)>,
) -> Result<(), FilterError> {
    storage.copy(source, staging)?;
    if let Some((width, height)) = resize {
        if let Err(e) = processor.resize_and_save(staging, width, height) {
            log::warn!(
                "Resize of {} to {}x{} failed, keeping the original bytes: {}",
                source.display(),
                width,
                height,
                e
            );
            storage.copy(source, staging)?;
        }
    }
    storage.set_permissions(staging)
}

/// Hidden sibling of `path` that keeps its extension, so the encoder still knows the
/// output format.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", Uuid::new_v4().simple(), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use image::RgbImage;
    use std::time::Duration;
    use tempfile::TempDir;

    fn generator(dir: &TempDir, threshold: u32) -> (DerivativeGenerator, LocalStorage) {
        let storage = LocalStorage::new(&FilterConfig {
            public_root: dir.path().join("public"),
            ..FilterConfig::default()
        });
        let flood = FloodControl::in_memory(threshold, Duration::from_secs(120));
        (
            DerivativeGenerator::new(storage.clone(), ImageProcessor::new(), flood),
            storage,
        )
    }

    fn source_image(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("src.png");
        RgbImage::new(200, 100).save(&path).unwrap();
        path
    }

    fn visible_entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_generate_then_hit() {
        let dir = TempDir::new().unwrap();
        let (generator, storage) = generator(&dir, 10);
        let source = source_image(&dir);
        let dest = StorageUri::parse("public://resize/src-50x25.png").unwrap();

        let first = generator.ensure(&dest, &source, Some((50, 25))).await.unwrap();
        assert_eq!(first, CacheStatus::Generated);
        let info = ImageProcessor::new()
            .inspect(&storage.realpath(&dest).unwrap())
            .unwrap();
        assert_eq!((info.width, info.height), (50, 25));

        let second = generator.ensure(&dest, &source, Some((50, 25))).await.unwrap();
        assert_eq!(second, CacheStatus::Hit);
        assert_eq!(
            visible_entries(&dir.path().join("public/resize")),
            vec!["src-50x25.png".to_string()]
        );
    }

    #[tokio::test]
    async fn test_plain_copy_without_resize() {
        let dir = TempDir::new().unwrap();
        let (generator, storage) = generator(&dir, 10);
        let source = source_image(&dir);
        let dest = StorageUri::parse("public://resize/remote/abc-200x100.png").unwrap();
        generator.ensure(&dest, &source, None).await.unwrap();
        assert_eq!(storage.read(&dest).unwrap(), fs::read(&source).unwrap());
    }

    #[tokio::test]
    async fn test_resize_failure_falls_back_to_copy() {
        let dir = TempDir::new().unwrap();
        let (generator, storage) = generator(&dir, 10);
        let source = dir.path().join("broken.png");
        fs::write(&source, b"not really a png").unwrap();
        let dest = StorageUri::parse("public://resize/broken-10x10.png").unwrap();
        let status = generator.ensure(&dest, &source, Some((10, 10))).await.unwrap();
        assert_eq!(status, CacheStatus::Generated);
        assert_eq!(storage.read(&dest).unwrap(), b"not really a png");
    }

    #[tokio::test]
    async fn test_rate_limit_applies_only_to_misses() {
        let dir = TempDir::new().unwrap();
        let (generator, _) = generator(&dir, 1);
        let source = source_image(&dir);
        let a = StorageUri::parse("public://resize/src-10x5.png").unwrap();
        let b = StorageUri::parse("public://resize/src-20x10.png").unwrap();
        generator.ensure(&a, &source, Some((10, 5))).await.unwrap();
        assert_eq!(
            generator.ensure(&a, &source, Some((10, 5))).await.unwrap(),
            CacheStatus::Hit
        );
        assert!(matches!(
            generator.ensure(&b, &source, Some((20, 10))).await,
            Err(FilterError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_source_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let (generator, _) = generator(&dir, 10);
        let dest = StorageUri::parse("public://resize/gone-10x10.png").unwrap();
        let result = generator
            .ensure(&dest, &dir.path().join("gone.png"), Some((10, 10)))
            .await;
        assert!(matches!(result, Err(FilterError::Io(_))));
        assert!(visible_entries(&dir.path().join("public/resize")).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_builds_publish_one_file() {
        let dir = TempDir::new().unwrap();
        let (generator, storage) = generator(&dir, 10);
        let source = source_image(&dir);
        let dest = StorageUri::parse("public://resize/src-50x25.png").unwrap();

        let results = futures_util::future::join_all(
            (0..6).map(|_| generator.ensure(&dest, &source, Some((50, 25)))),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(
            visible_entries(&dir.path().join("public/resize")),
            vec!["src-50x25.png".to_string()]
        );
        let info = ImageProcessor::new()
            .inspect(&storage.realpath(&dest).unwrap())
            .unwrap();
        assert_eq!((info.width, info.height), (50, 25));
    }

    #[test]
    fn test_sweep_removes_only_staging_files() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("resize/photos");
        fs::create_dir_all(&nested).unwrap();
        let stale = nested.join(format!(".{}.pic-10x5.png", Uuid::new_v4().simple()));
        fs::write(&stale, b"partial").unwrap();
        fs::write(nested.join("pic-10x5.png"), b"done").unwrap();
        fs::write(nested.join(".keep"), b"").unwrap();

        let removed =
            DerivativeGenerator::sweep_staging(&dir.path().join("resize"), Duration::ZERO).unwrap();

        assert_eq!(removed, 1);
        assert!(!stale.exists());
        let mut left = visible_entries(&nested);
        left.sort();
        assert_eq!(left, vec![".keep".to_string(), "pic-10x5.png".to_string()]);
    }

    #[test]
    fn test_sweep_keeps_fresh_staging_files() {
        let dir = TempDir::new().unwrap();
        let fresh = dir
            .path()
            .join(format!(".{}.pic-10x5.png", Uuid::new_v4().simple()));
        fs::write(&fresh, b"in progress").unwrap();
        let removed =
            DerivativeGenerator::sweep_staging(dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(fresh.exists());
        assert_eq!(
            DerivativeGenerator::sweep_staging(&dir.path().join("absent"), Duration::ZERO)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_staging_path_keeps_extension() {
        let staged = staging_path(Path::new("/x/resize/pic-1x1.jpg"));
        assert_eq!(staged.parent(), Some(Path::new("/x/resize")));
        assert_eq!(staged.extension().unwrap(), "jpg");
        assert!(staged.file_name().unwrap().to_string_lossy().starts_with('.'));
    }
}
