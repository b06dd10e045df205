// src/services/image_processor.rs
use crate::errors::FilterError;
use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use image::{DynamicImage, ImageFormat};
use std::path::Path;

/// Largest width or height a derivative may be resized to.
const MAX_TARGET_DIMENSION: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn inspect(&self, path: &Path) -> Result<ImageInfo, FilterError> {
        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| {
                FilterError::UnreadableOrUnsupportedFormat(format!("{}: {}", path.display(), e))
            })?;

        let mime = reader.format().and_then(mime_for).map(str::to_string);
        let (width, height) = reader.into_dimensions().map_err(|e| {
            FilterError::UnreadableOrUnsupportedFormat(format!("{}: {}", path.display(), e))
        })?;

        if width == 0 || height == 0 {
            return Err(FilterError::UnreadableOrUnsupportedFormat(format!(
                "{} has no pixels",
                path.display()
            )));
        }

        Ok(ImageInfo {
            width,
            height,
            mime,
        })
    }

    pub fn resize_and_save(&self, path: &Path, width: u32, height: u32) -> Result<(), FilterError> {
        if width == 0 || height == 0 {
            return Err(FilterError::GenerationFailed(format!(
                "Invalid target size {}x{}",
                width, height
            )));
        }
        if width > MAX_TARGET_DIMENSION || height > MAX_TARGET_DIMENSION {
            return Err(FilterError::GenerationFailed(format!(
                "Target dimensions exceed {0}x{0}",
                MAX_TARGET_DIMENSION
            )));
        }

        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| FilterError::GenerationFailed(format!("Failed to open image: {}", e)))?;
        let detected = reader.format();
        let img = reader
            .decode()
            .map_err(|e| FilterError::GenerationFailed(format!("Failed to load image: {}", e)))?;

        let format = ImageFormat::from_path(path)
            .ok()
            .or(detected)
            .ok_or_else(|| FilterError::GenerationFailed("Unknown output format".to_string()))?;

        let resized = img.resize_exact(width, height, FilterType::Lanczos3);
        let resized = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
            ImageFormat::Gif => DynamicImage::ImageRgba8(resized.to_rgba8()),
            _ => resized,
        };

        resized.save_with_format(path, format).map_err(|e| {
            FilterError::GenerationFailed(format!("Failed to encode resized image: {}", e))
        })?;

        Ok(())
    }
}

pub fn mime_for(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Bmp => Some("image/bmp"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::Ico => Some("image/x-icon"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn write_image(dir: &TempDir, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_inspect_png() {
        let dir = TempDir::new().unwrap();
        let path = write_image(&dir, "a.png", 200, 100);
        let info = ImageProcessor::new().inspect(&path).unwrap();
        assert_eq!(info.width, 200);
        assert_eq!(info.height, 100);
        assert_eq!(info.mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_inspect_detects_content_without_extension() {
        let dir = TempDir::new().unwrap();
        let path = write_image(&dir, "a.jpg", 30, 20);
        let renamed = dir.path().join("download");
        std::fs::rename(&path, &renamed).unwrap();
        let info = ImageProcessor::new().inspect(&renamed).unwrap();
        assert_eq!((info.width, info.height), (30, 20));
        assert_eq!(info.mime.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.png");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(matches!(
            ImageProcessor::new().inspect(&path),
            Err(FilterError::UnreadableOrUnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_resize_and_save_exact() {
        let dir = TempDir::new().unwrap();
        for name in ["r.png", "r.jpg", "r.gif"] {
            let path = write_image(&dir, name, 200, 100);
            let processor = ImageProcessor::new();
            processor.resize_and_save(&path, 50, 25).unwrap();
            let info = processor.inspect(&path).unwrap();
            assert_eq!((info.width, info.height), (50, 25), "{}", name);
        }
    }

    #[test]
    fn test_resize_rejects_oversized_target() {
        let dir = TempDir::new().unwrap();
        let path = write_image(&dir, "big.png", 10, 10);
        let result = ImageProcessor::new().resize_and_save(&path, 10_000, 10);
        assert!(matches!(result, Err(FilterError::GenerationFailed(_))));
    }
}
