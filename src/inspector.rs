// src/inspector.rs
use std::path::Path;

use crate::errors::FilterError;
use crate::models::{ClassifiedLocation, Dimension, InspectedImage};
use crate::services::ImageProcessor;

const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Debug, Clone, Copy)]
pub struct DimensionInspector {
    processor: ImageProcessor,
}

impl DimensionInspector {
    pub fn new(processor: ImageProcessor) -> Self {
        Self { processor }
    }

    pub fn inspect(
        &self,
        path: &Path,
        src: &str,
        location: ClassifiedLocation,
        width: Option<Dimension>,
        height: Option<Dimension>,
    ) -> Result<InspectedImage, FilterError> {
        let info = self.processor.inspect(path)?;
        if location == ClassifiedLocation::Remote && info.width == 1 && info.height == 1 {
            return Err(FilterError::TrackingPixel(format!(
                "1x1 remote image {} left alone",
                src
            )));
        }
        let extension = resolve_extension(src, info.mime.as_deref())?;

        let percentage =
            width.is_some_and(|d| d.is_percent()) || height.is_some_and(|d| d.is_percent());
        let (target_width, target_height) = if percentage {
            (info.width, info.height)
        } else {
            target_size(
                width.and_then(|d| d.pixels()),
                height.and_then(|d| d.pixels()),
                info.width,
                info.height,
            )
        };

        Ok(InspectedImage {
            actual_width: info.width,
            actual_height: info.height,
            mime: info.mime.unwrap_or_default(),
            extension,
            target_width,
            target_height,
            resize_needed: !percentage
                && (target_width != info.width || target_height != info.height),
        })
    }
}

/// Fills in a missing declared dimension by keeping the actual aspect ratio. With
/// neither declared, the actual size is the target.
pub fn target_size(
    width: Option<u32>,
    height: Option<u32>,
    actual_width: u32,
    actual_height: u32,
) -> (u32, u32) {
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => (w, scale(w, actual_height, actual_width)),
        (None, Some(h)) => (scale(h, actual_width, actual_height), h),
        (None, None) => (actual_width, actual_height),
    }
}

fn scale(declared: u32, actual_other: u32, actual_same: u32) -> u32 {
    let scaled = (declared as f64 * actual_other as f64 / actual_same as f64).round() as u32;
    scaled.max(1)
}

pub fn resolve_extension(src: &str, mime: Option<&str>) -> Result<String, FilterError> {
    let filename = src.rsplit('/').next().unwrap_or(src);
    let from_name = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    let extension = match from_name {
        Some(ext) => Some(ext),
        None => match mime {
            Some("image/png") => Some("png".to_string()),
            Some("image/gif") => Some("gif".to_string()),
            Some("image/jpeg") | Some("image/pjpeg") => Some("jpg".to_string()),
            _ => None,
        },
    };

    match extension {
        Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => Ok(ext),
        Some(ext) => Err(FilterError::UnreadableOrUnsupportedFormat(format!(
            "unsupported format {} for {}",
            ext, src
        ))),
        None => Err(FilterError::UnreadableOrUnsupportedFormat(format!(
            "cannot determine the format of {}",
            src
        ))),
    }
}
