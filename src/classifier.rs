// src/classifier.rs
use crate::config::FilterConfig;
use crate::models::ClassifiedLocation;

/// Labels a `src` as local, remote or unknown relative to this deployment.
pub struct LocationClassifier {
    base_path: String,
    host: String,
}

impl LocationClassifier {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            base_path: config.base_path.clone(),
            host: config.host(),
        }
    }

    pub fn classify(&self, src: &str) -> ClassifiedLocation {
        if src.starts_with(&self.base_path) {
            return ClassifiedLocation::Local;
        }
        if self.strip_own_origin(src).is_some() {
            return ClassifiedLocation::Local;
        }
        if src.starts_with("http://") || src.starts_with("https://") {
            return ClassifiedLocation::Remote;
        }
        ClassifiedLocation::Unknown
    }

    /// Splits an absolute URL on this deployment's own host into the `scheme://host` it
    /// was written with and the path below the base path.
    pub fn split_own_origin<'s>(&self, src: &'s str) -> Option<(&'s str, &'s str)> {
        if self.host.is_empty() {
            return None;
        }
        let rest = src
            .strip_prefix("http://")
            .or_else(|| src.strip_prefix("https://"))?;
        let path = rest.strip_prefix(self.host.as_str())?;
        let origin = &src[..src.len() - path.len()];
        let below = path.strip_prefix(self.base_path.as_str())?;
        Some((origin, below))
    }

    pub fn strip_own_origin<'s>(&self, src: &'s str) -> Option<&'s str> {
        self.split_own_origin(src).map(|(_, below)| below)
    }

    /// Strips an optional own origin and the base path from a local `src`.
    pub fn site_relative<'s>(&self, src: &'s str) -> Option<&'s str> {
        self.strip_own_origin(src)
            .or_else(|| src.strip_prefix(self.base_path.as_str()))
    }
}
