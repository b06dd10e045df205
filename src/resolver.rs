// src/resolver.rs
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::sync::LazyLock;

use crate::classifier::LocationClassifier;
use crate::config::FilterConfig;
use crate::errors::FilterError;
use crate::models::{
    ClassifiedLocation, Regeneration, ResolvedSource, Scheme, SourceLocator, StorageUri,
};
use crate::namer::{REMOTE_NAMESPACE, RESIZE_NAMESPACE};
use crate::storage::LocalStorage;

/// `<dir>/<stem>-<W>x<H>.<ext>` below the resize namespace.
static RESIZED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(.*)/)?([^/]+)-([0-9]+)x([0-9]+)\.([A-Za-z0-9]+)$")
        .expect("resized name pattern is valid")
});

/// `styles/<W>x<H>/<scheme>/<original path>`.
static STYLED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^styles/([0-9]+)x([0-9]+)/([a-z]+)/(.+)$").expect("styled path pattern is valid")
});

pub struct SourceResolver {
    classifier: LocationClassifier,
    public_prefix: String,
    private_prefix: String,
    storage: LocalStorage,
}

impl SourceResolver {
    pub fn new(config: &FilterConfig, storage: LocalStorage) -> Self {
        Self {
            classifier: LocationClassifier::new(config),
            public_prefix: format!("{}/", config.public_path.trim_matches('/')),
            private_prefix: format!("{}/", config.private_path.trim_matches('/')),
            storage,
        }
    }

    pub fn resolve(
        &self,
        src: &str,
        location: ClassifiedLocation,
    ) -> Result<ResolvedSource, FilterError> {
        match location {
            ClassifiedLocation::Remote => Ok(ResolvedSource {
                location,
                locator: SourceLocator::Remote(src.to_string()),
                regenerate: None,
            }),
            ClassifiedLocation::Local => self.resolve_local(src),
            ClassifiedLocation::Unknown => Err(FilterError::UnresolvableSource(format!(
                "{} is neither local nor remote",
                src
            ))),
        }
    }

    fn resolve_local(&self, src: &str) -> Result<ResolvedSource, FilterError> {
        let relative = self.classifier.site_relative(src).ok_or_else(|| {
            FilterError::UnresolvableSource(format!("{} is outside the base path", src))
        })?;

        let (scheme, target) = if let Some(rest) = relative.strip_prefix(&self.public_prefix) {
            (Scheme::Public, rest)
        } else if let Some(rest) = relative
            .strip_prefix("?q=")
            .unwrap_or(relative)
            .strip_prefix(&self.private_prefix)
        {
            (Scheme::Private, rest)
        } else {
            return Err(FilterError::UnresolvableSource(format!(
                "{} does not map to a storage scheme",
                src
            )));
        };

        let decoded = percent_decode_str(target).decode_utf8().map_err(|e| {
            FilterError::UnresolvableSource(format!("{} is not valid UTF-8: {}", src, e))
        })?;
        let uri = StorageUri::new(scheme, decoded.into_owned());
        // Rejects traversal before anything touches the disk.
        self.storage.realpath(&uri)?;

        let regenerate = if self.storage.exists(&uri) {
            None
        } else {
            derivative_origin(&uri)
        };
        if let Some(regen) = &regenerate {
            log::debug!(
                "{} is a missing derivative of {} at {}x{}",
                uri,
                regen.original,
                regen.width,
                regen.height
            );
        }

        Ok(ResolvedSource {
            location: ClassifiedLocation::Local,
            locator: SourceLocator::Stored(uri),
            regenerate,
        })
    }
}

pub fn derivative_origin(uri: &StorageUri) -> Option<Regeneration> {
    if let Some(resized) = uri.target.strip_prefix(&format!("{}/", RESIZE_NAMESPACE)) {
        if resized.starts_with(&format!("{}/", REMOTE_NAMESPACE)) {
            return None;
        }
        let caps = RESIZED_NAME.captures(resized)?;
        let dir = caps.get(1).map(|m| m.as_str());
        let name = format!("{}.{}", &caps[2], &caps[5]);
        let target = match dir {
            Some(dir) => format!("{}/{}", dir, name),
            None => name,
        };
        return Some(Regeneration {
            original: StorageUri::new(uri.scheme, target),
            width: caps[3].parse().ok()?,
            height: caps[4].parse().ok()?,
        });
    }

    let caps = STYLED_PATH.captures(&uri.target)?;
    let scheme = Scheme::parse(&caps[3])?;
    Some(Regeneration {
        original: StorageUri::new(scheme, &caps[4]),
        width: caps[1].parse().ok()?,
        height: caps[2].parse().ok()?,
    })
}
