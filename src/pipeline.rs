// src/pipeline.rs
use futures_util::{StreamExt, stream};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::classifier::LocationClassifier;
use crate::config::FilterConfig;
use crate::errors::FilterError;
use crate::generator::{CacheStatus, DerivativeGenerator};
use crate::inspector::DimensionInspector;
use crate::models::{
    ClassifiedLocation, FilterOutcome, ImageReference, InspectedImage, SkipEvent, SkipReason,
    SourceLocator, StorageUri,
};
use crate::namer::{DerivativeKey, DerivativeSource, RESIZE_NAMESPACE};
use crate::resolver::SourceResolver;
use crate::rewriter::{self, Rewrite};
use crate::scanner::MarkupScanner;
use crate::services::flood::REMOTE_FETCH;
use crate::services::{
    FetchedSource, FloodControl, FloodStore, HttpClient, ImageProcessor, MemoryFloodStore,
    RedisFloodStore, RemoteFetcher, ReqwestClient,
};
use crate::storage::LocalStorage;

/// Staging files younger than this may still belong to a running build.
const STALE_STAGING_AGE: Duration = Duration::from_secs(3600);

enum Disposition {
    Replace(String),
    Unchanged,
    Skipped(SkipReason, String),
    RateLimited { action: String, message: String },
}

#[derive(Default)]
struct Counters {
    generated: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl Counters {
    fn record(&self, status: CacheStatus) {
        match status {
            CacheStatus::Generated => self.generated.fetch_add(1, Ordering::Relaxed),
            CacheStatus::Hit => self.cache_hits.fetch_add(1, Ordering::Relaxed),
        };
    }
}

pub struct FilterPipeline {
    config: FilterConfig,
    classifier: LocationClassifier,
    resolver: SourceResolver,
    fetcher: RemoteFetcher,
    inspector: DimensionInspector,
    generator: DerivativeGenerator,
    storage: LocalStorage,
    flood: FloodControl,
}

impl FilterPipeline {
    pub fn new(config: FilterConfig, flood: FloodControl, client: Box<dyn HttpClient>) -> Self {
        let storage = LocalStorage::new(&config);
        let processor = ImageProcessor::new();
        Self {
            classifier: LocationClassifier::new(&config),
            resolver: SourceResolver::new(&config, storage.clone()),
            fetcher: RemoteFetcher::new(client, flood.clone(), storage.clone()),
            inspector: DimensionInspector::new(processor),
            generator: DerivativeGenerator::new(storage.clone(), processor, flood.clone()),
            storage,
            flood,
            config,
        }
    }

    pub async fn from_config(config: FilterConfig) -> Result<Self, FilterError> {
        config.validate()?;
        let store: Arc<dyn FloodStore> = match &config.redis_url {
            Some(url) => {
                log::info!("Using Redis flood store at {}", url);
                Arc::new(RedisFloodStore::new(url).await?)
            }
            None => Arc::new(MemoryFloodStore::new()),
        };
        let flood = FloodControl::new(store, config.rate_limit_threshold, config.rate_window());
        let client = ReqwestClient::new(config.fetch_timeout())?;

        for root in [&config.public_root, &config.private_root] {
            let resize_root = root.join(RESIZE_NAMESPACE);
            match DerivativeGenerator::sweep_staging(&resize_root, STALE_STAGING_AGE) {
                Ok(0) => {}
                Ok(n) => log::info!("Swept {} stale staging files in {}", n, resize_root.display()),
                Err(e) => log::warn!("Failed to sweep {}: {}", resize_root.display(), e),
            }
        }

        Ok(Self::new(config, flood, Box::new(client)))
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filters one document. Always returns a document; references that could not be
    /// handled keep their original markup and show up in `skips`.
    pub async fn process(&self, text: &str) -> FilterOutcome {
        let mut seen = HashSet::new();
        let references: Vec<ImageReference> = MarkupScanner::new(text)
            .references()
            .filter(|r| seen.insert(r.matched.clone()))
            .collect();

        let counters = Counters::default();
        let mut results: Vec<(usize, Disposition)> = stream::iter(references.iter().enumerate())
            .map(|(index, reference)| {
                let counters = &counters;
                async move {
                    let disposition = match self.process_reference(reference, counters).await {
                        Ok(disposition) => disposition,
                        Err(FilterError::RateLimited { action, .. }) => Disposition::RateLimited {
                            message: format!("rate limit reached for {}", action),
                            action,
                        },
                        Err(e) => Disposition::Skipped(e.skip_reason(), e.to_string()),
                    };
                    (index, disposition)
                }
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let mut replacements = HashMap::new();
        let mut skips = Vec::new();
        let mut limited = BTreeSet::new();
        for (index, disposition) in results {
            let reference = &references[index];
            let (reason, message) = match disposition {
                Disposition::Replace(replacement) => {
                    replacements.insert(reference.matched.clone(), replacement);
                    continue;
                }
                Disposition::Unchanged => continue,
                Disposition::Skipped(reason, message) => (reason, message),
                Disposition::RateLimited { action, message } => {
                    limited.insert(action);
                    (SkipReason::RateLimited, message)
                }
            };
            log::debug!("Skipped {}: {}", reference.src, message);
            skips.push(SkipEvent {
                src: reference.src.clone(),
                reason,
                message,
                occurred_at: chrono::Utc::now(),
            });
        }

        let warnings = limited
            .iter()
            .map(|action| self.rate_limit_warning(action))
            .collect();

        FilterOutcome {
            text: rewriter::apply(text, &replacements),
            skips,
            warnings,
            generated: counters.generated.load(Ordering::Relaxed),
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
        }
    }

    fn rate_limit_warning(&self, action: &str) -> String {
        let threshold = self.flood.threshold();
        let minutes = self.config.rate_limit_window_secs.div_ceil(60);
        if action == REMOTE_FETCH {
            format!(
                "Image resize threshold of {} remote images has been reached. Please use fewer remote images.",
                threshold
            )
        } else {
            format!(
                "Image resize threshold of {} per {} minute(s) reached. Some images have not been resized. Save the content again to resize the remaining images.",
                threshold, minutes
            )
        }
    }

    async fn process_reference(
        &self,
        reference: &ImageReference,
        counters: &Counters,
    ) -> Result<Disposition, FilterError> {
        let location = self.classifier.classify(&reference.src);
        if !self.config.allows(location) {
            return Err(FilterError::PolicyGated(format!(
                "{} images are not processed",
                location
            )));
        }
        if reference.uses_percentage() {
            return Ok(Disposition::Skipped(
                SkipReason::PercentageSized,
                "percentage-sized images are left untouched".to_string(),
            ));
        }

        // Remote servers may key the resource on its query string.
        let resolved = match location {
            ClassifiedLocation::Remote => self.resolver.resolve(&original_src(reference), location)?,
            _ => self.resolver.resolve(&reference.src, location)?,
        };

        // Holding `fetched` until the end of this function keeps the temporary copy
        // alive for every later stage and removes it on every way out.
        let (path, stored, fetched): (PathBuf, Option<StorageUri>, Option<FetchedSource>) =
            match resolved.locator {
                SourceLocator::Stored(uri) => {
                    if let Some(regen) = &resolved.regenerate {
                        let original = self.storage.realpath(&regen.original)?;
                        if !original.is_file() {
                            return Err(FilterError::UnreadableOrUnsupportedFormat(format!(
                                "{} is missing",
                                regen.original
                            )));
                        }
                        let status = self
                            .generator
                            .ensure(&uri, &original, Some((regen.width, regen.height)))
                            .await?;
                        counters.record(status);
                    }
                    (self.storage.realpath(&uri)?, Some(uri), None)
                }
                SourceLocator::Remote(url) => {
                    let fetched = self.fetcher.fetch(&url).await?;
                    (fetched.file.path().to_path_buf(), None, Some(fetched))
                }
            };

        let inspected = self.inspect(path.clone(), reference, location).await?;

        let source = match (&stored, &fetched) {
            (Some(uri), _) => {
                if !inspected.resize_needed {
                    return Ok(self.complete_attributes(reference, &inspected));
                }
                DerivativeSource::Stored(uri)
            }
            (None, Some(fetched)) => DerivativeSource::Remote {
                digest: &fetched.digest,
            },
            (None, None) => {
                return Err(FilterError::UnresolvableSource(reference.src.clone()));
            }
        };

        let destination = DerivativeKey {
            source,
            width: inspected.target_width,
            height: inspected.target_height,
            extension: &inspected.extension,
        }
        .destination();

        let resize = inspected
            .resize_needed
            .then_some((inspected.target_width, inspected.target_height));
        let status = self.generator.ensure(&destination, &path, resize).await?;
        counters.record(status);

        let src = self.public_src(reference, &destination)?;
        let link_href = (self.config.link.enabled && inspected.resize_needed)
            .then(|| original_src(reference));
        let rewrite = Rewrite {
            reference,
            src,
            width: inspected.target_width,
            height: inspected.target_height,
            link_href,
        };
        Ok(Disposition::Replace(rewrite.render(&self.config.link)))
    }

    async fn inspect(
        &self,
        path: PathBuf,
        reference: &ImageReference,
        location: ClassifiedLocation,
    ) -> Result<InspectedImage, FilterError> {
        let inspector = self.inspector;
        let src = reference.src.clone();
        let (width, height) = (reference.width, reference.height);
        tokio::task::spawn_blocking(move || inspector.inspect(&path, &src, location, width, height))
            .await
            .map_err(|e| {
                FilterError::UnreadableOrUnsupportedFormat(format!("inspect task failed: {}", e))
            })?
    }

    /// A local image already at its display size keeps its `src`; it only gains explicit
    /// `width` and `height` attributes when they are missing or disagree.
    fn complete_attributes(
        &self,
        reference: &ImageReference,
        inspected: &InspectedImage,
    ) -> Disposition {
        let declared = |name: &str| {
            reference
                .attribute(name)
                .and_then(|v| v.trim().parse::<u32>().ok())
        };
        if declared("width") == Some(inspected.target_width)
            && declared("height") == Some(inspected.target_height)
        {
            return Disposition::Unchanged;
        }
        let rewrite = Rewrite {
            reference,
            src: original_src(reference),
            width: inspected.target_width,
            height: inspected.target_height,
            link_href: None,
        };
        Disposition::Replace(rewrite.render(&self.config.link))
    }

    fn public_src(
        &self,
        reference: &ImageReference,
        destination: &StorageUri,
    ) -> Result<String, FilterError> {
        let url = self.storage.external_url(destination).ok_or_else(|| {
            FilterError::UnresolvableSource(format!("{} is not publicly served", destination))
        })?;
        match self.classifier.split_own_origin(&reference.src) {
            Some((origin, _)) => Ok(format!("{}{}", origin, url)),
            None => Ok(url),
        }
    }
}

fn original_src(reference: &ImageReference) -> String {
    match &reference.src_query {
        Some(query) => format!("{}?{}", reference.src, query),
        None => reference.src.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::RgbImage;
    use tempfile::TempDir;

    struct NoNetwork;

    #[async_trait]
    impl HttpClient for NoNetwork {
        async fn get(&self, url: &str) -> Result<(u16, Bytes), FilterError> {
            Err(FilterError::FetchFailed(format!("no network for {}", url)))
        }
    }

    fn pipeline(dir: &TempDir, config: FilterConfig) -> FilterPipeline {
        let config = FilterConfig {
            public_root: dir.path().join("public"),
            private_root: dir.path().join("private"),
            temporary_root: dir.path().join("tmp"),
            ..config
        };
        let flood = FloodControl::in_memory(
            config.rate_limit_threshold,
            Duration::from_secs(config.rate_limit_window_secs),
        );
        FilterPipeline::new(config, flood, Box::new(NoNetwork))
    }

    fn put_image(dir: &TempDir, relative: &str, width: u32, height: u32) {
        let path = dir.path().join("public").join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        RgbImage::new(width, height).save(path).unwrap();
    }

    #[tokio::test]
    async fn test_adds_missing_dimensions() {
        let dir = TempDir::new().unwrap();
        put_image(&dir, "pic.png", 200, 100);
        let p = pipeline(&dir, FilterConfig::default());
        let out = p.process(r#"<img src="/files/pic.png" alt="x">"#).await;
        assert_eq!(
            out.text,
            r#"<img src="/files/pic.png" alt="x" width="200" height="100">"#
        );
        assert_eq!(out.generated, 0);
    }

    #[tokio::test]
    async fn test_policy_gate_skips_remote_by_default() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, FilterConfig::default());
        let text = r#"<img src="https://cdn.test/a.png" width="5">"#;
        let out = p.process(text).await;
        assert_eq!(out.text, text);
        assert_eq!(out.skips.len(), 1);
        assert_eq!(out.skips[0].reason, SkipReason::PolicyGated);
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_link_to_source() {
        let dir = TempDir::new().unwrap();
        put_image(&dir, "pic.png", 200, 100);
        let config = FilterConfig {
            link: crate::config::LinkSettings {
                enabled: true,
                class: None,
                rel: Some("lightbox".to_string()),
            },
            ..FilterConfig::default()
        };
        let p = pipeline(&dir, config);
        let out = p.process(r#"<img src="/files/pic.png" width="100">"#).await;
        assert_eq!(
            out.text,
            r#"<a href="/files/pic.png" rel="lightbox"><img src="/files/resize/pic-100x50.png" width="100" height="50"></a>"#
        );
    }

    #[tokio::test]
    async fn test_absolute_own_host_src_stays_absolute() {
        let dir = TempDir::new().unwrap();
        put_image(&dir, "pic.png", 200, 100);
        let config = FilterConfig {
            base_url: "http://example.com".to_string(),
            ..FilterConfig::default()
        };
        let p = pipeline(&dir, config);
        let out = p
            .process(r#"<img src="http://example.com/files/pic.png" height="10">"#)
            .await;
        assert_eq!(
            out.text,
            r#"<img src="http://example.com/files/resize/pic-20x10.png" height="10" width="20">"#
        );
    }

    #[tokio::test]
    async fn test_https_own_host_src_keeps_its_scheme() {
        let dir = TempDir::new().unwrap();
        put_image(&dir, "pic.png", 200, 100);
        let config = FilterConfig {
            base_url: "http://example.com".to_string(),
            ..FilterConfig::default()
        };
        let p = pipeline(&dir, config);
        let out = p
            .process(r#"<img src="https://example.com/files/pic.png" width="50">"#)
            .await;
        assert_eq!(
            out.text,
            r#"<img src="https://example.com/files/resize/pic-50x25.png" width="50" height="25">"#
        );
    }

    #[tokio::test]
    async fn test_missing_derivative_self_heals() {
        let dir = TempDir::new().unwrap();
        put_image(&dir, "photos/pic.png", 200, 100);
        let p = pipeline(&dir, FilterConfig::default());
        let text = r#"<img src="/files/resize/photos/pic-50x25.png" width="50" height="25">"#;
        let out = p.process(text).await;
        assert_eq!(out.text, text);
        assert_eq!(out.generated, 1);
        assert!(dir.path().join("public/resize/photos/pic-50x25.png").is_file());
    }

    #[tokio::test]
    async fn test_unsupported_and_missing_sources_skip() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, FilterConfig::default());
        let text = r#"<img src="/files/nothing.png" width="5"><img src="/themes/x.png" width="5">"#;
        let out = p.process(text).await;
        assert_eq!(out.text, text);
        let reasons: Vec<_> = out.skips.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::UnreadableOrUnsupportedFormat,
                SkipReason::UnresolvableSource
            ]
        );
    }

    #[tokio::test]
    async fn test_generation_rate_limit_warns_once() {
        let dir = TempDir::new().unwrap();
        put_image(&dir, "pic.png", 200, 100);
        let config = FilterConfig {
            rate_limit_threshold: 1,
            ..FilterConfig::default()
        };
        let p = pipeline(&dir, config);
        let out = p
            .process(
                r#"<img src="/files/pic.png" width="10"><img src="/files/pic.png" width="20"><img src="/files/pic.png" width="30">"#,
            )
            .await;
        assert_eq!(out.generated, 1);
        let limited = out
            .skips
            .iter()
            .filter(|s| s.reason == SkipReason::RateLimited)
            .count();
        assert_eq!(limited, 2);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("Some images have not been resized"));
    }
}
