// src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    Pixels(u32),
    Percent(u32),
}

impl Dimension {
    pub fn pixels(&self) -> Option<u32> {
        match self {
            Dimension::Pixels(px) if *px > 0 => Some(*px),
            _ => None,
        }
    }

    pub fn is_percent(&self) -> bool {
        matches!(self, Dimension::Percent(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// The whole matched text: optional anchor wrapper, whitespace and the image tag.
    pub matched: String,
    /// The preceding anchor tag and whitespace, if the image was linked.
    pub anchor: Option<String>,
    pub img_tag: String,
    /// `src` with any query string removed.
    pub src: String,
    pub src_query: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Effective declared width; a `style` declaration wins over the attribute.
    pub width: Option<Dimension>,
    pub height: Option<Dimension>,
}

impl ImageReference {
    pub fn has_link(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }

    pub fn uses_percentage(&self) -> bool {
        self.width.is_some_and(|d| d.is_percent()) || self.height.is_some_and(|d| d.is_percent())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifiedLocation {
    Local,
    Remote,
    Unknown,
}

impl fmt::Display for ClassifiedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClassifiedLocation::Local => "local",
            ClassifiedLocation::Remote => "remote",
            ClassifiedLocation::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Public,
    Private,
    Temporary,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Public => "public",
            Scheme::Private => "private",
            Scheme::Temporary => "temporary",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "public" => Some(Scheme::Public),
            "private" => Some(Scheme::Private),
            "temporary" => Some(Scheme::Temporary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageUri {
    pub scheme: Scheme,
    /// Path relative to the scheme root, `/`-separated, already percent-decoded.
    pub target: String,
}

impl StorageUri {
    pub fn new(scheme: Scheme, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            scheme,
            target: target.trim_start_matches('/').to_string(),
        }
    }

    pub fn parse(uri: &str) -> Option<Self> {
        let (scheme, target) = uri.split_once("://")?;
        Some(Self::new(Scheme::parse(scheme)?, target))
    }

    pub fn dirname(&self) -> &str {
        self.target.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }

    pub fn filename(&self) -> &str {
        self.target
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.target)
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.filename();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Stored(StorageUri),
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regeneration {
    pub original: StorageUri,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub location: ClassifiedLocation,
    pub locator: SourceLocator,
    pub regenerate: Option<Regeneration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedImage {
    pub actual_width: u32,
    pub actual_height: u32,
    pub mime: String,
    pub extension: String,
    pub target_width: u32,
    pub target_height: u32,
    pub resize_needed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    PolicyGated,
    PercentageSized,
    TrackingPixel,
    RateLimited,
    UnresolvableSource,
    FetchFailed,
    UnreadableOrUnsupportedFormat,
    GenerationFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipEvent {
    pub src: String,
    pub reason: SkipReason,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub text: String,
    pub skips: Vec<SkipEvent>,
    pub warnings: Vec<String>,
    pub generated: usize,
    pub cache_hits: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_uri_parts() {
        let uri = StorageUri::parse("public://photos/2024/pic.png").unwrap();
        assert_eq!(uri.scheme, Scheme::Public);
        assert_eq!(uri.dirname(), "photos/2024");
        assert_eq!(uri.filename(), "pic.png");
        assert_eq!(uri.extension(), Some("png"));
        assert_eq!(uri.to_string(), "public://photos/2024/pic.png");

        let root = StorageUri::new(Scheme::Private, "/pic");
        assert_eq!(root.dirname(), "");
        assert_eq!(root.extension(), None);
        assert!(StorageUri::parse("ftp://x").is_none());
    }

    #[test]
    fn test_zero_dimension_is_absent() {
        assert_eq!(Dimension::Pixels(0).pixels(), None);
        assert_eq!(Dimension::Pixels(40).pixels(), Some(40));
        assert_eq!(Dimension::Percent(50).pixels(), None);
    }
}
