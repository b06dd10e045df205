// src/config.rs
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::FilterError;
use crate::models::ClassifiedLocation;

pub const CONFIG_FILE_ENV: &str = "REFIT_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub enabled: bool,
    pub class: Option<String>,
    pub rel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub image_locations: Vec<ClassifiedLocation>,
    pub rate_limit_threshold: u32,
    pub rate_limit_window_secs: u64,
    /// Deployment origin, e.g. `https://example.com`.
    pub base_url: String,
    /// Path the site is served under, always starting and ending with `/`.
    pub base_path: String,
    pub public_path: String,
    pub private_path: String,
    pub public_root: PathBuf,
    pub private_root: PathBuf,
    pub temporary_root: PathBuf,
    pub fetch_timeout_secs: u64,
    pub max_concurrency: usize,
    pub link: LinkSettings,
    pub redis_url: Option<String>,
    pub bind_address: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            image_locations: vec![ClassifiedLocation::Local],
            rate_limit_threshold: 10,
            rate_limit_window_secs: 120,
            base_url: "http://localhost".to_string(),
            base_path: "/".to_string(),
            public_path: "files".to_string(),
            private_path: "system/files".to_string(),
            public_root: PathBuf::from("files"),
            private_root: PathBuf::from("private"),
            temporary_root: std::env::temp_dir(),
            fetch_timeout_secs: 30,
            max_concurrency: 4,
            link: LinkSettings::default(),
            redis_url: None,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl FilterConfig {
    pub fn from_env() -> Result<Self, FilterError> {
        let config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => {
                let mut config = Self::default();
                config.apply_env()?;
                config
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, FilterError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FilterError::Config(format!("Cannot read {}: {}", path, e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, FilterError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| FilterError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), FilterError> {
        if let Some(raw) = env_value::<String>("REFIT_IMAGE_LOCATIONS")? {
            self.image_locations = parse_locations(&raw)?;
        }
        if let Some(v) = env_value("REFIT_RATE_LIMIT_THRESHOLD")? {
            self.rate_limit_threshold = v;
        }
        if let Some(v) = env_value("REFIT_RATE_LIMIT_WINDOW_SECS")? {
            self.rate_limit_window_secs = v;
        }
        if let Some(v) = env_value("REFIT_BASE_URL")? {
            self.base_url = v;
        }
        if let Some(v) = env_value("REFIT_BASE_PATH")? {
            self.base_path = v;
        }
        if let Some(v) = env_value("REFIT_PUBLIC_PATH")? {
            self.public_path = v;
        }
        if let Some(v) = env_value("REFIT_PRIVATE_PATH")? {
            self.private_path = v;
        }
        if let Some(v) = env_value("REFIT_PUBLIC_ROOT")? {
            self.public_root = v;
        }
        if let Some(v) = env_value("REFIT_PRIVATE_ROOT")? {
            self.private_root = v;
        }
        if let Some(v) = env_value("REFIT_TEMPORARY_ROOT")? {
            self.temporary_root = v;
        }
        if let Some(v) = env_value("REFIT_FETCH_TIMEOUT_SECS")? {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = env_value("REFIT_MAX_CONCURRENCY")? {
            self.max_concurrency = v;
        }
        if let Some(v) = env_value("REFIT_LINK")? {
            self.link.enabled = v;
        }
        self.link.class = env_value("REFIT_LINK_CLASS")?.or(self.link.class.take());
        self.link.rel = env_value("REFIT_LINK_REL")?.or(self.link.rel.take());
        self.redis_url = env_value("REFIT_REDIS_URL")?.or(self.redis_url.take());
        if let Some(v) = env_value("REFIT_BIND_ADDRESS")? {
            self.bind_address = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.rate_limit_threshold == 0 {
            return Err(FilterError::Config(
                "rate_limit_threshold must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_window_secs == 0 {
            return Err(FilterError::Config(
                "rate_limit_window_secs must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(FilterError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if !self.base_path.starts_with('/') || !self.base_path.ends_with('/') {
            return Err(FilterError::Config(format!(
                "base_path must start and end with '/': {}",
                self.base_path
            )));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| FilterError::Config(format!("Invalid base_url {}: {}", self.base_url, e)))?;
        Ok(())
    }

    pub fn host(&self) -> String {
        match reqwest::Url::parse(&self.base_url) {
            Ok(url) => match (url.host_str(), url.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                _ => String::new(),
            },
            Err(_) => String::new(),
        }
    }

    pub fn allows(&self, location: ClassifiedLocation) -> bool {
        self.image_locations.contains(&location)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn public_url_prefix(&self) -> String {
        format!("{}{}/", self.base_path, self.public_path.trim_matches('/'))
    }

    pub fn private_url_prefix(&self) -> String {
        format!("{}{}/", self.base_path, self.private_path.trim_matches('/'))
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, FilterError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| FilterError::Config(format!("{}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

fn parse_locations(raw: &str) -> Result<Vec<ClassifiedLocation>, FilterError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ClassifiedLocation::Local),
            "remote" => Ok(ClassifiedLocation::Remote),
            other => Err(FilterError::Config(format!(
                "Unknown image location: {}",
                other
            ))),
        })
        .collect()
}
