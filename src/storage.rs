// src/storage.rs
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::fs;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::config::FilterConfig;
use crate::errors::FilterError;
use crate::models::{Scheme, StorageUri};

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[cfg(unix)]
const FILE_MODE: u32 = 0o664;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    public_root: PathBuf,
    private_root: PathBuf,
    temporary_root: PathBuf,
    public_url: String,
    private_url: String,
}

impl LocalStorage {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            public_root: config.public_root.clone(),
            private_root: config.private_root.clone(),
            temporary_root: config.temporary_root.clone(),
            public_url: config.public_url_prefix(),
            private_url: config.private_url_prefix(),
        }
    }

    fn root(&self, scheme: Scheme) -> &Path {
        match scheme {
            Scheme::Public => &self.public_root,
            Scheme::Private => &self.private_root,
            Scheme::Temporary => &self.temporary_root,
        }
    }

    /// Maps a URI onto the file system. Targets that would escape the scheme root are
    /// rejected.
    pub fn realpath(&self, uri: &StorageUri) -> Result<PathBuf, FilterError> {
        let relative = Path::new(&uri.target);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(FilterError::UnresolvableSource(format!(
                "{} escapes its storage root",
                uri
            )));
        }
        Ok(self.root(uri.scheme).join(relative))
    }

    pub fn exists(&self, uri: &StorageUri) -> bool {
        self.realpath(uri).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn prepare_directory(&self, uri: &StorageUri) -> Result<PathBuf, FilterError> {
        let path = self.realpath(uri)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    pub fn read(&self, uri: &StorageUri) -> Result<Vec<u8>, FilterError> {
        Ok(fs::read(self.realpath(uri)?)?)
    }

    pub fn write(&self, uri: &StorageUri, bytes: &[u8]) -> Result<PathBuf, FilterError> {
        let path = self.prepare_directory(uri)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn copy(&self, from: &Path, to: &Path) -> Result<(), FilterError> {
        fs::copy(from, to)?;
        Ok(())
    }

    pub fn delete(&self, uri: &StorageUri) -> Result<(), FilterError> {
        match fs::remove_file(self.realpath(uri)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(unix)]
    pub fn set_permissions(&self, path: &Path) -> Result<(), FilterError> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn set_permissions(&self, _path: &Path) -> Result<(), FilterError> {
        Ok(())
    }

    pub fn temporary_uri(&self, prefix: &str) -> StorageUri {
        StorageUri::new(Scheme::Temporary, format!("{}{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn external_url(&self, uri: &StorageUri) -> Option<String> {
        let prefix = match uri.scheme {
            Scheme::Public => &self.public_url,
            Scheme::Private => &self.private_url,
            Scheme::Temporary => return None,
        };
        let encoded: Vec<String> = uri
            .target
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect();
        Some(format!("{}{}", prefix, encoded.join("/")))
    }
}
