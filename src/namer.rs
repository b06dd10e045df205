// src/namer.rs
use crate::models::{Scheme, StorageUri};

pub const RESIZE_NAMESPACE: &str = "resize";
pub const REMOTE_NAMESPACE: &str = "remote";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeSource<'a> {
    /// A file already in storage; the derivative is keyed by its path.
    Stored(&'a StorageUri),
    /// Downloaded content; the derivative is keyed by the hash of its bytes.
    Remote { digest: &'a str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivativeKey<'a> {
    pub source: DerivativeSource<'a>,
    pub width: u32,
    pub height: u32,
    pub extension: &'a str,
}

impl DerivativeKey<'_> {
    pub fn destination(&self) -> StorageUri {
        let size = format!("{}x{}", self.width, self.height);
        match self.source {
            DerivativeSource::Stored(uri) => {
                let filename = uri.filename();
                let (stem, extension) = match uri.extension() {
                    Some(ext) => (&filename[..filename.len() - ext.len() - 1], ext),
                    None => (filename, self.extension),
                };
                let dir = uri.dirname();
                let target = if dir.is_empty() {
                    format!("{}/{}-{}.{}", RESIZE_NAMESPACE, stem, size, extension)
                } else {
                    format!("{}/{}/{}-{}.{}", RESIZE_NAMESPACE, dir, stem, size, extension)
                };
                StorageUri::new(uri.scheme, target)
            }
            DerivativeSource::Remote { digest } => StorageUri::new(
                Scheme::Public,
                format!(
                    "{}/{}/{}-{}.{}",
                    RESIZE_NAMESPACE, REMOTE_NAMESPACE, digest, size, self.extension
                ),
            ),
        }
    }
}
