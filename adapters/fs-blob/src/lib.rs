//! fs-blob: filesystem implementation of the `BlobStore` port.
//!
//! Blobs are written to `<root>/<key>` and exposed at `<public_base>/blobs/<key>`;
//! the server mounts a route that reads them back through [`FsBlobStore::read`].
//! Keys are caller-supplied relative paths such as `images/<id>_<name>.png`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use domain::{BlobStore, CoreError, ImageUpload};
use tracing::debug;

/// Blob store writing files under a root directory.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    public_base: String,
}

impl FsBlobStore {
    /// Create the store, making sure `root` exists.
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| CoreError::Storage(format!("create {}: {e}", root.display())))?;
        Ok(Self {
            root,
            public_base: public_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Public URL of a stored key.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/blobs/{}", self.public_base, key)
    }

    /// Read a blob back. `Ok(None)` when the key is unknown.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Storage(format!("read {}: {e}", path.display()))),
        }
    }

    /// Map a key to a path under root, rejecting anything that could escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, CoreError> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(CoreError::Storage(format!("invalid blob key {key:?}")));
        }
        Ok(self.root.join(rel))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, image: &ImageUpload) -> Result<String, CoreError> {
        let path = self.resolve(key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| CoreError::Storage(format!("create {}: {e}", dir.display())))?;
        }
        fs::write(&path, &image.bytes)
            .map_err(|e| CoreError::Storage(format!("write {}: {e}", path.display())))?;
        debug!(key = %key, bytes = image.bytes.len(), "blob written");
        Ok(self.url_for(key))
    }
}

/// Guess a response content type from a key's extension. Only raster image
/// types are recognised; anything else, SVG included, is served as opaque
/// bytes.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}
