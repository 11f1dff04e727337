use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::{BlobStore, CoreError, ImageUpload, Link, LinkRepository, StatsRepository, Token, VisitorStats};

/// Simple in-memory document store holding links and the visitor counter.
/// Clones share the same underlying maps.
#[derive(Clone, Default)]
pub struct InMemoryRepo {
    links: Arc<Mutex<BTreeMap<String, Link>>>,
    stats: Arc<Mutex<Option<VisitorStats>>>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(token: &Token) -> String {
        token.as_str().to_string()
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the stats singleton has been created yet.
    pub fn has_stats(&self) -> bool {
        self.stats.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

impl LinkRepository for InMemoryRepo {
    fn get(&self, token: &Token) -> Result<Option<Link>, CoreError> {
        let map = self
            .links
            .lock()
            .map_err(|_| CoreError::Persistence("mutex poisoned".into()))?;
        Ok(map.get(&Self::key(token)).cloned())
    }

    fn put(&self, link: Link) -> Result<(), CoreError> {
        let mut map = self
            .links
            .lock()
            .map_err(|_| CoreError::Persistence("mutex poisoned".into()))?;
        let key = Self::key(&link.token);
        if map.contains_key(&key) {
            return Err(CoreError::AlreadyExists);
        }
        map.insert(key, link);
        Ok(())
    }
}

impl StatsRepository for InMemoryRepo {
    fn load_or_init(&self) -> Result<VisitorStats, CoreError> {
        let mut stats = self
            .stats
            .lock()
            .map_err(|_| CoreError::Persistence("mutex poisoned".into()))?;
        Ok(*stats.get_or_insert_with(VisitorStats::default))
    }

    fn increment(&self) -> Result<VisitorStats, CoreError> {
        let mut stats = self
            .stats
            .lock()
            .map_err(|_| CoreError::Persistence("mutex poisoned".into()))?;
        let current = stats.get_or_insert_with(VisitorStats::default);
        current.total = current.total.saturating_add(1);
        Ok(*current)
    }
}

/// In-memory blob store returning `memory://blobs/<key>` URLs.
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<Mutex<BTreeMap<String, ImageUpload>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ImageUpload> {
        self.blobs.lock().ok().and_then(|m| m.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, key: &str, image: &ImageUpload) -> Result<String, CoreError> {
        let mut map = self
            .blobs
            .lock()
            .map_err(|_| CoreError::Storage("mutex poisoned".into()))?;
        map.insert(key.to_string(), image.clone());
        Ok(format!("memory://blobs/{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn link(token: &str) -> Link {
        Link {
            token: Token::new(token).unwrap(),
            content_url: "https://c.example".into(),
            ads_url: "https://a.example".into(),
            image_url: "memory://blobs/images/x_a.png".into(),
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn put_get_and_reject_overwrite() {
        let repo = InMemoryRepo::new();
        repo.put(link("abcd1234")).unwrap();
        let got = repo.get(&Token::new("abcd1234").unwrap()).unwrap().unwrap();
        assert_eq!(got.content_url, "https://c.example");
        assert!(matches!(repo.put(link("abcd1234")), Err(CoreError::AlreadyExists)));
        assert!(repo.get(&Token::new("zzzz9999").unwrap()).unwrap().is_none());
    }

    #[test]
    fn stats_lazy_init_and_increment() {
        let repo = InMemoryRepo::new();
        assert!(!repo.has_stats());
        assert_eq!(repo.increment().unwrap().total, 1);
        assert_eq!(repo.load_or_init().unwrap().total, 1);

        let fresh = InMemoryRepo::new();
        assert_eq!(fresh.load_or_init().unwrap().total, 0);
        assert!(fresh.has_stats());
    }

    #[test]
    fn blob_store_keeps_bytes() {
        let blobs = InMemoryBlobStore::new();
        let image = ImageUpload {
            file_name: "a.png".into(),
            content_type: None,
            bytes: vec![1, 2, 3],
        };
        let url = blobs.put("images/k_a.png", &image).unwrap();
        assert_eq!(url, "memory://blobs/images/k_a.png");
        assert_eq!(blobs.get("images/k_a.png").unwrap().bytes, vec![1, 2, 3]);
        assert_eq!(blobs.len(), 1);
    }
}
