//! Domain library for the link gate.
//!
//! Holds the domain types, ports (traits), and error definitions, plus the two
//! components that carry behavior: the [`service::LinkRegistry`] and the
//! [`gate::GateFlow`] state machine. Keep adapters and IO concerns out of this
//! crate; only the in-memory test adapters live here.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Length of a minted link token.
pub const TOKEN_LEN: usize = 8;

/// Fixed identifier of the global visitor stats record.
pub const STATS_ID: &str = "global";

/// Short opaque identifier of a link, embedded in the share URL.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(String);

impl Token {
    /// Parse a token: exactly [`TOKEN_LEN`] characters from the nanoid alphabet.
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.chars().count() != TOKEN_LEN {
            return Err(CoreError::InvalidToken(format!(
                "expected {TOKEN_LEN} characters, got {}",
                val.chars().count()
            )));
        }
        if !val.bytes().all(token::is_alphabet_byte) {
            return Err(CoreError::InvalidToken("invalid characters".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An image file submitted alongside a new link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Input data for creating a new gated link. Missing inputs are represented
/// as blank strings or `None` and rejected at creation time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewLink {
    pub content_url: String,
    pub ads_url: String,
    pub image: Option<ImageUpload>,
}

/// Stored link record. Written once at creation, never updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub token: Token,
    pub content_url: String,
    pub ads_url: String,
    pub image_url: String,
    pub created_at: SystemTime,
}

/// Result of a successful creation: the record plus its shareable URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedLink {
    pub link: Link,
    pub share_url: String,
}

/// Global visitor counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorStats {
    pub total: u64,
}

/// Origin and path that share URLs are built on: `<origin><path>#/v/<token>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareBase {
    origin: String,
    path: String,
}

impl ShareBase {
    pub fn new(origin: impl Into<String>, path: impl Into<String>) -> Self {
        let origin = origin.into().trim_end_matches('/').to_string();
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { origin, path }
    }

    pub fn url_for(&self, token: &Token) -> String {
        format!("{}{}#/v/{}", self.origin, self.path, token.as_str())
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Token minting strategy.
pub trait TokenGenerator: Send + Sync {
    fn next_token(&self) -> Token;
}

/// Repository port for persisting and loading link records.
pub trait LinkRepository: Send + Sync {
    fn get(&self, token: &Token) -> Result<Option<Link>, CoreError>;
    /// Insert a new record. Fails with `AlreadyExists` instead of overwriting.
    fn put(&self, link: Link) -> Result<(), CoreError>;
}

/// Repository port for the singleton visitor counter.
pub trait StatsRepository: Send + Sync {
    /// Read the counter, creating it with total 0 if absent.
    fn load_or_init(&self) -> Result<VisitorStats, CoreError>;
    /// Atomically add one and return the updated counter. Creates the record
    /// if it does not exist yet.
    fn increment(&self) -> Result<VisitorStats, CoreError>;
}

/// Blob storage port. Returns a stable, publicly retrievable URL.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, image: &ImageUpload) -> Result<String, CoreError>;
}

/// Browser-session scoped key-value storage.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("not found")]
    NotFound,
    #[error("resource already exists")]
    AlreadyExists,
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl CoreError {
    /// Backend failures the user can retry; everything else is terminal or
    /// user-correctable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Storage(_) | CoreError::Persistence(_))
    }
}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} - link gate domain library", pkg, ver)
}

pub mod adapters;
pub mod gate;
pub mod service;
pub mod stats;
pub mod token;
pub mod validate;
