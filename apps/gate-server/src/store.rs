//! Repository selection: memory, SQLite or DynamoDB behind one type so the
//! registry stays monomorphic over feature flags.

use std::sync::Arc;

use domain::adapters::memory_repo::InMemoryRepo;
use domain::{CoreError, Link, LinkRepository, StatsRepository, Token, VisitorStats};

use crate::config::{Config, StorageProvider};

enum RepoKind {
    Memory(InMemoryRepo),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
    #[cfg(feature = "dynamo")]
    Dynamo(aws_dynamo::DynamoRepo),
}

#[derive(Clone)]
pub struct AnyRepo {
    kind: Arc<RepoKind>,
}

impl AnyRepo {
    pub fn memory() -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory(InMemoryRepo::new())),
        }
    }

    /// Construct the configured backend. A provider whose feature is not
    /// compiled in is a startup error.
    pub fn from_config(cfg: &Config) -> Result<Self, CoreError> {
        let kind = match cfg.storage_provider {
            StorageProvider::Memory => return Ok(Self::memory()),
            #[cfg(feature = "sqlite")]
            StorageProvider::Sqlite => {
                RepoKind::Sqlite(sqlite_adapter::SqliteRepo::open_creating_dirs(&cfg.db_path)?)
            }
            #[cfg(feature = "dynamo")]
            StorageProvider::Dynamo => {
                let names = cfg.dynamo_tables.as_ref().ok_or_else(|| {
                    CoreError::Persistence("dynamo table names not configured".into())
                })?;
                let tables = aws_dynamo::DynamoTables::new(names.links.clone(), names.stats.clone());
                RepoKind::Dynamo(aws_dynamo::DynamoRepo::new(tables)?)
            }
            #[allow(unreachable_patterns)]
            ref other => {
                return Err(CoreError::Persistence(format!(
                    "storage provider {:?} not compiled in",
                    other
                )))
            }
        };
        Ok(Self { kind: Arc::new(kind) })
    }

    pub fn name(&self) -> &'static str {
        match &*self.kind {
            RepoKind::Memory(_) => "memory",
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(_) => "sqlite",
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(_) => "dynamo",
        }
    }
}

impl LinkRepository for AnyRepo {
    fn get(&self, token: &Token) -> Result<Option<Link>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.get(token),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.get(token),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.get(token),
        }
    }

    fn put(&self, link: Link) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.put(link),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.put(link),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.put(link),
        }
    }
}

impl StatsRepository for AnyRepo {
    fn load_or_init(&self) -> Result<VisitorStats, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.load_or_init(),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.load_or_init(),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.load_or_init(),
        }
    }

    fn increment(&self) -> Result<VisitorStats, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.increment(),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.increment(),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.increment(),
        }
    }
}
