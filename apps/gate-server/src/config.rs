//! Centralized configuration for gate-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time.

use axum::http::HeaderValue;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use domain::validate::DEFAULT_MAX_IMAGE_BYTES;

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// SQLite file-based storage
    Sqlite,
    /// DynamoDB tables (requires the `dynamo` feature)
    Dynamo,
}

impl StorageProvider {
    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            "dynamo" => Ok(Self::Dynamo),
            other => Err(ConfigError {
                field: "STORAGE_PROVIDER",
                message: format!("unknown provider '{}', expected memory|sqlite|dynamo", other),
            }),
        }
    }
}

/// DynamoDB table names, required when `STORAGE_PROVIDER=dynamo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoTableNames {
    pub links: String,
    pub stats: String,
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3001)
    pub port: u16,
    pub storage_provider: StorageProvider,
    /// Set only for the dynamo provider
    pub dynamo_tables: Option<DynamoTableNames>,
    /// SQLite database path (default: ./data/linkgate.db)
    pub db_path: PathBuf,
    /// Root directory for uploaded cover images
    pub blob_dir: PathBuf,
    /// Origin for share and image URLs; falls back to the request Host
    pub public_origin: Option<String>,
    /// Path placed before `#/v/<token>` in share URLs
    pub share_path: String,
    pub max_image_bytes: usize,
    /// How often the stored visitor total is re-read for live subscribers
    /// (default: 2s)
    pub stats_poll: Duration,
    pub cors_allow_origin: HeaderValue,
    pub log_format: LogFormat,
}

/// Paths owned by other routes; a share path must not shadow them.
const RESERVED_PREFIXES: [&str; 4] = ["/api", "/v/", "/blobs", "/create"];

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT") {
            Some(s) => s.trim().parse().map_err(|e| ConfigError {
                field: "PORT",
                message: format!("invalid port '{}': {}", s, e),
            })?,
            None => 3001,
        };

        let storage_provider =
            StorageProvider::from_str(&var("STORAGE_PROVIDER").unwrap_or_else(|| "sqlite".into()))?;

        let dynamo_tables = if storage_provider == StorageProvider::Dynamo {
            let table = |field: &'static str| {
                var(field).map(|v| v.trim().to_string()).ok_or(ConfigError {
                    field,
                    message: "required when STORAGE_PROVIDER=dynamo".into(),
                })
            };
            Some(DynamoTableNames {
                links: table("DYNAMO_TABLE_LINKS")?,
                stats: table("DYNAMO_TABLE_STATS")?,
            })
        } else {
            None
        };

        let db_path = PathBuf::from(var("DB_PATH").unwrap_or_else(|| "./data/linkgate.db".into()));
        let blob_dir = PathBuf::from(var("BLOB_DIR").unwrap_or_else(|| "./data/blobs".into()));

        let public_origin = match var("PUBLIC_ORIGIN") {
            Some(o) if o.starts_with("http://") || o.starts_with("https://") => {
                Some(o.trim_end_matches('/').to_string())
            }
            Some(o) => {
                return Err(ConfigError {
                    field: "PUBLIC_ORIGIN",
                    message: format!("'{}' must start with http:// or https://", o),
                })
            }
            None => None,
        };

        let share_path = var("SHARE_PATH").unwrap_or_else(|| "/".into());
        if !share_path.starts_with('/') {
            return Err(ConfigError {
                field: "SHARE_PATH",
                message: format!("'{}' must start with /", share_path),
            });
        }
        // Route syntax and URL delimiters would change what the route matches
        if let Some(c) = share_path
            .chars()
            .find(|c| matches!(c, ':' | '*' | '?' | '#' | '{' | '}') || c.is_whitespace() || c.is_control())
        {
            return Err(ConfigError {
                field: "SHARE_PATH",
                message: format!("'{}' must not contain {:?}", share_path, c),
            });
        }
        if RESERVED_PREFIXES.iter().any(|p| share_path.starts_with(p)) {
            return Err(ConfigError {
                field: "SHARE_PATH",
                message: format!("'{}' collides with a built-in route", share_path),
            });
        }

        let max_image_bytes = match var("MAX_IMAGE_BYTES") {
            Some(s) => match s.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError {
                        field: "MAX_IMAGE_BYTES",
                        message: format!("'{}' is not a positive byte count", s),
                    })
                }
            },
            None => DEFAULT_MAX_IMAGE_BYTES,
        };

        let stats_poll = match var("STATS_POLL_SECS") {
            Some(s) => match s.trim().parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    return Err(ConfigError {
                        field: "STATS_POLL_SECS",
                        message: format!("'{}' is not a positive number of seconds", s),
                    })
                }
            },
            None => Duration::from_secs(2),
        };

        let cors_origin_str = var("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        let log_format =
            LogFormat::from_str(&var("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        Ok(Self {
            port,
            storage_provider,
            dynamo_tables,
            db_path,
            blob_dir,
            public_origin,
            share_path,
            max_image_bytes,
            stats_poll,
            cors_allow_origin,
            log_format,
        })
    }

    /// Log warnings about settings that only make sense for local use.
    pub fn warn_if_ephemeral(&self) {
        if self.storage_provider == StorageProvider::Memory {
            tracing::warn!("STORAGE_PROVIDER=memory: links and visitor totals are lost on restart");
        }
        if self.public_origin.is_none() {
            tracing::warn!("PUBLIC_ORIGIN not set: share URLs are derived from the request Host header");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.storage_provider, StorageProvider::Sqlite);
        assert_eq!(cfg.db_path, PathBuf::from("./data/linkgate.db"));
        assert_eq!(cfg.blob_dir, PathBuf::from("./data/blobs"));
        assert_eq!(cfg.public_origin, None);
        assert_eq!(cfg.share_path, "/");
        assert_eq!(cfg.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.stats_poll, Duration::from_secs(2));
        assert_eq!(cfg.dynamo_tables, None);
        assert_eq!(cfg.cors_allow_origin, HeaderValue::from_static("*"));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn storage_provider_parsing() {
        assert_eq!(StorageProvider::from_str("memory").unwrap(), StorageProvider::Memory);
        assert_eq!(StorageProvider::from_str("SQLITE").unwrap(), StorageProvider::Sqlite);
        assert_eq!(StorageProvider::from_str("dynamo").unwrap(), StorageProvider::Dynamo);
        assert!(StorageProvider::from_str("postgres").is_err());
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("anything"), LogFormat::Pretty);
    }

    #[test]
    fn public_origin_must_be_http() {
        let cfg = load(&[("PUBLIC_ORIGIN", "https://gate.example/")]).unwrap();
        assert_eq!(cfg.public_origin.as_deref(), Some("https://gate.example"));
        let err = load(&[("PUBLIC_ORIGIN", "gate.example")]).unwrap_err();
        assert_eq!(err.field, "PUBLIC_ORIGIN");
    }

    #[test]
    fn share_path_rules() {
        assert_eq!(load(&[("SHARE_PATH", "/share")]).unwrap().share_path, "/share");
        assert_eq!(load(&[("SHARE_PATH", "share")]).unwrap_err().field, "SHARE_PATH");
        assert_eq!(load(&[("SHARE_PATH", "/api/x")]).unwrap_err().field, "SHARE_PATH");
    }

    #[test]
    fn share_path_rejects_route_syntax() {
        for bad in ["/:token", "/s/*rest", "/s?x=1", "/s#frag", "/a b", "/{x}"] {
            assert_eq!(load(&[("SHARE_PATH", bad)]).unwrap_err().field, "SHARE_PATH", "{bad}");
        }
        assert_eq!(load(&[("SHARE_PATH", "/s/share-1")]).unwrap().share_path, "/s/share-1");
    }

    #[test]
    fn dynamo_requires_table_names() {
        let err = load(&[("STORAGE_PROVIDER", "dynamo")]).unwrap_err();
        assert_eq!(err.field, "DYNAMO_TABLE_LINKS");
        let err = load(&[("STORAGE_PROVIDER", "dynamo"), ("DYNAMO_TABLE_LINKS", "links")]).unwrap_err();
        assert_eq!(err.field, "DYNAMO_TABLE_STATS");

        let cfg = load(&[
            ("STORAGE_PROVIDER", "dynamo"),
            ("DYNAMO_TABLE_LINKS", "links"),
            ("DYNAMO_TABLE_STATS", " stats "),
        ])
        .unwrap();
        assert_eq!(
            cfg.dynamo_tables,
            Some(DynamoTableNames { links: "links".into(), stats: "stats".into() })
        );

        // ignored for other providers
        let cfg = load(&[("STORAGE_PROVIDER", "memory"), ("DYNAMO_TABLE_LINKS", "links")]).unwrap();
        assert_eq!(cfg.dynamo_tables, None);
    }

    #[test]
    fn stats_poll_must_be_positive() {
        assert_eq!(load(&[("STATS_POLL_SECS", "10")]).unwrap().stats_poll, Duration::from_secs(10));
        assert_eq!(load(&[("STATS_POLL_SECS", "0")]).unwrap_err().field, "STATS_POLL_SECS");
        assert_eq!(load(&[("STATS_POLL_SECS", "soon")]).unwrap_err().field, "STATS_POLL_SECS");
    }

    #[test]
    fn max_image_bytes_must_be_positive() {
        assert_eq!(load(&[("MAX_IMAGE_BYTES", "1024")]).unwrap().max_image_bytes, 1024);
        assert_eq!(load(&[("MAX_IMAGE_BYTES", "0")]).unwrap_err().field, "MAX_IMAGE_BYTES");
        assert_eq!(load(&[("MAX_IMAGE_BYTES", "lots")]).unwrap_err().field, "MAX_IMAGE_BYTES");
    }

    #[test]
    fn bad_port_rejected() {
        assert_eq!(load(&[("PORT", "99999")]).unwrap_err().field, "PORT");
        assert_eq!(load(&[("PORT", "8080")]).unwrap().port, 8080);
    }
}
