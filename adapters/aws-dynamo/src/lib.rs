//! DynamoDB adapter implementing the `LinkRepository` and `StatsRepository` ports.
//!
//! - Stores links in the Links table with primary key `token`.
//! - Keeps the visitor counter as a single item (`id = "global"`) in the Stats
//!   table, bumped with an atomic `ADD` update expression.
//! - Table names come from the server config (`DYNAMO_TABLE_LINKS`,
//!   `DYNAMO_TABLE_STATS`) through [`DynamoTables::new`].
//!
//! Notes:
//! - The domain ports are synchronous. We bridge to the async AWS SDK using an
//!   internal `tokio::runtime::Runtime` and `block_on`, or `block_in_place`
//!   when already running inside a runtime.

use aws_sdk_dynamodb::{types::AttributeValue, Client};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use domain::{CoreError, Link, LinkRepository, StatsRepository, Token, VisitorStats, STATS_ID};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Configuration for DynamoDB table names.
#[derive(Clone, Debug)]
pub struct DynamoTables {
    pub links: String,
    pub stats: String,
}

impl DynamoTables {
    /// Create with explicit table names.
    pub fn new(links: impl Into<String>, stats: impl Into<String>) -> Self {
        Self {
            links: links.into(),
            stats: stats.into(),
        }
    }
}

/// Document store backed by AWS DynamoDB.
///
/// Supports both standalone mode (creates its own Tokio runtime) and server
/// mode (reuses the existing runtime via `Handle::current()`).
#[derive(Clone)]
pub struct DynamoRepo {
    table_links: String,
    table_stats: String,
    client: Client,
    // None when constructed inside a runtime (reuses it)
    rt: Option<std::sync::Arc<tokio::runtime::Runtime>>,
}

impl DynamoRepo {
    /// Construct with table names but create a default AWS SDK client using env/IMDS.
    pub fn new(tables: DynamoTables) -> Result<Self, CoreError> {
        let rt = Self::maybe_create_runtime()?;
        let conf = Self::block_on_with_rt(&rt, aws_config::load_from_env());
        let client = Client::new(&conf);
        Ok(Self {
            table_links: tables.links,
            table_stats: tables.stats,
            client,
            rt,
        })
    }

    fn maybe_create_runtime() -> Result<Option<std::sync::Arc<tokio::runtime::Runtime>>, CoreError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            Ok(None)
        } else {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| CoreError::Persistence(format!("tokio runtime init: {e}")))?;
            Ok(Some(std::sync::Arc::new(rt)))
        }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        Self::block_on_with_rt(&self.rt, fut)
    }

    fn block_on_with_rt<F: std::future::Future>(
        rt: &Option<std::sync::Arc<tokio::runtime::Runtime>>,
        fut: F,
    ) -> F::Output {
        match rt {
            Some(rt) => rt.block_on(fut),
            None => tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut)),
        }
    }

    fn stats_key() -> HashMap<String, AttributeValue> {
        HashMap::from([("id".to_string(), AttributeValue::S(STATS_ID.into()))])
    }
}

impl LinkRepository for DynamoRepo {
    fn get(&self, token: &Token) -> Result<Option<Link>, CoreError> {
        let table = self.table_links.clone();
        let key = token.as_str().to_string();
        let fut = async {
            self.client
                .get_item()
                .table_name(table)
                .key("token", AttributeValue::S(key))
                .consistent_read(true)
                .send()
                .await
        };
        let out = self.block_on(fut).map_err(map_sdk_err)?;
        match out.item() {
            Some(item) => Ok(Some(item_to_link(item)?)),
            None => Ok(None),
        }
    }

    fn put(&self, link: Link) -> Result<(), CoreError> {
        // Conditional put: records are immutable once written
        let table = self.table_links.clone();
        let item = link_to_item(&link);
        let fut = async {
            self.client
                .put_item()
                .table_name(table)
                .set_item(Some(item))
                .condition_expression("attribute_not_exists(#t)")
                .expression_attribute_names("#t", "token")
                .send()
                .await
        };
        self.block_on(fut).map_err(|e| match e.as_service_error() {
            Some(se) if se.code() == Some("ConditionalCheckFailedException") => CoreError::AlreadyExists,
            _ => map_sdk_err(e),
        })?;
        Ok(())
    }
}

impl StatsRepository for DynamoRepo {
    fn load_or_init(&self) -> Result<VisitorStats, CoreError> {
        let table = self.table_stats.clone();
        let fut = async {
            self.client
                .get_item()
                .table_name(table.clone())
                .set_key(Some(Self::stats_key()))
                .consistent_read(true)
                .send()
                .await
        };
        let out = self.block_on(fut).map_err(map_sdk_err)?;
        if let Some(item) = out.item() {
            return Ok(VisitorStats { total: read_total(item)? });
        }

        // Initialize; a concurrent initializer winning the race is fine
        let fut = async {
            self.client
                .put_item()
                .table_name(table)
                .item("id", AttributeValue::S(STATS_ID.into()))
                .item("total", AttributeValue::N("0".into()))
                .condition_expression("attribute_not_exists(id)")
                .send()
                .await
        };
        match self.block_on(fut) {
            Ok(_) => {
                debug!("visitor stats initialized");
                Ok(VisitorStats::default())
            }
            Err(e) => match e.as_service_error() {
                Some(se) if se.code() == Some("ConditionalCheckFailedException") => {
                    let again = self
                        .block_on(async {
                            self.client
                                .get_item()
                                .table_name(self.table_stats.clone())
                                .set_key(Some(Self::stats_key()))
                                .consistent_read(true)
                                .send()
                                .await
                        })
                        .map_err(map_sdk_err)?;
                    let total = again.item().map(read_total).transpose()?.unwrap_or(0);
                    Ok(VisitorStats { total })
                }
                _ => Err(map_sdk_err(e)),
            },
        }
    }

    fn increment(&self) -> Result<VisitorStats, CoreError> {
        use aws_sdk_dynamodb::types::ReturnValue;
        let table = self.table_stats.clone();
        let fut = async {
            self.client
                .update_item()
                .table_name(table)
                .set_key(Some(Self::stats_key()))
                .update_expression("ADD #v :one")
                .expression_attribute_names("#v", "total")
                .expression_attribute_values(":one", AttributeValue::N("1".into()))
                .return_values(ReturnValue::UpdatedNew)
                .send()
                .await
        };
        let out = self.block_on(fut).map_err(map_sdk_err)?;
        let attrs = out
            .attributes()
            .ok_or_else(|| CoreError::Persistence("update returned no attributes".into()))?;
        Ok(VisitorStats { total: read_total(attrs)? })
    }
}

fn map_sdk_err<E: ProvideErrorMetadata + std::fmt::Display>(e: E) -> CoreError {
    if e.code() == Some("ResourceNotFoundException") {
        return CoreError::Persistence("missing table".into());
    }
    CoreError::Persistence(format!("dynamo error: {e}"))
}

fn system_time_to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn millis_to_system_time(ms: u64) -> SystemTime {
    UNIX_EPOCH + std::time::Duration::from_millis(ms)
}

fn read_total(item: &HashMap<String, AttributeValue>) -> Result<u64, CoreError> {
    item.get("total")
        .and_then(|av| av.as_n().ok())
        .ok_or_else(|| CoreError::Persistence("stats item missing total".into()))?
        .parse::<u64>()
        .map_err(|e| CoreError::Persistence(format!("parse total: {e}")))
}

fn link_to_item(link: &Link) -> HashMap<String, AttributeValue> {
    let mut m = HashMap::new();
    m.insert("token".into(), AttributeValue::S(link.token.as_str().to_string()));
    m.insert("content_url".into(), AttributeValue::S(link.content_url.clone()));
    m.insert("ads_url".into(), AttributeValue::S(link.ads_url.clone()));
    m.insert("image_url".into(), AttributeValue::S(link.image_url.clone()));
    m.insert(
        "created_at".into(),
        AttributeValue::N(system_time_to_millis(link.created_at).to_string()),
    );
    m
}

fn item_to_link(item: &HashMap<String, AttributeValue>) -> Result<Link, CoreError> {
    let get_s = |name: &str| -> Result<String, CoreError> {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::Persistence(format!("item missing {name}")))
    };
    let token = Token::new(get_s("token")?)
        .map_err(|e| CoreError::Persistence(format!("bad token in item: {e}")))?;
    let created_at = item
        .get("created_at")
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| CoreError::Persistence("item missing created_at".into()))?;
    Ok(Link {
        token,
        content_url: get_s("content_url")?,
        ads_url: get_s("ads_url")?,
        image_url: get_s("image_url")?,
        created_at: millis_to_system_time(created_at),
    })
}
