//! Durable certificate records and the backends that hold them

pub mod sled_store;
pub mod sqlite;

pub use sled_store::SledStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::{CertError, CertResult};
use crate::tls::provider::CertSource;

/// Validity of a record, always derived from `expire_time` at read time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CertStatus {
    Valid,
    Expired,
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertStatus::Valid => f.write_str("valid"),
            CertStatus::Expired => f.write_str("expired"),
        }
    }
}

/// One managed domain
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Assigned by the store on insert; zero until then
    pub id: i64,
    pub domain: String,
    /// NotBefore, Unix seconds
    pub create_time: i64,
    /// NotAfter, Unix seconds
    pub expire_time: i64,
    /// Full-chain certificate, PEM
    pub public_key: String,
    pub private_key: String,
    pub cert_path: String,
    pub key_path: String,
    pub cert_source: CertSource,
}

impl CertificateRecord {
    pub fn status_at(&self, now: DateTime<Utc>) -> CertStatus {
        if self.expire_time < now.timestamp() {
            CertStatus::Expired
        } else {
            CertStatus::Valid
        }
    }

    pub fn status(&self) -> CertStatus {
        self.status_at(Utc::now())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expire_time, 0).single()
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.create_time, 0).single()
    }

    /// True once `now` is inside the renewal window before expiry
    pub fn is_due(&self, window_days: u64, now: DateTime<Utc>) -> bool {
        let threshold = self.expire_time - (window_days as i64) * 86_400;
        threshold <= now.timestamp()
    }

    /// Same certificate and key text, byte for byte
    pub fn same_material(&self, public_key: &str, private_key: &str) -> bool {
        self.public_key.as_bytes() == public_key.as_bytes()
            && self.private_key.as_bytes() == private_key.as_bytes()
    }
}

impl fmt::Debug for CertificateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRecord")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("create_time", &self.create_time)
            .field("expire_time", &self.expire_time)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("cert_source", &self.cert_source)
            .field("private_key", &"<REDACTED>")
            .finish()
    }
}

/// Repository of certificate records keyed by id and by domain
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record and return the id the store assigned
    async fn insert(&self, record: &CertificateRecord) -> CertResult<i64>;

    /// Replace the record with `record.id`; `NotFound` if it does not exist
    async fn update(&self, record: &CertificateRecord) -> CertResult<()>;

    async fn delete(&self, id: i64) -> CertResult<()>;

    async fn get(&self, id: i64) -> CertResult<CertificateRecord>;

    async fn get_all(&self) -> CertResult<Vec<CertificateRecord>>;

    async fn get_by_domain(&self, domain: &str) -> CertResult<CertificateRecord>;

    fn backend_name(&self) -> &str;
}

/// Open the configured backend. `auto` prefers SQLite and falls back to sled.
pub async fn open_store(config: &StorageConfig) -> CertResult<Arc<dyn RecordStore>> {
    let dir = config.data_dir();

    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::open(dir.join("sslkeeper.db")).await?)),
        "sled" => Ok(Arc::new(SledStore::open(dir.join("sled"))?)),
        "auto" => match SqliteStore::open(dir.join("sslkeeper.db")).await {
            Ok(store) => Ok(Arc::new(store)),
            Err(e) => {
                warn!("SQLite store unavailable ({}), falling back to sled", e);
                let store = SledStore::open(dir.join("sled"))?;
                info!("Using sled store at {}", dir.join("sled").display());
                Ok(Arc::new(store))
            }
        },
        other => Err(CertError::Store(format!("unknown storage backend: {}", other))),
    }
}
