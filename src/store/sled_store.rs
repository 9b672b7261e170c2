//! Embedded key-value record store on sled
//!
//! Two trees: `certs` maps a big-endian id to the JSON record, `domains`
//! maps a domain name to its id.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::Mutex;

use super::{CertificateRecord, RecordStore};
use crate::error::{CertError, CertResult};

pub struct SledStore {
    db: sled::Db,
    certs: sled::Tree,
    domains: sled::Tree,
    /// Serializes writers so the two trees never disagree
    write_lock: Mutex<()>,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> CertResult<Self> {
        let db = sled::open(path.as_ref())?;
        let certs = db.open_tree("certs")?;
        let domains = db.open_tree("domains")?;
        Ok(Self {
            db,
            certs,
            domains,
            write_lock: Mutex::new(()),
        })
    }

    fn id_key(id: i64) -> [u8; 8] {
        id.to_be_bytes()
    }

    fn decode(bytes: &[u8]) -> CertResult<CertificateRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| CertError::Store(format!("corrupt record: {}", e)))
    }

    fn encode(record: &CertificateRecord) -> CertResult<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| CertError::Store(format!("encode record: {}", e)))
    }

    fn load(&self, id: i64) -> CertResult<Option<CertificateRecord>> {
        self.certs
            .get(Self::id_key(id))?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    async fn flush(&self) -> CertResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SledStore {
    async fn insert(&self, record: &CertificateRecord) -> CertResult<i64> {
        let _guard = self.write_lock.lock().await;

        let id = (self.db.generate_id()? + 1) as i64;
        let mut stored = record.clone();
        stored.id = id;

        self.certs.insert(Self::id_key(id), Self::encode(&stored)?)?;
        self.domains
            .insert(stored.domain.as_bytes(), &Self::id_key(id)[..])?;
        self.flush().await?;
        Ok(id)
    }

    async fn update(&self, record: &CertificateRecord) -> CertResult<()> {
        let _guard = self.write_lock.lock().await;

        let previous = self
            .load(record.id)?
            .ok_or_else(|| CertError::NotFound(format!("certificate id {}", record.id)))?;

        self.certs
            .insert(Self::id_key(record.id), Self::encode(record)?)?;
        if previous.domain != record.domain {
            self.domains.remove(previous.domain.as_bytes())?;
        }
        self.domains
            .insert(record.domain.as_bytes(), &Self::id_key(record.id)[..])?;
        self.flush().await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> CertResult<()> {
        let _guard = self.write_lock.lock().await;

        let previous = self
            .load(id)?
            .ok_or_else(|| CertError::NotFound(format!("certificate id {}", id)))?;

        self.certs.remove(Self::id_key(id))?;
        self.domains.remove(previous.domain.as_bytes())?;
        self.flush().await?;
        Ok(())
    }

    async fn get(&self, id: i64) -> CertResult<CertificateRecord> {
        self.load(id)?
            .ok_or_else(|| CertError::NotFound(format!("certificate id {}", id)))
    }

    async fn get_all(&self) -> CertResult<Vec<CertificateRecord>> {
        let mut records = Vec::new();
        for entry in self.certs.iter() {
            let (_, value) = entry?;
            records.push(Self::decode(&value)?);
        }
        Ok(records)
    }

    async fn get_by_domain(&self, domain: &str) -> CertResult<CertificateRecord> {
        let not_found = || CertError::NotFound(format!("domain {}", domain));

        let id_bytes = self.domains.get(domain.as_bytes())?.ok_or_else(not_found)?;
        let id_array: [u8; 8] = id_bytes
            .as_ref()
            .try_into()
            .map_err(|_| CertError::Store(format!("corrupt domain index for {}", domain)))?;

        self.load(i64::from_be_bytes(id_array))?.ok_or_else(not_found)
    }

    fn backend_name(&self) -> &str {
        "sled"
    }
}
