//! SQLite-backed record store

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;

use super::{CertificateRecord, RecordStore};
use crate::error::{CertError, CertResult};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS certificates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    create_time INTEGER NOT NULL,
    expire_time INTEGER NOT NULL,
    public_key TEXT NOT NULL,
    private_key TEXT NOT NULL,
    cert_path TEXT NOT NULL,
    key_path TEXT NOT NULL,
    cert_source TEXT NOT NULL
);
"#;

const SELECT_COLUMNS: &str = "SELECT id, domain, create_time, expire_time, public_key, private_key, \
     cert_path, key_path, cert_source FROM certificates";

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    domain: String,
    create_time: i64,
    expire_time: i64,
    public_key: String,
    private_key: String,
    cert_path: String,
    key_path: String,
    cert_source: String,
}

impl TryFrom<RecordRow> for CertificateRecord {
    type Error = CertError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(CertificateRecord {
            id: row.id,
            domain: row.domain,
            create_time: row.create_time,
            expire_time: row.expire_time,
            public_key: row.public_key,
            private_key: row.private_key,
            cert_path: row.cert_path,
            key_path: row.key_path,
            cert_source: row.cert_source.parse()?,
        })
    }
}

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>) -> CertResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection keeps every write on a single writer
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, record: &CertificateRecord) -> CertResult<i64> {
        let result = sqlx::query(
            "INSERT INTO certificates (domain, create_time, expire_time, public_key, private_key, cert_path, key_path, cert_source) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.domain)
        .bind(record.create_time)
        .bind(record.expire_time)
        .bind(&record.public_key)
        .bind(&record.private_key)
        .bind(&record.cert_path)
        .bind(&record.key_path)
        .bind(record.cert_source.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, record: &CertificateRecord) -> CertResult<()> {
        let result = sqlx::query(
            "UPDATE certificates SET domain = ?, create_time = ?, expire_time = ?, public_key = ?, \
             private_key = ?, cert_path = ?, key_path = ?, cert_source = ? WHERE id = ?",
        )
        .bind(&record.domain)
        .bind(record.create_time)
        .bind(record.expire_time)
        .bind(&record.public_key)
        .bind(&record.private_key)
        .bind(&record.cert_path)
        .bind(&record.key_path)
        .bind(record.cert_source.as_str())
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CertError::NotFound(format!("certificate id {}", record.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> CertResult<()> {
        let result = sqlx::query("DELETE FROM certificates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CertError::NotFound(format!("certificate id {}", id)));
        }
        Ok(())
    }

    async fn get(&self, id: i64) -> CertResult<CertificateRecord> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| CertError::NotFound(format!("certificate id {}", id)))?
            .try_into()
    }

    async fn get_all(&self) -> CertResult<Vec<CertificateRecord>> {
        let sql = format!("{} ORDER BY id", SELECT_COLUMNS);
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(CertificateRecord::try_from).collect()
    }

    async fn get_by_domain(&self, domain: &str) -> CertResult<CertificateRecord> {
        let sql = format!("{} WHERE domain = ? ORDER BY id LIMIT 1", SELECT_COLUMNS);
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| CertError::NotFound(format!("domain {}", domain)))?
            .try_into()
    }

    fn backend_name(&self) -> &str {
        "sqlite"
    }
}
