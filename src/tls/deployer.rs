//! Writes certificate and key material to the paths a record points at

use std::path::Path;
use tokio::fs;
use tracing::{error, info};

use crate::error::{CertError, CertResult};
use crate::store::CertificateRecord;

#[derive(Debug, Clone, Default)]
pub struct FileDeployer;

impl FileDeployer {
    pub fn new() -> Self {
        Self
    }

    /// Write `public_key` to `cert_path` and `private_key` to `key_path`.
    ///
    /// Both writes are attempted even when the first one fails; the first
    /// failure is reported. Nothing is rolled back and no backup is kept.
    pub async fn deploy(&self, record: &CertificateRecord) -> CertResult<()> {
        let cert_result =
            write_material(&record.domain, &record.cert_path, &record.public_key).await;
        let key_result =
            write_material(&record.domain, &record.key_path, &record.private_key).await;

        cert_result?;
        key_result?;

        info!(
            "Certificate files updated for {} ({}, {})",
            record.domain, record.cert_path, record.key_path
        );
        Ok(())
    }
}

async fn write_material(domain: &str, path: &str, contents: &str) -> CertResult<()> {
    let deploy_err = |source: std::io::Error| CertError::Deploy {
        domain: domain.to_string(),
        path: path.to_string(),
        source,
    };

    let result = async {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, contents).await
    }
    .await;

    result.map_err(|e| {
        error!("Failed to write {} for {}: {}", path, domain, e);
        deploy_err(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::provider::CertSource;

    fn record(cert_path: String, key_path: String) -> CertificateRecord {
        CertificateRecord {
            id: 7,
            domain: "example.com".to_string(),
            create_time: 1_700_000_000,
            expire_time: 1_710_000_000,
            public_key: "CERT".to_string(),
            private_key: "KEY".to_string(),
            cert_path,
            key_path,
            cert_source: CertSource::Certd,
        }
    }

    #[tokio::test]
    async fn test_deploy_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("nginx/ssl/example.com/fullchain.pem");
        let key = dir.path().join("private/example.com.key");

        let r = record(cert.display().to_string(), key.display().to_string());
        FileDeployer::new().deploy(&r).await.unwrap();

        assert_eq!(std::fs::read_to_string(&cert).unwrap(), "CERT");
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "KEY");
    }

    #[tokio::test]
    async fn test_deploy_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("example.com.pem");
        let key = dir.path().join("example.com.key");
        std::fs::write(&cert, "OLD CERT").unwrap();
        std::fs::write(&key, "OLD KEY").unwrap();

        let r = record(cert.display().to_string(), key.display().to_string());
        FileDeployer::new().deploy(&r).await.unwrap();

        assert_eq!(std::fs::read_to_string(&cert).unwrap(), "CERT");
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "KEY");
    }

    #[tokio::test]
    async fn test_key_still_written_when_cert_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();
        let cert = blocker.join("example.com.pem");
        let key = dir.path().join("example.com.key");

        let r = record(cert.display().to_string(), key.display().to_string());
        match FileDeployer::new().deploy(&r).await {
            Err(CertError::Deploy { domain, path, .. }) => {
                assert_eq!(domain, "example.com");
                assert_eq!(path, cert.display().to_string());
            }
            other => panic!("expected deploy error, got {:?}", other),
        }
        assert_eq!(std::fs::read_to_string(&key).unwrap(), "KEY");
    }
}
