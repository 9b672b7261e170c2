//! West certificate provider
//!
//! `GET {api_url}/info/get-cert` authenticated by an MD5 token over
//! username, API key and the current Unix time. Success is a ZIP archive
//! holding the PEM files; errors are JSON `{code, msg}`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{md5_hex, CertBundle, CertProvider, CertSource};
use crate::error::{CertError, CertResult};
use crate::settings::SettingsStore;

pub const WEST_SECTION: &str = "third.west";
pub const WEST_API_ENDPOINT: &str = "https://api.west.cn/newapi/ssl";

/// Query authentication parameters: username, time, token
pub fn auth_params(username: &str, api_key: &str, timestamp: i64) -> [(&'static str, String); 3] {
    let token = md5_hex(&format!("{}{}{}", username, api_key, timestamp));
    [
        ("username", username.to_string()),
        ("time", timestamp.to_string()),
        ("token", token),
    ]
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    #[serde(default)]
    msg: String,
}

/// A raw response, classified before anything is extracted from it
#[derive(Debug)]
pub enum WestResponse {
    Failure { code: i64, msg: String },
    Archive(Bytes),
    Unknown { content_type: String, body: String },
}

impl WestResponse {
    pub fn classify(status: StatusCode, content_type: &str, body: Bytes) -> CertResult<Self> {
        let is_json = content_type.contains("application/json");

        if !status.is_success() || is_json {
            match serde_json::from_slice::<ErrorBody>(&body) {
                Ok(err) => return Ok(WestResponse::Failure { code: err.code, msg: err.msg }),
                Err(e) if is_json => {
                    return Err(CertError::Format(format!("invalid JSON from west: {}", e)))
                }
                Err(e) => {
                    debug!("west error body was not JSON: {}", e);
                    return Ok(WestResponse::Unknown {
                        content_type: format!("{} (HTTP {})", content_type, status.as_u16()),
                        body: String::from_utf8_lossy(&body).into_owned(),
                    });
                }
            }
        }

        if content_type.contains("application/zip") {
            return Ok(WestResponse::Archive(body));
        }

        Ok(WestResponse::Unknown {
            content_type: content_type.to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    pub fn into_bundle(self) -> CertResult<CertBundle> {
        match self {
            WestResponse::Failure { code, msg } => Err(CertError::Provider { code, message: msg }),
            WestResponse::Archive(bytes) => extract_archive(&bytes),
            WestResponse::Unknown { content_type, body } => {
                let preview: String = body.chars().take(200).collect();
                Err(CertError::Format(format!(
                    "unexpected content type '{}': {}",
                    content_type, preview
                )))
            }
        }
    }
}

/// Spool the archive to a temporary file and pull out the PEM members.
/// The temporary file is removed when this returns, on every path.
pub fn extract_archive(bytes: &[u8]) -> CertResult<CertBundle> {
    extract_archive_in(bytes, &std::env::temp_dir())
}

/// `extract_archive` with the spool file created under `spool_dir`
pub fn extract_archive_in(bytes: &[u8], spool_dir: &Path) -> CertResult<CertBundle> {
    let mut spool = tempfile::Builder::new()
        .prefix("sslkeeper-west-")
        .suffix(".zip")
        .tempfile_in(spool_dir)?;
    spool.write_all(bytes)?;
    spool.flush()?;
    spool.rewind()?;

    read_members(spool.as_file_mut())
}

fn read_members<R: Read + Seek>(reader: R) -> CertResult<CertBundle> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| CertError::Format(format!("corrupt certificate archive: {}", e)))?;

    let mut crt = None;
    let mut pem = None;
    let mut key = None;

    for i in 0..archive.len() {
        let mut member = archive
            .by_index(i)
            .map_err(|e| CertError::Format(format!("corrupt certificate archive: {}", e)))?;
        if member.is_dir() {
            continue;
        }
        let member_name = member.name().to_string();
        let name = member_name.to_ascii_lowercase();
        let slot = if name.ends_with(".crt") {
            &mut crt
        } else if name.ends_with(".pem") {
            &mut pem
        } else if name.ends_with(".key") {
            &mut key
        } else {
            continue;
        };

        let mut content = String::new();
        member.read_to_string(&mut content).map_err(|e| {
            CertError::Format(format!("unreadable archive member {}: {}", member_name, e))
        })?;
        debug!("found {} ({} bytes) in west archive", member_name, content.len());
        *slot = Some(content);
    }

    let (certificate, intermediate) = match (crt, pem) {
        (Some(crt), pem) => (crt, pem),
        (None, Some(pem)) => (pem, None),
        (None, None) => {
            return Err(CertError::Format(
                "no certificate member (.crt or .pem) in archive".to_string(),
            ))
        }
    };
    let private_key =
        key.ok_or_else(|| CertError::Format("no .key member in archive".to_string()))?;

    Ok(CertBundle {
        certificate,
        private_key,
        intermediate,
    })
}

pub struct WestProvider {
    settings: Arc<dyn SettingsStore>,
    client: Client,
}

impl WestProvider {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            client: Client::new(),
        }
    }

    fn api_url(&self) -> CertResult<String> {
        Ok(match self.settings.get(WEST_SECTION, "api_url")? {
            Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
            _ => WEST_API_ENDPOINT.to_string(),
        })
    }
}

impl std::fmt::Debug for WestProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WestProvider")
            .field("section", &WEST_SECTION)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

#[async_trait]
impl CertProvider for WestProvider {
    async fn fetch(&self, domain: &str) -> CertResult<CertBundle> {
        let username = self.settings.require(WEST_SECTION, "username")?;
        let api_key = self.settings.require(WEST_SECTION, "api_key")?;
        let url = format!("{}/info/get-cert", self.api_url()?);

        let mut query = vec![
            ("type", "PEM_Nginx".to_string()),
            ("domain", domain.to_string()),
        ];
        query.extend(auth_params(&username, &api_key, Utc::now().timestamp()));

        debug!("Requesting certificate for {} from {}", domain, url);
        let response = self
            .client
            .get(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded;charset=utf-8")
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = response.bytes().await?;

        let bundle = WestResponse::classify(status, &content_type, body)?.into_bundle()?;
        info!("Extracted certificate archive for {}", domain);
        Ok(bundle)
    }

    fn source(&self) -> CertSource {
        CertSource::West
    }

    fn provider_name(&self) -> &str {
        "West"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::FileOptions;

    fn build_zip(members: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, content) in members {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_auth_params() {
        let params = auth_params("alice", "k3y", 1_700_000_000);
        assert_eq!(params[0], ("username", "alice".to_string()));
        assert_eq!(params[1], ("time", "1700000000".to_string()));
        assert_eq!(params[2].1, md5_hex("alicek3y1700000000"));
    }

    #[test]
    fn test_extract_archive_members() {
        let zip = build_zip(&[
            ("example.com/example.com.crt", "CRT"),
            ("example.com/example.com.pem", "PEM"),
            ("example.com/example.com.key", "KEY"),
            ("example.com/readme.txt", "ignored"),
        ]);
        let bundle = extract_archive(&zip).unwrap();
        assert_eq!(bundle.certificate, "CRT");
        assert_eq!(bundle.intermediate.as_deref(), Some("PEM"));
        assert_eq!(bundle.private_key, "KEY");
    }

    #[test]
    fn test_extract_archive_uses_pem_without_crt() {
        let zip = build_zip(&[("site.pem", "PEM"), ("site.key", "KEY")]);
        let bundle = extract_archive(&zip).unwrap();
        assert_eq!(bundle.certificate, "PEM");
        assert!(bundle.intermediate.is_none());
    }

    #[test]
    fn test_extract_archive_without_certificate() {
        let zip = build_zip(&[("site.key", "KEY")]);
        assert!(matches!(extract_archive(&zip), Err(CertError::Format(_))));
    }

    #[test]
    fn test_extract_corrupt_archive() {
        assert!(matches!(
            extract_archive(b"PK\x03\x04 definitely not a zip"),
            Err(CertError::Format(_))
        ));
    }

    fn spool_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_spool_file_removed_after_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let zip = build_zip(&[("site.crt", "CRT"), ("site.key", "KEY")]);

        let bundle = extract_archive_in(&zip, dir.path()).unwrap();
        assert_eq!(bundle.certificate, "CRT");
        assert_eq!(spool_entries(dir.path()), 0);
    }

    #[test]
    fn test_spool_file_removed_after_failure() {
        let dir = tempfile::tempdir().unwrap();

        let corrupt = extract_archive_in(b"PK\x03\x04 definitely not a zip", dir.path());
        assert!(matches!(corrupt, Err(CertError::Format(_))));
        assert_eq!(spool_entries(dir.path()), 0);

        let keyless = extract_archive_in(&build_zip(&[("site.crt", "CRT")]), dir.path());
        assert!(matches!(keyless, Err(CertError::Format(_))));
        assert_eq!(spool_entries(dir.path()), 0);
    }

    #[test]
    fn test_classify_json_failure() {
        let body = Bytes::from_static(br#"{"code":500,"msg":"certificate not issued"}"#);
        let response = WestResponse::classify(StatusCode::OK, "application/json", body).unwrap();
        assert!(matches!(response, WestResponse::Failure { code: 500, .. }));
    }

    #[test]
    fn test_classify_error_status_with_json() {
        let body = Bytes::from_static(br#"{"code":403,"msg":"bad token"}"#);
        let response =
            WestResponse::classify(StatusCode::FORBIDDEN, "text/plain", body).unwrap();
        match response.into_bundle() {
            Err(CertError::Provider { code, message }) => {
                assert_eq!(code, 403);
                assert_eq!(message, "bad token");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_classify_html() {
        let body = Bytes::from_static(b"<html>maintenance</html>");
        let response = WestResponse::classify(StatusCode::OK, "text/html", body).unwrap();
        assert!(matches!(response.into_bundle(), Err(CertError::Format(_))));
    }
}
