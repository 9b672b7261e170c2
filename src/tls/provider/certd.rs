//! Certd certificate provider
//!
//! `POST {api_url}/api/v1/cert/get` authenticated with an `x-certd-token`
//! header, answering with a JSON envelope `{code, msg, data}`.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{md5_hex, CertBundle, CertProvider, CertSource};
use crate::error::{CertError, CertResult};
use crate::settings::SettingsStore;

pub const CERTD_SECTION: &str = "third.certd";

#[derive(Serialize)]
struct TokenClaims<'a> {
    #[serde(rename = "keyId")]
    key_id: &'a str,
    t: i64,
    encrypt: bool,
    #[serde(rename = "signType")]
    sign_type: &'a str,
}

/// Build the time-stamped token sent in `x-certd-token`
pub fn encode_token(key_id: &str, key_secret: &str, timestamp: i64) -> CertResult<String> {
    let claims = serde_json::to_string(&TokenClaims {
        key_id,
        t: timestamp,
        encrypt: false,
        sign_type: "md5",
    })
    .map_err(|e| CertError::Format(format!("failed to encode token claims: {}", e)))?;
    let sign = md5_hex(&format!("{}{}", claims, key_secret));

    let b64 = base64::engine::general_purpose::STANDARD;
    Ok(format!("{}.{}", b64.encode(claims.as_bytes()), b64.encode(sign.as_bytes())))
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default, alias = "message")]
    msg: Option<String>,
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvelopeData {
    /// Full chain
    #[serde(default)]
    crt: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    ic: String,
}

pub struct CertdProvider {
    settings: Arc<dyn SettingsStore>,
    client: Client,
}

impl CertdProvider {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            client: Client::new(),
        }
    }
}

impl std::fmt::Debug for CertdProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertdProvider")
            .field("section", &CERTD_SECTION)
            .field("key_secret", &"<REDACTED>")
            .finish()
    }
}

fn decode_envelope(status: reqwest::StatusCode, body: &[u8]) -> CertResult<CertBundle> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        CertError::Format(format!(
            "certd returned a non-JSON body (HTTP {}): {}",
            status.as_u16(),
            e
        ))
    })?;

    if envelope.code != 0 {
        return Err(CertError::Provider {
            code: envelope.code,
            message: envelope.msg.unwrap_or_default(),
        });
    }

    let data = envelope.data.unwrap_or_default();
    if data.crt.trim().is_empty() || data.key.trim().is_empty() {
        return Err(CertError::Format(
            "certd response is missing the certificate or private key".to_string(),
        ));
    }

    Ok(CertBundle {
        certificate: data.crt,
        private_key: data.key,
        intermediate: if data.ic.trim().is_empty() { None } else { Some(data.ic) },
    })
}

#[async_trait]
impl CertProvider for CertdProvider {
    async fn fetch(&self, domain: &str) -> CertResult<CertBundle> {
        let api_url = self.settings.require(CERTD_SECTION, "api_url")?;
        let key_id = self.settings.require(CERTD_SECTION, "key_id")?;
        let key_secret = self.settings.require(CERTD_SECTION, "key_secret")?;

        let token = encode_token(&key_id, &key_secret, Utc::now().timestamp())?;
        let url = format!("{}/api/v1/cert/get", api_url.trim_end_matches('/'));
        debug!("Requesting certificate for {} from {}", domain, url);

        let response = self
            .client
            .post(&url)
            .header("x-certd-token", token)
            .json(&serde_json::json!({ "domains": domain }))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        decode_envelope(status, &body)
    }

    fn source(&self) -> CertSource {
        CertSource::Certd
    }

    fn provider_name(&self) -> &str {
        "Certd"
    }
}
