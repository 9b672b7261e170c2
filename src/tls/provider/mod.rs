//! Remote certificate providers and the ordered fallback chain over them

pub mod certd;
pub mod factory;
pub mod west;

pub use certd::CertdProvider;
pub use factory::create_provider_chain;
pub use west::WestProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{CertError, CertResult};

/// Settings keys each provider reads, by section
pub const CREDENTIAL_KEYS: &[(&str, &[&str])] = &[
    (certd::CERTD_SECTION, &["api_url", "key_id", "key_secret"]),
    (west::WEST_SECTION, &["api_url", "username", "api_key"]),
];

/// Which backend supplied a record's certificate material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertSource {
    Certd,
    West,
}

impl CertSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertSource::Certd => "certd",
            CertSource::West => "west",
        }
    }
}

impl fmt::Display for CertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertSource {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "certd" => Ok(CertSource::Certd),
            "west" => Ok(CertSource::West),
            other => Err(CertError::Format(format!("unknown certificate source: {}", other))),
        }
    }
}

/// Certificate material returned by a provider
#[derive(Clone, PartialEq, Eq)]
pub struct CertBundle {
    /// Full-chain certificate, PEM
    pub certificate: String,
    /// Private key, PEM
    pub private_key: String,
    pub intermediate: Option<String>,
}

impl fmt::Debug for CertBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertBundle")
            .field("certificate", &format!("<{} bytes>", self.certificate.len()))
            .field("private_key", &"<REDACTED>")
            .field("intermediate", &self.intermediate.as_ref().map(|i| i.len()))
            .finish()
    }
}

/// A remote service able to hand out the current certificate for a domain
#[async_trait]
pub trait CertProvider: Send + Sync {
    /// Fetch the current certificate bundle for `domain`; no retries
    async fn fetch(&self, domain: &str) -> CertResult<CertBundle>;

    fn source(&self) -> CertSource;

    /// Get provider name for logging
    fn provider_name(&self) -> &str;
}

/// Providers in fallback priority order
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn CertProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn CertProvider>>) -> Self {
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn sources(&self) -> Vec<CertSource> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    /// The provider that owns `source`, used on renewal
    pub fn get(&self, source: CertSource) -> Option<Arc<dyn CertProvider>> {
        self.providers.iter().find(|p| p.source() == source).cloned()
    }

    /// Try each provider in order until one returns a bundle.
    ///
    /// A lone provider's failure is returned unchanged; when several were
    /// tried, `NoProviderAvailable` carries the last error.
    pub async fn fetch_any(&self, domain: &str) -> CertResult<(CertSource, CertBundle)> {
        let mut last_error: Option<CertError> = None;

        for provider in &self.providers {
            match provider.fetch(domain).await {
                Ok(bundle) => {
                    info!(
                        "{} issued certificate material for {}",
                        provider.provider_name(),
                        domain
                    );
                    return Ok((provider.source(), bundle));
                }
                Err(e) => {
                    warn!(
                        "{} could not supply a certificate for {}: {}",
                        provider.provider_name(),
                        domain,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if self.providers.len() == 1 => Err(e),
            Some(e) => Err(CertError::NoProviderAvailable {
                domain: domain.to_string(),
                reason: e.to_string(),
            }),
            None => Err(CertError::NoProviderAvailable {
                domain: domain.to_string(),
                reason: "no providers configured".to_string(),
            }),
        }
    }
}

pub(crate) fn md5_hex(input: &str) -> String {
    use md5::{Digest, Md5};

    let digest = Md5::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProvider {
        source: CertSource,
        result: fn() -> CertResult<CertBundle>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CertProvider for StaticProvider {
        async fn fetch(&self, _domain: &str) -> CertResult<CertBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }

        fn source(&self) -> CertSource {
            self.source
        }

        fn provider_name(&self) -> &str {
            self.source.as_str()
        }
    }

    fn ok_bundle() -> CertResult<CertBundle> {
        Ok(CertBundle {
            certificate: "cert".to_string(),
            private_key: "key".to_string(),
            intermediate: None,
        })
    }

    fn quota_exceeded() -> CertResult<CertBundle> {
        Err(CertError::Provider {
            code: 1,
            message: "quota exceeded".to_string(),
        })
    }

    #[test]
    fn test_cert_source_round_trip() {
        assert_eq!("certd".parse::<CertSource>().unwrap(), CertSource::Certd);
        assert_eq!("WEST".parse::<CertSource>().unwrap(), CertSource::West);
        assert!("letsencrypt".parse::<CertSource>().is_err());
        assert_eq!(CertSource::West.to_string(), "west");
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn test_fetch_any_falls_back_in_order() {
        let first = Arc::new(StaticProvider {
            source: CertSource::Certd,
            result: quota_exceeded,
            calls: AtomicUsize::new(0),
        });
        let second = Arc::new(StaticProvider {
            source: CertSource::West,
            result: ok_bundle,
            calls: AtomicUsize::new(0),
        });
        let chain = ProviderChain::new(vec![first.clone(), second.clone()]);

        let (source, bundle) = chain.fetch_any("example.com").await.unwrap();
        assert_eq!(source, CertSource::West);
        assert_eq!(bundle.private_key, "key");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_any_reports_last_error() {
        let only = Arc::new(StaticProvider {
            source: CertSource::Certd,
            result: quota_exceeded,
            calls: AtomicUsize::new(0),
        });
        let chain = ProviderChain::new(vec![only]);

        match chain.fetch_any("example.com").await {
            Err(CertError::Provider { code, message }) => {
                assert_eq!(code, 1);
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected result: {:?}", other.map(|(s, _)| s)),
        }
    }

    #[tokio::test]
    async fn test_fetch_any_all_failed() {
        let failing = || {
            Arc::new(StaticProvider {
                source: CertSource::Certd,
                result: quota_exceeded,
                calls: AtomicUsize::new(0),
            })
        };
        let chain = ProviderChain::new(vec![failing(), failing()]);

        match chain.fetch_any("example.com").await {
            Err(CertError::NoProviderAvailable { domain, reason }) => {
                assert_eq!(domain, "example.com");
                assert!(reason.contains("quota exceeded"));
            }
            other => panic!("unexpected result: {:?}", other.map(|(s, _)| s)),
        }
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let chain = ProviderChain::default();
        assert!(chain.is_empty());
        assert!(matches!(
            chain.fetch_any("example.com").await,
            Err(CertError::NoProviderAvailable { .. })
        ));
        assert!(chain.get(CertSource::Certd).is_none());
    }
}
