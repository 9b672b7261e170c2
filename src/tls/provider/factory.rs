//! Factory for building the provider chain from configuration

use std::sync::Arc;

use super::{CertProvider, CertSource, CertdProvider, ProviderChain, WestProvider};
use crate::error::CertResult;
use crate::settings::SettingsStore;

/// Create a provider instance for one source
pub fn create_provider(
    source: CertSource,
    settings: Arc<dyn SettingsStore>,
) -> Arc<dyn CertProvider> {
    match source {
        CertSource::Certd => Arc::new(CertdProvider::new(settings)),
        CertSource::West => Arc::new(WestProvider::new(settings)),
    }
}

/// Build the fallback chain in the configured order, dropping repeats
pub fn create_provider_chain(
    order: &[String],
    settings: Arc<dyn SettingsStore>,
) -> CertResult<ProviderChain> {
    let mut sources: Vec<CertSource> = Vec::new();
    for name in order {
        let source: CertSource = name.parse()?;
        if !sources.contains(&source) {
            sources.push(source);
        }
    }

    Ok(ProviderChain::new(
        sources
            .into_iter()
            .map(|source| create_provider(source, settings.clone()))
            .collect(),
    ))
}
