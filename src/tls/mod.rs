// Certificate acquisition, inspection, deployment and renewal

pub mod deployer;
pub mod parser;
pub mod provider;
pub mod reload;
pub mod renewal;

pub use deployer::FileDeployer;
pub use parser::{parse_certificate, CertificateInfo};
pub use provider::{CertBundle, CertProvider, CertSource, ProviderChain};
pub use reload::{CommandReload, ReloadHook};
pub use renewal::{DomainOutcome, PassReport, RenewalConfig, RenewalEngine};
