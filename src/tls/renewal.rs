//! Certificate reconciliation: renewal passes, registration and removal

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::deployer::FileDeployer;
use super::parser::{parse_certificate, CertificateInfo};
use super::provider::{CertBundle, ProviderChain};
use super::reload::ReloadHook;
use crate::config::RenewalSettings;
use crate::error::{CertError, CertResult};
use crate::store::{CertificateRecord, RecordStore};

/// Configuration for certificate renewal
#[derive(Debug, Clone)]
pub struct RenewalConfig {
    /// How often the scheduler runs a pass (in seconds)
    pub check_interval_secs: u64,

    /// How many days before expiration a certificate becomes due
    pub window_days: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 24 * 60 * 60,
            window_days: 10,
        }
    }
}

impl From<&RenewalSettings> for RenewalConfig {
    fn from(settings: &RenewalSettings) -> Self {
        Self {
            check_interval_secs: settings.check_interval_secs,
            window_days: settings.window_days,
        }
    }
}

/// What happened to one domain during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainOutcome {
    /// Outside the renewal window, no provider was called
    NotDue,
    /// Provider returned the material already on record
    Unchanged,
    /// Record rewritten and files deployed
    Updated,
    Failed(String),
}

impl fmt::Display for DomainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainOutcome::NotDue => f.write_str("not due"),
            DomainOutcome::Unchanged => f.write_str("unchanged"),
            DomainOutcome::Updated => f.write_str("updated"),
            DomainOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of one "update all" pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// (domain, outcome) in store order
    pub outcomes: Vec<(String, DomainOutcome)>,
    /// Whether the reload hook ran
    pub reloaded: bool,
}

impl PassReport {
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, DomainOutcome::Updated))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DomainOutcome::Failed(_)))
    }

    pub fn outcome(&self, domain: &str) -> Option<&DomainOutcome> {
        self.outcomes
            .iter()
            .find(|(d, _)| d == domain)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&DomainOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Reconciles stored certificate records against the remote providers
pub struct RenewalEngine {
    store: Arc<dyn RecordStore>,
    providers: ProviderChain,
    deployer: FileDeployer,
    reload: Arc<dyn ReloadHook>,
    config: RenewalConfig,
    /// Held for the duration of a pass so two passes never interleave
    pass_lock: Mutex<()>,
}

impl RenewalEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        providers: ProviderChain,
        deployer: FileDeployer,
        reload: Arc<dyn ReloadHook>,
        config: RenewalConfig,
    ) -> Self {
        Self {
            store,
            providers,
            deployer,
            reload,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RenewalConfig {
        &self.config
    }

    /// Start the renewal background loop
    ///
    /// Runs one pass every `check_interval_secs`; a failed pass is logged and
    /// the loop carries on.
    pub async fn start(&self) {
        info!(
            "Starting certificate renewal scheduler (check interval: {}s, renewal window: {} days before expiry)",
            self.config.check_interval_secs, self.config.window_days
        );

        let mut timer = interval(StdDuration::from_secs(self.config.check_interval_secs));
        timer.tick().await; // Skip first immediate tick

        loop {
            timer.tick().await;

            debug!("Running scheduled renewal pass");

            if let Err(e) = self.update_all().await {
                error!("Renewal pass failed: {}", e);
            }
        }
    }

    /// Check every record and renew those inside the renewal window.
    ///
    /// Per-domain failures are recorded in the report and do not stop the
    /// pass. The reload hook runs once at the end when at least one domain
    /// was updated; its failure is returned, but nothing already written is
    /// undone.
    pub async fn update_all(&self) -> CertResult<PassReport> {
        let _pass = self
            .pass_lock
            .try_lock()
            .map_err(|_| CertError::PassInProgress)?;

        let records = self.store.get_all().await?;
        let now = Utc::now();
        let mut report = PassReport::default();

        for record in records {
            let outcome = if !record.is_due(self.config.window_days, now) {
                let days_left = record
                    .expires_at()
                    .map(|at| (at - now).num_days())
                    .unwrap_or_default();
                debug!(
                    "Certificate for {} is valid for {} more days, skipping",
                    record.domain, days_left
                );
                DomainOutcome::NotDue
            } else {
                info!(
                    "Certificate for {} is due for renewal (expires: {})",
                    record.domain,
                    record
                        .expires_at()
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| record.expire_time.to_string())
                );
                match self.refresh(&record).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Failed to renew certificate for {}: {}", record.domain, e);
                        DomainOutcome::Failed(e.to_string())
                    }
                }
            };
            report.outcomes.push((record.domain, outcome));
        }

        info!(
            "Renewal pass complete: {} checked, {} updated, {} failed",
            report.outcomes.len(),
            report.updated(),
            report.failed()
        );

        if report.updated() > 0 {
            self.reload.reload().await?;
            report.reloaded = true;
        } else {
            debug!("No certificates changed, skipping reload");
        }

        Ok(report)
    }

    /// Renew one domain now. Errors propagate to the caller.
    ///
    /// Without `force` a domain outside the renewal window is left alone.
    pub async fn renew_domain(&self, domain: &str, force: bool) -> CertResult<DomainOutcome> {
        let _pass = self
            .pass_lock
            .try_lock()
            .map_err(|_| CertError::PassInProgress)?;

        let record = self.store.get_by_domain(domain).await?;

        if !force && !record.is_due(self.config.window_days, Utc::now()) {
            info!("Certificate for {} is not due for renewal", domain);
            return Ok(DomainOutcome::NotDue);
        }

        let outcome = self.refresh(&record).await?;
        if outcome == DomainOutcome::Updated {
            self.reload.reload().await?;
        }
        Ok(outcome)
    }

    /// Obtain a certificate for a new domain and start managing it.
    ///
    /// Providers are tried in fallback order. The files are written right
    /// after the insert; the web server is not reloaded.
    pub async fn register(
        &self,
        domain: &str,
        cert_path: &str,
        key_path: &str,
    ) -> CertResult<CertificateRecord> {
        let domain = domain.trim();
        let _pass = self.pass_lock.lock().await;

        match self.store.get_by_domain(domain).await {
            Ok(_) => return Err(CertError::DuplicateDomain(domain.to_string())),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let (source, bundle) = self.providers.fetch_any(domain).await?;
        let info = inspect(domain, &bundle)?;

        let mut record = CertificateRecord {
            id: 0,
            domain: domain.to_string(),
            create_time: info.create_time(),
            expire_time: info.expire_time(),
            public_key: bundle.certificate,
            private_key: bundle.private_key,
            cert_path: cert_path.to_string(),
            key_path: key_path.to_string(),
            cert_source: source,
        };
        record.id = self.store.insert(&record).await?;

        info!(
            "Registered {} (id {}, source {}, expires {})",
            record.domain,
            record.id,
            record.cert_source,
            info.not_after.to_rfc3339()
        );

        self.deployer.deploy(&record).await?;
        Ok(record)
    }

    /// Stop managing a record. Deployed files are left in place.
    pub async fn remove(&self, id: i64) -> CertResult<CertificateRecord> {
        let _pass = self.pass_lock.lock().await;

        let record = self.store.get(id).await?;
        self.store.delete(id).await?;
        info!("Removed certificate record {} ({})", id, record.domain);
        Ok(record)
    }

    /// All managed records; status is derived from `expire_time` by the caller
    pub async fn records(&self) -> CertResult<Vec<CertificateRecord>> {
        self.store.get_all().await
    }

    /// Fetch, compare and, when the material changed, persist and deploy
    async fn refresh(&self, record: &CertificateRecord) -> CertResult<DomainOutcome> {
        let provider =
            self.providers
                .get(record.cert_source)
                .ok_or_else(|| CertError::NoProviderAvailable {
                    domain: record.domain.clone(),
                    reason: format!("provider '{}' is not enabled", record.cert_source),
                })?;

        let bundle = provider.fetch(&record.domain).await?;
        let info = inspect(&record.domain, &bundle)?;

        if record.same_material(&bundle.certificate, &bundle.private_key) {
            info!(
                "Provider {} returned the certificate already on record for {}",
                provider.provider_name(),
                record.domain
            );
            return Ok(DomainOutcome::Unchanged);
        }

        let updated = CertificateRecord {
            id: record.id,
            domain: record.domain.clone(),
            create_time: info.create_time(),
            expire_time: info.expire_time(),
            public_key: bundle.certificate,
            private_key: bundle.private_key,
            cert_path: record.cert_path.clone(),
            key_path: record.key_path.clone(),
            cert_source: record.cert_source,
        };

        self.store.update(&updated).await?;
        self.deployer.deploy(&updated).await?;

        info!(
            "Certificate for {} renewed, now valid until {}",
            updated.domain,
            info.not_after.to_rfc3339()
        );
        Ok(DomainOutcome::Updated)
    }
}

/// Parse fetched material and reject an inverted validity window
fn inspect(domain: &str, bundle: &CertBundle) -> CertResult<CertificateInfo> {
    let info = parse_certificate(bundle.certificate.as_bytes())?;

    if info.expire_time() <= info.create_time() {
        warn!("Certificate for {} has an empty validity window", domain);
        return Err(CertError::Parse(format!(
            "certificate for {} expires ({}) before it becomes valid ({})",
            domain, info.not_after, info.not_before
        )));
    }

    info!("Fetched certificate for {}:\n{}", domain, info);
    Ok(info)
}
