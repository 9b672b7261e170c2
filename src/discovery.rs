//! Discovery of TLS sites in nginx configuration files

use glob::glob;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CertError, CertResult};

/// Places nginx configuration commonly lives, including panel-managed vhosts
pub const DEFAULT_NGINX_PATHS: &[&str] = &[
    "/www/server/panel/vhost/nginx/*.conf",
    "/etc/nginx/nginx.conf",
    "/etc/nginx/conf.d/*.conf",
    "/etc/nginx/sites-enabled/*",
    "/usr/local/nginx/conf/nginx.conf",
    "/usr/local/etc/nginx/nginx.conf",
];

/// A TLS server block found in configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSite {
    /// First name listed in `server_name`
    pub domain: String,
    pub cert_path: String,
    pub key_path: String,
    /// File the directives were read from
    pub source: PathBuf,
}

/// Compiled directive matchers
pub struct NginxScanner {
    server_name: Regex,
    ssl_certificate: Regex,
    ssl_certificate_key: Regex,
}

impl NginxScanner {
    pub fn new() -> CertResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| CertError::Format(format!("invalid directive pattern: {}", e)))
        };
        Ok(Self {
            server_name: compile(r"server_name\s+([^;]+);")?,
            // `\s` after the name keeps `ssl_certificate_key` out of this one
            ssl_certificate: compile(r"ssl_certificate\s+([^;]+);")?,
            ssl_certificate_key: compile(r"ssl_certificate_key\s+([^;]+);")?,
        })
    }

    /// Pair the n-th `server_name`, `ssl_certificate` and
    /// `ssl_certificate_key` directives of one file.
    ///
    /// Pairing is positional, so a plain-HTTP server block ahead of a TLS
    /// block shifts the pairing.
    pub fn parse(&self, content: &str, source: &Path) -> Vec<DiscoveredSite> {
        let capture = |re: &Regex| -> Vec<String> {
            re.captures_iter(content)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .collect()
        };

        let names = capture(&self.server_name);
        let certs = capture(&self.ssl_certificate);
        let keys = capture(&self.ssl_certificate_key);

        names
            .iter()
            .zip(certs.iter())
            .zip(keys.iter())
            .filter_map(|((name, cert), key)| {
                let domain = name.split_whitespace().next()?;
                Some(DiscoveredSite {
                    domain: domain.to_string(),
                    cert_path: cert.clone(),
                    key_path: key.clone(),
                    source: source.to_path_buf(),
                })
            })
            .collect()
    }

    pub fn scan_file(&self, path: &Path) -> CertResult<Vec<DiscoveredSite>> {
        let content = fs::read_to_string(path)?;
        let sites = self.parse(&content, path);
        debug!("{} TLS site(s) in {}", sites.len(), path.display());
        Ok(sites)
    }
}

/// Scan plain file paths and glob patterns (`*`, `?`, `[..]`, also in
/// directory components).
///
/// Missing files are skipped; unreadable ones are logged and skipped. A
/// malformed pattern is a `Format` error.
pub fn scan_paths<S: AsRef<str>>(patterns: &[S]) -> CertResult<Vec<DiscoveredSite>> {
    let scanner = NginxScanner::new()?;
    let mut sites = Vec::new();

    for pattern in patterns {
        for path in expand_pattern(pattern.as_ref())? {
            info!("Parsing nginx configuration: {}", path.display());
            match scanner.scan_file(&path) {
                Ok(found) => {
                    for site in &found {
                        info!(
                            "Found {} (certificate: {}, key: {})",
                            site.domain, site.cert_path, site.key_path
                        );
                    }
                    sites.extend(found);
                }
                Err(e) => warn!("Failed to read {}: {}", path.display(), e),
            }
        }
    }

    Ok(sites)
}

/// Existing files matching one glob pattern, in the order `glob` yields them
fn expand_pattern(pattern: &str) -> CertResult<Vec<PathBuf>> {
    let paths = glob(pattern)
        .map_err(|e| CertError::Format(format!("invalid pattern '{}': {}", pattern, e)))?;

    Ok(paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|p| p.is_file())
        .collect())
}
