//! X.509 certificate inspection

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::*;

use crate::error::{CertError, CertResult};

/// Read-only view of the fields we care about in an end-entity certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject_common_name: Option<String>,
    pub issuer_organization: Option<String>,
    pub issuer_common_name: Option<String>,
    /// Decimal serial number
    pub serial_number: String,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    /// Subject Alternative Name DNS entries in certificate order
    pub dns_names: Vec<String>,
}

impl CertificateInfo {
    pub fn create_time(&self) -> i64 {
        self.not_before.timestamp()
    }

    pub fn expire_time(&self) -> i64 {
        self.not_after.timestamp()
    }
}

impl fmt::Display for CertificateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "issuer: {} {}",
            self.issuer_organization.as_deref().unwrap_or("-"),
            self.issuer_common_name.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "subject CN: {}", self.subject_common_name.as_deref().unwrap_or("-"))?;
        writeln!(f, "not before: {}", self.not_before.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "not after: {}", self.not_after.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "signature algorithm: {}", self.signature_algorithm)?;
        writeln!(f, "public key algorithm: {}", self.public_key_algorithm)?;
        write!(f, "serial: {}", self.serial_number)?;
        if !self.dns_names.is_empty() {
            write!(f, "\ndns names: {}", self.dns_names.join(","))?;
        }
        Ok(())
    }
}

/// Parse the first PEM block of `pem` as an X.509 certificate
pub fn parse_certificate(pem: &[u8]) -> CertResult<CertificateInfo> {
    let der = first_certificate_der(pem)?;
    inspect_der(&der)
}

/// Decode the first PEM block only; any label other than `CERTIFICATE` fails
fn first_certificate_der(pem: &[u8]) -> CertResult<Vec<u8>> {
    let (_, block) = x509_parser::pem::parse_x509_pem(pem)
        .map_err(|e| CertError::Parse(format!("Failed to read PEM data: {}", e)))?;

    if block.label != "CERTIFICATE" {
        return Err(CertError::Parse(format!(
            "first PEM block is {}, not a certificate",
            block.label
        )));
    }
    Ok(block.contents)
}

fn inspect_der(der: &[u8]) -> CertResult<CertificateInfo> {
    let (_, x509) = parse_x509_certificate(der)
        .map_err(|e| CertError::Parse(format!("Failed to parse X.509 certificate: {}", e)))?;

    let not_before = asn1_to_utc(&x509.validity().not_before)?;
    let not_after = asn1_to_utc(&x509.validity().not_after)?;

    let subject_common_name = x509
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    let issuer_common_name = x509
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    let issuer_organization = x509
        .issuer()
        .iter_organization()
        .next()
        .and_then(|o| o.as_str().ok())
        .map(str::to_string);

    let mut dns_names = Vec::new();
    for ext in x509.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::DNSName(dns) = name {
                    dns_names.push(dns.to_string());
                }
            }
        }
    }

    Ok(CertificateInfo {
        not_before,
        not_after,
        subject_common_name,
        issuer_organization,
        issuer_common_name,
        serial_number: x509.tbs_certificate.serial.to_string(),
        signature_algorithm: signature_algorithm_name(
            &x509.signature_algorithm.algorithm.to_id_string(),
        ),
        public_key_algorithm: public_key_algorithm_name(
            &x509.public_key().algorithm.algorithm.to_id_string(),
        ),
        dns_names,
    })
}

fn asn1_to_utc(time: &ASN1Time) -> CertResult<DateTime<Utc>> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| CertError::Parse("certificate validity time out of range".to_string()))
}

fn signature_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.5" => "SHA1-RSA",
        "1.2.840.113549.1.1.11" => "SHA256-RSA",
        "1.2.840.113549.1.1.12" => "SHA384-RSA",
        "1.2.840.113549.1.1.13" => "SHA512-RSA",
        "1.2.840.113549.1.1.10" => "RSA-PSS",
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256",
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384",
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512",
        "1.3.101.112" => "Ed25519",
        other => return other.to_string(),
    }
    .to_string()
}

fn public_key_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.1" => "RSA",
        "1.2.840.10045.2.1" => "ECDSA",
        "1.3.101.112" => "Ed25519",
        other => return other.to_string(),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invalid_certificate() {
        let result = parse_certificate(b"NOT A PEM FILE");
        assert!(matches!(result, Err(CertError::Parse(_))));
    }

    #[test]
    fn test_parse_empty_certificate() {
        let result = parse_certificate(b"");
        assert!(matches!(result, Err(CertError::Parse(_))));
    }

    #[test]
    fn test_parse_garbage_inside_pem_block() {
        let pem = b"-----BEGIN CERTIFICATE-----\nAAECAwQF\n-----END CERTIFICATE-----\n";
        let result = parse_certificate(pem);
        assert!(matches!(result, Err(CertError::Parse(_))));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(signature_algorithm_name("1.2.840.113549.1.1.11"), "SHA256-RSA");
        assert_eq!(signature_algorithm_name("1.2.3.4"), "1.2.3.4");
        assert_eq!(public_key_algorithm_name("1.2.840.10045.2.1"), "ECDSA");
    }
}
