// Integration tests for certificate parsing against openssl-generated fixtures

use sslkeeper::tls::parse_certificate;
use sslkeeper::CertError;
use std::path::PathBuf;

fn read_fixture(filename: &str) -> Vec<u8> {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures/certs");
    path.push(filename);
    std::fs::read(path).unwrap()
}

#[test]
fn test_parse_rsa_certificate() {
    let info = parse_certificate(&read_fixture("example.com.crt")).unwrap();

    assert_eq!(info.subject_common_name.as_deref(), Some("example.com"));
    assert_eq!(info.issuer_organization.as_deref(), Some("Example Org"));
    assert_eq!(info.issuer_common_name.as_deref(), Some("example.com"));
    assert_eq!(info.serial_number, "180310709465294106846940136800801118295375949401");
    assert_eq!(info.signature_algorithm, "SHA256-RSA");
    assert_eq!(info.public_key_algorithm, "RSA");
    assert_eq!(info.not_before.to_rfc3339(), "2026-10-18T22:56:07+00:00");
    assert_eq!(info.not_after.to_rfc3339(), "2036-10-15T22:56:07+00:00");
    assert!(info.expire_time() > info.create_time());
}

#[test]
fn test_dns_names_in_certificate_order() {
    let info = parse_certificate(&read_fixture("example.com.crt")).unwrap();
    assert_eq!(
        info.dns_names,
        vec!["example.com", "www.example.com", "api.example.com"]
    );

    let info = parse_certificate(&read_fixture("test.org.crt")).unwrap();
    assert_eq!(info.dns_names, vec!["test.org", "api.test.org"]);
}

#[test]
fn test_parse_ecdsa_certificate() {
    let info = parse_certificate(&read_fixture("test.org.crt")).unwrap();

    assert_eq!(info.subject_common_name.as_deref(), Some("test.org"));
    assert_eq!(info.signature_algorithm, "ECDSA-SHA256");
    assert_eq!(info.public_key_algorithm, "ECDSA");
}

#[test]
fn test_certificate_without_san() {
    let info = parse_certificate(&read_fixture("nosan.crt")).unwrap();

    assert!(info.dns_names.is_empty());
    assert_eq!(info.subject_common_name.as_deref(), Some("nosan.local"));
    assert_eq!(info.issuer_organization, None);
}

#[test]
fn test_only_first_block_is_read() {
    let mut chain = read_fixture("test.org.crt");
    chain.extend_from_slice(&read_fixture("example.com.crt"));

    let info = parse_certificate(&chain).unwrap();
    assert_eq!(info.subject_common_name.as_deref(), Some("test.org"));
}

#[test]
fn test_private_key_is_not_a_certificate() {
    let result = parse_certificate(&read_fixture("example.com.key"));
    assert!(matches!(result, Err(CertError::Parse(_))));
}

#[test]
fn test_leading_non_certificate_block_is_rejected() {
    let mut bundle =
        b"-----BEGIN CERTIFICATE REQUEST-----\nAAECAwQF\n-----END CERTIFICATE REQUEST-----\n"
            .to_vec();
    bundle.extend_from_slice(&read_fixture("test.org.crt"));

    let result = parse_certificate(&bundle);
    assert!(matches!(result, Err(CertError::Parse(_))));
}

#[test]
fn test_summary_lists_fields() {
    let info = parse_certificate(&read_fixture("example.com.crt")).unwrap();
    let summary = info.to_string();

    assert!(summary.contains("issuer: Example Org example.com"));
    assert!(summary.contains("not after: 2036-10-15 22:56:07"));
    assert!(summary.contains("dns names: example.com,www.example.com,api.example.com"));
}
