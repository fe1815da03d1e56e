#![allow(dead_code)]

use std::path::PathBuf;

use csrkit::csr::params::CsrParams;
use csrkit::key::{KeyLoader, KeyPair, PrivateKeySource};

pub const KEY_FIXTURES: [&str; 4] = ["rsa2048.pem", "p256.pem", "p384.pem", "ed25519.pem"];

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("Failed to read fixture")
}

pub fn load_key(name: &str) -> KeyPair {
    PrivateKeySource::from_path(fixture_path(name))
        .load()
        .expect("Failed to load key fixture")
}

/// Parameters for a TLS server CSR, signed by the fixture key `key`.
pub fn server_params(key: &str) -> CsrParams {
    CsrParams::builder()
        .privatekey_path(fixture_path(key))
        .country_name("US")
        .organization_name("Example Corp")
        .common_name("example.com")
        .subject_alt_name(vec![
            "DNS:example.com".to_string(),
            "DNS:www.example.com".to_string(),
            "IP:192.0.2.1".to_string(),
        ])
        .key_usage(vec![
            "digitalSignature".to_string(),
            "keyEncipherment".to_string(),
        ])
        .key_usage_critical(true)
        .extended_key_usage(vec!["serverAuth".to_string()])
        .ocsp_must_staple(true)
        .build()
}
