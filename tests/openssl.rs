mod util;

use std::fs;
use std::process::Command;

use csrkit::csr::params::DesiredState;
use csrkit::reconcile::{CsrReconciler, ReconcileOptions};
use der::Encode;

fn generate_pem(key: &str) -> String {
    let mut reconciler = CsrReconciler::from_params(&util::server_params(key)).unwrap();
    reconciler
        .reconcile(ReconcileOptions {
            emit_csr: true,
            check_mode: false,
        })
        .unwrap()
        .csr
        .expect("CSR should be emitted")
}

#[test]
fn test_openssl_validate_csr() {
    let csr_pem = generate_pem("p256.pem");

    // Save the CSR to a temporary file
    let csr_path = std::env::temp_dir().join("csrkit_test_server.csr");
    fs::write(&csr_path, csr_pem).expect("Failed to write CSR");

    // Use OpenSSL CLI to verify and print the generated request
    let output = Command::new("openssl")
        .arg("req")
        .arg("-in")
        .arg(&csr_path)
        .arg("-noout")
        .arg("-text")
        .arg("-verify")
        .output()
        .expect("Failed to execute OpenSSL command");

    assert!(
        output.status.success(),
        "OpenSSL command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output_text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    assert!(output_text.contains("verify OK"), "Signature did not verify");
    assert!(output_text.contains("example.com"), "Subject field is incorrect");
    assert!(
        output_text.contains("DNS:example.com, DNS:www.example.com, IP Address:192.0.2.1"),
        "Subject alternative name is incorrect"
    );
    assert!(
        output_text.contains("X509v3 Key Usage: critical"),
        "Key usage should be critical"
    );
    assert!(
        output_text.contains("Digital Signature, Key Encipherment"),
        "Key usage is incorrect"
    );
    assert!(
        output_text.contains("TLS Web Server Authentication"),
        "Extended key usage is incorrect"
    );
    assert!(
        output_text.contains("status_request"),
        "OCSP must-staple is missing"
    );
    assert!(
        output_text.contains("Signature Algorithm: ecdsa-with-SHA256"),
        "Signature Algorithm field is incorrect"
    );

    // Clean up temporary files
    fs::remove_file(&csr_path).expect("Failed to remove test CSR");
}

#[test]
fn test_openssl_crate_validate_csr() {
    use openssl::x509::X509Req;

    for key_name in util::KEY_FIXTURES {
        let csr_pem = generate_pem(key_name);
        let request = X509Req::from_pem(csr_pem.as_bytes()).expect("Failed to parse PEM");

        // The request is self-signed by the fixture key
        let public_key = request.public_key().unwrap();
        assert!(request.verify(&public_key).unwrap(), "{key_name}: signature");
        assert_eq!(
            public_key.public_key_to_der().unwrap(),
            util::load_key(key_name).as_spki().unwrap().to_der().unwrap(),
            "{key_name}: public key"
        );

        // Check subject
        let common_name = request
            .subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap();
        assert_eq!(common_name.to_string(), "example.com", "Subject CN mismatch");

        // Check version
        assert_eq!(request.version(), 0, "CSR version should be 1 (0-based index)");

        assert_eq!(request.extensions().unwrap().len(), 4);
    }
}

#[test]
fn test_openssl_request_without_extensions() {
    use openssl::x509::X509Req;

    let key = util::load_key("rsa2048.pem");
    let desired = DesiredState::with_subject(vec![(
        csrkit::oid::ORGANIZATION_NAME,
        "Example Corp".to_string(),
    )]);
    let csr = csrkit::csr::builder::CsrBuilder::default()
        .build(&desired, &key)
        .unwrap();

    let request = X509Req::from_der(&csr.to_der().unwrap()).expect("Failed to parse DER");
    assert!(request.verify(&request.public_key().unwrap()).unwrap());
    let organization = request
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::ORGANIZATIONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap();
    assert_eq!(organization.to_string(), "Example Corp");
}
