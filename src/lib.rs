//! # CsrKit - Declarative Certificate Signing Request Reconciliation
//!
//! CsrKit decides whether an existing PKCS#10 certificate signing request already
//! satisfies a desired set of subject and extension attributes for a given private key,
//! and deterministically rebuilds the request when it does not. It is built entirely on
//! rustcrypto libraries.
//!
//! ## Supported Key Types
//!
//! - **RSA**: PKCS#1 v1.5 signatures with SHA-256, SHA-384 or SHA-512
//! - **ECDSA**: P-256 and P-384 curves
//! - **Ed25519**: signs without a separate digest
//!
//! Keys are read from PKCS#8 (optionally encrypted) or PKCS#1 PEM, or from DER.
//!
//! ## Managed Extensions
//!
//! Subject alternative name, key usage, extended key usage, basic constraints, OCSP
//! must-staple (TLS feature), name constraints, subject and authority key identifiers and
//! CRL distribution points. Each is compared with its own semantics: name lists as sets,
//! key usage flags exactly, distribution points in order, criticality where it matters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use csrkit::csr::params::CsrParams;
//! use csrkit::reconcile::{CsrReconciler, ReconcileOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let params = CsrParams::builder()
//!     .privatekey_path("/etc/ssl/private/example.key".into())
//!     .common_name("example.com")
//!     .key_usage(vec!["digitalSignature".to_string()])
//!     .ocsp_must_staple(true)
//!     .build();
//!
//! let mut reconciler = CsrReconciler::from_params(&params)?;
//! reconciler.set_existing(std::fs::read("/etc/ssl/example.csr").ok());
//!
//! let outcome = reconciler.reconcile(ReconcileOptions {
//!     emit_csr: true,
//!     check_mode: false,
//! })?;
//! if let (true, Some(pem)) = (outcome.changed, outcome.csr) {
//!     std::fs::write("/etc/ssl/example.csr", pem)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Building and Matching Directly
//!
//! ```rust
//! use csrkit::csr::builder::CsrBuilder;
//! use csrkit::csr::matcher::CsrMatcher;
//! use csrkit::csr::params::DesiredState;
//! use csrkit::key::KeyPair;
//! use csrkit::oid::COMMON_NAME;
//!
//! # fn main() -> Result<(), csrkit::error::CsrKitError> {
//! let key = KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[1u8; 32]));
//! let desired = DesiredState::with_subject(vec![(COMMON_NAME, "example.com".to_string())]);
//!
//! let csr = CsrBuilder::default().build(&desired, &key)?;
//! assert!(CsrMatcher::new(&desired, key.as_spki()?).matches(&csr));
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Configuration and key errors are fatal. A CSR that cannot be parsed is not an error;
//! the reconciler rebuilds it.
//!
//! ```rust
//! use csrkit::csr::params::CsrParams;
//! use csrkit::error::CsrKitError;
//! use csrkit::reconcile::CsrReconciler;
//!
//! let params = CsrParams::builder()
//!     .privatekey_content("...")
//!     .create_subject_key_identifier(true)
//!     .subject_key_identifier("01:02:03")
//!     .build();
//!
//! match CsrReconciler::from_params(&params) {
//!     Err(CsrKitError::Configuration(msg)) => println!("Invalid configuration: {}", msg),
//!     Err(e) => println!("Other error: {}", e),
//!     Ok(_) => unreachable!(),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`csr`]: CSR parsing and encoding, normalization, building and matching
//! - [`reconcile`]: The reconciliation driver
//! - [`key`]: Private key loading, signing and public keys
//! - [`name`]: Typed general names and distinguished names
//! - [`oid`]: Attribute and extended key usage OID lookup
//! - [`error`]: Error types

pub mod csr;
pub mod error;
pub mod key;
pub mod name;
pub mod oid;
pub mod reconcile;
