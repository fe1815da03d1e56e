use std::collections::BTreeMap;
use std::path::PathBuf;

use bon::Builder;
use der::flagset::FlagSet;
use serde::Deserialize;
use x509_cert::ext::pkix::KeyUsages;
use x509_cert::ext::pkix::crl::dp::DistributionPoint;

use crate::key::PrivateKeySource;
use crate::name::{NameAttribute, TypedName};
use const_oid::ObjectIdentifier;

/// A subject attribute value: a single string or several values for the same type.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameValue {
    One(String),
    Many(Vec<String>),
}

impl NameValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            NameValue::One(value) => vec![value.as_str()],
            NameValue::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Parameters for one CRL distribution point.
#[derive(Clone, Debug, Default, PartialEq, Eq, Builder, Deserialize)]
#[serde(default)]
pub struct CrlDistributionPointParams {
    pub full_name: Option<Vec<String>>,
    pub relative_name: Option<Vec<String>>,
    pub crl_issuer: Option<Vec<String>>,
    pub reasons: Option<Vec<String>>,
}

/// The raw configuration record describing the desired CSR.
///
/// Field names and aliases follow the usual option names of CSR tooling, so a record
/// can be deserialized directly from JSON or YAML configuration.
#[derive(Clone, Debug, PartialEq, Eq, Builder, Deserialize)]
#[serde(default)]
pub struct CsrParams {
    #[builder(default = "sha256".to_string(), into)]
    pub digest: String,
    pub privatekey_path: Option<PathBuf>,
    #[builder(into)]
    pub privatekey_content: Option<String>,
    #[builder(into)]
    pub privatekey_passphrase: Option<String>,
    #[builder(default = 1)]
    pub version: u8,

    pub subject: Option<BTreeMap<String, NameValue>>,
    pub subject_ordered: Option<Vec<BTreeMap<String, NameValue>>>,
    #[serde(alias = "C", alias = "countryName")]
    #[builder(into)]
    pub country_name: Option<String>,
    #[serde(alias = "ST", alias = "stateOrProvinceName")]
    #[builder(into)]
    pub state_or_province_name: Option<String>,
    #[serde(alias = "L", alias = "localityName")]
    #[builder(into)]
    pub locality_name: Option<String>,
    #[serde(alias = "O", alias = "organizationName")]
    #[builder(into)]
    pub organization_name: Option<String>,
    #[serde(alias = "OU", alias = "organizationalUnitName")]
    #[builder(into)]
    pub organizational_unit_name: Option<String>,
    #[serde(alias = "CN", alias = "commonName")]
    #[builder(into)]
    pub common_name: Option<String>,
    #[serde(alias = "E", alias = "emailAddress")]
    #[builder(into)]
    pub email_address: Option<String>,

    #[serde(alias = "subjectAltName")]
    pub subject_alt_name: Option<Vec<String>>,
    #[serde(alias = "subjectAltName_critical")]
    #[builder(default)]
    pub subject_alt_name_critical: bool,
    #[serde(alias = "useCommonNameForSAN")]
    #[builder(default = true)]
    pub use_common_name_for_san: bool,

    #[serde(alias = "keyUsage")]
    pub key_usage: Option<Vec<String>>,
    #[serde(alias = "keyUsage_critical")]
    #[builder(default)]
    pub key_usage_critical: bool,

    #[serde(alias = "extKeyUsage", alias = "extendedKeyUsage")]
    pub extended_key_usage: Option<Vec<String>>,
    #[serde(alias = "extKeyUsage_critical", alias = "extendedKeyUsage_critical")]
    #[builder(default)]
    pub extended_key_usage_critical: bool,

    #[serde(alias = "basicConstraints")]
    pub basic_constraints: Option<Vec<String>>,
    #[serde(alias = "basicConstraints_critical")]
    #[builder(default)]
    pub basic_constraints_critical: bool,

    #[serde(alias = "ocspMustStaple")]
    #[builder(default)]
    pub ocsp_must_staple: bool,
    #[serde(alias = "ocspMustStaple_critical")]
    #[builder(default)]
    pub ocsp_must_staple_critical: bool,

    pub name_constraints_permitted: Option<Vec<String>>,
    pub name_constraints_excluded: Option<Vec<String>>,
    #[builder(default)]
    pub name_constraints_critical: bool,

    #[builder(default)]
    pub create_subject_key_identifier: bool,
    #[builder(into)]
    pub subject_key_identifier: Option<String>,
    #[builder(into)]
    pub authority_key_identifier: Option<String>,
    pub authority_cert_issuer: Option<Vec<String>>,
    pub authority_cert_serial_number: Option<u64>,

    pub crl_distribution_points: Option<Vec<CrlDistributionPointParams>>,
}

impl Default for CsrParams {
    fn default() -> Self {
        CsrParams::builder().build()
    }
}

impl CsrParams {
    /// The private key reference described by this record, if exactly one is given.
    pub fn private_key_source(&self) -> crate::error::Result<PrivateKeySource> {
        use crate::error::CsrKitError;
        let source = match (&self.privatekey_path, &self.privatekey_content) {
            (Some(_), Some(_)) => {
                return Err(CsrKitError::Configuration(
                    "privatekey_path and privatekey_content are mutually exclusive".to_string(),
                ));
            }
            (Some(path), None) => PrivateKeySource::from_path(path.clone()),
            (None, Some(content)) => PrivateKeySource::from_content(content.clone()),
            (None, None) => {
                return Err(CsrKitError::Configuration(
                    "one of privatekey_path or privatekey_content is required".to_string(),
                ));
            }
        };
        Ok(match &self.privatekey_passphrase {
            Some(passphrase) => source.with_passphrase(passphrase.clone()),
            None => source,
        })
    }
}

/// A requested extension value together with its criticality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requested<T> {
    pub value: T,
    pub critical: bool,
}

impl<T> Requested<T> {
    pub fn new(value: T, critical: bool) -> Self {
        Self { value, critical }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasicConstraintsValue {
    pub ca: bool,
    pub path_length: Option<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameConstraintsValue {
    pub permitted: Vec<TypedName>,
    pub excluded: Vec<TypedName>,
}

/// How the subject key identifier is governed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SubjectKeyIdentifierMode {
    #[default]
    Absent,
    /// Derive from the signing key's public key.
    Derive,
    Explicit(Vec<u8>),
}

/// The authority key identifier triple. Absent members stay absent when encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorityKeyIdentifierValue {
    pub key_identifier: Option<Vec<u8>>,
    pub issuer: Option<Vec<TypedName>>,
    pub serial_number: Option<u64>,
}

/// Canonical, immutable description of the CSR that should exist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredState {
    pub subject: Vec<NameAttribute>,
    /// Compare the subject positionally instead of as a multiset.
    pub subject_ordered: bool,
    pub subject_alt_name: Option<Requested<Vec<TypedName>>>,
    /// The SAN list was synthesized from the common name.
    pub san_from_common_name: bool,
    pub key_usage: Option<Requested<FlagSet<KeyUsages>>>,
    pub extended_key_usage: Option<Requested<Vec<ObjectIdentifier>>>,
    pub basic_constraints: Option<Requested<BasicConstraintsValue>>,
    pub ocsp_must_staple: Option<Requested<()>>,
    pub name_constraints: Option<Requested<NameConstraintsValue>>,
    pub subject_key_identifier: SubjectKeyIdentifierMode,
    pub authority_key_identifier: Option<AuthorityKeyIdentifierValue>,
    pub crl_distribution_points: Option<Vec<DistributionPoint>>,
    pub digest: String,
}

impl DesiredState {
    /// A subject-only state with every optional extension absent.
    pub fn with_subject(subject: Vec<NameAttribute>) -> Self {
        Self {
            subject,
            digest: "sha256".to_string(),
            ..Self::default()
        }
    }
}
