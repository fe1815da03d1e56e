//! Structured, serializable summaries of CSRs for diff reporting.

use der::EncodePem;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use x509_cert::ext::pkix::name::DistributionPointName;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, CrlDistributionPoints, ExtendedKeyUsage, KeyUsage,
    NameConstraints, SubjectAltName, SubjectKeyIdentifier,
};
use x509_cert::ext::pkix::constraints::name::GeneralSubtree;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::name::RelativeDistinguishedName;

use super::Csr;
use super::extensions::{
    ExtensionKind, ExtensionParam, is_must_staple, key_usage_names, revocation_reason_names,
};
use super::matcher::serial_to_u64;
use crate::error::{CsrKitError, Result};
use crate::name::{decode_attribute_value, decode_name, describe_general_name};
use crate::oid::oid_to_name;
use const_oid::db::{rfc5912, rfc8410};

/// What is known about a CSR, for the `before`/`after` sides of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrSummary {
    /// There is no CSR.
    Absent,
    /// CSR bytes exist but cannot be parsed.
    Unparseable,
    Parsed(Box<CsrInfo>),
}

impl CsrSummary {
    pub fn can_parse(&self) -> bool {
        matches!(self, CsrSummary::Parsed(_))
    }
}

impl Serialize for CsrSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CsrSummary::Absent => serializer.serialize_map(Some(0))?.end(),
            CsrSummary::Unparseable => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("can_parse_csr", &false)?;
                map.end()
            }
            CsrSummary::Parsed(info) => info.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrlDistributionPointInfo {
    pub full_name: Option<Vec<String>>,
    pub relative_name: Option<Vec<String>>,
    pub crl_issuer: Option<Vec<String>>,
    pub reasons: Option<Vec<String>>,
}

/// Decoded subject, public key and extensions of a CSR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CsrInfo {
    pub can_parse_csr: bool,
    pub signature_valid: bool,
    pub public_key: String,
    pub public_key_type: String,
    pub subject: Vec<(String, String)>,
    pub subject_alt_name: Option<Vec<String>>,
    pub subject_alt_name_critical: bool,
    pub key_usage: Option<Vec<String>>,
    pub key_usage_critical: bool,
    pub extended_key_usage: Option<Vec<String>>,
    pub extended_key_usage_critical: bool,
    pub basic_constraints: Option<Vec<String>>,
    pub basic_constraints_critical: bool,
    pub ocsp_must_staple: Option<bool>,
    pub ocsp_must_staple_critical: bool,
    pub name_constraints_permitted: Option<Vec<String>>,
    pub name_constraints_excluded: Option<Vec<String>>,
    pub name_constraints_critical: bool,
    pub subject_key_identifier: Option<String>,
    pub authority_key_identifier: Option<String>,
    pub authority_cert_issuer: Option<Vec<String>>,
    pub authority_cert_serial_number: Option<u64>,
    pub crl_distribution_points: Option<Vec<CrlDistributionPointInfo>>,
}

impl CsrInfo {
    pub fn from_csr(csr: &Csr) -> Result<Self> {
        let spki = csr.public_key_info();
        let mut info = CsrInfo {
            can_parse_csr: true,
            signature_valid: csr.is_signature_valid(),
            public_key: spki
                .to_pem(pkcs8::LineEnding::LF)
                .map_err(|e| CsrKitError::Encoding(e.to_string()))?,
            public_key_type: match spki.algorithm.oid {
                rfc5912::RSA_ENCRYPTION => "RSA".to_string(),
                rfc5912::ID_EC_PUBLIC_KEY => "ECC".to_string(),
                rfc8410::ID_ED_25519 => "Ed25519".to_string(),
                other => other.to_string(),
            },
            subject: decode_name(&csr.inner.info.subject)?
                .into_iter()
                .map(|(oid, value)| (oid_to_name(&oid), value))
                .collect(),
            ..CsrInfo::default()
        };

        let extensions = csr.extensions()?;
        for kind in ExtensionKind::ALL {
            if let Some(extension) = kind.find(&extensions) {
                info.describe(kind, extension)?;
            }
        }
        Ok(info)
    }

    fn describe(&mut self, kind: ExtensionKind, extension: &ExtensionParam) -> Result<()> {
        let critical = extension.critical;
        match kind {
            ExtensionKind::SubjectAltName => {
                let san: SubjectAltName = extension.to_extension()?;
                self.subject_alt_name = Some(describe_names(&san.0));
                self.subject_alt_name_critical = critical;
            }
            ExtensionKind::KeyUsage => {
                let usage: KeyUsage = extension.to_extension()?;
                self.key_usage = Some(key_usage_names(usage.0));
                self.key_usage_critical = critical;
            }
            ExtensionKind::ExtendedKeyUsage => {
                let usage: ExtendedKeyUsage = extension.to_extension()?;
                self.extended_key_usage = Some(usage.0.iter().map(oid_to_name).collect());
                self.extended_key_usage_critical = critical;
            }
            ExtensionKind::BasicConstraints => {
                let constraints: BasicConstraints = extension.to_extension()?;
                let mut entries = vec![format!(
                    "CA:{}",
                    if constraints.ca { "TRUE" } else { "FALSE" }
                )];
                entries.extend(
                    constraints
                        .path_len_constraint
                        .map(|length| format!("pathlen:{length}")),
                );
                self.basic_constraints = Some(entries);
                self.basic_constraints_critical = critical;
            }
            ExtensionKind::OcspMustStaple => {
                self.ocsp_must_staple = Some(is_must_staple(extension));
                self.ocsp_must_staple_critical = critical;
            }
            ExtensionKind::NameConstraints => {
                let constraints: NameConstraints = extension.to_extension()?;
                self.name_constraints_permitted =
                    constraints.permitted_subtrees.as_deref().map(describe_subtrees);
                self.name_constraints_excluded =
                    constraints.excluded_subtrees.as_deref().map(describe_subtrees);
                self.name_constraints_critical = critical;
            }
            ExtensionKind::SubjectKeyIdentifier => {
                let ski: SubjectKeyIdentifier = extension.to_extension()?;
                self.subject_key_identifier = Some(colon_hex(ski.0.as_bytes()));
            }
            ExtensionKind::AuthorityKeyIdentifier => {
                let aki: AuthorityKeyIdentifier = extension.to_extension()?;
                self.authority_key_identifier =
                    aki.key_identifier.map(|id| colon_hex(id.as_bytes()));
                self.authority_cert_issuer =
                    aki.authority_cert_issuer.as_deref().map(describe_names);
                self.authority_cert_serial_number =
                    aki.authority_cert_serial_number.as_ref().and_then(serial_to_u64);
            }
            ExtensionKind::CrlDistributionPoints => {
                let points: CrlDistributionPoints = extension.to_extension()?;
                self.crl_distribution_points = Some(
                    points
                        .0
                        .iter()
                        .map(|point| -> Result<CrlDistributionPointInfo> {
                            let (full_name, relative_name) = match &point.distribution_point {
                                Some(DistributionPointName::FullName(names)) => {
                                    (Some(describe_names(names)), None)
                                }
                                Some(DistributionPointName::NameRelativeToCRLIssuer(rdn)) => {
                                    (None, Some(describe_rdn(rdn)?))
                                }
                                None => (None, None),
                            };
                            Ok(CrlDistributionPointInfo {
                                full_name,
                                relative_name,
                                crl_issuer: point.crl_issuer.as_deref().map(describe_names),
                                reasons: point.reasons.map(revocation_reason_names),
                            })
                        })
                        .collect::<Result<_>>()?,
                );
            }
        }
        Ok(())
    }
}

/// Summarizes raw CSR bytes (PEM or DER). Anything unreadable yields [`CsrSummary::Unparseable`].
pub fn introspect(bytes: &[u8]) -> CsrSummary {
    match Csr::parse(bytes) {
        Ok(csr) => summarize(&csr),
        Err(_) => CsrSummary::Unparseable,
    }
}

/// Summarizes an already parsed CSR.
pub fn summarize(csr: &Csr) -> CsrSummary {
    match CsrInfo::from_csr(csr) {
        Ok(info) => CsrSummary::Parsed(Box::new(info)),
        Err(_) => CsrSummary::Unparseable,
    }
}

fn describe_names(names: &[GeneralName]) -> Vec<String> {
    names.iter().map(describe_general_name).collect()
}

fn describe_rdn(rdn: &RelativeDistinguishedName) -> Result<Vec<String>> {
    rdn.0
        .iter()
        .map(|atv| {
            let value = decode_attribute_value(&atv.value)?;
            Ok(format!("{}={value}", oid_to_name(&atv.oid)))
        })
        .collect()
}

fn describe_subtrees(subtrees: &[GeneralSubtree]) -> Vec<String> {
    subtrees
        .iter()
        .map(|subtree| describe_general_name(&subtree.base))
        .collect()
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPENSSL_CSR: &str = include_str!("../../tests/fixtures/openssl-p256.csr");

    #[test]
    fn summarizes_openssl_request() {
        let CsrSummary::Parsed(info) = introspect(OPENSSL_CSR.as_bytes()) else {
            panic!("fixture should parse");
        };
        assert!(info.signature_valid);
        assert_eq!(info.public_key_type, "ECC");
        assert_eq!(
            info.subject,
            vec![
                ("C".to_string(), "US".to_string()),
                ("O".to_string(), "Example Corp".to_string()),
                ("CN".to_string(), "example.com".to_string()),
            ]
        );
        assert_eq!(
            info.subject_alt_name,
            Some(vec![
                "DNS:example.com".to_string(),
                "DNS:www.example.com".to_string(),
                "IP:192.0.2.1".to_string(),
            ])
        );
        assert_eq!(
            info.key_usage,
            Some(vec!["Digital Signature".to_string(), "Key Encipherment".to_string()])
        );
        assert!(info.key_usage_critical);
        assert_eq!(info.extended_key_usage, Some(vec!["serverAuth".to_string()]));
        assert_eq!(info.ocsp_must_staple, Some(true));
        assert_eq!(info.basic_constraints, None);
    }

    #[test]
    fn serialized_summaries_report_parseability() {
        assert_eq!(serde_json::to_string(&CsrSummary::Absent).unwrap(), "{}");
        assert_eq!(
            serde_json::to_string(&introspect(b"garbage")).unwrap(),
            r#"{"can_parse_csr":false}"#
        );
        let parsed = serde_json::to_value(introspect(OPENSSL_CSR.as_bytes())).unwrap();
        assert_eq!(parsed["can_parse_csr"], serde_json::Value::Bool(true));
        assert_eq!(parsed["subject"][2][1], "example.com");
    }

    #[test]
    fn colon_hex_is_lowercase() {
        assert_eq!(colon_hex(&[0x0a, 0xff, 0x10]), "0a:ff:10");
    }
}
