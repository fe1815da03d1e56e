use const_oid::AssociatedOid;
use der::{
    Decode, Encode,
    flagset::FlagSet,
    oid::ObjectIdentifier,
};
use x509_cert::ext::pkix::crl::dp::Reasons;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, CrlDistributionPoints, ExtendedKeyUsage, KeyUsage,
    KeyUsages, NameConstraints, SubjectAltName, SubjectKeyIdentifier,
};

use crate::error::{CsrKitError, Result};
use crate::oid::TLS_FEATURE;

/// Trait for converting to and from X.509 extension values.
///
/// This trait provides methods to encode and decode the DER payload carried in the
/// `extnValue` OCTET STRING of an extension.
///
/// # Example
/// ```
/// use csrkit::csr::extensions::{TlsFeatures, ToAndFromX509Extension};
/// let features = TlsFeatures::status_request();
/// let encoded = features.to_x509_extension_value().unwrap();
/// assert_eq!(encoded, [0x30, 0x03, 0x02, 0x01, 0x05]);
/// ```
pub trait ToAndFromX509Extension {
    /// The Object Identifier (OID) for the extension.
    const OID: ObjectIdentifier;

    /// Encodes the extension into a DER-encoded byte vector.
    fn to_x509_extension_value(&self) -> Result<Vec<u8>>;

    /// Decodes the extension from a DER-encoded byte slice.
    fn from_x509_extension_value(extension: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

macro_rules! impl_x509_extension {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToAndFromX509Extension for $ty {
                const OID: ObjectIdentifier = <$ty as AssociatedOid>::OID;

                fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
                    self.to_der()
                        .map_err(|e| CsrKitError::Encoding(e.to_string()))
                }

                fn from_x509_extension_value(extension: &[u8]) -> Result<Self> {
                    Ok(<$ty>::from_der(extension)?)
                }
            }
        )+
    };
}

impl_x509_extension!(
    SubjectAltName,
    KeyUsage,
    ExtendedKeyUsage,
    BasicConstraints,
    NameConstraints,
    SubjectKeyIdentifier,
    AuthorityKeyIdentifier,
    CrlDistributionPoints,
);

/// TLS feature extension (RFC 7633): a SEQUENCE OF feature codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFeatures(pub Vec<u16>);

/// `status_request`, the TLS feature that expresses OCSP must-staple.
pub const STATUS_REQUEST: u16 = 5;

/// Encoded must-staple payload: a SEQUENCE holding the single INTEGER 5.
pub const MUST_STAPLE_VALUE: [u8; 5] = [0x30, 0x03, 0x02, 0x01, 0x05];

impl TlsFeatures {
    pub fn status_request() -> Self {
        Self(vec![STATUS_REQUEST])
    }
}

impl ToAndFromX509Extension for TlsFeatures {
    const OID: ObjectIdentifier = TLS_FEATURE;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>> {
        self.0
            .to_der()
            .map_err(|e| CsrKitError::Encoding(e.to_string()))
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self> {
        Ok(Self(Vec::<u16>::from_der(extension)?))
    }
}

/// An extension as carried in a CSR's extension request.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: &E, critical: bool) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        E::from_x509_extension_value(&self.value)
    }

    pub fn to_x509(&self) -> Result<x509_cert::ext::Extension> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: der::asn1::OctetString::new(self.value.clone())?,
        })
    }

    pub fn from_x509(extension: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: extension.extn_id,
            critical: extension.critical,
            value: extension.extn_value.as_bytes().to_vec(),
        }
    }
}

/// The closed set of extensions the reconciler manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    SubjectAltName,
    KeyUsage,
    ExtendedKeyUsage,
    BasicConstraints,
    OcspMustStaple,
    NameConstraints,
    SubjectKeyIdentifier,
    AuthorityKeyIdentifier,
    CrlDistributionPoints,
}

impl ExtensionKind {
    /// All kinds, in the order extensions are emitted.
    pub const ALL: [ExtensionKind; 9] = [
        ExtensionKind::SubjectAltName,
        ExtensionKind::KeyUsage,
        ExtensionKind::ExtendedKeyUsage,
        ExtensionKind::BasicConstraints,
        ExtensionKind::OcspMustStaple,
        ExtensionKind::NameConstraints,
        ExtensionKind::SubjectKeyIdentifier,
        ExtensionKind::AuthorityKeyIdentifier,
        ExtensionKind::CrlDistributionPoints,
    ];

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            ExtensionKind::SubjectAltName => <SubjectAltName as AssociatedOid>::OID,
            ExtensionKind::KeyUsage => <KeyUsage as AssociatedOid>::OID,
            ExtensionKind::ExtendedKeyUsage => <ExtendedKeyUsage as AssociatedOid>::OID,
            ExtensionKind::BasicConstraints => <BasicConstraints as AssociatedOid>::OID,
            ExtensionKind::OcspMustStaple => TLS_FEATURE,
            ExtensionKind::NameConstraints => <NameConstraints as AssociatedOid>::OID,
            ExtensionKind::SubjectKeyIdentifier => <SubjectKeyIdentifier as AssociatedOid>::OID,
            ExtensionKind::AuthorityKeyIdentifier => <AuthorityKeyIdentifier as AssociatedOid>::OID,
            ExtensionKind::CrlDistributionPoints => <CrlDistributionPoints as AssociatedOid>::OID,
        }
    }

    /// First extension of this kind in `extensions`.
    pub fn find(self, extensions: &[ExtensionParam]) -> Option<&ExtensionParam> {
        let oid = self.oid();
        extensions.iter().find(|ext| ext.oid == oid)
    }
}

/// How the OCSP must-staple extension is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MustStapleEncoding {
    /// Typed TLS feature list holding `status_request`.
    Native,
    /// Fixed pre-encoded payload under the TLS feature OID.
    Raw,
}

pub fn must_staple_extension(encoding: MustStapleEncoding, critical: bool) -> Result<ExtensionParam> {
    match encoding {
        MustStapleEncoding::Native => {
            ExtensionParam::from_extension(&TlsFeatures::status_request(), critical)
        }
        MustStapleEncoding::Raw => Ok(ExtensionParam {
            oid: TLS_FEATURE,
            critical,
            value: MUST_STAPLE_VALUE.to_vec(),
        }),
    }
}

/// Whether `extension` requests OCSP stapling, in either encoding.
pub fn is_must_staple(extension: &ExtensionParam) -> bool {
    if extension.oid != TLS_FEATURE {
        return false;
    }
    extension.value == MUST_STAPLE_VALUE
        || extension
            .to_extension::<TlsFeatures>()
            .map(|features| features.0.contains(&STATUS_REQUEST))
            .unwrap_or(false)
}

const KEY_USAGE_NAMES: &[(KeyUsages, &str, &[&str])] = &[
    (KeyUsages::DigitalSignature, "Digital Signature", &["digitalsignature"]),
    (
        KeyUsages::NonRepudiation,
        "Non Repudiation",
        &["nonrepudiation", "contentcommitment"],
    ),
    (KeyUsages::KeyEncipherment, "Key Encipherment", &["keyencipherment"]),
    (KeyUsages::DataEncipherment, "Data Encipherment", &["dataencipherment"]),
    (KeyUsages::KeyAgreement, "Key Agreement", &["keyagreement"]),
    (KeyUsages::KeyCertSign, "Certificate Sign", &["keycertsign", "certificatesign"]),
    (KeyUsages::CRLSign, "CRL Sign", &["crlsign"]),
    (KeyUsages::EncipherOnly, "Encipher Only", &["encipheronly"]),
    (KeyUsages::DecipherOnly, "Decipher Only", &["decipheronly"]),
];

/// Parses key usage names (`digitalSignature`, `Digital Signature`, `key_cert_sign`, ...).
pub fn parse_key_usage(names: &[String]) -> Result<FlagSet<KeyUsages>> {
    let mut flags = FlagSet::<KeyUsages>::default();
    for name in names {
        let normalized: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        let (flag, _, _) = KEY_USAGE_NAMES
            .iter()
            .find(|(_, _, aliases)| aliases.contains(&normalized.as_str()))
            .ok_or_else(|| {
                CsrKitError::Configuration(format!("Unknown keyUsage \"{name}\""))
            })?;
        flags |= *flag;
    }
    Ok(flags)
}

pub fn key_usage_names(flags: FlagSet<KeyUsages>) -> Vec<String> {
    KEY_USAGE_NAMES
        .iter()
        .filter(|(flag, _, _)| flags.contains(*flag))
        .map(|(_, display, _)| display.to_string())
        .collect()
}

/// Parses basic constraints given as `CA:TRUE`/`CA:FALSE` and `pathlen:N` entries.
pub fn parse_basic_constraints(entries: &[String]) -> Result<(bool, Option<u8>)> {
    let mut ca = false;
    let mut path_length = None;
    for entry in entries {
        let (key, value) = entry.split_once(':').ok_or_else(|| {
            CsrKitError::Configuration(format!("Unknown basic constraint \"{entry}\""))
        })?;
        match key.trim().to_ascii_lowercase().as_str() {
            "ca" => {
                ca = match value.trim().to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(CsrKitError::Configuration(format!(
                            "Unknown basic constraint value \"{value}\" for CA"
                        )));
                    }
                }
            }
            "pathlen" => {
                path_length = Some(value.trim().parse::<u8>().map_err(|_| {
                    CsrKitError::Configuration(format!("Cannot parse path length \"{value}\""))
                })?);
            }
            _ => {
                return Err(CsrKitError::Configuration(format!(
                    "Unknown basic constraint \"{entry}\""
                )));
            }
        }
    }
    Ok((ca, path_length))
}

const REVOCATION_REASONS: &[(&str, Reasons)] = &[
    ("key_compromise", Reasons::KeyCompromise),
    ("ca_compromise", Reasons::CaCompromise),
    ("affiliation_changed", Reasons::AffiliationChanged),
    ("superseded", Reasons::Superseded),
    ("cessation_of_operation", Reasons::CessationOfOperation),
    ("certificate_hold", Reasons::CertificateHold),
    ("privilege_withdrawn", Reasons::PrivilegeWithdrawn),
    ("aa_compromise", Reasons::AaCompromise),
];

pub fn parse_revocation_reason(name: &str) -> Result<Reasons> {
    REVOCATION_REASONS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, reason)| *reason)
        .ok_or_else(|| CsrKitError::Configuration(format!("Unknown CRL reason \"{name}\"")))
}

pub fn revocation_reason_names(flags: FlagSet<Reasons>) -> Vec<String> {
    REVOCATION_REASONS
        .iter()
        .filter(|(_, reason)| flags.contains(*reason))
        .map(|(name, _)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_constraints_parsing() {
        let entries = vec!["CA:TRUE".to_string(), "pathlen:3".to_string()];
        assert_eq!(parse_basic_constraints(&entries).unwrap(), (true, Some(3)));
        assert_eq!(parse_basic_constraints(&[]).unwrap(), (false, None));
        assert!(parse_basic_constraints(&["CA:maybe".to_string()]).is_err());
        assert!(parse_basic_constraints(&["critical".to_string()]).is_err());
    }

    #[test]
    fn test_key_usage_parsing_accepts_every_spelling() {
        let names = vec![
            "digitalSignature".to_string(),
            "Key Encipherment".to_string(),
            "key_cert_sign".to_string(),
            "cRLSign".to_string(),
        ];
        let flags = parse_key_usage(&names).unwrap();
        assert_eq!(
            flags,
            KeyUsages::DigitalSignature
                | KeyUsages::KeyEncipherment
                | KeyUsages::KeyCertSign
                | KeyUsages::CRLSign
        );
        assert_eq!(
            key_usage_names(flags),
            ["Digital Signature", "Key Encipherment", "Certificate Sign", "CRL Sign"]
        );
        assert!(parse_key_usage(&["teleportation".to_string()]).is_err());
    }

    #[test]
    fn test_must_staple_encodings_agree() {
        let native = must_staple_extension(MustStapleEncoding::Native, false).unwrap();
        let raw = must_staple_extension(MustStapleEncoding::Raw, true).unwrap();
        assert_eq!(native.oid, raw.oid);
        assert_eq!(native.value, raw.value);
        assert!(is_must_staple(&native));
        assert!(is_must_staple(&raw));
    }

    #[test]
    fn test_tls_features_without_status_request_are_not_must_staple() {
        let other = ExtensionParam::from_extension(&TlsFeatures(vec![17]), false).unwrap();
        assert!(!is_must_staple(&other));
    }

    #[test]
    fn test_extension_kind_oids() {
        let oids: Vec<String> = ExtensionKind::ALL
            .iter()
            .map(|kind| kind.oid().to_string())
            .collect();
        assert_eq!(
            oids,
            [
                "2.5.29.17",
                "2.5.29.15",
                "2.5.29.37",
                "2.5.29.19",
                "1.3.6.1.5.5.7.1.24",
                "2.5.29.30",
                "2.5.29.14",
                "2.5.29.35",
                "2.5.29.31",
            ]
        );
    }

    #[test]
    fn test_revocation_reasons() {
        let reason = parse_revocation_reason("key_compromise").unwrap();
        assert_eq!(revocation_reason_names(reason.into()), ["key_compromise"]);
        assert!(parse_revocation_reason("bored").is_err());
    }
}
