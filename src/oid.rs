//! Object identifier lookup for subject attributes and extended key usages.

use const_oid::ObjectIdentifier;
use const_oid::db::rfc5912;

use crate::error::{CsrKitError, Result};

pub const COUNTRY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
pub const STATE_OR_PROVINCE_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
pub const LOCALITY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
pub const ORGANIZATION_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
pub const ORGANIZATIONAL_UNIT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
pub const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
pub const EMAIL_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");
pub const DOMAIN_COMPONENT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.25");

/// `id-pe-tlsfeature` (RFC 7633), the OCSP must-staple carrier.
pub const TLS_FEATURE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.1.24");
pub const ECDSA_WITH_SHA_1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.1");

/// Each entry lists the accepted spellings; the first one is used for display.
const ATTRIBUTE_NAMES: &[(&[&str], ObjectIdentifier)] = &[
    (&["C", "countryName"], COUNTRY_NAME),
    (&["ST", "stateOrProvinceName", "S"], STATE_OR_PROVINCE_NAME),
    (&["L", "localityName"], LOCALITY_NAME),
    (&["O", "organizationName"], ORGANIZATION_NAME),
    (&["OU", "organizationalUnitName"], ORGANIZATIONAL_UNIT_NAME),
    (&["CN", "commonName"], COMMON_NAME),
    (&["emailAddress", "E", "email"], EMAIL_ADDRESS),
    (&["DC", "domainComponent"], DOMAIN_COMPONENT),
    (&["street", "streetAddress"], ObjectIdentifier::new_unwrap("2.5.4.9")),
    (&["serialNumber"], ObjectIdentifier::new_unwrap("2.5.4.5")),
    (&["SN", "surname"], ObjectIdentifier::new_unwrap("2.5.4.4")),
    (&["GN", "givenName"], ObjectIdentifier::new_unwrap("2.5.4.42")),
    (&["title"], ObjectIdentifier::new_unwrap("2.5.4.12")),
    (&["initials"], ObjectIdentifier::new_unwrap("2.5.4.43")),
    (&["generationQualifier"], ObjectIdentifier::new_unwrap("2.5.4.44")),
    (&["dnQualifier"], ObjectIdentifier::new_unwrap("2.5.4.46")),
    (&["pseudonym"], ObjectIdentifier::new_unwrap("2.5.4.65")),
    (&["postalCode"], ObjectIdentifier::new_unwrap("2.5.4.17")),
    (&["businessCategory"], ObjectIdentifier::new_unwrap("2.5.4.15")),
    (&["UID", "userId"], ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.1")),
];

const EXTENDED_KEY_USAGE_NAMES: &[(&[&str], ObjectIdentifier)] = &[
    (
        &["serverAuth", "TLS Web Server Authentication"],
        rfc5912::ID_KP_SERVER_AUTH,
    ),
    (
        &["clientAuth", "TLS Web Client Authentication"],
        rfc5912::ID_KP_CLIENT_AUTH,
    ),
    (&["codeSigning", "Code Signing"], rfc5912::ID_KP_CODE_SIGNING),
    (
        &["emailProtection", "E-mail Protection"],
        rfc5912::ID_KP_EMAIL_PROTECTION,
    ),
    (&["timeStamping", "Time Stamping"], rfc5912::ID_KP_TIME_STAMPING),
    (&["OCSPSigning", "OCSP Signing"], rfc5912::ID_KP_OCSP_SIGNING),
    (
        &["anyExtendedKeyUsage", "Any Extended Key Usage"],
        ObjectIdentifier::new_unwrap("2.5.29.37.0"),
    ),
];

/// Resolves a subject attribute or extended key usage name to its OID.
///
/// Short names, long names and dotted-decimal notation are accepted. Names unknown to
/// the local tables are looked up in the `const-oid` database before giving up.
pub fn name_to_oid(name: &str) -> Result<ObjectIdentifier> {
    let name = name.trim();
    let tables = ATTRIBUTE_NAMES.iter().chain(EXTENDED_KEY_USAGE_NAMES.iter());
    for (aliases, oid) in tables {
        if aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name)) {
            return Ok(*oid);
        }
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return ObjectIdentifier::new(name)
            .map_err(|e| CsrKitError::Configuration(format!("Invalid OID \"{name}\": {e}")));
    }

    const_oid::db::DB
        .by_name(name)
        .copied()
        .ok_or_else(|| CsrKitError::Configuration(format!("Unknown OID name \"{name}\"")))
}

/// Returns the short display name of a known OID, or its dotted-decimal form.
pub fn oid_to_name(oid: &ObjectIdentifier) -> String {
    ATTRIBUTE_NAMES
        .iter()
        .chain(EXTENDED_KEY_USAGE_NAMES.iter())
        .find(|(_, known)| known == oid)
        .map(|(aliases, _)| aliases[0].to_string())
        .unwrap_or_else(|| oid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_short_long_and_dotted_names() {
        assert_eq!(name_to_oid("CN").unwrap(), COMMON_NAME);
        assert_eq!(name_to_oid("commonName").unwrap(), COMMON_NAME);
        assert_eq!(name_to_oid("emailAddress").unwrap(), EMAIL_ADDRESS);
        assert_eq!(
            name_to_oid("TLS Web Server Authentication").unwrap(),
            rfc5912::ID_KP_SERVER_AUTH
        );
        assert_eq!(
            name_to_oid("1.3.6.1.5.5.7.3.2").unwrap(),
            rfc5912::ID_KP_CLIENT_AUTH
        );
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(matches!(
            name_to_oid("definitelyNotAnAttribute"),
            Err(CsrKitError::Configuration(_))
        ));
        assert!(name_to_oid("1.x.3").is_err());
    }

    #[test]
    fn displays_known_oids_by_short_name() {
        assert_eq!(oid_to_name(&COUNTRY_NAME), "C");
        assert_eq!(oid_to_name(&rfc5912::ID_KP_CODE_SIGNING), "codeSigning");
        assert_eq!(oid_to_name(&TLS_FEATURE), "1.3.6.1.5.5.7.1.24");
    }
}
