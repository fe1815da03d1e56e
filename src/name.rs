//! Typed general names and distinguished-name helpers.
//!
//! Names are kept in a textual, typed form (`DNS:example.com`, `IP:192.0.2.0/24`, ...)
//! until a CSR is built. Conversion to the ASN.1 `GeneralName` happens late so that an
//! encoding failure can be attributed to the input that produced it.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use const_oid::ObjectIdentifier;
use der::asn1::{Any, Ia5String, Ia5StringRef, OctetString, PrintableStringRef, SetOfVec};
use der::{Encode, Tag, Tagged};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

use crate::error::{CsrKitError, Result};
use crate::oid::{self, COUNTRY_NAME, DOMAIN_COMPONENT, EMAIL_ADDRESS};

/// A single `(attribute type, value)` pair of a distinguished name.
pub type NameAttribute = (ObjectIdentifier, String);

/// A general name in its typed, not yet encoded, form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypedName {
    Dns(String),
    Ip { addr: IpAddr, prefix: Option<u8> },
    Email(String),
    Uri(String),
    DirectoryName(Vec<NameAttribute>),
    RegisteredId(ObjectIdentifier),
}

/// Parses `PREFIX:value` into a typed name. `context` names the option in error messages.
pub fn parse_name(text: &str, context: &str) -> Result<TypedName> {
    let invalid = || CsrKitError::Configuration(format!("Cannot parse {context} \"{text}\""));
    let (prefix, value) = text.split_once(':').ok_or_else(invalid)?;
    match prefix.to_ascii_lowercase().as_str() {
        "dns" => Ok(TypedName::Dns(value.to_string())),
        "email" | "rfc822" => Ok(TypedName::Email(value.to_string())),
        "uri" => Ok(TypedName::Uri(value.to_string())),
        "ip" => parse_ip(value).ok_or_else(invalid),
        "dirname" => Ok(TypedName::DirectoryName(parse_dn(value).map_err(|e| {
            CsrKitError::Configuration(format!("Cannot parse {context} \"{text}\": {e}"))
        })?)),
        "rid" => ObjectIdentifier::new(value)
            .map(TypedName::RegisteredId)
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn parse_ip(value: &str) -> Option<TypedName> {
    match value.split_once('/') {
        Some((addr, prefix)) => {
            let addr = IpAddr::from_str(addr).ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            (prefix <= max).then_some(TypedName::Ip {
                addr,
                prefix: Some(prefix),
            })
        }
        None => IpAddr::from_str(value)
            .ok()
            .map(|addr| TypedName::Ip { addr, prefix: None }),
    }
}

/// Parses a distinguished name in either `/CN=a/O=b` or `CN=a,O=b` notation.
///
/// A backslash escapes the following character, so separators may appear in values.
pub fn parse_dn(text: &str) -> Result<Vec<NameAttribute>> {
    let (body, separator) = match text.strip_prefix('/') {
        Some(rest) => (rest, '/'),
        None => (text, ','),
    };

    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            c if c == separator => components.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    components.push(current);

    components
        .iter()
        .filter(|component| !component.trim().is_empty())
        .map(|component| parse_attribute(component))
        .collect()
}

/// Parses a single `type=value` pair.
pub fn parse_attribute(component: &str) -> Result<NameAttribute> {
    let (key, value) = component.split_once('=').ok_or_else(|| {
        CsrKitError::Configuration(format!("Unexpected name component \"{component}\""))
    })?;
    Ok((oid::name_to_oid(key)?, value.trim().to_string()))
}

impl fmt::Display for TypedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedName::Dns(name) => write!(f, "DNS:{name}"),
            TypedName::Ip { addr, prefix: None } => write!(f, "IP:{addr}"),
            TypedName::Ip {
                addr,
                prefix: Some(prefix),
            } => write!(f, "IP:{addr}/{prefix}"),
            TypedName::Email(email) => write!(f, "email:{email}"),
            TypedName::Uri(uri) => write!(f, "URI:{uri}"),
            TypedName::DirectoryName(attributes) => {
                write!(f, "dirName:")?;
                for (oid, value) in attributes {
                    write!(f, "/{}={}", oid::oid_to_name(oid), value.replace('/', "\\/"))?;
                }
                Ok(())
            }
            TypedName::RegisteredId(oid) => write!(f, "RID:{oid}"),
        }
    }
}

impl TypedName {
    /// Encodes the name into an ASN.1 `GeneralName`.
    ///
    /// DNS names must already be in their ASCII (A-label) form; internationalized names
    /// are rejected here.
    pub fn to_general_name(&self) -> Result<GeneralName> {
        let ia5 = |value: &str| {
            Ia5String::new(value).map_err(|e| {
                CsrKitError::Encoding(format!("\"{value}\" is not a valid IA5 string: {e}"))
            })
        };
        Ok(match self {
            TypedName::Dns(name) => {
                check_dns_name(name)?;
                GeneralName::DnsName(ia5(name)?)
            }
            TypedName::Email(email) => GeneralName::Rfc822Name(ia5(email)?),
            TypedName::Uri(uri) => GeneralName::UniformResourceIdentifier(ia5(uri)?),
            TypedName::Ip { addr, prefix } => {
                GeneralName::IpAddress(OctetString::new(ip_octets(addr, *prefix))?)
            }
            TypedName::DirectoryName(attributes) => {
                GeneralName::DirectoryName(encode_name(attributes)?)
            }
            TypedName::RegisteredId(oid) => GeneralName::RegisteredId(*oid),
        })
    }

    /// Decodes an ASN.1 `GeneralName`. Name forms without a typed counterpart yield `None`.
    pub fn from_general_name(name: &GeneralName) -> Option<Self> {
        match name {
            GeneralName::DnsName(dns) => Some(TypedName::Dns(dns.to_string())),
            GeneralName::Rfc822Name(email) => Some(TypedName::Email(email.to_string())),
            GeneralName::UniformResourceIdentifier(uri) => Some(TypedName::Uri(uri.to_string())),
            GeneralName::IpAddress(octets) => ip_from_octets(octets.as_bytes()),
            GeneralName::DirectoryName(dn) => {
                decode_name(dn).ok().map(TypedName::DirectoryName)
            }
            GeneralName::RegisteredId(oid) => Some(TypedName::RegisteredId(*oid)),
            _ => None,
        }
    }
}

/// Renders any `GeneralName` for display, including forms without a typed counterpart.
pub fn describe_general_name(name: &GeneralName) -> String {
    match TypedName::from_general_name(name) {
        Some(typed) => typed.to_string(),
        None => match name {
            GeneralName::OtherName(other) => format!("otherName:{}", other.type_id),
            _ => "ediPartyName:<unsupported>".to_string(),
        },
    }
}

/// Canonical DER encoding of a general name, used for set comparisons.
pub fn general_name_der(name: &GeneralName) -> Result<Vec<u8>> {
    name.to_der()
        .map_err(|e| CsrKitError::Encoding(e.to_string()))
}

fn check_dns_name(name: &str) -> Result<()> {
    if !name.is_ascii() {
        return Err(CsrKitError::Encoding(format!(
            "DNS name \"{name}\" contains non-ASCII characters; IDNA encoding is not supported"
        )));
    }
    if let Some(label) = name.split('.').find(|label| label.len() > 63) {
        return Err(CsrKitError::Encoding(format!(
            "label \"{label}\" of DNS name \"{name}\" is too long"
        )));
    }
    Ok(())
}

fn ip_octets(addr: &IpAddr, prefix: Option<u8>) -> Vec<u8> {
    let (mut octets, bits) = match addr {
        IpAddr::V4(v4) => (v4.octets().to_vec(), 32u32),
        IpAddr::V6(v6) => (v6.octets().to_vec(), 128u32),
    };
    if let Some(prefix) = prefix {
        let prefix = u32::from(prefix).min(bits);
        let mask: Vec<u8> = (0..bits / 8)
            .map(|i| {
                let taken = prefix.saturating_sub(i * 8).min(8);
                (0xffu16 << (8 - taken)) as u8
            })
            .collect();
        octets.extend(mask);
    }
    octets
}

fn ip_from_octets(octets: &[u8]) -> Option<TypedName> {
    let addr = |bytes: &[u8]| -> Option<IpAddr> {
        match bytes.len() {
            4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
            16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
            _ => None,
        }
    };
    match octets.len() {
        4 | 16 => addr(octets).map(|addr| TypedName::Ip { addr, prefix: None }),
        8 | 32 => {
            let (network, mask) = octets.split_at(octets.len() / 2);
            let prefix = mask.iter().map(|b| b.count_ones()).sum::<u32>() as u8;
            addr(network).map(|addr| TypedName::Ip {
                addr,
                prefix: Some(prefix),
            })
        }
        _ => None,
    }
}

/// Encodes an attribute value with the string type conventionally used for its type.
pub fn encode_attribute_value(oid: &ObjectIdentifier, value: &str) -> Result<Any> {
    let invalid = |e: der::Error| {
        CsrKitError::Encoding(format!(
            "invalid value \"{value}\" for {}: {e}",
            oid::oid_to_name(oid)
        ))
    };
    let any = if *oid == COUNTRY_NAME {
        PrintableStringRef::new(value).map_err(invalid)?;
        Any::new(Tag::PrintableString, value.as_bytes())
    } else if *oid == EMAIL_ADDRESS || *oid == DOMAIN_COMPONENT {
        Ia5StringRef::new(value).map_err(invalid)?;
        Any::new(Tag::Ia5String, value.as_bytes())
    } else {
        Any::new(Tag::Utf8String, value.as_bytes())
    };
    any.map_err(invalid)
}

/// Decodes an attribute value of any of the common directory string types.
pub fn decode_attribute_value(value: &Any) -> Result<String> {
    let bytes = value.value();
    match value.tag() {
        Tag::Utf8String
        | Tag::PrintableString
        | Tag::Ia5String
        | Tag::TeletexString
        | Tag::VisibleString => String::from_utf8(bytes.to_vec())
            .map_err(|e| CsrKitError::Decoding(e.to_string())),
        Tag::BmpString => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).map_err(|e| CsrKitError::Decoding(e.to_string()))
        }
        tag => Err(CsrKitError::Decoding(format!(
            "unsupported attribute value type {tag}"
        ))),
    }
}

/// Builds a single-valued relative distinguished name.
pub fn encode_rdn(attributes: &[NameAttribute]) -> Result<RelativeDistinguishedName> {
    let values = attributes
        .iter()
        .map(|(oid, value)| {
            Ok(AttributeTypeAndValue {
                oid: *oid,
                value: encode_attribute_value(oid, value)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RelativeDistinguishedName(SetOfVec::try_from(values)?))
}

/// Encodes attributes as a distinguished name, one RDN per attribute, in the given order.
pub fn encode_name(attributes: &[NameAttribute]) -> Result<Name> {
    let rdns = attributes
        .iter()
        .map(|attribute| encode_rdn(std::slice::from_ref(attribute)))
        .collect::<Result<Vec<_>>>()?;
    Ok(RdnSequence(rdns))
}

/// Flattens a distinguished name into its attributes, in encoding order.
pub fn decode_name(name: &Name) -> Result<Vec<NameAttribute>> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .map(|atv| Ok((atv.oid, decode_attribute_value(&atv.value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid::{COMMON_NAME, ORGANIZATION_NAME};

    #[test]
    fn parses_prefixed_names() {
        assert_eq!(
            parse_name("DNS:example.com", "test").unwrap(),
            TypedName::Dns("example.com".to_string())
        );
        assert_eq!(
            parse_name("ip:10.0.0.0/8", "test").unwrap(),
            TypedName::Ip {
                addr: "10.0.0.0".parse().unwrap(),
                prefix: Some(8)
            }
        );
        assert_eq!(
            parse_name("dirName:/CN=Example CA/O=Example", "test").unwrap(),
            TypedName::DirectoryName(vec![
                (COMMON_NAME, "Example CA".to_string()),
                (ORGANIZATION_NAME, "Example".to_string()),
            ])
        );
        assert_eq!(
            parse_name("dirName:CN=a\\,b,O=c", "test").unwrap(),
            TypedName::DirectoryName(vec![
                (COMMON_NAME, "a,b".to_string()),
                (ORGANIZATION_NAME, "c".to_string()),
            ])
        );
    }

    #[test]
    fn rejects_unknown_prefix_with_context() {
        let err = parse_name("foo:bar", "Subject Alternative Name").unwrap_err();
        assert!(err.to_string().contains("Subject Alternative Name"));
        assert!(parse_name("no prefix", "x").is_err());
        assert!(parse_name("IP:10.0.0.0/33", "x").is_err());
    }

    #[test]
    fn ip_networks_encode_with_mask() {
        let name = parse_name("IP:192.0.2.0/24", "test").unwrap();
        let GeneralName::IpAddress(octets) = name.to_general_name().unwrap() else {
            panic!("expected an IP address");
        };
        assert_eq!(octets.as_bytes(), &[192, 0, 2, 0, 255, 255, 255, 0]);
        assert_eq!(
            TypedName::from_general_name(&GeneralName::IpAddress(octets)),
            Some(name)
        );
    }

    #[test]
    fn non_ascii_dns_names_fail_to_encode() {
        let name = TypedName::Dns("bücher.example".to_string());
        assert!(matches!(
            name.to_general_name(),
            Err(CsrKitError::Encoding(_))
        ));
    }

    #[test]
    fn names_survive_encoding() {
        let attributes = vec![
            (COUNTRY_NAME, "DE".to_string()),
            (COMMON_NAME, "Grüße".to_string()),
            (EMAIL_ADDRESS, "admin@example.com".to_string()),
        ];
        let name = encode_name(&attributes).unwrap();
        assert_eq!(name.0.len(), 3);
        assert_eq!(name.0[0].0.get(0).unwrap().value.tag(), Tag::PrintableString);
        assert_eq!(decode_name(&name).unwrap(), attributes);
    }

    #[test]
    fn display_uses_prefixed_notation() {
        let name = parse_name("dirName:/CN=Example CA", "test").unwrap();
        assert_eq!(name.to_string(), "dirName:/CN=Example CA");
        assert_eq!(
            parse_name("URI:https://example.com/crl", "test")
                .unwrap()
                .to_string(),
            "URI:https://example.com/crl"
        );
    }
}
