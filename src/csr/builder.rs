use der::asn1::{Any, BitString, OctetString, SetOfVec};
use der::Encode;
use log::debug;
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::constraints::name::GeneralSubtree;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, CrlDistributionPoints, ExtendedKeyUsage, KeyUsage,
    NameConstraints, SubjectAltName, SubjectKeyIdentifier,
};
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq, Version};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use super::Csr;
use super::extensions::{ExtensionKind, ExtensionParam, MustStapleEncoding, must_staple_extension};
use super::params::{DesiredState, SubjectKeyIdentifierMode};
use crate::error::{BuildError, CsrKitError, NameOrigin, Result};
use crate::key::{CsrSigner, DigestAlgorithm, key_identifier};
use crate::name::{self, TypedName};
use const_oid::AssociatedOid;

/// Signing and encoding features of the active backend.
///
/// Resolved once with [`Capabilities::detect`] and handed to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The TLS feature extension can be written from its typed form.
    pub native_tls_feature: bool,
    /// Keys that sign without a separate digest (Ed25519) are supported.
    pub digestless_signing: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        Self {
            native_tls_feature: true,
            digestless_signing: true,
        }
    }

    fn must_staple_encoding(&self) -> MustStapleEncoding {
        if self.native_tls_feature {
            MustStapleEncoding::Native
        } else {
            MustStapleEncoding::Raw
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// Assembles and signs a CSR for a [`DesiredState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CsrBuilder {
    capabilities: Capabilities,
}

impl CsrBuilder {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Builds a signed CSR for `desired`, signed by `signer`.
    ///
    /// The subject is encoded in the order given by `desired.subject` and extensions are
    /// emitted in [`ExtensionKind::ALL`] order, one per requested field.
    pub fn build<S: CsrSigner + ?Sized>(&self, desired: &DesiredState, signer: &S) -> Result<Csr> {
        let subject = name::encode_name(&desired.subject)
            .map_err(|e| BuildError::InvalidSubject(message_of(e)))?;
        let public_key = signer.public_key_info()?;

        let extensions = ExtensionKind::ALL
            .iter()
            .filter_map(|kind| self.extension(*kind, desired, &public_key).transpose())
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "building CSR with {} subject attributes and {} extensions",
            desired.subject.len(),
            extensions.len()
        );

        let attributes = if extensions.is_empty() {
            SetOfVec::new()
        } else {
            let request = ExtensionReq(
                extensions
                    .iter()
                    .map(ExtensionParam::to_x509)
                    .collect::<Result<Vec<_>>>()?,
            );
            let values = SetOfVec::try_from(vec![Any::encode_from(&request).map_err(encoding)?])
                .map_err(encoding)?;
            SetOfVec::try_from(vec![Attribute {
                oid: ExtensionReq::OID,
                values,
            }])
            .map_err(encoding)?
        };

        let info = CertReqInfo {
            version: Version::V1,
            subject,
            public_key,
            attributes,
        };

        let digest = if signer.requires_digest() {
            Some(
                DigestAlgorithm::from_name(&desired.digest)
                    .ok_or_else(|| BuildError::UnsupportedDigest(desired.digest.clone()))?,
            )
        } else if !self.capabilities.digestless_signing {
            return Err(BuildError::DigestlessSigningUnsupported {
                algorithm: signer.algorithm_name(),
            }
            .into());
        } else {
            None
        };

        let (algorithm, signature) = signer.sign(&info.to_der().map_err(encoding)?, digest)?;
        Ok(Csr {
            inner: CertReq {
                info,
                algorithm,
                signature: BitString::from_bytes(&signature).map_err(encoding)?,
            },
        })
    }

    fn extension(
        &self,
        kind: ExtensionKind,
        desired: &DesiredState,
        public_key: &SubjectPublicKeyInfoOwned,
    ) -> Result<Option<ExtensionParam>> {
        let extension = match kind {
            ExtensionKind::SubjectAltName => match &desired.subject_alt_name {
                Some(san) => {
                    let origin = if desired.san_from_common_name {
                        NameOrigin::CommonName
                    } else {
                        NameOrigin::SubjectAltName
                    };
                    let names = san
                        .value
                        .iter()
                        .map(|name| {
                            name.to_general_name().map_err(|e| BuildError::NameEncoding {
                                message: message_of(e),
                                origin,
                            })
                        })
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    Some(ExtensionParam::from_extension(&SubjectAltName(names), san.critical)?)
                }
                None => None,
            },
            ExtensionKind::KeyUsage => match &desired.key_usage {
                Some(usage) => Some(ExtensionParam::from_extension(
                    &KeyUsage(usage.value),
                    usage.critical,
                )?),
                None => None,
            },
            ExtensionKind::ExtendedKeyUsage => match &desired.extended_key_usage {
                Some(usage) => Some(ExtensionParam::from_extension(
                    &ExtendedKeyUsage(usage.value.clone()),
                    usage.critical,
                )?),
                None => None,
            },
            ExtensionKind::BasicConstraints => match &desired.basic_constraints {
                Some(constraints) => Some(ExtensionParam::from_extension(
                    &BasicConstraints {
                        ca: constraints.value.ca,
                        path_len_constraint: constraints.value.path_length,
                    },
                    constraints.critical,
                )?),
                None => None,
            },
            ExtensionKind::OcspMustStaple => match &desired.ocsp_must_staple {
                Some(must_staple) => Some(must_staple_extension(
                    self.capabilities.must_staple_encoding(),
                    must_staple.critical,
                )?),
                None => None,
            },
            ExtensionKind::NameConstraints => match &desired.name_constraints {
                Some(constraints) => Some(ExtensionParam::from_extension(
                    &NameConstraints {
                        permitted_subtrees: subtrees(&constraints.value.permitted)?,
                        excluded_subtrees: subtrees(&constraints.value.excluded)?,
                    },
                    constraints.critical,
                )?),
                None => None,
            },
            ExtensionKind::SubjectKeyIdentifier => {
                let identifier = match &desired.subject_key_identifier {
                    SubjectKeyIdentifierMode::Absent => None,
                    SubjectKeyIdentifierMode::Derive => Some(key_identifier(public_key)),
                    SubjectKeyIdentifierMode::Explicit(bytes) => Some(bytes.clone()),
                };
                match identifier {
                    Some(bytes) => Some(ExtensionParam::from_extension(
                        &SubjectKeyIdentifier(OctetString::new(bytes).map_err(encoding)?),
                        false,
                    )?),
                    None => None,
                }
            }
            ExtensionKind::AuthorityKeyIdentifier => match &desired.authority_key_identifier {
                Some(authority) => {
                    let key_identifier = authority
                        .key_identifier
                        .as_ref()
                        .map(|bytes| OctetString::new(bytes.clone()))
                        .transpose()
                        .map_err(encoding)?;
                    let authority_cert_issuer = authority
                        .issuer
                        .as_deref()
                        .map(general_names)
                        .transpose()?;
                    let authority_cert_serial_number = authority
                        .serial_number
                        .map(|serial| SerialNumber::new(&serial.to_be_bytes()))
                        .transpose()
                        .map_err(encoding)?;
                    Some(ExtensionParam::from_extension(
                        &AuthorityKeyIdentifier {
                            key_identifier,
                            authority_cert_issuer,
                            authority_cert_serial_number,
                        },
                        false,
                    )?)
                }
                None => None,
            },
            ExtensionKind::CrlDistributionPoints => match &desired.crl_distribution_points {
                Some(points) if !points.is_empty() => Some(ExtensionParam::from_extension(
                    &CrlDistributionPoints(points.clone()),
                    false,
                )?),
                _ => None,
            },
        };
        Ok(extension)
    }
}

fn general_names(names: &[TypedName]) -> Result<Vec<GeneralName>> {
    names
        .iter()
        .map(|name| {
            name.to_general_name()
                .map_err(|e| CsrKitError::from(BuildError::InvalidName(message_of(e))))
        })
        .collect()
}

fn subtrees(names: &[TypedName]) -> Result<Option<Vec<GeneralSubtree>>> {
    if names.is_empty() {
        return Ok(None);
    }
    let subtrees = general_names(names)?
        .into_iter()
        .map(|base| GeneralSubtree {
            base,
            minimum: 0,
            maximum: None,
        })
        .collect();
    Ok(Some(subtrees))
}

fn encoding(e: der::Error) -> CsrKitError {
    CsrKitError::Encoding(e.to_string())
}

/// The bare message of an encoding failure, for wrapping into a [`BuildError`].
fn message_of(error: CsrKitError) -> String {
    match error {
        CsrKitError::Encoding(message)
        | CsrKitError::Configuration(message)
        | CsrKitError::Decoding(message) => message,
        other => other.to_string(),
    }
}
