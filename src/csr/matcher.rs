//! Decides whether an existing CSR already satisfies a [`DesiredState`].
//!
//! Every managed extension has its own check; all of them, plus the subject check and
//! the signature/key binding check, must pass for a CSR to match.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use der::Encode;
use x509_cert::ext::pkix::constraints::name::GeneralSubtree;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints, CrlDistributionPoints, ExtendedKeyUsage, KeyUsage,
    NameConstraints, SubjectAltName, SubjectKeyIdentifier,
};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use super::Csr;
use super::extensions::{ExtensionKind, ExtensionParam, ToAndFromX509Extension, is_must_staple};
use super::params::{DesiredState, Requested, SubjectKeyIdentifierMode};
use crate::key::{PublicKey, key_identifier};
use crate::name::{NameAttribute, TypedName, general_name_der};

/// The first reason a CSR does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// Subject or extension list could not be decoded.
    Undecodable,
    Signature,
    PublicKey,
    Subject,
    Extension(ExtensionKind),
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Undecodable => write!(f, "the CSR contents cannot be decoded"),
            Mismatch::Signature => write!(f, "the CSR signature is invalid"),
            Mismatch::PublicKey => write!(f, "the CSR was made for a different key"),
            Mismatch::Subject => write!(f, "the subject differs"),
            Mismatch::Extension(kind) => write!(f, "the {kind:?} extension differs"),
        }
    }
}

/// Compares CSRs against one desired state and signing key.
pub struct CsrMatcher<'a> {
    desired: &'a DesiredState,
    signing_key: SubjectPublicKeyInfoOwned,
}

impl<'a> CsrMatcher<'a> {
    pub fn new(desired: &'a DesiredState, signing_key: SubjectPublicKeyInfoOwned) -> Self {
        Self {
            desired,
            signing_key,
        }
    }

    /// Creates a matcher for the public half of a loaded key.
    pub fn for_public_key(
        desired: &'a DesiredState,
        signing_key: &PublicKey,
    ) -> crate::error::Result<Self> {
        Ok(Self::new(desired, signing_key.to_spki()?))
    }

    pub fn matches(&self, csr: &Csr) -> bool {
        self.first_mismatch(csr).is_none()
    }

    /// Runs every check and reports the first failing one.
    pub fn first_mismatch(&self, csr: &Csr) -> Option<Mismatch> {
        if !csr.is_signature_valid() {
            return Some(Mismatch::Signature);
        }
        if !same_der(csr.public_key_info(), &self.signing_key) {
            return Some(Mismatch::PublicKey);
        }

        let Ok(subject) = csr.subject_attributes() else {
            return Some(Mismatch::Undecodable);
        };
        if !self.check_subject(subject) {
            return Some(Mismatch::Subject);
        }

        let Ok(extensions) = csr.extensions() else {
            return Some(Mismatch::Undecodable);
        };
        ExtensionKind::ALL
            .into_iter()
            .find(|kind| !self.check_extension(*kind, &extensions))
            .map(Mismatch::Extension)
    }

    fn check_subject(&self, existing: Vec<NameAttribute>) -> bool {
        if self.desired.subject_ordered {
            return existing == self.desired.subject;
        }
        let desired: BTreeSet<&NameAttribute> = self.desired.subject.iter().collect();
        desired == existing.iter().collect::<BTreeSet<_>>()
    }

    fn check_extension(&self, kind: ExtensionKind, extensions: &[ExtensionParam]) -> bool {
        let existing = kind.find(extensions);
        match kind {
            ExtensionKind::SubjectAltName => self.check_subject_alt_name(existing),
            ExtensionKind::KeyUsage => self.check_key_usage(existing),
            ExtensionKind::ExtendedKeyUsage => self.check_extended_key_usage(existing),
            ExtensionKind::BasicConstraints => self.check_basic_constraints(existing),
            ExtensionKind::OcspMustStaple => self.check_ocsp_must_staple(extensions),
            ExtensionKind::NameConstraints => self.check_name_constraints(existing),
            ExtensionKind::SubjectKeyIdentifier => self.check_subject_key_identifier(existing),
            ExtensionKind::AuthorityKeyIdentifier => self.check_authority_key_identifier(existing),
            ExtensionKind::CrlDistributionPoints => self.check_crl_distribution_points(existing),
        }
    }

    fn check_subject_alt_name(&self, existing: Option<&ExtensionParam>) -> bool {
        let Some(desired) = &self.desired.subject_alt_name else {
            return existing.is_none();
        };
        let Some((san, critical)) = decode::<SubjectAltName>(existing) else {
            return false;
        };
        critical == desired.critical && name_set(&san.0) == typed_name_set(&desired.value)
    }

    fn check_key_usage(&self, existing: Option<&ExtensionParam>) -> bool {
        let Some(desired) = &self.desired.key_usage else {
            return existing.is_none();
        };
        decode::<KeyUsage>(existing)
            .is_some_and(|(usage, critical)| critical == desired.critical && usage.0 == desired.value)
    }

    fn check_extended_key_usage(&self, existing: Option<&ExtensionParam>) -> bool {
        let current = match existing {
            Some(_) => match decode::<ExtendedKeyUsage>(existing) {
                Some((usage, critical)) => Some((usage.0.into_iter().collect::<HashSet<_>>(), critical)),
                None => return false,
            },
            None => None,
        };
        match (&self.desired.extended_key_usage, current) {
            (None, None) => true,
            (None, Some((usages, _))) => usages.is_empty(),
            (Some(_), None) => false,
            (Some(desired), Some((usages, critical))) => {
                critical == desired.critical
                    && usages == desired.value.iter().copied().collect::<HashSet<_>>()
            }
        }
    }

    fn check_basic_constraints(&self, existing: Option<&ExtensionParam>) -> bool {
        let current = match existing {
            Some(_) => match decode::<BasicConstraints>(existing) {
                Some(value) => Some(value),
                None => return false,
            },
            None => None,
        };
        let (current_ca, current_path_length) = current
            .as_ref()
            .map(|(constraints, _)| (constraints.ca, constraints.path_len_constraint))
            .unwrap_or((false, None));
        let (desired_ca, desired_path_length) = self
            .desired
            .basic_constraints
            .as_ref()
            .map(|constraints| (constraints.value.ca, constraints.value.path_length))
            .unwrap_or((false, None));
        if current_ca != desired_ca || current_path_length != desired_path_length {
            return false;
        }
        match (&self.desired.basic_constraints, current) {
            (Some(desired), Some((_, critical))) => critical == desired.critical,
            (Some(_), None) => false,
            (None, current) => current.is_none(),
        }
    }

    fn check_ocsp_must_staple(&self, extensions: &[ExtensionParam]) -> bool {
        match &self.desired.ocsp_must_staple {
            Some(desired) => extensions
                .iter()
                .find(|extension| is_must_staple(extension))
                .is_some_and(|extension| extension.critical == desired.critical),
            // Any TLS feature extension counts, whatever features it lists.
            None => ExtensionKind::OcspMustStaple.find(extensions).is_none(),
        }
    }

    fn check_name_constraints(&self, existing: Option<&ExtensionParam>) -> bool {
        let current = match existing {
            Some(_) => match decode::<NameConstraints>(existing) {
                Some(value) => Some(value),
                None => return false,
            },
            None => None,
        };
        let (permitted, excluded, critical) = match &current {
            Some((constraints, critical)) => (
                subtree_set(constraints.permitted_subtrees.as_deref()),
                subtree_set(constraints.excluded_subtrees.as_deref()),
                Some(*critical),
            ),
            None => (HashSet::new(), HashSet::new(), None),
        };
        match &self.desired.name_constraints {
            Some(Requested { value, critical: desired_critical }) => {
                critical == Some(*desired_critical)
                    && permitted == typed_name_set(&value.permitted)
                    && excluded == typed_name_set(&value.excluded)
            }
            None => permitted.is_empty() && excluded.is_empty(),
        }
    }

    fn check_subject_key_identifier(&self, existing: Option<&ExtensionParam>) -> bool {
        let expected = match &self.desired.subject_key_identifier {
            SubjectKeyIdentifierMode::Absent => return existing.is_none(),
            // Derived from the current key, which may differ from the one in the CSR.
            SubjectKeyIdentifierMode::Derive => key_identifier(&self.signing_key),
            SubjectKeyIdentifierMode::Explicit(bytes) => bytes.clone(),
        };
        decode::<SubjectKeyIdentifier>(existing)
            .is_some_and(|(ski, critical)| !critical && ski.0.as_bytes() == expected.as_slice())
    }

    fn check_authority_key_identifier(&self, existing: Option<&ExtensionParam>) -> bool {
        let Some(desired) = &self.desired.authority_key_identifier else {
            return existing.is_none();
        };
        let Some((aki, critical)) = decode::<AuthorityKeyIdentifier>(existing) else {
            return false;
        };
        let key_identifier = aki.key_identifier.as_ref().map(|id| id.as_bytes().to_vec());
        let issuer = aki.authority_cert_issuer.as_deref().map(name_set);
        let serial = match &aki.authority_cert_serial_number {
            Some(serial) => match serial_to_u64(serial) {
                Some(serial) => Some(serial),
                None => return false,
            },
            None => None,
        };
        !critical
            && key_identifier == desired.key_identifier
            && issuer == desired.issuer.as_deref().map(typed_name_set)
            && serial == desired.serial_number
    }

    fn check_crl_distribution_points(&self, existing: Option<&ExtensionParam>) -> bool {
        let Some(desired) = &self.desired.crl_distribution_points else {
            return existing.is_none();
        };
        decode::<CrlDistributionPoints>(existing).is_some_and(|(points, _)| points.0 == *desired)
    }
}

/// Answers whether `csr` satisfies `desired` when signed by `signing_key`.
pub fn matches(csr: &Csr, desired: &DesiredState, signing_key: &PublicKey) -> bool {
    CsrMatcher::for_public_key(desired, signing_key).is_ok_and(|matcher| matcher.matches(csr))
}

fn decode<E: ToAndFromX509Extension>(existing: Option<&ExtensionParam>) -> Option<(E, bool)> {
    let extension = existing?;
    extension
        .to_extension::<E>()
        .ok()
        .map(|value| (value, extension.critical))
}

fn same_der(a: &SubjectPublicKeyInfoOwned, b: &SubjectPublicKeyInfoOwned) -> bool {
    match (a.to_der(), b.to_der()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Comparison key for a general name: its typed form when it has one, its DER otherwise.
#[derive(Debug, PartialEq, Eq, Hash)]
enum NameKey {
    Typed(TypedName),
    Opaque(Vec<u8>),
}

fn name_set(names: &[GeneralName]) -> HashSet<NameKey> {
    names
        .iter()
        .map(|name| match TypedName::from_general_name(name) {
            Some(typed) => NameKey::Typed(typed),
            None => NameKey::Opaque(general_name_der(name).unwrap_or_default()),
        })
        .collect()
}

fn typed_name_set(names: &[TypedName]) -> HashSet<NameKey> {
    names.iter().cloned().map(NameKey::Typed).collect()
}

fn subtree_set(subtrees: Option<&[GeneralSubtree]>) -> HashSet<NameKey> {
    let bases: Vec<GeneralName> = subtrees
        .unwrap_or_default()
        .iter()
        .map(|subtree| subtree.base.clone())
        .collect();
    name_set(&bases)
}

pub(crate) fn serial_to_u64(serial: &SerialNumber) -> Option<u64> {
    let bytes = serial.as_bytes();
    let significant = &bytes[bytes.iter().take_while(|b| **b == 0).count()..];
    if significant.len() > 8 {
        return None;
    }
    Some(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}
