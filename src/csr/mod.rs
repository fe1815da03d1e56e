pub mod builder;
pub mod extensions;
pub mod info;
pub mod matcher;
pub mod normalize;
pub mod params;

use const_oid::AssociatedOid;
use der::{Decode, Encode, EncodePem};
use extensions::ExtensionParam;
use x509_cert::request::{CertReq, ExtensionReq};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::error::{CsrKitError, Result};
use crate::key::PublicKey;
use crate::name::{self, NameAttribute};

const PEM_LABELS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// A PKCS#10 certificate signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csr {
    /// The decoded request.
    pub inner: CertReq,
}

impl Csr {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertReq::from_der(der).map_err(|e| CsrKitError::Parse(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Decodes a PEM-encoded request (`CERTIFICATE REQUEST` or the legacy
    /// `NEW CERTIFICATE REQUEST` label).
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        let pem = pem::parse(pem_text).map_err(|e| CsrKitError::Parse(e.to_string()))?;
        if !PEM_LABELS.contains(&pem.tag()) {
            return Err(CsrKitError::Parse(format!(
                "unexpected PEM label \"{}\"",
                pem.tag()
            )));
        }
        Self::from_der(pem.contents())
    }

    /// Decodes PEM or DER, whichever `bytes` holds.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match std::str::from_utf8(bytes) {
            Ok(text) if text.trim_start().starts_with("-----BEGIN") => Self::from_pem(text),
            _ => Self::from_der(bytes),
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| CsrKitError::Encoding(e.to_string()))
    }

    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CsrKitError::Encoding(e.to_string()))
    }

    /// Subject attributes in encoding order.
    pub fn subject_attributes(&self) -> Result<Vec<NameAttribute>> {
        name::decode_name(&self.inner.info.subject)
    }

    /// Extensions carried in the extension request attribute, in encoding order.
    pub fn extensions(&self) -> Result<Vec<ExtensionParam>> {
        let mut extensions = Vec::new();
        for attribute in self.inner.info.attributes.iter() {
            if attribute.oid != ExtensionReq::OID {
                continue;
            }
            for value in attribute.values.iter() {
                let request = ExtensionReq::from_der(&value.to_der()?)?;
                extensions.extend(request.0.iter().map(ExtensionParam::from_x509));
            }
        }
        Ok(extensions)
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.info.public_key
    }

    /// Whether the self-signature verifies against the embedded public key.
    pub fn is_signature_valid(&self) -> bool {
        let Ok(public_key) = PublicKey::from_x509spki(self.public_key_info()) else {
            return false;
        };
        let Ok(info) = self.inner.info.to_der() else {
            return false;
        };
        let Some(signature) = self.inner.signature.as_bytes() else {
            return false;
        };
        public_key.verify(&self.inner.algorithm, &info, signature)
    }
}

/// Turns stored CSR bytes into a [`Csr`].
pub trait CsrParser {
    fn parse(&self, bytes: &[u8]) -> Result<Csr>;
}

/// Parser for PEM and DER encoded requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCsrParser;

impl CsrParser for DefaultCsrParser {
    fn parse(&self, bytes: &[u8]) -> Result<Csr> {
        Csr::parse(bytes)
    }
}
