//! Private key loading, signing and public key handling.

use std::path::PathBuf;

use const_oid::{AssociatedOid, ObjectIdentifier};
use const_oid::db::{rfc5912, rfc8410};
use der::Encode;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::VerifyingKey as Ed25519VerifyingKey;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use zeroize::Zeroizing;

use crate::error::{BuildError, CsrKitError, Result};

/// Supported private keys.
pub enum KeyPair {
    Rsa(Box<RsaPrivateKey>),
    EcdsaP256(p256::ecdsa::SigningKey),
    EcdsaP384(p384::ecdsa::SigningKey),
    Ed25519(Ed25519SigningKey),
}

/// Public half of a [`KeyPair`], or the key embedded in a CSR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
    EcdsaP384(p384::ecdsa::VerifyingKey),
    Ed25519(Ed25519VerifyingKey),
}

/// Message digests available for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 5] = [
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha224,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    /// Selects a digest by name (`sha256`, `SHA-384`, ...). Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "sha1" => Some(DigestAlgorithm::Sha1),
            "sha224" => Some(DigestAlgorithm::Sha224),
            "sha256" => Some(DigestAlgorithm::Sha256),
            "sha384" => Some(DigestAlgorithm::Sha384),
            "sha512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha224 => Sha224::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair::{}(..)", self.algorithm_name())
    }
}

impl KeyPair {
    /// Decodes a PKCS#8 (optionally encrypted) or PKCS#1 RSA key from PEM.
    pub fn import_from_pem(pem_text: &str, passphrase: Option<&[u8]>) -> Result<Self> {
        let pem = pem::parse(pem_text).map_err(|e| CsrKitError::Key(e.to_string()))?;
        match pem.tag() {
            "ENCRYPTED PRIVATE KEY" => Self::import_from_encrypted_der(pem.contents(), passphrase),
            "PRIVATE KEY" => {
                reject_passphrase(passphrase)?;
                Self::import_from_pkcs8_der(pem.contents())
            }
            "RSA PRIVATE KEY" => {
                reject_passphrase(passphrase)?;
                let key = RsaPrivateKey::from_pkcs1_der(pem.contents())
                    .map_err(|e| CsrKitError::Key(e.to_string()))?;
                Ok(KeyPair::Rsa(Box::new(key)))
            }
            other => Err(CsrKitError::Key(format!(
                "Unsupported PEM label \"{other}\""
            ))),
        }
    }

    /// Decrypts and decodes an `EncryptedPrivateKeyInfo`.
    pub fn import_from_encrypted_der(der: &[u8], passphrase: Option<&[u8]>) -> Result<Self> {
        let passphrase = passphrase.ok_or_else(|| {
            CsrKitError::BadPassphrase("the private key is encrypted, but no passphrase was provided".to_string())
        })?;
        let encrypted = EncryptedPrivateKeyInfo::try_from(der)?;
        let document = encrypted
            .decrypt(passphrase)
            .map_err(|_| CsrKitError::BadPassphrase("wrong passphrase".to_string()))?;
        Self::import_from_pkcs8_der(document.as_bytes())
    }

    /// Decodes an unencrypted PKCS#8 `PrivateKeyInfo`.
    pub fn import_from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let info = PrivateKeyInfo::try_from(der)?;
        let algorithm = info.algorithm.oid;
        let key = match algorithm {
            rfc5912::RSA_ENCRYPTION => {
                KeyPair::Rsa(Box::new(RsaPrivateKey::from_pkcs8_der(der)?))
            }
            rfc5912::ID_EC_PUBLIC_KEY => match info.algorithm.parameters_oid()? {
                rfc5912::SECP_256_R_1 => {
                    KeyPair::EcdsaP256(p256::ecdsa::SigningKey::from_pkcs8_der(der)?)
                }
                rfc5912::SECP_384_R_1 => {
                    KeyPair::EcdsaP384(p384::ecdsa::SigningKey::from_pkcs8_der(der)?)
                }
                curve => {
                    return Err(CsrKitError::Key(format!("Unsupported elliptic curve {curve}")));
                }
            },
            rfc8410::ID_ED_25519 => KeyPair::Ed25519(Ed25519SigningKey::from_pkcs8_der(der)?),
            other => {
                return Err(CsrKitError::Key(format!(
                    "Unsupported private key algorithm {other}"
                )));
            }
        };
        Ok(key)
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            KeyPair::Rsa(_) => "RSA",
            KeyPair::EcdsaP256(_) => "ECDSA P-256",
            KeyPair::EcdsaP384(_) => "ECDSA P-384",
            KeyPair::Ed25519(_) => "Ed25519",
        }
    }

    /// Returns the public key as a `SubjectPublicKeyInfo`.
    pub fn as_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        PublicKey::from_key_pair(self).to_spki()
    }

    /// Signs `data`, hashing it with `digest` first unless the algorithm signs without one.
    pub fn sign_data(
        &self,
        data: &[u8],
        digest: Option<DigestAlgorithm>,
    ) -> Result<(AlgorithmIdentifierOwned, Vec<u8>)> {
        let signing_error = |e: &dyn std::fmt::Display| BuildError::Signing(e.to_string());
        let require_digest = || {
            digest.ok_or_else(|| {
                BuildError::Signing(format!("{} signatures require a digest", self.algorithm_name()))
            })
        };

        let (oid, signature) = match self {
            KeyPair::Rsa(private) => {
                let private = private.as_ref().clone();
                let digest = require_digest()?;
                let signature = match digest {
                    DigestAlgorithm::Sha1 => rsa_sign::<Sha1>(private, data),
                    DigestAlgorithm::Sha224 => rsa_sign::<Sha224>(private, data),
                    DigestAlgorithm::Sha256 => rsa_sign::<Sha256>(private, data),
                    DigestAlgorithm::Sha384 => rsa_sign::<Sha384>(private, data),
                    DigestAlgorithm::Sha512 => rsa_sign::<Sha512>(private, data),
                }
                .map_err(|e| signing_error(&e))?;
                (rsa_oid(digest), signature)
            }
            KeyPair::EcdsaP256(signing_key) => {
                let digest = require_digest()?;
                let signature: p256::ecdsa::Signature = signing_key
                    .sign_prehash(&widen(digest.digest(data), 32))
                    .map_err(|e| signing_error(&e))?;
                (ecdsa_oid(digest), signature.to_der().as_bytes().to_vec())
            }
            KeyPair::EcdsaP384(signing_key) => {
                let digest = require_digest()?;
                let signature: p384::ecdsa::Signature = signing_key
                    .sign_prehash(&widen(digest.digest(data), 48))
                    .map_err(|e| signing_error(&e))?;
                (ecdsa_oid(digest), signature.to_der().as_bytes().to_vec())
            }
            KeyPair::Ed25519(signing_key) => {
                let signature = ed25519_dalek::Signer::try_sign(signing_key, data)
                    .map_err(|e| signing_error(&e))?;
                (rfc8410::ID_ED_25519, signature.to_bytes().to_vec())
            }
        };

        Ok((
            AlgorithmIdentifierOwned {
                oid,
                parameters: None,
            },
            signature,
        ))
    }
}

fn rsa_oid(digest: DigestAlgorithm) -> ObjectIdentifier {
    match digest {
        DigestAlgorithm::Sha1 => rfc5912::SHA_1_WITH_RSA_ENCRYPTION,
        DigestAlgorithm::Sha224 => rfc5912::SHA_224_WITH_RSA_ENCRYPTION,
        DigestAlgorithm::Sha256 => rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
        DigestAlgorithm::Sha384 => rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
        DigestAlgorithm::Sha512 => rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
    }
}

fn ecdsa_oid(digest: DigestAlgorithm) -> ObjectIdentifier {
    match digest {
        DigestAlgorithm::Sha1 => crate::oid::ECDSA_WITH_SHA_1,
        DigestAlgorithm::Sha224 => rfc5912::ECDSA_WITH_SHA_224,
        DigestAlgorithm::Sha256 => rfc5912::ECDSA_WITH_SHA_256,
        DigestAlgorithm::Sha384 => rfc5912::ECDSA_WITH_SHA_384,
        DigestAlgorithm::Sha512 => rfc5912::ECDSA_WITH_SHA_512,
    }
}

/// The digest behind a signature algorithm OID, looked up with `to_oid`.
fn digest_for(
    oid: ObjectIdentifier,
    to_oid: fn(DigestAlgorithm) -> ObjectIdentifier,
) -> Option<DigestAlgorithm> {
    DigestAlgorithm::ALL
        .into_iter()
        .find(|digest| to_oid(*digest) == oid)
}

fn rsa_sign<D: Digest + AssociatedOid>(
    private: RsaPrivateKey,
    data: &[u8],
) -> std::result::Result<Vec<u8>, rsa::signature::Error> {
    Ok(rsa::pkcs1v15::SigningKey::<D>::new(private)
        .try_sign(data)?
        .to_vec())
}

fn rsa_verify<D: Digest + AssociatedOid>(
    public: RsaPublicKey,
    data: &[u8],
    signature: &rsa::pkcs1v15::Signature,
) -> bool {
    rsa::pkcs1v15::VerifyingKey::<D>::new(public)
        .verify(data, signature)
        .is_ok()
}

/// Left-pads a digest shorter than the curve's field to its width; the integer it denotes is unchanged.
fn widen(prehash: Vec<u8>, field_len: usize) -> Vec<u8> {
    if prehash.len() >= field_len {
        return prehash;
    }
    let mut widened = vec![0u8; field_len - prehash.len()];
    widened.extend_from_slice(&prehash);
    widened
}

fn reject_passphrase(passphrase: Option<&[u8]>) -> Result<()> {
    match passphrase {
        Some(_) => Err(CsrKitError::BadPassphrase(
            "a passphrase was provided, but the private key is not encrypted".to_string(),
        )),
        None => Ok(()),
    }
}

impl PublicKey {
    pub fn from_key_pair(key: &KeyPair) -> Self {
        match key {
            KeyPair::Rsa(private) => PublicKey::Rsa(RsaPublicKey::from(private.as_ref())),
            KeyPair::EcdsaP256(signing_key) => PublicKey::EcdsaP256(*signing_key.verifying_key()),
            KeyPair::EcdsaP384(signing_key) => PublicKey::EcdsaP384(*signing_key.verifying_key()),
            KeyPair::Ed25519(signing_key) => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    /// Decodes a `SubjectPublicKeyInfo` into one of the supported key types.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let der = spki.to_der()?;
        let unsupported = || CsrKitError::Decoding("Unsupported public key".to_string());
        match spki.algorithm.oid {
            rfc5912::RSA_ENCRYPTION => RsaPublicKey::from_public_key_der(&der)
                .map(PublicKey::Rsa)
                .map_err(|e| CsrKitError::Decoding(e.to_string())),
            rfc5912::ID_EC_PUBLIC_KEY => p256::ecdsa::VerifyingKey::from_public_key_der(&der)
                .map(PublicKey::EcdsaP256)
                .or_else(|_| {
                    p384::ecdsa::VerifyingKey::from_public_key_der(&der).map(PublicKey::EcdsaP384)
                })
                .map_err(|_| unsupported()),
            rfc8410::ID_ED_25519 => {
                let bytes = <[u8; 32]>::try_from(spki.subject_public_key.raw_bytes())
                    .map_err(|_| unsupported())?;
                Ed25519VerifyingKey::from_bytes(&bytes)
                    .map(PublicKey::Ed25519)
                    .map_err(|e| CsrKitError::Decoding(e.to_string()))
            }
            _ => Err(unsupported()),
        }
    }

    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let encoding_error = |e: x509_cert::spki::Error| CsrKitError::Encoding(e.to_string());
        match self {
            PublicKey::Rsa(public) => {
                SubjectPublicKeyInfoOwned::from_key(public.clone()).map_err(encoding_error)
            }
            PublicKey::EcdsaP256(verifying_key) => {
                SubjectPublicKeyInfoOwned::from_key(*verifying_key).map_err(encoding_error)
            }
            PublicKey::EcdsaP384(verifying_key) => {
                SubjectPublicKeyInfoOwned::from_key(*verifying_key).map_err(encoding_error)
            }
            PublicKey::Ed25519(verifying_key) => Ok(SubjectPublicKeyInfoOwned {
                algorithm: AlgorithmIdentifierOwned {
                    oid: rfc8410::ID_ED_25519,
                    parameters: None,
                },
                subject_public_key: der::asn1::BitString::from_bytes(verifying_key.as_bytes())?,
            }),
        }
    }

    /// Checks `signature` over `data` made with `algorithm`.
    pub fn verify(&self, algorithm: &AlgorithmIdentifierOwned, data: &[u8], signature: &[u8]) -> bool {
        match self {
            PublicKey::Rsa(public) => {
                let Ok(signature) = rsa::pkcs1v15::Signature::try_from(signature) else {
                    return false;
                };
                let public = public.clone();
                match digest_for(algorithm.oid, rsa_oid) {
                    Some(DigestAlgorithm::Sha1) => rsa_verify::<Sha1>(public, data, &signature),
                    Some(DigestAlgorithm::Sha224) => rsa_verify::<Sha224>(public, data, &signature),
                    Some(DigestAlgorithm::Sha256) => rsa_verify::<Sha256>(public, data, &signature),
                    Some(DigestAlgorithm::Sha384) => rsa_verify::<Sha384>(public, data, &signature),
                    Some(DigestAlgorithm::Sha512) => rsa_verify::<Sha512>(public, data, &signature),
                    None => false,
                }
            }
            PublicKey::EcdsaP256(verifying_key) => {
                let (Some(prehash), Ok(signature)) = (
                    ecdsa_prehash(algorithm, data),
                    p256::ecdsa::Signature::from_der(signature),
                ) else {
                    return false;
                };
                verifying_key
                    .verify_prehash(&widen(prehash, 32), &signature)
                    .is_ok()
            }
            PublicKey::EcdsaP384(verifying_key) => {
                let (Some(prehash), Ok(signature)) = (
                    ecdsa_prehash(algorithm, data),
                    p384::ecdsa::Signature::from_der(signature),
                ) else {
                    return false;
                };
                verifying_key
                    .verify_prehash(&widen(prehash, 48), &signature)
                    .is_ok()
            }
            PublicKey::Ed25519(verifying_key) => {
                if algorithm.oid != rfc8410::ID_ED_25519 {
                    return false;
                }
                let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                    return false;
                };
                ed25519_dalek::Verifier::verify(verifying_key, data, &signature).is_ok()
            }
        }
    }
}

fn ecdsa_prehash(algorithm: &AlgorithmIdentifierOwned, data: &[u8]) -> Option<Vec<u8>> {
    digest_for(algorithm.oid, ecdsa_oid).map(|digest| digest.digest(data))
}

/// Computes the RFC 5280 (method 1) key identifier: SHA-1 over the subject public key bits.
pub fn key_identifier(spki: &SubjectPublicKeyInfoOwned) -> Vec<u8> {
    Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec()
}

/// The signing seam used by the CSR builder.
pub trait CsrSigner {
    /// Public key placed into the request.
    fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned>;

    /// Whether the algorithm needs an explicit message digest to sign.
    fn requires_digest(&self) -> bool;

    /// Name of the key algorithm, for error messages.
    fn algorithm_name(&self) -> &'static str;

    /// Signs `data` and returns the signature algorithm together with the signature bits.
    fn sign(
        &self,
        data: &[u8],
        digest: Option<DigestAlgorithm>,
    ) -> Result<(AlgorithmIdentifierOwned, Vec<u8>)>;
}

impl CsrSigner for KeyPair {
    fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        self.as_spki()
    }

    fn requires_digest(&self) -> bool {
        !matches!(self, KeyPair::Ed25519(_))
    }

    fn algorithm_name(&self) -> &'static str {
        KeyPair::algorithm_name(self)
    }

    fn sign(
        &self,
        data: &[u8],
        digest: Option<DigestAlgorithm>,
    ) -> Result<(AlgorithmIdentifierOwned, Vec<u8>)> {
        self.sign_data(data, digest)
    }
}

/// Loads the private key used for matching and signing.
pub trait KeyLoader {
    fn load(&self) -> Result<KeyPair>;
}

/// Where the private key comes from.
#[derive(Clone)]
pub enum KeyMaterial {
    Path(PathBuf),
    Content(Zeroizing<String>),
}

/// A private key reference plus its optional passphrase.
#[derive(Clone)]
pub struct PrivateKeySource {
    pub material: KeyMaterial,
    pub passphrase: Option<Zeroizing<String>>,
}

impl PrivateKeySource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            material: KeyMaterial::Path(path.into()),
            passphrase: None,
        }
    }

    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            material: KeyMaterial::Content(Zeroizing::new(content.into())),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }
}

impl KeyLoader for PrivateKeySource {
    fn load(&self) -> Result<KeyPair> {
        let passphrase = self.passphrase.as_ref().map(|p| p.as_bytes());
        match &self.material {
            KeyMaterial::Content(content) => KeyPair::import_from_pem(content, passphrase),
            KeyMaterial::Path(path) => {
                let bytes = Zeroizing::new(std::fs::read(path).map_err(|e| {
                    CsrKitError::Key(format!("Cannot read {}: {e}", path.display()))
                })?);
                match std::str::from_utf8(&bytes) {
                    Ok(text) if text.contains("-----BEGIN") => {
                        KeyPair::import_from_pem(text, passphrase)
                    }
                    _ => match passphrase {
                        Some(_) => KeyPair::import_from_encrypted_der(&bytes, passphrase),
                        None => KeyPair::import_from_pkcs8_der(&bytes),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p256_key() -> KeyPair {
        KeyPair::EcdsaP256(p256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap())
    }

    #[test]
    fn digest_names_are_normalized() {
        assert_eq!(DigestAlgorithm::from_name("SHA-256"), Some(DigestAlgorithm::Sha256));
        assert_eq!(DigestAlgorithm::from_name("sha512"), Some(DigestAlgorithm::Sha512));
        assert_eq!(DigestAlgorithm::from_name("SHA1"), Some(DigestAlgorithm::Sha1));
        assert_eq!(DigestAlgorithm::from_name("sha224"), Some(DigestAlgorithm::Sha224));
        assert_eq!(DigestAlgorithm::from_name("md5"), None);
    }

    #[test]
    fn p384_signatures_verify_with_short_digests() {
        let key = KeyPair::EcdsaP384(p384::ecdsa::SigningKey::from_slice(&[7u8; 48]).unwrap());
        let public = PublicKey::from_key_pair(&key);
        for digest in DigestAlgorithm::ALL {
            let (algorithm, signature) = key.sign_data(b"payload", Some(digest)).unwrap();
            assert_eq!(algorithm.oid, ecdsa_oid(digest));
            assert!(public.verify(&algorithm, b"payload", &signature));
        }
    }

    #[test]
    fn rsa_signatures_verify_for_every_digest() {
        let pem = include_str!("../tests/fixtures/rsa2048.pem");
        let key = KeyPair::import_from_pem(pem, None).unwrap();
        let public = PublicKey::from_key_pair(&key);
        for digest in DigestAlgorithm::ALL {
            let (algorithm, signature) = key.sign_data(b"payload", Some(digest)).unwrap();
            assert_eq!(algorithm.oid, rsa_oid(digest));
            assert!(public.verify(&algorithm, b"payload", &signature));
            assert!(!public.verify(&algorithm, b"tampered", &signature));
        }
    }

    #[test]
    fn ecdsa_signatures_verify_for_every_digest() {
        let key = p256_key();
        let public = PublicKey::from_key_pair(&key);
        for digest in DigestAlgorithm::ALL {
            let (algorithm, signature) = key.sign_data(b"payload", Some(digest)).unwrap();
            assert!(public.verify(&algorithm, b"payload", &signature));
            assert!(!public.verify(&algorithm, b"tampered", &signature));
        }
    }

    #[test]
    fn ed25519_signs_without_digest() {
        let key = KeyPair::Ed25519(Ed25519SigningKey::from_bytes(&[3u8; 32]));
        assert!(!key.requires_digest());
        let (algorithm, signature) = key.sign_data(b"payload", None).unwrap();
        assert_eq!(algorithm.oid, rfc8410::ID_ED_25519);
        assert!(PublicKey::from_key_pair(&key).verify(&algorithm, b"payload", &signature));
    }

    #[test]
    fn ecdsa_without_digest_is_rejected() {
        assert!(matches!(
            p256_key().sign_data(b"payload", None),
            Err(CsrKitError::Build(BuildError::Signing(_)))
        ));
    }

    #[test]
    fn spki_round_trips_through_public_key() {
        let key = p256_key();
        let spki = key.as_spki().unwrap();
        let decoded = PublicKey::from_x509spki(&spki).unwrap();
        assert_eq!(decoded, PublicKey::from_key_pair(&key));
        assert_eq!(key_identifier(&spki).len(), 20);
    }
}
