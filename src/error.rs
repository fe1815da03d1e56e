//! use csrkit::error::CsrKitError;

use thiserror::Error;

/// Represents errors that can occur while reconciling a certificate signing request.
///
/// Configuration and key errors are fatal and caller-fixable. Build errors are fatal
/// and carry enough context to tell apart their root cause. Parse errors on an
/// existing CSR are recovered by the reconciler as "rebuild".
#[derive(Debug, Error, Clone)]
pub enum CsrKitError {
    /// Invalid or conflicting configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The private key could not be read or decoded.
    #[error("Key error: {0}")]
    Key(String),

    /// The private key is encrypted and the passphrase is wrong, missing or superfluous.
    #[error("Bad passphrase: {0}")]
    BadPassphrase(String),

    /// Failure while building or signing a new CSR.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// An existing CSR could not be parsed.
    #[error("Failed to parse CSR: {0}")]
    Parse(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    Encoding(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    Decoding(String),
}

/// Where a name that failed to encode came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrigin {
    /// Listed directly as a subject alternative name.
    SubjectAltName,
    /// Synthesized from the subject common name.
    CommonName,
}

/// Errors raised while assembling and signing a CSR.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Unsupported digest \"{0}\"")]
    UnsupportedDigest(String),

    #[error(
        "Signing with {algorithm} keys requires digest-less signing, which the active signer backend does not support"
    )]
    DigestlessSigningUnsupported { algorithm: &'static str },

    #[error("Error while creating CSR: {message}\n{}", .origin.hint())]
    NameEncoding { message: String, origin: NameOrigin },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Signing failed: {0}")]
    Signing(String),
}

impl NameOrigin {
    fn hint(&self) -> &'static str {
        match self {
            NameOrigin::CommonName => {
                "This is probably caused because the Common Name is used as a SAN. Specifying use_common_name_for_san=false might fix this."
            }
            NameOrigin::SubjectAltName => {
                "This is probably caused by an invalid Subject Alternative DNS Name."
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CsrKitError>;

impl From<der::Error> for CsrKitError {
    /// Converts a `der::Error` into a `CsrKitError`.
    fn from(err: der::Error) -> Self {
        CsrKitError::Decoding(err.to_string())
    }
}

impl From<pkcs8::Error> for CsrKitError {
    fn from(err: pkcs8::Error) -> Self {
        CsrKitError::Key(err.to_string())
    }
}

impl From<x509_cert::spki::Error> for CsrKitError {
    fn from(err: x509_cert::spki::Error) -> Self {
        CsrKitError::Decoding(err.to_string())
    }
}

impl From<pem::PemError> for CsrKitError {
    fn from(err: pem::PemError) -> Self {
        CsrKitError::Decoding(err.to_string())
    }
}

impl From<rsa::Error> for CsrKitError {
    fn from(err: rsa::Error) -> Self {
        CsrKitError::Key(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_encoding_message_names_its_origin() {
        let from_cn = BuildError::NameEncoding {
            message: "bad label".to_string(),
            origin: NameOrigin::CommonName,
        };
        assert!(from_cn.to_string().contains("Common Name is used as a SAN"));

        let direct = BuildError::NameEncoding {
            message: "bad label".to_string(),
            origin: NameOrigin::SubjectAltName,
        };
        assert!(direct.to_string().contains("invalid Subject Alternative DNS Name"));
    }
}
