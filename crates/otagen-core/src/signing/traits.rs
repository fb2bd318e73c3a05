//! Signing capability abstraction.
//!
//! Defines the `Signer` trait the pipeline signs through, allowing different
//! implementations (openssl, mock, etc.).

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::der::{DerError, decode_der_signature};
use crate::protocol::RawSignature;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Failed to launch signer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Signer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Signer produced no signature")]
    EmptyOutput,

    #[error("Payload of {0} bytes is too large to sign")]
    PayloadTooLarge(usize),

    #[error("Malformed signature: {0}")]
    Der(#[from] DerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque reference to private key material. Only the signer looks inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle(PathBuf);

impl KeyHandle {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

/// DER-encoded ECDSA-SHA256 signature as returned by a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerSignature(pub Vec<u8>);

impl DerSignature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decode into the bootloader's raw little-endian r || s form.
    pub fn to_raw(&self) -> Result<RawSignature, DerError> {
        decode_der_signature(&self.0)
    }
}

/// Abstract signing capability.
///
/// This trait enables:
/// - Production implementation shelling out to openssl
/// - Mock implementation returning fixed signatures for testing
///
/// Calls are synchronous and blocking; a failure aborts the image build.
pub trait Signer {
    /// Sign `data` with ECDSA over SHA-256 and return the DER signature.
    fn sign(&self, data: &[u8], key: &KeyHandle) -> Result<DerSignature, SignerError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl<S: Signer + ?Sized> Signer for &S {
    fn sign(&self, data: &[u8], key: &KeyHandle) -> Result<DerSignature, SignerError> {
        (**self).sign(data, key)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<S: Signer + ?Sized> Signer for Box<S> {
    fn sign(&self, data: &[u8], key: &KeyHandle) -> Result<DerSignature, SignerError> {
        (**self).sign(data, key)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
