//! Mock signer for testing.

use std::sync::{Arc, Mutex};

use super::der::encode_der_signature;
use super::traits::{DerSignature, KeyHandle, Signer, SignerError};

/// Deterministic signer for unit testing pipeline logic.
///
/// Returns the same DER signature for every call and records what it was asked
/// to sign.
#[derive(Clone)]
pub struct MockSigner {
    /// DER bytes returned on success.
    der: Vec<u8>,
    /// Captured sign requests.
    sign_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the next calls fail.
    failing: Arc<Mutex<bool>>,
}

impl MockSigner {
    pub fn new() -> Self {
        let r: Vec<u8> = (0x80..0xA0).collect();
        let s: Vec<u8> = (0x01..0x21).collect();
        Self::with_der(encode_der_signature(&r, &s))
    }

    /// Return `der` verbatim from every call.
    pub fn with_der(der: Vec<u8>) -> Self {
        Self {
            der,
            sign_log: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(false)),
        }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Get all signed inputs, in call order.
    pub fn get_signed(&self) -> Vec<Vec<u8>> {
        self.sign_log.lock().unwrap().clone()
    }

    /// Simulate the external tool failing.
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for MockSigner {
    fn sign(&self, data: &[u8], _key: &KeyHandle) -> Result<DerSignature, SignerError> {
        if *self.failing.lock().unwrap() {
            return Err(SignerError::Failed {
                status: "exit status: 1".into(),
                stderr: "mock signer failure".into(),
            });
        }
        self.sign_log.lock().unwrap().push(data.to_vec());
        Ok(DerSignature(self.der.clone()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
