//! Image signing.
//!
//! The signature itself comes from an external capability behind the
//! [`Signer`] trait. This module turns its DER output into the footer the
//! bootloader verifies:
//!
//! ```text
//! signed bytes | 0xFF padding to 256 | magic | size | r (LE) | s (LE)
//! ```

pub mod der;
pub mod mock;
pub mod openssl;
pub mod traits;

pub use der::{DerError, decode_der_signature, encode_der_signature};
pub use mock::MockSigner;
pub use openssl::OpensslSigner;
pub use traits::{DerSignature, KeyHandle, Signer, SignerError};

use tracing::debug;

use crate::payload::FirmwareBuffer;
use crate::protocol::SignatureFooter;

/// Signs a buffer and appends its footer.
pub struct SignatureEngine<'a, S: Signer> {
    signer: &'a S,
    key: &'a KeyHandle,
}

impl<'a, S: Signer> SignatureEngine<'a, S> {
    pub fn new(signer: &'a S, key: &'a KeyHandle) -> Self {
        Self { signer, key }
    }

    /// Sign the buffer as it is, then align it and append the footer.
    ///
    /// The footer's size field is the length of the signed bytes, without the
    /// alignment padding.
    pub fn sign(
        &self,
        buffer: FirmwareBuffer,
    ) -> Result<(FirmwareBuffer, SignatureFooter), SignerError> {
        let signed_len = buffer.len();
        let size =
            u32::try_from(signed_len).map_err(|_| SignerError::PayloadTooLarge(signed_len))?;

        let der = self.signer.sign(buffer.as_slice(), self.key)?;
        let raw = der.to_raw()?;
        let footer = SignatureFooter::new(size, raw);
        debug!(
            signer = self.signer.name(),
            signed_len,
            der_len = der.as_bytes().len(),
            "Appending signature footer"
        );

        Ok((buffer.align().append(&footer.to_bytes()), footer))
    }
}
