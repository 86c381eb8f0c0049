//! XSalsa20-Poly1305 ("secretbox") envelope encryption of arbitrary strings.
//!
//! Every sealed value carries the wrapped DEK it was sealed under, so the key
//! can be identified again at decrypt time.
//!
//! **Never reuse a nonce under the same DEK.** Each call to [`seal`] draws a
//! fresh 192-bit nonce from the OS CSPRNG.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_secretbox::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Nonce, XSalsa20Poly1305,
};
use thiserror::Error;

use super::KEY_LEN;

/// Byte length of an XSalsa20 nonce (24 bytes = 192 bits).
pub const NONCE_LEN: usize = 24;

const LEN_PREFIX: usize = 4;

/// Errors produced by the envelope layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The DEK is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid DEK length: expected {KEY_LEN} bytes")]
    InvalidKeyLength,

    /// The serialised payload is structurally malformed.
    #[error("malformed envelope payload: {0}")]
    Format(&'static str),

    /// The box could not be opened. Deliberately carries no detail.
    #[error("authentication failed")]
    AuthenticationFailed,
}

/// A sealed value: the wrapped key reference, the nonce, and the secretbox output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopePayload {
    /// The KMS-wrapped DEK the message was sealed under.
    pub encrypted_data_key: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    /// Poly1305 tag followed by the XSalsa20 ciphertext.
    pub message: Vec<u8>,
}

impl EnvelopePayload {
    /// Serialise as `len(key) || key || nonce || len(message) || message`,
    /// lengths as big-endian `u32`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            2 * LEN_PREFIX + self.encrypted_data_key.len() + NONCE_LEN + self.message.len(),
        );
        put_prefixed(&mut out, &self.encrypted_data_key);
        out.extend_from_slice(&self.nonce);
        put_prefixed(&mut out, &self.message);
        out
    }

    /// Parse the layout written by [`EnvelopePayload::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Format`] on truncation, an impossible length
    /// prefix, or trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut reader = Reader { rest: bytes };
        let encrypted_data_key = reader.prefixed()?.to_vec();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(reader.take(NONCE_LEN, "truncated nonce")?);
        let message = reader.prefixed()?.to_vec();
        if !reader.rest.is_empty() {
            return Err(EnvelopeError::Format("trailing bytes"));
        }
        Ok(Self {
            encrypted_data_key,
            nonce,
            message,
        })
    }

    /// Encode to the externally visible ciphertext string (standard base64).
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Decode a string produced by [`EnvelopePayload::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Format`] if the input is not base64 or the
    /// decoded bytes are malformed.
    pub fn decode(s: &str) -> Result<Self, EnvelopeError> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|_| EnvelopeError::Format("invalid base64"))?;
        Self::from_bytes(&bytes)
    }
}

fn put_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    // Fields are a KMS blob and a single string; both are far below 4 GiB.
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], EnvelopeError> {
        if self.rest.len() < len {
            return Err(EnvelopeError::Format(what));
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    fn prefixed(&mut self) -> Result<&'a [u8], EnvelopeError> {
        let prefix = self.take(LEN_PREFIX, "truncated length prefix")?;
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        self.take(len, "length prefix exceeds payload")
    }
}

/// Seal `plaintext` under `dek`, recording `wrapped_dek` in the payload.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes.
pub fn seal(
    plaintext: &[u8],
    dek: &[u8],
    wrapped_dek: &[u8],
) -> Result<EnvelopePayload, EnvelopeError> {
    let cipher = build_cipher(dek)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let message = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| EnvelopeError::AuthenticationFailed)?;

    Ok(EnvelopePayload {
        encrypted_data_key: wrapped_dek.to_vec(),
        nonce,
        message,
    })
}

/// Open a sealed payload with `dek`.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes.
/// Returns [`EnvelopeError::AuthenticationFailed`] for a wrong key, a wrong
/// nonce, or tampered ciphertext, without distinguishing between them.
pub fn open(payload: &EnvelopePayload, dek: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let cipher = build_cipher(dek)?;
    cipher
        .decrypt(Nonce::from_slice(&payload.nonce), payload.message.as_ref())
        .map_err(|_| EnvelopeError::AuthenticationFailed)
}

fn build_cipher(dek: &[u8]) -> Result<XSalsa20Poly1305, EnvelopeError> {
    if dek.len() != KEY_LEN {
        return Err(EnvelopeError::InvalidKeyLength);
    }
    XSalsa20Poly1305::new_from_slice(dek).map_err(|_| EnvelopeError::InvalidKeyLength)
}
