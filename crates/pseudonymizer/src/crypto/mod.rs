//! Cipher primitives: FF1 format-preserving encryption and secretbox envelopes.
//!
//! This module is intentionally free of AWS and HTTP dependencies. Callers
//! pass the plaintext DEK in; nothing here fetches or caches keys.
//!
//! # Envelope ciphertext format
//!
//! ```text
//! base64( u32be len || wrapped DEK || 24-byte nonce || u32be len || tag+ciphertext )
//! ```

pub mod alphabet;
pub mod envelope;
pub mod ff1;

/// Byte length of the data encryption key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

pub use alphabet::Alphabet;
pub use envelope::{EnvelopeError, EnvelopePayload};
pub use ff1::{Ff1, FpeError};
