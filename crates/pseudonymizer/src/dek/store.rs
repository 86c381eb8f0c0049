//! [`DekStore`]: initialise-once cache for the decrypted Data Encryption Key.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::OnceCell;

use super::gateway::{GatewayError, WrappedKeyBlob};
use crate::crypto::KEY_LEN;

/// Errors produced by the DEK layer.
#[derive(Debug, Error)]
pub enum DekError {
    /// The DEK has not yet been fetched and decrypted.
    #[error("DEK not yet initialised")]
    NotInitialised,

    /// The decrypted key material has an unexpected length.
    #[error("DEK has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),

    /// The secret store holds a value that is not a hex-encoded wrapped key.
    #[error("stored wrapped DEK is malformed: {0}")]
    MalformedSecret(#[from] hex::FromHexError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
#[derive(Clone)]
pub struct DekBytes(Box<[u8; KEY_LEN]>);

impl DekBytes {
    /// Copy `key_bytes` into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::InvalidLength`] if the slice is not [`KEY_LEN`] bytes.
    pub fn from_slice(key_bytes: &[u8]) -> Result<Self, DekError> {
        if key_bytes.len() != KEY_LEN {
            return Err(DekError::InvalidLength(key_bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(key_bytes);
        Ok(Self(buf))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0[..]
    }
}

impl Drop for DekBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for DekBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("DekBytes([REDACTED])")
    }
}

/// The plaintext DEK together with the wrapped blob it was unwrapped from.
#[derive(Clone, Debug)]
pub struct DataKey {
    pub plaintext: DekBytes,
    pub wrapped: WrappedKeyBlob,
}

/// Process-wide store for the Data Encryption Key.
///
/// Written exactly once, then read-only. Concurrent first callers of
/// [`DekStore::get_or_try_init`] share a single initialisation; a failed
/// initialisation leaves the store empty so a later call may try again.
#[derive(Clone, Debug, Default)]
pub struct DekStore {
    inner: Arc<OnceCell<DataKey>>,
}

impl DekStore {
    /// Create a new, empty [`DekStore`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once a DEK has been stored.
    pub fn is_ready(&self) -> bool {
        self.inner.initialized()
    }

    /// Return the cached DEK, running `init` to produce it if the store is empty.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `init`.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<DataKey, DekError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DataKey, DekError>>,
    {
        self.inner.get_or_try_init(init).await.cloned()
    }

    /// Borrow a clone of the current DEK.
    ///
    /// # Errors
    ///
    /// Returns [`DekError::NotInitialised`] if no DEK has been stored yet.
    pub fn current(&self) -> Result<DataKey, DekError> {
        self.inner.get().cloned().ok_or(DekError::NotInitialised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_key(byte: u8) -> DataKey {
        DataKey {
            plaintext: DekBytes::from_slice(&[byte; KEY_LEN]).unwrap(),
            wrapped: WrappedKeyBlob::new(vec![byte; 4]),
        }
    }

    #[tokio::test]
    async fn initially_not_ready() {
        let store = DekStore::new();
        assert!(!store.is_ready());
        assert!(matches!(store.current(), Err(DekError::NotInitialised)));
    }

    #[tokio::test]
    async fn init_and_retrieve() {
        let store = DekStore::new();
        let key = store.get_or_try_init(|| async { Ok(data_key(0x42)) }).await.unwrap();
        assert!(store.is_ready());
        assert_eq!(key.plaintext.as_slice(), &[0x42; KEY_LEN]);
        assert_eq!(store.current().unwrap().wrapped, key.wrapped);
    }

    #[tokio::test]
    async fn initialises_only_once() {
        let store = DekStore::new();
        store.get_or_try_init(|| async { Ok(data_key(0x01)) }).await.unwrap();
        let second = store.get_or_try_init(|| async { Ok(data_key(0x02)) }).await.unwrap();
        assert_eq!(second.plaintext.as_slice(), &[0x01; KEY_LEN]);
    }

    #[tokio::test]
    async fn failed_init_leaves_store_empty() {
        let store = DekStore::new();
        let result = store
            .get_or_try_init(|| async { Err(DekError::InvalidLength(16)) })
            .await;
        assert!(result.is_err());
        assert!(!store.is_ready());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            DekBytes::from_slice(&[0u8; 16]),
            Err(DekError::InvalidLength(16))
        ));
    }

    #[test]
    fn dek_bytes_redacted_in_debug() {
        let dek = DekBytes::from_slice(&[0xFF; KEY_LEN]).unwrap();
        assert!(format!("{dek:?}").contains("REDACTED"));
        assert!(!format!("{dek:?}").contains("255"));
    }
}
