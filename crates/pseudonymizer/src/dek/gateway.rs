//! Traits for the two external collaborators of the DEK lifecycle: a key
//! management service that wraps keys, and a secret store that persists the
//! wrapped form.
//!
//! Implementations decide whether a failure is [`GatewayErrorKind::Transient`]
//! (worth one retry with a corrected session) or permanent.

use async_trait::async_trait;
use thiserror::Error;

/// Whether a gateway failure may succeed if retried with a corrected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Region, endpoint, or session resolution failure.
    Transient,
    /// Anything else: access denied, invalid ciphertext, throttling, etc.
    Permanent,
}

/// A failed call to an external gateway.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    /// Service operation name, e.g. `"kms:Decrypt"`.
    pub operation: &'static str,
    pub message: String,
}

impl GatewayError {
    pub fn new(
        kind: GatewayErrorKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Transient, operation, message)
    }

    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Permanent, operation, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == GatewayErrorKind::Transient
    }
}

/// A DEK encrypted under the KMS master key. Its only durable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WrappedKeyBlob(Vec<u8>);

impl WrappedKeyBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex form stored as the secret string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parse the hex form read back from the secret store.
    ///
    /// # Errors
    ///
    /// Returns [`hex::FromHexError`] if `s` is not valid hex.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim()).map(Self)
    }
}

/// Result of a create-if-absent write to the secret store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another writer created the secret first.
    AlreadyExists,
}

/// Wraps and unwraps data keys under a master key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyManagementGateway: Send + Sync {
    /// Generate a fresh data key under `master_key_id`, returning only its wrapped form.
    async fn generate_data_key(&self, master_key_id: &str) -> Result<WrappedKeyBlob, GatewayError>;

    /// Unwrap a blob back to the raw key bytes.
    async fn unwrap_key(&self, blob: &WrappedKeyBlob) -> Result<Vec<u8>, GatewayError>;
}

/// Reads and creates named secret strings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStoreGateway: Send + Sync {
    /// Read the secret `name`, or `None` if it does not exist.
    async fn get_secret(&self, name: &str) -> Result<Option<String>, GatewayError>;

    /// Create the secret `name` without overwriting an existing one.
    async fn create_secret(
        &self,
        name: &str,
        value: &str,
        description: &str,
    ) -> Result<CreateOutcome, GatewayError>;
}
