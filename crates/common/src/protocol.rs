//! Request and response types exchanged over the public HTTP API.

use serde::{Deserialize, Serialize};

/// Radix reported in responses for the envelope operations, which have none.
pub const NO_RADIX: i64 = -1;

// ---------------------------------------------------------------------------
// Pseudonymization endpoints
// ---------------------------------------------------------------------------

/// Request body for `POST /{operation}`.
///
/// `radix` is required by the format-preserving operations and ignored by the
/// envelope operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudonymizeRequest {
    /// Plaintext (encrypt) or ciphertext (decrypt) string.
    pub input: String,
    /// Numeral radix of `input` for the FPE operations.
    #[serde(default)]
    pub radix: Option<u32>,
}

/// Successful response body for every operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PseudonymizeResponse {
    /// Operation label, e.g. `"Encrypt"` or `"Envelope-Decrypt"`.
    pub operation: String,
    pub plaintext: String,
    pub ciphertext: String,
    /// Radix used, or [`NO_RADIX`] for the envelope operations.
    pub radix: i64,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description safe to expose to callers.
    pub error: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a message.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Whether the DEK is currently loaded and ready.
    pub dek_ready: bool,
}
