//! Operation dispatch: turns a parsed request into an FF1 or envelope call.

use std::sync::Arc;

use common::protocol::{PseudonymizeRequest, PseudonymizeResponse, NO_RADIX};
use common::ServiceError;
use tracing::{debug, warn};

use crate::crypto::envelope::{self, EnvelopeError, EnvelopePayload};
use crate::crypto::{Alphabet, Ff1, FpeError};
use crate::dek::{DekBytes, DekError, KeyLifecycleManager};

/// The operation named by the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Encrypt,
    Decrypt,
    EnvelopeEncrypt,
    EnvelopeDecrypt,
    Unsupported,
}

impl Operation {
    /// Parse the path segment after the leading `/`.
    pub fn from_path(segment: &str) -> Self {
        match segment {
            "encrypt" => Self::Encrypt,
            "decrypt" => Self::Decrypt,
            "envelope-encrypt" => Self::EnvelopeEncrypt,
            "envelope-decrypt" => Self::EnvelopeDecrypt,
            _ => Self::Unsupported,
        }
    }

    /// Label echoed in the response body.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Encrypt => "Encrypt",
            Self::Decrypt => "Decrypt",
            Self::EnvelopeEncrypt => "Envelope-Encrypt",
            Self::EnvelopeDecrypt => "Envelope-Decrypt",
            Self::Unsupported => "Unsupported",
        }
    }
}

/// Executes operations against the process-wide DEK.
pub struct PseudonymizationService {
    keys: Arc<KeyLifecycleManager>,
    tweak: Vec<u8>,
    alphabet: Arc<Alphabet>,
}

impl PseudonymizationService {
    pub fn new(keys: Arc<KeyLifecycleManager>, tweak: Vec<u8>, alphabet: Alphabet) -> Self {
        Self {
            keys,
            tweak,
            alphabet: Arc::new(alphabet),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.keys.is_ready()
    }

    /// Run `operation` on `req`.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::UnsupportedOperation`] for [`Operation::Unsupported`].
    /// - [`ServiceError::BadRequest`] when an FPE request carries no radix.
    /// - [`ServiceError::Unavailable`] before the DEK is initialised.
    /// - [`ServiceError::EncryptionFailure`] for any cipher or envelope failure.
    /// - [`ServiceError::Internal`] if the FPE task is cancelled or panics.
    pub async fn handle(
        &self,
        operation: Operation,
        req: PseudonymizeRequest,
    ) -> Result<PseudonymizeResponse, ServiceError> {
        match operation {
            Operation::Encrypt | Operation::Decrypt => self.fpe(operation, req).await,
            Operation::EnvelopeEncrypt => self.envelope_encrypt(req.input),
            Operation::EnvelopeDecrypt => self.envelope_decrypt(req.input).await,
            Operation::Unsupported => Err(ServiceError::UnsupportedOperation),
        }
    }

    /// The Feistel rounds run on the blocking pool; the async worker only
    /// waits for the result.
    async fn fpe(
        &self,
        operation: Operation,
        req: PseudonymizeRequest,
    ) -> Result<PseudonymizeResponse, ServiceError> {
        let radix = req
            .radix
            .ok_or_else(|| ServiceError::BadRequest("radix is required".into()))?;
        let dek = self.keys.current().map_err(dek_unavailable)?;

        let cipher = Ff1::with_alphabet(
            radix,
            self.tweak.len(),
            dek.plaintext.as_slice(),
            &self.tweak,
            Arc::clone(&self.alphabet),
        )
        .map_err(|e| fpe_failure(operation, radix, &e))?;

        let encrypt = operation == Operation::Encrypt;
        let input = req.input;
        let (input, output) = tokio::task::spawn_blocking(move || {
            let output = if encrypt {
                cipher.encrypt(&input)
            } else {
                cipher.decrypt(&input)
            };
            (input, output)
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "FPE task did not complete");
            ServiceError::Internal("FPE task did not complete".into())
        })?;
        let output = output.map_err(|e| fpe_failure(operation, radix, &e))?;

        let (plaintext, ciphertext) = if encrypt {
            (input, output)
        } else {
            (output, input)
        };

        debug!(
            operation = operation.as_str(),
            radix,
            len = plaintext.chars().count(),
            "FPE ok"
        );
        Ok(PseudonymizeResponse {
            operation: operation.as_str().into(),
            plaintext,
            ciphertext,
            radix: i64::from(radix),
        })
    }

    fn envelope_encrypt(&self, input: String) -> Result<PseudonymizeResponse, ServiceError> {
        let dek = self.keys.current().map_err(dek_unavailable)?;
        let payload = envelope::seal(
            input.as_bytes(),
            dek.plaintext.as_slice(),
            dek.wrapped.as_bytes(),
        )
        .map_err(envelope_failure)?;

        Ok(PseudonymizeResponse {
            operation: Operation::EnvelopeEncrypt.as_str().into(),
            plaintext: input,
            ciphertext: payload.encode(),
            radix: NO_RADIX,
        })
    }

    async fn envelope_decrypt(&self, input: String) -> Result<PseudonymizeResponse, ServiceError> {
        let payload = EnvelopePayload::decode(&input).map_err(envelope_failure)?;
        let dek = self.resolve(&payload).await?;
        let opened = envelope::open(&payload, dek.as_slice()).map_err(envelope_failure)?;
        let plaintext = String::from_utf8(opened).map_err(|_| {
            warn!("opened envelope is not valid UTF-8");
            ServiceError::EncryptionFailure("decrypted value is not valid UTF-8".into())
        })?;

        Ok(PseudonymizeResponse {
            operation: Operation::EnvelopeDecrypt.as_str().into(),
            plaintext,
            ciphertext: input,
            radix: NO_RADIX,
        })
    }

    /// The DEK the payload was sealed under. A key that cannot be resolved is
    /// indistinguishable from a forged payload.
    async fn resolve(&self, payload: &EnvelopePayload) -> Result<DekBytes, ServiceError> {
        match self.keys.resolve(&payload.encrypted_data_key).await {
            Ok(dek) => Ok(dek),
            Err(DekError::NotInitialised) => Err(dek_unavailable(DekError::NotInitialised)),
            Err(e) => {
                warn!(error = %e, "envelope references a DEK that could not be resolved");
                Err(envelope_failure(EnvelopeError::AuthenticationFailed))
            }
        }
    }
}

fn dek_unavailable(e: DekError) -> ServiceError {
    warn!(error = %e, "request received before DEK initialisation");
    ServiceError::Unavailable("DEK not yet initialised".into())
}

// Only the error kind reaches the log; the message may quote an input symbol.
fn fpe_failure(operation: Operation, radix: u32, e: &FpeError) -> ServiceError {
    warn!(
        operation = operation.as_str(),
        radix,
        kind = fpe_kind(e),
        "FPE operation failed"
    );
    ServiceError::EncryptionFailure(e.to_string())
}

fn fpe_kind(e: &FpeError) -> &'static str {
    match e {
        FpeError::InvalidRadix(_) => "invalid_radix",
        FpeError::DomainTooSmall { .. } => "domain_too_small",
        FpeError::InvalidCharacter { .. } => "invalid_character",
        FpeError::InvalidNumeral { .. } => "invalid_numeral",
        FpeError::InvalidKeyLength(_) => "invalid_key_length",
        FpeError::InvalidTweakLength { .. } => "invalid_tweak_length",
        FpeError::InputTooLong(_) => "input_too_long",
        FpeError::InvalidAlphabet(_) => "invalid_alphabet",
    }
}

fn envelope_failure(e: EnvelopeError) -> ServiceError {
    warn!(error = %e, "envelope operation failed");
    ServiceError::EncryptionFailure(e.to_string())
}
