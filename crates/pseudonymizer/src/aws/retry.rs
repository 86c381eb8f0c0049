//! Single-retry policy for AWS calls and SDK error classification.
//!
//! A call that fails with a [`GatewayErrorKind::Transient`] error is retried
//! exactly once after swapping in a client built from the corrected session.
//! Permanent errors, and a second failure of any kind, are returned as-is.

use std::future::Future;
use std::sync::Arc;

use arc_swap::ArcSwap;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use tracing::warn;

use crate::dek::{GatewayError, GatewayErrorKind};

/// Classify an SDK error.
///
/// Request construction failures (no region, endpoint resolution) and I/O
/// dispatch failures are transient; everything the service answered, and
/// timeouts, are permanent.
pub fn classify<E, R>(err: &SdkError<E, R>) -> GatewayErrorKind {
    match err {
        SdkError::ConstructionFailure(_) => GatewayErrorKind::Transient,
        SdkError::DispatchFailure(failure) if failure.is_io() => GatewayErrorKind::Transient,
        _ => GatewayErrorKind::Permanent,
    }
}

/// Convert an SDK error into a [`GatewayError`] for `operation`.
pub fn sdk_error<E, R>(operation: &'static str, err: SdkError<E, R>) -> GatewayError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    GatewayError::new(
        classify(&err),
        operation,
        DisplayErrorContext(&err).to_string(),
    )
}

/// Run `call` against the current client, retrying once on a transient error.
///
/// Before the retry, `slot` is replaced with `corrected()` so later calls
/// keep using the working session.
pub async fn call_with_retry<C, T, F, Fut>(
    slot: &ArcSwap<C>,
    corrected: impl FnOnce() -> C,
    operation: &'static str,
    call: F,
) -> Result<T, GatewayError>
where
    F: Fn(Arc<C>) -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    match call(slot.load_full()).await {
        Err(e) if e.is_transient() => {
            warn!(
                operation,
                error = %e,
                "transient AWS failure; retrying once with corrected session"
            );
            slot.store(Arc::new(corrected()));
            call(slot.load_full()).await
        }
        result => result,
    }
}
