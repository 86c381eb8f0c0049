//! AWS-backed implementations of the DEK gateways.
//!
//! Both gateways hold their SDK client in an [`arc_swap::ArcSwap`] so that a
//! transient failure can swap in a client built from the corrected session
//! without locking concurrent callers.

pub mod clients;
pub mod kms;
pub mod retry;
pub mod secrets;

pub use clients::AwsSessions;
pub use kms::KmsGateway;
pub use secrets::SecretsManagerGateway;
