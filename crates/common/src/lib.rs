//! Common types, protocol definitions, and errors shared across the
//! pseudonymization service crates.

pub mod error;
pub mod protocol;

pub use error::ServiceError;
