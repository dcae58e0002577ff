//! Registry operations module - Internal modular organization
//!
//! Blob and manifest endpoints are kept apart; [`crate::registry::client`] composes them
//! into a [`crate::registry::Repository`] implementation.

pub mod blob_operations;
pub mod manifest_operations;

pub use blob_operations::BlobOperations;
pub use manifest_operations::ManifestOperations;
