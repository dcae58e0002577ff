//! Image addressing and content types
//!
//! References, digests and manifest formats shared by the registry client,
//! the destination backends and the mirror engine.

pub mod digest;
pub mod manifest;
pub mod reference;

pub use digest::DigestUtils;
pub use manifest::{Descriptor, Manifest, ManifestPayload, Platform};
pub use reference::{ImageReference, RepositoryKey};
