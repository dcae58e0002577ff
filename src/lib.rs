//! Registry Mirror Library
//!
//! Copies container images between registries, and from registries into S3 buckets
//! laid out like a registry, transferring each blob at most once per destination
//! repository.

pub mod cli;
pub mod destination;
pub mod error;
pub mod image;
pub mod logging;
pub mod mirror;
pub mod registry;

pub use cli::{AuthConfig, MirrorOptions};
pub use destination::{Destination, DestinationKind};
pub use error::{AggregateError, MappingFailure, MirrorError, Result};
pub use logging::Logger;
pub use mirror::{Mapping, MappingSet, MirrorContext, MirrorReport, PlatformFilter};
