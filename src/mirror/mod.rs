//! Mirroring engine
//!
//! Mappings are grouped into a [`tree::TargetTree`], planned into a [`plan::Plan`],
//! packed into conflict-free phases by [`scheduler::schedule`] and executed by
//! [`executor::run`] against the destinations handed out by a
//! [`crate::registry::Connector`].

pub mod context;
pub mod executor;
pub mod filter;
pub mod mapping;
pub mod plan;
pub mod scheduler;
pub mod tree;

pub use context::{MirrorContext, RunSummary};
pub use executor::{MirrorReport, PushedReference, run};
pub use filter::PlatformFilter;
pub use mapping::{Mapping, MappingSet};
pub use plan::{BlobCopyUnit, Plan};
pub use scheduler::{Phase, schedule};
pub use tree::{SourceUnit, TargetTree};
