//! Given a set of Python requirements and a target environment, find a
//! set of compatible pinned packages without building or installing
//! anything.
//!
//! The search keeps one criterion per package name (its active
//! requirements and remaining candidate versions) and extends the
//! assignment smallest-domain-first, backtracking through a decision
//! trail when a criterion runs dry.

pub use environment::Environment;
pub use error::{ConflictSet, ResolveError, Warning};
pub use options::ResolutionOptions;
pub use provider::{
    filter_requirements, CandidateVersion, DefaultResolverProvider, PackageRequirements,
    ResolverProvider,
};
pub use resolution::{FlatEntry, PdtNode, PinnedPackage, Resolution, TreeNode};
pub use resolver::Resolver;
pub use version_map::{VersionEntry, VersionMap};

mod candidate_selector;
mod environment;
mod error;
mod options;
mod provider;
mod resolution;
mod resolver;
mod version_map;
