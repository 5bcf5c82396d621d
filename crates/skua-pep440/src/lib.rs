//! [PEP 440](https://peps.python.org/pep-0440) version numbers and version
//! specifiers.
//!
//! ```rust
//! use std::str::FromStr;
//! use skua_pep440::{Version, VersionSpecifiers};
//!
//! let version = Version::from_str("1.19").unwrap();
//! let specifiers = VersionSpecifiers::from_str(">=1.16, <2.0").unwrap();
//! assert!(specifiers.contains(&version));
//! ```
//!
//! PEP 440 has a number of unintuitive features: epochs (`1!1.2`), post and
//! dev segments that may attach to both stable releases and pre-releases,
//! local version suffixes that order otherwise-equal releases, and the rule
//! that `1.0` and `1.0.0` are the same version. Ordering is a total order,
//! but matching needs extra care (e.g. `==1.0` matches `1.0+local`).

pub use version::{LocalSegment, PreRelease, PreReleaseKind, Version};
pub use version_specifier::{Operator, VersionSpecifier, VersionSpecifiers};

mod version;
mod version_specifier;

/// An error parsing a version or a version specifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    /// The string does not match the PEP 440 version grammar.
    #[error("Version `{0}` doesn't match PEP 440 rules")]
    InvalidVersion(String),
    /// The comparison operator is not one of the PEP 440 set.
    #[error("no such comparison operator {0:?}, must be one of ~= == != <= >= < > ===")]
    InvalidOperator(String),
    /// A wildcard was used with an operator that doesn't support it.
    #[error("Operator {0} is incompatible with a wildcard version")]
    InvalidWildcard(String),
    /// `~=` needs at least two release segments to pin all but the last.
    #[error("The ~= operator requires at least two release segments: `{0}`")]
    InvalidTildeEquals(String),
    /// A specifier without an operator, or other malformed input.
    #[error("Failed to parse version specifier `{0}`")]
    InvalidSpecifier(String),
}
