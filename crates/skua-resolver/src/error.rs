use std::fmt::{Display, Formatter};

use skua_normalize::PackageName;
use skua_pep440::Version;
use skua_pep508::{Pep508Error, Requirement};
use skua_platform_tags::PlatformError;

/// An error during dependency resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// A root requirement doesn't parse.
    #[error("Invalid requirement")]
    InvalidRequirement(#[from] Pep508Error),

    /// The target environment doesn't make sense.
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The target Python version doesn't parse.
    #[error("Invalid Python version: {0}")]
    InvalidPythonVersion(String),

    /// A name has no usable candidate at all under the environment.
    #[error("No versions found for package `{0}`")]
    NoVersionsFound(PackageName),

    /// Every candidate of a name was rejected by its `requires_python`.
    #[error(
        "Every available version of `{name}` requires a Python version incompatible with {python}"
    )]
    UnsupportedPython {
        /// The package whose candidates were all rejected.
        name: PackageName,
        /// The target Python version.
        python: Version,
    },

    /// The active requirements cannot be satisfied jointly.
    #[error("{0}")]
    ResolutionImpossible(ConflictSet),

    /// Metadata for a selected candidate could not be obtained, and retries
    /// are exhausted.
    #[error("Failed to obtain metadata for {dist}")]
    MetadataUnavailable {
        /// A rendering of the offending distribution.
        dist: String,
        /// The underlying fetch/read failure.
        #[source]
        err: Box<skua_distribution::Error>,
    },

    /// A registry error outside any single candidate (e.g. the index is
    /// unreachable while listing versions).
    #[error(transparent)]
    Client(#[from] skua_client::Error),

    /// The search exceeded the configured round budget.
    #[error("Resolution exceeded the limit of {0} rounds; the requirements are too contended")]
    ResolutionTooDeep(usize),

    /// The artifact cache could not be initialized.
    #[error("Failed to initialize the artifact cache")]
    Cache(#[source] std::io::Error),
}

/// The minimal set of active requirements that jointly produced an empty
/// candidate set, carried by [`ResolveError::ResolutionImpossible`].
#[derive(Debug, Clone)]
pub struct ConflictSet {
    /// The name the requirements collide on.
    pub name: PackageName,
    /// The colliding requirements, with their origins.
    pub requirements: Vec<Requirement>,
}

impl Display for ConflictSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Cannot find a version of `{}` satisfying the following requirements:",
            self.name
        )?;
        for requirement in &self.requirements {
            match requirement.origin.package_name() {
                Some(parent) => writeln!(f, "  {requirement} (from {parent})")?,
                None => writeln!(f, "  {requirement} (from the root requirements)")?,
            }
        }
        Ok(())
    }
}

/// A non-fatal observation accompanying a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A yanked version was selected through an exact pin.
    YankedVersion {
        /// The yanked package.
        name: PackageName,
        /// The selected, yanked version.
        version: Version,
        /// The yank reason, when the index supplied one.
        reason: Option<String>,
    },
    /// A requirement was dropped because its package does not exist and
    /// `ignore_errors` is set.
    SkippedRequirement {
        /// The dropped requirement.
        requirement: String,
    },
}

impl Display for Warning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::YankedVersion {
                name,
                version,
                reason,
            } => match reason {
                Some(reason) => write!(
                    f,
                    "{name}=={version} is yanked (reason: {reason}); it was selected because the \
                     requirement pins it exactly"
                ),
                None => write!(
                    f,
                    "{name}=={version} is yanked; it was selected because the requirement pins it \
                     exactly"
                ),
            },
            Self::SkippedRequirement { requirement } => {
                write!(f, "Ignoring unsatisfiable requirement `{requirement}`")
            }
        }
    }
}
