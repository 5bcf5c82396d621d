//! Parsing of the two artifact filename shapes: wheels and source
//! distributions.

use std::str::FromStr;

pub use source_dist::{SourceDistExtension, SourceDistFilename, SourceDistFilenameError};
pub use wheel::{WheelFilename, WheelFilenameError};

use skua_normalize::PackageName;
use skua_pep440::Version;

mod source_dist;
mod wheel;

/// A wheel or source distribution filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistFilename {
    /// A `.tar.gz` / `.zip` / `.tar.xz` source distribution.
    SourceDistFilename(SourceDistFilename),
    /// A `.whl` binary distribution.
    WheelFilename(WheelFilename),
}

impl DistFilename {
    /// Parse a filename as either kind, if it is one.
    ///
    /// Source distribution filenames are ambiguous without the package name
    /// (`a-1-1.tar.gz`), so it must be supplied.
    pub fn try_from_filename(filename: &str, package_name: &PackageName) -> Option<Self> {
        if let Ok(wheel) = WheelFilename::from_str(filename) {
            Some(Self::WheelFilename(wheel))
        } else if let Ok(source_dist) = SourceDistFilename::parse(filename, package_name) {
            Some(Self::SourceDistFilename(source_dist))
        } else {
            None
        }
    }

    /// The package name of the artifact.
    pub fn name(&self) -> &PackageName {
        match self {
            Self::SourceDistFilename(filename) => &filename.name,
            Self::WheelFilename(filename) => &filename.name,
        }
    }

    /// The package version of the artifact.
    pub fn version(&self) -> &Version {
        match self {
            Self::SourceDistFilename(filename) => &filename.version,
            Self::WheelFilename(filename) => &filename.version,
        }
    }
}
