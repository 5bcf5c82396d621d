//! Fetching distributions into the artifact cache and reading their
//! metadata, without extracting (or executing) anything beyond the
//! metadata members.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use url::Url;

pub use database::{DistributionDatabase, Error};

use skua_distribution_filename::{SourceDistFilename, WheelFilename};
use skua_normalize::PackageName;
use skua_pep440::Version;
use skua_pypi_types::File;

mod database;
mod keyed_lock;
mod setup_scan;

/// A concrete artifact selected to represent a `{name, version}`: the
/// preferred wheel, or the source distribution.
#[derive(Debug, Clone)]
pub enum Dist {
    /// A binary distribution from an index.
    Wheel(RegistryWheel),
    /// A source distribution from an index.
    Sdist(RegistrySdist),
}

/// A wheel file hosted on an index.
#[derive(Debug, Clone)]
pub struct RegistryWheel {
    /// The parsed filename.
    pub filename: WheelFilename,
    /// The index file record (URL, digests, yank state).
    pub file: File,
}

/// A source distribution file hosted on an index.
#[derive(Debug, Clone)]
pub struct RegistrySdist {
    /// The parsed filename.
    pub filename: SourceDistFilename,
    /// The index file record (URL, digests, yank state).
    pub file: File,
}

impl Dist {
    /// The package name of the artifact.
    pub fn name(&self) -> &PackageName {
        match self {
            Self::Wheel(wheel) => &wheel.filename.name,
            Self::Sdist(sdist) => &sdist.filename.name,
        }
    }

    /// The package version of the artifact.
    pub fn version(&self) -> &Version {
        match self {
            Self::Wheel(wheel) => &wheel.filename.version,
            Self::Sdist(sdist) => &sdist.filename.version,
        }
    }

    /// The artifact filename as listed by the index.
    pub fn filename(&self) -> &str {
        match self {
            Self::Wheel(wheel) => &wheel.file.filename,
            Self::Sdist(sdist) => &sdist.file.filename,
        }
    }

    /// The download URL of the artifact.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let url = match self {
            Self::Wheel(wheel) => &wheel.file.url,
            Self::Sdist(sdist) => &sdist.file.url,
        };
        Url::from_str(url)
    }

    /// A stable identifier for in-process exclusion: two tasks fetching the
    /// same artifact must serialize.
    pub(crate) fn resource_id(&self) -> String {
        format!("{}-{}-{}", self.name(), self.version(), self.filename())
    }
}

impl Display for Dist {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={} ({})", self.name(), self.version(), self.filename())
    }
}
