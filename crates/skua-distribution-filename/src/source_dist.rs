use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use skua_normalize::PackageName;
use skua_pep440::{Version, VersionParseError};

/// The archive formats a source distribution may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDistExtension {
    /// `.tar.gz`, the common case
    TarGz,
    /// `.tar.xz`
    TarXz,
    /// `.zip`
    Zip,
}

impl SourceDistExtension {
    /// Whether the archive is a (compressed) tarball.
    pub fn is_tarball(self) -> bool {
        matches!(self, Self::TarGz | Self::TarXz)
    }

    fn strip<'a>(filename: &'a str) -> Option<(&'a str, Self)> {
        if let Some(stem) = filename.strip_suffix(".tar.gz") {
            Some((stem, Self::TarGz))
        } else if let Some(stem) = filename.strip_suffix(".tar.xz") {
            Some((stem, Self::TarXz))
        } else if let Some(stem) = filename.strip_suffix(".zip") {
            Some((stem, Self::Zip))
        } else {
            None
        }
    }
}

impl Display for SourceDistExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TarGz => f.write_str("tar.gz"),
            Self::TarXz => f.write_str("tar.xz"),
            Self::Zip => f.write_str("zip"),
        }
    }
}

/// A source distribution filename, e.g. `flask-2.1.2.tar.gz`.
///
/// A `{name, version}` has at most one source distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDistFilename {
    /// The normalized package name.
    pub name: PackageName,
    /// The package version.
    pub version: Version,
    /// The archive format.
    pub extension: SourceDistExtension,
}

impl SourceDistFilename {
    /// Parse a source distribution filename.
    ///
    /// The name/version split is ambiguous without the package name (both
    /// may contain dashes), so the expected name must be supplied.
    pub fn parse(
        filename: &str,
        package_name: &PackageName,
    ) -> Result<Self, SourceDistFilenameError> {
        let Some((stem, extension)) = SourceDistExtension::strip(filename) else {
            return Err(SourceDistFilenameError::InvalidExtension(
                filename.to_string(),
            ));
        };

        // The name in the filename may use any normalization-equivalent
        // spelling, so strip by segment count rather than by prefix.
        let Some((name_part, version_part)) = stem.rsplit_once('-') else {
            return Err(SourceDistFilenameError::InvalidFilename(
                filename.to_string(),
            ));
        };
        // Fast path: `{name}-{version}` with a dashless version.
        if let Ok(name) = PackageName::new(name_part) {
            if name == *package_name {
                if let Ok(version) = Version::from_str(version_part) {
                    return Ok(Self {
                        name,
                        version,
                        extension,
                    });
                }
            }
        }

        // Otherwise match the known name against the stem's prefix, e.g.
        // `my-package-1.0-beta.tar.gz`.
        let name_len = package_name.as_ref().len();
        if stem.len() > name_len && stem.as_bytes()[name_len] == b'-' {
            let (prefix, rest) = stem.split_at(name_len);
            if PackageName::new(prefix).is_ok_and(|name| name == *package_name) {
                let version = Version::from_str(&rest[1..]).map_err(|err| {
                    SourceDistFilenameError::InvalidVersion(filename.to_string(), err)
                })?;
                return Ok(Self {
                    name: package_name.clone(),
                    version,
                    extension,
                });
            }
        }

        Err(SourceDistFilenameError::InvalidFilename(
            filename.to_string(),
        ))
    }
}

impl Display for SourceDistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.version, self.extension)
    }
}

/// An error parsing a source distribution filename.
#[derive(Error, Debug)]
pub enum SourceDistFilenameError {
    /// Not one of the supported archive extensions.
    #[error("Source distribution filename \"{0}\" must end with .tar.gz, .tar.xz or .zip")]
    InvalidExtension(String),
    /// The stem doesn't split into the expected name and a version.
    #[error("Source distribution filename \"{0}\" doesn't have the {{name}}-{{version}} form")]
    InvalidFilename(String),
    /// The version part doesn't parse.
    #[error("Source distribution filename \"{0}\" has an invalid version: {1}")]
    InvalidVersion(String, VersionParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(name: &str) -> PackageName {
        PackageName::new(name).unwrap()
    }

    #[test]
    fn simple() {
        let filename = SourceDistFilename::parse("flask-2.1.2.tar.gz", &name("flask")).unwrap();
        assert_eq!(filename.version.to_string(), "2.1.2");
        assert_eq!(filename.extension, SourceDistExtension::TarGz);
    }

    #[test]
    fn dashed_name() {
        let filename =
            SourceDistFilename::parse("zope.interface-5.4.0.zip", &name("zope-interface")).unwrap();
        assert_eq!(filename.name.as_ref(), "zope-interface");

        let filename =
            SourceDistFilename::parse("my-package-1.0b1.tar.gz", &name("my-package")).unwrap();
        assert_eq!(filename.version.to_string(), "1.0b1");
    }

    #[test]
    fn wrong_name_rejected() {
        assert!(SourceDistFilename::parse("flask-2.1.2.tar.gz", &name("django")).is_err());
    }

    #[test]
    fn unsupported_extension() {
        assert!(matches!(
            SourceDistFilename::parse("flask-2.1.2.tar.bz2", &name("flask")),
            Err(SourceDistFilenameError::InvalidExtension(_))
        ));
    }

    #[test]
    fn display_roundtrip() {
        let filename = SourceDistFilename::parse("flask-2.1.2.tar.gz", &name("flask")).unwrap();
        assert_eq!(filename.to_string(), "flask-2.1.2.tar.gz");
    }
}
