use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use skua_normalize::{InvalidNameError, PackageName};
use skua_pep440::{Version, VersionParseError};
use skua_platform_tags::{TagPriority, Tags};

/// A wheel filename, e.g.
/// `flask-2.1.2-py3-none-any.whl` or
/// `markupsafe-3.0.2-cp310-cp310-manylinux_2_17_x86_64.manylinux2014_x86_64.whl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelFilename {
    /// The normalized package name.
    pub name: PackageName,
    /// The package version.
    pub version: Version,
    /// The (possibly compressed) Python tags, e.g. `["cp310"]` or `["py2", "py3"]`.
    pub python_tags: Vec<String>,
    /// The ABI tags, e.g. `["none"]` or `["cp310"]`.
    pub abi_tags: Vec<String>,
    /// The platform tags, e.g. `["any"]` or
    /// `["manylinux_2_17_x86_64", "manylinux2014_x86_64"]`.
    pub platform_tags: Vec<String>,
}

impl FromStr for WheelFilename {
    type Err = WheelFilenameError;

    fn from_str(filename: &str) -> Result<Self, Self::Err> {
        let basename = filename.strip_suffix(".whl").ok_or_else(|| {
            WheelFilenameError::InvalidWheelFileName(
                filename.to_string(),
                "Must end with .whl".to_string(),
            )
        })?;

        // The filename has either five or six `-`-separated parts. With six,
        // the third is the (ignored) build tag.
        // https://www.python.org/dev/peps/pep-0427/#file-name-convention
        let parts: Vec<&str> = basename.split('-').collect();
        let (name, version, python_tag, abi_tag, platform_tag) = match parts.as_slice() {
            [name, version, python_tag, abi_tag, platform_tag] => {
                (*name, *version, *python_tag, *abi_tag, *platform_tag)
            }
            [name, version, _build_tag, python_tag, abi_tag, platform_tag] => {
                (*name, *version, *python_tag, *abi_tag, *platform_tag)
            }
            parts if parts.len() < 5 => {
                return Err(WheelFilenameError::InvalidWheelFileName(
                    filename.to_string(),
                    "Must have 5 or 6 components".to_string(),
                ))
            }
            _ => {
                return Err(WheelFilenameError::InvalidWheelFileName(
                    filename.to_string(),
                    "Must have 5 or 6 components, but has more".to_string(),
                ))
            }
        };

        let name = PackageName::new(name)
            .map_err(|err| WheelFilenameError::InvalidPackageName(filename.to_string(), err))?;
        let version = Version::from_str(version)
            .map_err(|err| WheelFilenameError::InvalidVersion(filename.to_string(), err))?;
        Ok(Self {
            name,
            version,
            python_tags: python_tag.split('.').map(String::from).collect(),
            abi_tags: abi_tag.split('.').map(String::from).collect(),
            platform_tags: platform_tag.split('.').map(String::from).collect(),
        })
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}.whl",
            self.name,
            self.version,
            self.python_tags.join("."),
            self.abi_tags.join("."),
            self.platform_tags.join(".")
        )
    }
}

impl WheelFilename {
    /// Returns `true` if the wheel is usable under the given tag set.
    pub fn is_compatible(&self, compatible_tags: &Tags) -> bool {
        self.compatibility(compatible_tags).is_some()
    }

    /// The specificity of the best tag triple this wheel matches, or `None`
    /// if the wheel is unusable in the environment.
    pub fn compatibility(&self, compatible_tags: &Tags) -> Option<TagPriority> {
        let mut best = None;
        for python_tag in &self.python_tags {
            for abi_tag in &self.abi_tags {
                for platform_tag in &self.platform_tags {
                    let priority = compatible_tags.priority(python_tag, abi_tag, platform_tag);
                    if priority > best {
                        best = priority;
                    }
                }
            }
        }
        best
    }
}

/// An error parsing a wheel filename.
#[derive(Error, Debug)]
pub enum WheelFilenameError {
    /// The filename doesn't have the wheel shape.
    #[error("The wheel filename \"{0}\" is invalid: {1}")]
    InvalidWheelFileName(String, String),
    /// The version part doesn't parse.
    #[error("The wheel filename \"{0}\" has an invalid version part: {1}")]
    InvalidVersion(String, VersionParseError),
    /// The name part doesn't normalize.
    #[error("The wheel filename \"{0}\" has an invalid package name: {1}")]
    InvalidPackageName(String, InvalidNameError),
}

#[cfg(test)]
mod tests {
    use skua_platform_tags::Os;

    use super::*;

    #[test]
    fn err_not_whl_extension() {
        let err = WheelFilename::from_str("foo.rs").unwrap_err();
        insta::assert_snapshot!(err, @r###"The wheel filename "foo.rs" is invalid: Must end with .whl"###);
    }

    #[test]
    fn err_too_few_parts() {
        let err = WheelFilename::from_str("foo-1.2.3-py3.whl").unwrap_err();
        insta::assert_snapshot!(err, @r###"The wheel filename "foo-1.2.3-py3.whl" is invalid: Must have 5 or 6 components"###);
    }

    #[test]
    fn err_too_many_parts() {
        let err =
            WheelFilename::from_str("foo-1.2.3-build-python-abi-platform-oops.whl").unwrap_err();
        insta::assert_snapshot!(err, @r###"The wheel filename "foo-1.2.3-build-python-abi-platform-oops.whl" is invalid: Must have 5 or 6 components, but has more"###);
    }

    #[test]
    fn err_invalid_version() {
        let err = WheelFilename::from_str("foo-x.y.z-py3-none-any.whl").unwrap_err();
        insta::assert_snapshot!(err, @r###"The wheel filename "foo-x.y.z-py3-none-any.whl" has an invalid version part: Version `x.y.z` doesn't match PEP 440 rules"###);
    }

    #[test]
    fn ok_pure_wheel() {
        let filename = WheelFilename::from_str("flask-2.1.2-py3-none-any.whl").unwrap();
        assert_eq!(filename.name.as_ref(), "flask");
        assert_eq!(filename.version.to_string(), "2.1.2");
        assert_eq!(filename.python_tags, vec!["py3"]);
    }

    #[test]
    fn ok_build_tag_ignored() {
        let filename = WheelFilename::from_str("foo-1.2.3-1-py3-none-any.whl").unwrap();
        assert_eq!(filename.python_tags, vec!["py3"]);
    }

    #[test]
    fn compressed_tags() {
        let filename =
            WheelFilename::from_str("chardet-3.0.4-py2.py3-none-any.whl").unwrap();
        assert_eq!(filename.python_tags, vec!["py2", "py3"]);
        let tags = Tags::from_env(Os::Linux, (3, 10)).unwrap();
        assert!(filename.is_compatible(&tags));
    }

    #[test]
    fn compatibility_ranking() {
        let tags = Tags::from_env(Os::Linux, (3, 10)).unwrap();
        let pure = WheelFilename::from_str("a-1.0-py3-none-any.whl").unwrap();
        let binary = WheelFilename::from_str(
            "a-1.0-cp310-cp310-manylinux_2_17_x86_64.manylinux2014_x86_64.whl",
        )
        .unwrap();
        let incompatible = WheelFilename::from_str("a-1.0-cp310-cp310-win_amd64.whl").unwrap();
        assert!(binary.compatibility(&tags) > pure.compatibility(&tags));
        assert!(incompatible.compatibility(&tags).is_none());
    }

    #[test]
    fn display_roundtrip() {
        let input = "flask-2.1.2-py3-none-any.whl";
        assert_eq!(WheelFilename::from_str(input).unwrap().to_string(), input);
    }
}
