use std::str::FromStr;

use skua_pep440::{Version, VersionSpecifiers};
use skua_pep508::MarkerEnvironment;
use skua_platform_tags::{Os, Tags};

use crate::ResolveError;

/// The target environment of a resolution: a Python version and operating
/// system that need not match the host, plus the wheel tag set they induce.
/// Fixed at resolver construction.
#[derive(Debug, Clone)]
pub struct Environment {
    python_version: Version,
    python_full_version: Version,
    os: Os,
    tags: Tags,
}

impl Environment {
    /// Build an environment from a Python version and OS tag.
    ///
    /// The Python version is accepted in dotted (`3.10`, `3.10.4`) or
    /// environment-tag (`310`) form.
    pub fn new(python_version: &str, os: Os) -> Result<Self, ResolveError> {
        let (major, minor, micro) = parse_python_version(python_version)?;
        let tags = Tags::from_env(os, (major, minor))?;
        Ok(Self {
            python_version: Version::new([u64::from(major), u64::from(minor)]),
            python_full_version: Version::new([
                u64::from(major),
                u64::from(minor),
                u64::from(micro),
            ]),
            os,
            tags,
        })
    }

    /// The target `major.minor` Python version.
    pub fn python_version(&self) -> &Version {
        &self.python_version
    }

    /// The target Python version including the micro segment (0 when the
    /// caller didn't give one).
    pub fn python_full_version(&self) -> &Version {
        &self.python_full_version
    }

    /// The target operating system.
    pub fn os(&self) -> Os {
        self.os
    }

    /// The ranked wheel tags the environment supports.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Whether a `requires_python` constraint admits the target interpreter.
    pub fn satisfies_requires_python(&self, requires_python: &VersionSpecifiers) -> bool {
        requires_python.contains(&self.python_full_version)
    }

    /// The marker environment induced by the target, for evaluating
    /// requirement markers.
    pub fn marker_environment(&self) -> MarkerEnvironment {
        MarkerEnvironment {
            implementation_name: "cpython".to_string(),
            implementation_version: self.python_full_version.clone(),
            os_name: self.os.os_name().to_string(),
            platform_machine: "x86_64".to_string(),
            platform_system: self.os.platform_system().to_string(),
            python_full_version: self.python_full_version.clone(),
            python_version: self.python_version.clone(),
            sys_platform: self.os.sys_platform().to_string(),
        }
    }
}

/// Accept `3.10`, `3.10.4` and the `310` environment-tag form.
fn parse_python_version(python_version: &str) -> Result<(u8, u8, u8), ResolveError> {
    let invalid = || ResolveError::InvalidPythonVersion(python_version.to_string());

    if python_version.contains('.') {
        let version = Version::from_str(python_version).map_err(|_| invalid())?;
        if version.any_prerelease() || !version.local.is_empty() || version.release.len() > 3 {
            return Err(invalid());
        }
        let major = u8::try_from(*version.release.first().ok_or_else(invalid)?)
            .map_err(|_| invalid())?;
        let minor = u8::try_from(version.release.get(1).copied().unwrap_or(0))
            .map_err(|_| invalid())?;
        let micro = u8::try_from(version.release.get(2).copied().unwrap_or(0))
            .map_err(|_| invalid())?;
        Ok((major, minor, micro))
    } else {
        // `310` means 3.10: one digit of major, the rest minor.
        let (major, minor) = python_version.split_at(1.min(python_version.len()));
        let major = major.parse::<u8>().map_err(|_| invalid())?;
        let minor = minor.parse::<u8>().map_err(|_| invalid())?;
        Ok((major, minor, 0))
    }
}
