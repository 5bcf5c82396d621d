//! Compatible wheel tags for a target environment.
//!
//! A wheel carries `(python_tag, abi_tag, platform_tag)` triples; an
//! environment supports an ordered list of such triples, most specific
//! first. A wheel is usable if any of its triples is supported, and wheels
//! are ranked by the best (most specific) triple they match.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// The operating system a resolution targets. One platform tag set (x86_64)
/// per OS; the resolver assumes a single ABI/platform set per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// `linux`
    Linux,
    /// `macos`
    Macos,
    /// `windows`
    Windows,
}

impl Os {
    /// All supported values, for error listings.
    pub const ALL: [Os; 3] = [Os::Linux, Os::Macos, Os::Windows];

    /// The `sys.platform` value on this OS.
    pub fn sys_platform(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "darwin",
            Self::Windows => "win32",
        }
    }

    /// The `platform.system()` value on this OS.
    pub fn platform_system(self) -> &'static str {
        match self {
            Self::Linux => "Linux",
            Self::Macos => "Darwin",
            Self::Windows => "Windows",
        }
    }

    /// The `os.name` value on this OS.
    pub fn os_name(self) -> &'static str {
        match self {
            Self::Linux | Self::Macos => "posix",
            Self::Windows => "nt",
        }
    }
}

impl Display for Os {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => f.write_str("linux"),
            Self::Macos => f.write_str("macos"),
            Self::Windows => f.write_str("windows"),
        }
    }
}

impl FromStr for Os {
    type Err = PlatformError;

    fn from_str(os: &str) -> Result<Self, Self::Err> {
        match os {
            "linux" => Ok(Self::Linux),
            "macos" => Ok(Self::Macos),
            "windows" => Ok(Self::Windows),
            other => Err(PlatformError::UnknownOs(other.to_string())),
        }
    }
}

/// An error constructing the tag set for a target environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    /// The operating system tag is not one of the supported set.
    #[error("Invalid operating system: {0}. Must be one of: linux, macos, windows")]
    UnknownOs(String),
    /// The Python version is out of the supported range.
    #[error("Unsupported Python version: {0}. Must be 2.7 or 3.6 through 3.12")]
    UnsupportedPythonVersion(String),
}

/// The priority of a matched tag triple: the index into the environment's
/// ranked tag list, higher is more specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagPriority(usize);

/// The set of tag triples compatible with a target environment, ranked by
/// specificity.
#[derive(Debug, Clone)]
pub struct Tags {
    /// `(python_tag, abi_tag, platform_tag) -> priority`, where the highest
    /// priority is the most specific triple.
    map: FxHashMap<(String, String, String), TagPriority>,
}

impl Tags {
    /// Returns the compatible tags for the given Python version and OS, most
    /// specific last (so `TagPriority` orders naturally).
    pub fn from_env(os: Os, python_version: (u8, u8)) -> Result<Self, PlatformError> {
        let (major, minor) = python_version;
        if !(major == 2 && minor == 7 || major == 3 && (6..=12).contains(&minor)) {
            return Err(PlatformError::UnsupportedPythonVersion(format!(
                "{major}.{minor}"
            )));
        }
        let platform_tags = compatible_platform_tags(os);

        // Build in ascending specificity, mirroring the ordering pip
        // computes: pure-Python `any` wheels first, then binary wheels for
        // this exact interpreter.
        let mut tags = Vec::new();

        // 1. Pure-Python, no binary.
        tags.push((format!("py{major}"), "none".to_string(), "any".to_string()));
        for m in 0..=minor {
            tags.push((format!("py{major}{m}"), "none".to_string(), "any".to_string()));
        }
        // 2. Pure interpreter tags on a concrete platform.
        for platform_tag in &platform_tags {
            tags.push((
                format!("py{major}"),
                "none".to_string(),
                platform_tag.clone(),
            ));
            for m in 0..=minor {
                tags.push((
                    format!("py{major}{m}"),
                    "none".to_string(),
                    platform_tag.clone(),
                ));
            }
        }
        // 3. Stable ABI.
        if major == 3 {
            for m in 2..=minor {
                for platform_tag in &platform_tags {
                    tags.push((
                        format!("cp{major}{m}"),
                        "abi3".to_string(),
                        platform_tag.clone(),
                    ));
                }
            }
        }
        // 4. This exact C API version, the most specific.
        for platform_tag in &platform_tags {
            tags.push((
                format!("cp{major}{minor}"),
                "none".to_string(),
                platform_tag.clone(),
            ));
            tags.push((
                format!("cp{major}{minor}"),
                format!("cp{major}{minor}"),
                platform_tag.clone(),
            ));
            // The historic `m` ABI suffix, used through Python 3.7.
            if major == 2 || minor <= 7 {
                tags.push((
                    format!("cp{major}{minor}"),
                    format!("cp{major}{minor}m"),
                    platform_tag.clone(),
                ));
            }
        }

        let map = tags
            .into_iter()
            .enumerate()
            .map(|(priority, tag)| (tag, TagPriority(priority)))
            .collect();
        Ok(Self { map })
    }

    /// Whether the given triple is compatible with this environment.
    pub fn is_compatible(&self, python_tag: &str, abi_tag: &str, platform_tag: &str) -> bool {
        self.priority(python_tag, abi_tag, platform_tag).is_some()
    }

    /// The priority of the given triple, if compatible.
    pub fn priority(
        &self,
        python_tag: &str,
        abi_tag: &str,
        platform_tag: &str,
    ) -> Option<TagPriority> {
        self.map
            .get(&(
                python_tag.to_string(),
                abi_tag.to_string(),
                platform_tag.to_string(),
            ))
            .copied()
    }
}

/// The platform tags accepted for an OS, narrowest build environment last.
/// One x86_64 set per OS, following the supported-environments table of the
/// original tool.
fn compatible_platform_tags(os: Os) -> Vec<String> {
    match os {
        Os::Linux => vec![
            "linux_x86_64".to_string(),
            "manylinux1_x86_64".to_string(),
            "manylinux2010_x86_64".to_string(),
            "manylinux2014_x86_64".to_string(),
            "manylinux_2_17_x86_64".to_string(),
            "manylinux_2_28_x86_64".to_string(),
        ],
        Os::Macos => {
            let mut tags = Vec::new();
            for minor in 6..=15 {
                tags.push(format!("macosx_10_{minor}_intel"));
                tags.push(format!("macosx_10_{minor}_x86_64"));
            }
            for minor in 9..=15 {
                tags.push(format!("macosx_10_{minor}_universal2"));
            }
            for major in 11..=14 {
                tags.push(format!("macosx_{major}_0_x86_64"));
                tags.push(format!("macosx_{major}_0_universal2"));
            }
            tags
        }
        Os::Windows => vec!["win_amd64".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_wheels_are_compatible_everywhere() {
        for os in Os::ALL {
            let tags = Tags::from_env(os, (3, 10)).unwrap();
            assert!(tags.is_compatible("py3", "none", "any"));
            assert!(tags.is_compatible("py310", "none", "any"));
            assert!(!tags.is_compatible("py311", "none", "any"));
        }
    }

    #[test]
    fn binary_wheels_match_their_platform() {
        let tags = Tags::from_env(Os::Linux, (3, 10)).unwrap();
        assert!(tags.is_compatible("cp310", "cp310", "manylinux_2_17_x86_64"));
        assert!(tags.is_compatible("cp38", "abi3", "manylinux2014_x86_64"));
        assert!(!tags.is_compatible("cp310", "cp310", "win_amd64"));
        assert!(!tags.is_compatible("cp311", "cp311", "manylinux_2_17_x86_64"));

        let tags = Tags::from_env(Os::Windows, (3, 10)).unwrap();
        assert!(tags.is_compatible("cp310", "cp310", "win_amd64"));
        assert!(!tags.is_compatible("cp310", "cp310", "manylinux_2_17_x86_64"));
    }

    #[test]
    fn specificity_ranking() {
        let tags = Tags::from_env(Os::Linux, (3, 10)).unwrap();
        let pure = tags.priority("py3", "none", "any").unwrap();
        let platform = tags.priority("py310", "none", "manylinux_2_17_x86_64").unwrap();
        let binary = tags.priority("cp310", "cp310", "manylinux_2_17_x86_64").unwrap();
        assert!(pure < platform);
        assert!(platform < binary);
    }

    #[test]
    fn old_abi_suffix() {
        let tags = Tags::from_env(Os::Linux, (2, 7)).unwrap();
        assert!(tags.is_compatible("cp27", "cp27m", "manylinux1_x86_64"));
        let tags = Tags::from_env(Os::Linux, (3, 10)).unwrap();
        assert!(!tags.is_compatible("cp310", "cp310m", "manylinux_2_17_x86_64"));
    }

    #[test]
    fn validation() {
        assert_eq!(
            Os::from_str("freebsd").unwrap_err(),
            PlatformError::UnknownOs("freebsd".to_string())
        );
        assert!(matches!(
            Tags::from_env(Os::Linux, (3, 3)),
            Err(PlatformError::UnsupportedPythonVersion(_))
        ));
    }
}
