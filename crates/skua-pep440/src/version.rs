use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::VersionParseError;

/// The PEP 440 grammar, from the appendix of the spec, anchored and
/// case-insensitive. The leading `v` and surrounding whitespace are folded
/// into the pattern so callers can pass metadata values verbatim.
static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?xi)
        ^\s*v?
        (?:(?P<epoch>[0-9]+)!)?
        (?P<release>[0-9]+(?:\.[0-9]+)*)
        (?:[-_\.]?(?P<pre_l>a|b|c|rc|alpha|beta|pre|preview)[-_\.]?(?P<pre_n>[0-9]+)?)?
        (?:
            (?:-(?P<post_n1>[0-9]+))
            |
            (?:[-_\.]?(?P<post_l>post|rev|r)[-_\.]?(?P<post_n2>[0-9]+)?)
        )?
        (?:[-_\.]?(?P<dev_l>dev)[-_\.]?(?P<dev_n>[0-9]+)?)?
        (?:\+(?P<local>[a-z0-9]+(?:[-_\.][a-z0-9]+)*))?
        \s*$",
    )
    .unwrap()
});

/// The pre-release cycle, ordered `a < b < rc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreReleaseKind {
    /// `1.2.3a1`
    Alpha,
    /// `1.2.3b1`
    Beta,
    /// `1.2.3rc1`
    Rc,
}

impl Display for PreReleaseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alpha => f.write_str("a"),
            Self::Beta => f.write_str("b"),
            Self::Rc => f.write_str("rc"),
        }
    }
}

/// A pre-release segment such as `a1`, `b2` or `rc3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PreRelease {
    /// Alpha, beta or release candidate.
    pub kind: PreReleaseKind,
    /// The number in e.g. the `1` in `rc1`. Defaults to 0 when omitted.
    pub number: u64,
}

impl Display for PreRelease {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.kind, self.number)
    }
}

/// A segment of a local version identifier. Numeric segments compare
/// numerically and always greater than alphanumeric segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalSegment {
    /// `ubuntu` in `1.0+ubuntu.1`
    String(String),
    /// `1` in `1.0+ubuntu.1`
    Number(u64),
}

impl Display for LocalSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(string) => string.fmt(f),
            Self::Number(number) => number.fmt(f),
        }
    }
}

impl Ord for LocalSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(left), Self::Number(right)) => left.cmp(right),
            (Self::String(left), Self::String(right)) => left.cmp(right),
            (Self::Number(_), Self::String(_)) => Ordering::Greater,
            (Self::String(_), Self::Number(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for LocalSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A PEP 440 version.
///
/// Ordering respects epoch, release, pre/post/dev and local segment
/// precedence. Equality ignores trailing zero release segments, so
/// `1.0 == 1.0.0`.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    /// The `1!` in `1!2.0`. Almost always 0.
    pub epoch: u64,
    /// The dotted-number core, e.g. `[1, 2, 3]` for `1.2.3`.
    pub release: Vec<u64>,
    /// An optional pre-release segment.
    pub pre: Option<PreRelease>,
    /// An optional post-release segment.
    pub post: Option<u64>,
    /// An optional development segment. `1.0.dev1 < 1.0a1 < 1.0`.
    pub dev: Option<u64>,
    /// The local version suffix, e.g. `[deadbeef]` in `1.0+deadbeef`.
    /// Only orders otherwise-equal releases.
    pub local: Vec<LocalSegment>,
}

impl Version {
    /// A plain release version from its segments, e.g. `Version::new([3, 10])`.
    pub fn new(release: impl IntoIterator<Item = u64>) -> Self {
        Self {
            epoch: 0,
            release: release.into_iter().collect(),
            pre: None,
            post: None,
            dev: None,
            local: Vec::new(),
        }
    }

    /// Whether this is a pre-release in the broad sense: an alpha/beta/rc
    /// or a development release.
    pub fn any_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// This version with the local segment removed, for specifier matching.
    #[must_use]
    pub fn without_local(&self) -> Self {
        Self {
            local: Vec::new(),
            ..self.clone()
        }
    }

    /// The release with trailing zero segments removed, the form under
    /// which `1.0` and `1.0.0` are the same version.
    fn trimmed_release(&self) -> &[u64] {
        let mut end = self.release.len();
        while end > 1 && self.release[end - 1] == 0 {
            end -= 1;
        }
        &self.release[..end]
    }

    /// Sort key for the pre-release position: a dev-only release sorts
    /// below every pre-release of the same release, which in turn sorts
    /// below the final release.
    fn pre_key(&self) -> (u8, Option<PreRelease>) {
        if let Some(pre) = self.pre {
            (1, Some(pre))
        } else if self.post.is_none() && self.dev.is_some() {
            (0, None)
        } else {
            (2, None)
        }
    }

    /// Sort key for the dev position: `1.0.dev1 < 1.0`.
    fn dev_key(&self) -> (u8, u64) {
        match self.dev {
            Some(dev) => (0, dev),
            None => (1, 0),
        }
    }
}

/// Compare release segments with implicit zero padding, so that
/// `1.0 == 1.0.0` and `1.9 < 1.10`.
pub(crate) fn compare_release(left: &[u64], right: &[u64]) -> Ordering {
    for index in 0..left.len().max(right.len()) {
        let left = left.get(index).copied().unwrap_or(0);
        let right = right.get(index).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => {}
            ordering => return ordering,
        }
    }
    Ordering::Equal
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_release(&self.release, &other.release))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Hash for Version {
    /// Hash over the same shape `Ord` compares, with the release trimmed so
    /// that `1.0` and `1.0.0` hash identically.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        self.trimmed_release().hash(state);
        self.pre.hash(state);
        self.post.hash(state);
        self.dev.hash(state);
        self.local.hash(state);
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let captures = VERSION_RE
            .captures(version)
            .ok_or_else(|| VersionParseError::InvalidVersion(version.to_string()))?;

        let epoch = captures
            .name("epoch")
            .map(|epoch| epoch.as_str().parse::<u64>())
            .transpose()
            .map_err(|_| VersionParseError::InvalidVersion(version.to_string()))?
            .unwrap_or(0);
        let release = captures["release"]
            .split('.')
            .map(str::parse::<u64>)
            .collect::<Result<Vec<u64>, _>>()
            .map_err(|_| VersionParseError::InvalidVersion(version.to_string()))?;
        let pre = captures.name("pre_l").map(|pre_l| {
            let kind = match pre_l.as_str().to_ascii_lowercase().as_str() {
                "a" | "alpha" => PreReleaseKind::Alpha,
                "b" | "beta" => PreReleaseKind::Beta,
                // "c", "pre" and "preview" are spelling variants of "rc".
                _ => PreReleaseKind::Rc,
            };
            let number = captures
                .name("pre_n")
                .map_or(0, |n| n.as_str().parse().unwrap_or(0));
            PreRelease { kind, number }
        });
        let post = if let Some(number) = captures.name("post_n1") {
            Some(number.as_str().parse().unwrap_or(0))
        } else if captures.name("post_l").is_some() {
            // A bare `post`/`rev`/`r` without a number means post 0.
            Some(
                captures
                    .name("post_n2")
                    .map_or(0, |number| number.as_str().parse().unwrap_or(0)),
            )
        } else {
            None
        };
        let dev = captures.name("dev_l").map(|_| {
            captures
                .name("dev_n")
                .map_or(0, |number| number.as_str().parse().unwrap_or(0))
        });
        let local = captures.name("local").map_or_else(Vec::new, |local| {
            local
                .as_str()
                .to_ascii_lowercase()
                .split(['-', '_', '.'])
                .map(|segment| match segment.parse::<u64>() {
                    Ok(number) => LocalSegment::Number(number),
                    Err(_) => LocalSegment::String(segment.to_string()),
                })
                .collect()
        });

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }
}

impl Display for Version {
    /// The canonical PEP 440 form.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release = self
            .release
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()
            .join(".");
        f.write_str(&release)?;
        if let Some(pre) = self.pre {
            write!(f, "{pre}")?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if !self.local.is_empty() {
            let local = self
                .local
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(".");
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        Self::from_str(&string).map_err(de::Error::custom)
    }
}
