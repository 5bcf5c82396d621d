use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::version::compare_release;
use crate::{Version, VersionParseError};

/// One of `~=` `==` `!=` `<=` `>=` `<` `>` `===`, with the wildcard forms
/// of `==` and `!=` as distinct variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `== 1.2.3`
    Equal,
    /// `== 1.2.*`
    EqualStar,
    /// `=== 1.2.3`, string equality; heavily discouraged
    ExactEqual,
    /// `!= 1.2.3`
    NotEqual,
    /// `!= 1.2.*`
    NotEqualStar,
    /// `~= 1.2.3`, pins everything but the last release segment
    TildeEqual,
    /// `< 1.2.3`
    LessThan,
    /// `<= 1.2.3`
    LessThanEqual,
    /// `> 1.2.3`
    GreaterThan,
    /// `>= 1.2.3`
    GreaterThanEqual,
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Equal | Self::EqualStar => "==",
            Self::ExactEqual => "===",
            Self::NotEqual | Self::NotEqualStar => "!=",
            Self::TildeEqual => "~=",
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
        })
    }
}

static SPECIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<op>~=|===|==|!=|<=|>=|<|>)\s*(?P<version>.+?)\s*$").unwrap());

/// A single primitive version constraint such as `>= 2.8.1` or `== 2.8.*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSpecifier {
    operator: Operator,
    version: Version,
}

impl VersionSpecifier {
    /// Build a specifier from its parts, validating the operator/version
    /// combination the way parsing would.
    pub fn new(operator: Operator, version: Version) -> Result<Self, VersionParseError> {
        if operator == Operator::TildeEqual && version.release.len() < 2 {
            return Err(VersionParseError::InvalidTildeEquals(version.to_string()));
        }
        Ok(Self { operator, version })
    }

    /// An exact `== version` pin.
    pub fn equals_version(version: Version) -> Self {
        Self {
            operator: Operator::Equal,
            version,
        }
    }

    /// The comparison operator.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The version to compare against.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether this specifier pins an exact version (`==` without a
    /// wildcard, or `===`). Yanked versions are only eligible through such
    /// a pin.
    pub fn is_exact(&self) -> bool {
        matches!(self.operator, Operator::Equal | Operator::ExactEqual)
    }

    /// Whether the given version satisfies this constraint.
    pub fn contains(&self, version: &Version) -> bool {
        // Local segments are ignored unless the specifier itself carries
        // one, per the version-specifiers spec.
        let stripped;
        let version = if self.version.local.is_empty() && !version.local.is_empty() {
            stripped = version.without_local();
            &stripped
        } else {
            version
        };

        match self.operator {
            Operator::Equal => version == &self.version,
            Operator::NotEqual => version != &self.version,
            // `===` compares the exact (canonicalized) version string.
            Operator::ExactEqual => version.to_string() == self.version.to_string(),
            Operator::EqualStar => self.contains_prefix(version),
            Operator::NotEqualStar => !self.contains_prefix(version),
            Operator::TildeEqual => {
                // `~= X.Y.Z` is `>= X.Y.Z, == X.Y.*`.
                if version < &self.version {
                    return false;
                }
                let prefix_len = self.version.release.len() - 1;
                let mut padded = version.release.clone();
                padded.resize(prefix_len.max(padded.len()), 0);
                version.epoch == self.version.epoch
                    && compare_release(&padded[..prefix_len], &self.version.release[..prefix_len])
                        == Ordering::Equal
            }
            Operator::LessThan => {
                // A pre-release of the specified release is not "less than"
                // it unless the specifier itself is a pre-release.
                if version.any_prerelease()
                    && !self.version.any_prerelease()
                    && same_release(version, &self.version)
                {
                    return false;
                }
                version < &self.version
            }
            Operator::LessThanEqual => version <= &self.version,
            Operator::GreaterThan => {
                // A post-release of the specified release is not "greater
                // than" it unless the specifier itself is a post-release.
                if version.post.is_some()
                    && self.version.post.is_none()
                    && same_release(version, &self.version)
                {
                    return false;
                }
                version > &self.version
            }
            Operator::GreaterThanEqual => version >= &self.version,
        }
    }

    /// Wildcard matching: epoch equal and the spelled-out release segments
    /// a (padded) prefix of the candidate's.
    fn contains_prefix(&self, version: &Version) -> bool {
        if version.epoch != self.version.epoch {
            return false;
        }
        let prefix_len = self.version.release.len();
        let mut padded = version.release.clone();
        padded.resize(prefix_len.max(padded.len()), 0);
        compare_release(&padded[..prefix_len], &self.version.release) == Ordering::Equal
    }
}

impl FromStr for VersionSpecifier {
    type Err = VersionParseError;

    fn from_str(specifier: &str) -> Result<Self, Self::Err> {
        let captures = SPECIFIER_RE
            .captures(specifier)
            .ok_or_else(|| VersionParseError::InvalidSpecifier(specifier.to_string()))?;
        let op = &captures["op"];
        let version_str = &captures["version"];

        let (version_str, star) = match version_str.strip_suffix(".*") {
            Some(stripped) => (stripped, true),
            None => (version_str, false),
        };
        let operator = match (op, star) {
            ("==", false) => Operator::Equal,
            ("==", true) => Operator::EqualStar,
            ("!=", false) => Operator::NotEqual,
            ("!=", true) => Operator::NotEqualStar,
            ("===", false) => Operator::ExactEqual,
            ("~=", false) => Operator::TildeEqual,
            ("<", false) => Operator::LessThan,
            ("<=", false) => Operator::LessThanEqual,
            (">", false) => Operator::GreaterThan,
            (">=", false) => Operator::GreaterThanEqual,
            (op, true) => return Err(VersionParseError::InvalidWildcard(op.to_string())),
            _ => unreachable!("the operator alternation is exhaustive"),
        };
        let version = Version::from_str(version_str)?;
        Self::new(operator, version)
    }
}

impl Display for VersionSpecifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let star = matches!(
            self.operator,
            Operator::EqualStar | Operator::NotEqualStar
        );
        write!(f, "{}{}", self.operator, self.version)?;
        if star {
            f.write_str(".*")?;
        }
        Ok(())
    }
}

/// Whether two versions share the same (zero-padded) release segments.
fn same_release(left: &Version, right: &Version) -> bool {
    left.epoch == right.epoch
        && compare_release(&left.release, &right.release) == Ordering::Equal
}

/// A conjunction of version constraints on a single package name, such as
/// `>= 2.8.1, == 2.8.*`. An empty conjunction matches every version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionSpecifiers(Vec<VersionSpecifier>);

impl VersionSpecifiers {
    /// A specifier set that matches everything.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Whether the given version satisfies every constraint in the set.
    pub fn contains(&self, version: &Version) -> bool {
        self.0.iter().all(|specifier| specifier.contains(version))
    }

    /// Whether any member constraint mentions a pre-release version. A
    /// pre-release candidate is admitted without opt-in only when this
    /// holds.
    pub fn any_prerelease(&self) -> bool {
        self.0
            .iter()
            .any(|specifier| specifier.version().any_prerelease())
    }

    /// Whether any member pins a version exactly (`==` or `===`) to the
    /// given one.
    pub fn is_exact_pin_of(&self, version: &Version) -> bool {
        self.0
            .iter()
            .any(|specifier| specifier.is_exact() && specifier.contains(version))
    }
}

impl Deref for VersionSpecifiers {
    type Target = [VersionSpecifier];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<VersionSpecifier> for VersionSpecifiers {
    fn from(specifier: VersionSpecifier) -> Self {
        Self(vec![specifier])
    }
}

impl FromIterator<VersionSpecifier> for VersionSpecifiers {
    fn from_iter<I: IntoIterator<Item = VersionSpecifier>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for VersionSpecifiers {
    type Err = VersionParseError;

    fn from_str(specifiers: &str) -> Result<Self, Self::Err> {
        let trimmed = specifiers.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        trimmed
            .split(',')
            .map(VersionSpecifier::from_str)
            .collect()
    }
}

impl Display for VersionSpecifiers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let specifiers = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()
            .join(", ");
        f.write_str(&specifiers)
    }
}

impl Serialize for VersionSpecifiers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpecifiers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        Self::from_str(&string).map_err(de::Error::custom)
    }
}
