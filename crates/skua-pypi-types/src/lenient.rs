//! Lenient parsing for requirement and specifier strings.
//!
//! Published metadata contains a number of well-known malformations
//! (`elasticsearch-dsl (>=7.2.0<8.0.0)`, `pyzmq (>=3.6,)`, `torch
//! (>=1.9.*)`). Rather than failing an entire resolution on them, the
//! metadata path repairs the handful of recognized shapes and logs what it
//! did.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use skua_pep440::{VersionParseError, VersionSpecifiers};
use skua_pep508::{Pep508Error, Requirement};

/// Ex) `>=7.2.0<8.0.0`
static MISSING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)([<>=~^!])").unwrap());
/// Ex) `>=1.9.*`
static GREATER_THAN_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r">=(\d+\.\d+)\.\*").unwrap());
/// Ex) `!=3.0*`
static MISSING_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d\.\d)+\*").unwrap());
/// Ex) `pyzmq (>=3.6,)`
static TRAILING_COMMA_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*\)").unwrap());
/// Ex) `>=3.6,`
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*$").unwrap());

/// The repair candidates, in the order they are attempted.
fn patched_forms(input: &str) -> impl Iterator<Item = String> + '_ {
    [
        // Given `elasticsearch-dsl (>=7.2.0<8.0.0)`, rewrite to
        // `elasticsearch-dsl (>=7.2.0,<8.0.0)`.
        MISSING_COMMA.replace_all(input, r"${1},${2}"),
        // Given `torch (>=1.9.*)`, rewrite to `torch (>=1.9)`.
        GREATER_THAN_STAR.replace_all(input, r">=${1}"),
        // Given `pyzmq (!=3.0*)`, rewrite to `pyzmq (!=3.0.*)`.
        MISSING_DOT.replace_all(input, r"${1}.*"),
        // Given `pyzmq (>=3.6,)`, rewrite to `pyzmq (>=3.6)`.
        TRAILING_COMMA_PAREN.replace_all(input, r")"),
        // Given `>=3.6,`, rewrite to `>=3.6`.
        TRAILING_COMMA.replace_all(input, ""),
    ]
    .into_iter()
    .filter(move |patched| patched != input)
    .map(|patched| patched.into_owned())
}

/// Like [`Requirement`], but attempts to correct some common errors in
/// published requirement strings.
#[derive(Debug, Clone)]
pub struct LenientRequirement(Requirement);

impl FromStr for LenientRequirement {
    type Err = Pep508Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match Requirement::from_str(input) {
            Ok(requirement) => Ok(Self(requirement)),
            Err(err) => {
                for patched in patched_forms(input) {
                    if let Ok(requirement) = Requirement::from_str(&patched) {
                        warn!(
                            "Correcting invalid requirement (before: `{input}`; after: `{patched}`)",
                        );
                        return Ok(Self(requirement));
                    }
                }
                Err(err)
            }
        }
    }
}

impl From<LenientRequirement> for Requirement {
    fn from(requirement: LenientRequirement) -> Self {
        requirement.0
    }
}

/// Like [`VersionSpecifiers`], but attempts to correct some common errors
/// in published `requires-python` values.
#[derive(Debug, Clone)]
pub struct LenientVersionSpecifiers(VersionSpecifiers);

impl LenientVersionSpecifiers {
    /// Parse, repairing the recognized malformed shapes.
    pub fn from_str_lenient(input: &str) -> Result<Self, VersionParseError> {
        match VersionSpecifiers::from_str(input) {
            Ok(specifiers) => Ok(Self(specifiers)),
            Err(err) => {
                for patched in patched_forms(input) {
                    if let Ok(specifiers) = VersionSpecifiers::from_str(&patched) {
                        warn!(
                            "Correcting invalid version specifier (before: `{input}`; after: `{patched}`)",
                        );
                        return Ok(Self(specifiers));
                    }
                }
                Err(err)
            }
        }
    }
}

impl From<LenientVersionSpecifiers> for VersionSpecifiers {
    fn from(specifiers: LenientVersionSpecifiers) -> Self {
        specifiers.0
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use skua_pep508::Requirement;

    use super::{LenientRequirement, LenientVersionSpecifiers};

    #[test]
    fn missing_comma() {
        let actual: Requirement = LenientRequirement::from_str("elasticsearch-dsl (>=7.2.0<8.0.0)")
            .unwrap()
            .into();
        let expected = Requirement::from_str("elasticsearch-dsl (>=7.2.0,<8.0.0)").unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn greater_than_star() {
        let actual: Requirement = LenientRequirement::from_str("torch (>=1.9.*)").unwrap().into();
        let expected = Requirement::from_str("torch (>=1.9)").unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn missing_dot() {
        let actual: Requirement = LenientRequirement::from_str("pyzmq (>=2.7,!=3.0*)")
            .unwrap()
            .into();
        let expected = Requirement::from_str("pyzmq (>=2.7,!=3.0.*)").unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn trailing_comma() {
        let actual: Requirement = LenientRequirement::from_str("pyzmq (>=3.6,)").unwrap().into();
        let expected = Requirement::from_str("pyzmq (>=3.6)").unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn lenient_specifiers() {
        let specifiers = LenientVersionSpecifiers::from_str_lenient(">=3.6,").unwrap();
        let expected = skua_pep440::VersionSpecifiers::from_str(">=3.6").unwrap();
        assert_eq!(skua_pep440::VersionSpecifiers::from(specifiers), expected);
    }

    #[test]
    fn still_invalid() {
        assert!(LenientRequirement::from_str("not a requirement at all!").is_err());
    }
}
