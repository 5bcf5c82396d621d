//! [PEP 508](https://peps.python.org/pep-0508/) dependency specifiers.
//!
//! ```rust
//! use std::str::FromStr;
//! use skua_pep508::Requirement;
//!
//! let requirement =
//!     Requirement::from_str(r#"requests [security,tests] >= 2.8.1, == 2.8.* ; python_version > "3.8""#)
//!         .unwrap();
//! assert_eq!(requirement.name.as_ref(), "requests");
//! assert_eq!(requirement.extras.len(), 2);
//! ```
//!
//! URL requirements (`name @ https://...`) are out of scope here; the
//! resolver only consumes registry requirements.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

pub use skua_normalize::{ExtraName, InvalidNameError, PackageName};
pub use skua_pep440::{Version, VersionSpecifier, VersionSpecifiers};

pub use marker::{
    MarkerEnvironment, MarkerExpression, MarkerOperator, MarkerTree, MarkerValue,
    MarkerValueString, MarkerValueVersion,
};
pub use origin::RequirementOrigin;
use scanner::Scanner;

mod marker;
mod origin;
mod scanner;

/// A PEP 508 parse error with span information for underlining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pep508Error {
    /// The error message.
    pub message: String,
    /// Span start, a byte index into the input.
    pub start: usize,
    /// Span length in bytes.
    pub len: usize,
    /// The input string, kept so the error can print it underlined.
    pub input: String,
}

impl Display for Pep508Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\n{}\n{}{}",
            self.message,
            self.input,
            " ".repeat(self.start),
            "^".repeat(self.len.max(1))
        )
    }
}

impl std::error::Error for Pep508Error {}

/// A PEP 508 dependency specifier.
///
/// A requirement is immutable once parsed; attaching an origin produces a
/// new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    /// The normalized distribution name, e.g. `requests` in
    /// `requests [security] >= 2.8.1 ; python_version > "3.8"`.
    pub name: PackageName,
    /// The normalized extras, e.g. `security` above.
    pub extras: Vec<ExtraName>,
    /// The version constraints, e.g. `>= 2.8.1` above. Empty means any
    /// version.
    pub specifiers: VersionSpecifiers,
    /// The environment marker, e.g. `python_version > "3.8"` above.
    pub marker: Option<MarkerTree>,
    /// The parent this requirement was declared by, or `Root` for caller
    /// input.
    pub origin: RequirementOrigin,
}

impl Requirement {
    /// This requirement with the given origin attached.
    #[must_use]
    pub fn with_origin(self, origin: RequirementOrigin) -> Self {
        Self { origin, ..self }
    }

    /// Whether the requirement applies in the given environment, with
    /// `extra` set to the extra currently being expanded (if any). A
    /// requirement without a marker always applies.
    pub fn evaluate_markers(&self, env: &MarkerEnvironment, extra: Option<&ExtraName>) -> bool {
        self.marker
            .as_ref()
            .map_or(true, |marker| marker.evaluate(env, extra))
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(
                f,
                "[{}]",
                self.extras
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<String>>()
                    .join(",")
            )?;
        }
        if !self.specifiers.is_empty() {
            write!(f, "{}", self.specifiers)?;
        }
        if let Some(marker) = &self.marker {
            write!(f, " ; {marker}")?;
        }
        Ok(())
    }
}

impl FromStr for Requirement {
    type Err = Pep508Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        parse_requirement(&mut Scanner::new(input))
    }
}

impl Serialize for Requirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Requirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        Self::from_str(&string).map_err(de::Error::custom)
    }
}

/// Whether the character may appear in a package or extra name.
fn is_name_char(char: char) -> bool {
    char.is_alphanumeric() || matches!(char, '-' | '_' | '.')
}

/// `name [extras] [specifiers] [; marker]`
fn parse_requirement(scanner: &mut Scanner) -> Result<Requirement, Pep508Error> {
    let name = parse_name(scanner)?;
    let extras = parse_extras(scanner)?;
    let specifiers = parse_specifiers(scanner)?;

    scanner.skip_spaces();
    let marker = if scanner.eat(';') {
        Some(MarkerTree::parse(scanner)?)
    } else {
        None
    };

    scanner.skip_spaces();
    if let Some(char) = scanner.peek() {
        return Err(scanner.error_at(
            scanner.offset(),
            char.len_utf8(),
            format!("Unexpected character '{char}' after requirement"),
        ));
    }

    Ok(Requirement {
        name,
        extras,
        specifiers,
        marker,
        origin: RequirementOrigin::Root,
    })
}

fn parse_name(scanner: &mut Scanner) -> Result<PackageName, Pep508Error> {
    scanner.skip_spaces();
    let start = scanner.offset();
    let name = scanner.take(is_name_char);
    if name.is_empty() {
        return Err(scanner.error_at(start, 1, "Expected a package name".to_string()));
    }
    PackageName::new(name).map_err(|err| scanner.error_at(start, name.len(), err.to_string()))
}

/// `[extra1, extra2]`, if present.
fn parse_extras(scanner: &mut Scanner) -> Result<Vec<ExtraName>, Pep508Error> {
    scanner.skip_spaces();
    if !scanner.eat('[') {
        return Ok(Vec::new());
    }
    let mut extras = Vec::new();
    loop {
        scanner.skip_spaces();
        let start = scanner.offset();
        let extra = scanner.take(is_name_char);
        if extra.is_empty() {
            return Err(scanner.error_at(start, 1, "Expected an extra name".to_string()));
        }
        extras.push(
            ExtraName::new(extra)
                .map_err(|err| scanner.error_at(start, extra.len(), err.to_string()))?,
        );
        scanner.skip_spaces();
        if scanner.eat(',') {
            continue;
        }
        scanner.expect(']')?;
        break;
    }
    Ok(extras)
}

/// The version constraints, with or without surrounding parentheses, up to
/// the marker separator.
fn parse_specifiers(scanner: &mut Scanner) -> Result<VersionSpecifiers, Pep508Error> {
    scanner.skip_spaces();
    let parenthesized = scanner.eat('(');
    let start = scanner.offset();
    let raw = scanner.take(|char| if parenthesized { char != ')' } else { char != ';' });

    let trimmed = raw.trim();
    let specifiers = if trimmed.is_empty() {
        VersionSpecifiers::empty()
    } else {
        VersionSpecifiers::from_str(trimmed)
            .map_err(|err| scanner.error_at(start, raw.len(), err.to_string()))?
    };
    if parenthesized {
        scanner.expect(')')?;
    }
    Ok(specifiers)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn parse_full() {
        let requirement = Requirement::from_str(
            r#"requests [security,tests] >= 2.8.1, == 2.8.* ; python_version > "3.8""#,
        )
        .unwrap();
        assert_eq!(requirement.name.as_ref(), "requests");
        assert_eq!(
            requirement.extras,
            vec![
                ExtraName::new("security").unwrap(),
                ExtraName::new("tests").unwrap()
            ]
        );
        assert_eq!(requirement.specifiers.len(), 2);
        assert!(requirement.marker.is_some());
        assert_eq!(requirement.origin, RequirementOrigin::Root);
    }

    #[test]
    fn parse_bare_name() {
        let requirement = Requirement::from_str("flask").unwrap();
        assert_eq!(requirement.name.as_ref(), "flask");
        assert!(requirement.specifiers.is_empty());
        assert!(requirement.marker.is_none());
    }

    #[test]
    fn parse_name_normalization() {
        let requirement = Requirement::from_str("Flask_Sqlalchemy==2.1").unwrap();
        assert_eq!(requirement.name.as_ref(), "flask-sqlalchemy");
    }

    #[test]
    fn parse_parenthesized_specifier() {
        let requirement = Requirement::from_str("zope.interface (>4.1.0)").unwrap();
        assert_eq!(requirement.name.as_ref(), "zope-interface");
        assert!(requirement
            .specifiers
            .contains(&Version::from_str("5.0").unwrap()));
    }

    #[test]
    fn evaluate_markers() {
        let env = MarkerEnvironment {
            implementation_name: "cpython".to_string(),
            implementation_version: Version::from_str("3.10.4").unwrap(),
            os_name: "posix".to_string(),
            platform_machine: "x86_64".to_string(),
            platform_system: "Linux".to_string(),
            python_full_version: Version::from_str("3.10.4").unwrap(),
            python_version: Version::from_str("3.10").unwrap(),
            sys_platform: "linux".to_string(),
        };
        let gated = Requirement::from_str(r#"dep ; python_version < "3.9""#).unwrap();
        assert!(!gated.evaluate_markers(&env, None));
        let ungated = Requirement::from_str("dep").unwrap();
        assert!(ungated.evaluate_markers(&env, None));

        let extra_gated = Requirement::from_str(r#"pytest ; extra == "tests""#).unwrap();
        assert!(!extra_gated.evaluate_markers(&env, None));
        assert!(extra_gated.evaluate_markers(&env, Some(&ExtraName::new("tests").unwrap())));
    }

    #[test]
    fn display_roundtrip() {
        let requirement = Requirement::from_str(
            r#"requests[security]>=2.8.1, ==2.8.* ; python_version > '3.8'"#,
        )
        .unwrap();
        assert_eq!(
            requirement.to_string(),
            r#"requests[security]>=2.8.1, ==2.8.* ; python_version > '3.8'"#
        );
    }

    #[test]
    fn error_display() {
        insta::assert_snapshot!(
            Requirement::from_str("requests >=").unwrap_err(),
            @r###"
        Failed to parse version specifier `>=`
        requests >=
                 ^^
        "###
        );
        insta::assert_snapshot!(
            Requirement::from_str("==1.0").unwrap_err(),
            @r###"
        Expected a package name
        ==1.0
        ^
        "###
        );
    }
}
