//! PEP 508 environment markers: a tiny expression language gating a
//! requirement on properties of the target environment.
//!
//! Markers are parsed into a [`MarkerTree`] AST by recursive descent and
//! evaluated by structural recursion. Bogus-but-well-formed comparisons
//! (e.g. comparing two quoted strings) evaluate to `false` with a warning,
//! matching how installers treat them.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use tracing::warn;

use skua_normalize::ExtraName;
use skua_pep440::{Version, VersionSpecifier};

use crate::scanner::Scanner;
use crate::Pep508Error;

/// Environment marker variables holding a PEP 440 version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerValueVersion {
    /// `implementation_version`
    ImplementationVersion,
    /// `python_full_version`
    PythonFullVersion,
    /// `python_version`
    PythonVersion,
}

impl Display for MarkerValueVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImplementationVersion => f.write_str("implementation_version"),
            Self::PythonFullVersion => f.write_str("python_full_version"),
            Self::PythonVersion => f.write_str("python_version"),
        }
    }
}

/// Environment marker variables holding an arbitrary string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerValueString {
    /// `implementation_name`
    ImplementationName,
    /// `os_name`
    OsName,
    /// `platform_machine`
    PlatformMachine,
    /// `platform_system`
    PlatformSystem,
    /// `sys_platform`
    SysPlatform,
}

impl Display for MarkerValueString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImplementationName => f.write_str("implementation_name"),
            Self::OsName => f.write_str("os_name"),
            Self::PlatformMachine => f.write_str("platform_machine"),
            Self::PlatformSystem => f.write_str("platform_system"),
            Self::SysPlatform => f.write_str("sys_platform"),
        }
    }
}

/// One side of a marker comparison: a marker variable or a quoted string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerValue {
    /// A version-valued environment variable such as `python_version`.
    MarkerEnvVersion(MarkerValueVersion),
    /// A string-valued environment variable such as `sys_platform`.
    MarkerEnvString(MarkerValueString),
    /// `extra`. Special: only set while expanding an extra.
    Extra,
    /// A user-provided quoted string such as `'3.8'` or `'win32'`.
    QuotedString(String),
}

impl FromStr for MarkerValue {
    type Err = String;

    /// This is specifically for the reserved variable names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = match s {
            "implementation_name" => Self::MarkerEnvString(MarkerValueString::ImplementationName),
            "implementation_version" => {
                Self::MarkerEnvVersion(MarkerValueVersion::ImplementationVersion)
            }
            "os_name" => Self::MarkerEnvString(MarkerValueString::OsName),
            "platform_machine" => Self::MarkerEnvString(MarkerValueString::PlatformMachine),
            "platform_system" => Self::MarkerEnvString(MarkerValueString::PlatformSystem),
            "python_full_version" => Self::MarkerEnvVersion(MarkerValueVersion::PythonFullVersion),
            "python_version" => Self::MarkerEnvVersion(MarkerValueVersion::PythonVersion),
            "sys_platform" => Self::MarkerEnvString(MarkerValueString::SysPlatform),
            "extra" => Self::Extra,
            _ => return Err(format!("Invalid marker variable: {s}")),
        };
        Ok(value)
    }
}

impl Display for MarkerValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MarkerEnvVersion(value) => value.fmt(f),
            Self::MarkerEnvString(value) => value.fmt(f),
            Self::Extra => f.write_str("extra"),
            Self::QuotedString(value) => write!(f, "'{value}'"),
        }
    }
}

/// How to compare the two sides, such as `==`, `>` or `not in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerOperator {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessEqual,
    /// `~=`
    TildeEqual,
    /// `in`, a substring test
    In,
    /// `not in`, the negated substring test
    NotIn,
}

impl MarkerOperator {
    /// The textual operator to splice into a version specifier, `None` for
    /// the substring operators.
    fn as_version_operator(self) -> Option<&'static str> {
        match self {
            Self::Equal => Some("=="),
            Self::NotEqual => Some("!="),
            Self::GreaterThan => Some(">"),
            Self::GreaterEqual => Some(">="),
            Self::LessThan => Some("<"),
            Self::LessEqual => Some("<="),
            Self::TildeEqual => Some("~="),
            Self::In | Self::NotIn => None,
        }
    }
}

impl Display for MarkerOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterEqual => ">=",
            Self::LessThan => "<",
            Self::LessEqual => "<=",
            Self::TildeEqual => "~=",
            Self::In => "in",
            Self::NotIn => "not in",
        })
    }
}

/// The target environment a marker is evaluated against. Fixed at resolver
/// construction; it describes the interpreter and OS being resolved *for*,
/// not the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEnvironment {
    /// `implementation_name`, e.g. `cpython`.
    pub implementation_name: String,
    /// `implementation_version`.
    pub implementation_version: Version,
    /// `os_name`, e.g. `posix` or `nt`.
    pub os_name: String,
    /// `platform_machine`, e.g. `x86_64`.
    pub platform_machine: String,
    /// `platform_system`, e.g. `Linux`.
    pub platform_system: String,
    /// `python_full_version`, e.g. `3.10.4`.
    pub python_full_version: Version,
    /// `python_version`, the `major.minor` prefix.
    pub python_version: Version,
    /// `sys_platform`, e.g. `linux` or `win32`.
    pub sys_platform: String,
}

impl MarkerEnvironment {
    /// The value of the given version-valued variable in this environment.
    pub fn get_version(&self, key: MarkerValueVersion) -> &Version {
        match key {
            MarkerValueVersion::ImplementationVersion => &self.implementation_version,
            MarkerValueVersion::PythonFullVersion => &self.python_full_version,
            MarkerValueVersion::PythonVersion => &self.python_version,
        }
    }

    /// The value of the given string-valued variable in this environment.
    pub fn get_string(&self, key: MarkerValueString) -> &str {
        match key {
            MarkerValueString::ImplementationName => &self.implementation_name,
            MarkerValueString::OsName => &self.os_name,
            MarkerValueString::PlatformMachine => &self.platform_machine,
            MarkerValueString::PlatformSystem => &self.platform_system,
            MarkerValueString::SysPlatform => &self.sys_platform,
        }
    }
}

/// A single `<value> <op> <value>` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerExpression {
    /// The left-hand side, a variable or a quoted string.
    pub l_value: MarkerValue,
    /// The comparison operator.
    pub operator: MarkerOperator,
    /// The right-hand side, a variable or a quoted string.
    pub r_value: MarkerValue,
}

impl MarkerExpression {
    fn evaluate(&self, env: &MarkerEnvironment, extra: Option<&ExtraName>) -> bool {
        match (&self.l_value, &self.r_value) {
            // `<version var> <op> '...'`
            (MarkerValue::MarkerEnvVersion(l_key), MarkerValue::QuotedString(r_string)) => {
                self.compare_versions(env.get_version(*l_key), r_string)
            }
            // `'...' <op> <version var>` inverts the comparison.
            (MarkerValue::QuotedString(l_string), MarkerValue::MarkerEnvVersion(r_key)) => {
                let Ok(l_version) = Version::from_str(l_string) else {
                    warn!(
                        "Expected PEP 440 version to compare with {r_key}, found '{l_string}', \
                         evaluating to false"
                    );
                    return false;
                };
                match self.operator.as_version_operator() {
                    Some(op) => {
                        // `'3.7' < python_version` reads as `python_version > '3.7'`,
                        // so test the quoted version against a specifier built
                        // from the environment's value.
                        let Ok(specifier) =
                            VersionSpecifier::from_str(&format!("{op}{}", env.get_version(*r_key)))
                        else {
                            return false;
                        };
                        specifier.contains(&l_version)
                    }
                    None => self.compare_strings(l_string, &env.get_version(*r_key).to_string()),
                }
            }
            // `<string var> <op> '...'` and its inversion
            (MarkerValue::MarkerEnvString(l_key), MarkerValue::QuotedString(r_string)) => {
                self.compare_strings(env.get_string(*l_key), r_string)
            }
            (MarkerValue::QuotedString(l_string), MarkerValue::MarkerEnvString(r_key)) => {
                self.compare_strings(l_string, env.get_string(*r_key))
            }
            // `extra == '...'` and `'...' == extra`: false outside an extra
            // context, equality of normalized names inside one.
            (MarkerValue::Extra, MarkerValue::QuotedString(string))
            | (MarkerValue::QuotedString(string), MarkerValue::Extra) => {
                let Some(active) = extra else {
                    return false;
                };
                let Ok(named) = ExtraName::new(string) else {
                    warn!("Expected extra name, found '{string}', evaluating to false");
                    return false;
                };
                match self.operator {
                    MarkerOperator::Equal => named == *active,
                    MarkerOperator::NotEqual => named != *active,
                    _ => {
                        warn!(
                            "Comparing extra with '{}' is only supported for == and !=, \
                             evaluating to false",
                            self.operator
                        );
                        false
                    }
                }
            }
            // Variable-to-variable and string-to-string comparisons carry no
            // information about the environment.
            _ => {
                warn!("Comparison {self} doesn't make sense, evaluating to false");
                false
            }
        }
    }

    /// Compare a version-valued variable with a quoted string through a
    /// version specifier, so wildcards like `== '3.*'` work.
    fn compare_versions(&self, l_version: &Version, r_string: &str) -> bool {
        match self.operator.as_version_operator() {
            Some(op) => match VersionSpecifier::from_str(&format!("{op}{r_string}")) {
                Ok(specifier) => specifier.contains(l_version),
                Err(err) => {
                    warn!(
                        "Expected PEP 440 version to compare with {}, found '{r_string}', \
                         evaluating to false: {err}",
                        self.l_value
                    );
                    false
                }
            },
            None => self.compare_strings(&l_version.to_string(), r_string),
        }
    }

    /// String comparison: lexicographic for the relational operators,
    /// substring containment for `in` / `not in`.
    fn compare_strings(&self, l_string: &str, r_string: &str) -> bool {
        match self.operator {
            MarkerOperator::Equal => l_string == r_string,
            MarkerOperator::NotEqual => l_string != r_string,
            MarkerOperator::GreaterThan => l_string > r_string,
            MarkerOperator::GreaterEqual => l_string >= r_string,
            MarkerOperator::LessThan => l_string < r_string,
            MarkerOperator::LessEqual => l_string <= r_string,
            MarkerOperator::In => r_string.contains(l_string),
            MarkerOperator::NotIn => !r_string.contains(l_string),
            MarkerOperator::TildeEqual => {
                warn!("Can't apply ~= to strings, evaluating to false");
                false
            }
        }
    }
}

impl Display for MarkerExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.l_value, self.operator, self.r_value)
    }
}

/// A nested and/or/not tree of marker expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerTree {
    /// A leaf `<value> <op> <value>` comparison.
    Expression(MarkerExpression),
    /// A negated subtree.
    Negation(Box<MarkerTree>),
    /// A conjunction, true when every subtree is true.
    And(Vec<MarkerTree>),
    /// A disjunction, true when any subtree is true.
    Or(Vec<MarkerTree>),
}

impl MarkerTree {
    /// Evaluate the marker against the environment, with `extra` set to the
    /// extra currently being expanded (or `None` outside an extra context).
    pub fn evaluate(&self, env: &MarkerEnvironment, extra: Option<&ExtraName>) -> bool {
        match self {
            Self::Expression(expression) => expression.evaluate(env, extra),
            Self::Negation(inner) => !inner.evaluate(env, extra),
            Self::And(trees) => trees.iter().all(|tree| tree.evaluate(env, extra)),
            Self::Or(trees) => trees.iter().any(|tree| tree.evaluate(env, extra)),
        }
    }

    /// Whether the marker references the `extra` variable anywhere. Used to
    /// pick the requirements an extra activates.
    pub fn mentions_extra(&self) -> bool {
        match self {
            Self::Expression(expression) => {
                expression.l_value == MarkerValue::Extra || expression.r_value == MarkerValue::Extra
            }
            Self::Negation(inner) => inner.mentions_extra(),
            Self::And(trees) | Self::Or(trees) => trees.iter().any(MarkerTree::mentions_extra),
        }
    }

    pub(crate) fn parse(scanner: &mut Scanner) -> Result<Self, Pep508Error> {
        let tree = parse_or(scanner)?;
        scanner.skip_spaces();
        if let Some(char) = scanner.peek() {
            return Err(scanner.error_at(
                scanner.offset(),
                char.len_utf8(),
                format!("Unexpected character '{char}' after marker expression"),
            ));
        }
        Ok(tree)
    }
}

impl FromStr for MarkerTree {
    type Err = Pep508Error;

    fn from_str(marker: &str) -> Result<Self, Self::Err> {
        Self::parse(&mut Scanner::new(marker))
    }
}

fn parse_or(scanner: &mut Scanner) -> Result<MarkerTree, Pep508Error> {
    let first = parse_and(scanner)?;
    let mut trees = vec![first];
    while eat_keyword(scanner, "or") {
        trees.push(parse_and(scanner)?);
    }
    Ok(if trees.len() == 1 {
        trees.remove(0)
    } else {
        MarkerTree::Or(trees)
    })
}

fn parse_and(scanner: &mut Scanner) -> Result<MarkerTree, Pep508Error> {
    let first = parse_atom(scanner)?;
    let mut trees = vec![first];
    while eat_keyword(scanner, "and") {
        trees.push(parse_atom(scanner)?);
    }
    Ok(if trees.len() == 1 {
        trees.remove(0)
    } else {
        MarkerTree::And(trees)
    })
}

fn parse_atom(scanner: &mut Scanner) -> Result<MarkerTree, Pep508Error> {
    scanner.skip_spaces();
    if eat_keyword(scanner, "not") {
        return Ok(MarkerTree::Negation(Box::new(parse_atom(scanner)?)));
    }
    if scanner.eat('(') {
        let tree = parse_or(scanner)?;
        scanner.skip_spaces();
        scanner.expect(')')?;
        return Ok(tree);
    }
    let l_value = parse_marker_value(scanner)?;
    let operator = parse_marker_operator(scanner)?;
    let r_value = parse_marker_value(scanner)?;
    Ok(MarkerTree::Expression(MarkerExpression {
        l_value,
        operator,
        r_value,
    }))
}

impl Display for MarkerTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn fmt_nested(tree: &MarkerTree, f: &mut Formatter<'_>) -> std::fmt::Result {
            if matches!(tree, MarkerTree::And(_) | MarkerTree::Or(_)) {
                write!(f, "({tree})")
            } else {
                write!(f, "{tree}")
            }
        }

        match self {
            Self::Expression(expression) => expression.fmt(f),
            Self::Negation(inner) => {
                f.write_str("not ")?;
                fmt_nested(inner, f)
            }
            Self::And(trees) => {
                for (index, tree) in trees.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" and ")?;
                    }
                    fmt_nested(tree, f)?;
                }
                Ok(())
            }
            Self::Or(trees) => {
                for (index, tree) in trees.iter().enumerate() {
                    if index > 0 {
                        f.write_str(" or ")?;
                    }
                    fmt_nested(tree, f)?;
                }
                Ok(())
            }
        }
    }
}

/// Consume the given keyword if the next identifier is exactly it, so that
/// e.g. `or` is never read out of `os_name`.
fn eat_keyword(scanner: &mut Scanner, keyword: &str) -> bool {
    let mut lookahead = scanner.clone();
    lookahead.skip_spaces();
    let word = lookahead.take(|char| char.is_alphanumeric() || matches!(char, '_' | '.'));
    if word == keyword {
        *scanner = lookahead;
        true
    } else {
        false
    }
}

fn parse_marker_value(scanner: &mut Scanner) -> Result<MarkerValue, Pep508Error> {
    scanner.skip_spaces();
    match scanner.peek() {
        Some(quote @ ('\'' | '"')) => {
            let open = scanner.offset();
            scanner.bump();
            let value = scanner.take(|char| char != quote).to_string();
            if !scanner.eat(quote) {
                return Err(scanner.error_at(
                    open,
                    1,
                    "Unterminated quoted string in marker".to_string(),
                ));
            }
            Ok(MarkerValue::QuotedString(value))
        }
        Some(_) => {
            let start = scanner.offset();
            let identifier =
                scanner.take(|char| char.is_alphanumeric() || matches!(char, '_' | '.' | '-'));
            if identifier.is_empty() {
                return Err(scanner.error_at(
                    start,
                    1,
                    "Expected a marker variable or quoted string".to_string(),
                ));
            }
            MarkerValue::from_str(identifier)
                .map_err(|message| scanner.error_at(start, identifier.len(), message))
        }
        None => Err(scanner.error_at(
            scanner.offset(),
            1,
            "Expected a marker variable or quoted string, found the end of the input".to_string(),
        )),
    }
}

fn parse_marker_operator(scanner: &mut Scanner) -> Result<MarkerOperator, Pep508Error> {
    scanner.skip_spaces();
    let start = scanner.offset();
    let operator = if scanner.peek().is_some_and(char::is_alphanumeric) {
        // `in`, or `not` followed by whitespace and `in`.
        scanner.take(|char| char.is_ascii_alphabetic())
    } else {
        scanner.take(|char| matches!(char, '<' | '=' | '>' | '~' | '!'))
    };
    let operator = match operator {
        "==" => MarkerOperator::Equal,
        "!=" => MarkerOperator::NotEqual,
        ">" => MarkerOperator::GreaterThan,
        ">=" => MarkerOperator::GreaterEqual,
        "<" => MarkerOperator::LessThan,
        "<=" => MarkerOperator::LessEqual,
        "~=" => MarkerOperator::TildeEqual,
        "in" => MarkerOperator::In,
        "not" => {
            scanner.skip_spaces();
            let follow_start = scanner.offset();
            let follow = scanner.take(char::is_alphanumeric);
            if follow == "in" {
                MarkerOperator::NotIn
            } else {
                return Err(scanner.error_at(
                    follow_start,
                    follow.len().max(1),
                    "Expected 'in' after 'not'".to_string(),
                ));
            }
        }
        other => {
            return Err(scanner.error_at(
                start,
                other.len().max(1),
                format!("Expected a comparison operator, found '{other}'"),
            ));
        }
    };
    Ok(operator)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use skua_normalize::ExtraName;
    use skua_pep440::Version;

    use super::{MarkerEnvironment, MarkerTree};

    fn env_310_linux() -> MarkerEnvironment {
        MarkerEnvironment {
            implementation_name: "cpython".to_string(),
            implementation_version: Version::from_str("3.10.4").unwrap(),
            os_name: "posix".to_string(),
            platform_machine: "x86_64".to_string(),
            platform_system: "Linux".to_string(),
            python_full_version: Version::from_str("3.10.4").unwrap(),
            python_version: Version::from_str("3.10").unwrap(),
            sys_platform: "linux".to_string(),
        }
    }

    fn evaluate(marker: &str) -> bool {
        MarkerTree::from_str(marker)
            .unwrap()
            .evaluate(&env_310_linux(), None)
    }

    #[test]
    fn version_comparisons() {
        assert!(evaluate(r#"python_version >= "3.9""#));
        assert!(!evaluate(r#"python_version < "3.9""#));
        // 3.10 is not lexicographically greater than 3.9; version semantics
        // must apply.
        assert!(evaluate(r#"python_version > "3.9""#));
        assert!(evaluate(r#"python_full_version >= "3.10.2""#));
        assert!(evaluate(r#"python_version == "3.*""#));
    }

    #[test]
    fn reversed_version_comparison() {
        assert!(evaluate(r#""3.9" < python_version"#));
        assert!(!evaluate(r#""3.11" <= python_version"#));
    }

    #[test]
    fn string_comparisons() {
        assert!(evaluate(r#"sys_platform == "linux""#));
        assert!(evaluate(r#"platform_system != "Windows""#));
        assert!(evaluate(r#""linu" in sys_platform"#));
        assert!(evaluate(r#""win" not in sys_platform"#));
    }

    #[test]
    fn logic() {
        assert!(evaluate(
            r#"sys_platform == "linux" and python_version >= "3.8""#
        ));
        assert!(evaluate(
            r#"sys_platform == "win32" or python_version >= "3.8""#
        ));
        assert!(evaluate(
            r#"(sys_platform == "win32" or sys_platform == "linux") and python_version >= "3.8""#
        ));
        assert!(evaluate(r#"not (sys_platform == "win32")"#));
    }

    #[test]
    fn extra_outside_context_is_false() {
        assert!(!evaluate(r#"extra == "tests""#));
        assert!(!evaluate(r#"extra != "tests""#));
    }

    #[test]
    fn extra_inside_context() {
        let marker = MarkerTree::from_str(r#"extra == "tests""#).unwrap();
        let env = env_310_linux();
        let tests = ExtraName::new("tests").unwrap();
        let docs = ExtraName::new("docs").unwrap();
        assert!(marker.evaluate(&env, Some(&tests)));
        assert!(!marker.evaluate(&env, Some(&docs)));
        // Extra names compare normalized.
        let marker = MarkerTree::from_str(r#"extra == "Tests_""#).unwrap();
        assert!(!marker.evaluate(&env, Some(&tests)));
        let marker = MarkerTree::from_str(r#"extra == "TESTS""#).unwrap();
        assert!(marker.evaluate(&env, Some(&tests)));
    }

    #[test]
    fn bogus_comparisons_are_false() {
        assert!(!evaluate(r#"os_name == sys_platform"#));
        assert!(!evaluate(r#"'linux' == 'linux'"#));
    }

    #[test]
    fn mentions_extra() {
        let marker =
            MarkerTree::from_str(r#"python_version >= "3.8" and extra == "tests""#).unwrap();
        assert!(marker.mentions_extra());
        let marker = MarkerTree::from_str(r#"python_version >= "3.8""#).unwrap();
        assert!(!marker.mentions_extra());
    }

    #[test]
    fn keyword_is_not_identifier_prefix() {
        // `or` must not be read out of `os_name`.
        assert!(evaluate(r#"python_version >= "3.8" and os_name == "posix""#));
    }

    #[test]
    fn display_roundtrip() {
        for marker in [
            r#"python_version >= '3.8'"#,
            r#"sys_platform == 'linux' and python_version >= '3.8'"#,
            r#"extra == 'tests' or extra == 'dev'"#,
        ] {
            let parsed = MarkerTree::from_str(marker).unwrap();
            assert_eq!(
                MarkerTree::from_str(&parsed.to_string()).unwrap(),
                parsed,
                "{marker}"
            );
        }
    }
}
