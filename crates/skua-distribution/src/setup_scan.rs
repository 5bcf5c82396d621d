//! A constrained reader for `setup.py` dependency declarations.
//!
//! Source distributions predating static metadata declare their
//! requirements in `setup.py`, which in general requires executing
//! untrusted code to evaluate. This scanner instead extracts the
//! `install_requires` list *only* when it is written as a literal list of
//! string literals; anything dynamic is reported as such so the caller can
//! fail the candidate. No code is ever executed.

/// What the scanner found in a `setup.py`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SetupRequires {
    /// No `install_requires` at all: the package declares no dependencies.
    Absent,
    /// A literal list of requirement strings.
    Literal(Vec<String>),
    /// An `install_requires` that is not a literal list (a variable, a
    /// comprehension, a function call): evaluating it would mean running
    /// the script.
    Dynamic,
}

/// Scan `setup.py` source text for a literal `install_requires` list.
pub(crate) fn scan_install_requires(source: &str) -> SetupRequires {
    let Some(position) = source.find("install_requires") else {
        return SetupRequires::Absent;
    };
    let rest = &source[position + "install_requires".len()..];

    // Expect `install_requires = [ ... ]`, tolerating whitespace.
    let rest = rest.trim_start();
    let Some(rest) = rest.strip_prefix('=') else {
        return SetupRequires::Dynamic;
    };
    let rest = rest.trim_start();
    let Some(rest) = rest.strip_prefix('[') else {
        return SetupRequires::Dynamic;
    };

    let mut requirements = Vec::new();
    let mut chars = rest.chars();
    loop {
        let Some(char) = chars.next() else {
            // Unterminated list.
            return SetupRequires::Dynamic;
        };
        match char {
            ']' => return SetupRequires::Literal(requirements),
            quote @ ('\'' | '"') => {
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some('\\') => {
                            // Keep escaped quotes; other escapes pass through.
                            if let Some(escaped) = chars.next() {
                                literal.push(escaped);
                            }
                        }
                        Some(c) => literal.push(c),
                        None => return SetupRequires::Dynamic,
                    }
                }
                requirements.push(literal);
            }
            ',' => {}
            '#' => {
                // Skip a comment to the end of the line.
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            // Any other token means the list is not a plain literal.
            _ => return SetupRequires::Dynamic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{scan_install_requires, SetupRequires};

    #[test]
    fn absent() {
        let setup = r#"
from setuptools import setup
setup(name="crontab", version="1.0.4")
"#;
        assert_eq!(scan_install_requires(setup), SetupRequires::Absent);
    }

    #[test]
    fn literal_list() {
        let setup = r#"
setup(
    name="flask",
    install_requires=[
        "Werkzeug >= 2.0",  # WSGI toolkit
        'Jinja2 >= 3.0',
    ],
)
"#;
        assert_eq!(
            scan_install_requires(setup),
            SetupRequires::Literal(vec![
                "Werkzeug >= 2.0".to_string(),
                "Jinja2 >= 3.0".to_string()
            ])
        );
    }

    #[test]
    fn empty_list() {
        let setup = "setup(install_requires=[])";
        assert_eq!(
            scan_install_requires(setup),
            SetupRequires::Literal(Vec::new())
        );
    }

    #[test]
    fn dynamic_value() {
        let setup = "setup(install_requires=parse_requirements('requirements.txt'))";
        assert_eq!(scan_install_requires(setup), SetupRequires::Dynamic);
        let setup = "setup(install_requires=[dep for dep in deps])";
        assert_eq!(scan_install_requires(setup), SetupRequires::Dynamic);
    }
}
