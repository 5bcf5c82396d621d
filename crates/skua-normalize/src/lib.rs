//! Normalized Python package and extra names.

pub use extra_name::ExtraName;
pub use package_name::PackageName;

mod extra_name;
mod package_name;

/// Validate and normalize a name, lowercasing it and collapsing any run of
/// `-`, `_` and `.` down to a single `-`.
///
/// See: <https://packaging.python.org/en/latest/specifications/name-normalization/>
fn validate_and_normalize(name: &str) -> Result<String, InvalidNameError> {
    let mut normalized = String::with_capacity(name.len());
    let mut last = None;
    for char in name.bytes() {
        match char {
            b'A'..=b'Z' => {
                normalized.push(char.to_ascii_lowercase() as char);
            }
            b'a'..=b'z' | b'0'..=b'9' => {
                normalized.push(char as char);
            }
            b'-' | b'_' | b'.' => {
                // Collapse runs of separators, but reject names that start
                // or end with one.
                if last.is_none() {
                    return Err(InvalidNameError(name.to_string()));
                }
                if !matches!(last, Some(b'-' | b'_' | b'.')) {
                    normalized.push('-');
                }
            }
            _ => return Err(InvalidNameError(name.to_string())),
        }
        last = Some(char);
    }
    if normalized.is_empty() || matches!(last, Some(b'-' | b'_' | b'.')) {
        return Err(InvalidNameError(name.to_string()));
    }
    Ok(normalized)
}

/// A name is invalid if it does not consist of ASCII letters, digits and
/// `-`, `_`, `.` separators, beginning and ending with a letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Not a valid package or extra name: \"{0}\". Names must start and end with a letter or \
     digit and may only contain -, _, ., and alphanumeric characters"
)]
pub struct InvalidNameError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize() {
        let inputs = [
            "friendly-bard",
            "Friendly-Bard",
            "FRIENDLY-BARD",
            "friendly.bard",
            "friendly_bard",
            "friendly--bard",
            "FrIeNdLy-._.-bArD",
        ];
        for input in inputs {
            assert_eq!(validate_and_normalize(input).unwrap(), "friendly-bard");
        }
    }

    #[test]
    fn unchanged() {
        let unchanged = ["friendly-bard", "1okay", "okay2"];
        for input in unchanged {
            assert_eq!(validate_and_normalize(input).unwrap(), input);
        }
    }

    #[test]
    fn failures() {
        let failures = [
            " starts-with-space",
            "-starts-with-dash",
            "ends-with-dash-",
            "ends-with-space ",
            "includes!invalid-char",
            "space in middle",
            "",
        ];
        for input in failures {
            assert!(validate_and_normalize(input).is_err());
        }
    }
}
