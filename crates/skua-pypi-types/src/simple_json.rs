use serde::{de, Deserialize, Deserializer};

use skua_pep440::VersionSpecifiers;

use crate::lenient::LenientVersionSpecifiers;

/// The project-detail payload of the simple API.
///
/// <https://peps.python.org/pep-0691/#project-detail>
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleJson {
    /// All files of all versions of the package.
    pub files: Vec<File>,
}

/// A single (remote) file belonging to a package, either a wheel or a
/// source distribution.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct File {
    /// The artifact filename, e.g. `flask-2.1.2-py3-none-any.whl`.
    pub filename: String,
    /// Digests of the file, keyed by algorithm.
    #[serde(default)]
    pub hashes: Hashes,
    /// The file-level interpreter constraint. Deserialized leniently since
    /// a number of published files carry malformed values.
    #[serde(default, deserialize_with = "deserialize_specifiers_lenient")]
    pub requires_python: Option<VersionSpecifiers>,
    /// The file size in bytes, when the index reports it.
    #[serde(default)]
    pub size: Option<u64>,
    /// The download URL, possibly relative to the index page.
    pub url: String,
    /// Whether (and why) the file was yanked.
    #[serde(default)]
    pub yanked: Option<Yanked>,
}

fn deserialize_specifiers_lenient<'de, D>(
    deserializer: D,
) -> Result<Option<VersionSpecifiers>, D::Error>
where
    D: Deserializer<'de>,
{
    let maybe_string: Option<String> = Option::deserialize(deserializer)?;
    let Some(string) = maybe_string else {
        return Ok(None);
    };
    let lenient = LenientVersionSpecifiers::from_str_lenient(&string).map_err(de::Error::custom)?;
    Ok(Some(lenient.into()))
}

/// PEP 592 yank marker: a plain boolean or a reason string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Yanked {
    /// `"yanked": true`
    Bool(bool),
    /// `"yanked": "reason"`
    Reason(String),
}

impl Yanked {
    /// Whether the file is yanked.
    pub fn is_yanked(&self) -> bool {
        match self {
            Yanked::Bool(is_yanked) => *is_yanked,
            Yanked::Reason(_) => true,
        }
    }

    /// The yank reason, if one was given.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Yanked::Bool(_) => None,
            Yanked::Reason(reason) => Some(reason),
        }
    }
}

/// A mapping from hash algorithm to hex digest. Only SHA-256 is consumed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hashes {
    /// The SHA-256 digest, when the index provides one.
    #[serde(default)]
    pub sha256: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_project_detail() {
        let payload = r#"{
            "files": [
                {
                    "filename": "flask-2.1.2-py3-none-any.whl",
                    "hashes": {"sha256": "fad5b446feb0d6db6aec0c3184d16a8c1f6c3e464b511649c8918a9be100b4fe"},
                    "requires-python": ">=3.7",
                    "size": 95235,
                    "url": "https://files.pythonhosted.org/packages/.../flask-2.1.2-py3-none-any.whl",
                    "yanked": false
                },
                {
                    "filename": "flask-2.1.2.tar.gz",
                    "hashes": {},
                    "requires-python": ">=3.7",
                    "url": "flask-2.1.2.tar.gz",
                    "yanked": "broken sdist"
                }
            ]
        }"#;
        let parsed: SimpleJson = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.files.len(), 2);
        assert!(parsed.files[0].hashes.sha256.is_some());
        assert!(!parsed.files[0].yanked.as_ref().unwrap().is_yanked());
        assert!(parsed.files[1].yanked.as_ref().unwrap().is_yanked());
        assert_eq!(
            parsed.files[1].yanked.as_ref().unwrap().reason(),
            Some("broken sdist")
        );
    }

    #[test]
    fn lenient_requires_python() {
        let payload = r#"{
            "files": [
                {
                    "filename": "a-1.0.tar.gz",
                    "requires-python": ">=3.6,",
                    "url": "a-1.0.tar.gz"
                }
            ]
        }"#;
        let parsed: SimpleJson = serde_json::from_str(payload).unwrap();
        assert!(parsed.files[0].requires_python.is_some());
    }
}
