use std::str::FromStr;

use mailparse::{MailHeaderMap, MailParseError};

use skua_normalize::{ExtraName, InvalidNameError, PackageName};
use skua_pep440::{Version, VersionParseError, VersionSpecifiers};
use skua_pep508::{Pep508Error, Requirement};

use crate::lenient::{LenientRequirement, LenientVersionSpecifiers};

/// The subset of core metadata the resolver consumes, parsed from a wheel's
/// `METADATA` or an sdist's `PKG-INFO` file.
///
/// <https://packaging.python.org/specifications/core-metadata/>
#[derive(Debug, Clone)]
pub struct CoreMetadata {
    /// `Metadata-Version`, e.g. `2.1`.
    pub metadata_version: String,
    /// `Name`, normalized.
    pub name: PackageName,
    /// `Version`.
    pub version: Version,
    /// `Requires-Dist`, the direct requirements.
    pub requires_dist: Vec<Requirement>,
    /// `Requires-Python`, the interpreter constraint.
    pub requires_python: Option<VersionSpecifiers>,
    /// `Provides-Extra`, the declared optional dependency groups.
    pub provides_extras: Vec<ExtraName>,
}

/// An error parsing core metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The RFC 822 framing is broken.
    #[error(transparent)]
    MailParse(#[from] MailParseError),
    /// A mandatory field is absent.
    #[error("metadata field {0} not found")]
    FieldNotFound(&'static str),
    /// The `Version` field doesn't parse.
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] VersionParseError),
    /// A `Requires-Dist` entry doesn't parse, even leniently.
    #[error(transparent)]
    InvalidRequirement(#[from] Pep508Error),
    /// A name field doesn't normalize.
    #[error(transparent)]
    InvalidName(#[from] InvalidNameError),
}

impl CoreMetadata {
    /// Parse distribution metadata from its RFC 822 serialization.
    pub fn parse(content: &[u8]) -> Result<Self, MetadataError> {
        // Trick mailparse into reading UTF-8 instead of ASCII; description
        // bodies routinely contain non-ASCII text.
        let mut mail = b"Content-Type: text/plain; charset=utf-8\n".to_vec();
        mail.extend_from_slice(content);

        let msg = mailparse::parse_mail(&mail)?;
        let headers = msg.get_headers();
        let get_all_values = |name: &str| -> Vec<String> {
            headers
                .get_all_values(name)
                .into_iter()
                .filter(|value| value != "UNKNOWN")
                .collect()
        };

        let metadata_version = headers
            .get_first_value("Metadata-Version")
            .ok_or(MetadataError::FieldNotFound("Metadata-Version"))?;
        let name = PackageName::new(
            &headers
                .get_first_value("Name")
                .ok_or(MetadataError::FieldNotFound("Name"))?,
        )?;
        let version = Version::from_str(
            &headers
                .get_first_value("Version")
                .ok_or(MetadataError::FieldNotFound("Version"))?,
        )?;
        let requires_dist = get_all_values("Requires-Dist")
            .iter()
            .map(|requires_dist| {
                LenientRequirement::from_str(requires_dist).map(Requirement::from)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let requires_python = headers
            .get_first_value("Requires-Python")
            .filter(|value| value != "UNKNOWN")
            .map(|requires_python| {
                LenientVersionSpecifiers::from_str_lenient(&requires_python)
                    .map(VersionSpecifiers::from)
            })
            .transpose()?;
        let provides_extras = get_all_values("Provides-Extra")
            .iter()
            .filter_map(|extra| ExtraName::new(extra).ok())
            .collect();

        Ok(Self {
            metadata_version,
            name,
            version,
            requires_dist,
            requires_python,
            provides_extras,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_metadata() {
        let content = br#"Metadata-Version: 2.1
Name: Flask
Version: 2.1.2
Summary: A simple framework for building complex web applications.
Requires-Python: >=3.7
Requires-Dist: Werkzeug (>=2.0)
Requires-Dist: Jinja2 (>=3.0)
Requires-Dist: itsdangerous (>=2.0)
Requires-Dist: click (>=8.0)
Requires-Dist: asgiref (>=3.2) ; extra == 'async'
Provides-Extra: async
Provides-Extra: dotenv

Flask is a lightweight WSGI web application framework."#;
        let metadata = CoreMetadata::parse(content).unwrap();
        assert_eq!(metadata.name.as_ref(), "flask");
        assert_eq!(metadata.version.to_string(), "2.1.2");
        assert_eq!(metadata.requires_dist.len(), 5);
        assert_eq!(metadata.provides_extras.len(), 2);
        assert!(metadata.requires_python.is_some());
    }

    #[test]
    fn missing_name() {
        let content = b"Metadata-Version: 2.1\nVersion: 1.0\n";
        assert!(matches!(
            CoreMetadata::parse(content),
            Err(MetadataError::FieldNotFound("Name"))
        ));
    }

    #[test]
    fn lenient_requires_dist() {
        let content = b"Metadata-Version: 2.1\nName: a\nVersion: 1.0\nRequires-Dist: b (>=1.0,)\n";
        let metadata = CoreMetadata::parse(content).unwrap();
        assert_eq!(metadata.requires_dist.len(), 1);
    }
}
