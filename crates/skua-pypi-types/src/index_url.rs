use std::fmt::{Display, Formatter};
use std::str::FromStr;

use url::Url;

/// The URL of a package index, e.g. `https://pypi.org/simple`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexUrl(Url);

impl IndexUrl {
    /// The public PyPI simple index.
    pub fn pypi() -> Self {
        Self(Url::parse("https://pypi.org/simple").unwrap())
    }

    /// The URL of the project page for the given (normalized) package name.
    pub fn project_url(&self, name: &str) -> Url {
        let mut url = self.0.clone();
        // Indexes are sensitive to the trailing slash; normalize to
        // `{index}/{name}/`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(name).push("");
        }
        url
    }
}

impl From<Url> for IndexUrl {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

impl From<IndexUrl> for Url {
    fn from(index: IndexUrl) -> Self {
        index.0
    }
}

impl AsRef<Url> for IndexUrl {
    fn as_ref(&self) -> &Url {
        &self.0
    }
}

impl FromStr for IndexUrl {
    type Err = url::ParseError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        Ok(Self(Url::parse(url.trim_end_matches('/'))?))
    }
}

impl Display for IndexUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The configured index URLs, in declared priority order.
#[derive(Debug, Clone)]
pub struct IndexUrls(Vec<IndexUrl>);

impl IndexUrls {
    /// Indexes in the given priority order, deduplicated.
    pub fn from_indexes(indexes: Vec<IndexUrl>) -> Self {
        let mut seen = Vec::new();
        for index in indexes {
            if !seen.contains(&index) {
                seen.push(index);
            }
        }
        Self(seen)
    }

    /// Whether no index is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for IndexUrls {
    /// Just PyPI.
    fn default() -> Self {
        Self(vec![IndexUrl::pypi()])
    }
}

impl<'a> IntoIterator for &'a IndexUrls {
    type Item = &'a IndexUrl;
    type IntoIter = std::slice::Iter<'a, IndexUrl>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_url() {
        let index = IndexUrl::from_str("https://pypi.org/simple/").unwrap();
        assert_eq!(
            index.project_url("flask").as_str(),
            "https://pypi.org/simple/flask/"
        );
    }

    #[test]
    fn dedupe() {
        let indexes = IndexUrls::from_indexes(vec![
            IndexUrl::from_str("https://pypi.org/simple").unwrap(),
            IndexUrl::from_str("https://pypi.org/simple/").unwrap(),
            IndexUrl::from_str("https://example.org/simple").unwrap(),
        ]);
        assert_eq!(indexes.into_iter().count(), 2);
    }
}
