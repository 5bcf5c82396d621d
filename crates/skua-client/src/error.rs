use url::Url;

/// An error talking to a package index.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The package was not found in any configured index.
    #[error("Package `{0}` was not found in the registry")]
    PackageNotFound(String),

    /// No index is configured at all.
    #[error("No package index is configured, can't query `{0}`")]
    NoIndex(String),

    /// Transport-level failure after the retry budget was exhausted.
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    /// Failure inside the retry middleware.
    #[error(transparent)]
    RequestMiddlewareError(#[from] reqwest_middleware::Error),

    /// The index served JSON the client can't understand.
    #[error("Received unsupported JSON from {url}")]
    BadJson {
        /// The underlying deserialization failure.
        source: serde_json::Error,
        /// The URL that served the payload.
        url: Url,
    },

    /// The index served a content type the client doesn't speak.
    #[error("Received unsupported content type `{content_type}` from {url}")]
    UnsupportedContentType {
        /// The `Content-Type` header value.
        content_type: String,
        /// The URL that served the payload.
        url: Url,
    },

    /// A URL in an index page doesn't parse.
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Whether the error means "this index doesn't have the package" as
    /// opposed to "this index is broken".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::PackageNotFound(_) => true,
            Self::RequestError(err) => {
                err.status() == Some(reqwest::StatusCode::NOT_FOUND)
            }
            Self::RequestMiddlewareError(reqwest_middleware::Error::Reqwest(err)) => {
                err.status() == Some(reqwest::StatusCode::NOT_FOUND)
            }
            _ => false,
        }
    }
}
