use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::{ClientBuilder, Response, StatusCode};
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use tracing::{debug, trace};
use url::Url;

use skua_distribution_filename::DistFilename;
use skua_normalize::PackageName;
use skua_once_map::OnceMap;
use skua_pep440::Version;
use skua_pypi_types::{File, IndexUrls, SimpleJson};

use crate::html::parse_project_page;
use crate::Error;

/// A builder for a [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryClientBuilder {
    index_urls: IndexUrls,
    retries: u32,
    timeout: Duration,
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        Self {
            index_urls: IndexUrls::default(),
            retries: 3,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl RegistryClientBuilder {
    /// A builder with the default PyPI index.
    pub fn new() -> Self {
        Self::default()
    }

    /// The indexes to query, in priority order.
    #[must_use]
    pub fn index_urls(mut self, index_urls: IndexUrls) -> Self {
        self.index_urls = index_urls;
        self
    }

    /// The transient-error retry budget per request.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// The deadline for a single network operation.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client.
    pub fn build(self) -> RegistryClient {
        let client_raw = {
            let client_core = ClientBuilder::new()
                .user_agent("skua")
                .pool_max_idle_per_host(20)
                .timeout(self.timeout);
            client_core.build().expect("Failed to build HTTP client")
        };

        // Retries with exponential backoff cover 429 throttling and other
        // transient transport failures; everything else surfaces at once.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(self.retries);
        let retry_strategy = RetryTransientMiddleware::new_with_policy(retry_policy);
        let client = reqwest_middleware::ClientBuilder::new(client_raw)
            .with(retry_strategy)
            .build();

        RegistryClient {
            index_urls: self.index_urls,
            client,
            memo: Arc::new(OnceMap::default()),
        }
    }
}

/// A client for fetching package listings and artifacts from PyPI-compatible
/// indexes.
///
/// Project listings are memoized in-memory for the life of the client, so a
/// package name is queried at most once per run.
#[derive(Clone)]
pub struct RegistryClient {
    index_urls: IndexUrls,
    client: ClientWithMiddleware,
    memo: Arc<OnceMap<PackageName, SimpleMetadata>>,
}

impl RegistryClient {
    /// Fetch the distributions of a package across all configured indexes.
    ///
    /// Both PEP 691 JSON and PEP 503 HTML index responses are accepted. The
    /// result is the union over the indexes, with the first index winning
    /// on duplicate filenames. A package missing from every index is
    /// [`Error::PackageNotFound`].
    pub async fn simple(&self, package_name: &PackageName) -> Result<SimpleMetadata, Error> {
        if self.index_urls.is_empty() {
            return Err(Error::NoIndex(package_name.to_string()));
        }

        let registered = self.memo.register(package_name);
        if !registered {
            if let Ok(cached) = self.memo.wait(package_name).await {
                return Ok(cached);
            }
            // The in-flight fetch failed; retry uncached on this task.
            return self.simple_uncached(package_name).await;
        }

        match self.simple_uncached(package_name).await {
            Ok(metadata) => {
                self.memo.done(package_name.clone(), metadata.clone());
                Ok(metadata)
            }
            Err(err) => {
                self.memo.cancel(package_name);
                Err(err)
            }
        }
    }

    async fn simple_uncached(&self, package_name: &PackageName) -> Result<SimpleMetadata, Error> {
        let mut merged = SimpleMetadata::default();
        let mut found = false;

        for index in &self.index_urls {
            let url = index.project_url(package_name.as_ref());
            trace!("Fetching metadata for {package_name} from {url}");

            let response = self
                .client
                .get(url.clone())
                .header(
                    "Accept",
                    "application/vnd.pypi.simple.v1+json, text/html;q=0.2",
                )
                .send()
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                continue;
            }
            let response = response.error_for_status().map_err(Error::RequestError)?;

            let files = Self::parse_index_response(&url, response).await?;
            found = true;
            merged.merge(package_name, files, &url);
        }

        if found {
            Ok(merged)
        } else {
            Err(Error::PackageNotFound(package_name.to_string()))
        }
    }

    /// Decode a project page as PEP 691 JSON or PEP 503 HTML, depending on
    /// what the index chose to serve.
    async fn parse_index_response(url: &Url, response: Response) -> Result<Vec<File>, Error> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        if content_type.contains("json") {
            let bytes = response.bytes().await?;
            let data: SimpleJson = serde_json::from_slice(&bytes).map_err(|source| {
                Error::BadJson {
                    source,
                    url: url.clone(),
                }
            })?;
            Ok(data.files)
        } else if content_type.contains("html") {
            let text = response.text().await?;
            Ok(parse_project_page(&text))
        } else {
            Err(Error::UnsupportedContentType {
                content_type,
                url: url.clone(),
            })
        }
    }

    /// Stream a file from an external URL, for downloading artifacts.
    pub async fn stream_external(
        &self,
        url: &Url,
    ) -> Result<Box<dyn futures::AsyncRead + Unpin + Send + Sync>, Error> {
        debug!("Downloading {url}");
        Ok(Box::new(
            self.client
                .get(url.clone())
                .send()
                .await?
                .error_for_status()
                .map_err(Error::RequestError)?
                .bytes_stream()
                .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
                .into_async_read(),
        ))
    }
}

impl Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("index_urls", &self.index_urls)
            .finish_non_exhaustive()
    }
}

/// The wheels and source distributions of a single package version.
#[derive(Default, Debug, Clone)]
pub struct VersionFiles {
    /// The version's wheels.
    pub wheels: Vec<(skua_distribution_filename::WheelFilename, File)>,
    /// The version's source distributions. At most one is used.
    pub source_dists: Vec<(skua_distribution_filename::SourceDistFilename, File)>,
}

impl VersionFiles {
    fn push(&mut self, filename: DistFilename, file: File) {
        match filename {
            DistFilename::WheelFilename(inner) => self.wheels.push((inner, file)),
            DistFilename::SourceDistFilename(inner) => self.source_dists.push((inner, file)),
        }
    }

    /// All files of the version, wheels first.
    pub fn all(&self) -> impl Iterator<Item = (DistFilename, &File)> {
        self.wheels
            .iter()
            .map(|(filename, file)| (DistFilename::WheelFilename(filename.clone()), file))
            .chain(
                self.source_dists
                    .iter()
                    .map(|(filename, file)| (DistFilename::SourceDistFilename(filename.clone()), file)),
            )
    }
}

/// The distributions of a package, grouped by version in ascending order.
#[derive(Default, Debug, Clone)]
pub struct SimpleMetadata(BTreeMap<Version, VersionFiles>);

impl SimpleMetadata {
    /// Iterate versions and their files in ascending version order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&Version, &VersionFiles)> {
        self.0.iter()
    }

    /// Whether no usable file was found at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge the files of one index response, skipping filenames an earlier
    /// index already provided and resolving relative download URLs against
    /// the project page URL.
    fn merge(&mut self, package_name: &PackageName, files: Vec<File>, base: &Url) {
        for mut file in files {
            // Files with unparseable names (eggs, exotic archives) are
            // ignored; they can never become candidates.
            let Some(filename) = DistFilename::try_from_filename(&file.filename, package_name)
            else {
                trace!("Skipping file with unrecognized name: {}", file.filename);
                continue;
            };

            if self.contains_filename(&file.filename) {
                continue;
            }

            if let Ok(absolute) = base.join(&file.url) {
                file.url = absolute.to_string();
            }

            let version = filename.version().clone();
            self.0.entry(version).or_default().push(filename, file);
        }
    }

    fn contains_filename(&self, filename: &str) -> bool {
        self.0.values().any(|files| {
            files
                .all()
                .any(|(_, file)| file.filename == filename)
        })
    }
}

impl IntoIterator for SimpleMetadata {
    type Item = (Version, VersionFiles);
    type IntoIter = std::collections::btree_map::IntoIter<Version, VersionFiles>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
