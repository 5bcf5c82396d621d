use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fs_err as fs;
use tokio::io::AsyncWriteExt;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, instrument, trace};

use skua_cache::Cache;
use skua_client::RegistryClient;
use skua_distribution_filename::SourceDistExtension;
use skua_pypi_types::{CoreMetadata, MetadataError};

use crate::keyed_lock::KeyedLock;
use crate::setup_scan::{scan_install_requires, SetupRequires};
use crate::{Dist, RegistrySdist, RegistryWheel};

/// An error fetching or reading a distribution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The download failed (after retries).
    #[error(transparent)]
    Client(#[from] skua_client::Error),
    /// Filesystem trouble around the cache.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The artifact URL recorded by the index doesn't parse.
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),
    /// The wheel archive is corrupt.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// The metadata file doesn't parse.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// A wheel without the mandatory `.dist-info/METADATA` member.
    #[error("No .dist-info/METADATA found in {0}")]
    MissingDistInfo(String),
    /// An sdist without a `PKG-INFO` member.
    #[error("No PKG-INFO found in {0}")]
    MissingPkgInfo(String),
    /// An sdist in a format the metadata reader doesn't open.
    #[error("Unsupported archive type for metadata extraction: {0}")]
    UnsupportedArchive(String),
    /// The sdist declares its requirements in `setup.py` and the static
    /// scan is disabled.
    #[error(
        "The requirements of {0} are declared in its setup script; enable the setup scan to \
         extract literal declarations"
    )]
    SetupScanDisabled(String),
    /// The sdist computes its requirements at setup time; static
    /// extraction cannot recover them, and nothing here runs the script.
    #[error("The requirements of {0} are computed at runtime by its setup script")]
    DynamicSetupRequires(String),
    /// A background read task died.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Fetches distributions through the artifact cache and reads their
/// metadata.
///
/// Only the metadata member of an archive is ever read; payloads are
/// neither extracted nor executed. Concurrent fetches of the same artifact
/// are serialized in-process with an async lock and across processes with a
/// file lock next to the cache entry.
#[derive(Debug)]
pub struct DistributionDatabase {
    client: RegistryClient,
    cache: Cache,
    locks: KeyedLock,
    setup_scan: bool,
}

impl DistributionDatabase {
    /// A database over the given client and cache. `setup_scan` opts into
    /// the static `setup.py` requirement extraction for legacy sdists.
    pub fn new(client: RegistryClient, cache: Cache, setup_scan: bool) -> Self {
        Self {
            client,
            cache,
            locks: KeyedLock::default(),
            setup_scan,
        }
    }

    /// Read the metadata of the given distribution, fetching it into the
    /// cache first if needed.
    pub async fn get_metadata(&self, dist: &Dist) -> Result<CoreMetadata, Error> {
        let path = self.fetch(dist).await?;
        match dist {
            Dist::Wheel(wheel) => self.wheel_metadata(wheel, path).await,
            Dist::Sdist(sdist) => self.sdist_metadata(sdist, path).await,
        }
    }

    /// Download an artifact into the cache, returning the local path.
    /// Present entries are returned as-is; they are immutable.
    #[instrument(skip_all, fields(dist = %dist))]
    pub async fn fetch(&self, dist: &Dist) -> Result<PathBuf, Error> {
        let entry = self.cache.archive_entry(
            dist.name().as_ref(),
            &dist.version().to_string(),
            dist.filename(),
        );
        if entry.exists() {
            trace!("Cache hit: {}", entry.path().display());
            return Ok(entry.path());
        }

        // Serialize fetches of this artifact within the process, then
        // across processes via the file lock. Both are scoped to the
        // artifact path.
        let _slot = self.locks.hold(dist.resource_id()).await;

        let file_lock = {
            let cache = self.cache.clone();
            let entry = entry.clone();
            tokio::task::spawn_blocking(move || cache.lock_entry(&entry)).await??
        };

        // Another process may have completed the download while we waited.
        if entry.exists() {
            trace!("Cache hit after lock: {}", entry.path().display());
            drop(file_lock);
            return Ok(entry.path());
        }

        debug!("Downloading {dist} to cache");
        let url = dist.url()?;
        let staging = self.cache.staging_file(&entry)?;
        let mut writer = tokio::io::BufWriter::new(tokio::fs::File::from_std(staging.reopen()?));
        let mut reader = self.client.stream_external(&url).await?.compat();
        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;

        // Publish atomically; readers see nothing or everything.
        staging
            .persist(entry.path())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        drop(file_lock);

        Ok(entry.path())
    }

    /// Read `*.dist-info/METADATA` straight out of the wheel zip.
    async fn wheel_metadata(
        &self,
        wheel: &RegistryWheel,
        path: PathBuf,
    ) -> Result<CoreMetadata, Error> {
        let filename = wheel.file.filename.clone();
        let dist_info_prefix = format!(
            "{}-{}.dist-info",
            wheel.filename.name.as_ref().replace('-', "_"),
            wheel.filename.version
        );
        tokio::task::spawn_blocking(move || {
            let contents = read_dist_info(&path, &dist_info_prefix, &filename)?;
            Ok(CoreMetadata::parse(&contents)?)
        })
        .await?
    }

    /// Read `PKG-INFO` (and, for legacy sdists, a literal
    /// `install_requires`) out of the source archive.
    async fn sdist_metadata(
        &self,
        sdist: &RegistrySdist,
        path: PathBuf,
    ) -> Result<CoreMetadata, Error> {
        let filename = sdist.file.filename.clone();
        let extension = sdist.filename.extension;
        let setup_scan = self.setup_scan;
        tokio::task::spawn_blocking(move || {
            let archive = SdistArchive::open(&path, extension, &filename)?;
            let pkg_info = archive
                .read_member("PKG-INFO")?
                .ok_or_else(|| Error::MissingPkgInfo(filename.clone()))?;
            let mut metadata = CoreMetadata::parse(&pkg_info)?;

            // Modern sdists carry Requires-Dist statically. For the rest,
            // the only recoverable source is a literal install_requires;
            // requirements computed at setup time stay unavailable, since
            // nothing here runs the script.
            if metadata.requires_dist.is_empty() {
                if let Some(setup_py) = archive.read_member("setup.py")? {
                    match scan_install_requires(&String::from_utf8_lossy(&setup_py)) {
                        SetupRequires::Absent => {}
                        SetupRequires::Literal(requirements) if requirements.is_empty() => {}
                        SetupRequires::Literal(requirements) if setup_scan => {
                            metadata.requires_dist = requirements
                                .iter()
                                .filter_map(|requirement| {
                                    skua_pypi_types::LenientRequirement::from_str(requirement)
                                        .ok()
                                        .map(Into::into)
                                })
                                .collect();
                        }
                        SetupRequires::Literal(_) => {
                            return Err(Error::SetupScanDisabled(filename));
                        }
                        SetupRequires::Dynamic => {
                            return Err(Error::DynamicSetupRequires(filename));
                        }
                    }
                }
            }
            Ok(metadata)
        })
        .await?
    }
}

/// Locate and read `{dist_info_prefix}/METADATA` in a wheel, tolerating
/// wheels whose dist-info directory uses a different name spelling.
fn read_dist_info(path: &Path, dist_info_prefix: &str, filename: &str) -> Result<Vec<u8>, Error> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    // Prefer the canonical name, then fall back to any top-level
    // `*.dist-info/METADATA`.
    let names: Vec<String> = archive.file_names().map(String::from).collect();
    let member = names
        .iter()
        .find(|name| *name == &format!("{dist_info_prefix}/METADATA"))
        .or_else(|| {
            names.iter().find(|name| {
                name.ends_with(".dist-info/METADATA") && name.matches('/').count() == 1
            })
        })
        .ok_or_else(|| Error::MissingDistInfo(filename.to_string()))?
        .clone();

    let mut contents = Vec::new();
    archive.by_name(&member)?.read_to_end(&mut contents)?;
    Ok(contents)
}

/// A source archive opened for metadata reading.
enum SdistArchive {
    TarGz(PathBuf),
    Zip(PathBuf),
}

impl SdistArchive {
    fn open(
        path: &Path,
        extension: SourceDistExtension,
        filename: &str,
    ) -> Result<Self, Error> {
        match extension {
            SourceDistExtension::TarGz => Ok(Self::TarGz(path.to_path_buf())),
            SourceDistExtension::Zip => Ok(Self::Zip(path.to_path_buf())),
            SourceDistExtension::TarXz => {
                Err(Error::UnsupportedArchive(filename.to_string()))
            }
        }
    }

    /// Read the archive member at `{root}/{member}`, where `{root}` is the
    /// single top-level directory of the sdist.
    fn read_member(&self, member: &str) -> Result<Option<Vec<u8>>, Error> {
        match self {
            Self::TarGz(path) => {
                let file = fs::File::open(path)?;
                let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
                for entry in archive.entries()? {
                    let mut entry = entry?;
                    let entry_path = entry.path()?;
                    if is_root_member(&entry_path, member) {
                        let mut contents = Vec::new();
                        entry.read_to_end(&mut contents)?;
                        return Ok(Some(contents));
                    }
                }
                Ok(None)
            }
            Self::Zip(path) => {
                let file = fs::File::open(path)?;
                let mut archive = zip::ZipArchive::new(file)?;
                let names: Vec<String> = archive.file_names().map(String::from).collect();
                let Some(name) = names
                    .into_iter()
                    .find(|name| is_root_member(Path::new(name), member))
                else {
                    return Ok(None);
                };
                let mut contents = Vec::new();
                archive.by_name(&name)?.read_to_end(&mut contents)?;
                Ok(Some(contents))
            }
        }
    }
}

/// Whether `path` is `{root}/{member}` for a single top-level directory.
fn is_root_member(path: &Path, member: &str) -> bool {
    let mut components = path.components();
    let Some(_root) = components.next() else {
        return false;
    };
    components.as_path() == Path::new(member)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{is_root_member, read_dist_info};
    use std::path::Path;

    fn write_test_wheel(path: &Path, dist_info: &str, metadata: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        writer
            .start_file(format!("{dist_info}/METADATA"), options)
            .unwrap();
        writer.write_all(metadata).unwrap();
        writer.start_file("flask/__init__.py", options).unwrap();
        writer.write_all(b"# payload, never read").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn reads_metadata_without_extracting() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = dir.path().join("flask-2.1.2-py3-none-any.whl");
        write_test_wheel(
            &wheel,
            "flask-2.1.2.dist-info",
            b"Metadata-Version: 2.1\nName: flask\nVersion: 2.1.2\n",
        );
        let contents =
            read_dist_info(&wheel, "flask-2.1.2.dist-info", "flask-2.1.2-py3-none-any.whl")
                .unwrap();
        assert!(contents.starts_with(b"Metadata-Version"));
        // Nothing was extracted next to the wheel.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn falls_back_to_any_dist_info() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = dir.path().join("flask-2.1.2-py3-none-any.whl");
        write_test_wheel(
            &wheel,
            "Flask-2.1.2.dist-info",
            b"Metadata-Version: 2.1\nName: flask\nVersion: 2.1.2\n",
        );
        assert!(read_dist_info(
            &wheel,
            "flask-2.1.2.dist-info",
            "flask-2.1.2-py3-none-any.whl"
        )
        .is_ok());
    }

    #[test]
    fn root_member_matching() {
        assert!(is_root_member(
            Path::new("flask-2.1.2/PKG-INFO"),
            "PKG-INFO"
        ));
        assert!(!is_root_member(
            Path::new("flask-2.1.2/docs/PKG-INFO"),
            "PKG-INFO"
        ));
        assert!(!is_root_member(Path::new("PKG-INFO"), "PKG-INFO"));
    }
}
