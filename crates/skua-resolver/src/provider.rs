use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, instrument, warn};

use skua_client::RegistryClient;
use skua_distribution::DistributionDatabase;
use skua_normalize::{ExtraName, PackageName};
use skua_once_map::OnceMap;
use skua_pep440::{Version, VersionSpecifiers};
use skua_pep508::{Requirement, RequirementOrigin};

use crate::environment::Environment;
use crate::version_map::VersionMap;
use crate::ResolveError;

/// One selectable version of a package, with its yank state.
#[derive(Debug, Clone)]
pub struct CandidateVersion {
    /// The version.
    pub version: Version,
    /// Whether the version is only available through yanked files.
    pub yanked: bool,
    /// The yank reason, when the index supplied one.
    pub yank_reason: Option<String>,
}

/// The direct requirements of a pinned `{name, version}`, as the resolver
/// consumes them: marker-filtered, extras-expanded, origins attached.
#[derive(Debug, Clone)]
pub struct PackageRequirements {
    /// The interpreter constraint of the version.
    pub requires_python: Option<VersionSpecifiers>,
    /// The applicable direct requirements.
    pub requirements: Vec<Requirement>,
}

/// The metadata source the resolver core pulls from.
///
/// The resolver sees synchronous-looking barriers: both methods return
/// complete answers, and any speculative prefetching stays invisible to the
/// search. Results are memoized per run, so repeated calls are cheap and
/// deterministic.
pub trait ResolverProvider {
    /// The usable versions of a package, in descending order. A package
    /// with no usable version under the environment is
    /// [`ResolveError::NoVersionsFound`].
    async fn versions(
        &self,
        package_name: &PackageName,
    ) -> Result<Arc<Vec<CandidateVersion>>, ResolveError>;

    /// The `requires_python` constraint and direct requirements of a
    /// version, expanded for the given active extras.
    async fn requirements_of(
        &self,
        package_name: &PackageName,
        version: &Version,
        extras: &BTreeSet<ExtraName>,
    ) -> Result<Arc<PackageRequirements>, ResolveError>;

    /// Warm the per-name version caches for the given packages, fetching
    /// concurrently. Failures are ignored here; they resurface on the
    /// blocking [`ResolverProvider::versions`] call.
    async fn prefetch(&self, package_names: &[PackageName]);
}

/// Filter and expand raw `Requires-Dist` entries per the environment and
/// active extras, attaching the parent as origin:
/// - requirements whose marker is false with no active extra are kept only
///   if one of the requested extras activates them;
/// - origins point at the parent `{name, version}`.
pub fn filter_requirements<'a>(
    requires_dist: impl Iterator<Item = &'a Requirement>,
    env: &Environment,
    extras: &BTreeSet<ExtraName>,
    parent: (&PackageName, &Version),
) -> Vec<Requirement> {
    let markers = env.marker_environment();
    let origin = RequirementOrigin::Package(parent.0.clone(), parent.1.clone());
    let mut requirements = Vec::new();
    for requirement in requires_dist {
        let applies = requirement.evaluate_markers(&markers, None)
            || extras
                .iter()
                .any(|extra| requirement.evaluate_markers(&markers, Some(extra)));
        if applies {
            requirements.push(requirement.clone().with_origin(origin.clone()));
        }
    }
    requirements
}

/// The production [`ResolverProvider`]: an index client for listings and a
/// distribution database for metadata, memoized with once-maps.
pub struct DefaultResolverProvider {
    client: RegistryClient,
    database: DistributionDatabase,
    env: Environment,
    prefer_source: bool,
    network_concurrency: usize,
    version_maps: OnceMap<PackageName, Arc<VersionMap>>,
    versions: OnceMap<PackageName, Arc<Vec<CandidateVersion>>>,
    requirements: OnceMap<String, Arc<PackageRequirements>>,
}

impl DefaultResolverProvider {
    /// Build a provider over the given client and database.
    pub fn new(
        client: RegistryClient,
        database: DistributionDatabase,
        env: Environment,
        prefer_source: bool,
        network_concurrency: usize,
    ) -> Self {
        Self {
            client,
            database,
            env,
            prefer_source,
            network_concurrency: network_concurrency.max(1),
            version_maps: OnceMap::default(),
            versions: OnceMap::default(),
            requirements: OnceMap::default(),
        }
    }

    /// Fetch (or reuse) the filtered version map of a package.
    #[instrument(skip(self))]
    async fn version_map(&self, package_name: &PackageName) -> Result<Arc<VersionMap>, ResolveError> {
        if !self.version_maps.register(package_name) {
            if let Ok(cached) = self.version_maps.wait(package_name).await {
                return Ok(cached);
            }
        }
        match self.client.simple(package_name).await {
            Ok(metadata) => {
                let map = Arc::new(VersionMap::from_metadata(metadata, &self.env));
                self.version_maps.done(package_name.clone(), map.clone());
                Ok(map)
            }
            Err(err) if err.is_not_found() => {
                self.version_maps.cancel(package_name);
                Err(ResolveError::NoVersionsFound(package_name.clone()))
            }
            Err(err) => {
                self.version_maps.cancel(package_name);
                Err(err.into())
            }
        }
    }

    fn memo_key(
        package_name: &PackageName,
        version: &Version,
        extras: &BTreeSet<ExtraName>,
    ) -> String {
        let extras = extras
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()
            .join(",");
        format!("{package_name}=={version}[{extras}]")
    }

    async fn requirements_uncached(
        &self,
        package_name: &PackageName,
        version: &Version,
        extras: &BTreeSet<ExtraName>,
    ) -> Result<PackageRequirements, ResolveError> {
        let map = self.version_map(package_name).await?;
        let dist = map
            .get(version)
            .and_then(|entry| entry.preferred(self.prefer_source))
            .ok_or_else(|| ResolveError::NoVersionsFound(package_name.clone()))?;

        debug!("Reading metadata of {dist}");
        let metadata = self.database.get_metadata(&dist).await.map_err(|err| {
            ResolveError::MetadataUnavailable {
                dist: dist.to_string(),
                err: Box::new(err),
            }
        })?;

        if metadata.name != *package_name {
            warn!(
                "Metadata name `{}` does not match `{}`; trusting the index",
                metadata.name, package_name
            );
        }

        let requirements = filter_requirements(
            metadata.requires_dist.iter(),
            &self.env,
            extras,
            (package_name, version),
        );
        Ok(PackageRequirements {
            requires_python: metadata.requires_python.clone(),
            requirements,
        })
    }
}

impl ResolverProvider for DefaultResolverProvider {
    async fn versions(
        &self,
        package_name: &PackageName,
    ) -> Result<Arc<Vec<CandidateVersion>>, ResolveError> {
        if let Some(cached) = self.versions.get(package_name) {
            return Ok(cached);
        }
        let map = self.version_map(package_name).await?;
        if map.is_empty() {
            return Err(ResolveError::NoVersionsFound(package_name.clone()));
        }
        let versions: Vec<CandidateVersion> = map
            .iter_rev()
            .map(|(version, entry)| CandidateVersion {
                version: version.clone(),
                yanked: entry.yanked_only(),
                yank_reason: entry.yank_reason().map(String::from),
            })
            .collect();
        let versions = Arc::new(versions);
        if self.versions.register(package_name) {
            self.versions.done(package_name.clone(), versions.clone());
        }
        Ok(versions)
    }

    async fn requirements_of(
        &self,
        package_name: &PackageName,
        version: &Version,
        extras: &BTreeSet<ExtraName>,
    ) -> Result<Arc<PackageRequirements>, ResolveError> {
        let key = Self::memo_key(package_name, version, extras);
        if !self.requirements.register(&key) {
            if let Ok(cached) = self.requirements.wait(&key).await {
                return Ok(cached);
            }
        }

        let result = self.requirements_uncached(package_name, version, extras).await;
        match result {
            Ok(requirements) => {
                let requirements = Arc::new(requirements);
                self.requirements.done(key, requirements.clone());
                Ok(requirements)
            }
            Err(err) => {
                self.requirements.cancel(&key);
                Err(err)
            }
        }
    }

    async fn prefetch(&self, package_names: &[PackageName]) {
        futures::stream::iter(package_names)
            .map(|package_name| async move {
                if let Err(err) = self.version_map(package_name).await {
                    debug!("Prefetch of {package_name} failed: {err}");
                }
            })
            .buffer_unordered(self.network_concurrency)
            .collect::<()>()
            .await;
    }
}
