//! Resolve the transitive dependency closure of a set of Python package
//! requirements against one or more package indexes, for a target
//! interpreter and operating system that need not match the host, without
//! building or installing anything.
//!
//! ```no_run
//! use skua::{parse_requirements, resolve, Environment, IndexUrls, Options, Os};
//!
//! # async fn example() -> Result<(), skua::ResolveError> {
//! let requirements = parse_requirements(["flask==2.1.2"])?;
//! let environment = Environment::new("3.10", Os::Linux)?;
//! let resolution = resolve(
//!     requirements,
//!     &environment,
//!     IndexUrls::default(),
//!     Options::default(),
//! )
//! .await?;
//!
//! for purl in resolution.packages() {
//!     println!("{purl}");
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use skua_cache::Cache;
use skua_client::RegistryClientBuilder;
use skua_distribution::DistributionDatabase;
use skua_resolver::{DefaultResolverProvider, ResolutionOptions, Resolver};

pub use skua_normalize::{ExtraName, PackageName};
pub use skua_pep440::{Version, VersionSpecifier, VersionSpecifiers};
pub use skua_pep508::{MarkerEnvironment, MarkerTree, Requirement, RequirementOrigin};
pub use skua_platform_tags::Os;
pub use skua_pypi_types::{IndexUrl, IndexUrls};
pub use skua_resolver::{
    ConflictSet, Environment, FlatEntry, PdtNode, PinnedPackage, Resolution, ResolveError,
    TreeNode, Warning,
};

/// Configuration of a [`resolve`] call.
#[derive(Debug, Clone)]
pub struct Options {
    /// Prefer source distributions over wheels when both are usable.
    pub prefer_source: bool,
    /// Admit pre-release versions even when no requirement mentions one.
    pub allow_prereleases: bool,
    /// Skip candidates whose metadata can't be obtained and requirements
    /// on packages that don't exist, instead of failing.
    pub ignore_errors: bool,
    /// Allow the static `setup.py` scan for legacy source distributions
    /// without metadata-level requirements. The scan extracts literal
    /// `install_requires` lists only; requirements computed at setup time
    /// remain unavailable, and the script is never executed.
    pub scan_setup_py: bool,
    /// The search-round budget.
    pub max_rounds: usize,
    /// The artifact cache root. Defaults to the per-user cache directory.
    pub cache_dir: Option<PathBuf>,
    /// How many index/metadata fetches may run concurrently.
    pub network_concurrency: usize,
    /// The transient-error retry budget per network request.
    pub retries: u32,
    /// The deadline of a single network operation.
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            prefer_source: false,
            allow_prereleases: false,
            ignore_errors: false,
            scan_setup_py: false,
            max_rounds: 200_000,
            cache_dir: None,
            network_concurrency: 10,
            retries: 3,
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Parse requirement strings, failing on the first malformed one.
pub fn parse_requirements<'a>(
    requirements: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Requirement>, ResolveError> {
    requirements
        .into_iter()
        .map(|requirement| Requirement::from_str(requirement).map_err(ResolveError::from))
        .collect()
}

/// Resolve the given root requirements for the target environment against
/// the configured indexes.
///
/// Returns the pinned assignment with its dependency graph, or a
/// structured error: [`ResolveError::ResolutionImpossible`] carries the
/// conflicting requirements, [`ResolveError::NoVersionsFound`] an unknown
/// package. Warnings (e.g. a yanked version selected through an exact pin)
/// ride along on the [`Resolution`].
pub async fn resolve(
    requirements: Vec<Requirement>,
    environment: &Environment,
    repositories: IndexUrls,
    options: Options,
) -> Result<Resolution, ResolveError> {
    let cache = match &options.cache_dir {
        Some(dir) => Cache::from_path(dir),
        None => Cache::from_user_dir(),
    }
    .map_err(ResolveError::Cache)?;
    debug!("Using artifact cache at {}", cache.root().display());

    let client = RegistryClientBuilder::new()
        .index_urls(repositories)
        .retries(options.retries)
        .timeout(options.timeout)
        .build();
    let database = DistributionDatabase::new(client.clone(), cache, options.scan_setup_py);
    let provider = DefaultResolverProvider::new(
        client,
        database,
        environment.clone(),
        options.prefer_source,
        options.network_concurrency,
    );

    let resolver_options = ResolutionOptions {
        prefer_source: options.prefer_source,
        allow_prereleases: options.allow_prereleases,
        ignore_errors: options.ignore_errors,
        max_rounds: options.max_rounds,
    };
    Resolver::new(&provider, environment, resolver_options)
        .resolve(requirements)
        .await
}

#[cfg(test)]
mod tests {
    use super::parse_requirements;

    #[test]
    fn parse_requirements_reports_the_offender() {
        assert!(parse_requirements(["flask==2.1.2", "click>=8.0"]).is_ok());
        assert!(parse_requirements(["flask", "=bogus="]).is_err());
    }
}
