//! End-to-end tests of the search over an in-memory provider, covering
//! selection, backtracking, conflicts, markers, extras and Python
//! compatibility.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use skua_normalize::{ExtraName, PackageName};
use skua_pep440::{Version, VersionSpecifiers};
use skua_pep508::Requirement;
use skua_platform_tags::Os;
use skua_resolver::{
    filter_requirements, CandidateVersion, Environment, PackageRequirements, Resolution,
    ResolutionOptions, ResolveError, Resolver, ResolverProvider, Warning,
};

#[derive(Debug, Clone)]
struct TestVersion {
    version: Version,
    requires_python: Option<VersionSpecifiers>,
    requires_dist: Vec<Requirement>,
    yanked: bool,
}

/// A provider over a fixed in-memory index snapshot.
#[derive(Debug, Default)]
struct TestProvider {
    env: Option<Environment>,
    packages: FxHashMap<PackageName, Vec<TestVersion>>,
}

impl TestProvider {
    fn package(self, name: &str, version: &str, deps: &[&str]) -> Self {
        self.add(name, version, None, deps, false)
    }

    fn package_with_python(
        self,
        name: &str,
        version: &str,
        requires_python: &str,
        deps: &[&str],
    ) -> Self {
        self.add(name, version, Some(requires_python), deps, false)
    }

    fn yanked_package(self, name: &str, version: &str, deps: &[&str]) -> Self {
        self.add(name, version, None, deps, true)
    }

    fn add(
        mut self,
        name: &str,
        version: &str,
        requires_python: Option<&str>,
        deps: &[&str],
        yanked: bool,
    ) -> Self {
        let name = PackageName::from_str(name).unwrap();
        let entry = TestVersion {
            version: Version::from_str(version).unwrap(),
            requires_python: requires_python
                .map(|specifiers| VersionSpecifiers::from_str(specifiers).unwrap()),
            requires_dist: deps
                .iter()
                .map(|dep| Requirement::from_str(dep).unwrap())
                .collect(),
            yanked,
        };
        let versions = self.packages.entry(name).or_default();
        versions.push(entry);
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        self
    }

    fn with_env(mut self, env: &Environment) -> Self {
        self.env = Some(env.clone());
        self
    }

    fn env(&self) -> &Environment {
        self.env.as_ref().expect("provider needs an environment")
    }
}

impl ResolverProvider for TestProvider {
    async fn versions(
        &self,
        package_name: &PackageName,
    ) -> Result<Arc<Vec<CandidateVersion>>, ResolveError> {
        let versions = self
            .packages
            .get(package_name)
            .ok_or_else(|| ResolveError::NoVersionsFound(package_name.clone()))?;
        Ok(Arc::new(
            versions
                .iter()
                .map(|entry| CandidateVersion {
                    version: entry.version.clone(),
                    yanked: entry.yanked,
                    yank_reason: None,
                })
                .collect(),
        ))
    }

    async fn requirements_of(
        &self,
        package_name: &PackageName,
        version: &Version,
        extras: &BTreeSet<ExtraName>,
    ) -> Result<Arc<PackageRequirements>, ResolveError> {
        let entry = self
            .packages
            .get(package_name)
            .and_then(|versions| versions.iter().find(|entry| entry.version == *version))
            .ok_or_else(|| ResolveError::NoVersionsFound(package_name.clone()))?;
        Ok(Arc::new(PackageRequirements {
            requires_python: entry.requires_python.clone(),
            requirements: filter_requirements(
                entry.requires_dist.iter(),
                self.env(),
                extras,
                (package_name, version),
            ),
        }))
    }

    async fn prefetch(&self, _package_names: &[PackageName]) {}
}

fn env_310_linux() -> Environment {
    Environment::new("3.10", Os::Linux).unwrap()
}

fn requirements(input: &[&str]) -> Vec<Requirement> {
    input
        .iter()
        .map(|requirement| Requirement::from_str(requirement).unwrap())
        .collect()
}

async fn resolve(provider: &TestProvider, roots: &[&str]) -> Result<Resolution, ResolveError> {
    let env = provider.env().clone();
    Resolver::new(provider, &env, ResolutionOptions::default())
        .resolve(requirements(roots))
        .await
}

fn pinned(resolution: &Resolution, name: &str) -> String {
    resolution
        .get(&PackageName::from_str(name).unwrap())
        .unwrap_or_else(|| panic!("{name} is not pinned"))
        .version
        .to_string()
}

#[tokio::test]
async fn single_package_without_dependencies() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("crontab", "1.0.4", &[]);
    let resolution = resolve(&provider, &["crontab==1.0.4"]).await.unwrap();
    assert_eq!(resolution.packages(), vec!["pkg:pypi/crontab@1.0.4"]);
    let tree = resolution.tree();
    assert_eq!(tree.len(), 1);
    assert!(tree[0].dependencies.is_empty());
}

#[tokio::test]
async fn transitive_closure_and_tree() {
    // flask -> {click, itsdangerous, jinja2 -> {markupsafe},
    // werkzeug -> {markupsafe}}
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package(
            "flask",
            "2.1.2",
            &[
                "werkzeug>=2.0",
                "jinja2>=3.0",
                "itsdangerous>=2.0",
                "click>=8.0",
            ],
        )
        .package("werkzeug", "3.1.3", &["markupsafe>=2.1.1"])
        .package("jinja2", "3.1.6", &["markupsafe>=2.0"])
        .package("itsdangerous", "2.2.0", &[])
        .package("click", "8.2.1", &[])
        .package("markupsafe", "3.0.2", &[]);

    let resolution = resolve(&provider, &["flask==2.1.2"]).await.unwrap();

    let mut packages = resolution.packages();
    packages.sort();
    assert_eq!(
        packages,
        vec![
            "pkg:pypi/click@8.2.1",
            "pkg:pypi/flask@2.1.2",
            "pkg:pypi/itsdangerous@2.2.0",
            "pkg:pypi/jinja2@3.1.6",
            "pkg:pypi/markupsafe@3.0.2",
            "pkg:pypi/werkzeug@3.1.3",
        ]
    );

    let tree = resolution.tree();
    assert_eq!(tree.len(), 1);
    let flask = &tree[0];
    assert_eq!(flask.package, "pkg:pypi/flask@2.1.2");
    let children: Vec<&str> = flask
        .dependencies
        .iter()
        .map(|node| node.package.as_str())
        .collect();
    assert_eq!(
        children,
        vec![
            "pkg:pypi/click@8.2.1",
            "pkg:pypi/itsdangerous@2.2.0",
            "pkg:pypi/jinja2@3.1.6",
            "pkg:pypi/werkzeug@3.1.3",
        ]
    );
    // markupsafe is duplicated under both of its parents.
    for parent in ["pkg:pypi/jinja2@3.1.6", "pkg:pypi/werkzeug@3.1.3"] {
        let node = flask
            .dependencies
            .iter()
            .find(|node| node.package == parent)
            .unwrap();
        assert_eq!(node.dependencies.len(), 1);
        assert_eq!(node.dependencies[0].package, "pkg:pypi/markupsafe@3.0.2");
    }

    // The flat graph lists parents before children, ties alphabetical.
    let flat = resolution.flat_graph();
    let order: Vec<&str> = flat.iter().map(|entry| entry.package.as_str()).collect();
    let position = |purl: &str| order.iter().position(|p| *p == purl).unwrap();
    assert_eq!(position("pkg:pypi/flask@2.1.2"), 0);
    assert!(position("pkg:pypi/jinja2@3.1.6") < position("pkg:pypi/markupsafe@3.0.2"));
    assert!(position("pkg:pypi/werkzeug@3.1.3") < position("pkg:pypi/markupsafe@3.0.2"));
}

#[tokio::test]
async fn highest_version_wins() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("pkg", "1.0", &[])
        .package("pkg", "1.5", &[])
        .package("pkg", "2.0", &[]);
    let resolution = resolve(&provider, &["pkg>=1.0"]).await.unwrap();
    assert_eq!(pinned(&resolution, "pkg"), "2.0");
}

#[tokio::test]
async fn backtracks_to_satisfiable_version() {
    // foo 1.0 needs bar>=2, which doesn't exist; foo 0.9 works.
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("foo", "1.0", &["bar>=2"])
        .package("foo", "0.9", &["bar>=1"])
        .package("bar", "1.5", &[]);
    let resolution = resolve(&provider, &["foo"]).await.unwrap();
    assert_eq!(pinned(&resolution, "foo"), "0.9");
    assert_eq!(pinned(&resolution, "bar"), "1.5");
}

#[tokio::test]
async fn conflicting_requirements_are_reported() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("a", "1.0", &["c<2"])
        .package("b", "1.0", &["c>=2"])
        .package("c", "1.0", &[])
        .package("c", "2.0", &[]);
    let err = resolve(&provider, &["a", "b"]).await.unwrap_err();
    let ResolveError::ResolutionImpossible(conflict) = err else {
        panic!("expected ResolutionImpossible, got {err:?}");
    };
    assert_eq!(conflict.name.as_ref(), "c");
    let rendered: Vec<String> = conflict
        .requirements
        .iter()
        .map(|requirement| format!("{requirement}"))
        .collect();
    assert!(rendered.contains(&"c<2".to_string()), "{rendered:?}");
    assert!(rendered.contains(&"c>=2".to_string()), "{rendered:?}");
}

#[tokio::test]
async fn markers_drop_inapplicable_requirements() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("pkg", "3.0", &[r#"dep ; python_version < "3.9""#])
        .package("dep", "1.0", &[]);
    let resolution = resolve(&provider, &["pkg"]).await.unwrap();
    assert_eq!(resolution.packages(), vec!["pkg:pypi/pkg@3.0"]);
}

#[tokio::test]
async fn extras_expand_into_the_same_pin() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("x", "1.0", &[r#"y>=1 ; extra == "extra1""#])
        .package("y", "1.0", &[])
        .package("y", "1.2", &[]);
    let resolution = resolve(&provider, &["x[extra1]==1.0"]).await.unwrap();
    assert_eq!(pinned(&resolution, "x"), "1.0");
    // The extra's requirement resolves to the highest satisfying version
    // and hangs off the base pin, not a separate node.
    assert_eq!(pinned(&resolution, "y"), "1.2");
    let tree = resolution.tree();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].package, "pkg:pypi/x@1.0");
    assert_eq!(tree[0].dependencies[0].package, "pkg:pypi/y@1.2");
}

#[tokio::test]
async fn extras_reexpand_an_existing_pin() {
    // `c` gets pinned without extras first; pinning `b` then activates
    // `c[extra]`, whose conditioned dependency must still appear.
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("c", "1.0", &[r#"d>=1 ; extra == "extra""#])
        .package("b", "1.0", &["c[extra]>=1"])
        .package("d", "1.0", &[]);
    let resolution = resolve(&provider, &["c", "b"]).await.unwrap();
    assert_eq!(pinned(&resolution, "c"), "1.0");
    assert_eq!(pinned(&resolution, "b"), "1.0");
    assert_eq!(pinned(&resolution, "d"), "1.0");
}

#[tokio::test]
async fn requires_python_rejects_candidates() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package_with_python("pkg", "2.0", "<3.9", &[])
        .package_with_python("pkg", "1.0", ">=3.7", &[]);
    let resolution = resolve(&provider, &["pkg"]).await.unwrap();
    assert_eq!(pinned(&resolution, "pkg"), "1.0");
}

#[tokio::test]
async fn unsupported_python_when_all_candidates_rejected() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package_with_python("pkg", "2.0", "<3.9", &[])
        .package_with_python("pkg", "1.0", "<3.8", &[]);
    let err = resolve(&provider, &["pkg"]).await.unwrap_err();
    assert!(
        matches!(err, ResolveError::UnsupportedPython { ref name, .. } if name.as_ref() == "pkg"),
        "{err:?}"
    );
}

#[tokio::test]
async fn unknown_package_is_an_error() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("a", "1.0", &["ghost>=1"]);
    let err = resolve(&provider, &["a"]).await.unwrap_err();
    assert!(
        matches!(err, ResolveError::NoVersionsFound(ref name) if name.as_ref() == "ghost"),
        "{err:?}"
    );
}

#[tokio::test]
async fn ignore_errors_skips_unknown_packages() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("a", "1.0", &["ghost>=1"]);
    let options = ResolutionOptions {
        ignore_errors: true,
        ..ResolutionOptions::default()
    };
    let resolution = Resolver::new(&provider, &env, options)
        .resolve(requirements(&["a"]))
        .await
        .unwrap();
    assert_eq!(resolution.packages(), vec!["pkg:pypi/a@1.0"]);
    assert!(matches!(
        resolution.warnings(),
        [Warning::SkippedRequirement { .. }]
    ));
}

#[tokio::test]
async fn yanked_versions_need_an_exact_pin() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("pkg", "1.0", &[])
        .yanked_package("pkg", "1.1", &[]);

    let ranged = resolve(&provider, &["pkg>=1.0"]).await.unwrap();
    assert_eq!(pinned(&ranged, "pkg"), "1.0");
    assert!(ranged.warnings().is_empty());

    let pinned_resolution = resolve(&provider, &["pkg==1.1"]).await.unwrap();
    assert_eq!(pinned(&pinned_resolution, "pkg"), "1.1");
    assert!(matches!(
        pinned_resolution.warnings(),
        [Warning::YankedVersion { .. }]
    ));
}

#[tokio::test]
async fn mutual_dependencies_resolve_and_tree_breaks_the_cycle() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("a", "1.0", &["b>=1"])
        .package("b", "1.0", &["a>=1"]);
    let resolution = resolve(&provider, &["a"]).await.unwrap();
    let mut packages = resolution.packages();
    packages.sort();
    assert_eq!(packages, vec!["pkg:pypi/a@1.0", "pkg:pypi/b@1.0"]);

    let tree = resolution.tree();
    assert_eq!(tree.len(), 1);
    let a = &tree[0];
    assert_eq!(a.package, "pkg:pypi/a@1.0");
    assert_eq!(a.dependencies.len(), 1);
    // The back-edge to `a` is broken at its second visit.
    assert!(a.dependencies[0].dependencies.is_empty());
}

#[tokio::test]
async fn assignment_is_stable_under_root_permutation() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("a", "1.0", &["shared>=1,<2"])
        .package("b", "1.0", &["shared>=1"])
        .package("shared", "1.0", &[])
        .package("shared", "1.9", &[])
        .package("shared", "2.0", &[]);

    let forward = resolve(&provider, &["a", "b"]).await.unwrap();
    let backward = resolve(&provider, &["b", "a"]).await.unwrap();

    let mut forward_packages = forward.packages();
    forward_packages.sort();
    let mut backward_packages = backward.packages();
    backward_packages.sort();
    assert_eq!(forward_packages, backward_packages);
    assert_eq!(pinned(&forward, "shared"), "1.9");
}

#[tokio::test]
async fn repeated_runs_are_identical() {
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("a", "1.0", &["b>=1", "c>=1"])
        .package("b", "2.0", &["c>=1"])
        .package("c", "3.0", &[]);

    let first = resolve(&provider, &["a"]).await.unwrap();
    let second = resolve(&provider, &["a"]).await.unwrap();
    assert_eq!(
        serde_json::to_string(&first.flat_graph()).unwrap(),
        serde_json::to_string(&second.flat_graph()).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first.tree()).unwrap(),
        serde_json::to_string(&second.tree()).unwrap()
    );
}

#[tokio::test]
async fn shared_constraint_narrows_the_pick() {
    // b's constraint arrives after shared was already a criterion; the
    // candidate set must narrow rather than split the name.
    let env = env_310_linux();
    let provider = TestProvider::default()
        .with_env(&env)
        .package("a", "1.0", &["shared>=1"])
        .package("b", "1.0", &["shared<2"])
        .package("shared", "1.0", &[])
        .package("shared", "2.0", &[]);
    let resolution = resolve(&provider, &["a", "b"]).await.unwrap();
    assert_eq!(pinned(&resolution, "shared"), "1.0");
    // One node for shared, reached from both parents.
    assert_eq!(resolution.len(), 3);
}
