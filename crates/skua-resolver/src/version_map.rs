use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use tracing::trace;

use skua_client::SimpleMetadata;
use skua_distribution::{Dist, RegistrySdist, RegistryWheel};
use skua_distribution_filename::DistFilename;
use skua_pep440::Version;
use skua_platform_tags::TagPriority;
use skua_pypi_types::Yanked;

use crate::environment::Environment;

/// A map from the versions of one package to their usable artifacts, in
/// ascending version order. Versions without any usable artifact are
/// absent.
#[derive(Debug, Default)]
pub struct VersionMap(BTreeMap<Version, VersionEntry>);

impl VersionMap {
    /// Build the map from an index listing: filter wheels to the
    /// environment's tags, apply the file-level `requires-python`
    /// pre-filter, and segregate yanked files.
    pub fn from_metadata(metadata: SimpleMetadata, env: &Environment) -> Self {
        let mut map = BTreeMap::new();

        for (version, files) in metadata {
            for (filename, file) in files.all() {
                // A file whose own requires-python excludes the target can
                // never be used; dropping it here may drop the whole
                // version, which is exactly the "usable candidates only"
                // contract.
                if let Some(requires_python) = &file.requires_python {
                    if !env.satisfies_requires_python(requires_python) {
                        trace!(
                            "Skipping {}: requires-python {} excludes {}",
                            file.filename,
                            requires_python,
                            env.python_full_version()
                        );
                        continue;
                    }
                }

                let yanked = file.yanked.as_ref().is_some_and(Yanked::is_yanked);
                let entry = match map.entry(version.clone()) {
                    Entry::Occupied(entry) => entry.into_mut(),
                    Entry::Vacant(entry) => entry.insert(VersionEntry::default()),
                };
                if yanked {
                    entry.yank_reason = entry
                        .yank_reason
                        .take()
                        .or_else(|| file.yanked.as_ref().and_then(|y| y.reason().map(String::from)));
                }

                match filename {
                    DistFilename::WheelFilename(filename) => {
                        let Some(priority) = filename.compatibility(env.tags()) else {
                            trace!("Skipping {}: incompatible wheel tags", file.filename);
                            continue;
                        };
                        let wheel = RegistryWheel {
                            filename,
                            file: file.clone(),
                        };
                        entry.select(yanked).insert_wheel(wheel, priority);
                    }
                    DistFilename::SourceDistFilename(filename) => {
                        let sdist = RegistrySdist {
                            filename,
                            file: file.clone(),
                        };
                        entry.select(yanked).insert_sdist(sdist);
                    }
                }
            }
        }

        // Drop versions whose files were all filtered out.
        map.retain(|_, entry| entry.usable());
        Self(map)
    }

    /// The entry for a version, if it has usable artifacts.
    pub fn get(&self, version: &Version) -> Option<&VersionEntry> {
        self.0.get(version)
    }

    /// Iterate versions and entries in descending version order.
    pub fn iter_rev(&self) -> impl Iterator<Item = (&Version, &VersionEntry)> {
        self.0.iter().rev()
    }

    /// Whether no version survived filtering.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The artifacts of one version, split by yank state.
#[derive(Debug, Default)]
pub struct VersionEntry {
    dist: PrioritizedDist,
    yanked_dist: PrioritizedDist,
    yank_reason: Option<String>,
}

impl VersionEntry {
    fn select(&mut self, yanked: bool) -> &mut PrioritizedDist {
        if yanked {
            &mut self.yanked_dist
        } else {
            &mut self.dist
        }
    }

    /// Whether the version has any artifact at all.
    pub fn usable(&self) -> bool {
        self.dist.any() || self.yanked_dist.any()
    }

    /// Whether the version is only available through yanked files.
    pub fn yanked_only(&self) -> bool {
        !self.dist.any() && self.yanked_dist.any()
    }

    /// The yank reason, when the index supplied one.
    pub fn yank_reason(&self) -> Option<&str> {
        self.yank_reason.as_deref()
    }

    /// The preferred artifact of this version for the environment.
    ///
    /// Wheels beat the sdist unless `prefer_source` flips the order; a
    /// yanked-only version serves its yanked artifacts (admission is the
    /// candidate selector's concern).
    pub fn preferred(&self, prefer_source: bool) -> Option<Dist> {
        let pool = if self.dist.any() {
            &self.dist
        } else {
            &self.yanked_dist
        };
        pool.get(prefer_source)
    }
}

/// The best wheel and the sdist of a package version.
#[derive(Debug, Default)]
struct PrioritizedDist {
    /// The highest-priority platform-compatible wheel. At equal priority
    /// the lexicographically smaller filename wins, keeping selection
    /// total.
    wheel: Option<(RegistryWheel, TagPriority)>,
    /// The source distribution. At most one is kept.
    sdist: Option<RegistrySdist>,
}

impl PrioritizedDist {
    fn insert_wheel(&mut self, wheel: RegistryWheel, priority: TagPriority) {
        match &self.wheel {
            Some((existing, existing_priority)) => {
                if priority > *existing_priority
                    || (priority == *existing_priority
                        && wheel.file.filename < existing.file.filename)
                {
                    self.wheel = Some((wheel, priority));
                }
            }
            None => self.wheel = Some((wheel, priority)),
        }
    }

    fn insert_sdist(&mut self, sdist: RegistrySdist) {
        if self.sdist.is_none() {
            self.sdist = Some(sdist);
        }
    }

    fn any(&self) -> bool {
        self.wheel.is_some() || self.sdist.is_some()
    }

    fn get(&self, prefer_source: bool) -> Option<Dist> {
        let wheel = || {
            self.wheel
                .as_ref()
                .map(|(wheel, _)| Dist::Wheel(wheel.clone()))
        };
        let sdist = || self.sdist.as_ref().map(|sdist| Dist::Sdist(sdist.clone()));
        if prefer_source {
            sdist().or_else(wheel)
        } else {
            wheel().or_else(sdist)
        }
    }
}
