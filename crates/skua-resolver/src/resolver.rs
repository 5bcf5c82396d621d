//! The backtracking search: a criterion per package name, smallest
//! candidate domain first, single-step undo through a decision trail.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use skua_normalize::{ExtraName, PackageName};
use skua_pep440::Version;
use skua_pep508::Requirement;

use crate::candidate_selector::CandidateSelector;
use crate::environment::Environment;
use crate::error::{ConflictSet, Warning};
use crate::provider::{CandidateVersion, ResolverProvider};
use crate::resolution::{PinnedPackage, Resolution};
use crate::{ResolutionOptions, ResolveError};

/// Per-name search state: the active requirements on the name and the
/// remaining candidate versions satisfying all of them.
#[derive(Debug)]
struct Criterion {
    /// All versions the provider knows, descending. Shared and immutable.
    versions: Arc<Vec<CandidateVersion>>,
    /// The active requirements on this name, in arrival order.
    requirements: Vec<Requirement>,
    /// The versions in `versions` satisfying every requirement and the
    /// admission rules, minus versions marked bad. Kept exact after every
    /// mutation.
    candidates: Vec<CandidateVersion>,
}

impl Criterion {
    /// The union of extras requested by the active requirements.
    fn extras(&self) -> BTreeSet<ExtraName> {
        self.requirements
            .iter()
            .flat_map(|requirement| requirement.extras.iter().cloned())
            .collect()
    }
}

/// One decision on the trail, with everything needed to undo it.
#[derive(Debug)]
struct Frame {
    name: PackageName,
    version: Version,
    /// Requirements appended to other criteria by this decision, as
    /// `(name, count)` in append order. Undone by truncation, newest
    /// first.
    added: Vec<(PackageName, usize)>,
    /// Extras re-expansions performed by this decision: the previous
    /// extras set of a pinned package, restored on undo.
    expanded: Vec<(PackageName, BTreeSet<ExtraName>)>,
}

/// Given a set of requirements, find a set of compatible pinned packages.
pub struct Resolver<'a, P: ResolverProvider> {
    provider: &'a P,
    env: &'a Environment,
    options: ResolutionOptions,
    selector: CandidateSelector,
}

struct State {
    criteria: FxHashMap<PackageName, Criterion>,
    /// Criterion insertion order, for stable tie-breaks.
    order: Vec<PackageName>,
    /// Pins in decision order.
    pins: Vec<PinnedPackage>,
    pinned: FxHashMap<PackageName, Version>,
    /// The extras a pinned package was expanded with.
    pinned_extras: FxHashMap<PackageName, BTreeSet<ExtraName>>,
    trail: Vec<Frame>,
    /// Versions ruled out per name, by failed pins and failed metadata.
    bad: FxHashMap<PackageName, FxHashSet<Version>>,
    /// The subset of `bad` rejected by `requires_python`, to tell a global
    /// Python conflict from a requirement conflict.
    python_rejected: FxHashMap<PackageName, FxHashSet<Version>>,
    /// The requirements of the most recent criterion collapse, kept for the
    /// conflict report should the whole search fail.
    last_conflict: Option<ConflictSet>,
    warnings: Vec<Warning>,
}

impl State {
    fn is_pinned(&self, name: &PackageName) -> bool {
        self.pinned.contains_key(name)
    }
}

impl<'a, P: ResolverProvider> Resolver<'a, P> {
    /// Initialize a new resolver.
    pub fn new(provider: &'a P, env: &'a Environment, options: ResolutionOptions) -> Self {
        Self {
            selector: CandidateSelector::new(options.allow_prereleases),
            provider,
            env,
            options,
        }
    }

    /// Resolve the given root requirements into a pinned assignment and
    /// dependency graph.
    pub async fn resolve(&self, requirements: Vec<Requirement>) -> Result<Resolution, ResolveError> {
        let mut state = State {
            criteria: FxHashMap::default(),
            order: Vec::new(),
            pins: Vec::new(),
            pinned: FxHashMap::default(),
            pinned_extras: FxHashMap::default(),
            trail: Vec::new(),
            bad: FxHashMap::default(),
            python_rejected: FxHashMap::default(),
            last_conflict: None,
            warnings: Vec::new(),
        };

        // Drop roots whose marker is false under the environment, warm the
        // provider for the rest, and seed the criteria.
        let markers = self.env.marker_environment();
        let roots: Vec<Requirement> = requirements
            .into_iter()
            .filter(|requirement| requirement.evaluate_markers(&markers, None))
            .collect();
        let root_names: Vec<PackageName> = roots
            .iter()
            .map(|requirement| requirement.name.clone())
            .collect();
        self.provider.prefetch(&root_names).await;

        for requirement in roots {
            debug!("Adding root dependency: {requirement}");
            let mut added = Vec::new();
            match self.add_requirement(&mut state, requirement.clone(), &mut added).await {
                Ok(()) => {}
                Err(ResolveError::NoVersionsFound(_)) if self.options.ignore_errors => {
                    state.warnings.push(Warning::SkippedRequirement {
                        requirement: requirement.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            if rounds > self.options.max_rounds {
                return Err(ResolveError::ResolutionTooDeep(self.options.max_rounds));
            }

            // A criterion with active requirements and no candidates means
            // the current partial assignment cannot be extended.
            let failing = state.order.iter().find(|name| {
                let criterion = &state.criteria[*name];
                !state.is_pinned(name)
                    && !criterion.requirements.is_empty()
                    && criterion.candidates.is_empty()
            });
            if let Some(failing) = failing.cloned() {
                self.backtrack(&mut state, &failing)?;
                continue;
            }

            // Smallest non-empty candidate domain first; ties break by
            // insertion order (`order` is scanned front to back).
            let next = state
                .order
                .iter()
                .filter(|name| {
                    !state.is_pinned(name) && !state.criteria[*name].requirements.is_empty()
                })
                .min_by_key(|name| state.criteria[*name].candidates.len())
                .cloned();
            let Some(next) = next else {
                // Every reachable requirement is pinned.
                break;
            };

            let candidate = state.criteria[&next].candidates[0].clone();
            let extras = state.criteria[&next].extras();
            trace!(
                "Trying {next}=={} ({} candidate(s) remain)",
                candidate.version,
                state.criteria[&next].candidates.len()
            );
            self.try_pin(&mut state, &next, &candidate, extras).await?;
        }

        let mut resolution = Resolution::from_state(
            &state.pins,
            state
                .criteria
                .values()
                .flat_map(|criterion| criterion.requirements.iter()),
        );
        resolution.warnings = state.warnings;
        Ok(resolution)
    }

    /// Attempt to pin `name` at `candidate`: fetch its metadata, check the
    /// interpreter constraint, and propagate its child requirements. On
    /// any failure the version is marked bad and all additions are undone.
    async fn try_pin(
        &self,
        state: &mut State,
        name: &PackageName,
        candidate: &CandidateVersion,
        extras: BTreeSet<ExtraName>,
    ) -> Result<(), ResolveError> {
        let version = candidate.version.clone();
        let mut added: Vec<(PackageName, usize)> = Vec::new();
        let mut expanded: Vec<(PackageName, BTreeSet<ExtraName>)> = Vec::new();

        // The work list: the candidate itself, plus any pinned package
        // whose extras set grows while propagating (a re-expansion of its
        // children).
        let mut queue: Vec<(PackageName, Version, BTreeSet<ExtraName>)> =
            vec![(name.clone(), version.clone(), extras.clone())];
        let mut failed = false;

        'queue: while let Some((parent, parent_version, parent_extras)) = queue.pop() {
            let metadata = match self
                .provider
                .requirements_of(&parent, &parent_version, &parent_extras)
                .await
            {
                Ok(metadata) => metadata,
                Err(err @ ResolveError::MetadataUnavailable { .. }) => {
                    if self.options.ignore_errors {
                        debug!("Skipping {parent}=={parent_version}: {err}");
                        failed = true;
                        break 'queue;
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            };

            // The interpreter check applies to the candidate being pinned;
            // re-expanded parents already passed it.
            if parent == *name {
                if let Some(requires_python) = &metadata.requires_python {
                    if !self.env.satisfies_requires_python(requires_python) {
                        debug!(
                            "Rejecting {name}=={version}: requires-python {requires_python} \
                             excludes {}",
                            self.env.python_full_version()
                        );
                        state
                            .python_rejected
                            .entry(name.clone())
                            .or_default()
                            .insert(version.clone());
                        failed = true;
                        break 'queue;
                    }
                }
            }

            for child in &metadata.requirements {
                // A self-edge is satisfied by the pin being made.
                if child.name == parent {
                    continue;
                }
                // Identical requirements (same parent, same constraints)
                // arise on re-expansion; adding them again is a no-op.
                if state
                    .criteria
                    .get(&child.name)
                    .is_some_and(|criterion| criterion.requirements.contains(child))
                {
                    continue;
                }

                debug!("Adding transitive dependency: {child}");
                match self.add_requirement(state, child.clone(), &mut added).await {
                    Ok(()) => {}
                    Err(ResolveError::NoVersionsFound(_)) if self.options.ignore_errors => {
                        state.warnings.push(Warning::SkippedRequirement {
                            requirement: child.to_string(),
                        });
                        continue;
                    }
                    Err(err) => return Err(err),
                }

                if let Some(pinned_version) = state.pinned.get(&child.name).cloned() {
                    // The child is already bound; the existing pin must
                    // satisfy the new requirement.
                    if !state.criteria[&child.name]
                        .candidates
                        .iter()
                        .any(|candidate| candidate.version == pinned_version)
                    {
                        trace!(
                            "Pinned {child_name}=={pinned_version} does not satisfy {child}",
                            child_name = child.name
                        );
                        state.last_conflict = Some(ConflictSet {
                            name: child.name.clone(),
                            requirements: state.criteria[&child.name].requirements.clone(),
                        });
                        failed = true;
                        break 'queue;
                    }
                    // Activating new extras on an existing pin re-expands
                    // its children against the union.
                    let union = state.criteria[&child.name].extras();
                    let current = state.pinned_extras.get(&child.name).cloned().unwrap_or_default();
                    if !union.is_subset(&current) {
                        expanded.push((child.name.clone(), current));
                        state.pinned_extras.insert(child.name.clone(), union.clone());
                        queue.push((child.name.clone(), pinned_version, union));
                    }
                } else if state.criteria[&child.name].candidates.is_empty() {
                    trace!("No candidate for {child} under the current requirements");
                    state.last_conflict = Some(ConflictSet {
                        name: child.name.clone(),
                        requirements: state.criteria[&child.name].requirements.clone(),
                    });
                    failed = true;
                    break 'queue;
                }
            }
        }

        if failed {
            self.undo_additions(state, &added, &expanded);
            state
                .bad
                .entry(name.clone())
                .or_default()
                .insert(version.clone());
            self.recompute(state, name);
            return Ok(());
        }

        // Record the decision.
        if candidate.yanked {
            state.warnings.push(Warning::YankedVersion {
                name: name.clone(),
                version: version.clone(),
                reason: candidate.yank_reason.clone(),
            });
        }
        debug!("Pinned {name}=={version}");
        state.pins.push(PinnedPackage {
            name: name.clone(),
            version: version.clone(),
        });
        state.pinned.insert(name.clone(), version.clone());
        state.pinned_extras.insert(name.clone(), extras);
        state.trail.push(Frame {
            name: name.clone(),
            version,
            added,
            expanded,
        });
        Ok(())
    }

    /// Append a requirement to its criterion (creating the criterion on
    /// first contact with the name) and restore the candidate invariant.
    async fn add_requirement(
        &self,
        state: &mut State,
        requirement: Requirement,
        added: &mut Vec<(PackageName, usize)>,
    ) -> Result<(), ResolveError> {
        let name = requirement.name.clone();
        if !state.criteria.contains_key(&name) {
            let versions = self.provider.versions(&name).await?;
            state.order.push(name.clone());
            state.criteria.insert(
                name.clone(),
                Criterion {
                    versions,
                    requirements: Vec::new(),
                    candidates: Vec::new(),
                },
            );
        }
        let criterion = state
            .criteria
            .get_mut(&name)
            .expect("criterion was just inserted");
        criterion.requirements.push(requirement);
        added.push((name.clone(), 1));
        self.recompute(state, &name);
        Ok(())
    }

    /// Recompute a criterion's candidates from its requirements and the
    /// bad-version set. This is the invariant the search leans on: the
    /// candidate list is always exact.
    fn recompute(&self, state: &mut State, name: &PackageName) {
        let bad = state.bad.get(name);
        let criterion = state
            .criteria
            .get(name)
            .expect("recompute of unknown criterion");
        let candidates =
            self.selector
                .candidates(&criterion.versions, &criterion.requirements, bad);
        state
            .criteria
            .get_mut(name)
            .expect("recompute of unknown criterion")
            .candidates = candidates;
    }

    /// Undo requirement additions and extras expansions, newest first.
    fn undo_additions(
        &self,
        state: &mut State,
        added: &[(PackageName, usize)],
        expanded: &[(PackageName, BTreeSet<ExtraName>)],
    ) {
        for (name, count) in added.iter().rev() {
            let criterion = state
                .criteria
                .get_mut(name)
                .expect("undo of unknown criterion");
            let new_len = criterion.requirements.len().saturating_sub(*count);
            criterion.requirements.truncate(new_len);
            self.recompute(state, name);
        }
        for (name, previous) in expanded.iter().rev() {
            state.pinned_extras.insert(name.clone(), previous.clone());
        }
    }

    /// Unwind pins newest-first until removing one restores at least one
    /// candidate on the failing name (or retires its requirements), then
    /// mark that pin's version bad and resume the search.
    fn backtrack(&self, state: &mut State, failing: &PackageName) -> Result<(), ResolveError> {
        debug!("No compatible version found for: {failing}; backtracking");
        loop {
            let Some(frame) = state.trail.pop() else {
                return Err(self.exhausted(state, failing));
            };

            // Undo the decision.
            let pin = state.pins.pop().expect("trail and pins move together");
            debug_assert_eq!(pin.name, frame.name);
            state.pinned.remove(&frame.name);
            state.pinned_extras.remove(&frame.name);
            self.undo_additions(state, &frame.added, &frame.expanded);

            self.recompute(state, failing);
            let restored = {
                let criterion = &state.criteria[failing];
                criterion.requirements.is_empty() || !criterion.candidates.is_empty()
            };
            if restored {
                // This is the decision to revise: its version is now bad
                // under the criteria in effect.
                debug!(
                    "Discarding {}=={} and resuming the search",
                    frame.name, frame.version
                );
                state
                    .bad
                    .entry(frame.name.clone())
                    .or_default()
                    .insert(frame.version.clone());
                self.recompute(state, &frame.name);
                return Ok(());
            }
        }
    }

    /// The trail is empty and the failing criterion still has no
    /// candidates: classify the failure.
    fn exhausted(&self, state: &State, failing: &PackageName) -> ResolveError {
        let criterion = &state.criteria[failing];

        // If every known version fell to `requires_python`, the target
        // interpreter is the problem, not the requirements.
        if let Some(rejected) = state.python_rejected.get(failing) {
            if criterion
                .versions
                .iter()
                .all(|candidate| rejected.contains(&candidate.version))
            {
                return ResolveError::UnsupportedPython {
                    name: failing.clone(),
                    python: self.env.python_full_version().clone(),
                };
            }
        }

        // Prefer the conflict recorded at the moment a criterion first
        // collapsed: after unwinding, the failing name often only tells
        // that its versions were exhausted, not why.
        let (name, requirements) = match &state.last_conflict {
            Some(conflict) => (conflict.name.clone(), conflict.requirements.clone()),
            None => (failing.clone(), criterion.requirements.clone()),
        };
        let versions = state
            .criteria
            .get(&name)
            .map(|criterion| criterion.versions.clone())
            .unwrap_or_default();

        // Greedily minimize: a requirement whose removal leaves the
        // candidate set empty is not part of the conflict. Bad-version
        // marks are ignored here so the set reflects the requirements
        // themselves.
        let mut conflict = requirements;
        let mut index = 0;
        while index < conflict.len() {
            let without: Vec<Requirement> = conflict
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, requirement)| requirement.clone())
                .collect();
            let still_empty = self
                .selector
                .candidates(&versions, &without, None)
                .is_empty();
            if still_empty && !without.is_empty() {
                conflict = without;
            } else {
                index += 1;
            }
        }

        ResolveError::ResolutionImpossible(ConflictSet {
            name,
            requirements: conflict,
        })
    }
}
