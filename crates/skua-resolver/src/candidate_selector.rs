use rustc_hash::FxHashSet;

use skua_pep440::Version;
use skua_pep508::Requirement;

use crate::provider::CandidateVersion;

/// Orders the admissible candidate versions of one package under its
/// active requirements.
///
/// Admission rules:
/// - A version must satisfy every active requirement's specifiers.
/// - A pre-release is admitted only if some requirement mentions a
///   pre-release, pre-releases are globally allowed, or no stable
///   candidate exists.
/// - A yanked version is admitted only through an exact `==`/`===` pin.
///
/// Ordering follows the default strategy: highest stable first, then the
/// highest pre-releases.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CandidateSelector {
    allow_prereleases: bool,
}

impl CandidateSelector {
    pub(crate) fn new(allow_prereleases: bool) -> Self {
        Self { allow_prereleases }
    }

    /// Compute the ordered candidate list: all versions in `versions`
    /// (descending) that satisfy `requirements`, pass pre-release and yank
    /// admission, and are not marked bad.
    pub(crate) fn candidates(
        &self,
        versions: &[CandidateVersion],
        requirements: &[Requirement],
        bad: Option<&FxHashSet<Version>>,
    ) -> Vec<CandidateVersion> {
        let satisfying = |candidate: &CandidateVersion| {
            if bad.is_some_and(|bad| bad.contains(&candidate.version)) {
                return false;
            }
            if !requirements
                .iter()
                .all(|requirement| requirement.specifiers.contains(&candidate.version))
            {
                return false;
            }
            // Yanked versions only through an exact pin.
            if candidate.yanked
                && !requirements
                    .iter()
                    .any(|requirement| requirement.specifiers.is_exact_pin_of(&candidate.version))
            {
                return false;
            }
            true
        };

        let mut stable = Vec::new();
        let mut prerelease = Vec::new();
        for candidate in versions.iter().filter(|candidate| satisfying(candidate)) {
            if candidate.version.any_prerelease() {
                prerelease.push(candidate.clone());
            } else {
                stable.push(candidate.clone());
            }
        }

        let prereleases_mentioned = requirements
            .iter()
            .any(|requirement| requirement.specifiers.any_prerelease());
        if self.allow_prereleases || prereleases_mentioned || stable.is_empty() {
            stable.extend(prerelease);
        }
        stable
    }
}
