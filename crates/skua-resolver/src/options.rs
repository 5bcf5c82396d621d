/// Configuration of a single resolution run.
#[derive(Debug, Clone)]
pub struct ResolutionOptions {
    /// Prefer source distributions over wheels when both are usable.
    pub prefer_source: bool,
    /// Admit pre-release versions even when no requirement mentions one.
    pub allow_prereleases: bool,
    /// Treat per-candidate metadata failures and unknown packages as
    /// skippable instead of fatal.
    pub ignore_errors: bool,
    /// The search-round budget; exceeding it fails the resolution.
    pub max_rounds: usize,
}

impl Default for ResolutionOptions {
    fn default() -> Self {
        Self {
            prefer_source: false,
            allow_prereleases: false,
            ignore_errors: false,
            max_rounds: 200_000,
        }
    }
}
