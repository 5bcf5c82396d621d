use skua_normalize::PackageName;
use skua_pep440::Version;

/// Where a requirement came from: user input, or the pinned package whose
/// metadata declared it. The resolver walks these edges to build the
/// dependency tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequirementOrigin {
    /// A requirement supplied by the caller.
    Root,
    /// A requirement declared by the metadata of a pinned `{name, version}`.
    Package(PackageName, Version),
}

impl RequirementOrigin {
    /// The parent package name, if the requirement is transitive.
    pub fn package_name(&self) -> Option<&PackageName> {
        match self {
            Self::Root => None,
            Self::Package(name, _) => Some(name),
        }
    }
}
