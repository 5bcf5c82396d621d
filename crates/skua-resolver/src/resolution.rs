//! The resolved assignment and its output shapes: the flat package list,
//! the parent/children adjacency form, and the nested dependency trees.

use std::collections::BTreeMap;

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use skua_normalize::PackageName;
use skua_pep440::Version;
use skua_pep508::{Requirement, RequirementOrigin};

use crate::error::Warning;

/// A package pinned at a specific version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedPackage {
    /// The normalized package name.
    pub name: PackageName,
    /// The selected version.
    pub version: Version,
}

impl PinnedPackage {
    /// The Package-URL identifying this pin, `pkg:pypi/<name>@<version>`.
    pub fn package_url(&self) -> String {
        format!("pkg:pypi/{}@{}", self.name, self.version)
    }
}

impl std::fmt::Display for PinnedPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// One entry of the flat adjacency form.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FlatEntry {
    /// The pin, as a purl.
    pub package: String,
    /// The purls of its direct dependencies, sorted.
    pub dependencies: Vec<String>,
}

/// One node of the nested dependency tree. A package reachable through
/// several parents appears once under each of them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TreeNode {
    /// The pin, as a purl.
    pub package: String,
    /// The children, sorted by purl.
    pub dependencies: Vec<TreeNode>,
}

/// One node of the pipdeptree-style rendering of the tree.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PdtNode {
    /// The normalized name, used as the node key.
    pub key: String,
    /// The normalized name.
    pub package_name: String,
    /// The pinned version.
    pub installed_version: String,
    /// The children, sorted by key.
    pub dependencies: Vec<PdtNode>,
}

/// A complete resolution: every node is a pinned package, every edge a
/// requirement of the parent satisfied by the child.
#[derive(Debug)]
pub struct Resolution {
    graph: DiGraph<PinnedPackage, ()>,
    by_name: FxHashMap<PackageName, NodeIndex>,
    /// Pins in decision order.
    pins: Vec<PinnedPackage>,
    /// Names required directly by the caller, in pin order.
    roots: Vec<PackageName>,
    pub(crate) warnings: Vec<Warning>,
}

impl Resolution {
    /// Build the graph from the final pins and the active requirements
    /// whose origins carry the parent edges.
    pub(crate) fn from_state<'a>(
        pins: &[PinnedPackage],
        requirements: impl Iterator<Item = &'a Requirement>,
    ) -> Self {
        let mut graph = DiGraph::with_capacity(pins.len(), pins.len());
        let mut by_name = FxHashMap::default();
        for pin in pins {
            let index = graph.add_node(pin.clone());
            by_name.insert(pin.name.clone(), index);
        }

        let mut roots: Vec<PackageName> = Vec::new();
        let mut seen_edges = FxHashSet::default();
        for requirement in requirements {
            let Some(child) = by_name.get(&requirement.name).copied() else {
                // A requirement can stay unpinned only when it was skipped
                // under `ignore_errors`.
                continue;
            };
            match &requirement.origin {
                RequirementOrigin::Root => {
                    if !roots.contains(&requirement.name) {
                        roots.push(requirement.name.clone());
                    }
                }
                RequirementOrigin::Package(parent, _version) => {
                    if let Some(parent) = by_name.get(parent).copied() {
                        if seen_edges.insert((parent, child)) {
                            graph.add_edge(parent, child, ());
                        }
                    }
                }
            }
        }
        // Roots in pin order, so output order is deterministic under input
        // permutation.
        roots.sort_by_key(|name| {
            pins.iter()
                .position(|pin| pin.name == *name)
                .unwrap_or(usize::MAX)
        });

        Self {
            graph,
            by_name,
            pins: pins.to_vec(),
            roots,
            warnings: Vec::new(),
        }
    }

    /// The number of pinned packages.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// The pinned package for a name, if present.
    pub fn get(&self, name: &PackageName) -> Option<&PinnedPackage> {
        self.by_name.get(name).map(|index| &self.graph[*index])
    }

    /// Warnings gathered during resolution (yanked selections, skipped
    /// requirements).
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// The flat set of pins as purls, in pin order. Names are unique.
    pub fn packages(&self) -> Vec<String> {
        self.pins.iter().map(PinnedPackage::package_url).collect()
    }

    /// The direct dependencies of a node, as `(name, purl)` pairs sorted
    /// by purl.
    fn children_of(&self, index: NodeIndex) -> Vec<(PackageName, NodeIndex)> {
        let mut children: Vec<(String, PackageName, NodeIndex)> = self
            .graph
            .neighbors(index)
            .map(|child| {
                let pin = &self.graph[child];
                (pin.package_url(), pin.name.clone(), child)
            })
            .collect();
        children.sort();
        children
            .into_iter()
            .map(|(_, name, index)| (name, index))
            .collect()
    }

    /// The parent/children adjacency form: one entry per pin, in
    /// topological order (parents before children), ties broken by purl.
    pub fn flat_graph(&self) -> Vec<FlatEntry> {
        // Kahn's algorithm over a sorted ready-set; a cycle (mutually
        // dependent pins) is broken at the alphabetically smallest
        // remaining node.
        let mut indegree: FxHashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|index| {
                (
                    index,
                    self.graph
                        .neighbors_directed(index, petgraph::Direction::Incoming)
                        .count(),
                )
            })
            .collect();
        let mut remaining: BTreeMap<String, NodeIndex> = self
            .graph
            .node_indices()
            .map(|index| (self.graph[index].package_url(), index))
            .collect();

        let mut entries = Vec::with_capacity(self.pins.len());
        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .find(|(_, index)| indegree[index] == 0)
                .or_else(|| remaining.iter().next())
                .map(|(purl, index)| (purl.clone(), *index))
                .expect("remaining is non-empty");
            let (purl, index) = next;
            remaining.remove(&purl);

            for child in self.graph.neighbors(index) {
                if let Some(count) = indegree.get_mut(&child) {
                    *count = count.saturating_sub(1);
                }
            }

            let dependencies = self
                .children_of(index)
                .into_iter()
                .map(|(_, child)| self.graph[child].package_url())
                .collect();
            entries.push(FlatEntry {
                package: purl,
                dependencies,
            });
        }
        entries
    }

    /// The nested dependency trees, one per root requirement, sorted by
    /// root purl. Shared children are duplicated at each site; a cycle is
    /// broken at its second visit on the path.
    pub fn tree(&self) -> Vec<TreeNode> {
        let mut trees: Vec<TreeNode> = self
            .roots
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .map(|index| {
                let mut path = FxHashSet::default();
                self.subtree(*index, &mut path)
            })
            .collect();
        trees.sort_by(|a, b| a.package.cmp(&b.package));
        trees
    }

    fn subtree(&self, index: NodeIndex, path: &mut FxHashSet<NodeIndex>) -> TreeNode {
        path.insert(index);
        let children: Vec<_> = self
            .children_of(index)
            .into_iter()
            .filter(|(_, child)| !path.contains(child))
            .collect();
        let dependencies = children
            .into_iter()
            .map(|(_, child)| self.subtree(child, path))
            .collect();
        path.remove(&index);
        TreeNode {
            package: self.graph[index].package_url(),
            dependencies,
        }
    }

    /// The pipdeptree-style rendering of [`Resolution::tree`].
    pub fn pdt_tree(&self) -> Vec<PdtNode> {
        let mut trees: Vec<PdtNode> = self
            .roots
            .iter()
            .filter_map(|name| self.by_name.get(name))
            .map(|index| {
                let mut path = FxHashSet::default();
                self.pdt_subtree(*index, &mut path)
            })
            .collect();
        trees.sort_by(|a, b| a.key.cmp(&b.key));
        trees
    }

    fn pdt_subtree(&self, index: NodeIndex, path: &mut FxHashSet<NodeIndex>) -> PdtNode {
        path.insert(index);
        let children: Vec<_> = self
            .children_of(index)
            .into_iter()
            .filter(|(_, child)| !path.contains(child))
            .collect();
        let dependencies = children
            .into_iter()
            .map(|(_, child)| self.pdt_subtree(child, path))
            .collect();
        path.remove(&index);
        let pin = &self.graph[index];
        PdtNode {
            key: pin.name.to_string(),
            package_name: pin.name.to_string(),
            installed_version: pin.version.to_string(),
            dependencies,
        }
    }
}

/// The `{name}=={version}` lines of the resolution, sorted by name.
impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pins = self.pins.clone();
        pins.sort_by(|a, b| a.name.cmp(&b.name));
        for pin in pins {
            writeln!(f, "{pin}")?;
        }
        Ok(())
    }
}
