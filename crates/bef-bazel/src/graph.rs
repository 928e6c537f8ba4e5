use crate::{
    aspect::AspectTargetInfo,
    label::{PackageLocation, TargetLabel},
};
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;

/// Directed dependency graph over labels; an edge `a -> b` means `a` depends on `b`.
///
/// Nodes and edges iterate in insertion order. The graph is built once per resolution pass and
/// then only read.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    outgoing: IndexMap<TargetLabel, IndexSet<TargetLabel>>,
    incoming: IndexMap<TargetLabel, IndexSet<TargetLabel>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, label: TargetLabel) {
        self.incoming.entry(label.clone()).or_default();
        self.outgoing.entry(label).or_default();
    }

    /// Add `from -> to`, creating either node if needed.
    pub fn add_dependency(&mut self, from: TargetLabel, to: TargetLabel) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        if let Some(deps) = self.outgoing.get_mut(&from) {
            deps.insert(to.clone());
        }
        if let Some(dependents) = self.incoming.get_mut(&to) {
            dependents.insert(from);
        }
    }

    pub fn contains(&self, label: &TargetLabel) -> bool {
        self.outgoing.contains_key(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &TargetLabel> {
        self.outgoing.keys()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&TargetLabel, &TargetLabel)> {
        self.outgoing
            .iter()
            .flat_map(|(from, deps)| deps.iter().map(move |to| (from, to)))
    }

    pub fn node_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    pub fn direct_dependencies(&self, label: &TargetLabel) -> impl Iterator<Item = &TargetLabel> {
        self.outgoing.get(label).into_iter().flatten()
    }

    pub fn direct_dependents(&self, label: &TargetLabel) -> impl Iterator<Item = &TargetLabel> {
        self.incoming.get(label).into_iter().flatten()
    }

    /// Every label reachable from `label`, excluding `label` itself, in first-visited order.
    pub fn transitive_dependencies(&self, label: &TargetLabel) -> Vec<TargetLabel> {
        let mut seen: IndexSet<&TargetLabel> = IndexSet::new();
        let mut stack = self.reversed_dependencies(label);
        while let Some(next) = stack.pop() {
            if next == label || !seen.insert(next) {
                continue;
            }
            stack.extend(self.reversed_dependencies(next));
        }
        seen.into_iter().cloned().collect()
    }

    // Reversed so popping from a stack visits dependencies in insertion order.
    fn reversed_dependencies(&self, label: &TargetLabel) -> Vec<&TargetLabel> {
        let mut deps: Vec<&TargetLabel> = self.direct_dependencies(label).collect();
        deps.reverse();
        deps
    }

    /// `true` when `to` is reachable from `from`.
    pub fn is_dependency(&self, from: &TargetLabel, to: &TargetLabel) -> bool {
        let mut seen: IndexSet<&TargetLabel> = IndexSet::new();
        let mut stack: Vec<&TargetLabel> = self.direct_dependencies(from).collect();
        while let Some(next) = stack.pop() {
            if next == to {
                return true;
            }
            if seen.insert(next) {
                stack.extend(self.direct_dependencies(next));
            }
        }
        false
    }

    /// Labels nothing depends on.
    pub fn root_labels(&self) -> BTreeSet<TargetLabel> {
        self.incoming
            .iter()
            .filter(|(_, dependents)| dependents.is_empty())
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Labels that depend on nothing, optionally leaving out external repository labels.
    pub fn leaf_labels(&self, ignore_external: bool) -> BTreeSet<TargetLabel> {
        self.outgoing
            .iter()
            .filter(|(label, deps)| deps.is_empty() && !(ignore_external && label.is_external()))
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Linearize `selected` so every selected dependency precedes its dependents.
    ///
    /// Runs a post-order walk from each selected node in the given order; the walk passes through
    /// nodes outside `selected` but only selected nodes are emitted. Cycles are broken at the
    /// first revisit.
    pub fn order_targets(&self, selected: &[TargetLabel]) -> Vec<TargetLabel> {
        let wanted: IndexSet<&TargetLabel> = selected.iter().collect();
        let mut visited: IndexSet<&TargetLabel> = IndexSet::new();
        let mut ordered = Vec::with_capacity(selected.len());

        for start in selected {
            if !visited.insert(start) {
                continue;
            }
            // (node, index of the next dependency to visit)
            let mut stack: Vec<(&TargetLabel, usize)> = vec![(start, 0)];
            while let Some((node, next)) = stack.pop() {
                let child = self
                    .outgoing
                    .get(node)
                    .and_then(|deps| deps.get_index(next));
                match child {
                    Some(child) => {
                        stack.push((node, next + 1));
                        if visited.insert(child) {
                            stack.push((child, 0));
                        }
                    }
                    None => {
                        if wanted.contains(node) {
                            ordered.push(node.clone());
                        }
                    }
                }
            }
        }

        ordered
    }

    /// [`order_targets`](Self::order_targets) over package labels.
    pub fn order_labels(&self, selected: &[PackageLocation]) -> Vec<PackageLocation> {
        let labels: Vec<TargetLabel> = selected.iter().map(PackageLocation::label).collect();
        self.order_targets(&labels)
            .iter()
            .map(PackageLocation::from_label)
            .collect()
    }
}

/// Node granularity of a graph built from aspect records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GraphGranularity {
    /// One node per target label.
    #[default]
    Target,
    /// One node per package label (`//a/b`); intra-package edges are dropped.
    Package,
}

/// Assembles a [`DependencyGraph`] from aspect records.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraphBuilder {
    granularity: GraphGranularity,
    include_external: bool,
}

impl DependencyGraphBuilder {
    pub fn new(granularity: GraphGranularity) -> Self {
        Self {
            granularity,
            include_external: true,
        }
    }

    pub fn include_external(mut self, include: bool) -> Self {
        self.include_external = include;
        self
    }

    fn node(&self, label: &TargetLabel) -> TargetLabel {
        match self.granularity {
            GraphGranularity::Target => label.clone(),
            GraphGranularity::Package => label.package_label(),
        }
    }

    pub fn build<'a, I>(&self, infos: I) -> DependencyGraph
    where
        I: IntoIterator<Item = &'a AspectTargetInfo>,
    {
        let mut graph = DependencyGraph::new();
        for info in infos {
            let from = self.node(&info.label);
            graph.add_node(from.clone());
            for dep in info.dependency_labels() {
                if !self.include_external && dep.is_external() {
                    continue;
                }
                let to = self.node(dep);
                if to == from {
                    continue;
                }
                graph.add_dependency(from.clone(), to);
            }
        }
        graph
    }
}
