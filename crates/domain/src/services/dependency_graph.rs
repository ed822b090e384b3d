//! Dependency graph resolution.
//!
//! Every query works on one consistent [`RegistryState`]: the public
//! [`DependencyResolver`] methods take a registry snapshot and delegate to
//! the crate-level functions below, which the widget service also calls
//! while it already holds a snapshot.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{WidgetError, WidgetResult};
use crate::models::{
    DependencyGraph, GraphEdge, GraphNode, WidgetConflict, WidgetDependency,
};
use crate::services::registry::{RegistryState, WidgetRegistry};
use shared::validation::{error_message, parse_version};

/// Classification of a problem with one dependency declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyIssueKind {
    Unregistered,
    InvalidConstraint,
    VersionMismatch,
    CategoryMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyIssue {
    pub id: String,
    pub kind: DependencyIssueKind,
    pub message: String,
}

pub struct DependencyResolver {
    registry: Arc<WidgetRegistry>,
}

impl DependencyResolver {
    pub fn new(registry: Arc<WidgetRegistry>) -> Self {
        Self { registry }
    }

    /// Cycles reachable from `widget_id` if it declared `dependencies`.
    ///
    /// Each cycle is the traversal path from the first revisited node, e.g.
    /// `["widget_a", "widget_b"]` for `a -> b -> a`.
    pub fn detect_circular_dependencies(
        &self,
        widget_id: &str,
        dependencies: &[WidgetDependency],
    ) -> Vec<Vec<String>> {
        detect_cycles(&self.registry.snapshot(), widget_id, dependencies)
    }

    /// Topological order (dependencies first) of `widget_ids` and everything
    /// they transitively depend on. Ties go to the earlier-registered widget.
    pub fn resolve_loading_order(&self, widget_ids: &[String]) -> WidgetResult<Vec<String>> {
        loading_order(&self.registry.snapshot(), widget_ids)
    }

    pub fn get_widget_dependencies(
        &self,
        widget_id: &str,
        recursive: bool,
    ) -> WidgetResult<Vec<String>> {
        let state = self.registry.snapshot();
        if !state.contains(widget_id) {
            return Err(WidgetError::UnknownWidget(widget_id.to_string()));
        }
        if recursive {
            Ok(transitive_dependencies(&state, widget_id))
        } else {
            Ok(direct_dependencies(&state, widget_id))
        }
    }

    /// Registered widgets that directly or transitively depend on `widget_id`.
    pub fn get_reverse_dependencies(&self, widget_id: &str) -> WidgetResult<Vec<String>> {
        let state = self.registry.snapshot();
        if !state.contains(widget_id) {
            return Err(WidgetError::UnknownWidget(widget_id.to_string()));
        }
        Ok(reverse_dependencies(&state, widget_id))
    }

    pub fn check_widget_compatibility(
        &self,
        widget_ids: &[String],
    ) -> WidgetResult<Vec<WidgetConflict>> {
        let state = self.registry.snapshot();
        if let Some(unknown) = widget_ids.iter().find(|id| !state.contains(id)) {
            return Err(WidgetError::UnknownWidget(unknown.clone()));
        }
        Ok(conflicts(&state, widget_ids))
    }

    pub fn get_dependency_graph(&self) -> DependencyGraph {
        dependency_graph(&self.registry.snapshot())
    }

    /// Human readable problems with a dependency list; empty when valid.
    pub fn validate_dependencies(&self, dependencies: &[WidgetDependency]) -> Vec<String> {
        dependency_issues(&self.registry.snapshot(), dependencies)
            .into_iter()
            .map(|issue| issue.message)
            .collect()
    }
}

fn declared_dependencies<'a>(state: &'a RegistryState, widget_id: &str) -> &'a [WidgetDependency] {
    state
        .get(widget_id)
        .map(|w| w.dependencies.as_slice())
        .unwrap_or(&[])
}

pub(crate) fn detect_cycles(
    state: &RegistryState,
    widget_id: &str,
    dependencies: &[WidgetDependency],
) -> Vec<Vec<String>> {
    let mut search = CycleSearch {
        state,
        root: widget_id,
        root_dependencies: dependencies,
        path: Vec::new(),
        finished: HashSet::new(),
        cycles: Vec::new(),
    };
    search.visit(widget_id);
    search.cycles
}

struct CycleSearch<'a> {
    state: &'a RegistryState,
    root: &'a str,
    root_dependencies: &'a [WidgetDependency],
    path: Vec<String>,
    finished: HashSet<String>,
    cycles: Vec<Vec<String>>,
}

impl CycleSearch<'_> {
    fn visit(&mut self, node: &str) {
        if let Some(start) = self.path.iter().position(|p| p == node) {
            let cycle = self.path[start..].to_vec();
            if !self.cycles.contains(&cycle) {
                self.cycles.push(cycle);
            }
            return;
        }
        if self.finished.contains(node) {
            return;
        }

        self.path.push(node.to_string());
        let next: Vec<String> = if node == self.root {
            self.root_dependencies.iter().map(|d| d.id.clone()).collect()
        } else {
            declared_dependencies(self.state, node)
                .iter()
                .map(|d| d.id.clone())
                .collect()
        };
        for dep in next {
            self.visit(&dep);
        }
        self.path.pop();
        self.finished.insert(node.to_string());
    }
}

pub(crate) fn loading_order(
    state: &RegistryState,
    widget_ids: &[String],
) -> WidgetResult<Vec<String>> {
    // Transitive closure of the request.
    let mut nodes: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for id in widget_ids {
        if !state.contains(id) {
            return Err(WidgetError::UnknownWidget(id.clone()));
        }
        if nodes.insert(id.clone()) {
            queue.push_back(id.clone());
        }
    }
    while let Some(id) = queue.pop_front() {
        for dep in declared_dependencies(state, &id) {
            if !state.contains(&dep.id) {
                return Err(WidgetError::UnknownWidget(dep.id.clone()));
            }
            if nodes.insert(dep.id.clone()) {
                queue.push_back(dep.id.clone());
            }
        }
    }

    let mut pending: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in &nodes {
        let distinct: BTreeSet<&str> = declared_dependencies(state, id)
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        pending.insert(id.as_str(), distinct.len());
        for dep in distinct {
            dependents.entry(dep).or_default().push(id.as_str());
        }
    }

    let rank = |id: &str| state.sequence(id).unwrap_or(usize::MAX);
    let mut ready: BTreeSet<(usize, &str)> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| (rank(id), *id))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some((_, id)) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((rank(dependent), *dependent));
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let emitted: HashSet<&str> = order.iter().map(String::as_str).collect();
        let remaining: HashSet<&str> = nodes
            .iter()
            .map(String::as_str)
            .filter(|id| !emitted.contains(id))
            .collect();
        let cycle = find_cycle_in(state, &remaining);
        tracing::warn!(cycle = %cycle.join(" -> "), "Loading order blocked by a dependency cycle");
        return Err(WidgetError::Resolution { cycle });
    }

    Ok(order)
}

/// Every node left after Kahn's algorithm has an unresolved dependency inside
/// `remaining`, so walking those edges must revisit a node.
fn find_cycle_in(state: &RegistryState, remaining: &HashSet<&str>) -> Vec<String> {
    let Some(start) = remaining.iter().min_by_key(|id| state.sequence(id)) else {
        return Vec::new();
    };

    let mut path: Vec<&str> = Vec::new();
    let mut current: &str = start;
    loop {
        if let Some(pos) = path.iter().position(|p| *p == current) {
            return path[pos..].iter().map(|s| s.to_string()).collect();
        }
        path.push(current);
        let next = declared_dependencies(state, current)
            .iter()
            .map(|d| d.id.as_str())
            .find(|dep| remaining.contains(dep));
        match next {
            Some(dep) => current = dep,
            None => return path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub(crate) fn direct_dependencies(state: &RegistryState, widget_id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    declared_dependencies(state, widget_id)
        .iter()
        .filter(|d| d.id != widget_id && seen.insert(d.id.as_str()))
        .map(|d| d.id.clone())
        .collect()
}

/// Breadth-first closure of every id reachable from `widget_id`.
///
/// Unregistered ids are listed but not expanded. `widget_id` itself is listed
/// only when it lies on a cycle.
pub(crate) fn transitive_dependencies(state: &RegistryState, widget_id: &str) -> Vec<String> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::from([widget_id.to_string()]);
    let mut result = Vec::new();

    while let Some(id) = queue.pop_front() {
        for dep in declared_dependencies(state, &id) {
            if visited.insert(dep.id.clone()) {
                result.push(dep.id.clone());
                if state.contains(&dep.id) {
                    queue.push_back(dep.id.clone());
                }
            }
        }
    }
    result
}

pub(crate) fn reverse_dependencies(state: &RegistryState, widget_id: &str) -> Vec<String> {
    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for widget in state.iter() {
        for dep in &widget.dependencies {
            reverse
                .entry(dep.id.as_str())
                .or_default()
                .push(widget.id.as_str());
        }
    }

    let mut found: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([widget_id]);
    while let Some(id) = queue.pop_front() {
        for dependent in reverse.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            if *dependent != widget_id && found.insert(dependent) {
                queue.push_back(dependent);
            }
        }
    }

    state
        .ids()
        .filter(|id| found.contains(id))
        .map(str::to_string)
        .collect()
}

/// One entry per conflicting unordered pair among registered `widget_ids`.
pub(crate) fn conflicts(state: &RegistryState, widget_ids: &[String]) -> Vec<WidgetConflict> {
    let mut seen = HashSet::new();
    let ids: Vec<&String> = widget_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .collect();

    let mut found = Vec::new();
    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            let (Some(wa), Some(wb)) = (state.get(a), state.get(b)) else {
                continue;
            };
            let reason = match (wa.declares_conflict_with(b), wb.declares_conflict_with(a)) {
                (true, true) => format!("'{}' and '{}' declare conflicts with each other", a, b),
                (true, false) => format!("'{}' declares a conflict with '{}'", a, b),
                (false, true) => format!("'{}' declares a conflict with '{}'", b, a),
                (false, false) => continue,
            };
            found.push(WidgetConflict {
                widget1: a.to_string(),
                widget2: b.to_string(),
                reason,
            });
        }
    }
    found
}

pub(crate) fn dependency_graph(state: &RegistryState) -> DependencyGraph {
    let mut graph = DependencyGraph::default();
    for widget in state.iter() {
        graph.nodes.push(GraphNode {
            id: widget.id.clone(),
            title: widget.title.clone(),
            category: widget.category.clone(),
            version: widget.version.clone(),
        });
        for dep in &widget.dependencies {
            graph.edges.push(GraphEdge {
                from: widget.id.clone(),
                to: dep.id.clone(),
                version_constraint: dep.version_constraint.clone(),
            });
        }
    }
    graph
}

pub(crate) fn dependency_issues(
    state: &RegistryState,
    dependencies: &[WidgetDependency],
) -> Vec<DependencyIssue> {
    let mut issues = Vec::new();
    for dep in dependencies {
        let constraint = match dep.constraint() {
            Ok(constraint) => constraint,
            Err(message) => {
                issues.push(DependencyIssue {
                    id: dep.id.clone(),
                    kind: DependencyIssueKind::InvalidConstraint,
                    message,
                });
                continue;
            }
        };

        let Some(target) = state.get(&dep.id) else {
            issues.push(DependencyIssue {
                id: dep.id.clone(),
                kind: DependencyIssueKind::Unregistered,
                message: format!("Dependency '{}' is not registered", dep.id),
            });
            continue;
        };

        match parse_version(&target.version) {
            Ok(version) if !constraint.matches(&version) => issues.push(DependencyIssue {
                id: dep.id.clone(),
                kind: DependencyIssueKind::VersionMismatch,
                message: format!(
                    "Dependency '{}' requires version {} but {} is registered",
                    dep.id, constraint, target.version
                ),
            }),
            Ok(_) => {}
            Err(e) => issues.push(DependencyIssue {
                id: dep.id.clone(),
                kind: DependencyIssueKind::VersionMismatch,
                message: format!(
                    "Dependency '{}' has an unusable version: {}",
                    dep.id,
                    error_message(&e)
                ),
            }),
        }

        if let Some(category) = &dep.category {
            if *category != target.category {
                issues.push(DependencyIssue {
                    id: dep.id.clone(),
                    kind: DependencyIssueKind::CategoryMismatch,
                    message: format!(
                        "Dependency '{}' must be in category '{}' but is in '{}'",
                        dep.id, category, target.category
                    ),
                });
            }
        }
    }
    issues
}
