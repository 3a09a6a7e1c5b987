//! Dependency resolution for box packages
//!
//! Parses `apt-rdepends` reports into a dependency graph and flattens it into
//! an install order where every dependency precedes its dependents.
//! Uses iterative DFS with state tracking to avoid stack overflow on deep graphs.
//!
//! A report looks like this:
//!
//! ```text
//! python3
//!   Depends: python3-minimal (= 3.11.2-1+b1)
//!   Depends: libpython3-stdlib [NotInstalled]
//! python3-minimal
//!   PreDepends: libc6 (>= 2.36)
//! ```
//!
//! Lines without `Depends` name the current package; lines with it add an
//! edge from the current package to the second token. A trailing
//! `[NotInstalled]` marks the dependency as unavailable: it is still walked
//! for its own dependencies but never emitted.

use crate::error::{BoxError, Result};
use crate::exec::CommandRunner;
use serde::Serialize;
use std::collections::HashMap;

/// External tool producing the dependency report.
pub const REPORT_TOOL: &str = "apt-rdepends";

const DEPENDS_MARKER: &str = "Depends";
const NOT_INSTALLED_MARKER: &str = "[NotInstalled]";

/// Node state for DFS traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Not yet visited
    Unprocessed,
    /// Currently being processed (on the stack)
    Processing,
    /// Fully processed (all dependencies emitted)
    Processed,
}

#[derive(Debug, Clone, Default)]
struct PackageNode {
    /// Direct dependencies, in report order, without duplicates
    deps: Vec<String>,
    /// Dependency is not installable and must not be emitted
    unavailable: bool,
}

/// A package dependency graph for topological sorting
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    nodes: HashMap<String, PackageNode>,
    /// Packages with at least one recorded edge, in order of their first edge.
    /// These are the traversal roots.
    roots: Vec<String>,
}

impl DepGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete report.
    pub fn from_report(report: &str) -> Result<Self> {
        let mut graph = Self::new();
        graph.parse_report(report.lines())?;
        Ok(graph)
    }

    /// Record that `package` depends on `dependency`.
    pub fn add_dependency(&mut self, package: &str, dependency: &str) {
        let node = self.nodes.entry(package.to_string()).or_default();
        if node.deps.is_empty() {
            self.roots.push(package.to_string());
        }
        if !node.deps.iter().any(|d| d == dependency) {
            node.deps.push(dependency.to_string());
        }
        self.nodes.entry(dependency.to_string()).or_default();
    }

    /// Mark a package as not installable.
    pub fn mark_unavailable(&mut self, package: &str) {
        self.nodes.entry(package.to_string()).or_default().unavailable = true;
    }

    /// Add the edges of one report to the graph.
    ///
    /// Fails with [`BoxError::MalformedReport`] on a `Depends` line without a
    /// package name or one that appears before any package header.
    pub fn parse_report<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current: Option<String> = None;

        for raw in lines {
            let line = raw.as_ref().trim();
            if line.is_empty() {
                continue;
            }

            if !line.contains(DEPENDS_MARKER) {
                current = Some(line.to_string());
                continue;
            }

            let malformed = || BoxError::MalformedReport {
                line: line.to_string(),
            };
            let dependency = line.split_whitespace().nth(1).ok_or_else(malformed)?;
            let package = current.as_deref().ok_or_else(malformed)?;

            self.add_dependency(package, dependency);
            if line.split_whitespace().last() == Some(NOT_INSTALLED_MARKER) {
                self.mark_unavailable(dependency);
            }
        }

        Ok(())
    }

    /// Check if a package is known to the graph (as a header or an edge target)
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies of a package
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.nodes.get(name).map(|n| n.deps.as_slice()).unwrap_or_default()
    }

    /// Whether a package was reported as not installed
    pub fn is_unavailable(&self, name: &str) -> bool {
        self.nodes.get(name).is_some_and(|n| n.unavailable)
    }

    /// Post-order DFS from every package that has dependencies.
    ///
    /// Each package is visited once, so cycles and diamonds are harmless.
    /// Unavailable packages are walked but left out of the result. The same
    /// graph always yields the same order.
    pub fn install_order(&self) -> InstallOrder {
        let mut state: HashMap<&str, NodeState> = HashMap::new();
        let mut result = Vec::new();

        for root in &self.roots {
            self.dfs_visit(root, &mut state, &mut result);
        }

        InstallOrder(result)
    }

    /// Iterative DFS with explicit stack to avoid recursion limits
    fn dfs_visit<'g>(
        &'g self,
        start: &'g str,
        state: &mut HashMap<&'g str, NodeState>,
        result: &mut Vec<String>,
    ) {
        // Stack holds (node_name, index_of_next_child_to_visit)
        let mut stack: Vec<(&'g str, usize)> = vec![(start, 0)];

        while let Some((node, child_idx)) = stack.pop() {
            let deps = self.dependencies(node);

            match state.get(node).copied().unwrap_or(NodeState::Unprocessed) {
                NodeState::Processed => continue,
                NodeState::Processing => {
                    if child_idx >= deps.len() {
                        // All children processed - finalize this node
                        state.insert(node, NodeState::Processed);
                        if !self.is_unavailable(node) {
                            result.push(node.to_string());
                        }
                        continue;
                    }
                }
                NodeState::Unprocessed => {
                    state.insert(node, NodeState::Processing);
                }
            }

            // Descend into the first child not seen yet. A child that is
            // still Processing is a back edge of a cycle and is skipped.
            let next = deps.iter().enumerate().skip(child_idx).find(|(_, dep)| {
                state.get(dep.as_str()).copied().unwrap_or(NodeState::Unprocessed)
                    == NodeState::Unprocessed
            });

            match next {
                Some((i, dep)) => {
                    stack.push((node, i + 1));
                    stack.push((dep.as_str(), 0));
                }
                None => stack.push((node, deps.len())),
            }
        }
    }
}

/// Packages in install order: dependencies first, no duplicates, no
/// unavailable packages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InstallOrder(Vec<String>);

impl InstallOrder {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// Position of a package in the order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|p| p == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }
}

impl IntoIterator for InstallOrder {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a InstallOrder {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<InstallOrder> for Vec<String> {
    fn from(order: InstallOrder) -> Self {
        order.0
    }
}

/// Query the report tool for every requested package and return the
/// combined install order.
///
/// Runs one `apt-rdepends -p <package>` per package, in sequence, under the
/// runner's current context. Requested packages without any dependency edge
/// in the report do not appear in the result.
pub fn build_install_order<S: AsRef<str>>(runner: &CommandRunner, packages: &[S]) -> Result<InstallOrder> {
    let mut graph = DepGraph::new();
    for package in packages {
        let report = runner.output(REPORT_TOOL, ["-p", package.as_ref()])?;
        graph.parse_report(&report)?;
    }
    Ok(graph.install_order())
}
