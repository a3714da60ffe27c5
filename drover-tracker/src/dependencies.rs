//! Dependency parsing and graph validation
//!
//! Dependencies are declared in free text inside issue bodies as
//! `depends on #N` or `blocked by #N` (case-insensitive, comma-separated
//! lists allowed). A cyclic declaration set is rejected up front; a cycle
//! that slipped through would stall the scheduler forever.

use std::collections::{HashMap, HashSet};

use crate::Issue;

const DEPENDENCY_MARKERS: [&str; 2] = ["depends on", "blocked by"];

/// Parse dependency issue numbers from an issue body.
///
/// Scans for `depends on` / `blocked by` markers and collects the `#N`
/// references on the rest of that line, including comma-separated lists
/// like `depends on #10, #11`.
pub fn parse_dependencies(body: &str) -> Vec<u64> {
    let mut numbers = Vec::new();
    // issue references are ASCII, so scanning the lowercased text is safe
    let lower = body.to_lowercase();

    for marker in DEPENDENCY_MARKERS {
        let mut search_from = 0;
        while let Some(pos) = lower[search_from..].find(marker) {
            let start = search_from + pos + marker.len();
            let line_end = lower[start..]
                .find('\n')
                .map(|i| start + i)
                .unwrap_or(lower.len());

            for segment in lower[start..line_end].split(',') {
                if let Some(number) = parse_issue_number(segment) {
                    if !numbers.contains(&number) {
                        numbers.push(number);
                    }
                }
            }

            search_from = line_end;
        }
    }

    numbers
}

/// Parse a single `#N` reference out of a text segment.
fn parse_issue_number(segment: &str) -> Option<u64> {
    let hash = segment.find('#')?;
    let digits: String = segment[hash + 1..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Dependency graph over a set of issue numbers
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// issue number -> issues it depends on (restricted to the known set)
    pub dependencies: HashMap<u64, Vec<u64>>,
    /// issue number -> issues that depend on it
    pub dependents: HashMap<u64, Vec<u64>>,
    /// issues with no unmet dependencies inside the set
    pub ready: HashSet<u64>,
    /// issues blocked by another issue in the set
    pub blocked: HashSet<u64>,
}

impl DependencyGraph {
    /// Build a graph from tracker issues, parsing dependencies from bodies.
    pub fn from_issues(issues: &[Issue]) -> Self {
        Self::from_pairs(issues.iter().map(|i| (i.number, i.dependencies())))
    }

    /// Build a graph from explicit `(issue, dependencies)` pairs.
    ///
    /// Dependency references outside the supplied set are dropped: they can
    /// never be satisfied within one run, and readiness must not wait on them.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u64, Vec<u64>)>) -> Self {
        let pairs: Vec<(u64, Vec<u64>)> = pairs.into_iter().collect();
        let known: HashSet<u64> = pairs.iter().map(|(n, _)| *n).collect();

        let mut graph = Self::default();
        for (number, deps) in pairs {
            let deps: Vec<u64> = deps.into_iter().filter(|d| known.contains(d)).collect();

            for dep in &deps {
                graph.dependents.entry(*dep).or_default().push(number);
            }

            if deps.is_empty() {
                graph.ready.insert(number);
            } else {
                graph.blocked.insert(number);
            }
            graph.dependencies.insert(number, deps);
        }

        graph
    }

    /// Find dependency cycles. Each returned vector is one cycle path.
    pub fn find_cycles(&self) -> Vec<Vec<u64>> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::new();

        let mut nodes: Vec<u64> = self.dependencies.keys().copied().collect();
        nodes.sort_unstable();

        for node in nodes {
            if !visited.contains(&node) {
                let mut stack = HashSet::new();
                let mut path = Vec::new();
                if let Some(cycle) = self.walk(node, &mut visited, &mut stack, &mut path) {
                    cycles.push(cycle);
                }
            }
        }

        cycles
    }

    fn walk(
        &self,
        node: u64,
        visited: &mut HashSet<u64>,
        stack: &mut HashSet<u64>,
        path: &mut Vec<u64>,
    ) -> Option<Vec<u64>> {
        visited.insert(node);
        stack.insert(node);
        path.push(node);

        for &dep in self.dependencies.get(&node).into_iter().flatten() {
            if stack.contains(&dep) {
                let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                return Some(path[start..].to_vec());
            }
            if !visited.contains(&dep) {
                if let Some(cycle) = self.walk(dep, visited, stack, path) {
                    return Some(cycle);
                }
            }
        }

        stack.remove(&node);
        path.pop();
        None
    }

    /// Topological order with dependencies before dependents.
    ///
    /// Returns `None` when the graph contains a cycle.
    pub fn topological_order(&self) -> Option<Vec<u64>> {
        let mut in_degree: HashMap<u64, usize> = self
            .dependencies
            .iter()
            .map(|(n, deps)| (*n, deps.len()))
            .collect();

        let mut queue: Vec<u64> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        queue.sort_unstable();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(node) = queue.pop() {
            order.push(node);
            for &dependent in self.dependents.get(&node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(dependent);
                    }
                }
            }
        }

        if order.len() == in_degree.len() {
            Some(order)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IssueState;

    fn make_issue(number: u64, body: &str) -> Issue {
        Issue {
            number,
            title: format!("Issue {}", number),
            body: body.to_string(),
            state: IssueState::Open,
        }
    }

    #[test]
    fn test_parse_single_dependency() {
        assert_eq!(parse_dependencies("Depends on #15"), vec![15]);
        assert_eq!(parse_dependencies("blocked by #7"), vec![7]);
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(parse_dependencies("DEPENDS ON #3"), vec![3]);
        assert_eq!(parse_dependencies("Blocked By #4"), vec![4]);
    }

    #[test]
    fn test_parse_comma_separated() {
        assert_eq!(parse_dependencies("depends on #10, #11, #12"), vec![10, 11, 12]);
    }

    #[test]
    fn test_parse_multiple_lines_deduped() {
        let body = "Depends on #5\nSome text\nBlocked by #5, #6";
        assert_eq!(parse_dependencies(body), vec![5, 6]);
    }

    #[test]
    fn test_parse_ignores_plain_references() {
        assert!(parse_dependencies("See #99 for context").is_empty());
    }

    #[test]
    fn test_graph_ready_and_blocked() {
        let issues = vec![
            make_issue(1, ""),
            make_issue(2, "depends on #1"),
            make_issue(3, "unrelated"),
        ];
        let graph = DependencyGraph::from_issues(&issues);

        assert!(graph.ready.contains(&1));
        assert!(graph.ready.contains(&3));
        assert!(graph.blocked.contains(&2));
        assert_eq!(graph.dependents.get(&1), Some(&vec![2]));
    }

    #[test]
    fn test_graph_drops_unknown_dependencies() {
        let issues = vec![make_issue(1, "depends on #999")];
        let graph = DependencyGraph::from_issues(&issues);
        assert!(graph.ready.contains(&1));
    }

    #[test]
    fn test_cycle_detection() {
        let graph = DependencyGraph::from_pairs(vec![(1, vec![2]), (2, vec![1])]);
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
        assert!(graph.topological_order().is_none());
    }

    #[test]
    fn test_self_cycle() {
        let graph = DependencyGraph::from_pairs(vec![(1, vec![1])]);
        assert!(!graph.find_cycles().is_empty());
    }

    #[test]
    fn test_acyclic_has_no_cycles() {
        let graph = DependencyGraph::from_pairs(vec![(1, vec![]), (2, vec![1]), (3, vec![1, 2])]);
        assert!(graph.find_cycles().is_empty());
    }

    #[test]
    fn test_topological_order() {
        let graph = DependencyGraph::from_pairs(vec![(1, vec![]), (2, vec![1]), (3, vec![2])]);
        let order = graph.topological_order().unwrap();

        let pos = |n: u64| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(1) < pos(2));
        assert!(pos(2) < pos(3));
    }
}
