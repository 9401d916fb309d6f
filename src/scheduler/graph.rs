//! Dependency graph over a suite's tests
//!
//! Produces topological layers: every test lands exactly one layer after the
//! deepest of its dependencies.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;
use crate::models::Test;

pub struct DependencyGraph<'a> {
    tests: &'a [Test],
    /// For each test, the indices of its dependencies
    dependencies: Vec<Vec<usize>>,
    /// For each test, the indices of tests depending on it
    dependents: Vec<Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    /// Build the graph, rejecting duplicate ids and unknown dependencies
    pub fn new(tests: &'a [Test]) -> Result<Self, ConfigError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(tests.len());
        for (i, test) in tests.iter().enumerate() {
            if index.insert(test.id.as_str(), i).is_some() {
                return Err(ConfigError::DuplicateTest(test.id.clone()));
            }
        }

        let mut dependencies = vec![Vec::new(); tests.len()];
        let mut dependents = vec![Vec::new(); tests.len()];

        for (i, test) in tests.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &test.dependencies {
                let &j = index
                    .get(dep.as_str())
                    .ok_or_else(|| ConfigError::UnknownDependency {
                        test: test.id.clone(),
                        dependency: dep.clone(),
                    })?;
                if seen.insert(j) {
                    dependencies[i].push(j);
                    dependents[j].push(i);
                }
            }
        }

        Ok(Self {
            tests,
            dependencies,
            dependents,
        })
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Topological layers of test indices, each layer in suite order
    pub fn layers(&self) -> Result<Vec<Vec<usize>>, ConfigError> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut current: Vec<usize> = (0..self.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut layers = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = Vec::new();
            for &i in &current {
                for &dependent in &self.dependents[i] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            layers.push(current);
            current = next;
        }

        if placed < self.len() {
            let unplaced: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
            return Err(ConfigError::CyclicDependency {
                cycle: self.find_cycle(&unplaced),
            });
        }

        Ok(layers)
    }

    /// Walk dependency edges among unplaced tests until a node repeats
    fn find_cycle(&self, unplaced: &[bool]) -> Vec<String> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state = vec![0u8; self.len()];
        let mut stack = Vec::new();

        for start in (0..self.len()).filter(|&i| unplaced[i]) {
            if state[start] == 0 {
                if let Some(cycle) = self.visit(start, unplaced, &mut state, &mut stack) {
                    return cycle;
                }
            }
        }

        // Unreachable when called with a genuinely cyclic remainder
        (0..self.len())
            .filter(|&i| unplaced[i])
            .map(|i| self.tests[i].id.clone())
            .collect()
    }

    fn visit(
        &self,
        node: usize,
        unplaced: &[bool],
        state: &mut [u8],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        state[node] = 1;
        stack.push(node);

        for &dep in &self.dependencies[node] {
            if !unplaced[dep] {
                continue;
            }
            match state[dep] {
                1 => {
                    let pos = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[pos..]
                        .iter()
                        .map(|&i| self.tests[i].id.clone())
                        .collect();
                    cycle.push(self.tests[dep].id.clone());
                    return Some(cycle);
                }
                0 => {
                    if let Some(cycle) = self.visit(dep, unplaced, state, stack) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        stack.pop();
        state[node] = 2;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_follow_dependencies() {
        let tests = vec![
            Test::new("a", "A"),
            Test::new("b", "B").depends_on("a"),
            Test::new("c", "C"),
            Test::new("d", "D").depends_on("b").depends_on("c"),
        ];
        let graph = DependencyGraph::new(&tests).unwrap();
        let layers = graph.layers().unwrap();
        assert_eq!(layers, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let tests = vec![
            Test::new("a", "A").depends_on("c"),
            Test::new("b", "B").depends_on("a"),
            Test::new("c", "C").depends_on("b"),
            Test::new("d", "D"),
        ];
        let graph = DependencyGraph::new(&tests).unwrap();
        match graph.layers() {
            Err(ConfigError::CyclicDependency { cycle }) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&"d".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let tests = vec![Test::new("a", "A").depends_on("a")];
        let graph = DependencyGraph::new(&tests).unwrap();
        assert_eq!(
            graph.layers(),
            Err(ConfigError::CyclicDependency {
                cycle: vec!["a".into(), "a".into()]
            })
        );
    }

    #[test]
    fn test_duplicate_dependency_edges_are_collapsed() {
        let tests = vec![
            Test::new("a", "A"),
            Test::new("b", "B").depends_on("a").depends_on("a"),
        ];
        let graph = DependencyGraph::new(&tests).unwrap();
        assert_eq!(graph.layers().unwrap(), vec![vec![0], vec![1]]);
    }
}
