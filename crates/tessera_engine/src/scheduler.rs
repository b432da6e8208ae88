//! # Execution-Group Scheduler
//!
//! Partitions the registered systems into groups that are safe to run side
//! by side, honoring every pairwise Before / After claim.
//!
//! ## Algorithm
//!
//! ```text
//! 1. Ask every system about every other one:
//!        A.ordering(B) == Before  =>  edge A -> B
//!        A.ordering(B) == After   =>  edge B -> A
//! 2. Kahn's algorithm over the edges; leftover nodes mean a cycle,
//!    reported with the systems on it (DFS path extraction).
//! 3. level(S) = 0 without predecessors, else 1 + max level(predecessor)
//! 4. Group = weakly connected component of the edge graph,
//!    systems inside it bucketed by level.
//! ```
//!
//! ## Execution
//!
//! ```text
//! group 0: [B] -> [A] -> [C]     levels in sequence,
//! group 1: [D]                   systems of one level in parallel,
//! group 2: [E, F]                groups in parallel with each other
//! ```
//!
//! Groups share no ordering edge, so nothing forces an order between them.
//! The plan is computed once when the engine is built.

use std::collections::{BTreeSet, VecDeque};

use rayon::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::system::{System, SystemOrdering};

/// Systems connected by ordering constraints, bucketed by level.
///
/// Systems are referred to by their registration index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemExecutionGroup {
    levels: Vec<Vec<usize>>,
}

impl SystemExecutionGroup {
    /// Levels in execution order; systems within a level may run
    /// concurrently and are listed by registration index.
    #[must_use]
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// All systems of the group in level order.
    pub fn systems(&self) -> impl Iterator<Item = usize> + '_ {
        self.levels.iter().flatten().copied()
    }

    /// Number of systems in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Returns true if the group holds no system.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn run<F>(&self, work: &F) -> EngineResult<u64>
    where
        F: Fn(usize) -> EngineResult<u64> + Sync,
    {
        let mut total = 0;
        for level in &self.levels {
            if let [only] = level.as_slice() {
                total += work(*only)?;
                continue;
            }
            let results: Vec<EngineResult<u64>> = level.par_iter().map(|&index| work(index)).collect();
            for result in results {
                total += result?;
            }
        }
        Ok(total)
    }
}

/// The execution groups of an engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    groups: Vec<SystemExecutionGroup>,
    system_count: usize,
}

impl ExecutionPlan {
    /// Computes the plan for `systems`.
    ///
    /// # Errors
    ///
    /// [`EngineError::OrderingCycle`] if the Before / After claims contain
    /// a cycle, including two systems that each claim to run first.
    pub fn build(systems: &[&dyn System]) -> EngineResult<Self> {
        let count = systems.len();
        let edges = collect_edges(systems);

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];
        for &(from, to) in &edges {
            successors[from].push(to);
            neighbors[from].push(to);
            neighbors[to].push(from);
            in_degree[to] += 1;
        }

        // Kahn's algorithm, assigning levels on the way.
        let mut level = vec![0usize; count];
        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = 0;
        while let Some(node) = queue.pop_front() {
            sorted += 1;
            for &next in &successors[node] {
                level[next] = level[next].max(level[node] + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if sorted != count {
            let cycle = find_cycle(&successors)
                .unwrap_or_default()
                .into_iter()
                .map(|index| systems[index].name().to_owned())
                .collect();
            return Err(EngineError::OrderingCycle { cycle });
        }

        // Weakly connected components, seeded in registration order.
        let mut assigned = vec![false; count];
        let mut groups = Vec::new();
        for seed in 0..count {
            if assigned[seed] {
                continue;
            }
            assigned[seed] = true;
            let mut members = vec![seed];
            let mut frontier = vec![seed];
            while let Some(node) = frontier.pop() {
                for &other in &neighbors[node] {
                    if !assigned[other] {
                        assigned[other] = true;
                        members.push(other);
                        frontier.push(other);
                    }
                }
            }
            members.sort_unstable();

            let depth = members.iter().map(|&m| level[m]).max().unwrap_or(0);
            let mut levels = vec![Vec::new(); depth + 1];
            for member in members {
                levels[level[member]].push(member);
            }
            levels.retain(|bucket| !bucket.is_empty());
            groups.push(SystemExecutionGroup { levels });
        }

        Ok(Self {
            groups,
            system_count: count,
        })
    }

    /// Groups in order of their earliest-registered member.
    #[must_use]
    pub fn groups(&self) -> &[SystemExecutionGroup] {
        &self.groups
    }

    /// One sequential order that honors every constraint: groups in order,
    /// each in level order.
    #[must_use]
    pub fn flattened(&self) -> Vec<usize> {
        self.groups.iter().flat_map(SystemExecutionGroup::systems).collect()
    }

    /// Number of systems covered by the plan.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.system_count
    }

    /// Runs `work` for every system: groups concurrently, levels in
    /// sequence, systems of one level concurrently.
    ///
    /// Returns the sum of the counts reported by `work`. When several
    /// systems fail, the error of the earliest group wins.
    pub(crate) fn run<F>(&self, work: F) -> EngineResult<u64>
    where
        F: Fn(usize) -> EngineResult<u64> + Sync,
    {
        let results: Vec<EngineResult<u64>> = if self.groups.len() == 1 {
            vec![self.groups[0].run(&work)]
        } else {
            self.groups.par_iter().map(|group| group.run(&work)).collect()
        };

        results
            .into_iter()
            .try_fold(0, |total, result| result.map(|count| total + count))
    }
}

fn collect_edges(systems: &[&dyn System]) -> BTreeSet<(usize, usize)> {
    let mut edges = BTreeSet::new();
    for (i, system) in systems.iter().enumerate() {
        for (j, other) in systems.iter().enumerate() {
            if i == j {
                continue;
            }
            match system.ordering(*other) {
                SystemOrdering::Before => {
                    edges.insert((i, j));
                }
                SystemOrdering::After => {
                    edges.insert((j, i));
                }
                SystemOrdering::Concurrent => {}
            }
        }
    }
    edges
}

/// Returns one cycle as a node path whose first node is repeated at the end.
fn find_cycle(successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut visited = vec![false; successors.len()];
    let mut on_stack = vec![false; successors.len()];
    let mut path = Vec::new();

    for start in 0..successors.len() {
        if !visited[start] {
            if let Some(cycle) = dfs_find_cycle(start, successors, &mut visited, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn dfs_find_cycle(
    node: usize,
    successors: &[Vec<usize>],
    visited: &mut [bool],
    on_stack: &mut [bool],
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited[node] = true;
    on_stack[node] = true;
    path.push(node);

    for &next in &successors[node] {
        if !visited[next] {
            if let Some(cycle) = dfs_find_cycle(next, successors, visited, on_stack, path) {
                return Some(cycle);
            }
        } else if on_stack[next] {
            let start = path.iter().position(|&n| n == next).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(next);
            return Some(cycle);
        }
    }

    path.pop();
    on_stack[node] = false;
    None
}
