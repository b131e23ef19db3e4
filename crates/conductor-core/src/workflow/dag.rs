//! Dependency resolution: ready-set computation for sequential runs and
//! level grouping for parallel runs.
//!
//! Uses `petgraph` to model step dependencies as a directed graph. A
//! topological sort detects cycles; levels are then assigned in topological
//! order so each step's level is `1 + max(level of its dependencies)`.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::DiGraph;

use conductor_types::workflow::{StepDefinition, StepStatus, WorkflowStep};

use super::definition::WorkflowError;

/// Anything with an id and a dependency list.
pub trait DagNode {
    fn node_id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

impl DagNode for StepDefinition {
    fn node_id(&self) -> &str {
        &self.id
    }
    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl DagNode for WorkflowStep {
    fn node_id(&self) -> &str {
        &self.id
    }
    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

// ---------------------------------------------------------------------------
// Sequential: ready set
// ---------------------------------------------------------------------------

/// Pending steps whose every dependency has reached a terminal state.
///
/// A failed or skipped dependency still counts as completed; only a
/// dependency that is missing from the workflow (or stuck on a cycle) keeps
/// a step from ever becoming ready.
pub fn ready_steps(steps: &[WorkflowStep]) -> Vec<String> {
    let completed: HashSet<&str> = steps
        .iter()
        .filter(|s| s.status.is_terminal())
        .map(|s| s.id.as_str())
        .collect();

    steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .filter(|s| s.depends_on.iter().all(|d| completed.contains(d.as_str())))
        .map(|s| s.id.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Parallel: levels
// ---------------------------------------------------------------------------

/// Steps grouped by dependency level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelPlan {
    /// `levels[k]` holds the ids at level `k`, in definition order.
    pub levels: Vec<Vec<String>>,
    /// Steps that depend (directly or transitively) on an id not in the
    /// workflow. They never run.
    pub unresolved: Vec<String>,
}

/// Group steps into levels. Fails fast on a dependency cycle.
pub fn compute_levels<N: DagNode>(steps: &[N]) -> Result<LevelPlan, WorkflowError> {
    let ids: HashSet<&str> = steps.iter().map(|s| s.node_id()).collect();
    let unresolved = unresolved_steps(steps, &ids);

    // Build directed graph: edge from dependency -> dependent
    let mut graph = DiGraph::<&str, ()>::new();
    let index: HashMap<&str, _> = steps
        .iter()
        .map(|s| (s.node_id(), graph.add_node(s.node_id())))
        .collect();
    for step in steps {
        for dep in step.dependencies() {
            if let Some(&from) = index.get(dep.as_str()) {
                graph.add_edge(from, index[step.node_id()], ());
            }
        }
    }

    let sorted = toposort(&graph, None).map_err(|_| {
        let mut members: Vec<String> = tarjan_scc(&graph)
            .into_iter()
            .find(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .unwrap_or_default()
            .into_iter()
            .map(|n| graph[n].to_string())
            .collect();
        members.sort();
        WorkflowError::CyclicDependency(members)
    })?;

    let by_id: HashMap<&str, &N> = steps.iter().map(|s| (s.node_id(), s)).collect();
    let mut level_of: HashMap<&str, usize> = HashMap::new();
    for node in sorted {
        let id = graph[node];
        if unresolved.contains(id) {
            continue;
        }
        let level = by_id[id]
            .dependencies()
            .iter()
            .filter_map(|d| level_of.get(d.as_str()))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id, level);
    }

    let depth = level_of.values().copied().max().map_or(0, |m| m + 1);
    let mut levels = vec![Vec::new(); depth];
    for step in steps {
        if let Some(&level) = level_of.get(step.node_id()) {
            levels[level].push(step.node_id().to_string());
        }
    }

    Ok(LevelPlan {
        levels,
        unresolved: steps
            .iter()
            .map(|s| s.node_id())
            .filter(|id| unresolved.contains(id))
            .map(String::from)
            .collect(),
    })
}

/// Fixed point: a step is unresolved if any dependency is missing or
/// itself unresolved.
fn unresolved_steps<'a, N: DagNode>(steps: &'a [N], ids: &HashSet<&str>) -> HashSet<&'a str> {
    let mut unresolved: HashSet<&str> = HashSet::new();
    loop {
        let before = unresolved.len();
        for step in steps {
            if unresolved.contains(step.node_id()) {
                continue;
            }
            let blocked = step
                .dependencies()
                .iter()
                .any(|d| !ids.contains(d.as_str()) || unresolved.contains(d.as_str()));
            if blocked {
                unresolved.insert(step.node_id());
            }
        }
        if unresolved.len() == before {
            return unresolved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        WorkflowStep::from(StepDefinition {
            id: id.to_string(),
            command: format!("run {id}"),
            agent: "auto".to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            retry_count: 1,
            timeout_secs: 10,
            condition: None,
        })
    }

    #[test]
    fn independent_steps_share_level_zero() {
        let plan = compute_levels(&[step("a", &[]), step("b", &[]), step("c", &[])]).unwrap();
        assert_eq!(plan.levels, vec![vec!["a", "b", "c"]]);
        assert!(plan.unresolved.is_empty());
    }

    #[test]
    fn diamond_produces_three_levels() {
        let steps = [
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ];
        let plan = compute_levels(&steps).unwrap();
        assert_eq!(plan.levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn level_is_one_past_deepest_dependency() {
        let steps = [
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["b"]),
            step("d", &["a", "c"]),
        ];
        let plan = compute_levels(&steps).unwrap();
        assert_eq!(plan.levels[3], vec!["d"]);
    }

    #[test]
    fn missing_dependency_is_unresolved_transitively() {
        let steps = [step("a", &[]), step("b", &["ghost"]), step("c", &["b"])];
        let plan = compute_levels(&steps).unwrap();
        assert_eq!(plan.levels, vec![vec!["a"]]);
        assert_eq!(plan.unresolved, vec!["b", "c"]);
    }

    #[test]
    fn cycle_fails_fast_naming_members() {
        let steps = [step("a", &["c"]), step("b", &["a"]), step("c", &["b"]), step("d", &[])];
        match compute_levels(&steps) {
            Err(WorkflowError::CyclicDependency(members)) => {
                assert_eq!(members, vec!["a", "b", "c"]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn ready_steps_unblock_on_any_terminal_state() {
        let mut steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["ghost"])];
        assert_eq!(ready_steps(&steps), vec!["a"]);

        steps[0].status = StepStatus::Failed;
        assert_eq!(ready_steps(&steps), vec!["b"]);

        steps[1].status = StepStatus::Skipped;
        assert!(ready_steps(&steps).is_empty(), "c can never become ready");
    }
}
