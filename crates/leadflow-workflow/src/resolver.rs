//! Dependency resolution: build the step DAG, detect cycles, and produce
//! parallelizable execution groups.
//!
//! Two addressing modes coexist in `depends_on`: author-assigned
//! `step_order` values and array indices. Entries are coerced to array
//! indices by preferring a `step_order` match, then accepting an in-range
//! array index, and dropping anything else with a validation error.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::step::WorkflowStep;
use crate::ValidationReport;

/// One topological layer of the DAG.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionGroup {
    pub group_index: usize,
    pub step_indices: Vec<usize>,
    pub can_run_in_parallel: bool,
}

/// Output of [`resolve_execution_groups`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionPlan {
    pub execution_groups: Vec<ExecutionGroup>,
    pub total_steps: usize,
}

/// Coerce a raw `depends_on` entry to an integer.
///
/// Accepts integers, floats with no fractional part, and stringly-typed
/// integers. Returns `(value, was_coerced)`; `None` for anything else.
pub fn coerce_dependency_value(value: &serde_json::Value) -> (Option<i64>, bool) {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                (Some(i), false)
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    (Some(f as i64), true)
                } else {
                    (None, false)
                }
            } else {
                (None, false)
            }
        }
        serde_json::Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => (Some(i), true),
            Err(_) => (None, false),
        },
        _ => (None, false),
    }
}

fn build_order_to_index(steps: &[WorkflowStep]) -> HashMap<i64, usize> {
    let mut order_to_index = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        order_to_index.insert(step.step_order, index);
    }
    order_to_index
}

/// Normalize a dependency value (step_order or array index) to an array
/// index. `None` for out-of-range values and self-dependencies.
fn normalize_dependency_index(
    dep_value: i64,
    order_to_index: &HashMap<i64, usize>,
    steps_len: usize,
    current_index: usize,
) -> Option<usize> {
    let dep_index = if let Some(&idx) = order_to_index.get(&dep_value) {
        idx
    } else if dep_value >= 0 && (dep_value as usize) < steps_len {
        dep_value as usize
    } else {
        return None;
    };

    if dep_index >= steps_len || dep_index == current_index {
        return None;
    }
    Some(dep_index)
}

/// Build the dependency graph: step index → dependency indices.
///
/// Steps without an explicit `depends_on` (absent or empty) implicitly
/// depend on every step with a strictly smaller `step_order`.
pub fn build_dependency_graph(steps: &[WorkflowStep]) -> HashMap<usize, Vec<usize>> {
    let order_to_index = build_order_to_index(steps);
    let mut dependencies = HashMap::new();

    for (index, step) in steps.iter().enumerate() {
        let mut deps = Vec::new();
        match step.depends_on.as_deref().filter(|d| !d.is_empty()) {
            Some(raw_deps) => {
                for dep_value in raw_deps {
                    let (coerced, _) = coerce_dependency_value(dep_value);
                    let Some(coerced) = coerced else { continue };
                    if let Some(dep_index) =
                        normalize_dependency_index(coerced, &order_to_index, steps.len(), index)
                    {
                        deps.push(dep_index);
                    }
                }
            }
            None => {
                for (i, other) in steps.iter().enumerate() {
                    if other.step_order < step.step_order {
                        deps.push(i);
                    }
                }
            }
        }
        dependencies.insert(index, deps);
    }

    dependencies
}

fn has_internal_dependencies(
    step_indices: &[usize],
    dependencies: &HashMap<usize, Vec<usize>>,
) -> bool {
    let group: HashSet<usize> = step_indices.iter().copied().collect();
    step_indices.iter().any(|idx| {
        dependencies
            .get(idx)
            .map(|deps| deps.iter().any(|d| group.contains(d)))
            .unwrap_or(false)
    })
}

/// Group steps into batches that can run in parallel.
///
/// Iteratively collects the ready set (all dependencies completed) and
/// emits it as one group. An empty ready set before completion means the
/// graph has a cycle; resolution stops gracefully and the cycle is
/// reported by [`validate_dependencies`].
pub fn resolve_execution_groups(steps: &[WorkflowStep]) -> ExecutionPlan {
    if steps.is_empty() {
        return ExecutionPlan::default();
    }

    let dependencies = build_dependency_graph(steps);
    let mut execution_groups = Vec::new();
    let mut completed: HashSet<usize> = HashSet::new();
    let mut group_index = 0;

    while completed.len() < steps.len() {
        let ready_steps: Vec<usize> = (0..steps.len())
            .filter(|i| !completed.contains(i))
            .filter(|i| {
                dependencies
                    .get(i)
                    .map(|deps| deps.iter().all(|d| completed.contains(d)))
                    .unwrap_or(true)
            })
            .collect();

        if ready_steps.is_empty() {
            tracing::warn!(
                completed = completed.len(),
                total = steps.len(),
                "no ready steps found; possible circular dependency"
            );
            break;
        }

        let parallel = ready_steps.len() > 1
            && !has_internal_dependencies(&ready_steps, &dependencies);

        completed.extend(ready_steps.iter().copied());
        execution_groups.push(ExecutionGroup {
            group_index,
            can_run_in_parallel: parallel || ready_steps.len() == 1,
            step_indices: ready_steps,
        });
        group_index += 1;
    }

    ExecutionPlan {
        execution_groups,
        total_steps: steps.len(),
    }
}

/// Steps whose dependencies are all satisfied by `completed_step_indices`.
pub fn get_ready_steps(completed_step_indices: &[usize], steps: &[WorkflowStep]) -> Vec<usize> {
    let completed: HashSet<usize> = completed_step_indices.iter().copied().collect();
    let dependencies = build_dependency_graph(steps);

    (0..steps.len())
        .filter(|i| !completed.contains(i))
        .filter(|i| {
            dependencies
                .get(i)
                .map(|deps| deps.iter().all(|d| completed.contains(d)))
                .unwrap_or(true)
        })
        .collect()
}

/// State of one step relative to the completed/running sets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Completed,
    Running,
    Ready,
    Waiting,
}

/// Project the state of every step from the completed and running sets.
pub fn get_step_states(
    completed_step_indices: &[usize],
    running_step_indices: &[usize],
    steps: &[WorkflowStep],
) -> HashMap<usize, StepState> {
    let completed: HashSet<usize> = completed_step_indices.iter().copied().collect();
    let running: HashSet<usize> = running_step_indices.iter().copied().collect();
    let ready: HashSet<usize> = get_ready_steps(completed_step_indices, steps)
        .into_iter()
        .collect();

    (0..steps.len())
        .map(|index| {
            let state = if completed.contains(&index) {
                StepState::Completed
            } else if running.contains(&index) {
                StepState::Running
            } else if ready.contains(&index) {
                StepState::Ready
            } else {
                StepState::Waiting
            };
            (index, state)
        })
        .collect()
}

/// Validate dependency declarations: invalid references, self-dependencies,
/// and cycles. Each invalid `depends_on` entry yields exactly one error.
pub fn validate_dependencies(steps: &[WorkflowStep]) -> ValidationReport {
    if steps.is_empty() {
        return ValidationReport::valid();
    }

    let order_to_index = build_order_to_index(steps);
    let mut errors = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        let Some(raw_deps) = &step.depends_on else { continue };
        for dep_value in raw_deps {
            let (coerced, _) = coerce_dependency_value(dep_value);
            let Some(coerced) = coerced else {
                errors.push(format!(
                    "Step {} ({}): depends_on contains invalid value {}",
                    step.step_order, step.step_name, dep_value
                ));
                continue;
            };

            if normalize_dependency_index(coerced, &order_to_index, steps.len(), index).is_none() {
                if order_to_index.contains_key(&coerced) {
                    errors.push(format!(
                        "Step {} ({}): depends_on step_order {} is invalid (could be self-dependency or step doesn't exist)",
                        step.step_order, step.step_name, coerced
                    ));
                } else if coerced >= 0 && (coerced as usize) < steps.len() {
                    errors.push(format!(
                        "Step {} ({}): depends_on array index {} is invalid (could be self-dependency)",
                        step.step_order, step.step_name, coerced
                    ));
                } else {
                    let mut valid_orders: Vec<i64> = order_to_index.keys().copied().collect();
                    valid_orders.sort_unstable();
                    errors.push(format!(
                        "Step {} ({}): depends_on value {} is out of range (valid step_orders: {:?}, valid array indices: 0-{})",
                        step.step_order,
                        step.step_name,
                        coerced,
                        valid_orders,
                        steps.len() - 1
                    ));
                }
            }
        }
    }

    // DFS cycle detection over the normalized graph.
    let dependencies = build_dependency_graph(steps);
    let mut visited: HashSet<usize> = HashSet::new();
    let mut rec_stack: HashSet<usize> = HashSet::new();

    fn has_cycle(
        node: usize,
        dependencies: &HashMap<usize, Vec<usize>>,
        visited: &mut HashSet<usize>,
        rec_stack: &mut HashSet<usize>,
    ) -> bool {
        if rec_stack.contains(&node) {
            return true;
        }
        if visited.contains(&node) {
            return false;
        }
        visited.insert(node);
        rec_stack.insert(node);
        if let Some(deps) = dependencies.get(&node) {
            for &dep in deps {
                if has_cycle(dep, dependencies, visited, rec_stack) {
                    return true;
                }
            }
        }
        rec_stack.remove(&node);
        false
    }

    for i in 0..steps.len() {
        if !visited.contains(&i) && has_cycle(i, &dependencies, &mut visited, &mut rec_stack) {
            errors.push(format!(
                "Circular dependency detected involving step {} ({})",
                i, steps[i].step_name
            ));
            break;
        }
    }

    if errors.is_empty() {
        ValidationReport::valid()
    } else {
        ValidationReport::invalid(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepKind;
    use serde_json::json;

    fn step(name: &str, order: i64) -> WorkflowStep {
        WorkflowStep::new(name, order, StepKind::AiGeneration)
    }

    fn step_with_deps(name: &str, order: i64, deps: Vec<serde_json::Value>) -> WorkflowStep {
        let mut s = step(name, order);
        s.depends_on = Some(deps);
        s
    }

    #[test]
    fn sequential_workflow_yields_singleton_groups() {
        let steps = vec![step("a", 0), step("b", 1), step("c", 2)];
        let plan = resolve_execution_groups(&steps);

        assert_eq!(plan.total_steps, 3);
        assert_eq!(plan.execution_groups.len(), 3);
        for (i, group) in plan.execution_groups.iter().enumerate() {
            assert_eq!(group.group_index, i);
            assert_eq!(group.step_indices, vec![i]);
            assert!(group.can_run_in_parallel);
        }
    }

    #[test]
    fn parallel_fan_in() {
        let steps = vec![
            step("a", 0),
            step("b", 0),
            step_with_deps("c", 1, vec![json!(0), json!(1)]),
        ];
        let plan = resolve_execution_groups(&steps);

        assert_eq!(plan.execution_groups.len(), 2);
        assert_eq!(plan.execution_groups[0].step_indices, vec![0, 1]);
        assert!(plan.execution_groups[0].can_run_in_parallel);
        assert_eq!(plan.execution_groups[1].step_indices, vec![2]);
    }

    #[test]
    fn groups_partition_the_step_set() {
        let steps = vec![
            step("a", 0),
            step("b", 0),
            step_with_deps("c", 2, vec![json!(0)]),
            step("d", 3),
        ];
        let plan = resolve_execution_groups(&steps);
        let mut seen: Vec<usize> = plan
            .execution_groups
            .iter()
            .flat_map(|g| g.step_indices.iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);

        // Every dependency appears in an earlier group.
        let graph = build_dependency_graph(&steps);
        let mut group_of = HashMap::new();
        for group in &plan.execution_groups {
            for &idx in &group.step_indices {
                group_of.insert(idx, group.group_index);
            }
        }
        for (step_idx, deps) in &graph {
            for dep in deps {
                assert!(group_of[dep] < group_of[step_idx]);
            }
        }
    }

    #[test]
    fn cycle_is_detected() {
        let steps = vec![
            step_with_deps("s1", 0, vec![json!(1)]),
            step_with_deps("s2", 1, vec![json!(0)]),
        ];
        let report = validate_dependencies(&steps);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("Circular")));

        // Group resolution stops gracefully instead of spinning.
        let plan = resolve_execution_groups(&steps);
        assert!(plan.execution_groups.is_empty());
    }

    #[test]
    fn numeric_string_deps_coerce() {
        let steps = vec![
            step("a", 0),
            step_with_deps("b", 1, vec![json!("0")]),
        ];
        let graph = build_dependency_graph(&steps);
        assert_eq!(graph[&1], vec![0]);
        assert!(validate_dependencies(&steps).is_valid);
    }

    #[test]
    fn invalid_entries_produce_one_error_each() {
        let steps = vec![
            step("a", 0),
            step_with_deps("b", 1, vec![json!("banana"), json!(42), json!(null)]),
        ];
        let report = validate_dependencies(&steps);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn self_dependency_is_an_error() {
        let steps = vec![step("a", 0), step_with_deps("b", 1, vec![json!(1)])];
        let report = validate_dependencies(&steps);
        assert!(!report.is_valid);
        // Normalization drops the entry, so the graph falls back to empty deps.
        let graph = build_dependency_graph(&steps);
        assert!(graph[&1].is_empty());
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        let steps = vec![
            step("a", 0),
            step_with_deps("b", 5, vec![json!(0)]),
            step_with_deps("c", 7, vec![json!(5), json!("0")]),
        ];
        let first = build_dependency_graph(&steps);
        let second = build_dependency_graph(&steps);
        assert_eq!(first, second);
        // step_order 5 resolves to index 1, "0" to index 0
        assert_eq!(first[&2], vec![1, 0]);
    }

    #[test]
    fn auto_detection_uses_strictly_smaller_order() {
        let steps = vec![step("a", 0), step("b", 0), step("c", 1)];
        let graph = build_dependency_graph(&steps);
        assert!(graph[&0].is_empty());
        assert!(graph[&1].is_empty());
        assert_eq!(graph[&2], vec![0, 1]);
    }

    #[test]
    fn empty_depends_on_falls_back_to_auto_detection() {
        let steps = vec![step("a", 0), step_with_deps("b", 1, vec![])];
        let graph = build_dependency_graph(&steps);
        assert_eq!(graph[&1], vec![0]);
    }

    #[test]
    fn step_states_project_from_completed_and_running_sets() {
        let steps = vec![
            step("a", 0),
            step("b", 0),
            step_with_deps("c", 1, vec![json!(0), json!(1)]),
        ];
        let states = get_step_states(&[0], &[1], &steps);
        assert_eq!(states[&0], StepState::Completed);
        assert_eq!(states[&1], StepState::Running);
        // c waits on b; a alone does not unblock it.
        assert_eq!(states[&2], StepState::Waiting);

        let states = get_step_states(&[0, 1], &[], &steps);
        assert_eq!(states[&2], StepState::Ready);
    }

    #[test]
    fn ready_steps_track_completion() {
        let steps = vec![
            step("a", 0),
            step("b", 0),
            step_with_deps("c", 1, vec![json!(0), json!(1)]),
        ];
        assert_eq!(get_ready_steps(&[], &steps), vec![0, 1]);
        assert_eq!(get_ready_steps(&[0], &steps), vec![1]);
        assert_eq!(get_ready_steps(&[0, 1], &steps), vec![2]);
    }
}
