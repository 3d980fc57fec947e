//! Dependency Resolution
//!
//! Orders steps so that every step runs after the steps it depends on,
//! using a depth-first topological sort. Steps without dependencies keep
//! their declaration order relative to each other.
//!
//! Problems are collected rather than raised:
//! - a reference to an unknown step is a `MISSING_DEPENDENCY` error
//! - re-entering a step that is still being visited is a
//!   `CIRCULAR_DEPENDENCY` error, and that branch is not deepened further
//! - a repeated id is a `DUPLICATE_STEP_ID` error and only its first
//!   occurrence is ordered

use std::collections::{HashMap, HashSet};

use log::debug;

use super::diagnostics::{Diagnostic, DiagnosticCode};
use super::model::{walk_steps, StepDefinition, WorkflowDefinition};

/// Outcome of dependency resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyResolution {
    /// Step ids in a dependency-respecting order
    pub execution_order: Vec<String>,
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
}

impl DependencyResolution {
    pub fn has_cycle(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.code == DiagnosticCode::CircularDependency)
    }
}

struct Node<'a> {
    step: &'a StepDefinition,
    path: String,
}

struct Resolver<'a> {
    nodes: Vec<Node<'a>>,
    index: HashMap<&'a str, usize>,
    visited: HashSet<usize>,
    visiting: Vec<usize>,
    order: Vec<String>,
    errors: Vec<Diagnostic>,
}

impl<'a> Resolver<'a> {
    fn new(nodes: Vec<Node<'a>>) -> Self {
        let mut index = HashMap::new();
        let mut visited = HashSet::new();
        let mut errors = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.contains_key(node.step.id.as_str()) {
                // Only the first step with an id is ordered
                visited.insert(i);
                errors.push(Diagnostic::new(
                    DiagnosticCode::DuplicateStepId,
                    format!("duplicate step id '{}'", node.step.id),
                    format!("{}.id", node.path),
                ));
            } else {
                index.insert(node.step.id.as_str(), i);
            }
        }
        Self {
            nodes,
            index,
            visited,
            visiting: Vec::new(),
            order: Vec::new(),
            errors,
        }
    }

    fn run(mut self) -> DependencyResolution {
        for i in 0..self.nodes.len() {
            self.visit(i);
        }
        DependencyResolution {
            valid: self.errors.is_empty(),
            execution_order: self.order,
            errors: self.errors,
        }
    }

    fn visit(&mut self, i: usize) {
        if self.visited.contains(&i) {
            return;
        }

        if let Some(pos) = self.visiting.iter().position(|&v| v == i) {
            let mut chain: Vec<&str> = self.visiting[pos..]
                .iter()
                .map(|&v| self.nodes[v].step.id.as_str())
                .collect();
            chain.push(self.nodes[i].step.id.as_str());
            self.errors.push(Diagnostic::new(
                DiagnosticCode::CircularDependency,
                format!("circular dependency detected: {}", chain.join(" -> ")),
                format!("{}.dependsOn", self.nodes[i].path),
            ));
            return;
        }

        self.visiting.push(i);
        let step = self.nodes[i].step;
        for (j, dep) in step.depends_on.iter().enumerate() {
            match self.index.get(dep.as_str()) {
                Some(&target) => self.visit(target),
                None => self.errors.push(Diagnostic::new(
                    DiagnosticCode::MissingDependency,
                    format!("step '{}' depends on unknown step '{}'", step.id, dep),
                    format!("{}.dependsOn[{}]", self.nodes[i].path, j),
                )),
            }
        }
        self.visiting.pop();

        self.visited.insert(i);
        self.order.push(step.id.clone());
    }
}

/// Resolves the execution order of sibling steps.
///
/// Only the given steps participate; steps nested inside composite steps
/// are sequenced by their parent. A dependency on an id outside `steps`
/// is reported as missing.
pub fn resolve_execution_order(steps: &[StepDefinition]) -> DependencyResolution {
    let nodes = steps
        .iter()
        .enumerate()
        .map(|(i, step)| Node {
            step,
            path: format!("steps[{}]", i),
        })
        .collect();
    let resolution = Resolver::new(nodes).run();
    debug!("Resolved execution order: {:?}", resolution.execution_order);
    resolution
}

/// Resolves the dependency graph across every nesting level of a workflow.
pub fn resolve_all_steps(workflow: &WorkflowDefinition) -> DependencyResolution {
    let mut nodes = Vec::new();
    walk_steps(&workflow.steps, "steps", &mut |step, path| {
        nodes.push(Node {
            step,
            path: path.to_string(),
        });
    });
    Resolver::new(nodes).run()
}
