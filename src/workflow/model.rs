//! Workflow Data Model
//!
//! Core data structures representing a workflow definition and its steps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! nameSpace: acme
//! name: nightly-report
//! version: 1.0.0
//! inputs:
//!   region:
//!     type: string
//!     required: true
//! variables:
//!   greeting: hello
//! steps:
//!   - id: announce
//!     type: log
//!     config:
//!       message: "${variables.greeting} from ${input.region}"
//!
//!   - id: wait
//!     type: delay
//!     dependsOn: announce
//!     config:
//!       ms: 250
//! outputs:
//!   region:
//!     source: input.region
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared workflow input.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InputDefinition {
    /// Informational type name (e.g. "string", "number")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,

    #[serde(default)]
    pub required: bool,

    /// Value used when the caller does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declared workflow output, read from a step, variable, input or workflow value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputDefinition {
    /// Dotted source path, e.g. `step.fetch.body` or `variables.region`
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Workflow-level metadata.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkflowMetadata {
    /// Overall timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Any other metadata keys, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One branch of a `parallel` step.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Branch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// A single step as declared in a workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Unique identifier, across all nesting levels
    pub id: String,

    /// Registered step type (e.g. "log", "delay", "conditional")
    #[serde(rename = "type")]
    pub step_type: String,

    /// Opaque configuration consumed by the step implementation
    #[serde(default)]
    pub config: Map<String, Value>,

    /// IDs of steps that must complete before this step can run
    #[serde(
        deserialize_with = "single_or_vec",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub depends_on: Vec<String>,

    /// Step timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub then_steps: Vec<StepDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub else_steps: Vec<StepDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<Branch>,
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

impl StepDefinition {
    /// Creates a new step with an empty configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use flowrunner::workflow::StepDefinition;
    ///
    /// let step = StepDefinition::new("notify", "log")
    ///     .with_config("message", "done")
    ///     .depends_on("build")
    ///     .with_timeout(5_000);
    /// assert_eq!(step.depends_on, vec!["build"]);
    /// ```
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            step_type: step_type.into().trim().to_string(),
            config: Map::new(),
            depends_on: Vec::new(),
            timeout: None,
            steps: Vec::new(),
            then_steps: Vec::new(),
            else_steps: Vec::new(),
            branches: Vec::new(),
        }
    }

    /// Sets one configuration key.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    pub fn with_steps(mut self, steps: Vec<StepDefinition>) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_then_steps(mut self, steps: Vec<StepDefinition>) -> Self {
        self.then_steps = steps;
        self
    }

    pub fn with_else_steps(mut self, steps: Vec<StepDefinition>) -> Self {
        self.else_steps = steps;
        self
    }

    pub fn with_branch(mut self, name: Option<&str>, steps: Vec<StepDefinition>) -> Self {
        self.branches.push(Branch {
            name: name.map(str::to_string),
            steps,
        });
        self
    }

    /// Returns every nested step list together with its path suffix
    /// relative to this step (`steps`, `thenSteps`, `branches[1].steps`, ...).
    pub fn child_scopes(&self) -> Vec<(String, &[StepDefinition])> {
        let mut scopes: Vec<(String, &[StepDefinition])> = Vec::new();
        if !self.steps.is_empty() {
            scopes.push(("steps".to_string(), &self.steps));
        }
        if !self.then_steps.is_empty() {
            scopes.push(("thenSteps".to_string(), &self.then_steps));
        }
        if !self.else_steps.is_empty() {
            scopes.push(("elseSteps".to_string(), &self.else_steps));
        }
        for (i, branch) in self.branches.iter().enumerate() {
            if !branch.steps.is_empty() {
                scopes.push((format!("branches[{}].steps", i), &branch.steps));
            }
        }
        scopes
    }

    /// Returns true if this step owns nested steps.
    pub fn is_composite(&self) -> bool {
        !self.child_scopes().is_empty()
    }
}

/// Visits every step in `steps`, depth-first and in declaration order,
/// including steps nested in `steps`, `thenSteps`, `elseSteps` and
/// `branches[].steps`.
///
/// The visitor receives the step and its document path, rooted at `root`
/// (usually `"steps"`), e.g. `steps[1].thenSteps[0]`.
pub fn walk_steps<'a, F>(steps: &'a [StepDefinition], root: &str, visitor: &mut F)
where
    F: FnMut(&'a StepDefinition, &str),
{
    for (i, step) in steps.iter().enumerate() {
        let path = format!("{}[{}]", root, i);
        visitor(step, &path);
        for (suffix, children) in step.child_scopes() {
            walk_steps(children, &format!("{}.{}", path, suffix), visitor);
        }
    }
}

/// Represents a complete workflow definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name_space: String,

    pub name: String,

    /// Semantic version, `MAJOR.MINOR.PATCH`
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputDefinition>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputDefinition>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,

    /// Ordered list of top-level steps
    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<WorkflowMetadata>,
}

impl WorkflowDefinition {
    /// Creates a new workflow with no steps.
    pub fn new(
        name_space: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name_space: name_space.into(),
            name: name.into(),
            version: version.into(),
            description: None,
            author: None,
            tags: Vec::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            variables: Map::new(),
            steps: Vec::new(),
            metadata: None,
        }
    }

    /// Appends a top-level step.
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, input: InputDefinition) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.outputs.insert(
            name.into(),
            OutputDefinition {
                source: source.into(),
                description: None,
            },
        );
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Gets a top-level step by ID.
    pub fn get_step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Finds a step by ID at any nesting depth.
    pub fn find_step(&self, id: &str) -> Option<&StepDefinition> {
        let mut found = None;
        walk_steps(&self.steps, "steps", &mut |step, _| {
            if found.is_none() && step.id == id {
                found = Some(step);
            }
        });
        found
    }

    /// Returns every step at every nesting depth, in walk order.
    pub fn all_steps(&self) -> Vec<&StepDefinition> {
        let mut steps = Vec::new();
        walk_steps(&self.steps, "steps", &mut |step, _| steps.push(step));
        steps
    }

    /// Returns all step IDs at every nesting depth, in walk order.
    pub fn step_ids(&self) -> Vec<String> {
        self.all_steps().iter().map(|s| s.id.clone()).collect()
    }

    /// Returns the distinct step types used, sorted.
    pub fn step_types(&self) -> Vec<String> {
        let types: BTreeSet<String> = self
            .all_steps()
            .iter()
            .map(|s| s.step_type.clone())
            .collect();
        types.into_iter().collect()
    }

    /// Maps each step that declares dependencies to its `dependsOn` list.
    pub fn dependency_map(&self) -> BTreeMap<String, Vec<String>> {
        self.all_steps()
            .into_iter()
            .filter(|s| !s.depends_on.is_empty())
            .map(|s| (s.id.clone(), s.depends_on.clone()))
            .collect()
    }

    /// Total number of `dependsOn` edges.
    pub fn dependency_edge_count(&self) -> usize {
        self.all_steps().iter().map(|s| s.depends_on.len()).sum()
    }

    /// Workflow timeout in milliseconds, if declared.
    pub fn timeout(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.timeout)
    }

    /// Number of top-level steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
