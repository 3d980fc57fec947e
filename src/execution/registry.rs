//! Step Registry
//!
//! Maps step type names to constructors. The registry is an ordinary
//! value: create one per process (or per test) and share it as
//! `Arc<StepRegistry>`. Registration takes a write lock; lookups and step
//! creation only read.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::step::Step;
use crate::workflow::model::{Branch, StepDefinition};

/// Errors from registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No constructor is registered for the type
    #[error("Step Type Not Found: '{0}'")]
    StepTypeNotFound(String),

    /// The type is already registered and `force` was not set
    #[error("step type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Everything a constructor needs to build a step instance.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInstanceConfig {
    pub id: String,
    pub step_type: String,
    pub config: Map<String, Value>,
    /// Nested steps, for composite step types
    pub steps: Vec<StepDefinition>,
    pub then_steps: Vec<StepDefinition>,
    pub else_steps: Vec<StepDefinition>,
    pub branches: Vec<Branch>,
}

impl StepInstanceConfig {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>, config: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            config,
            steps: Vec::new(),
            then_steps: Vec::new(),
            else_steps: Vec::new(),
            branches: Vec::new(),
        }
    }

    pub fn from_definition(step: &StepDefinition) -> Self {
        Self {
            id: step.id.clone(),
            step_type: step.step_type.clone(),
            config: step.config.clone(),
            steps: step.steps.clone(),
            then_steps: step.then_steps.clone(),
            else_steps: step.else_steps.clone(),
            branches: step.branches.clone(),
        }
    }
}

/// Builds a step instance from its configuration.
pub type StepConstructor = Arc<dyn Fn(&StepInstanceConfig) -> Box<dyn Step> + Send + Sync>;

/// Options for [`StepRegistry::register`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Replace an existing registration instead of failing
    pub force: bool,
}

impl RegisterOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

/// Introspection data for a registered step type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    pub step_type: String,
    pub version: String,
    pub registered_at: DateTime<Utc>,
}

struct RegisteredStep {
    constructor: StepConstructor,
    info: RegistrationInfo,
}

/// Registry of step types.
///
/// # Example
///
/// ```
/// use flowrunner::execution::{StepInstanceConfig, StepRegistry};
///
/// let registry = StepRegistry::with_builtins();
/// assert!(registry.has_step("log"));
///
/// let step = registry
///     .create_step(&StepInstanceConfig::new("hello", "log", Default::default()))
///     .unwrap();
/// assert_eq!(step.step_type(), "log");
/// ```
#[derive(Default)]
pub struct StepRegistry {
    steps: RwLock<HashMap<String, RegisteredStep>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in step types.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::steps::register_builtins(&registry);
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegisteredStep>> {
        self.steps.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegisteredStep>> {
        self.steps.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a constructor for `step_type`.
    ///
    /// Fails with [`RegistryError::AlreadyRegistered`] if the type exists
    /// and `options.force` is not set.
    pub fn register<F>(
        &self,
        step_type: &str,
        version: &str,
        constructor: F,
        options: RegisterOptions,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&StepInstanceConfig) -> Box<dyn Step> + Send + Sync + 'static,
    {
        let mut steps = self.write();
        if steps.contains_key(step_type) && !options.force {
            return Err(RegistryError::AlreadyRegistered(step_type.to_string()));
        }

        steps.insert(
            step_type.to_string(),
            RegisteredStep {
                constructor: Arc::new(constructor),
                info: RegistrationInfo {
                    step_type: step_type.to_string(),
                    version: version.to_string(),
                    registered_at: Utc::now(),
                },
            },
        );
        debug!("Registered step type '{}' v{}", step_type, version);
        Ok(())
    }

    /// Removes a registration. Returns true if the type was registered.
    pub fn unregister(&self, step_type: &str) -> bool {
        let removed = self.write().remove(step_type).is_some();
        if removed {
            debug!("Unregistered step type '{}'", step_type);
        }
        removed
    }

    pub fn has_step(&self, step_type: &str) -> bool {
        self.read().contains_key(step_type)
    }

    /// Creates a step instance for `config.step_type`.
    pub fn create_step(&self, config: &StepInstanceConfig) -> Result<Box<dyn Step>, RegistryError> {
        let constructor = self
            .read()
            .get(&config.step_type)
            .map(|registered| Arc::clone(&registered.constructor))
            .ok_or_else(|| RegistryError::StepTypeNotFound(config.step_type.clone()))?;

        debug!("Creating step '{}' of type '{}'", config.id, config.step_type);
        Ok(constructor(config))
    }

    pub fn registration(&self, step_type: &str) -> Option<RegistrationInfo> {
        self.read().get(step_type).map(|r| r.info.clone())
    }

    /// All registrations, sorted by step type.
    pub fn registrations(&self) -> Vec<RegistrationInfo> {
        let mut infos: Vec<RegistrationInfo> = self.read().values().map(|r| r.info.clone()).collect();
        infos.sort_by(|a, b| a.step_type.cmp(&b.step_type));
        infos
    }

    /// Registered step types, sorted.
    pub fn step_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}
