//! Stage registry.

use super::builtin::{EncodeStage, MeasureStage, TallyStage};
use super::r#trait::Stage;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Errors raised while registering or resolving stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Name does not match `^[a-z][a-z0-9_.-]*$`
    #[error("invalid stage name '{0}'")]
    InvalidName(String),

    /// A stage with this name is already registered
    #[error("stage '{0}' is already registered")]
    Duplicate(String),

    /// No stage registered under this name
    #[error("unknown stage '{0}'")]
    UnknownStage(String),
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_.-]*$").expect("stage name pattern is valid"))
}

/// Check a stage name against the naming rule.
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

/// Registry of stages available to pipelines, keyed by name.
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
    order: Vec<String>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Create a registry holding the built-in stages.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn Stage>; 5] = [
            Arc::new(EncodeStage),
            Arc::new(TallyStage::optimize()),
            Arc::new(TallyStage::evolve()),
            Arc::new(TallyStage::enhance()),
            Arc::new(MeasureStage),
        ];
        for stage in builtins {
            let registered = registry.register(stage);
            debug_assert!(registered.is_ok(), "built-in stage rejected: {:?}", registered);
        }
        registry
    }

    /// Names of the built-in stages in their canonical order.
    pub fn builtin_order() -> Vec<String> {
        ["encode", "optimize", "evolve", "enhance", "measure"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Register a stage under its own name.
    pub fn register(&mut self, stage: Arc<dyn Stage>) -> Result<(), RegistryError> {
        let name = stage.name().to_string();
        validate_name(&name)?;
        if self.stages.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        self.order.push(name.clone());
        self.stages.insert(name, stage);
        Ok(())
    }

    /// Get a stage by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(name).cloned()
    }

    /// List all stages in registration order.
    pub fn list(&self) -> Vec<Arc<dyn Stage>> {
        self.order
            .iter()
            .filter_map(|name| self.stages.get(name).cloned())
            .collect()
    }

    /// Look up every name in `order`, preserving it.
    pub fn resolve<S: AsRef<str>>(&self, order: &[S]) -> Result<Vec<Arc<dyn Stage>>, RegistryError> {
        order
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get(name)
                    .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))
            })
            .collect()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
