//! Task registry
//!
//! Maps task names to definitions. Populated once before the scheduler is
//! built and read-only afterwards, so it needs no locking of its own.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};
use crate::task::TaskDefinition;

/// Directory entry returned by task listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Advertised step spacing in seconds
    pub default_period: f64,
}

/// Name to definition mapping, kept in registration order
#[derive(Default, Clone)]
pub struct TaskRegistry {
    definitions: Vec<Arc<dyn TaskDefinition>>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its own name
    pub fn register(&mut self, definition: Arc<dyn TaskDefinition>) -> Result<()> {
        let name = definition.name().to_string();
        if self.index.contains_key(&name) {
            return Err(TaskError::DuplicateTaskName(name));
        }
        log::debug!("Registered task {}", name);
        self.index.insert(name, self.definitions.len());
        self.definitions.push(definition);
        Ok(())
    }

    /// Register, replacing any definition with the same name in place.
    /// Returns the replaced definition.
    pub fn register_or_replace(
        &mut self,
        definition: Arc<dyn TaskDefinition>,
    ) -> Option<Arc<dyn TaskDefinition>> {
        let name = definition.name().to_string();
        match self.index.get(&name) {
            Some(&pos) => {
                log::info!("Replacing task definition {}", name);
                Some(std::mem::replace(&mut self.definitions[pos], definition))
            }
            None => {
                self.index.insert(name, self.definitions.len());
                self.definitions.push(definition);
                None
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<dyn TaskDefinition>> {
        self.position(name).map(|pos| &self.definitions[pos])
    }

    /// Definition at a registration-order position
    pub fn get(&self, index: usize) -> Option<&Arc<dyn TaskDefinition>> {
        self.definitions.get(index)
    }

    /// Indexing form of [`get`](Self::get) for positions obtained from this registry
    pub(crate) fn definition_at(&self, index: usize) -> &Arc<dyn TaskDefinition> {
        &self.definitions[index]
    }

    /// Registration-order position of a task
    pub fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| TaskError::TaskNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names in registration order
    pub fn list_names(&self) -> Vec<String> {
        self.definitions.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn directory(&self) -> Vec<TaskDescriptor> {
        self.definitions
            .iter()
            .map(|d| TaskDescriptor {
                name: d.name().to_string(),
                description: Some(d.description()).filter(|s| !s.is_empty()).map(str::to_string),
                default_period: d.default_period().as_secs_f64(),
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TaskDefinition>> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry").field("names", &self.list_names()).finish()
    }
}
