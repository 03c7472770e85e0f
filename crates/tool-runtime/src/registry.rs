use crate::tool::{Tool, ToolDefinition};
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::sync::Arc;

/// The commands the server exposes, keyed by tool name.
///
/// `tools/list` reports them in the order they were added, so the model sees
/// `kubectl` and `k8sgpt` in a fixed order across restarts.
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: IndexMap::new(),
        }
    }

    /// Add a tool under the name its definition advertises. A second tool
    /// with the same name is rejected and the first one stays in place.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let name = tool.definition().name;
        match self.tools.entry(name) {
            Entry::Occupied(slot) => Err(RegistryError::DuplicateName(slot.key().clone())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(tool));
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions in registration order, as advertised by `tools/list`.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool {0:?} is registered twice")]
    DuplicateName(String),
}
