//! Tool system
//!
//! Tools are the named capabilities the model can request during a turn.
//! Dispatch is an explicit lookup table built at startup; every tool either
//! returns a text result or fails, and failures become Tool-turn text rather
//! than aborting the turn.

pub mod almanac;
pub mod datetime;
pub mod horoscope;
pub mod listings;
pub mod lunar;
pub mod websearch;

use crate::config::ToolEndpoints;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A capability invocable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool identifier (the name the model calls).
    fn id(&self) -> &str;

    /// Human-readable name, for logs and UI.
    fn name(&self) -> &str;

    /// Description for the model.
    fn description(&self) -> &str;

    /// JSON Schema for parameters.
    fn parameters(&self) -> Value;

    /// Whether this tool belongs to the guarded search class.
    fn search_class(&self) -> bool {
        false
    }

    /// Execute with the model-supplied arguments.
    async fn execute(&self, args: Value) -> Result<ToolResult>;
}

/// Result from tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub success: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            success: false,
        }
    }
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Definitions advertised to the model.
    pub fn definitions(&self) -> Vec<crate::provider::ToolDefinition> {
        self.tools
            .values()
            .map(|t| crate::provider::ToolDefinition {
                name: t.id().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Registry with the full default capability set.
    pub fn with_defaults(endpoints: &ToolEndpoints) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(datetime::DateTimeTool::new()));
        registry.register(Arc::new(lunar::LunarTool::new(&endpoints.almanac_base_url)));
        registry.register(Arc::new(almanac::AlmanacTool::new(
            &endpoints.almanac_base_url,
        )));
        registry.register(Arc::new(horoscope::HoroscopeTool::new(
            &endpoints.horoscope_base_url,
        )));
        registry.register(Arc::new(websearch::WebSearchTool::new()));
        registry.register(Arc::new(listings::ListingsTool::new(
            &endpoints.listings_base_url,
        )));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_all_capabilities() {
        let registry = ToolRegistry::with_defaults(&ToolEndpoints::default());
        let mut ids = registry.list();
        ids.sort();
        assert_eq!(
            ids,
            vec!["almanac", "datetime", "horoscope", "listings", "lunar", "websearch"]
        );
    }

    #[test]
    fn only_websearch_is_search_class() {
        let registry = ToolRegistry::with_defaults(&ToolEndpoints::default());
        for id in registry.list() {
            let tool = registry.get(id).unwrap();
            assert_eq!(tool.search_class(), id == "websearch", "tool {id}");
            assert!(!tool.name().is_empty(), "tool {id} has no display name");
        }
    }

    #[test]
    fn definitions_carry_schemas() {
        let registry = ToolRegistry::with_defaults(&ToolEndpoints::default());
        for def in registry.definitions() {
            assert_eq!(def.parameters["type"], "object");
            assert!(!def.description.is_empty());
        }
    }
}
