//! Name→tool map and schema serialization for the LLM's tool-use request.

use crate::message::ToolDefinition;
use std::collections::HashMap;

#[derive(Default)]
pub struct ToolRegistry {
    definitions: HashMap<String, ToolDefinition>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition) {
        if !self.definitions.contains_key(&definition.name) {
            self.order.push(definition.name.clone());
        }
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Serialize every registered tool definition into the wire schema
    /// (§6): `{type: "function", function: {...}}`.
    pub fn to_schemas(&self) -> Vec<serde_json::Value> {
        self.order
            .iter()
            .filter_map(|name| self.definitions.get(name))
            .map(ToolDefinition::to_schema)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolParameter;

    #[test]
    fn schema_export_matches_wire_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: vec![ToolParameter {
                name: "path".into(),
                kind: "string".into(),
                description: "Absolute path".into(),
                required: true,
                r#enum: None,
            }],
            requires_confirmation: false,
        });
        let schemas = registry.to_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "read_file");
        assert_eq!(schemas[0]["function"]["parameters"]["required"][0], "path");
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = ToolRegistry::new();
        for name in ["b", "a", "c"] {
            registry.register(ToolDefinition {
                name: name.into(),
                description: String::new(),
                parameters: vec![],
                requires_confirmation: false,
            });
        }
        assert_eq!(registry.names(), vec!["b", "a", "c"]);
    }
}
