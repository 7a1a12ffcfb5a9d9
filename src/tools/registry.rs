use serde_json::{json, Value};

use super::handler::{ToolDef, ToolHandler};

/// Catalog of available tools. Stores definitions, provides schemas,
/// looks up handlers by name, and offers a built-in search for tool discovery.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. The schema is the complete JSON tool definition
    /// (name, description, input_schema) sent to the LLM. Enabled by
    /// default, with no group.
    pub fn add(
        mut self,
        name: impl Into<String>,
        schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.tools.push(ToolDef {
            name: name.into(),
            schema,
            group: None,
            enabled: true,
            handler: Box::new(handler),
        });
        self
    }

    /// Register a tool as part of a named group, so it can be toggled
    /// together with its groupmates via `set_group_enabled`.
    pub fn add_grouped(
        mut self,
        name: impl Into<String>,
        schema: Value,
        group: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        self.tools.push(ToolDef {
            name: name.into(),
            schema,
            group: Some(group.into()),
            enabled: true,
            handler: Box::new(handler),
        });
        self
    }

    /// Register a tool definition directly, as built elsewhere in the crate
    /// (the MCP client manager uses this to attach discovered remote tools
    /// after the registry has already been constructed).
    pub fn register(&mut self, def: ToolDef) {
        self.tools.push(def);
    }

    /// Remove every tool belonging to a given group, e.g. when an MCP server
    /// is detached.
    pub fn remove_group(&mut self, group: &str) {
        self.tools.retain(|t| t.group.as_deref() != Some(group));
    }

    /// All tool schemas for the LLM API request, enabled tools only.
    pub fn schemas(&self) -> Vec<Value> {
        self.enabled_tools().iter().map(|t| t.schema.clone()).collect()
    }

    /// Every tool definition, enabled or not. Use `enabled_tools` for the
    /// subset the model should currently see.
    pub fn all_tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// The subset of tools currently enabled.
    pub fn enabled_tools(&self) -> Vec<&ToolDef> {
        self.tools.iter().filter(|t| t.enabled).collect()
    }

    /// Enable or disable a single tool by name. No-op if the name is unknown.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) {
        if let Some(tool) = self.tools.iter_mut().find(|t| t.name == name) {
            tool.enabled = enabled;
        }
    }

    /// Enable or disable every tool registered under a group.
    pub fn set_group_enabled(&mut self, group: &str, enabled: bool) {
        for tool in self.tools.iter_mut() {
            if tool.group.as_deref() == Some(group) {
                tool.enabled = enabled;
            }
        }
    }

    /// Schema for a specific tool by name.
    pub fn schema(&self, name: &str) -> Option<&Value> {
        self.tools.iter().find(|t| t.name == name).map(|t| &t.schema)
    }

    /// Look up a tool's handler by name.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<String, String> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| format!("unknown tool: {name}"))?;
        tool.handler.call(input).await
    }

    /// Search tools by query. Matches against name and description.
    /// Returns compact summaries (name + description only, no full input_schema)
    /// so the model can discover deferred tools without blowing the context budget.
    pub fn search(&self, query: &str) -> Vec<Value> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();

        self.tools
            .iter()
            .filter(|t| t.enabled)
            .filter(|t| {
                let name = t.name.to_lowercase();
                let desc = t.schema["description"]
                    .as_str()
                    .unwrap_or("")
                    .to_lowercase();
                let haystack = format!("{name} {desc}");

                terms.iter().any(|term| haystack.contains(term))
            })
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.schema["description"],
                })
            })
            .collect()
    }

    /// The schema for the built-in `tool_search` meta-tool.
    /// Add this to the LLM's tool list so the model can discover deferred tools.
    pub fn search_tool_schema() -> Value {
        json!({
            "name": "tool_search",
            "description": "Search for available tools by keyword. Use when you need a tool that isn't in your current list. Returns tool names and descriptions matching the query.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query - keywords to match against tool names and descriptions"
                    }
                },
                "required": ["query"]
            }
        })
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
