//! Capability registry and handler contracts
//!
//! The table built here is one-time, read-only configuration: every
//! per-request protocol server holds an `Arc` reference to the same table
//! and never mutates it. Only the server/transport pair is per-request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::errors::AppError;
use crate::mcp::transport::NotificationSender;

pub mod prompts;
pub mod resources;
pub mod tools;

#[derive(Debug, Clone, Serialize)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub uri: &'static str,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: TextContent,
}

#[derive(Debug, Serialize)]
pub struct PromptResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Serialize)]
pub struct ToolOutput {
    pub content: Vec<TextContent>,
    #[serde(rename = "structuredContent")]
    pub structured_content: Value,
}

#[derive(Debug, Serialize)]
pub struct ResourceText {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: &'static str,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ResourceContents {
    pub contents: Vec<ResourceText>,
}

/// A named prompt template. `validate` runs before `render`; render never
/// sees arguments that failed validation.
#[async_trait]
pub trait PromptCapability: Send + Sync {
    fn descriptor(&self) -> PromptDescriptor;
    fn validate(&self, arguments: Value) -> Result<Value, AppError>;
    async fn render(&self, arguments: Value) -> Result<PromptResult, AppError>;
}

/// A callable tool. `call` receives only validated arguments plus the
/// notification primitive bound to the request's transport.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;
    fn validate(&self, arguments: Value) -> Result<Value, AppError>;
    async fn call(
        &self,
        arguments: Value,
        notifications: NotificationSender,
    ) -> Result<ToolOutput, AppError>;
}

/// A URI-addressed resource.
#[async_trait]
pub trait ResourceCapability: Send + Sync {
    fn descriptor(&self) -> ResourceDescriptor;
    async fn read(&self) -> Result<ResourceContents, AppError>;
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("duplicate {kind} capability: {name}")]
    Duplicate { kind: &'static str, name: String },
}

#[derive(Default)]
pub struct CapabilityTable {
    prompts: Vec<Arc<dyn PromptCapability>>,
    tools: Vec<Arc<dyn ToolCapability>>,
    resources: Vec<Arc<dyn ResourceCapability>>,
}

impl CapabilityTable {
    pub fn register_prompt(
        &mut self,
        prompt: Arc<dyn PromptCapability>,
    ) -> Result<(), CapabilityError> {
        let name = prompt.descriptor().name;
        if self.prompt(name).is_some() {
            return Err(CapabilityError::Duplicate {
                kind: "prompt",
                name: name.to_string(),
            });
        }
        self.prompts.push(prompt);
        Ok(())
    }

    pub fn register_tool(&mut self, tool: Arc<dyn ToolCapability>) -> Result<(), CapabilityError> {
        let name = tool.descriptor().name;
        if self.tool(name).is_some() {
            return Err(CapabilityError::Duplicate {
                kind: "tool",
                name: name.to_string(),
            });
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn register_resource(
        &mut self,
        resource: Arc<dyn ResourceCapability>,
    ) -> Result<(), CapabilityError> {
        let uri = resource.descriptor().uri;
        if self.resource_by_uri(uri).is_some() {
            return Err(CapabilityError::Duplicate {
                kind: "resource",
                name: uri.to_string(),
            });
        }
        self.resources.push(resource);
        Ok(())
    }

    pub fn prompt(&self, name: &str) -> Option<Arc<dyn PromptCapability>> {
        self.prompts
            .iter()
            .find(|prompt| prompt.descriptor().name == name)
            .cloned()
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn ToolCapability>> {
        self.tools
            .iter()
            .find(|tool| tool.descriptor().name == name)
            .cloned()
    }

    pub fn resource_by_uri(&self, uri: &str) -> Option<Arc<dyn ResourceCapability>> {
        self.resources
            .iter()
            .find(|resource| resource.descriptor().uri == uri)
            .cloned()
    }

    pub fn prompt_descriptors(&self) -> Vec<PromptDescriptor> {
        self.prompts.iter().map(|prompt| prompt.descriptor()).collect()
    }

    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|tool| tool.descriptor()).collect()
    }

    pub fn resource_descriptors(&self) -> Vec<ResourceDescriptor> {
        self.resources
            .iter()
            .map(|resource| resource.descriptor())
            .collect()
    }
}

/// Builds the capability table the process serves for its whole lifetime.
pub fn build_capability_table(notification_cap: u32) -> Result<CapabilityTable, CapabilityError> {
    let mut table = CapabilityTable::default();
    table.register_prompt(Arc::new(prompts::GreetingPrompt))?;
    table.register_tool(Arc::new(tools::NotificationStreamTool::new(
        notification_cap,
    )))?;
    table.register_resource(Arc::new(resources::GreetingResource))?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_registers_all_capability_kinds() {
        let table = build_capability_table(100).expect("capability table");

        assert_eq!(table.prompt_descriptors().len(), 1);
        assert_eq!(table.tool_descriptors().len(), 1);
        assert_eq!(table.resource_descriptors().len(), 1);
    }

    #[test]
    fn duplicate_tool_registration_fails() {
        let mut table = build_capability_table(100).expect("capability table");

        let err = table
            .register_tool(Arc::new(tools::NotificationStreamTool::new(100)))
            .expect_err("duplicate tool must fail");

        assert!(matches!(err, CapabilityError::Duplicate { kind: "tool", .. }));
    }

    #[test]
    fn lookups_find_registered_capabilities() {
        let table = build_capability_table(100).expect("capability table");

        assert!(table.prompt("greeting-template").is_some());
        assert!(table.tool("start-notification-stream").is_some());
        assert!(table
            .resource_by_uri("https://example.com/greetings/default")
            .is_some());
        assert!(table.tool("missing").is_none());
    }
}
