//! Prompt templates exposed via Model Context Protocol

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domain::{
    PromptArgument, PromptCapability, PromptDescriptor, PromptMessage, PromptResult, TextContent,
};
use crate::errors::AppError;

pub struct GreetingPrompt;

#[derive(Debug, Deserialize)]
struct GreetingArgs {
    name: Option<String>,
}

#[async_trait]
impl PromptCapability for GreetingPrompt {
    fn descriptor(&self) -> PromptDescriptor {
        PromptDescriptor {
            name: "greeting-template",
            title: "Greeting Template",
            description: "A simple greeting prompt template",
            arguments: vec![PromptArgument {
                name: "name",
                description: "Name to include in greeting",
                required: true,
            }],
        }
    }

    fn validate(&self, arguments: Value) -> Result<Value, AppError> {
        let args: GreetingArgs = serde_json::from_value(arguments)
            .map_err(|_| AppError::bad_request("invalid_arguments", "arguments must be an object"))?;

        let name = args
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::bad_request("missing_name", "name is required"))?;

        Ok(json!({ "name": name }))
    }

    async fn render(&self, arguments: Value) -> Result<PromptResult, AppError> {
        let name = arguments["name"]
            .as_str()
            .ok_or_else(|| AppError::internal("prompt arguments failed revalidation"))?;

        Ok(PromptResult {
            description: Some("A simple greeting prompt template"),
            messages: vec![PromptMessage {
                role: "user",
                content: TextContent::new(format!("Please greet {name} in a friendly manner.")),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_trims_and_requires_name() {
        let prompt = GreetingPrompt;

        let args = prompt
            .validate(json!({ "name": "  Ada  " }))
            .expect("valid arguments");
        assert_eq!(args, json!({ "name": "Ada" }));

        let err = prompt.validate(json!({})).expect_err("missing name fails");
        assert!(matches!(err, AppError::BadRequest { code: "missing_name", .. }));

        let err = prompt
            .validate(json!({ "name": "   " }))
            .expect_err("blank name fails");
        assert!(matches!(err, AppError::BadRequest { code: "missing_name", .. }));
    }

    #[tokio::test]
    async fn render_produces_one_user_message() {
        let prompt = GreetingPrompt;

        let result = prompt
            .render(json!({ "name": "Ada" }))
            .await
            .expect("render succeeds");

        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, "user");
        assert_eq!(
            result.messages[0].content.text,
            "Please greet Ada in a friendly manner."
        );
    }
}
