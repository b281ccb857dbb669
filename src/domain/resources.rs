//! Static resources exposed via Model Context Protocol

use async_trait::async_trait;

use crate::domain::{ResourceCapability, ResourceContents, ResourceDescriptor, ResourceText};
use crate::errors::AppError;

pub const GREETING_RESOURCE_URI: &str = "https://example.com/greetings/default";

pub struct GreetingResource;

#[async_trait]
impl ResourceCapability for GreetingResource {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            name: "greeting-resource",
            title: "Greeting Resource",
            description: "A simple greeting resource",
            uri: GREETING_RESOURCE_URI,
            mime_type: "text/plain",
        }
    }

    async fn read(&self) -> Result<ResourceContents, AppError> {
        Ok(ResourceContents {
            contents: vec![ResourceText {
                uri: GREETING_RESOURCE_URI.to_string(),
                mime_type: "text/plain",
                text: "Hello, world!".to_string(),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_returns_fixed_greeting() {
        let contents = GreetingResource.read().await.expect("read succeeds");

        assert_eq!(contents.contents.len(), 1);
        assert_eq!(contents.contents[0].uri, GREETING_RESOURCE_URI);
        assert_eq!(contents.contents[0].mime_type, "text/plain");
        assert_eq!(contents.contents[0].text, "Hello, world!");
    }
}
