//! Interactive tools exposed via Model Context Protocol
//!
//! Provides `start-notification-stream`, a long-running tool that emits
//! periodic `notifications/message` envelopes before returning its result.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::debug;

use crate::domain::{TextContent, ToolCapability, ToolDescriptor, ToolOutput};
use crate::errors::AppError;
use crate::mcp::transport::NotificationSender;

pub const NOTIFICATION_METHOD: &str = "notifications/message";

const DEFAULT_INTERVAL_MS: u64 = 100;
const DEFAULT_COUNT: u64 = 10;
/// Ceiling on the per-send interval so one call cannot outlive the hosting
/// platform's invocation timeout by sleeping.
const MAX_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
struct NotificationStreamArgs {
    interval: Option<u64>,
    count: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ValidatedStreamArgs {
    interval: u64,
    count: u32,
}

pub struct NotificationStreamTool {
    cap: u32,
}

impl NotificationStreamTool {
    /// `cap` bounds the notifications one call may emit; `count=0` requests
    /// exactly the cap rather than being silently reinterpreted downstream.
    pub fn new(cap: u32) -> Self {
        Self { cap }
    }
}

#[async_trait]
impl ToolCapability for NotificationStreamTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: "start-notification-stream",
            title: "Notification Stream",
            description: "Starts sending periodic notifications for testing resumability",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "interval": {
                        "type": "number",
                        "description": "Interval in milliseconds between notifications",
                        "default": DEFAULT_INTERVAL_MS
                    },
                    "count": {
                        "type": "number",
                        "description": format!("Number of notifications to send (0 for {})", self.cap),
                        "default": DEFAULT_COUNT
                    }
                }
            }),
            output_schema: Some(json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                },
                "required": ["message"]
            })),
        }
    }

    fn validate(&self, arguments: Value) -> Result<Value, AppError> {
        let args: NotificationStreamArgs = serde_json::from_value(arguments).map_err(|_| {
            AppError::bad_request("invalid_arguments", "interval and count must be numbers")
        })?;

        let interval = args.interval.unwrap_or(DEFAULT_INTERVAL_MS);
        if !(1..=MAX_INTERVAL_MS).contains(&interval) {
            return Err(AppError::bad_request(
                "invalid_interval",
                format!("interval must be between 1 and {MAX_INTERVAL_MS} milliseconds"),
            ));
        }

        let count = match args.count.unwrap_or(DEFAULT_COUNT) {
            0 => self.cap,
            count if count <= u64::from(self.cap) => count as u32,
            _ => {
                return Err(AppError::bad_request(
                    "invalid_count",
                    format!("count must not exceed {}", self.cap),
                ))
            }
        };

        Ok(serde_json::to_value(ValidatedStreamArgs { interval, count })
            .expect("stream args serialization"))
    }

    async fn call(
        &self,
        arguments: Value,
        notifications: NotificationSender,
    ) -> Result<ToolOutput, AppError> {
        let args: ValidatedStreamArgs = serde_json::from_value(arguments)
            .map_err(|_| AppError::internal("stream args failed revalidation"))?;

        for counter in 1..=args.count {
            let payload = json!({
                "level": "info",
                "data": format!(
                    "Periodic notification #{counter} at {}",
                    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
                ),
            });

            if notifications.send(NOTIFICATION_METHOD, payload).await.is_err() {
                // The client went away; stop scheduling sends for a dead
                // connection instead of sleeping through the remainder.
                debug!(counter, "notification channel closed, stopping stream");
                break;
            }

            sleep(Duration::from_millis(args.interval)).await;
        }

        let message = format!(
            "Started sending periodic notifications every {}ms",
            args.interval
        );

        Ok(ToolOutput {
            content: vec![TextContent::new(message.clone())],
            structured_content: json!({ "message": message }),
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::mcp::transport::Outbound;

    fn tool() -> NotificationStreamTool {
        NotificationStreamTool::new(100)
    }

    #[test]
    fn validate_applies_defaults() {
        let args = tool().validate(json!({})).expect("defaults are valid");

        assert_eq!(args["interval"], json!(DEFAULT_INTERVAL_MS));
        assert_eq!(args["count"], json!(DEFAULT_COUNT));
    }

    #[test]
    fn validate_maps_zero_count_to_cap() {
        let args = tool()
            .validate(json!({ "count": 0 }))
            .expect("zero count is valid");

        assert_eq!(args["count"], json!(100));
    }

    #[test]
    fn validate_honors_configured_cap() {
        let args = NotificationStreamTool::new(5)
            .validate(json!({ "count": 0 }))
            .expect("zero count is valid");

        assert_eq!(args["count"], json!(5));
    }

    #[test]
    fn validate_rejects_count_above_cap() {
        let err = tool()
            .validate(json!({ "count": 101 }))
            .expect_err("count above cap must fail");

        assert!(matches!(err, AppError::BadRequest { code: "invalid_count", .. }));
    }

    #[test]
    fn validate_rejects_out_of_range_interval() {
        let err = tool()
            .validate(json!({ "interval": 0 }))
            .expect_err("zero interval must fail");
        assert!(matches!(err, AppError::BadRequest { code: "invalid_interval", .. }));

        let err = tool()
            .validate(json!({ "interval": 60_000 }))
            .expect_err("oversized interval must fail");
        assert!(matches!(err, AppError::BadRequest { code: "invalid_interval", .. }));
    }

    #[test]
    fn validate_rejects_non_numeric_arguments() {
        let err = tool()
            .validate(json!({ "interval": "fast" }))
            .expect_err("string interval must fail");

        assert!(matches!(err, AppError::BadRequest { code: "invalid_arguments", .. }));
    }

    #[tokio::test]
    async fn call_emits_notifications_in_sequence_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let validated = tool()
            .validate(json!({ "interval": 1, "count": 3 }))
            .expect("valid arguments");

        let output = tool()
            .call(validated, NotificationSender::new(tx))
            .await
            .expect("call succeeds");

        for expected in 1..=3 {
            let outbound = rx.recv().await.expect("notification delivered");
            let Outbound::Notification(envelope) = outbound else {
                panic!("expected notification");
            };
            assert_eq!(envelope["method"], json!(NOTIFICATION_METHOD));
            let data = envelope["params"]["data"].as_str().expect("data string");
            assert!(data.starts_with(&format!("Periodic notification #{expected} at ")));
        }
        assert!(rx.try_recv().is_err());

        assert_eq!(
            output.structured_content["message"],
            json!("Started sending periodic notifications every 1ms")
        );
    }

    #[tokio::test]
    async fn call_stops_promptly_when_channel_closes() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let validated = tool()
            .validate(json!({ "interval": 1_000, "count": 50 }))
            .expect("valid arguments");

        let started_at = std::time::Instant::now();
        let output = tool()
            .call(validated, NotificationSender::new(tx))
            .await
            .expect("call still returns its result");

        assert!(started_at.elapsed() < Duration::from_millis(500));
        assert!(output.structured_content["message"].is_string());
    }
}
