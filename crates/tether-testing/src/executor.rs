//! Scripted command executor.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tether_commands::{Command, CommandExecutor};

#[derive(Debug, Clone)]
struct Script {
    delay: Duration,
    outcome: Result<Value, String>,
}

/// Answers each command type with a canned outcome after a delay.
///
/// Unscripted command types fail with `unsupported command`.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(mut self, command_type: &str, result: Value, delay: Duration) -> Self {
        self.scripts.insert(
            command_type.to_string(),
            Script {
                delay,
                outcome: Ok(result),
            },
        );
        self
    }

    pub fn fail(mut self, command_type: &str, message: &str, delay: Duration) -> Self {
        self.scripts.insert(
            command_type.to_string(),
            Script {
                delay,
                outcome: Err(message.to_string()),
            },
        );
        self
    }

    /// Correlation ids executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|executed| executed.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, command: &Command) -> Result<Value, String> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(command.correlation_id.clone());
        }
        let Some(script) = self.scripts.get(&command.command_type) else {
            return Err(format!("unsupported command {}", command.command_type));
        };
        tokio::time::sleep(script.delay).await;
        script.outcome.clone()
    }
}
