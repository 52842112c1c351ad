use serde::{Deserialize, Serialize};

pub const COMPLETE_PERCENT: i32 = 100;
pub const FAILURE_PERCENT: i32 = 0;
pub const COMPLETE_MESSAGE: &str = "Generation complete!";

/// One line of the generation protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEvent {
    pub progress: i32,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(progress: i32, message: impl Into<String>) -> Self {
        Self {
            progress,
            message: message.into(),
        }
    }

    pub fn complete() -> Self {
        Self::new(COMPLETE_PERCENT, COMPLETE_MESSAGE)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(FAILURE_PERCENT, message)
    }

    pub fn is_failure(&self) -> bool {
        self.progress <= FAILURE_PERCENT
    }

    /// No further events follow a terminal one.
    pub fn is_terminal(&self) -> bool {
        self.is_failure() || self.progress >= COMPLETE_PERCENT
    }

    /// Newline-delimited JSON framing used on the wire.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"progress":{},"message":""}}"#, self.progress)
        });
        line.push('\n');
        line
    }
}
