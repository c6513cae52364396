//! Progress events emitted while a turn runs

use std::time::Duration;

use crate::conversation::ToolInvocation;
use crate::gateway::{StopReason, Usage};

/// Something the caller may want to render mid-turn
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A request is about to go to the model
    ModelRequest { round: usize, messages: usize },
    /// The model returned reasoning
    Thinking { text: String },
    /// Text the model produced alongside tool requests
    Commentary { text: String },
    ToolStarted { invocation: ToolInvocation },
    /// `invocation.status` holds the resolved status
    ToolFinished { invocation: ToolInvocation, output: String },
    /// The gateway is rate limited; retrying after `wait`
    RateLimited { wait: Duration },
    TurnComplete { rounds: usize, usage: Usage, stop_reason: Option<StopReason> },
}

impl EngineEvent {
    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    pub fn commentary(text: impl Into<String>) -> Self {
        Self::Commentary { text: text.into() }
    }
}
