//! Orchestration engine
//!
//! Drives one user turn: send the history to the model, dispatch any tool
//! calls it asks for, feed the results back, and repeat until the model
//! answers without tools.
//!
//! ```text
//! AwaitingUserInput -> ModelRequestPending -> (ToolDispatchPending <-> ModelRequestPending)* -> TurnComplete
//! ```
//!
//! The conversation only ever sees whole rounds. An assistant message that
//! asks for tools is appended together with the results of every call it
//! made, so a failed or cancelled round leaves no trace in the store.

mod events;

pub use events::EngineEvent;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, SessionConfig};
use crate::context::TokenCounter;
use crate::conversation::{window, ContentBlock, ConversationStore, Message, ToolInvocation, ToolResult};
use crate::error::{Error, GatewayError, Result};
use crate::gateway::{ModelGateway, ModelRequest, ModelResponse, StopReason, Usage};
use crate::tools::{ToolDefinition, ToolRegistry};

/// Where the engine is in the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    AwaitingUserInput,
    ModelRequestPending,
    ToolDispatchPending,
    TurnComplete,
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Tool rounds allowed per turn
    pub max_iterations: usize,
    /// Retry once when the gateway reports a rate limit
    pub retry_rate_limit: bool,
    /// Wait before the retry when the server gives no hint
    pub rate_limit_backoff: Duration,
    /// Upper bound on any rate-limit wait
    pub max_backoff: Duration,
    /// Bound on a single gateway call
    pub request_timeout: Duration,
    /// Token budget for the history sent with each request
    pub history_budget: usize,
    /// Run a round's calls together when every tool in it allows it
    pub concurrent_dispatch: bool,
    pub system_prompt: Option<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            retry_rate_limit: true,
            rate_limit_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            request_timeout: Duration::from_secs(120),
            history_budget: 150_000,
            concurrent_dispatch: false,
            system_prompt: None,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_iterations: config.tools.max_iterations,
            request_timeout: config.model.timeout(),
            history_budget: config.history.token_budget,
            system_prompt: config.system_prompt.clone(),
            ..Self::default()
        }
    }
}

/// What a completed turn produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Text of the final assistant message
    pub text: String,
    /// Reasoning returned during the turn, in order
    pub thinking: Vec<String>,
    /// Tool rounds dispatched
    pub rounds: usize,
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
}

/// The conversation state machine
pub struct OrchestrationEngine {
    gateway: Arc<dyn ModelGateway>,
    registry: Arc<ToolRegistry>,
    options: EngineOptions,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    state: EngineState,
    counter: TokenCounter,
    /// Usage billed since the last `take_usage`, failed turns included
    billed: Usage,
}

impl OrchestrationEngine {
    pub fn new(gateway: Arc<dyn ModelGateway>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            gateway,
            registry,
            options: EngineOptions::default(),
            events: None,
            state: EngineState::AwaitingUserInput,
            counter: TokenCounter::new(),
            billed: Usage::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Send progress events to `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn set_events(&mut self, tx: Option<mpsc::UnboundedSender<EngineEvent>>) {
        self.events = tx;
    }

    /// Swap the gateway and registry between turns
    pub fn replace_backends(&mut self, gateway: Arc<dyn ModelGateway>, registry: Arc<ToolRegistry>) {
        self.gateway = gateway;
        self.registry = registry;
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Usage of every response received since the last call
    pub fn take_usage(&mut self) -> Usage {
        std::mem::take(&mut self.billed)
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut EngineOptions {
        &mut self.options
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<dyn ModelGateway> {
        &self.gateway
    }

    /// Run one user turn to completion
    ///
    /// `config` is read once; changes apply from the next turn. On error the
    /// store holds the user message plus every round that completed before
    /// the failure, and the engine is ready for the next input.
    pub async fn run_turn(
        &mut self,
        store: &mut ConversationStore,
        config: &SessionConfig,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let result = self.drive_turn(store, config, input, cancel).await;
        if let Err(e) = &result {
            warn!(error = %e, "Turn aborted");
            self.state = EngineState::AwaitingUserInput;
        }
        result
    }

    async fn drive_turn(
        &mut self,
        store: &mut ConversationStore,
        config: &SessionConfig,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        store.append(Message::user(input))?;

        let tools: Vec<ToolDefinition> = if config.tools_enabled {
            self.registry.list_specs()
        } else {
            Vec::new()
        };
        let mut outcome = TurnOutcome::default();

        loop {
            self.state = EngineState::ModelRequestPending;

            let view = window::select(store.messages(), self.options.history_budget, &self.counter);
            self.emit(EngineEvent::ModelRequest {
                round: outcome.rounds + 1,
                messages: view.len(),
            });
            let request = ModelRequest::new(config, view)
                .with_system(self.options.system_prompt.clone())
                .with_tools(tools.clone());

            let response = self.complete_with_retry(request, cancel).await?;
            outcome.usage.add(response.usage);
            self.billed.add(response.usage);
            outcome.stop_reason = response.stop_reason.clone();
            self.report_thinking(&response, &mut outcome);

            if !response.has_tool_use() {
                return self.finish_turn(store, response.content, outcome);
            }

            if !config.tools_enabled {
                warn!("Model requested tools while tool use is disabled; dropping the requests");
                let content = response
                    .content
                    .into_iter()
                    .filter(|b| !matches!(b, ContentBlock::ToolUse { .. }))
                    .collect();
                return self.finish_turn(store, content, outcome);
            }

            if outcome.rounds >= self.options.max_iterations {
                return Err(Error::ToolLoopExceeded {
                    limit: self.options.max_iterations,
                });
            }

            self.state = EngineState::ToolDispatchPending;
            let commentary = Message::assistant(response.content.clone()).text();
            if !commentary.is_empty() {
                self.emit(EngineEvent::commentary(commentary));
            }

            let invocations = response.tool_uses();
            let round = outcome.rounds + 1;
            info!(round, calls = invocations.len(), "Dispatching tool round");

            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                results = self.dispatch_round(invocations) => results,
            };

            store.append_round(Message::assistant(response.content), Message::tool_results(results))?;
            outcome.rounds = round;
        }
    }

    fn finish_turn(
        &mut self,
        store: &mut ConversationStore,
        content: Vec<ContentBlock>,
        mut outcome: TurnOutcome,
    ) -> Result<TurnOutcome> {
        let message = store.append(Message::assistant(content))?;
        outcome.text = message.text();

        self.state = EngineState::TurnComplete;
        debug!(rounds = outcome.rounds, usage = ?outcome.usage, "Turn complete");
        self.emit(EngineEvent::TurnComplete {
            rounds: outcome.rounds,
            usage: outcome.usage,
            stop_reason: outcome.stop_reason.clone(),
        });
        Ok(outcome)
    }

    fn report_thinking(&self, response: &ModelResponse, outcome: &mut TurnOutcome) {
        for block in &response.content {
            if let ContentBlock::Thinking { thinking, .. } = block {
                self.emit(EngineEvent::thinking(thinking.clone()));
                outcome.thinking.push(thinking.clone());
            }
        }
    }

    /// Call the gateway, retrying once on a rate limit
    async fn complete_with_retry(&self, request: ModelRequest, cancel: &CancellationToken) -> Result<ModelResponse> {
        match self.complete_once(request.clone(), cancel).await {
            Err(Error::Gateway(GatewayError::RateLimit { retry_after })) if self.options.retry_rate_limit => {
                let wait = retry_after
                    .unwrap_or(self.options.rate_limit_backoff)
                    .min(self.options.max_backoff);
                warn!(wait_ms = wait.as_millis() as u64, "Rate limited, retrying once");
                self.emit(EngineEvent::RateLimited { wait });

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
                self.complete_once(request, cancel).await
            }
            other => other,
        }
    }

    async fn complete_once(&self, request: ModelRequest, cancel: &CancellationToken) -> Result<ModelResponse> {
        let limit = self.options.request_timeout;
        debug!(gateway = self.gateway.name(), model = %request.model, "Calling model");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(limit, self.gateway.complete(request)) => match result {
                Ok(response) => Ok(response?),
                Err(_) => Err(Error::Timeout(limit.as_secs())),
            },
        }
    }

    /// Dispatch one round, returning results in request order
    async fn dispatch_round(&self, invocations: Vec<ToolInvocation>) -> Vec<ToolResult> {
        let concurrent = self.options.concurrent_dispatch
            && invocations.len() > 1
            && invocations.iter().all(|i| self.registry.is_concurrency_safe(&i.tool_name));

        if concurrent {
            debug!(calls = invocations.len(), "Dispatching round concurrently");
            return join_all(invocations.into_iter().map(|inv| self.dispatch_one(inv))).await;
        }

        let mut results = Vec::with_capacity(invocations.len());
        for invocation in invocations {
            results.push(self.dispatch_one(invocation).await);
        }
        results
    }

    async fn dispatch_one(&self, mut invocation: ToolInvocation) -> ToolResult {
        self.emit(EngineEvent::ToolStarted {
            invocation: invocation.clone(),
        });

        let result = match self
            .registry
            .dispatch(&invocation.call_id, &invocation.tool_name, invocation.arguments.clone())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(call_id = %invocation.call_id, tool = %invocation.tool_name, error = %e, "Tool call rejected");
                ToolResult::error(&invocation.call_id, e.to_string())
            }
        };

        invocation.resolve(&result);
        self.emit(EngineEvent::ToolFinished {
            invocation,
            output: result.output.clone(),
        });
        result
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.tools.max_iterations = 3;
        config.history.token_budget = 500;
        config.system_prompt = Some("Be brief".into());

        let options = EngineOptions::from_config(&config);
        assert_eq!(options.max_iterations, 3);
        assert_eq!(options.history_budget, 500);
        assert_eq!(options.request_timeout, Duration::from_secs(120));
        assert_eq!(options.system_prompt.as_deref(), Some("Be brief"));
        assert!(!options.concurrent_dispatch);
    }
}
