//! Terminal rendering for turns, events and command output

use std::path::Path;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use parley_core::config::Config;
use parley_core::session::ConversationSummary;
use parley_core::tools::web::SearchResult;
use parley_core::{
    EngineEvent, Error, InvocationStatus, SessionStatus, StopReason, ToolDefinition, TurnOutcome,
};

/// Longest tool output preview shown after a call finishes
const PREVIEW_CHARS: usize = 100;

/// Renders engine output, with a spinner while the model works
pub struct Display {
    show_thinking: bool,
    spinner: Option<ProgressBar>,
}

impl Display {
    pub fn new(show_thinking: bool) -> Self {
        Self {
            show_thinking,
            spinner: None,
        }
    }

    pub fn show_thinking(&self) -> bool {
        self.show_thinking
    }

    pub fn set_show_thinking(&mut self, show: bool) {
        self.show_thinking = show;
    }

    pub fn start_spinner(&mut self, message: &str) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
            spinner.set_style(template);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    pub fn stop_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn set_spinner_message(&self, message: String) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(message);
        }
    }

    /// Print without tearing the spinner line
    fn line(&self, text: String) {
        match &self.spinner {
            Some(spinner) => spinner.suspend(|| println!("{}", text)),
            None => println!("{}", text),
        }
    }

    pub fn event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::ModelRequest { round, .. } => {
                if *round <= 1 {
                    self.set_spinner_message("Waiting for Claude...".to_string());
                } else {
                    self.set_spinner_message(format!("Sending tool results (round {})...", round));
                }
            }
            EngineEvent::Thinking { text } => {
                if self.show_thinking {
                    self.line(format!("{}", style("Thinking:").dim().italic()));
                    self.line(format!("{}", style(text).dim()));
                }
            }
            EngineEvent::Commentary { text } => {
                self.line(format!("{}: {}", style("Assistant").bold().green(), text));
            }
            EngineEvent::ToolStarted { invocation } => {
                self.set_spinner_message(format!("Running {}...", invocation.tool_name));
                self.line(format!(
                    "  {} {}{} {}",
                    style("[Executing:").dim(),
                    style(&invocation.tool_name).yellow(),
                    style("]").dim(),
                    style(compact_json(&invocation.arguments)).dim()
                ));
            }
            EngineEvent::ToolFinished { invocation, output } => {
                let preview = preview(output);
                if invocation.status == InvocationStatus::Error {
                    self.line(format!(
                        "  {} {} {}",
                        style("✗").red(),
                        style(format!("{} failed:", invocation.tool_name)).dim(),
                        style(preview).red()
                    ));
                } else {
                    self.line(format!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(format!("{} completed:", invocation.tool_name)).dim(),
                        style(preview).dim()
                    ));
                }
            }
            EngineEvent::RateLimited { wait } => {
                self.line(format!(
                    "{}",
                    style(format!("Rate limited, retrying in {}s...", wait.as_secs().max(1))).yellow()
                ));
            }
            EngineEvent::TurnComplete { .. } => {}
        }
    }

    pub fn outcome(&self, outcome: &TurnOutcome) {
        println!();
        println!("{}: {}", style("Assistant").bold().green(), outcome.text);
        if outcome.stop_reason == Some(StopReason::MaxTokens) {
            println!(
                "{}",
                style("(response cut off at max_tokens; try `extended_output on`)").yellow()
            );
        }
        let mut summary = format!(
            "[{} in / {} out tokens",
            outcome.usage.input_tokens, outcome.usage.output_tokens
        );
        if outcome.rounds > 0 {
            summary.push_str(&format!(", {} tool round(s)", outcome.rounds));
        }
        summary.push(']');
        println!("{}", style(summary).dim());
        println!();
    }

    pub fn error(&self, err: &Error) {
        match err {
            Error::Cancelled => println!(
                "{}",
                style("Interrupted. Completed tool rounds were kept.").yellow()
            ),
            _ => {
                println!("{}", style(format!("Error: {}", err)).red());
                if err.is_turn_fatal() {
                    println!("{}", style("The conversation is intact; send another message to continue.").dim());
                }
            }
        }
    }
}

pub fn success(message: impl AsRef<str>) {
    println!("{} {}", style("✓").green().bold(), message.as_ref());
}

pub fn warning(message: impl AsRef<str>) {
    println!("{}", style(message.as_ref()).yellow());
}

fn on_off(enabled: bool) -> console::StyledObject<&'static str> {
    if enabled { style("on").green() } else { style("off").red() }
}

pub fn status(status: &SessionStatus, show_thinking: bool) {
    println!("{}", style("Session:").bold());
    println!();
    println!("  {:<18} {}", "Id:", style(&status.id).dim());
    println!(
        "  {:<18} {}",
        "Name:",
        status.name.as_deref().unwrap_or("(unsaved)")
    );
    println!("  {:<18} {}", "Model:", style(&status.config.model).cyan());
    println!("  {:<18} {}", "Tools:", on_off(status.config.tools_enabled));
    println!(
        "  {:<18} {} (budget {}, {})",
        "Thinking:",
        on_off(status.config.thinking_enabled),
        status.config.thinking_budget,
        if show_thinking { "shown" } else { "hidden" }
    );
    println!("  {:<18} {}", "Extended output:", on_off(status.config.extended_output));
    println!(
        "  {:<18} {} ({} user turns)",
        "Messages:", status.messages, status.user_turns
    );
    println!(
        "  {:<18} ~{} of {}",
        "History tokens:", status.history_tokens, status.context_limit
    );
    println!(
        "  {:<18} {} in / {} out",
        "Usage:", status.usage.input_tokens, status.usage.output_tokens
    );
    if !status.tools.is_empty() {
        println!("  {:<18} {}", "Registered tools:", status.tools.join(", "));
    }
}

pub fn tools(specs: &[ToolDefinition], enabled: bool) {
    println!("{} ({})", style("Available Tools:").bold(), on_off(enabled));
    println!();
    if specs.is_empty() {
        println!("  {}", style("No tools registered").dim());
    }
    for spec in specs {
        println!("  {:<20} {}", style(&spec.name).cyan(), spec.description);
    }
}

pub fn conversations(list: &[ConversationSummary]) {
    if list.is_empty() {
        println!("{}", style("No saved conversations").dim());
        return;
    }
    println!("{}", style("Saved conversations:").bold());
    println!();
    for conversation in list {
        println!(
            "  {:<30} {:<28} {:>4} msgs  {}",
            style(&conversation.name).cyan(),
            conversation.model,
            conversation.message_count,
            style(conversation.updated_at.format("%Y-%m-%d %H:%M")).dim()
        );
    }
}

pub fn search_results(results: &[SearchResult]) {
    if results.is_empty() {
        warning("No results found");
        return;
    }
    println!();
    println!("{}", style(format!("Search Results ({} found):", results.len())).bold().cyan());
    println!();
    for (i, result) in results.iter().enumerate() {
        let title = if result.title.is_empty() { "No title" } else { result.title.as_str() };
        println!("{} {}", style(format!("[{}]", i + 1)).yellow().bold(), style(title).bold());
        println!("{}", style(&result.url).dim());
        let description = result.description.replace('\n', " ");
        if !description.trim().is_empty() {
            println!("{}", description.trim());
        }
        println!();
    }
}

pub fn config(config: &Config, path: &Path) {
    println!("{}", style("Configuration:").bold());
    println!();
    println!("  {:<18} {}", "Config file:", style(path.display()).dim());
    println!("  {:<18} {}", "Model:", style(&config.model.name).green());
    println!("  {:<18} {}", "Temperature:", config.model.temperature);
    println!("  {:<18} {}", "Max tokens:", config.model.max_tokens);
    println!(
        "  {:<18} {}",
        "API key:",
        key_state(config.model.get_api_key().is_some(), &config.model.api_key_env)
    );
    println!(
        "  {:<18} {}",
        "Brave Search key:",
        key_state(config.web_search.get_api_key().is_some(), &config.web_search.api_key_env)
    );
    println!(
        "  {:<18} {} (budget {})",
        "Thinking:",
        on_off(config.thinking.enabled),
        config.thinking.budget
    );
    println!(
        "  {:<18} {} (max {} rounds)",
        "Tools:",
        on_off(config.tools.enabled),
        config.tools.max_iterations
    );
}

fn key_state(present: bool, env: &str) -> String {
    if present {
        format!("{}", style("configured").green())
    } else {
        format!("{} (set {} or run `setup`)", style("missing").red(), env)
    }
}

fn compact_json(value: &serde_json::Value) -> String {
    let text = serde_json::to_string(value).unwrap_or_default();
    truncate(&text, PREVIEW_CHARS)
}

fn preview(output: &str) -> String {
    let first = output.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    truncate(first.trim(), PREVIEW_CHARS)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
