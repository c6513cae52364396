//! Interactive shell

use std::path::PathBuf;

use console::style;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tracing::warn;

use parley_core::config::ConfigManager;
use parley_core::tools::web::WebSearch;
use parley_core::{CancellationToken, ChatSession, EngineEvent, TurnOutcome};

use crate::commands::{self, Action, SearchRequest};
use crate::display::{self, Display};

const PROMPT: &str = "parley> ";

/// The REPL: one session, the config it came from, and its renderer
pub struct Shell {
    pub(crate) session: ChatSession,
    pub(crate) config: ConfigManager,
    pub(crate) display: Display,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Shell {
    pub fn new(mut session: ChatSession, config: ConfigManager, show_thinking: bool) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        session.engine_mut().set_events(Some(tx));
        Self {
            session,
            config,
            display: Display::new(show_thinking),
            events,
        }
    }

    /// Run one turn, rendering progress until it finishes
    ///
    /// Ctrl-C cancels the turn; the session keeps every completed round.
    pub async fn turn(&mut self, input: &str) -> parley_core::Result<TurnOutcome> {
        let cancel = CancellationToken::new();
        self.display.start_spinner("Waiting for Claude...");

        let result = {
            let turn = self.session.send(input, &cancel);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    result = &mut turn => break result,
                    Some(event) = self.events.recv() => self.display.event(&event),
                    _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => cancel.cancel(),
                }
            }
        };

        while let Ok(event) = self.events.try_recv() {
            self.display.event(&event);
        }
        self.display.stop_spinner();

        if let Ok(outcome) = &result {
            self.display.outcome(outcome);
        }
        result
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut editor = DefaultEditor::new()?;
        let history = history_path();
        if let Some(path) = &history {
            // first run has no history yet
            let _ = editor.load_history(path);
        }

        self.banner();

        loop {
            let line = match tokio::task::block_in_place(|| editor.readline(PROMPT)) {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => return Err(e.into()),
            };
            if line.trim().is_empty() {
                continue;
            }
            let _ = editor.add_history_entry(line.as_str());

            match commands::execute(self, &line) {
                Ok(Action::Continue) => {}
                Ok(Action::Chat(text)) => {
                    if let Err(e) = self.turn(&text).await {
                        self.display.error(&e);
                    }
                }
                Ok(Action::Search(request)) => self.web_search(request).await,
                Ok(Action::Quit) => break,
                Err(e) => println!("{}", style(format!("Error: {:#}", e)).red()),
            }
        }

        if let Some(path) = &history {
            if let Err(e) = editor.save_history(path) {
                warn!(error = %e, "Failed to save command history");
            }
        }
        println!("Goodbye!");
        Ok(())
    }

    /// Query Brave directly and print the hits
    async fn web_search(&mut self, request: SearchRequest) {
        let tool = WebSearch::with_config(self.config.config().web_search.clone());
        let count = request.count.unwrap_or_else(|| tool.default_count());

        self.display.start_spinner(&format!("Searching for: {}", request.query));
        let result = tool.search(&request.query, count, request.offset).await;
        self.display.stop_spinner();

        match result {
            Ok(results) => display::search_results(&results),
            Err(e) => println!("{}", style(format!("Search error: {}", e)).red()),
        }
    }

    fn banner(&self) {
        let config = self.session.config();
        println!("{}", style("Parley").bold().cyan());
        println!(
            "{}",
            style(format!(
                "Model {} | tools {} | thinking {}",
                config.model,
                if config.tools_enabled { "on" } else { "off" },
                if config.thinking_enabled { "on" } else { "off" }
            ))
            .dim()
        );
        println!("{}", style("Type `help` for commands, `quit` to leave.").dim());
        println!();
    }
}

fn history_path() -> Option<PathBuf> {
    ConfigManager::default_config_path()
        .ok()
        .and_then(|p| p.parent().map(|dir| dir.join("history.txt")))
}
