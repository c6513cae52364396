//! REPL command table
//!
//! Commands are looked up by name in a static table. A line whose first
//! word is not a command is sent to the model as a chat message, and so is
//! a line that passes arguments to a command that takes none ("clear up
//! something for me" is a question, not `clear`).

use anyhow::Context;
use console::style;

use parley_core::config::MODELS;
use parley_core::session::persistence;

use crate::display;
use crate::repl::Shell;
use crate::setup;

/// What the REPL should do after a command ran
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Continue,
    Chat(String),
    Search(SearchRequest),
    Quit,
}

/// A direct web search, run without the model
#[derive(Debug, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Falls back to the configured `max_results`
    pub count: Option<u64>,
    pub offset: u64,
}

pub type Handler = fn(&mut Shell, &str) -> anyhow::Result<Action>;

pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub about: &'static str,
    pub takes_args: bool,
    pub handler: Handler,
}

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "chat",
        aliases: &[],
        usage: "chat <message>",
        about: "Send a message (bare text works too)",
        takes_args: true,
        handler: chat,
    },
    CommandSpec {
        name: "thinking",
        aliases: &[],
        usage: "thinking [on|off|show|hide|budget N]",
        about: "Control extended thinking and its display",
        takes_args: true,
        handler: thinking,
    },
    CommandSpec {
        name: "tools",
        aliases: &[],
        usage: "tools [on|off|list]",
        about: "Enable, disable or list tools",
        takes_args: true,
        handler: tools,
    },
    CommandSpec {
        name: "model",
        aliases: &[],
        usage: "model [name]",
        about: "Show or switch the model",
        takes_args: true,
        handler: model,
    },
    CommandSpec {
        name: "extended_output",
        aliases: &[],
        usage: "extended_output [on|off]",
        about: "Toggle the 128k output beta",
        takes_args: true,
        handler: extended_output,
    },
    CommandSpec {
        name: "web_search",
        aliases: &[],
        usage: "web_search <query> [--count=N] [--offset=N]",
        about: "Search the web with Brave directly, without the model",
        takes_args: true,
        handler: web_search,
    },
    CommandSpec {
        name: "clear",
        aliases: &[],
        usage: "clear",
        about: "Start a new conversation with the same settings",
        takes_args: false,
        handler: clear,
    },
    CommandSpec {
        name: "save",
        aliases: &[],
        usage: "save [name]",
        about: "Save the conversation",
        takes_args: true,
        handler: save,
    },
    CommandSpec {
        name: "load",
        aliases: &[],
        usage: "load <name>",
        about: "Load a saved conversation",
        takes_args: true,
        handler: load,
    },
    CommandSpec {
        name: "list",
        aliases: &[],
        usage: "list",
        about: "List saved conversations",
        takes_args: false,
        handler: list,
    },
    CommandSpec {
        name: "status",
        aliases: &[],
        usage: "status",
        about: "Show session settings and token usage",
        takes_args: false,
        handler: status,
    },
    CommandSpec {
        name: "config",
        aliases: &[],
        usage: "config [save]",
        about: "Show the configuration, or save current settings as defaults",
        takes_args: true,
        handler: config,
    },
    CommandSpec {
        name: "setup",
        aliases: &[],
        usage: "setup",
        about: "Configure API keys",
        takes_args: false,
        handler: run_setup,
    },
    CommandSpec {
        name: "help",
        aliases: &["?"],
        usage: "help",
        about: "Show this help",
        takes_args: false,
        handler: help,
    },
    CommandSpec {
        name: "quit",
        aliases: &["exit"],
        usage: "quit",
        about: "Leave parley",
        takes_args: false,
        handler: quit,
    },
];

/// A line of input resolved against the command table
pub enum Parsed<'a> {
    Command(&'static CommandSpec, &'a str),
    Chat(&'a str),
    Empty,
}

pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|c| c.name == name || c.aliases.contains(&name))
}

pub fn parse(line: &str) -> Parsed<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Parsed::Empty;
    }
    let (name, args) = match line.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (line, ""),
    };
    match find(&name.to_lowercase()) {
        Some(spec) if spec.takes_args || args.is_empty() => Parsed::Command(spec, args),
        _ => Parsed::Chat(line),
    }
}

pub fn execute(shell: &mut Shell, line: &str) -> anyhow::Result<Action> {
    match parse(line) {
        Parsed::Empty => Ok(Action::Continue),
        Parsed::Chat(text) => Ok(Action::Chat(text.to_string())),
        Parsed::Command(spec, args) => (spec.handler)(shell, args),
    }
}

fn usage(command: &str) -> anyhow::Result<Action> {
    if let Some(spec) = find(command) {
        display::warning(format!("Usage: {}", spec.usage));
    }
    Ok(Action::Continue)
}

fn parse_toggle(args: &str) -> Option<bool> {
    match args.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn state(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn chat(_shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    if args.is_empty() {
        return usage("chat");
    }
    Ok(Action::Chat(args.to_string()))
}

fn thinking(shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    let mut words = args.split_whitespace();
    match (words.next(), words.next()) {
        (None, _) => {
            let config = shell.session.config();
            println!(
                "Thinking is {} (budget {} tokens, {})",
                state(config.thinking_enabled),
                config.thinking_budget,
                if shell.display.show_thinking() { "shown" } else { "hidden" }
            );
        }
        (Some("show"), None) => {
            shell.display.set_show_thinking(true);
            display::success("Thinking will be shown");
        }
        (Some("hide"), None) => {
            shell.display.set_show_thinking(false);
            display::success("Thinking will be hidden");
        }
        (Some("budget"), Some(value)) => {
            let Ok(requested) = value.parse::<u32>() else {
                return usage("thinking");
            };
            let budget = shell.session.set_thinking_budget(requested);
            if budget != requested {
                display::warning(format!("Budget raised to the minimum of {} tokens", budget));
            }
            display::success(format!("Thinking budget set to {} tokens", budget));
        }
        (Some(toggle), None) => match parse_toggle(toggle) {
            Some(enabled) => {
                shell.session.set_thinking_enabled(enabled);
                display::success(format!("Thinking {}", state(enabled)));
            }
            None => return usage("thinking"),
        },
        _ => return usage("thinking"),
    }
    Ok(Action::Continue)
}

fn tools(shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    match args {
        "" => println!("Tools are {}", state(shell.session.config().tools_enabled)),
        "list" => display::tools(
            &shell.session.engine().registry().list_specs(),
            shell.session.config().tools_enabled,
        ),
        toggle => match parse_toggle(toggle) {
            Some(enabled) => {
                shell.session.set_tools_enabled(enabled);
                display::success(format!("Tools {}", state(enabled)));
            }
            None => return usage("tools"),
        },
    }
    Ok(Action::Continue)
}

fn model(shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    if args.is_empty() {
        let current = shell.session.config().model.clone();
        println!("{}", style("Models:").bold());
        for name in MODELS {
            if *name == current {
                println!("  {} {}", style("*").green(), style(name).green());
            } else {
                println!("    {}", name);
            }
        }
        if !MODELS.contains(&current.as_str()) {
            println!("  {} {}", style("*").green(), style(&current).green());
        }
        return Ok(Action::Continue);
    }

    if !MODELS.contains(&args) {
        display::warning(format!("{} is not a known model; using it anyway", args));
    }
    shell.session.set_model(args);
    display::success(format!("Model set to {}", args));
    Ok(Action::Continue)
}

fn extended_output(shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    if args.is_empty() {
        println!("Extended output is {}", state(shell.session.config().extended_output));
        return Ok(Action::Continue);
    }
    match parse_toggle(args) {
        Some(enabled) => {
            shell.session.set_extended_output(enabled);
            display::success(format!("Extended output {}", state(enabled)));
            Ok(Action::Continue)
        }
        None => usage("extended_output"),
    }
}

fn parse_search(args: &str) -> Result<SearchRequest, String> {
    let mut query = Vec::new();
    let mut count = None;
    let mut offset = 0;
    for word in args.split_whitespace() {
        if let Some(value) = word.strip_prefix("--count=") {
            count = Some(value.parse().map_err(|_| format!("Invalid count value: {}", value))?);
        } else if let Some(value) = word.strip_prefix("--offset=") {
            offset = value.parse().map_err(|_| format!("Invalid offset value: {}", value))?;
        } else {
            query.push(word);
        }
    }
    if query.is_empty() {
        return Err("Please provide a search query".to_string());
    }
    Ok(SearchRequest {
        query: query.join(" "),
        count,
        offset,
    })
}

fn web_search(_shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    if args.is_empty() {
        return usage("web_search");
    }
    match parse_search(args) {
        Ok(request) => Ok(Action::Search(request)),
        Err(message) => {
            display::warning(message);
            Ok(Action::Continue)
        }
    }
}

fn clear(shell: &mut Shell, _args: &str) -> anyhow::Result<Action> {
    shell.session.clear();
    display::success("Conversation cleared");
    Ok(Action::Continue)
}

fn save(shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    let name = (!args.is_empty()).then_some(args);
    let path = shell.session.save(name).context("Failed to save conversation")?;
    display::success(format!("Saved to {}", path.display()));
    Ok(Action::Continue)
}

fn load(shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    if args.is_empty() {
        return usage("load");
    }
    shell.session.load(args)?;
    display::success(format!(
        "Loaded {} ({} messages, model {})",
        args,
        shell.session.store().len(),
        shell.session.config().model
    ));
    Ok(Action::Continue)
}

fn list(_shell: &mut Shell, _args: &str) -> anyhow::Result<Action> {
    display::conversations(&persistence::list()?);
    Ok(Action::Continue)
}

fn status(shell: &mut Shell, _args: &str) -> anyhow::Result<Action> {
    display::status(&shell.session.status(), shell.display.show_thinking());
    Ok(Action::Continue)
}

fn config(shell: &mut Shell, args: &str) -> anyhow::Result<Action> {
    match args {
        "" => display::config(shell.config.config(), shell.config.path()),
        "save" => {
            shell.config.update_from_session(shell.session.config());
            shell.config.config_mut().thinking.show = shell.display.show_thinking();
            shell.config.save()?;
            display::success(format!("Defaults saved to {}", shell.config.path().display()));
        }
        _ => return usage("config"),
    }
    Ok(Action::Continue)
}

fn run_setup(shell: &mut Shell, _args: &str) -> anyhow::Result<Action> {
    if setup::run(&mut shell.config)? {
        shell.session.reconfigure(shell.config.config())?;
    }
    Ok(Action::Continue)
}

fn help(_shell: &mut Shell, _args: &str) -> anyhow::Result<Action> {
    println!("{}", style("Commands:").bold());
    println!();
    for spec in COMMANDS {
        println!("  {:<40} {}", style(spec.usage).cyan(), spec.about);
    }
    println!();
    println!(
        "{}",
        style("Anything else is sent to Claude. Ctrl-C interrupts a running turn.").dim()
    );
    Ok(Action::Continue)
}

fn quit(_shell: &mut Shell, _args: &str) -> anyhow::Result<Action> {
    Ok(Action::Quit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_name(line: &str) -> Option<&'static str> {
        match parse(line) {
            Parsed::Command(spec, _) => Some(spec.name),
            _ => None,
        }
    }

    #[test]
    fn test_command_names_unique() {
        let mut names: Vec<&str> = COMMANDS
            .iter()
            .flat_map(|c| std::iter::once(c.name).chain(c.aliases.iter().copied()))
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_parse_commands_and_args() {
        match parse("  thinking budget 4096 ") {
            Parsed::Command(spec, args) => {
                assert_eq!(spec.name, "thinking");
                assert_eq!(args, "budget 4096");
            }
            _ => panic!("expected a command"),
        }
        assert_eq!(command_name("exit"), Some("quit"));
        assert_eq!(command_name("QUIT"), Some("quit"));
        assert_eq!(command_name("save"), Some("save"));
    }

    #[test]
    fn test_bare_text_is_chat() {
        assert!(matches!(parse("what is rust?"), Parsed::Chat("what is rust?")));
        assert!(matches!(parse("   "), Parsed::Empty));
    }

    #[test]
    fn test_argless_command_with_text_is_chat() {
        assert!(matches!(parse("clear up the difference between tcp and udp"), Parsed::Chat(_)));
        assert!(matches!(parse("list three rust web frameworks"), Parsed::Chat(_)));
        assert_eq!(command_name("clear"), Some("clear"));
    }

    #[test]
    fn test_parse_search_options() {
        assert_eq!(
            parse_search("rust async runtimes --count=3 --offset=2").unwrap(),
            SearchRequest {
                query: "rust async runtimes".into(),
                count: Some(3),
                offset: 2,
            }
        );
        assert_eq!(parse_search("tokio").unwrap().count, None);
        assert!(parse_search("tokio --count=many").is_err());
        assert!(parse_search("--offset=1").is_err());
        assert_eq!(command_name("web_search tokio"), Some("web_search"));
    }

    #[test]
    fn test_parse_toggle() {
        assert_eq!(parse_toggle("ON"), Some(true));
        assert_eq!(parse_toggle("off"), Some(false));
        assert_eq!(parse_toggle("maybe"), None);
    }
}
