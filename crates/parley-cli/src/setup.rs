//! Interactive API key setup

use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Password};

use parley_core::config::ConfigManager;

const ANTHROPIC_SIGNUP_URL: &str = "https://console.anthropic.com/";
const BRAVE_SIGNUP_URL: &str = "https://brave.com/search/api/";

/// Prompt for the Anthropic and Brave Search keys and save them
///
/// Returns whether anything changed.
pub fn run(manager: &mut ConfigManager) -> anyhow::Result<bool> {
    let theme = ColorfulTheme::default();
    let mut changed = false;

    println!();
    println!("{}", style("Parley setup").bold().cyan());
    println!();

    let ask_anthropic = !manager.has_api_key()
        || Confirm::with_theme(&theme)
            .with_prompt("An Anthropic API key is configured. Replace it?")
            .default(false)
            .interact()?;

    if ask_anthropic {
        println!(
            "  Get your API key at: {}",
            style(ANTHROPIC_SIGNUP_URL).cyan().underlined()
        );
        let api_key: String = Password::with_theme(&theme)
            .with_prompt(manager.config().model.api_key_env.as_str())
            .interact()?;
        let api_key = api_key.trim();
        if !api_key.is_empty() {
            manager.config_mut().model.api_key = Some(api_key.to_string());
            changed = true;
        }
    }

    println!();
    let has_search_key = manager.config().web_search.get_api_key().is_some();
    let ask_brave = Confirm::with_theme(&theme)
        .with_prompt(if has_search_key {
            "A Brave Search key is configured. Replace it?"
        } else {
            "Set up Brave Search for the search_web tool?"
        })
        .default(!has_search_key)
        .interact()?;

    if ask_brave {
        println!(
            "  Get your API key at: {}",
            style(BRAVE_SIGNUP_URL).cyan().underlined()
        );
        let api_key: String = Password::with_theme(&theme)
            .with_prompt(manager.config().web_search.api_key_env.as_str())
            .interact()?;
        let api_key = api_key.trim();
        if !api_key.is_empty() {
            manager.config_mut().web_search.api_key = Some(api_key.to_string());
            changed = true;
        }
    }

    println!();
    if changed {
        manager.save()?;
        println!(
            "  {} {}",
            style("✓").green().bold(),
            style(format!("Saved to {}", manager.path().display())).green()
        );
    } else {
        println!("  {}", style("Nothing changed.").dim());
    }

    Ok(changed)
}

/// Explain how to provide a key when none is configured
pub fn show_instructions(manager: &ConfigManager) {
    let env_var = &manager.config().model.api_key_env;
    println!("{}", style("Welcome to Parley!").bold().cyan());
    println!();
    println!("{}", style("Setup Required").bold().yellow());
    println!("No Anthropic API key configured.");
    println!();
    println!("{}", style("Option 1: Environment Variable (Quick)").bold());
    println!("  export {}=\"your-api-key-here\"", style(env_var).cyan());
    println!();
    println!("{}", style("Option 2: Config File (Persistent)").bold());
    println!("  Run {} or edit {}", style("parley setup").cyan(), style(manager.path().display()).cyan());
    println!();
    println!("Get your API key at: {}", style(ANTHROPIC_SIGNUP_URL).cyan());
}
