//! Idembot CLI - runs the built-in rules over GitHub repositories.

mod commands;
mod config;
mod progress;
mod rules;
mod setup;
mod shutdown;

use std::path::PathBuf;

use clap::Parser;
use console::Term;
use idembot::IssueRef;
use tracing_subscriber::EnvFilter;

use crate::setup::SetupFile;

#[derive(Parser)]
#[command(name = "idembot")]
#[command(version)]
#[command(about = "An idempotent rule bot for GitHub issues and pull requests")]
#[command(
    long_about = "Idembot runs a set of rules over the issues and pull requests of GitHub \
repositories. Rules ask for a target state (labels, comments, locks, project columns, \
merges) and the bot writes only what differs, so running it again changes nothing."
)]
#[command(after_long_help = r#"EXAMPLES
    Run every rule over what changed since the last run:
        $ idembot -f rules.toml

    See what would change without writing anything:
        $ idembot --dry

    Run two rules over the 20 most recently updated open pull requests:
        $ idembot -r automerge,pr-summary -q queries/open-prs.json

    Run on a single pull request:
        $ idembot --single octo/bot#42

    List the available rules:
        $ idembot --ls

CONFIGURATION
    Idembot reads configuration from:
      1. ~/.config/idembot/config.toml (or $XDG_CONFIG_HOME/idembot/config.toml)
      2. ./idembot.toml
      3. Environment variables (IDEMBOT_* prefix, e.g., IDEMBOT_GITHUB_TOKEN)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    IDEMBOT_GITHUB_TOKEN      GitHub personal access token
    AUTH_TOKEN                Same, read when IDEMBOT_GITHUB_TOKEN is unset
    RUST_LOG                  Log filter (default: idembot=info,idembot_cli=info)
"#)]
pub(crate) struct Cli {
    /// Setup file listing repositories and rule settings
    #[arg(short = 'f', long = "file", default_value = "rules.toml")]
    pub file: PathBuf,

    /// Evaluate actions and report them without writing to GitHub
    #[arg(short = 'd', long = "dry")]
    pub dry: bool,

    /// Only run these rules (comma-separated)
    #[arg(short = 'r', long = "rules", value_delimiter = ',')]
    pub rules: Vec<String>,

    /// List the available rules and exit
    #[arg(long = "ls")]
    pub ls: bool,

    /// Query files selecting the items to visit (comma-separated)
    #[arg(short = 'q', long = "query", value_delimiter = ',', conflicts_with = "single")]
    pub query: Vec<PathBuf>,

    /// Run on one issue or pull request, written owner/name#number
    #[arg(long, value_name = "OWNER/NAME#NUMBER")]
    pub single: Option<IssueRef>,

    /// Keep executing queued actions after one fails
    #[arg(short = 'k', long)]
    pub keep_going: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (silently ignore if missing)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Progress bars own the terminal in interactive mode, so only warnings
    // are logged there unless RUST_LOG says otherwise.
    let is_tty = Term::stdout().is_term();
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if is_tty => EnvFilter::new("idembot=warn,idembot_cli=warn"),
        Err(_) => EnvFilter::new("idembot=info,idembot_cli=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(Term::stderr().is_term())
        .init();

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let setup = SetupFile::load(&cli.file)
        .map_err(|e| format!("Error loading setup file {}: {e}", cli.file.display()))?;
    let settings = setup.as_ref().map(|s| s.rules.clone()).unwrap_or_default();
    let mut registry = rules::builtin(&settings);
    if !cli.rules.is_empty() {
        registry.retain(&cli.rules)?;
    }

    if cli.ls {
        commands::list::handle_ls(&registry);
        return Ok(());
    }

    shutdown::setup_shutdown_handler();
    commands::run::handle_run(&cli, &config, setup, registry).await
}
