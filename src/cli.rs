use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docmux",
    about = "Ranked, deduplicated search across many documentation sources"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Ranking configuration file (default: <data dir>/ranking.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search across all documentation sources
    Search(SearchArgs),
    /// Show the query variants and context a query expands to
    Expand(ExpandArgs),
    /// Load a JSON-lines document dump into the index
    Ingest(IngestArgs),
    /// Show configuration and index statistics
    Status(StatusArgs),
    /// Inspect the ranking configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Maximum number of results (default from configuration)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Maximum results from any one source
    #[arg(long)]
    pub per_source: Option<usize>,

    /// Restrict to sources whose id or library id matches (glob, repeatable)
    #[arg(short = 's', long = "source")]
    pub sources: Vec<String>,

    /// File with code or markup the query is about
    #[arg(long)]
    pub content: Option<PathBuf>,

    /// Minimum score threshold
    #[arg(long, default_value = "0.0")]
    pub min_score: f32,

    /// Retrieval timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Expand --

#[derive(Debug, Parser)]
pub struct ExpandArgs {
    /// The query to expand
    pub query: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// JSON-lines file, one document per line
    pub file: PathBuf,

    /// Remove existing documents of every source in the file first
    #[arg(long)]
    pub replace: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Validate a configuration file and summarize it
    Check {
        /// File to check (default: the active configuration file)
        path: Option<PathBuf>,
    },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docmux",
            &mut std::io::stdout(),
        );
    }
}
