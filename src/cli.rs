use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use hydrag::{hyde::RetrievalMode, preamble::Language};

#[derive(Debug, Parser)]
#[command(
    name = "hydrag",
    about = "Ask questions of your documents, with HyDE retrieval and cited answers"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Configuration file (defaults to config.json in the data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage document collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Load documents into a collection
    Ingest(IngestArgs),
    /// Show the chunks closest to a query
    Search(SearchArgs),
    /// Answer a question from a collection
    Ask(AskArgs),
    /// Hold a conversation with a collection, one question per line
    Chat(ChatArgs),
    /// Answer every question in a file and write a report
    Batch(BatchArgs),
    /// Judge two batch reports against each other
    Compare(CompareArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// List all collections
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the documents loaded in a collection
    Sources {
        /// Collection name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove documents (by file name) from a collection
    Delete {
        /// Collection name
        name: String,
        /// File names of the documents to remove
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// Remove a collection and everything in it
    Drop {
        /// Collection name
        name: String,
    },
}

// -- Shared --

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Classic,
    Hyde,
}

impl From<ModeArg> for RetrievalMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Classic => RetrievalMode::Classic,
            ModeArg::Hyde => RetrievalMode::Hyde,
        }
    }
}

fn parse_language(s: &str) -> Result<Language, String> {
    s.parse().map_err(|e: hydrag::Error| e.to_string())
}

#[derive(Debug, Clone, Parser)]
pub struct QueryOptions {
    /// Collection to query (defaults to the configured one)
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Retrieval mode
    #[arg(long, value_enum, default_value = "hyde")]
    pub mode: ModeArg,

    /// Answer language (en, it, es, fr)
    #[arg(long, value_parser = parse_language)]
    pub lang: Option<Language>,

    /// Rerank retrieved chunks before answering
    #[arg(long)]
    pub rerank: bool,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Files or directories to load
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Target collection (defaults to the configured one)
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Fail if the collection already exists instead of adding to it
    #[arg(long)]
    pub new_only: bool,

    /// Maximum chunk length in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared between consecutive chunks
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Only load files whose relative path matches (repeatable)
    #[arg(long = "glob")]
    pub globs: Vec<String>,

    /// Output the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Collection to search (defaults to the configured one)
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Number of results to return
    #[arg(
        short = 'n',
        long,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub count: Option<u64>,

    /// Rerank retrieved chunks
    #[arg(long)]
    pub rerank: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub query: String,

    #[command(flatten)]
    pub options: QueryOptions,

    /// Stream the answer from the model
    #[arg(long)]
    pub stream: bool,

    /// Output the full outcome as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Chat --

#[derive(Debug, Parser)]
pub struct ChatArgs {
    #[command(flatten)]
    pub options: QueryOptions,

    /// Earlier turns to keep in the conversation (0 keeps everything)
    #[arg(long, default_value_t = 10)]
    pub max_turns: usize,
}

// -- Batch --

#[derive(Debug, Parser)]
pub struct BatchArgs {
    /// File with one question per line (blank lines and # comments skipped)
    pub questions: PathBuf,

    #[command(flatten)]
    pub options: QueryOptions,

    /// Report directory (defaults to reports/ in the data directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Report file name, without extension
    #[arg(long, default_value = "report")]
    pub name: String,
}

// -- Compare --

#[derive(Debug, Parser)]
pub struct CompareArgs {
    /// First JSON report
    pub first: PathBuf,

    /// Second JSON report
    pub second: PathBuf,

    /// Collection used to fetch context for the judge
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Write the comparison here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
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
            "hydrag",
            &mut std::io::stdout(),
        );
    }
}
