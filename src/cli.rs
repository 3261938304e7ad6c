use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use pagebert::{SearchMode, item::ItemKind, ranker::Normalization};

#[derive(Debug, Parser)]
#[command(
    name = "pagebert",
    about = "Two-stage multi-vector search over document pages and text"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

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
    /// Search visual pages and text chunks
    Search(SearchArgs),
    /// Load items with precomputed embeddings from a JSONL file
    Load(LoadArgs),
    /// Remove one item from a collection
    Remove(RemoveArgs),
    /// Show item counts and effective configuration
    Status(StatusArgs),
    /// Manage stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Search --

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ModeArg {
    #[default]
    Hybrid,
    VisualOnly,
    TextOnly,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Hybrid => SearchMode::Hybrid,
            ModeArg::VisualOnly => SearchMode::VisualOnly,
            ModeArg::TextOnly => SearchMode::TextOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NormalizationArg {
    MinMax,
    ZScore,
    None,
}

impl From<NormalizationArg> for Normalization {
    fn from(arg: NormalizationArg) -> Self {
        match arg {
            NormalizationArg::MinMax => Normalization::MinMax,
            NormalizationArg::ZScore => Normalization::ZScore,
            NormalizationArg::None => Normalization::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum EmbedderArg {
    /// ColBERT model inference
    #[default]
    Colbert,
    /// Seeded token hashing, for embeddings produced the same way
    Hashing,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Collections to search
    #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
    pub mode: ModeArg,

    /// Metadata filters as JSON, e.g. '{"page_range": {"min": 1, "max": 5}}'
    #[arg(long)]
    pub filters: Option<String>,

    /// Skip MaxSim reranking and rank by Stage-1 scores
    #[arg(long)]
    pub no_rerank: bool,

    /// Rerank only the top N candidates of each collection
    #[arg(long)]
    pub rerank_candidates: Option<usize>,

    /// Score normalization for this query
    #[arg(long, value_enum)]
    pub normalization: Option<NormalizationArg>,

    /// Query embedder
    #[arg(long, value_enum, default_value_t = EmbedderArg::Colbert)]
    pub embedder: EmbedderArg,

    /// Output the full response as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Load --

#[derive(Debug, Parser)]
pub struct LoadArgs {
    /// JSONL file, one item per line
    pub path: PathBuf,
}

// -- Remove --

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Visual,
    Text,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Visual => ItemKind::Visual,
            KindArg::Text => ItemKind::Text,
        }
    }
}

#[derive(Debug, Parser)]
pub struct RemoveArgs {
    /// Collection holding the item
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Item ID
    pub id: String,
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
    /// Show effective settings and which are stored
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.db
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
    /// Remove a stored setting (revert to default)
    Clear {
        /// Setting name
        key: String,
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
            "pagebert",
            &mut std::io::stdout(),
        );
    }
}
