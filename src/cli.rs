use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docrag",
    about = "Retrieve the passages of your documents that answer a question"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Chunk size in characters (overrides DOCRAG_CHUNK_SIZE)
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Chunk overlap in characters (overrides DOCRAG_CHUNK_OVERLAP)
    #[arg(long, global = true)]
    pub overlap: Option<usize>,

    /// Print the structured response as JSON
    #[arg(long, global = true)]
    pub json: bool,

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
    /// Add .md/.txt files or directories to the document store
    Add(AddArgs),
    /// Retrieve the chunks most relevant to a query
    Search(SearchArgs),
    /// Delete documents by file name
    Delete(DeleteArgs),
    /// Remove every stored chunk
    Clear,
    /// Show store statistics
    Stats,
    /// Preview how a file would be chunked, without storing it
    Chunk(ChunkArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Files or directories to ingest
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results per retriever (overrides DOCRAG_TOP_K)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Minimum score (overrides DOCRAG_SIMILARITY_THRESHOLD)
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Print the assembled generation context instead of a result list
    #[arg(long)]
    pub context: bool,
}

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// File names of the documents to delete
    #[arg(required = true)]
    pub file_names: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct ChunkArgs {
    /// File to chunk
    pub path: PathBuf,
}

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
            "docrag",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docrag", "search", "self-attention"]);
        assert!(!cli.json);
        assert_eq!(cli.verbose, 0);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "self-attention");
                assert_eq!(args.count, None);
                assert_eq!(args.min_score, None);
                assert!(!args.context);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "docrag",
            "delete",
            "a.md",
            "b.md",
            "--json",
            "-vv",
            "--chunk-size",
            "500",
        ]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.chunk_size, Some(500));
        match cli.command {
            Command::Delete(args) => {
                assert_eq!(args.file_names, ["a.md", "b.md"])
            }
            _ => panic!("expected delete command"),
        }
    }

    #[test]
    fn add_requires_a_path() {
        assert!(Cli::try_parse_from(["docrag", "add"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
