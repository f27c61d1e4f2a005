use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use docrag::{
    DataDir,
    RagSystem,
    Response,
    chunking::chunk_with,
    cli::{self, Cli, Command},
    config::RagConfig,
    error,
    ingestion::{PlainTextExtractor, discover_files},
    upstream::Extractor,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = RagConfig::from_env()?;
    if let Some(size) = cli.chunk_size {
        config.chunking.chunk_size = size;
    }
    if let Some(overlap) = cli.overlap {
        config.chunking.overlap = overlap;
    }

    if let Command::Chunk(args) = &cli.command {
        return cmd_chunk(&config, args, cli.json);
    }
    if let Command::Search(args) = &cli.command {
        if let Some(count) = args.count {
            config.top_k = count;
        }
        if let Some(min_score) = args.min_score {
            config.similarity_threshold = min_score;
        }
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let mut system = RagSystem::open_lexical(&data_dir, config)?;

    match cli.command {
        Command::Add(args) => {
            let mut paths = Vec::new();
            for path in &args.paths {
                paths.extend(discover_files(path)?);
            }
            if paths.is_empty() {
                eprintln!("No .md or .txt files found");
                return Ok(ExitCode::FAILURE);
            }
            let response = system.ingest_paths(&PlainTextExtractor, &paths);
            finish(response, cli.json, |report| {
                println!(
                    "Added {} chunks from {} files ({} replaced)",
                    report.summary.chunks_added,
                    report.extracted.len(),
                    report.summary.chunks_replaced
                );
                for path in &report.failed {
                    println!("  failed: {}", path.display());
                }
            })
        }
        Command::Search(args) if args.context => {
            let response = system.context(&args.query);
            finish(response, cli.json, |context| {
                println!("{}", context.text);
                println!();
                for source in &context.sources {
                    println!(
                        "[{}] {} (chunk {}, score {:.3})",
                        source.rank,
                        source.file_name,
                        source.chunk_index,
                        source.score
                    );
                }
            })
        }
        Command::Search(args) => {
            let response = system.retrieve(&args.query);
            finish(response, cli.json, |results| {
                if results.is_empty() {
                    println!("No results.");
                }
                for r in results {
                    println!(
                        "{:>3}. {}#{} (score: {:.3})",
                        r.rank,
                        r.chunk.source_document_id,
                        r.chunk.chunk_index,
                        r.score
                    );
                    println!("     {}", preview(r.context_text(), 120));
                }
            })
        }
        Command::Delete(args) => {
            let response = system.delete(&args.file_names);
            finish(response, cli.json, |summary| {
                if summary.is_no_match() {
                    println!("No matching documents.");
                } else {
                    println!(
                        "Deleted {} chunks from {}",
                        summary.deleted_count,
                        summary.deleted_documents.join(", ")
                    );
                }
            })
        }
        Command::Clear => {
            let response = system.clear();
            finish(response, cli.json, |_| println!("Cleared document store"))
        }
        Command::Stats => {
            let response = system.system_stats();
            finish(response, cli.json, |stats| {
                println!("Data directory: {}", data_dir.root().display());
                println!("Chunks: {}", stats.store.total_chunks);
                println!("Documents: {}", stats.store.unique_source_documents);
                for name in &stats.store.source_documents {
                    let count = stats
                        .store
                        .chunks_per_document
                        .get(name)
                        .copied()
                        .unwrap_or(0);
                    println!("  {name}: {count} chunks");
                }
                println!(
                    "Chunking: size {}, overlap {}",
                    stats.config.chunking.chunk_size,
                    stats.config.chunking.overlap
                );
                println!(
                    "Retrieval: top_k {}, threshold {}",
                    stats.config.top_k, stats.config.similarity_threshold
                );
            })
        }
        Command::Chunk(_) | Command::Completions(_) => Ok(ExitCode::SUCCESS),
    }
}

fn cmd_chunk(
    config: &RagConfig,
    args: &cli::ChunkArgs,
    json: bool,
) -> error::Result<ExitCode> {
    let response: Response<Vec<String>> = PlainTextExtractor
        .extract(&args.path)
        .and_then(|doc| chunk_with(&doc.text, &config.chunking))
        .into();
    finish(response, json, |chunks| {
        for (i, chunk) in chunks.iter().enumerate() {
            println!("--- chunk {i} ({} chars) ---", chunk.chars().count());
            println!("{chunk}");
        }
    })
}

/// Print a response, as JSON or through `human`, and pick the exit code.
fn finish<T: Serialize>(
    response: Response<T>,
    json: bool,
    human: impl FnOnce(&T),
) -> error::Result<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        for warning in &response.warnings {
            eprintln!("warning: {}", warning.message);
        }
        if let Some(data) = &response.data {
            human(data);
        }
        if let Some(error) = &response.error {
            eprintln!("error: {}", error.message);
        }
    }

    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}...")
}
