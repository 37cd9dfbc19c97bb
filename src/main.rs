use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;

use loglens::config::{Config, QueuePolicy};
use loglens::embed::{Embedder, HashEmbedder, DEFAULT_EMBEDDING_DIM};
use loglens::error::Error;
use loglens::manager::Pipeline;
use loglens::parser::{self, Command};
use loglens::query::QueryEngine;
use loglens::LogStore;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Semantic search over live system logs", long_about = None)]
struct Args {
    /// Capacity bound on retained records (oldest evicted first)
    #[clap(long, default_value_t = loglens::config::DEFAULT_MAX_RECORDS)]
    max_records: usize,

    /// Repeat-suppression window in seconds
    #[clap(long, default_value_t = loglens::config::DEFAULT_FLUSH_INTERVAL_SECS)]
    flush_interval: u64,

    /// Consumer idle timeout in milliseconds
    #[clap(long, default_value_t = loglens::config::DEFAULT_QUEUE_TIMEOUT_MS)]
    queue_timeout_ms: u64,

    /// Raw-line queue capacity
    #[clap(long, default_value_t = loglens::config::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Full-queue policy: block or drop
    #[clap(long, default_value = "block")]
    queue_policy: String,

    /// Embed once this many flushed entries have accumulated
    #[clap(long, default_value_t = loglens::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Log source command line
    #[clap(long, default_value = "journalctl -f -o short")]
    source: String,

    /// Embedding vector width
    #[clap(long, default_value_t = DEFAULT_EMBEDDING_DIM)]
    dim: usize,

    /// Grace period for in-flight work on shutdown, in seconds
    #[clap(long, default_value_t = loglens::config::DEFAULT_SHUTDOWN_GRACE_SECS)]
    grace_secs: u64,
}

fn main() {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores.max(2))
        .enable_all()
        .build()
        .expect("failed to build runtime")
        .block_on(async_main());
}

async fn async_main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,loglens=info");
    }
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    let policy = match args.queue_policy.to_ascii_lowercase().as_str() {
        "block" => QueuePolicy::Block,
        "drop" => QueuePolicy::Drop,
        other => {
            eprintln!("unknown queue policy '{other}', expected 'block' or 'drop'");
            std::process::exit(2);
        }
    };

    let config = Config {
        max_records: args.max_records,
        flush_interval_secs: args.flush_interval,
        queue_timeout_ms: args.queue_timeout_ms,
        queue_capacity: args.queue_capacity,
        queue_policy: policy,
        batch_size: args.batch_size,
        source_command: args.source.split_whitespace().map(str::to_string).collect(),
        shutdown_grace_secs: args.grace_secs,
    };

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(args.dim));
    let store = Arc::new(LogStore::new(config.max_records, embedder.dim()));
    let engine = QueryEngine::new(store.clone(), embedder.clone());

    tracing::info!(
        embedder = embedder.id(),
        dim = embedder.dim(),
        capacity = config.max_records,
        "starting ingestion pipeline"
    );
    let pipeline = Pipeline::start(&config, store, embedder);

    print_banner();
    run_repl(&engine, &pipeline).await;

    println!("Shutting down...");
    pipeline.shutdown().await;
}

async fn run_repl(engine: &QueryEngine, pipeline: &Pipeline) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("loglens> ");
        std::io::stdout().flush().ok();

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&line) {
            Ok(Command::Search { query, k, display }) => match engine.search(&query, k, display) {
                Ok(results) => {
                    for result in &results {
                        println!("  {result}");
                    }
                }
                Err(e @ (Error::InvalidQuery | Error::InvalidArgument(_))) => {
                    println!("[!] {e}");
                }
                Err(e) => println!("[!] search failed: {e}"),
            },
            Ok(Command::Stats) => println!("{}", pipeline.stats()),
            Ok(Command::Help) => print_help(),
            Ok(Command::Exit) => break,
            Err(e) => {
                println!("[syntax error] {e}");
                println!("    Type 'HELP' for the command list.");
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   loglens - semantic search over system logs");
    println!("==================================================");
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. SEARCH:  SEARCH \"disk error\" [K=5] [DISPLAY=raw|pretty|json]");
    println!("2. STATS:   Pipeline and index counters");
    println!("3. HELP:    This text");
    println!("4. EXIT:    Quit (also Ctrl+C)\n");
}
