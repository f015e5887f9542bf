use std::io::{self, Write};
use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use git_ew::config::{DatabaseConfig, IngestConfig, ProjectionConfig};
use git_ew::store::{MemoryStore, Persistence, PgStore};
use git_ew::sync::sources::{MaildirSource, MboxSource, TarballSource};
use git_ew::sync::{IngestReport, Ingestor};
use git_ew::threading::{ProjectionMode, render_thread_json};

#[derive(Parser, Debug)]
#[command(
    name = "ingest",
    about = "Ingest maildirs, mbox files and tarballs into threads",
    group(ArgGroup::new("source").required(true).multiple(true).args(["maildir", "mbox", "tarball"]))
)]
struct Args {
    /// Maildir to ingest (`cur/` and `new/`, or a flat directory of messages).
    #[arg(long)]
    maildir: Vec<PathBuf>,

    /// Mbox file to ingest; `.gz` files are decompressed.
    #[arg(long)]
    mbox: Vec<PathBuf>,

    /// Tar archive of one message per file; `.tgz` and `.tar.gz` are decompressed.
    #[arg(long)]
    tarball: Vec<PathBuf>,

    /// Ingest into an in-memory store instead of `DATABASE_URL`.
    #[arg(long)]
    dry_run: bool,

    /// Print this thread after ingesting.
    #[arg(long)]
    show_thread: Option<i32>,

    /// Projection used by `--show-thread` (`flat` or `nested`).
    #[arg(long, default_value = "nested")]
    mode: ProjectionMode,
}

async fn run<S: Persistence>(store: &S, args: &Args) -> Result<IngestReport, Box<dyn std::error::Error>> {
    let ingestor = Ingestor::new(store, IngestConfig::from_env());
    let mut report = IngestReport::default();

    for path in &args.maildir {
        log::info!("ingesting maildir {}", path.display());
        match MaildirSource::open(path) {
            Ok(source) => report.merge(ingestor.ingest(source).await),
            Err(e) => {
                log::error!("{}", e);
                report.errors.push(e.to_string());
            }
        }
    }

    for path in &args.mbox {
        log::info!("ingesting mbox {}", path.display());
        match MboxSource::open(path) {
            Ok(source) => report.merge(ingestor.ingest(source).await),
            Err(e) => {
                log::error!("{}", e);
                report.errors.push(e.to_string());
            }
        }
    }

    for path in &args.tarball {
        log::info!("ingesting tarball {}", path.display());
        match TarballSource::open(path) {
            Ok(source) => report.merge(ingestor.ingest(source).await),
            Err(e) => {
                log::error!("{}", e);
                report.errors.push(e.to_string());
            }
        }
    }

    if let Some(thread_id) = args.show_thread {
        match render_thread_json(store, thread_id, args.mode, &ProjectionConfig::from_env()).await? {
            Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
            None => writeln!(io::stderr(), "error: thread {thread_id} not found")?,
        }
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    git_ew::init_logger();

    let args = Args::parse();

    let report = if args.dry_run {
        let store = MemoryStore::new();
        let report = run(&store, &args).await?;
        log::info!(
            "dry run: {} threads, {} messages in memory",
            store.thread_count(),
            store.message_count()
        );
        report
    } else {
        let store = PgStore::connect(&DatabaseConfig::from_env()?).await?;
        store.run_migrations().await?;
        run(&store, &args).await?
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}
