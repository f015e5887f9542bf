//! Mail ingestion pipeline.
//!
//! Takes raw messages from a source, parses them and files each one into a
//! thread through a [`Persistence`] store.
//!
//! # Components
//!
//! - **`parser`**: raw RFC 5322 bytes → [`parser::ParsedMessage`], never failing
//! - **`patch`**: heuristic diff detection shared by the parser and resolver
//! - **`resolver`**: dedup, thread lookup, missing-root repair, thread creation
//! - **`sources`**: maildir, mbox and tarball readers yielding raw messages
//! - **`stats`**: the [`IngestReport`] returned by every batch
//!
//! # Data Flow
//!
//! 1. **Chunking**: pull up to `parse_chunk_size` raw messages from the source
//! 2. **Parallel Parsing**: parse the chunk on a Rayon pool (CPU-bound)
//! 3. **Sequential Resolution**: resolve and store each message in source order,
//!    yielding to the runtime between messages
//! 4. **Reporting**: every item ends up counted in the report, failures included
//!
//! Resolution stays sequential because a reply can only find its thread once
//! the message before it in the source has been stored.

pub mod parser;
pub mod patch;
pub mod resolver;
pub mod sources;
pub mod stats;

use rayon::prelude::*;
use std::fmt::Display;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::store::Persistence;
use crate::sync::parser::{ParsedMessage, parse_message};
use crate::sync::resolver::{IngestOutcome, ThreadResolver};

pub use stats::IngestReport;

/// Batch driver: parse in parallel, resolve in order.
pub struct Ingestor<'a, S: Persistence> {
    resolver: ThreadResolver<'a, S>,
    parse_chunk_size: usize,
    pool: Option<rayon::ThreadPool>,
}

impl<'a, S: Persistence> Ingestor<'a, S> {
    pub fn new(store: &'a S, config: IngestConfig) -> Self {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(config.parse_threads)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!("failed to create parse thread pool, parsing inline: {}", e);
                None
            }
        };

        Self {
            resolver: ThreadResolver::new(store, config.resolver),
            parse_chunk_size: config.parse_chunk_size.max(1),
            pool,
        }
    }

    /// Parse and store a single raw message.
    pub async fn ingest_one(&self, raw: &[u8]) -> Result<IngestOutcome, IngestError> {
        let parsed = parse_message(raw);
        self.resolver.resolve_and_ingest(&parsed).await
    }

    /// Ingest every message of `source` in order.
    ///
    /// Read errors, messages without a usable id and store failures are
    /// recorded in the report; the batch always runs to the end.
    pub async fn ingest<I, E>(&self, source: I) -> IngestReport
    where
        I: IntoIterator<Item = Result<Vec<u8>, E>>,
        E: Display,
    {
        let mut report = IngestReport::default();
        let mut source = source.into_iter();

        loop {
            let chunk: Vec<Result<Vec<u8>, String>> = source
                .by_ref()
                .take(self.parse_chunk_size)
                .map(|item| item.map_err(|e| e.to_string()))
                .collect();
            if chunk.is_empty() {
                break;
            }

            for item in self.parse_chunk(chunk) {
                match item {
                    Ok(parsed) => match self.resolver.resolve_and_ingest(&parsed).await {
                        Ok(outcome) => report.record(outcome),
                        Err(e) => {
                            log::warn!("failed to ingest message: {}", e);
                            report.record_error(describe_failure(&parsed, &e));
                        }
                    },
                    Err(e) => {
                        log::warn!("failed to read message: {}", e);
                        report.record_error(e);
                    }
                }
                tokio::task::yield_now().await;
            }

            log::debug!(
                "ingest progress: {} processed, {} inserted, {} skipped",
                report.processed,
                report.inserted,
                report.skipped
            );
        }

        log::info!(
            "ingest complete: {} processed, {} inserted, {} skipped, {} threads created, {} repaired, {} errors",
            report.processed,
            report.inserted,
            report.skipped,
            report.threads_created,
            report.repaired,
            report.errors.len()
        );
        report
    }

    /// Parse a chunk, preserving its order.
    fn parse_chunk(
        &self,
        chunk: Vec<Result<Vec<u8>, String>>,
    ) -> Vec<Result<ParsedMessage, String>> {
        let parse = |item: Result<Vec<u8>, String>| item.map(|raw| parse_message(&raw));
        match &self.pool {
            Some(pool) => pool.install(|| chunk.into_par_iter().map(parse).collect()),
            None => chunk.into_iter().map(parse).collect(),
        }
    }
}

/// Error text for the report; names the message when there is something to name.
fn describe_failure(parsed: &ParsedMessage, error: &IngestError) -> String {
    match error {
        IngestError::MissingMessageId if !parsed.subject.is_empty() => {
            format!("{} (subject: {})", error, parsed.subject)
        }
        _ => error.to_string(),
    }
}
