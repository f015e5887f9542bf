//! Ingestion statistics.

use serde::Serialize;

use crate::sync::resolver::IngestOutcome;

/// Summary of one ingestion run.
///
/// `processed` counts every item pulled from the source, including the ones
/// that ended in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    /// Messages newly stored
    pub inserted: usize,
    /// Duplicates that were already stored
    pub skipped: usize,
    pub threads_created: usize,
    /// Messages anchored through a repair step
    pub repaired: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl IngestReport {
    pub fn record(&mut self, outcome: IngestOutcome) {
        self.processed += 1;
        if outcome.was_duplicate {
            self.skipped += 1;
        } else {
            self.inserted += 1;
        }
        if outcome.thread_created {
            self.threads_created += 1;
        }
        if outcome.repair.is_some() {
            self.repaired += 1;
        }
        self.warnings.extend(outcome.warnings);
    }

    pub fn record_error(&mut self, error: impl ToString) {
        self.processed += 1;
        self.errors.push(error.to_string());
    }

    /// Merge another report into this one, e.g. one per source file.
    pub fn merge(&mut self, other: IngestReport) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.threads_created += other.threads_created;
        self.repaired += other.repaired;
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
