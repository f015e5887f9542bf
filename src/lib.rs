//! Mailing list threading.
//!
//! Ingests raw email from maildirs, mbox files and tarballs, files every message
//! into a thread (repairing threads whose root never arrived), and renders
//! threads as reply trees with single-reply chains collapsed.

pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod threading;

use env_logger::Env;
use std::sync::Once;

pub use config::{IngestConfig, ProjectionConfig, ResolverConfig};
pub use error::{IngestError, SourceError, StoreError};
pub use store::{MemoryStore, Persistence, PgStore};
pub use sync::parser::{ParsedMessage, parse_message};
pub use sync::resolver::{IngestOutcome, Repair, ThreadResolver};
pub use sync::{IngestReport, Ingestor};

static LOGGER: Once = Once::new();

/// Install the `env_logger` backend once; `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}
