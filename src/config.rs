//! Environment-driven runtime configuration.
//!
//! Every struct has a `Default` with the built-in values and a `from_env()`
//! constructor that overrides them from the process environment. Unparseable
//! values fall back to the default rather than failing startup.

use crate::error::ConfigError;
use std::env;
use std::str::FromStr;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

/// How a newly created thread decides its `is_patch` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchHeuristic {
    /// Subject contains "patch" (case-insensitive).
    SubjectKeyword,
    /// The parser's own flag (diff markers in the body or "patch" in the subject).
    #[default]
    ParserFlag,
    /// Either of the above.
    Either,
}

impl FromStr for PatchHeuristic {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "subject" | "subject_keyword" => Ok(PatchHeuristic::SubjectKeyword),
            "parser" | "parser_flag" => Ok(PatchHeuristic::ParserFlag),
            "either" | "any" => Ok(PatchHeuristic::Either),
            other => Err(format!("unknown patch heuristic `{other}`")),
        }
    }
}

/// Knobs for the thread resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Re-anchor messages whose claimed root is missing (archive ingestion).
    /// When off, a thread is created for the claimed root id as-is.
    pub repair_missing_roots: bool,
    pub patch_heuristic: PatchHeuristic,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            repair_missing_roots: true,
            patch_heuristic: PatchHeuristic::default(),
        }
    }
}

impl ResolverConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let patch_heuristic = env::var("INGEST_PATCH_HEURISTIC")
            .ok()
            .and_then(|value| match PatchHeuristic::from_str(&value) {
                Ok(heuristic) => Some(heuristic),
                Err(err) => {
                    log::warn!("{}, using default", err);
                    None
                }
            })
            .unwrap_or(defaults.patch_heuristic);

        Self {
            repair_missing_roots: env_bool(
                "INGEST_REPAIR_MISSING_ROOTS",
                defaults.repair_missing_roots,
            ),
            patch_heuristic,
        }
    }

    /// Preset matching bulk archive ingestion: repair gaps, subject keyword for patches.
    pub fn archive() -> Self {
        Self {
            repair_missing_roots: true,
            patch_heuristic: PatchHeuristic::SubjectKeyword,
        }
    }

    /// Preset matching live source sync: trust the claimed root, parser flag for patches.
    pub fn live_sync() -> Self {
        Self {
            repair_missing_roots: false,
            patch_heuristic: PatchHeuristic::ParserFlag,
        }
    }
}

/// Batch ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Raw messages parsed in parallel before resolution.
    pub parse_chunk_size: usize,
    pub parse_threads: usize,
    pub resolver: ResolverConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            parse_chunk_size: 256,
            parse_threads: num_cpus::get(),
            resolver: ResolverConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            parse_chunk_size: env_usize("INGEST_PARSE_CHUNK_SIZE", defaults.parse_chunk_size),
            parse_threads: env_usize("INGEST_PARSE_THREADS", defaults.parse_threads),
            resolver: ResolverConfig::from_env(),
        }
    }
}

/// Thread rendering settings.
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Split off the trailing quoted block of each body.
    pub hide_quoted: bool,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self { hide_quoted: true }
    }
}

impl ProjectionConfig {
    pub fn from_env() -> Self {
        Self {
            hide_quoted: env_bool("THREAD_HIDE_QUOTED", true),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        Ok(Self {
            url,
            max_connections: env_u32("DATABASE_MAX_CONNECTIONS", 5),
        })
    }
}
