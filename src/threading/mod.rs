//! Thread rendering
//!
//! Turns the stored messages of one thread into something a reader can
//! follow. Everything here is pure and synchronous apart from
//! [`projection::render_thread_json`], which loads the thread first.
//!
//! ## Pipeline
//!
//! 1. **Tree building** (`tree`): link messages by `In-Reply-To` into an
//!    arena forest, breaking reply loops (`cycle_detection`)
//! 2. **Projection** (`projection`): flat or nested view that collapses
//!    single-reply chains while keeping real branches
//! 3. **Quote splitting** (`quoting`): separate each reply from the trailing
//!    block it quotes
//!
//! `subject_matching` groups messages by normalized subject for callers whose
//! archives lost their reply headers.

pub mod cycle_detection;
pub mod projection;
pub mod quoting;
pub mod subject_matching;
pub mod tree;

pub use projection::{ProjectionMode, ThreadView, project, render_thread_json};
pub use quoting::{QuotedReply, detect_quoted_reply};
pub use tree::{ThreadForest, ThreadNode, build_forest};
