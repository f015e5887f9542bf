//! Heuristic patch detection.
//!
//! Mailing list patches arrive in two shapes that we care about:
//! - a unified diff inlined in the body (`diff --git`, `---`/`+++` header
//!   pairs, or the older `Index:` form)
//! - a subject advertising a patch (`[PATCH 2/5] ...`) with no diff at all,
//!   e.g. cover letters
//!
//! Either signal marks the message as a patch. Only the first one yields
//! extractable patch content.

use regex::Regex;
use std::sync::OnceLock;

/// Lazy-initialized regex for diff markers
static DIFF_MARKER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Get the compiled diff marker regex
///
/// Pattern matches, with `^` anchored at line starts:
/// - `diff --git` anywhere in a line
/// - a `---` line immediately followed by a `+++` line
/// - `Index:` at line start
fn diff_marker_regex() -> &'static Regex {
    DIFF_MARKER_REGEX.get_or_init(|| {
        Regex::new(r"(?m)diff --git|^---.*\n\+\+\+|^Index:").expect("Invalid diff marker regex")
    })
}

/// Result of running both patch signals over a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchDetection {
    pub is_patch: bool,
    pub content: Option<String>,
}

/// Return the body from the earliest diff marker to the end.
///
/// ## Examples
///
/// ```rust
/// use git_ew::sync::patch::extract_patch;
///
/// let body = "Fixes the leak.\n\ndiff --git a/x.c b/x.c\n+free(p);\n";
/// assert_eq!(extract_patch(body), Some("diff --git a/x.c b/x.c\n+free(p);\n"));
/// assert_eq!(extract_patch("Looks good to me."), None);
/// ```
pub fn extract_patch(body: &str) -> Option<&str> {
    diff_marker_regex().find(body).map(|m| &body[m.start()..])
}

/// True when the subject mentions a patch, in any case.
pub fn subject_mentions_patch(subject: &str) -> bool {
    subject.to_lowercase().contains("patch")
}

/// Run both patch signals.
pub fn detect_patch(subject: &str, body: &str) -> PatchDetection {
    let content = extract_patch(body).map(str::to_string);
    PatchDetection {
        is_patch: content.is_some() || subject_mentions_patch(subject),
        content,
    }
}
