//! Display projections of a reply forest.
//!
//! Back-and-forth exchanges (each message answered by exactly one reply)
//! should not march across the screen one indent per message, while real
//! branches must stay visible. Two shapes are produced from the same forest:
//!
//! - **Flat**: pre-order list where a child keeps its parent's visual depth
//!   when it is the parent's only child, and goes one level deeper otherwise.
//! - **Nested**: single-child runs are spliced into the surrounding peer list;
//!   a node with several children carries them as an explicit `children`
//!   group (the concatenated runs of each child, in order).
//!
//! Both carry each message's body split into new content and the trailing
//! quote block when `hide_quoted` is on. Messages are borrowed, never changed.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::config::ProjectionConfig;
use crate::error::StoreError;
use crate::models::Message;
use crate::store::Persistence;
use crate::threading::quoting::detect_quoted_reply;
use crate::threading::tree::{ThreadForest, build_forest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    Flat,
    #[default]
    Nested,
}

impl fmt::Display for ProjectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionMode::Flat => f.write_str("flat"),
            ProjectionMode::Nested => f.write_str("nested"),
        }
    }
}

impl FromStr for ProjectionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(ProjectionMode::Flat),
            "nested" => Ok(ProjectionMode::Nested),
            other => Err(format!("unknown projection mode `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlatEntry<'a> {
    pub message: &'a Message,
    pub body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted: Option<&'a str>,
    pub tree_depth: usize,
    pub visual_depth: usize,
    pub can_flatten: bool,
    /// The parent has this node as its only child.
    pub in_linear_chain: bool,
    pub num_children: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NestedEntry<'a> {
    pub message: &'a Message,
    pub body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted: Option<&'a str>,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NestedEntry<'a>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", content = "entries", rename_all = "lowercase")]
pub enum ThreadView<'a> {
    Flat(Vec<FlatEntry<'a>>),
    Nested(Vec<NestedEntry<'a>>),
}

impl ThreadView<'_> {
    pub fn len(&self) -> usize {
        match self {
            ThreadView::Flat(entries) => entries.len(),
            ThreadView::Nested(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Body to display and the quote block split off it, if any.
fn split_body<'a>(message: &'a Message, config: &ProjectionConfig) -> (&'a str, Option<&'a str>) {
    if !config.hide_quoted {
        return (message.body.as_str(), None);
    }
    let reply = detect_quoted_reply(&message.body);
    (reply.new_content, reply.has_quote().then_some(reply.quoted))
}

pub fn project<'a>(
    forest: &ThreadForest<'a>,
    mode: ProjectionMode,
    config: &ProjectionConfig,
) -> ThreadView<'a> {
    match mode {
        ProjectionMode::Flat => ThreadView::Flat(project_flat(forest, config)),
        ProjectionMode::Nested => ThreadView::Nested(project_nested(forest, config)),
    }
}

pub fn project_flat<'a>(forest: &ThreadForest<'a>, config: &ProjectionConfig) -> Vec<FlatEntry<'a>> {
    let mut entries = Vec::with_capacity(forest.len());
    // (node, visual depth, in linear chain)
    let mut stack: Vec<(usize, usize, bool)> =
        forest.roots().iter().rev().map(|&root| (root, 0, false)).collect();

    while let Some((index, visual_depth, in_linear_chain)) = stack.pop() {
        let node = forest.node(index);
        let (body, quoted) = split_body(node.message, config);
        entries.push(FlatEntry {
            message: node.message,
            body,
            quoted,
            tree_depth: node.depth,
            visual_depth,
            can_flatten: node.can_flatten,
            in_linear_chain,
            num_children: node.children.len(),
        });

        let only_child = node.children.len() == 1;
        let child_depth = if only_child { visual_depth } else { visual_depth + 1 };
        for &child in node.children.iter().rev() {
            stack.push((child, child_depth, only_child));
        }
    }

    entries
}

pub fn project_nested<'a>(
    forest: &ThreadForest<'a>,
    config: &ProjectionConfig,
) -> Vec<NestedEntry<'a>> {
    // Run starting at each node, built children-first and stored back to front
    let mut runs: Vec<Option<Vec<NestedEntry<'a>>>> = vec![None; forest.len()];

    for index in forest.preorder().into_iter().rev() {
        let node = forest.node(index);
        let (body, quoted) = split_body(node.message, config);
        let mut entry = NestedEntry {
            message: node.message,
            body,
            quoted,
            depth: node.depth,
            children: None,
        };

        let run = match node.children.as_slice() {
            [] => vec![entry],
            [only] => {
                let mut run = runs[*only].take().unwrap_or_default();
                run.push(entry);
                run
            }
            children => {
                let mut grouped = Vec::new();
                for &child in children {
                    grouped.extend(runs[child].take().unwrap_or_default().into_iter().rev());
                }
                entry.children = Some(grouped);
                vec![entry]
            }
        };
        runs[index] = Some(run);
    }

    let mut entries = Vec::with_capacity(forest.roots().len());
    for &root in forest.roots() {
        entries.extend(runs[root].take().unwrap_or_default().into_iter().rev());
    }
    entries
}

/// Load a thread and render it as JSON: `{"thread": ..., "view": {"mode", "entries"}}`.
///
/// Returns `None` when the thread does not exist.
pub async fn render_thread_json<S: Persistence>(
    store: &S,
    thread_id: i32,
    mode: ProjectionMode,
    config: &ProjectionConfig,
) -> Result<Option<serde_json::Value>, StoreError> {
    let Some(thread) = store.find_thread_by_id(thread_id).await? else {
        return Ok(None);
    };
    let messages = store.list_messages_for_thread(thread_id).await?;
    let forest = build_forest(&messages);
    let view = project(&forest, mode, config);

    log::debug!(
        "rendered thread {} ({} messages, {} roots, {})",
        thread_id,
        forest.len(),
        forest.roots().len(),
        mode
    );

    Ok(Some(serde_json::json!({
        "thread": thread,
        "view": view,
    })))
}
