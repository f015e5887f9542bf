//! Reply forest for one thread.
//!
//! Messages are linked by their `In-Reply-To` header only. A message whose
//! parent is absent from the set (or would close a loop) becomes a root, so a
//! thread with gaps renders as several trees side by side.
//!
//! Nodes live in an arena (`Vec<ThreadNode>`) and refer to each other by
//! index. Every traversal is iterative with an explicit stack, so very deep
//! reply chains cannot overflow the call stack.

use std::collections::HashMap;

use crate::models::Message;
use crate::threading::cycle_detection::TreeRoots;

#[derive(Debug, Clone)]
pub struct ThreadNode<'a> {
    pub message: &'a Message,
    pub parent: Option<usize>,
    /// Input order, never re-sorted.
    pub children: Vec<usize>,
    pub depth: usize,
    /// Exactly one child. Set by finalisation.
    pub can_flatten: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadForest<'a> {
    nodes: Vec<ThreadNode<'a>>,
    roots: Vec<usize>,
    index: HashMap<&'a str, usize>,
}

impl<'a> ThreadForest<'a> {
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, index: usize) -> &ThreadNode<'a> {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[ThreadNode<'a>] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, message_id: &str) -> Option<usize> {
        self.index.get(message_id).copied()
    }

    /// Depth-first pre-order over all trees, roots in input order.
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();

        while let Some(index) = stack.pop() {
            order.push(index);
            // Reverse so the first child is visited first
            stack.extend(self.nodes[index].children.iter().rev());
        }

        order
    }

    /// Recompute `depth` top-down: roots at 0, children one below their parent.
    pub fn recompute_depths(&mut self) {
        let mut stack: Vec<(usize, usize)> = self.roots.iter().map(|&root| (root, 0)).collect();

        while let Some((index, depth)) = stack.pop() {
            self.nodes[index].depth = depth;
            for &child in &self.nodes[index].children {
                stack.push((child, depth + 1));
            }
        }
    }

    /// Derive depth and `can_flatten` once the shape is final.
    pub fn finalize(&mut self) {
        self.recompute_depths();
        for node in &mut self.nodes {
            node.can_flatten = node.children.len() == 1;
        }
    }
}

/// Build the reply forest for `messages`.
///
/// The first occurrence of a message id wins; later duplicates are ignored.
/// Roots and children keep the order of `messages`.
pub fn build_forest(messages: &[Message]) -> ThreadForest<'_> {
    let mut forest = ThreadForest::default();

    for message in messages {
        if forest.index.contains_key(message.message_id.as_str()) {
            log::debug!("ignoring repeated message {} in thread", message.message_id);
            continue;
        }
        forest.index.insert(message.message_id.as_str(), forest.nodes.len());
        forest.nodes.push(ThreadNode {
            message,
            parent: None,
            children: Vec::new(),
            depth: 0,
            can_flatten: false,
        });
    }

    let mut trees = TreeRoots::new(forest.nodes.len());
    for child in 0..forest.nodes.len() {
        let Some(parent) = forest.nodes[child]
            .message
            .in_reply_to
            .as_deref()
            .and_then(|id| forest.find(id))
        else {
            forest.roots.push(child);
            continue;
        };

        if trees.would_create_cycle(child, parent) {
            log::debug!(
                "reply loop at {}, treating it as a root",
                forest.nodes[child].message.message_id
            );
            forest.roots.push(child);
            continue;
        }

        trees.link(child, parent);
        forest.nodes[child].parent = Some(parent);
        forest.nodes[parent].children.push(child);
    }

    forest.finalize();
    forest
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn message(id: i32, message_id: &str, in_reply_to: Option<&str>) -> Message {
        Message {
            id,
            message_id: message_id.to_string(),
            in_reply_to: in_reply_to.map(str::to_string),
            thread_id: 1,
            from_email: "dev@example.com".to_string(),
            from_name: "Dev".to_string(),
            subject: "Subject".to_string(),
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(id as i64),
            body: format!("body of {message_id}"),
            is_patch: false,
            patch_content: None,
            raw_email: Vec::new(),
        }
    }

    fn ids(forest: &ThreadForest<'_>, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| forest.node(i).message.message_id.clone())
            .collect()
    }

    #[test]
    fn test_no_replies_gives_one_root_each() {
        let messages = vec![message(1, "a", None), message(2, "b", None), message(3, "c", None)];
        let forest = build_forest(&messages);

        assert_eq!(ids(&forest, forest.roots()), vec!["a", "b", "c"]);
        assert!(forest.nodes().iter().all(|n| n.depth == 0 && n.children.is_empty()));
    }

    #[test]
    fn test_branching_tree() {
        let messages = vec![
            message(1, "a", None),
            message(2, "b", Some("a")),
            message(3, "c", Some("a")),
            message(4, "d", Some("b")),
        ];
        let forest = build_forest(&messages);

        assert_eq!(forest.roots(), &[0]);
        let root = forest.node(0);
        assert_eq!(ids(&forest, &root.children), vec!["b", "c"]);
        assert!(!root.can_flatten);
        assert!(forest.node(1).can_flatten);
        assert_eq!(forest.node(3).depth, 2);
        assert_eq!(ids(&forest, &forest.preorder()), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_children_keep_input_order() {
        let messages = vec![
            message(1, "root", None),
            message(2, "late", Some("root")),
            message(3, "early", Some("root")),
        ];
        let forest = build_forest(&messages);
        assert_eq!(ids(&forest, &forest.node(0).children), vec!["late", "early"]);
    }

    #[test]
    fn test_missing_parent_becomes_root() {
        let messages = vec![message(1, "a", None), message(2, "b", Some("gone"))];
        let forest = build_forest(&messages);
        assert_eq!(ids(&forest, forest.roots()), vec!["a", "b"]);
    }

    #[test]
    fn test_reply_to_later_message_links() {
        let messages = vec![message(1, "reply", Some("root")), message(2, "root", None)];
        let forest = build_forest(&messages);

        assert_eq!(ids(&forest, forest.roots()), vec!["root"]);
        assert_eq!(forest.node(0).depth, 1);
    }

    #[test]
    fn test_duplicate_ids_first_wins() {
        let messages = vec![
            message(1, "a", None),
            message(2, "a", Some("x")),
            message(3, "b", Some("a")),
        ];
        let forest = build_forest(&messages);

        assert_eq!(forest.len(), 2);
        assert_eq!(forest.node(forest.find("a").unwrap()).message.id, 1);
    }

    #[test]
    fn test_reply_loops_are_broken() {
        let messages = vec![message(1, "a", Some("b")), message(2, "b", Some("a"))];
        let forest = build_forest(&messages);

        assert_eq!(ids(&forest, forest.roots()), vec!["b"]);
        assert_eq!(forest.preorder().len(), 2);
    }

    #[test]
    fn test_self_reply_is_root() {
        let messages = vec![message(1, "a", Some("a"))];
        let forest = build_forest(&messages);
        assert_eq!(forest.roots(), &[0]);
        assert!(forest.node(0).children.is_empty());
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let message_ids: Vec<String> = (0..20_000).map(|i| format!("m{i}")).collect();
        let messages: Vec<Message> = message_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let parent = if i == 0 { None } else { Some(message_ids[i - 1].as_str()) };
                message(i as i32, id, parent)
            })
            .collect();

        let forest = build_forest(&messages);
        assert_eq!(forest.node(19_999).depth, 19_999);
        assert_eq!(forest.preorder().len(), 20_000);
    }

    #[test]
    fn test_deep_chain_in_reverse_order() {
        // Every reply arrives before the message it answers
        let message_ids: Vec<String> = (0..20_000).map(|i| format!("m{i}")).collect();
        let messages: Vec<Message> = message_ids
            .iter()
            .enumerate()
            .rev()
            .map(|(i, id)| {
                let parent = if i == 0 { None } else { Some(message_ids[i - 1].as_str()) };
                message(i as i32, id, parent)
            })
            .collect();

        let forest = build_forest(&messages);
        assert_eq!(ids(&forest, forest.roots()), vec!["m0"]);
        assert_eq!(forest.node(0).depth, 19_999);
    }

    #[test]
    fn test_loop_closed_by_later_message_in_longer_cycle() {
        // a replies to b, b to c, c to a: c closes the loop
        let messages = vec![
            message(1, "a", Some("b")),
            message(2, "b", Some("c")),
            message(3, "c", Some("a")),
            message(4, "d", Some("c")),
        ];
        let forest = build_forest(&messages);

        assert_eq!(ids(&forest, forest.roots()), vec!["c"]);
        assert_eq!(ids(&forest, &forest.preorder()), vec!["c", "b", "a", "d"]);
    }
}
