//! Subject normalization and grouping
//!
//! Header-based resolution is authoritative. Subjects are only used to group
//! messages for display when reply headers were lost, e.g. list digests or
//! archives that stripped `References`.

use std::collections::HashMap;

use crate::models::Message;

const REPLY_PREFIXES: [&str; 4] = ["re:", "fwd:", "fw:", "aw:"];

/// Normalize a subject for comparison
///
/// Lowercases, then strips reply prefixes (`Re:`, `Fwd:`, `Fw:`, `Aw:`) and
/// leading `[...]` tags repeatedly until neither is left, and collapses
/// whitespace. Unlike [`crate::sync::parser::clean_subject`], which strips one
/// of each for a readable thread title, this keeps going so that
/// `Re: Re: [PATCH v3] x` and `[PATCH v2] x` compare equal.
///
/// ```rust
/// use git_ew::threading::subject_matching::normalize_subject;
///
/// assert_eq!(normalize_subject("Re: [PATCH] Fix memory leak"), "fix memory leak");
/// assert_eq!(normalize_subject("Re: Fwd: [RFC PATCH] Test"), "test");
/// ```
pub fn normalize_subject(subject: &str) -> String {
    let lowered = subject.to_lowercase();
    let mut rest = lowered.trim();

    loop {
        if let Some(prefix) = REPLY_PREFIXES.iter().find(|p| rest.starts_with(*p)) {
            rest = rest[prefix.len()..].trim_start();
            continue;
        }
        if rest.starts_with('[') {
            if let Some(end) = rest.find(']') {
                rest = rest[end + 1..].trim_start();
                continue;
            }
        }
        break;
    }

    rest.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Group messages by normalized subject.
///
/// Groups appear in the order their first message appears in `messages`, and
/// keep the input order inside each group.
pub fn group_by_subject(messages: &[Message]) -> Vec<(String, Vec<&Message>)> {
    let mut groups: Vec<(String, Vec<&Message>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for message in messages {
        let key = normalize_subject(&message.subject);
        match positions.get(&key) {
            Some(&position) => groups[position].1.push(message),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![message]));
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threading::tree::tests::message;

    #[test]
    fn test_normalize_versioned_patch() {
        assert_eq!(
            normalize_subject("[PATCH v2 1/3] Add new feature"),
            "add new feature"
        );
    }

    #[test]
    fn test_normalize_nested_re() {
        assert_eq!(
            normalize_subject("Re: Re: [PATCH v3] Important fix"),
            "important fix"
        );
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(
            normalize_subject("  Re:   [PATCH]   Multiple    spaces  "),
            "multiple spaces"
        );
    }

    #[test]
    fn test_unclosed_tag_is_kept() {
        assert_eq!(normalize_subject("[PATCH broken subject"), "[patch broken subject");
    }

    #[test]
    fn test_group_by_subject_preserves_order() {
        let mut first = message(1, "a", None);
        first.subject = "[PATCH] Fix leak".to_string();
        let mut other = message(2, "b", None);
        other.subject = "Release plan".to_string();
        let mut reply = message(3, "c", None);
        reply.subject = "Re: [PATCH v2] fix   LEAK".to_string();

        let messages = vec![first, other, reply];
        let groups = group_by_subject(&messages);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "fix leak");
        assert_eq!(
            groups[0].1.iter().map(|m| m.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(groups[1].0, "release plan");
    }
}
