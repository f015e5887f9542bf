//! Quoted reply detection.
//!
//! Mailing list replies usually end with the message they answer, quoted with
//! `>` and introduced by an attribution line ("On Mon, Jane wrote:"). Only that
//! trailing block is split off; quotes interleaved with new text stay in the
//! new content.

use serde::Serialize;

/// A body split into what the sender wrote and what they quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotedReply<'a> {
    pub new_content: &'a str,
    /// Trailing quote block, attribution line included. Empty when none.
    pub quoted: &'a str,
}

impl QuotedReply<'_> {
    pub fn has_quote(&self) -> bool {
        !self.quoted.is_empty()
    }
}

fn is_quote_line(line: &str) -> bool {
    line.trim_start().starts_with('>')
}

fn is_attribution_line(line: &str) -> bool {
    line.trim_end().ends_with("wrote:")
}

/// Split the trailing quoted block off `body`.
///
/// ```rust
/// use git_ew::threading::quoting::detect_quoted_reply;
///
/// let reply = detect_quoted_reply("Agreed.\n\nOn Mon, Jane wrote:\n> Ship it?\n");
/// assert_eq!(reply.new_content, "Agreed.");
/// assert_eq!(reply.quoted, "On Mon, Jane wrote:\n> Ship it?");
///
/// let plain = detect_quoted_reply("No quotes here.\n");
/// assert_eq!(plain.new_content, "No quotes here.\n");
/// assert_eq!(plain.quoted, "");
/// ```
pub fn detect_quoted_reply(body: &str) -> QuotedReply<'_> {
    let lines: Vec<&str> = body.split_inclusive('\n').collect();

    let mut end = lines.len();
    while end > 0 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }

    let mut start = end;
    while start > 0 && is_quote_line(lines[start - 1]) {
        start -= 1;
    }

    if start == end {
        return QuotedReply {
            new_content: body,
            quoted: "",
        };
    }

    if start > 0 && is_attribution_line(lines[start - 1]) {
        start -= 1;
    }

    let offset: usize = lines[..start].iter().map(|line| line.len()).sum();
    QuotedReply {
        new_content: body[..offset].trim_end(),
        quoted: body[offset..].trim_end(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_quote_block_split() {
        let body = "Looks good to me.\n\n> diff --git a/x b/x\n> +fix\n";
        let reply = detect_quoted_reply(body);
        assert_eq!(reply.new_content, "Looks good to me.");
        assert_eq!(reply.quoted, "> diff --git a/x b/x\n> +fix");
        assert!(reply.has_quote());
    }

    #[test]
    fn test_attribution_line_joins_quote() {
        let body = "Thanks!\r\nOn Tue, 2 Jan 2024, Jane Dev wrote:\r\n> Patch attached.\r\n\r\n";
        let reply = detect_quoted_reply(body);
        assert_eq!(reply.new_content, "Thanks!");
        assert_eq!(reply.quoted, "On Tue, 2 Jan 2024, Jane Dev wrote:\r\n> Patch attached.");
    }

    #[test]
    fn test_body_without_quotes_unchanged() {
        let body = "Just a plain message.\nSecond line.\n\n";
        let reply = detect_quoted_reply(body);
        assert_eq!(reply.new_content, body);
        assert_eq!(reply.quoted, "");
        assert!(!reply.has_quote());
    }

    #[test]
    fn test_interleaved_quotes_stay_in_new_content() {
        let body = "> question one\nanswer one\n> question two\n";
        let reply = detect_quoted_reply(body);
        assert_eq!(reply.new_content, "> question one\nanswer one");
        assert_eq!(reply.quoted, "> question two");
    }

    #[test]
    fn test_indented_and_nested_quotes() {
        let body = "Reply\n  > indented\n>> nested\n";
        let reply = detect_quoted_reply(body);
        assert_eq!(reply.new_content, "Reply");
        assert_eq!(reply.quoted, "  > indented\n>> nested");
    }

    #[test]
    fn test_entire_body_quoted() {
        let reply = detect_quoted_reply("> only quote\n");
        assert_eq!(reply.new_content, "");
        assert_eq!(reply.quoted, "> only quote");
    }

    #[test]
    fn test_empty_body() {
        let reply = detect_quoted_reply("");
        assert_eq!(reply.new_content, "");
        assert_eq!(reply.quoted, "");
    }
}
