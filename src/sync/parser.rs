//! Email parsing and normalization.
//!
//! Turns raw RFC 5322 bytes into a [`ParsedMessage`] suitable for thread
//! resolution and storage. MIME structure, header decoding (RFC 2047) and
//! charset conversion are delegated to `mailparse`; everything else here is
//! normalization for threading.
//!
//! # Key Responsibilities
//!
//! - **Header Extraction**: Message-ID, From, Subject, Date, In-Reply-To, References
//! - **Body Extraction**: First `text/plain` part in a depth-first walk
//! - **Patch Detection**: Diff markers in the body or "patch" in the subject
//! - **Subject Cleaning**: One reply marker and one `[tag]` stripped for thread titles
//!
//! # Degrading Instead of Failing
//!
//! Archives contain every kind of broken mail. `parse_message` never returns an
//! error; it substitutes a default for whatever it cannot read:
//!
//! - Missing headers become empty strings
//! - An unparseable Date becomes "now" (and `date_parsed` is false)
//! - Undecodable body bytes are replaced with U+FFFD
//! - A MIME structure `mailparse` rejects leaves only the lossy body
//!
//! A message whose Message-ID is empty after normalization is still returned;
//! the resolver is the one that refuses to store it.

use chrono::{DateTime, Utc};
use mailparse::{MailAddr, MailHeaderMap, ParsedMail, parse_mail};
use regex::Regex;
use std::sync::OnceLock;

use crate::sync::patch::detect_patch;

/// Canonical record for one raw email.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub from_email: String,
    pub from_name: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    /// False when `date` is the "now" fallback.
    pub date_parsed: bool,
    pub body: String,
    pub in_reply_to: Option<String>,
    /// Oldest first. Position 0 is the conversation root.
    pub references: Vec<String>,
    pub is_patch: bool,
    pub patch_content: Option<String>,
    pub raw: Vec<u8>,
}

impl ParsedMessage {
    /// The message id this message claims as its thread root.
    ///
    /// Oldest `References` entry, else `In-Reply-To`, else the message itself.
    pub fn thread_root_id(&self) -> &str {
        self.references
            .first()
            .map(String::as_str)
            .or(self.in_reply_to.as_deref())
            .unwrap_or(&self.message_id)
    }

    pub fn clean_subject(&self) -> String {
        clean_subject(&self.subject)
    }

    pub fn has_usable_id(&self) -> bool {
        !self.message_id.is_empty()
    }
}

/// Remove NUL bytes that PostgreSQL cannot store, and surrounding whitespace
fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

/// Pull the first message id out of a header value.
///
/// Handles the bracketed form (`<id@host> (comment)`) as well as bare ids.
fn normalize_message_id(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let candidate = match (raw.find('<'), raw.find('>')) {
            (Some(start), Some(end)) if start < end => &raw[start + 1..end],
            _ => raw.split_whitespace().next().unwrap_or_default(),
        };
        let cleaned = sanitize_text(candidate.trim().trim_matches(&['<', '>'][..]));
        if cleaned.is_empty() { None } else { Some(cleaned) }
    })
}

/// Extract message IDs from References header, preserving order
fn extract_references(header_value: &str) -> Vec<String> {
    header_value
        .split_whitespace()
        .map(|id| sanitize_text(id.trim_matches(&['<', '>'][..])))
        .filter(|id| !id.is_empty())
        .collect()
}

/// Parse the From header into (name, email).
///
/// The display name defaults to the address when absent.
fn parse_from(header_value: &str) -> (String, String) {
    let (name, email) = match mailparse::addrparse(header_value) {
        Ok(addrs) => match addrs.iter().next() {
            Some(MailAddr::Single(info)) => (
                info.display_name.clone().unwrap_or_default(),
                info.addr.clone(),
            ),
            Some(MailAddr::Group(group)) => group
                .addrs
                .first()
                .map(|info| (info.display_name.clone().unwrap_or_default(), info.addr.clone()))
                .unwrap_or_default(),
            None => (String::new(), String::new()),
        },
        Err(e) => {
            log::debug!("unparseable From header `{}`: {}", header_value, e);
            let bare = header_value.trim();
            if bare.contains('@') {
                (String::new(), bare.to_string())
            } else {
                (bare.to_string(), String::new())
            }
        }
    };

    let email = sanitize_text(&email).to_lowercase();
    let name = sanitize_text(&name);
    let name = if name.is_empty() { email.clone() } else { name };
    (name, email)
}

/// Drop a trailing `(comment)` such as `(UTC)` or `(GMT+1)`.
fn strip_date_comment(raw: &str) -> &str {
    match (raw.rfind('('), raw.ends_with(')')) {
        (Some(start), true) => raw[..start].trim_end(),
        _ => raw,
    }
}

/// Parse the Date header, falling back to the current time.
///
/// Tries the RFC 2822 grammar first, then the permissive `dateparser` formats
/// for the odd archive that uses ISO timestamps. Anything neither accepts
/// (`unknown`, a bare weekday) is treated as missing.
fn parse_date(raw_date: Option<String>, message_id: &str) -> (DateTime<Utc>, bool) {
    let raw = raw_date.unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        log::debug!("email {} missing Date header, using current time", message_id);
        return (Utc::now(), false);
    }

    let stripped = strip_date_comment(raw);
    if let Ok(date) = DateTime::parse_from_rfc2822(stripped) {
        return (date.with_timezone(&Utc), true);
    }

    match dateparser::parse(stripped) {
        Ok(date) => (date.with_timezone(&Utc), true),
        Err(e) => {
            log::warn!(
                "email {} has invalid date `{}`, using current time: {}",
                message_id,
                raw,
                e
            );
            (Utc::now(), false)
        }
    }
}

/// Find the first `text/plain` leaf in a depth-first walk.
fn find_text_plain<'a, 'b>(root: &'b ParsedMail<'a>) -> Option<&'b ParsedMail<'a>> {
    let mut stack = vec![root];

    while let Some(part) = stack.pop() {
        if part.subparts.is_empty() {
            if part.ctype.mimetype.eq_ignore_ascii_case("text/plain") {
                return Some(part);
            }
            continue;
        }
        // Reverse so the leftmost subpart is visited first
        for sub in part.subparts.iter().rev() {
            stack.push(sub);
        }
    }

    None
}

/// Decode a part with its declared charset, or as lossy UTF-8 if that fails.
fn decode_part(part: &ParsedMail<'_>) -> String {
    match part.get_body() {
        Ok(body) => body,
        Err(e) => {
            log::debug!("charset decode failed ({}), falling back to lossy UTF-8", e);
            part.get_body_raw()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }
    }
}

fn extract_body(parsed: &ParsedMail<'_>) -> String {
    let body = if parsed.subparts.is_empty() {
        decode_part(parsed)
    } else {
        find_text_plain(parsed).map(decode_part).unwrap_or_default()
    };
    body.replace('\0', "")
}

static REPLY_MARKER_REGEX: OnceLock<Regex> = OnceLock::new();
static LEADING_TAG_REGEX: OnceLock<Regex> = OnceLock::new();

/// Clean a subject for use as a thread title.
///
/// Strips one leading reply/forward marker, then one leading `[tag]`.
///
/// ```rust
/// use git_ew::sync::parser::clean_subject;
///
/// assert_eq!(clean_subject("Re: [PATCH] Fix bug"), "Fix bug");
/// assert_eq!(clean_subject("FWD: Release notes"), "Release notes");
/// assert_eq!(clean_subject("Plain subject"), "Plain subject");
/// ```
pub fn clean_subject(subject: &str) -> String {
    let reply = REPLY_MARKER_REGEX
        .get_or_init(|| Regex::new(r"(?i)^(?:re|fwd|fw):\s*").expect("Invalid reply marker regex"));
    let tag = LEADING_TAG_REGEX
        .get_or_init(|| Regex::new(r"^\[[^\]]*\]\s*").expect("Invalid subject tag regex"));

    let subject = subject.trim_start();
    let subject = reply.replace(subject, "");
    let subject = tag.replace(&subject, "");
    subject.trim().to_string()
}

/// Parse raw email bytes into a [`ParsedMessage`].
///
/// Never fails; see the module docs for the defaults used on bad input.
pub fn parse_message(raw: &[u8]) -> ParsedMessage {
    let parsed = match parse_mail(raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("failed to parse MIME structure, keeping raw body: {}", e);
            return degraded_message(raw);
        }
    };

    let message_id =
        normalize_message_id(parsed.headers.get_first_value("Message-ID")).unwrap_or_default();

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|s| sanitize_text(&s))
        .unwrap_or_default();

    let (from_name, from_email) =
        parse_from(&parsed.headers.get_first_value("From").unwrap_or_default());

    let (date, date_parsed) = parse_date(parsed.headers.get_first_value("Date"), &message_id);

    let in_reply_to = normalize_message_id(parsed.headers.get_first_value("In-Reply-To"));

    let references = parsed
        .headers
        .get_first_value("References")
        .map(|v| extract_references(&v))
        .unwrap_or_default();

    let body = extract_body(&parsed);
    let patch = detect_patch(&subject, &body);

    log::trace!("parsed: {} - {}", message_id, subject);

    ParsedMessage {
        message_id,
        from_email,
        from_name,
        subject,
        date,
        date_parsed,
        body,
        in_reply_to,
        references,
        is_patch: patch.is_patch,
        patch_content: patch.content,
        raw: raw.to_vec(),
    }
}

fn degraded_message(raw: &[u8]) -> ParsedMessage {
    let body = String::from_utf8_lossy(raw).replace('\0', "");
    let patch = detect_patch("", &body);
    ParsedMessage {
        message_id: String::new(),
        from_email: String::new(),
        from_name: String::new(),
        subject: String::new(),
        date: Utc::now(),
        date_parsed: false,
        body,
        in_reply_to: None,
        references: Vec::new(),
        is_patch: patch.is_patch,
        patch_content: patch.content,
        raw: raw.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("hello\0world"), "helloworld");
        assert_eq!(sanitize_text("  test  "), "test");
    }

    #[test]
    fn test_normalize_message_id() {
        assert_eq!(
            normalize_message_id(Some("<test@example.com>".to_string())),
            Some("test@example.com".to_string())
        );
        assert_eq!(
            normalize_message_id(Some("<a@x> (Bob's message of Monday)".to_string())),
            Some("a@x".to_string())
        );
        assert_eq!(
            normalize_message_id(Some("bare@example.com".to_string())),
            Some("bare@example.com".to_string())
        );
        assert_eq!(normalize_message_id(Some("<>".to_string())), None);
        assert_eq!(normalize_message_id(Some("".to_string())), None);
        assert_eq!(normalize_message_id(None), None);
    }

    #[test]
    fn test_extract_references_preserves_order() {
        let refs = extract_references("<root@x>\r\n <mid@x>  <leaf@x>");
        assert_eq!(refs, vec!["root@x", "mid@x", "leaf@x"]);
    }

    #[test]
    fn test_parse_from_variants() {
        assert_eq!(
            parse_from("John Doe <John@Example.com>"),
            ("John Doe".to_string(), "john@example.com".to_string())
        );
        assert_eq!(
            parse_from("jane@example.com"),
            ("jane@example.com".to_string(), "jane@example.com".to_string())
        );
        assert_eq!(parse_from(""), (String::new(), String::new()));
    }

    #[test]
    fn test_clean_subject() {
        assert_eq!(clean_subject("Re: [PATCH] Fix bug"), "Fix bug");
        assert_eq!(clean_subject("RE:   Question"), "Question");
        assert_eq!(clean_subject("Fwd: [zsh-workers] Crash"), "Crash");
        // Only one marker of each kind is removed
        assert_eq!(clean_subject("Re: Re: Loop"), "Re: Loop");
        assert_eq!(clean_subject("[PATCH] Re: odd order"), "Re: odd order");
        assert_eq!(clean_subject("Reply all of this"), "Reply all of this");
    }

    #[test]
    fn test_parse_simple_email() {
        let raw = concat!(
            "From: John Doe <john@example.com>\r\n",
            "To: dev@example.com\r\n",
            "Subject: Test Subject\r\n",
            "Date: Mon, 1 Jan 2024 12:00:00 +0000\r\n",
            "Message-ID: <test123@example.com>\r\n",
            "\r\n",
            "This is the body of the email.\r\n"
        );

        let parsed = parse_message(raw.as_bytes());
        assert_eq!(parsed.message_id, "test123@example.com");
        assert_eq!(parsed.from_email, "john@example.com");
        assert_eq!(parsed.from_name, "John Doe");
        assert_eq!(parsed.subject, "Test Subject");
        assert_eq!(parsed.date, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        assert!(parsed.date_parsed);
        assert!(parsed.body.contains("This is the body"));
        assert!(!parsed.is_patch);
        assert_eq!(parsed.thread_root_id(), "test123@example.com");
        assert_eq!(parsed.raw, raw.as_bytes());
    }

    #[test]
    fn test_parse_email_with_patch() {
        let raw = concat!(
            "From: Jane Dev <jane@example.com>\n",
            "Subject: [PATCH] Fix bug in parser\n",
            "Date: Mon, 1 Jan 2024 12:00:00 +0000\n",
            "Message-ID: <patch123@example.com>\n",
            "\n",
            "Here's a fix for the parser bug.\n",
            "\n",
            "diff --git a/parser.py b/parser.py\n",
            "--- a/parser.py\n",
            "+++ b/parser.py\n",
            "@@ -10,3 +10,4 @@ def parse():\n",
            "+    return True\n"
        );

        let parsed = parse_message(raw.as_bytes());
        assert!(parsed.is_patch);
        let patch = parsed.patch_content.expect("patch content extracted");
        assert!(patch.starts_with("diff --git"));
        assert!(patch.contains("+    return True"));
    }

    #[test]
    fn test_subject_patch_without_diff() {
        let raw = "Message-ID: <cover@x>\nSubject: [Patch v2 0/4] cover letter\n\nSeries overview.\n";
        let parsed = parse_message(raw.as_bytes());
        assert!(parsed.is_patch);
        assert_eq!(parsed.patch_content, None);
    }

    #[test]
    fn test_references_win_over_in_reply_to() {
        let raw = concat!(
            "Message-ID: <reply@x>\n",
            "In-Reply-To: <mid@x>\n",
            "References: <root@x> <mid@x>\n",
            "Subject: Re: Test Subject\n",
            "\n",
            "I agree.\n"
        );

        let parsed = parse_message(raw.as_bytes());
        assert_eq!(parsed.in_reply_to.as_deref(), Some("mid@x"));
        assert_eq!(parsed.references, vec!["root@x", "mid@x"]);
        assert_eq!(parsed.thread_root_id(), "root@x");
        assert_eq!(parsed.clean_subject(), "Test Subject");
    }

    #[test]
    fn test_in_reply_to_used_without_references() {
        let raw = "Message-ID: <b@x>\nIn-Reply-To: <a@x>\nSubject: Re: hi\n\nok\n";
        let parsed = parse_message(raw.as_bytes());
        assert_eq!(parsed.thread_root_id(), "a@x");
    }

    #[test]
    fn test_missing_headers_degrade() {
        let parsed = parse_message(b"\nJust a body with no headers\n");
        assert_eq!(parsed.message_id, "");
        assert!(!parsed.has_usable_id());
        assert_eq!(parsed.subject, "");
        assert_eq!(parsed.from_email, "");
        assert!(!parsed.date_parsed);
    }

    #[test]
    fn test_invalid_date_falls_back_to_now() {
        let before = Utc::now();
        let raw = "Message-ID: <d@x>\nDate: not-a-real-date\nSubject: x\n\nbody\n";
        let parsed = parse_message(raw.as_bytes());
        assert!(!parsed.date_parsed);
        assert!(parsed.date >= before);
    }

    #[test]
    fn test_lenient_garbage_dates_fall_back_to_now() {
        for garbage in ["unknown", "Mon", "-", "garbage 12"] {
            let before = Utc::now();
            let raw = format!("Message-ID: <g@x>\nDate: {garbage}\n\nx");
            let parsed = parse_message(raw.as_bytes());
            assert!(!parsed.date_parsed, "`{garbage}` should not parse");
            assert!(parsed.date >= before, "`{garbage}` should fall back to now");
        }
    }

    #[test]
    fn test_date_with_trailing_comment() {
        let raw = "Message-ID: <c@x>\nDate: Tue, 2 Jan 2024 09:30:00 +0100 (CET)\n\nx";
        let parsed = parse_message(raw.as_bytes());
        assert!(parsed.date_parsed);
        assert_eq!(parsed.date, Utc.with_ymd_and_hms(2024, 1, 2, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_iso_date_accepted() {
        let raw = "Message-ID: <iso@x>\nDate: 2024-01-02T08:30:00Z\n\nx";
        let parsed = parse_message(raw.as_bytes());
        assert!(parsed.date_parsed);
        assert_eq!(parsed.date, Utc.with_ymd_and_hms(2024, 1, 2, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_multipart_takes_first_text_plain_depth_first() {
        let raw = concat!(
            "Message-ID: <mp@x>\n",
            "Subject: multipart\n",
            "MIME-Version: 1.0\n",
            "Content-Type: multipart/mixed; boundary=\"outer\"\n",
            "\n",
            "--outer\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\n",
            "\n",
            "--inner\n",
            "Content-Type: text/html\n",
            "\n",
            "<p>html version</p>\n",
            "--inner\n",
            "Content-Type: text/plain; charset=utf-8\n",
            "\n",
            "nested plain version\n",
            "--inner--\n",
            "--outer\n",
            "Content-Type: text/plain\n",
            "\n",
            "attachment text\n",
            "--outer--\n"
        );

        let parsed = parse_message(raw.as_bytes());
        assert!(parsed.body.contains("nested plain version"));
        assert!(!parsed.body.contains("attachment text"));
    }

    #[test]
    fn test_declared_charset_decoded() {
        let mut raw = b"Message-ID: <latin@x>\nSubject: latin\nContent-Type: text/plain; charset=iso-8859-1\n\ncaf".to_vec();
        raw.push(0xE9);
        raw.extend_from_slice(b"\n");

        let parsed = parse_message(&raw);
        assert!(parsed.body.starts_with("caf\u{e9}"));
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut raw = b"Message-ID: <bad@x>\nSubject: bad bytes\nContent-Type: text/plain; charset=utf-8\n\nok ".to_vec();
        raw.extend_from_slice(&[0xFF, 0xFE]);
        raw.extend_from_slice(b" done\n");

        let parsed = parse_message(&raw);
        assert!(parsed.body.contains("ok "));
        assert!(parsed.body.contains("done"));
    }
}
