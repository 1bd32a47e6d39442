// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use otto_model::{Message, Role};

/// Per-request snippet length in the compaction summary.
const SNIPPET_CHARS: usize = 200;

/// Build the summary text inserted by compaction.
///
/// Deliberately mechanical: the user turns of the current window, each
/// truncated, under a fixed header.  A model-generated summary would be
/// richer, but this one works with every provider, including the one that
/// just refused the request for being too large.
pub fn summarize_history(messages: &[Message]) -> String {
    let mut out = String::from("Previous conversation summary\n");
    for m in messages {
        if m.role != Role::User {
            continue;
        }
        let text = m.text().trim();
        if text.is_empty() {
            continue;
        }
        let snippet: String = text.chars().take(SNIPPET_CHARS).collect();
        out.push_str("User request: ");
        out.push_str(&snippet);
        if text.chars().count() > SNIPPET_CHARS {
            out.push_str("...");
        }
        out.push('\n');
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_user_requests_in_order() {
        let msgs = vec![
            Message::user("first question"),
            Message::assistant("an answer"),
            Message::user("second question"),
        ];
        let s = summarize_history(&msgs);
        assert!(s.starts_with("Previous conversation summary\n"));
        let first = s.find("first question").unwrap();
        let second = s.find("second question").unwrap();
        assert!(first < second);
        assert!(!s.contains("an answer"));
    }

    #[test]
    fn long_requests_are_truncated_with_ellipsis() {
        let long = "x".repeat(500);
        let s = summarize_history(&[Message::user(long)]);
        let line = s.lines().nth(1).unwrap();
        assert!(line.len() < 500);
        assert!(line.ends_with("..."));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // Multi-byte characters around the cut point must not panic.
        let long = "ö".repeat(300);
        let s = summarize_history(&[Message::user(long)]);
        assert!(s.contains("ö"));
    }

    #[test]
    fn non_user_only_history_yields_header_only() {
        let msgs = vec![Message::assistant("a"), Message::system("s")];
        let s = summarize_history(&msgs);
        assert_eq!(s, "Previous conversation summary\n");
    }
}
