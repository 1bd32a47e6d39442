// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Line-oriented SSE plumbing shared by the HTTP adapters.
//!
//! A single SSE event can be split across multiple TCP packets, so a
//! carry-over buffer is maintained per stream: only complete
//! `\n`-terminated lines are consumed, anything after the last newline
//! waits for the next chunk.

/// Drain all complete lines from `buf` and return their `data: ` payloads.
///
/// Non-`data:` lines (comments, `event:` names, blank keep-alives) are
/// skipped.  Payloads are trimmed; empty payloads are dropped.
pub(crate) fn drain_data_lines(buf: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(nl) = buf.find('\n') {
        let line = buf[..nl].trim_end_matches('\r').to_string();
        buf.drain(..=nl);
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim();
            if !data.is_empty() {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_lines_are_drained() {
        let mut buf = "data: {\"a\":1}\ndata: [DONE]\n".to_string();
        let payloads = drain_data_lines(&mut buf);
        assert_eq!(payloads, vec![r#"{"a":1}"#, "[DONE]"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_tail_is_kept_for_next_chunk() {
        let mut buf = "data: {\"a\":1}\ndata: {\"b\"".to_string();
        let payloads = drain_data_lines(&mut buf);
        assert_eq!(payloads.len(), 1);
        assert_eq!(buf, "data: {\"b\"");

        buf.push_str(":2}\n");
        let payloads = drain_data_lines(&mut buf);
        assert_eq!(payloads, vec![r#"{"b":2}"#]);
    }

    #[test]
    fn non_data_lines_are_skipped() {
        let mut buf = "event: message_start\n: keep-alive\n\ndata: x\n".to_string();
        let payloads = drain_data_lines(&mut buf);
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn windows_line_endings_are_tolerated() {
        let mut buf = "data: y\r\n".to_string();
        assert_eq!(drain_data_lines(&mut buf), vec!["y"]);
    }
}
