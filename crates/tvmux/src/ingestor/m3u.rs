//! Streaming M3U playlist parser
//!
//! Single-pass, line-oriented, push-based: entries are handed to an
//! `on_entry` callback as soon as an `#EXTINF` line is followed by a URL
//! line. A callback error aborts the parse and propagates unchanged to the
//! caller; per-line anomalies go to the advisory `on_error` callback and the
//! parse continues. Cancellation is checked before every entry delivery.

use std::collections::HashMap;
use std::io::BufRead;

use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, AppResult, SourceError};

/// One playlist entry: an `#EXTINF` metadata line plus the URL that follows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct M3uEntry {
    pub duration: f64,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,
    pub tvg_logo: Option<String>,
    pub group_title: Option<String>,
    pub channel_number: Option<u32>,
    pub title: String,
    pub url: String,
    /// Attributes the parser has no dedicated field for.
    pub extra: HashMap<String, String>,
}

/// Counters describing one parse run.
#[derive(Debug, Clone, Copy, Default)]
pub struct M3uParseSummary {
    pub entries: usize,
    pub skipped: usize,
}

/// Callback invoked for each complete entry. Returning an error aborts the
/// parse; the error is propagated to the caller unchanged.
pub type EntrySink<'a> = dyn FnMut(M3uEntry) -> AppResult<()> + Send + 'a;

/// Advisory callback for per-line anomalies; parsing continues afterwards.
pub type ParseErrorSink<'a> = dyn FnMut(usize, &str) + Send + 'a;

/// Streaming M3U parser.
pub struct M3uParser;

impl M3uParser {
    /// Parse a playlist from `reader`, pushing entries into `on_entry`.
    pub fn parse<R: BufRead>(
        reader: R,
        token: &CancellationToken,
        on_entry: &mut EntrySink<'_>,
        on_error: &mut ParseErrorSink<'_>,
    ) -> AppResult<M3uParseSummary> {
        let mut summary = M3uParseSummary::default();
        let mut pending: Option<M3uEntry> = None;

        for (index, line) in reader.lines().enumerate() {
            let line_no = index + 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    return Err(SourceError::parse_failure(
                        "m3u",
                        format!("read error at line {line_no}: {e}"),
                    )
                    .into());
                }
            };
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            if let Some(extinf) = line.strip_prefix("#EXTINF:") {
                if pending.is_some() {
                    summary.skipped += 1;
                    on_error(line_no, "#EXTINF line without a following URL");
                }
                match parse_extinf(extinf) {
                    Some(entry) => pending = Some(entry),
                    None => {
                        summary.skipped += 1;
                        pending = None;
                        on_error(line_no, "malformed #EXTINF line");
                    }
                }
                continue;
            }

            if line.starts_with('#') {
                // Header or unknown directive.
                continue;
            }

            // A bare URL line completes the pending entry; one without a
            // preceding #EXTINF is noise.
            match pending.take() {
                Some(mut entry) => {
                    entry.url = line.to_string();
                    if token.is_cancelled() {
                        return Err(AppError::Cancelled);
                    }
                    on_entry(entry)?;
                    summary.entries += 1;
                }
                None => {
                    summary.skipped += 1;
                    on_error(line_no, "URL line without preceding #EXTINF");
                }
            }
        }

        if pending.is_some() {
            summary.skipped += 1;
        }

        Ok(summary)
    }
}

/// Parse the body of an `#EXTINF:` line (duration, attributes, title).
fn parse_extinf(content: &str) -> Option<M3uEntry> {
    let comma = find_title_separator(content)?;
    let (head, title) = content.split_at(comma);
    let title = title[1..].trim().to_string();

    let duration_str = head.split_whitespace().next().unwrap_or("0");
    let duration: f64 = duration_str.parse().unwrap_or(-1.0);

    let mut entry = M3uEntry {
        duration,
        title,
        ..Default::default()
    };

    for (key, value) in parse_attributes(head) {
        match key.as_str() {
            "tvg-id" => entry.tvg_id = Some(value),
            "tvg-name" => entry.tvg_name = Some(value),
            "tvg-logo" => entry.tvg_logo = Some(value),
            "group-title" => entry.group_title = Some(value),
            "tvg-chno" => entry.channel_number = value.parse().ok(),
            _ => {
                entry.extra.insert(key, value);
            }
        }
    }

    Some(entry)
}

/// Find the comma separating attributes from the title, ignoring commas
/// inside quoted attribute values.
fn find_title_separator(content: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, ch) in content.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Scan `key="value"` pairs (unquoted values accepted) out of the attribute
/// section of an `#EXTINF` line.
fn parse_attributes(section: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut current_key = String::new();
    let mut current_value = String::new();
    let mut in_quotes = false;
    let mut in_value = false;

    for ch in section.chars() {
        match ch {
            '"' if in_value => {
                if in_quotes {
                    // Closing quote ends the value.
                    attrs.push((current_key.trim().to_string(), current_value.clone()));
                    current_key.clear();
                    current_value.clear();
                    in_value = false;
                    in_quotes = false;
                } else {
                    in_quotes = true;
                }
            }
            '=' if !in_quotes && !in_value => {
                in_value = true;
            }
            ' ' | '\t' if !in_quotes => {
                if in_value && !current_value.is_empty() {
                    attrs.push((
                        current_key.trim().to_string(),
                        current_value.trim_matches('"').to_string(),
                    ));
                    current_key.clear();
                    current_value.clear();
                    in_value = false;
                } else if !in_value {
                    current_key.clear();
                }
            }
            _ => {
                if in_value {
                    current_value.push(ch);
                } else {
                    current_key.push(ch);
                }
            }
        }
    }

    if in_value && !current_value.is_empty() {
        attrs.push((
            current_key.trim().to_string(),
            current_value.trim_matches('"').to_string(),
        ));
    }

    attrs
}
