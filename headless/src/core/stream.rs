//! Incremental parser for the agent's newline-delimited JSON event stream.
//!
//! The agent writes one JSON record per line on stdout. Chunks arrive with
//! arbitrary boundaries, so the parser keeps the trailing partial line in a
//! buffer and only classifies complete lines. Lines that are not a known
//! record are discarded: the agent may interleave non-protocol text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::core::lines::LineBuffer;
use crate::core::types::Verdict;

static VERDICT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{"success":\s*(true|false)[^}]*\}"#).unwrap());

/// One record from the agent's stdout, keyed by its `type` tag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    System,
    Assistant {
        #[serde(default)]
        message: Option<AssistantMessage>,
    },
    #[serde(rename = "stream_event")]
    Partial {
        #[serde(default)]
        event: Option<PartialEvent>,
    },
    ToolUse {
        #[serde(default)]
        tool: Option<String>,
        #[serde(default)]
        input: Map<String, Value>,
    },
    ToolResult,
    Result {
        #[serde(default)]
        result: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    ToolUse {
        name: String,
        #[serde(default)]
        input: Map<String, Value>,
    },
    #[serde(other)]
    Other,
}

/// Sub-event carried by a `stream_event` record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartialEvent {
    ContentBlockDelta { delta: Delta },
    ContentBlockStart { content_block: ContentBlock },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

impl StreamEvent {
    /// Text carried by a `content_block_delta` text delta, if any.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            StreamEvent::Partial {
                event:
                    Some(PartialEvent::ContentBlockDelta {
                        delta: Delta::TextDelta { text },
                    }),
            } => Some(text),
            _ => None,
        }
    }
}

/// Buffering parser state for a single agent invocation.
#[derive(Debug, Default)]
pub struct StreamParser {
    lines: LineBuffer,
    full_output: String,
    verdict: Option<Verdict>,
    discarded: usize,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stdout chunk and return every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let Some(complete) = self.lines.push(chunk) else {
            return Vec::new();
        };

        complete
            .split(|b| *b == b'\n')
            .filter_map(|line| self.process_line(line))
            .collect()
    }

    /// Process an unterminated trailing line left when the stream closed.
    pub fn flush(&mut self) -> Vec<StreamEvent> {
        let remaining = self.lines.take();
        self.process_line(&remaining).into_iter().collect()
    }

    /// Accumulated text output: streamed deltas, replaced by the final `result`.
    pub fn full_output(&self) -> &str {
        &self.full_output
    }

    /// Verdict taken from a `result` record, if one was seen.
    pub fn result_verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    /// Count of non-empty lines that were not recognised as records.
    pub fn discarded_lines(&self) -> usize {
        self.discarded
    }

    /// Resolve the verdict: a `result` record's verdict first, then a
    /// pattern match anywhere in the accumulated output.
    pub fn into_verdict(self) -> Option<Verdict> {
        self.verdict.or_else(|| find_verdict(&self.full_output))
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let event: StreamEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                trace!(err = %err, "discarding non-protocol line");
                self.discarded += 1;
                return None;
            }
        };
        self.apply(&event);
        Some(event)
    }

    fn apply(&mut self, event: &StreamEvent) {
        if let Some(text) = event.text_delta() {
            self.full_output.push_str(text);
            return;
        }
        if let StreamEvent::Result {
            result: Some(result),
        } = event
            && !result.is_empty()
        {
            self.full_output = result.clone();
            if let Some(verdict) = find_verdict(result) {
                debug!(success = verdict.success, "verdict found in result record");
                self.verdict = Some(verdict);
            }
        }
    }
}

/// Locate an embedded `{"success": <bool>, ...}` object and parse it.
pub fn find_verdict(text: &str) -> Option<Verdict> {
    let matched = VERDICT_RE.find(text)?;
    serde_json::from_str(matched.as_str()).ok()
}
