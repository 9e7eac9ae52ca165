//! Terminal presentation of agent progress and engine milestones.
//!
//! Everything the agent emits passes through [`Console::agent_output`] or
//! [`Console::agent_diagnostic`], which sanitize unconditionally before
//! writing. Engine diagnostics go through `tracing` instead.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::QueueableCommand;
use crossterm::cursor::MoveToColumn;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use serde_json::{Map, Value};
use tracing::warn;

use crate::core::lines::LineBuffer;
use crate::core::sanitize::sanitize;
use crate::core::stream::{ContentBlock, Delta, PartialEvent, StreamEvent};

const PROMPT_PREVIEW_CHARS: usize = 60;
const COMMAND_PREVIEW_CHARS: usize = 80;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Output sinks for progress (stdout) and diagnostics (stderr).
#[derive(Clone)]
pub struct Console {
    out: SharedWriter,
    err: SharedWriter,
}

impl Console {
    pub fn terminal() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
            err: Arc::new(Mutex::new(Box::new(err))),
        }
    }

    /// Write engine-authored text to the progress sink.
    pub fn print(&self, text: &str) {
        write_to(&self.out, text);
    }

    /// Write agent stdout-derived text, redacting secrets first.
    pub fn agent_output(&self, text: &str) {
        write_to(&self.out, &sanitize(text));
    }

    /// Write agent stderr text, redacting secrets first.
    pub fn agent_diagnostic(&self, text: &str) {
        write_to(&self.err, &sanitize(text));
    }

    /// Redraw the countdown line in place.
    pub fn countdown(&self, remaining: Duration) {
        write_to(&self.out, &format!("\r  {}   ", countdown_text(remaining).dim()));
    }

    pub fn clear_line(&self) {
        if let Ok(mut writer) = self.out.lock()
            && let Err(e) = clear(writer.as_mut())
        {
            warn!(err = %e, "failed to clear console line");
        }
    }
}

/// Streams agent stdout records to a [`Console`].
///
/// Text deltas are token-sized, so streamed text is held until its line
/// completes and redacted as a whole. Any other record flushes held text
/// first so output order is preserved.
#[derive(Debug, Default)]
pub struct AgentView {
    text: LineBuffer,
}

impl AgentView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, console: &Console, event: &StreamEvent) {
        if let Some(delta) = event.text_delta() {
            if let Some(lines) = self.text.push(delta.as_bytes()) {
                console.agent_output(&String::from_utf8_lossy(&lines));
            }
            return;
        }
        self.flush(console);
        if let Some(text) = render_event(event) {
            console.agent_output(&text);
        }
    }

    /// Write any held partial line.
    pub fn flush(&mut self, console: &Console) {
        let rest = self.text.take();
        if !rest.is_empty() {
            console.agent_output(&String::from_utf8_lossy(&rest));
        }
    }
}

fn clear(writer: &mut dyn Write) -> io::Result<()> {
    writer
        .queue(MoveToColumn(0))?
        .queue(Clear(ClearType::CurrentLine))?;
    writer.flush()
}

fn write_to(sink: &SharedWriter, text: &str) {
    if let Ok(mut writer) = sink.lock() {
        if let Err(e) = writer.write_all(text.as_bytes()) {
            warn!(err = %e, "failed to write console output");
        } else if let Err(e) = writer.flush() {
            warn!(err = %e, "failed to flush console output");
        }
    }
}

pub fn banner() -> String {
    let rule = "═".repeat(56);
    format!(
        "\n{}\n{}\n{}\n\n",
        format!("  ╔{rule}╗").cyan().bold(),
        format!("  ║{:^56}║", "headless · unattended coding agent runner")
            .cyan()
            .bold(),
        format!("  ╚{rule}╝").cyan().bold(),
    )
}

pub fn task_header(task_id: &str, prompt: &str) -> String {
    let preview = if prompt.chars().count() > PROMPT_PREVIEW_CHARS {
        let head: String = prompt.chars().take(PROMPT_PREVIEW_CHARS - 3).collect();
        format!("{head}...")
    } else {
        prompt.to_string()
    };
    format!(
        "\n{}\n{}\n\n",
        format!("═══ TASK: {task_id} ═══").blue().bold(),
        preview.cyan()
    )
}

pub fn result_block(success: bool, ai_note: &str) -> String {
    let heading = if success {
        "═══ SUCCESS ═══".green().bold()
    } else {
        "═══ COMPLETED ═══".yellow().bold()
    };
    format!("\n{heading}\n{}\n\n", ai_note.dim())
}

pub fn countdown_text(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("Next check in: {}m {}s", secs / 60, secs % 60)
}

/// Human-readable line for a tool invocation.
pub fn format_tool_use(tool: &str, input: &Map<String, Value>) -> String {
    match tool {
        "Read" => format!("{} {}", "📖 Reading".cyan(), field(input, "file_path").dim()),
        "Edit" => format!("{} {}", "✏️  Editing".yellow(), field(input, "file_path").dim()),
        "Write" => format!("{} {}", "📝 Writing".green(), field(input, "file_path").dim()),
        "Bash" => {
            let command = field(input, "command");
            let mut preview: String = command.chars().take(COMMAND_PREVIEW_CHARS).collect();
            if command.chars().count() > COMMAND_PREVIEW_CHARS {
                preview.push_str("...");
            }
            format!("{}{}", "$ ".magenta(), preview.dim())
        }
        "Glob" => format!("{} {}", "🔍 Searching".blue(), field(input, "pattern").dim()),
        "Grep" => format!("{} {}", "🔎 Grep".blue(), field(input, "pattern").dim()),
        "Task" => {
            let description = Some(field(input, "description"))
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "task".to_string());
            format!("{} {}", "🤖 Agent".cyan(), description.dim())
        }
        "TodoWrite" => format!("{} {}", "📋 Todos".yellow(), "updated".dim()),
        other => format!("{}", format!("🔧 {other}").dark_grey()),
    }
}

/// Progress text for one stream record, or `None` for records with no display.
pub fn render_event(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::System => Some(format!("{}\n", "✓ Agent started".green())),
        StreamEvent::Assistant { message } => {
            let lines: String = message
                .iter()
                .flat_map(|m| m.content.iter())
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { name, input } => {
                        Some(format!("{}\n", format_tool_use(name, input)))
                    }
                    ContentBlock::Other => None,
                })
                .collect();
            Some(lines).filter(|l| !l.is_empty())
        }
        StreamEvent::Partial { event: partial } => match partial.as_ref()? {
            PartialEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text },
            } => Some(text.clone()),
            PartialEvent::ContentBlockStart {
                content_block: ContentBlock::ToolUse { name, .. },
            } => Some(format!("\n{}\n", format!("▶ {name}...").dim())),
            _ => None,
        },
        StreamEvent::ToolUse {
            tool: Some(tool),
            input,
        } => Some(format!("{}\n", format_tool_use(tool, input))),
        StreamEvent::ToolUse { tool: None, .. } => None,
        StreamEvent::ToolResult => Some(format!("{}\n", "  └─ done".dim())),
        StreamEvent::Result { .. } => None,
    }
}

fn field(input: &Map<String, Value>, key: &str) -> String {
    match input.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn bash_command_is_truncated_to_eighty_chars() {
        let long = "x".repeat(100);
        let line = format_tool_use("Bash", &input(json!({ "command": long })));
        assert!(line.contains(&format!("{}...", "x".repeat(80))));
        assert!(!line.contains(&"x".repeat(81)));
    }

    #[test]
    fn known_tools_show_their_target() {
        let line = format_tool_use("Read", &input(json!({"file_path": "src/main.rs"})));
        assert!(line.contains("Reading"));
        assert!(line.contains("src/main.rs"));

        let line = format_tool_use("Task", &input(json!({})));
        assert!(line.contains("task"));

        let line = format_tool_use("WebFetch", &input(json!({"url": "x"})));
        assert!(line.contains("WebFetch"));
    }

    #[test]
    fn text_delta_renders_raw_text() {
        let event: StreamEvent = serde_json::from_value(json!({
            "type": "stream_event",
            "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": "hi"}}
        }))
        .expect("parse");
        assert_eq!(render_event(&event).as_deref(), Some("hi"));
    }

    #[test]
    fn result_and_text_only_assistant_have_no_display() {
        let result = StreamEvent::Result {
            result: Some("{\"success\": true}".to_string()),
        };
        assert_eq!(render_event(&result), None);

        let assistant: StreamEvent = serde_json::from_value(json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": "thinking"}]}
        }))
        .expect("parse");
        assert_eq!(render_event(&assistant), None);
    }

    #[test]
    fn task_header_truncates_long_prompts() {
        let header = task_header("t-1", &"p".repeat(100));
        assert!(header.contains("t-1"));
        assert!(header.contains(&format!("{}...", "p".repeat(57))));
        assert!(!header.contains(&"p".repeat(58)));
    }

    #[test]
    fn countdown_text_splits_minutes_and_seconds() {
        assert_eq!(
            countdown_text(Duration::from_millis(125_400)),
            "Next check in: 2m 5s"
        );
    }

    #[test]
    fn agent_output_is_sanitized_before_writing() {
        let buf = crate::test_support::SharedBuf::default();
        let console = Console::new(buf.clone(), io::sink());
        console.agent_output("export password=hunter2\n");
        assert_eq!(buf.contents(), "export [SECRET_REDACTED]\n");
    }

    fn delta(text: &str) -> StreamEvent {
        serde_json::from_value(json!({
            "type": "stream_event",
            "event": {"type": "content_block_delta", "delta": {"type": "text_delta", "text": text}}
        }))
        .expect("parse")
    }

    #[test]
    fn streamed_secret_split_across_deltas_is_redacted() {
        let buf = crate::test_support::SharedBuf::default();
        let console = Console::new(buf.clone(), io::sink());
        let mut view = AgentView::new();

        for piece in ["Using pass", "word", "=", "hun", "ter2", "\nnext"] {
            view.show(&console, &delta(piece));
        }
        assert_eq!(buf.contents(), "Using [SECRET_REDACTED]\n");

        view.show(&console, &StreamEvent::ToolResult);
        let shown = buf.contents();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("next"));
        assert!(shown.find("next") < shown.find("done"));
    }

    #[test]
    fn flush_writes_held_text() {
        let buf = crate::test_support::SharedBuf::default();
        let console = Console::new(buf.clone(), io::sink());
        let mut view = AgentView::new();

        view.show(&console, &delta("token=abc"));
        assert_eq!(buf.contents(), "");
        view.flush(&console);
        assert_eq!(buf.contents(), "[SECRET_REDACTED]");
    }
}
