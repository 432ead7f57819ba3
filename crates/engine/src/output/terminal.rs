//! Interactive terminal renderer.

use std::{
    collections::BTreeMap,
    io::{self, BufRead, BufReader, Write},
    sync::Mutex,
};

use crossterm::{
    queue,
    style::{Color, Print, Stylize},
    terminal::{Clear, ClearType},
};
use gcpdiag_types::{PromptRequest, PromptResponse, ResourceRef, Status, StepKind};
use gcpdiag_util::{truncate_to_width, wrap_indented};
use tracing::warn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use super::Output;

/// Invalid answers tolerated before a prompt gives up with `NoAnswer`.
const MAX_PROMPT_ATTEMPTS: usize = 3;
const DETAIL_INDENT: &str = "     ";

struct Sink {
    writer: Box<dyn Write + Send>,
    progress_visible: bool,
}

/// Colorized line-oriented renderer reading answers from a line reader.
pub struct TerminalOutput {
    /// Held for a whole prompt so a question and its answer stay paired.
    prompting: Mutex<()>,
    reader: Mutex<Box<dyn BufRead + Send>>,
    sink: Mutex<Sink>,
    color: bool,
    wrap_width: usize,
}

impl TerminalOutput {
    /// Renderer bound to the process's stdin and stdout.
    pub fn stdio(color: bool, wrap_width: usize) -> Self {
        Self::with_io(BufReader::new(io::stdin()), io::stdout(), color, wrap_width)
    }

    pub fn with_io(reader: impl BufRead + Send + 'static, writer: impl Write + Send + 'static, color: bool, wrap_width: usize) -> Self {
        Self {
            prompting: Mutex::new(()),
            reader: Mutex::new(Box::new(reader)),
            sink: Mutex::new(Sink {
                writer: Box::new(writer),
                progress_visible: false,
            }),
            color,
            wrap_width,
        }
    }

    fn paint(&self, label: &str, color: Color) -> String {
        if self.color {
            label.with(color).bold().to_string()
        } else {
            label.to_string()
        }
    }

    /// Writes `lines` below any progress line, clearing it first.
    fn emit(&self, lines: &str) {
        let mut sink = self.sink.lock().expect("terminal lock poisoned");
        let result = clear_progress(&mut sink).and_then(|_| {
            writeln!(sink.writer, "{lines}")?;
            sink.writer.flush()
        });
        if let Err(error) = result {
            warn!(error = %error, "failed to write to terminal");
        }
    }

    fn print_result(&self, label: &str, color: Color, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>) {
        let subject = resource.map(|resource| resource.short_path.as_str()).unwrap_or("-");
        let mut block = format!("   - {:<60} {}", subject, self.paint(label, color));
        if !reason.trim().is_empty() {
            block.push('\n');
            block.push_str(&wrap_indented(reason, self.wrap_width, DETAIL_INDENT));
        }
        if let Some(remediation) = remediation.filter(|text| !text.trim().is_empty()) {
            block.push_str(&format!("\n\n{DETAIL_INDENT}{}\n", self.paint("[REMEDIATION]", Color::Yellow)));
            block.push_str(&wrap_indented(remediation, self.wrap_width, DETAIL_INDENT));
        }
        self.emit(&block);
    }

    fn read_answer(&self) -> Option<String> {
        let mut reader = self.reader.lock().expect("terminal input lock poisoned");
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()).filter(|answer| !answer.is_empty()),
            Err(error) => {
                warn!(error = %error, "failed to read prompt answer");
                None
            }
        }
    }
}

fn clear_progress(sink: &mut Sink) -> io::Result<()> {
    if sink.progress_visible {
        queue!(sink.writer, Print("\r"), Clear(ClearType::CurrentLine))?;
        sink.progress_visible = false;
    }
    Ok(())
}

impl Output for TerminalOutput {
    fn start_step(&self, index: usize, _execution_id: &str, name: &str, kind: StepKind) {
        if matches!(kind, StepKind::Gateway | StepKind::Composite) {
            self.update_progress(&format!("[{index}] {name}"));
            return;
        }
        self.emit(&format!("\n[{index}] {}", self.paint(name, Color::Cyan)));
    }

    fn update_progress(&self, message: &str) {
        let mut sink = self.sink.lock().expect("terminal lock poisoned");
        let line = truncate_to_width(message, self.wrap_width);
        let result = clear_progress(&mut sink).and_then(|_| {
            queue!(sink.writer, Print(line))?;
            sink.writer.flush()
        });
        match result {
            Ok(()) => sink.progress_visible = true,
            Err(error) => warn!(error = %error, "failed to update progress line"),
        }
    }

    fn print_ok(&self, resource: Option<&ResourceRef>, reason: &str) {
        self.print_result("[OK]", Color::Green, resource, reason, None);
    }

    fn print_failed(&self, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>) {
        self.print_result("[FAIL]", Color::Red, resource, reason, remediation);
    }

    fn print_uncertain(&self, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>) {
        self.print_result("[UNCERTAIN]", Color::Yellow, resource, reason, remediation);
    }

    fn print_skipped(&self, resource: Option<&ResourceRef>, reason: &str) {
        self.print_result("[SKIP]", Color::DarkGrey, resource, reason, None);
    }

    fn info(&self, message: &str) {
        let label = self.paint("[INFO]", Color::Blue);
        self.emit(&format!("{DETAIL_INDENT}{label} {message}"));
    }

    fn prompt(&self, request: &PromptRequest) -> PromptResponse {
        let keys: Vec<&str> = request.options.keys().map(String::as_str).collect();
        let mut question = format!("\n{}\n", wrap_indented(&request.message, self.wrap_width, ""));
        for (key, description) in &request.options {
            question.push_str(&format!("  [{}] {description}\n", self.paint(key, Color::Cyan)));
        }

        let _prompting = self.prompting.lock().expect("prompt lock poisoned");
        for attempt in 1..=MAX_PROMPT_ATTEMPTS {
            {
                let mut sink = self.sink.lock().expect("terminal lock poisoned");
                let result = clear_progress(&mut sink).and_then(|_| {
                    if attempt == 1 {
                        write!(sink.writer, "{question}")?;
                    }
                    write!(sink.writer, "Choose an option [{}]: ", keys.join("/"))?;
                    sink.writer.flush()
                });
                if let Err(error) = result {
                    warn!(error = %error, "failed to write prompt");
                    return PromptResponse::NoAnswer;
                }
            }

            let Some(answer) = self.read_answer() else {
                self.emit("");
                return PromptResponse::NoAnswer;
            };
            if let Some(response) = request.resolve(&answer) {
                return response;
            }
            self.emit(&format!("'{answer}' is not one of [{}].", keys.join("/")));
        }
        PromptResponse::NoAnswer
    }

    fn print_summary(&self, runbook: &str, totals: &BTreeMap<Status, usize>) {
        let mut summary = format!("\n{} {runbook}\n", self.paint("Runbook finished:", Color::White));
        for status in Status::ALL {
            let count = totals.get(&status).copied().unwrap_or(0);
            summary.push_str(&format!("  {:<10} {count}\n", status.as_str()));
        }
        self.emit(summary.trim_end());
    }

    fn log_writer(&self) -> BoxMakeWriter {
        BoxMakeWriter::new(io::stderr)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::{Arc, Mutex},
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("capture lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().expect("capture lock").clone()).expect("utf8")
        }
    }

    fn terminal(input: &str) -> (TerminalOutput, Captured) {
        let captured = Captured::default();
        let output = TerminalOutput::with_io(Cursor::new(input.to_string()), captured.clone(), false, 80);
        (output, captured)
    }

    #[test]
    fn eof_returns_no_answer() {
        let (output, _) = terminal("");
        assert_eq!(output.prompt(&PromptRequest::human_task("Fix it")), PromptResponse::NoAnswer);
    }

    #[test]
    fn empty_line_returns_no_answer() {
        let (output, _) = terminal("\n");
        assert_eq!(output.prompt(&PromptRequest::confirmation("Resolved?")), PromptResponse::NoAnswer);
    }

    #[test]
    fn invalid_answers_are_asked_again() {
        let (output, captured) = terminal("maybe\nC\n");
        assert_eq!(output.prompt(&PromptRequest::human_task("Fix it")), PromptResponse::Continue);
        let text = captured.text();
        assert!(text.contains("'maybe' is not one of [r/c/s]"));
        assert_eq!(text.matches("Choose an option").count(), 2);
    }

    #[test]
    fn gives_up_after_repeated_invalid_answers() {
        let (output, _) = terminal("a\nb\nd\ny\n");
        assert_eq!(output.prompt(&PromptRequest::human_task("Fix it")), PromptResponse::NoAnswer);
    }

    #[test]
    fn failures_show_reason_and_remediation() {
        let (output, captured) = terminal("");
        let resource = ResourceRef::from_full_path("projects/demo/zones/us-central1-a/instances/vm-1");
        output.print_failed(Some(&resource), "The VM is stopped.", Some("Start the VM."));

        let text = captured.text();
        assert!(text.contains("demo/us-central1-a/vm-1"));
        assert!(text.contains("[FAIL]"));
        assert!(text.contains("The VM is stopped."));
        assert!(text.contains("[REMEDIATION]"));
        assert!(text.contains("Start the VM."));
    }

    #[test]
    fn summary_lists_every_status() {
        let (output, captured) = terminal("");
        let totals = BTreeMap::from([(Status::Ok, 2), (Status::Failed, 1)]);
        output.print_summary("gce/vm-running-state", &totals);

        let text = captured.text();
        assert!(text.contains("gce/vm-running-state"));
        assert!(text.contains("skipped"));
        assert!(text.contains("ok         2"));
    }
}
