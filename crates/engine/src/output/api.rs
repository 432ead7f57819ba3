//! Structured renderer for programmatic callers.
//!
//! Nothing is printed. Every call becomes an [`OutputEvent`] that the caller
//! reads back with [`ApiOutput::events`] or serializes as JSON. Prompts are
//! answered from a queue of scripted answers.

use std::{
    collections::{BTreeMap, VecDeque},
    io,
    sync::{Arc, Mutex},
};

use gcpdiag_types::{PromptKind, PromptRequest, PromptResponse, ResourceRef, Status, StepKind};
use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::{MakeWriter, writer::BoxMakeWriter};

use super::Output;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutputEvent {
    StepStarted {
        index: usize,
        execution_id: String,
        name: String,
        kind: StepKind,
    },
    Progress {
        message: String,
    },
    Result {
        status: Status,
        resource: Option<String>,
        reason: String,
        remediation: Option<String>,
    },
    Info {
        message: String,
    },
    Prompt {
        kind: PromptKind,
        message: String,
        response: PromptResponse,
    },
    Summary {
        runbook: String,
        totals: BTreeMap<Status, usize>,
    },
}

/// In-memory sink for `tracing` output.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

/// Writer handed out by [`LogBuffer`] for one log event.
pub struct LogBufferWriter(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().expect("log buffer lock poisoned");
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self.0.lock().map_err(|_| io::Error::other("log buffer lock poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Event-recording renderer.
#[derive(Debug, Default)]
pub struct ApiOutput {
    events: Mutex<Vec<OutputEvent>>,
    answers: Mutex<VecDeque<String>>,
    logs: LogBuffer,
}

impl ApiOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers consumed in order by successive prompts; once exhausted,
    /// prompts return `NoAnswer`.
    pub fn with_answers<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let output = Self::default();
        output
            .answers
            .lock()
            .expect("answer lock poisoned")
            .extend(answers.into_iter().map(Into::into));
        output
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.events.lock().expect("event lock poisoned").clone()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.events())
    }

    pub fn logs(&self) -> String {
        self.logs.contents()
    }

    fn push(&self, event: OutputEvent) {
        self.events.lock().expect("event lock poisoned").push(event);
    }

    fn push_result(&self, status: Status, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>) {
        self.push(OutputEvent::Result {
            status,
            resource: resource.map(|resource| resource.short_path.clone()),
            reason: reason.to_string(),
            remediation: remediation.map(str::to_string),
        });
    }
}

impl Output for ApiOutput {
    fn start_step(&self, index: usize, execution_id: &str, name: &str, kind: StepKind) {
        self.push(OutputEvent::StepStarted {
            index,
            execution_id: execution_id.to_string(),
            name: name.to_string(),
            kind,
        });
    }

    fn update_progress(&self, message: &str) {
        self.push(OutputEvent::Progress {
            message: message.to_string(),
        });
    }

    fn print_ok(&self, resource: Option<&ResourceRef>, reason: &str) {
        self.push_result(Status::Ok, resource, reason, None);
    }

    fn print_failed(&self, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>) {
        self.push_result(Status::Failed, resource, reason, remediation);
    }

    fn print_uncertain(&self, resource: Option<&ResourceRef>, reason: &str, remediation: Option<&str>) {
        self.push_result(Status::Uncertain, resource, reason, remediation);
    }

    fn print_skipped(&self, resource: Option<&ResourceRef>, reason: &str) {
        self.push_result(Status::Skipped, resource, reason, None);
    }

    fn info(&self, message: &str) {
        self.push(OutputEvent::Info {
            message: message.to_string(),
        });
    }

    fn prompt(&self, request: &PromptRequest) -> PromptResponse {
        let answer = self.answers.lock().expect("answer lock poisoned").pop_front();
        let response = answer
            .and_then(|answer| request.resolve(&answer))
            .unwrap_or(PromptResponse::NoAnswer);
        self.push(OutputEvent::Prompt {
            kind: request.kind,
            message: request.message.clone(),
            response: response.clone(),
        });
        response
    }

    fn print_summary(&self, runbook: &str, totals: &BTreeMap<Status, usize>) {
        self.push(OutputEvent::Summary {
            runbook: runbook.to_string(),
            totals: totals.clone(),
        });
    }

    fn log_writer(&self) -> BoxMakeWriter {
        BoxMakeWriter::new(self.logs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_answers_are_consumed_in_order() {
        let output = ApiOutput::with_answers(["c", "bogus"]);
        assert_eq!(output.prompt(&PromptRequest::human_task("one")), PromptResponse::Continue);
        assert_eq!(output.prompt(&PromptRequest::human_task("two")), PromptResponse::NoAnswer);
        assert_eq!(output.prompt(&PromptRequest::confirmation("three")), PromptResponse::NoAnswer);
        assert_eq!(output.events().len(), 3);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let output = ApiOutput::new();
        output.print_skipped(None, "not applicable");
        let json = output.to_json().expect("serialize");
        let parsed: serde_json::Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed[0]["event"], "result");
        assert_eq!(parsed[0]["status"], "skipped");
    }

    #[test]
    fn logs_are_captured_in_memory() {
        let output = ApiOutput::new();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(output.log_writer())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || tracing::warn!(step = "demo", "captured"));
        assert!(output.logs().contains("captured"));
    }
}
