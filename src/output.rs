//! Rendering of `ifm` results.
//!
//! JSON mode prints one envelope per command:
//! `{schema_version, command, status, data | error, warnings?, next_steps?}`.
//! Human mode prints a header line, aligned fields, indented rows (timeline
//! bands, closed states, events), then `warning:` and `next:` lines.

use serde::Serialize;

use crate::error::{exit_codes, Error, Result};
use crate::event::Event;
use crate::state::{IdeaFlowState, Scope};
use crate::state_machine::Transition;
use crate::task::TaskId;
use crate::timeline::{
    Band, BandTimeline, TimelineEvent, TimelineNode, TimelineSummary, TreeTimeline,
};

pub const SCHEMA_VERSION: &str = "ifm.v1";

/// Subcommand groups whose second word is part of the command name.
const COMMAND_GROUPS: [&str; 4] = ["task", "state", "activity", "timeline"];

#[derive(Debug, Clone, Copy)]
pub struct OutputOptions {
    pub json: bool,
    pub quiet: bool,
}

/// Human view of one command result.
#[derive(Debug, Clone, Default)]
pub struct HumanOutput {
    header: String,
    fields: Vec<(String, String)>,
    rows: Vec<String>,
    warnings: Vec<String>,
    next_steps: Vec<String>,
}

impl HumanOutput {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    pub fn field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn row(&mut self, row: impl Into<String>) {
        self.rows.push(row.into());
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn next_step(&mut self, step: impl Into<String>) {
        self.next_steps.push(step.into());
    }

    pub fn render(&self) -> String {
        let width = self.fields.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        let mut lines = vec![self.header.clone()];
        lines.extend(
            self.fields
                .iter()
                .map(|(key, value)| format!("  {key:<width$}  {value}")),
        );
        lines.extend(self.rows.iter().map(|row| format!("  {row}")));
        lines.extend(self.warnings.iter().map(|warning| format!("warning: {warning}")));
        lines.extend(self.next_steps.iter().map(|step| format!("next: {step}")));
        lines.join("\n")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Success,
    Error,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: i32,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    schema_version: &'static str,
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    next_steps: Vec<String>,
}

pub fn emit_success<T: Serialize>(
    options: OutputOptions,
    command: &str,
    data: &T,
    human: &HumanOutput,
) -> Result<()> {
    if options.json {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: Status::Success,
            data: Some(data),
            error: None,
            warnings: human.warnings.clone(),
            next_steps: human.next_steps.clone(),
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else if !options.quiet {
        println!("{}", human.render());
    }
    Ok(())
}

pub fn emit_error(command: &str, err: &Error, json: bool) -> Result<()> {
    let next_steps = error_next_steps(err);
    if json {
        let envelope: Envelope<'_, ()> = Envelope {
            schema_version: SCHEMA_VERSION,
            command,
            status: Status::Error,
            data: None,
            error: Some(ErrorBody {
                message: err.public_message(),
                code: err.exit_code(),
                kind: error_kind(err),
                details: err.details(),
            }),
            warnings: Vec::new(),
            next_steps,
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
        return Ok(());
    }

    eprintln!("error: {}", err.public_message());
    for step in next_steps.iter().take(1) {
        eprintln!("hint: {step}");
    }
    Ok(())
}

/// Command name for error envelopes, read before clap has parsed anything.
pub fn infer_command_name_from_args() -> String {
    command_name(std::env::args().skip(1))
}

fn command_name(args: impl IntoIterator<Item = String>) -> String {
    let mut words = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--root" {
            args.next();
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        let grouped = words.is_empty() && COMMAND_GROUPS.contains(&arg.as_str());
        words.push(arg);
        if !grouped {
            break;
        }
    }

    if words.is_empty() {
        "ifm".to_string()
    } else {
        words.join(" ")
    }
}

pub fn error_kind(err: &Error) -> &'static str {
    match err.exit_code() {
        exit_codes::USER_ERROR => "user_error",
        exit_codes::CONFLICT => "conflict",
        _ => "operation_failed",
    }
}

fn error_next_steps(err: &Error) -> Vec<String> {
    match err {
        Error::DuplicateTaskName(existing) => vec![
            format!("ifm task show '{}'", existing.name),
            format!("ifm task start {}", existing.id),
        ],
        Error::PreconditionViolation(_) => {
            vec!["ifm task show <name> to see open scopes".to_string()]
        }
        Error::NotFound(_) => vec!["ifm task new <name>".to_string()],
        Error::InvalidConfig(_) => vec!["fix .ideaflow.toml then retry".to_string()],
        Error::LockFailed(_) => vec!["retry once the other ifm process finishes".to_string()],
        _ => Vec::new(),
    }
}

fn span_row(state: &IdeaFlowState) -> String {
    format!(
        "{} {} {}s",
        state.scope,
        state.state_type,
        state.duration().num_seconds()
    )
}

/// Result of `state open`, `state nest` or `subtask`.
pub fn transition_human(
    task_id: TaskId,
    transition: &Transition,
    requested_link: bool,
) -> HumanOutput {
    let opened = &transition.opened;
    let mut human = HumanOutput::new(format!("Opened {} on {}", opened.state_type, opened.scope));
    human.field("Task", task_id.to_string());
    if let Some(parent) = opened.parent_scope {
        human.field("Parent", parent.to_string());
    }
    if let Some(comment) = &opened.starting_comment {
        human.field("Comment", comment.clone());
    }
    if opened.is_linked_to_previous {
        human.field("Linked", "continues the previous band");
    } else if requested_link {
        human.warn("no preceding state of the same type in this scope; opened unlinked");
    }
    for state in &transition.closed {
        human.row(format!("closed {}", span_row(state)));
    }
    human.next_step(format!("ifm state close {task_id} --scope {}", opened.scope));
    human
}

/// Result of `state close` or `task end`.
pub fn closed_human(
    header: impl Into<String>,
    task_id: TaskId,
    closed: &[IdeaFlowState],
) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.field("Task", task_id.to_string());
    human.field("Closed", closed.len().to_string());
    for state in closed {
        human.row(span_row(state));
    }
    if closed.iter().any(|state| state.scope == Scope::Primary) {
        human.next_step(format!("ifm timeline tree {task_id}"));
    }
    human
}

/// Result of an event append.
pub fn event_human(header: &str, event: &Event) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.field("Task", event.task_id.to_string());
    human.field("Event", event.event_id.clone());
    if let Some(comment) = &event.comment {
        human.field("Comment", comment.clone());
    }
    if let Some(file_path) = &event.file_path {
        human.field("File", file_path.clone());
    }
    if let Some(duration) = event.duration_seconds {
        human.field("Duration", format!("{duration}s"));
    }
    human
}

pub fn describe_band(band: &Band) -> String {
    let mut line = format!(
        "[{:>6}s .. {:>6}s] {:<8} {}",
        band.start_offset,
        band.end_offset,
        band.state_type.as_str(),
        band.scope
    );
    if band.segments.len() > 1 {
        line.push_str(&format!(" (linked x{})", band.segments.len()));
    } else if band.is_linked_to_previous {
        line.push_str(" (linked)");
    }
    if band.in_progress {
        line.push_str(" (in progress)");
    }
    if !band.comments.is_empty() {
        line.push_str(&format!(": {}", band.comments.join(" / ")));
    }
    line
}

fn describe_event(event: &TimelineEvent) -> String {
    let mut line = format!("@{}s {}", event.offset, event.event.event_type);
    if let Some(comment) = &event.event.comment {
        line.push_str(&format!(": {comment}"));
    }
    line
}

fn summary_fields(human: &mut HumanOutput, summary: &TimelineSummary) {
    human.field("Total", format!("{}s", summary.total_seconds));
    for (state_type, seconds) in &summary.by_type {
        human.field(state_type.to_string(), format!("{seconds}s"));
    }
    if summary.idle_seconds > 0 {
        human.field("Idle", format!("{}s", summary.idle_seconds));
    }
}

fn in_progress_step(task_id: TaskId, bands: &[&Band], human: &mut HumanOutput) {
    if let Some(band) = bands.iter().find(|band| band.in_progress && !band.is_nested) {
        human.next_step(format!("ifm state close {task_id} --scope {}", band.scope));
    }
}

pub fn band_timeline_human(timeline: &BandTimeline) -> HumanOutput {
    let mut human = HumanOutput::new(format!("Band timeline: {}", timeline.task.name));
    summary_fields(&mut human, &timeline.summary);
    for band in &timeline.bands {
        human.row(describe_band(band));
    }
    for event in &timeline.events {
        human.row(describe_event(event));
    }
    let bands: Vec<&Band> = timeline.bands.iter().collect();
    in_progress_step(timeline.task.id, &bands, &mut human);
    human
}

fn push_node(human: &mut HumanOutput, node: &TimelineNode, indent: usize) {
    let pad = "  ".repeat(indent);
    human.row(format!("{pad}{}", describe_band(&node.band)));
    for event in &node.events {
        human.row(format!("{pad}  {}", describe_event(event)));
    }
    for child in &node.children {
        push_node(human, child, indent + 1);
    }
}

pub fn tree_timeline_human(timeline: &TreeTimeline) -> HumanOutput {
    let mut human = HumanOutput::new(format!("Tree timeline: {}", timeline.task.name));
    summary_fields(&mut human, &timeline.summary);
    for node in &timeline.nodes {
        push_node(&mut human, node, 0);
    }
    for event in &timeline.events {
        human.row(describe_event(event));
    }
    let roots: Vec<&Band> = timeline.nodes.iter().map(|node| &node.band).collect();
    in_progress_step(timeline.task.id, &roots, &mut human);
    human
}
