//! ifm state command implementations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::Context;
use crate::error::{Error, Result};
use crate::output::{closed_human, emit_success, transition_human};
use crate::state::{IdeaFlowState, PartialState, Scope, StateType};
use crate::state_machine::{OpenStateRequest, Transition};
use crate::task::TaskId;

pub struct OpenOptions {
    pub id: TaskId,
    pub state_type: String,
    pub scope: String,
    pub comment: Option<String>,
    pub link: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransitionOutput {
    task_id: TaskId,
    opened: PartialState,
    closed: Vec<IdeaFlowState>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloseOutput {
    task_id: TaskId,
    scope: Scope,
    closed: Vec<IdeaFlowState>,
}

fn emit_transition(
    ctx: &Context,
    command: &str,
    task_id: TaskId,
    transition: Transition,
    requested_link: bool,
) -> Result<()> {
    let human = transition_human(task_id, &transition, requested_link);
    emit_success(
        ctx.output,
        command,
        &TransitionOutput {
            task_id,
            opened: transition.opened,
            closed: transition.closed,
        },
        &human,
    )
}

pub fn run_open(ctx: &Context, options: OpenOptions) -> Result<()> {
    let scope: Scope = options.scope.parse()?;
    let state_type: StateType = options.state_type.parse()?;
    let mut request = OpenStateRequest::new(scope, state_type).linked(options.link);
    request.comment = options.comment;

    let transition = ctx.service.open_state(options.id, request)?;
    emit_transition(ctx, "state open", options.id, transition, options.link)
}

pub fn run_nest(
    ctx: &Context,
    id: TaskId,
    state_type: &str,
    parent: &str,
    comment: Option<String>,
) -> Result<()> {
    let parent: Scope = parent.parse()?;
    let state_type: StateType = state_type.parse()?;
    let transition = ctx
        .service
        .open_nested_state(id, parent, state_type, comment)?;
    emit_transition(ctx, "state nest", id, transition, false)
}

fn parse_end_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| Error::InvalidArgument(format!("invalid end time '{raw}': {err}")))
}

pub fn run_close(
    ctx: &Context,
    id: TaskId,
    scope: &str,
    at: Option<&str>,
    comment: Option<String>,
) -> Result<()> {
    let scope: Scope = scope.parse()?;
    let end_time = at.map(parse_end_time).transpose()?;
    let closed = ctx.service.close_state(id, scope, end_time, comment)?;

    let header = if closed.is_empty() {
        format!("Scope {scope} already closed")
    } else {
        format!("Closed {scope}")
    };
    let human = closed_human(header, id, &closed);

    emit_success(
        ctx.output,
        "state close",
        &CloseOutput {
            task_id: id,
            scope,
            closed,
        },
        &human,
    )
}
