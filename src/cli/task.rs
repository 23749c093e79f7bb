//! ifm task command implementations.

use serde::Serialize;

use crate::cli::Context;
use crate::error::Result;
use crate::output::{closed_human, emit_success, HumanOutput};
use crate::state::{IdeaFlowState, PartialState};
use crate::task::{NewTask, Task, TaskId};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskCreatedOutput {
    task: Task,
    started: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskShowOutput {
    task: Task,
    open_states: Vec<PartialState>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskStartedOutput {
    task_id: TaskId,
    opened: PartialState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskEndedOutput {
    task_id: TaskId,
    closed: Vec<IdeaFlowState>,
}

pub fn run_new(
    ctx: &Context,
    name: String,
    description: Option<String>,
    no_start: bool,
) -> Result<()> {
    let mut new_task = NewTask::new(name);
    if let Some(description) = description {
        new_task = new_task.with_description(description);
    }

    let task = if no_start {
        ctx.service.register_task(new_task)?
    } else {
        ctx.service.create_task(new_task)?
    };

    let mut human = HumanOutput::new("Task created");
    human.field("ID", task.id.to_string());
    human.field("Name", task.name.clone());
    if let Some(description) = &task.description {
        human.field("Description", description.clone());
    }
    if no_start {
        human.next_step(format!("ifm task start {}", task.id));
    } else {
        human.field("State", "PROGRESS (primary)");
    }

    emit_success(
        ctx.output,
        "task new",
        &TaskCreatedOutput {
            task,
            started: !no_start,
        },
        &human,
    )
}

pub fn run_show(ctx: &Context, name: &str) -> Result<()> {
    let task = ctx.service.find_task_with_name(name)?;
    let open_states = ctx.service.open_states(task.id)?;

    let mut human = HumanOutput::new(format!("Task {}: {}", task.id, task.name));
    if let Some(description) = &task.description {
        human.field("Description", description.clone());
    }
    human.field("Created", task.created_at.to_rfc3339());
    if open_states.is_empty() {
        human.row("no open states");
    }
    for state in &open_states {
        human.row(format!(
            "{} {} since {}",
            state.scope,
            state.state_type,
            state.start.to_rfc3339()
        ));
    }

    emit_success(
        ctx.output,
        "task show",
        &TaskShowOutput { task, open_states },
        &human,
    )
}

pub fn run_start(ctx: &Context, id: TaskId) -> Result<()> {
    let opened = ctx.service.start_task(id)?;

    let mut human = HumanOutput::new(format!("Task {id} started"));
    human.field("State", format!("{} ({})", opened.state_type, opened.scope));

    emit_success(
        ctx.output,
        "task start",
        &TaskStartedOutput { task_id: id, opened },
        &human,
    )
}

pub fn run_end(ctx: &Context, id: TaskId) -> Result<()> {
    let closed = ctx.service.end_task(id)?;

    let human = closed_human(format!("Task {id} ended"), id, &closed);

    emit_success(
        ctx.output,
        "task end",
        &TaskEndedOutput {
            task_id: id,
            closed,
        },
        &human,
    )
}
