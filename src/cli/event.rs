//! ifm note, subtask and activity commands.

use serde::Serialize;

use crate::cli::{ActivityCommands, Context};
use crate::error::Result;
use crate::event::Event;
use crate::output::{emit_success, event_human, transition_human};
use crate::service::{EditorActivity, ExternalActivity, IdleActivity};
use crate::state::PartialState;
use crate::task::TaskId;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubtaskOutput {
    event: Event,
    opened: PartialState,
}

pub fn run_note(ctx: &Context, id: TaskId, comment: String) -> Result<()> {
    let event = ctx.service.add_note(id, comment)?;
    let human = event_human("Note added", &event);
    emit_success(ctx.output, "note", &event, &human)
}

pub fn run_subtask(ctx: &Context, id: TaskId, comment: String) -> Result<()> {
    let started = ctx.service.add_subtask(id, comment)?;
    let mut human = transition_human(id, &started.transition, false);
    human.field("Event", started.event.event_id.clone());
    emit_success(
        ctx.output,
        "subtask",
        &SubtaskOutput {
            event: started.event,
            opened: started.transition.opened,
        },
        &human,
    )
}

pub fn run_activity(ctx: &Context, command: ActivityCommands) -> Result<()> {
    let (name, header, event) = match command {
        ActivityCommands::Editor {
            id,
            file,
            duration,
            modified,
        } => {
            let event = ctx.service.add_editor_activity(
                id,
                EditorActivity {
                    file_path: file,
                    duration_seconds: duration,
                    modified,
                },
            )?;
            ("activity editor", "Editor activity recorded", event)
        }
        ActivityCommands::Idle {
            id,
            duration,
            comment,
            auto,
        } => {
            let event = ctx.service.add_idle_activity(
                id,
                IdleActivity {
                    duration_seconds: duration,
                    comment,
                    auto,
                },
            )?;
            ("activity idle", "Idle activity recorded", event)
        }
        ActivityCommands::External {
            id,
            duration,
            comment,
        } => {
            let event = ctx.service.add_external_activity(
                id,
                ExternalActivity {
                    duration_seconds: duration,
                    comment,
                },
            )?;
            ("activity external", "External activity recorded", event)
        }
    };

    let human = event_human(header, &event);
    emit_success(ctx.output, name, &event, &human)
}
