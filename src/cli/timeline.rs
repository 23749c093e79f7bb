//! ifm timeline command implementations.

use crate::cli::Context;
use crate::error::Result;
use crate::output::{band_timeline_human, emit_success, tree_timeline_human};
use crate::task::TaskId;

pub fn run_band(ctx: &Context, id: TaskId) -> Result<()> {
    let timeline = ctx.service.band_timeline(id)?;
    let human = band_timeline_human(&timeline);
    emit_success(ctx.output, "timeline band", &timeline, &human)
}

pub fn run_tree(ctx: &Context, id: TaskId) -> Result<()> {
    let timeline = ctx.service.tree_timeline(id)?;
    let human = tree_timeline_human(&timeline);
    emit_success(ctx.output, "timeline tree", &timeline, &human)
}
