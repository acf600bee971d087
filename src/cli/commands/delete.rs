//! delete command - Delete the VM and its per-instance state

use crate::engine::{self, Context, DeleteOutcome, Services};
use crate::ui::{output, prompts};
use anyhow::Result;

/// Delete the VM, asking first for a registered instance unless `force`.
pub fn delete(ctx: &Context, services: &Services, force: bool) -> Result<()> {
    let mut out = output::stdout(ctx.verbosity);
    let interactive = ctx.interactive;
    let mut confirm = |question: &str| prompts::confirm(question, false, interactive);

    let outcome = engine::delete(ctx, services, force, &mut confirm, out.as_mut())?;
    if outcome == DeleteOutcome::Deleted {
        output::debug(
            format!("removed '{}'", ctx.paths.instance_config_path(&ctx.machine_name).display()),
            ctx.verbosity,
        );
    }
    Ok(())
}
