//! stop command - Stop the VM

use crate::engine::{self, Context, Services};
use crate::ui::output;
use anyhow::Result;

/// Stop the VM. A missing or stopped VM is not an error.
pub fn stop(ctx: &Context, services: &Services) -> Result<()> {
    let mut out = output::stdout(ctx.verbosity);
    engine::stop(ctx, services, out.as_mut())?;
    Ok(())
}
