//! start command - Bring the cluster up

use crate::cli::args::StartArgs;
use crate::engine::{self, Context, Services, StartOptions};
use crate::ui::output;
use anyhow::Result;

/// Run the start pipeline with the given flags.
pub fn start(ctx: &Context, services: &Services, args: &StartArgs) -> Result<()> {
    let options = StartOptions {
        addon_env: args.addon_env(),
    };
    let mut out = output::stdout(ctx.verbosity);
    let mut err = std::io::stderr();
    let report = engine::start(
        ctx,
        services,
        &args.flag_set(),
        &options,
        out.as_mut(),
        &mut err,
    )?;

    if !report.applied_addons.is_empty() {
        output::debug(
            format!("applied addons: {}", report.applied_addons.join(", ")),
            ctx.verbosity,
        );
    }
    Ok(())
}
