//! engine::lifecycle
//!
//! Stopping and deleting the machine.

use std::io::Write;

use tracing::info;

use crate::driver::VmStatus;
use crate::ui::prompts::PromptError;

use super::{Context, EngineError, Services};

/// What `stop` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
    NotDefined,
}

/// What `delete` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The user declined the confirmation prompt.
    Declined,
    NotDefined,
}

/// Stop the machine if it is running.
pub fn stop(
    ctx: &Context,
    services: &Services,
    out: &mut dyn Write,
) -> Result<StopOutcome, EngineError> {
    let machine = &ctx.machine_name;
    match services.driver.status(machine)? {
        VmStatus::DoesNotExist => {
            writeln!(out, "There is currently no '{}' VM defined.", machine)?;
            Ok(StopOutcome::NotDefined)
        }
        VmStatus::Stopped => {
            writeln!(out, "The '{}' VM is already stopped.", machine)?;
            Ok(StopOutcome::AlreadyStopped)
        }
        _ => {
            write!(out, "Stopping the '{}' VM ... ", machine)?;
            out.flush()?;
            if let Err(e) = services.driver.stop(machine) {
                writeln!(out, "FAIL")?;
                return Err(e.into());
            }
            writeln!(out, "OK")?;
            info!(machine = %machine, "VM stopped");
            Ok(StopOutcome::Stopped)
        }
    }
}

/// Delete the machine and its per-instance state.
///
/// A registered instance asks `confirm` first, unless `force` is set or the
/// session is not interactive.
pub fn delete(
    ctx: &Context,
    services: &Services,
    force: bool,
    confirm: &mut dyn FnMut(&str) -> Result<bool, PromptError>,
    out: &mut dyn Write,
) -> Result<DeleteOutcome, EngineError> {
    let machine = &ctx.machine_name;
    let instance = ctx.instance_file();

    if services.driver.status(machine)? == VmStatus::DoesNotExist {
        writeln!(out, "There is currently no '{}' VM defined.", machine)?;
        instance.delete()?;
        return Ok(DeleteOutcome::NotDefined);
    }

    let registered = instance.load().map(|s| s.is_register).unwrap_or(false);
    if registered && ctx.interactive && !force {
        let question = format!(
            "The '{}' VM is registered. Delete it without unregistering?",
            machine
        );
        if !confirm(&question)? {
            writeln!(out, "Deletion cancelled.")?;
            return Ok(DeleteOutcome::Declined);
        }
    }

    write!(out, "Deleting the '{}' VM ... ", machine)?;
    out.flush()?;
    if let Err(e) = services.driver.delete(machine) {
        writeln!(out, "FAIL")?;
        return Err(e.into());
    }
    writeln!(out, "OK")?;
    instance.delete()?;
    info!(machine = %machine, "VM deleted");
    Ok(DeleteOutcome::Deleted)
}
