//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Opens what it needs from the [`Context`] (stores, caches, services)
//! 2. Calls into the engine or a cache module
//! 3. Formats and displays output
//!
//! Handlers that touch the VM build [`engine::Services::system`]; the
//! config commands never do, so they work with no hypervisor installed.

mod config_cmd;
mod delete;
mod image;
mod start;
mod stop;

// Re-export command functions for testing and direct invocation
pub use config_cmd::{
    get as config_get, set as config_set, unset as config_unset, view as config_view,
};
pub use delete::delete;
pub use image::{
    delete as image_delete, export as image_export, import as image_import, list as image_list,
};
pub use start::start;
pub use stop::stop;

use crate::cli::args::{Command, ConfigAction, ImageAction};
use crate::engine::{self, Context};
use anyhow::Result;

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<()> {
    match command {
        Command::Start(args) => start(ctx, &engine::Services::system(ctx), &args),
        Command::Stop => stop(ctx, &engine::Services::system(ctx)),
        Command::Delete { force } => delete(ctx, &engine::Services::system(ctx), force),

        Command::Config { action } => match action {
            ConfigAction::Get { name } => config_get(ctx, &name),
            ConfigAction::Set { name, value } => config_set(ctx, &name, &value),
            ConfigAction::Unset { name } => config_unset(ctx, &name),
            ConfigAction::View { format } => config_view(ctx, format.as_deref()),
        },

        Command::Image { action } => match action {
            ImageAction::List => image_list(ctx),
            ImageAction::Import { names, all } => {
                image_import(ctx, &engine::Services::system(ctx), &names, all)
            }
            ImageAction::Export { names, all, .. } => {
                image_export(ctx, &engine::Services::system(ctx), &names, all)
            }
            ImageAction::Delete { names } => image_delete(ctx, &names),
        },
    }
}
