//! config command - Get, set, unset, or view persisted settings
//!
//! Every subcommand works on the global Value Store.

use crate::engine::Context;
use crate::ui::output;
use anyhow::{Context as _, Result};

/// Placeholders honoured by `config view --format`.
const VIEW_PLACEHOLDER_KEY: &str = "{{.ConfigKey}}";
const VIEW_PLACEHOLDER_VALUE: &str = "{{.ConfigValue}}";

/// Print the persisted value of a setting, or nothing.
pub fn get(ctx: &Context, name: &str) -> Result<()> {
    ctx.registry.find(name)?;
    let store = ctx.global_store().context("Failed to open the global config")?;
    if let Some(value) = store.get(name) {
        println!("{}", value);
    }
    Ok(())
}

/// Validate and persist a setting, then print what its callbacks said.
pub fn set(ctx: &Context, name: &str, value: &str) -> Result<()> {
    let mut store = ctx.global_store().context("Failed to open the global config")?;
    let messages = store.set(name, value, &ctx.setting_context())?;
    for message in messages {
        output::print(message, ctx.verbosity);
    }
    Ok(())
}

/// Remove a persisted setting. Unsetting an absent setting is fine.
pub fn unset(ctx: &Context, name: &str) -> Result<()> {
    ctx.registry.find(name)?;
    let mut store = ctx.global_store().context("Failed to open the global config")?;
    store.unset(name)?;
    Ok(())
}

/// Print every persisted apply setting, sorted by name.
pub fn view(ctx: &Context, format: Option<&str>) -> Result<()> {
    let store = ctx.global_store().context("Failed to open the global config")?;
    let mut entries: Vec<(String, String)> = store
        .iterate()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    entries.sort();

    for (name, value) in entries {
        println!("{}", render_view_line(format, &name, &value));
    }
    Ok(())
}

/// One `config view` line.
pub fn render_view_line(format: Option<&str>, name: &str, value: &str) -> String {
    match format {
        Some(template) => template
            .replace(VIEW_PLACEHOLDER_KEY, name)
            .replace(VIEW_PLACEHOLDER_VALUE, value),
        None => format!("- {:<21}: {}", name, value),
    }
}
