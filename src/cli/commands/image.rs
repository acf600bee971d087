//! image command - Manage the local container image cache

use std::sync::Arc;

use crate::core::value::Value;
use crate::driver::VmStatus;
use crate::engine::{Context, Services};
use crate::image::{
    normalize_all, ContainerRuntime, ImageCache, ImageCacheConfig, ImageStore, MissStrategy,
};
use crate::ui::output;
use anyhow::{bail, Context as _, Result};
use tracing::info;

const CACHE_IMAGES: &str = "cache-images";

fn store(ctx: &Context) -> ImageStore {
    ImageStore::new(ctx.paths.image_cache_root().join("images"))
}

/// `cache-images` from the global config.
fn configured_images(ctx: &Context) -> Result<Vec<String>> {
    let global = ctx.global_store().context("Failed to open the global config")?;
    Ok(global
        .get(CACHE_IMAGES)
        .and_then(Value::as_list)
        .map(<[String]>::to_vec)
        .unwrap_or_default())
}

/// The container runtime of a running VM.
fn running_runtime(ctx: &Context, services: &Services) -> Result<Arc<dyn ContainerRuntime>> {
    if services.driver.status(&ctx.machine_name)? != VmStatus::Running {
        bail!("The '{}' VM is not running.", ctx.machine_name);
    }
    Ok(services.runtime_for(&ctx.machine_name)?)
}

/// Print every cached image, sorted.
pub fn list(ctx: &Context) -> Result<()> {
    for name in store(ctx).list()? {
        println!("{}", name);
    }
    Ok(())
}

/// Load cached images into the VM.
///
/// With no names, imports the configured `cache-images`; `all` imports
/// everything in the cache.
pub fn import(ctx: &Context, services: &Services, names: &[String], all: bool) -> Result<()> {
    let cache = ImageCache::new(&ctx.paths.image_cache_root(), running_runtime(ctx, services)?);
    let images = if all {
        cache.cached_images()?.into_iter().collect()
    } else if names.is_empty() {
        configured_images(ctx)?
    } else {
        names.to_vec()
    };
    if images.is_empty() {
        output::print("No images to import.", ctx.verbosity);
        return Ok(());
    }

    let imported = cache.import_images(&ImageCacheConfig::new(images, MissStrategy::Skip))?;
    for name in &imported {
        output::print(format!("Imported {}", name), ctx.verbosity);
    }
    Ok(())
}

/// Save images from the VM into the cache, pulling ones it lacks.
///
/// With no names, exports the configured `cache-images`; `all` exports
/// every image the VM has.
pub fn export(ctx: &Context, services: &Services, names: &[String], all: bool) -> Result<()> {
    let runtime = running_runtime(ctx, services)?;
    let images = if all {
        runtime.images()?.into_iter().collect()
    } else if names.is_empty() {
        configured_images(ctx)?
    } else {
        names.to_vec()
    };
    if images.is_empty() {
        output::print("No images to export.", ctx.verbosity);
        return Ok(());
    }

    info!(count = images.len(), "exporting images");
    let cache = ImageCache::new(&ctx.paths.image_cache_root(), runtime);
    let exported = cache.export_images(&ImageCacheConfig::new(images, MissStrategy::Pull))?;
    for name in &exported {
        output::print(format!("Exported {}", name), ctx.verbosity);
    }
    info!(count = exported.len(), "export finished");
    Ok(())
}

/// Remove images from the cache and from `cache-images`.
pub fn delete(ctx: &Context, names: &[String]) -> Result<()> {
    let targets = normalize_all(names)?;
    let removed = store(ctx).prune(&targets)?;
    for name in &removed {
        output::print(format!("Deleted {}", name), ctx.verbosity);
    }

    let configured = configured_images(ctx)?;
    let normalized = normalize_all(&configured)?;
    let remaining: Vec<String> = configured
        .into_iter()
        .zip(normalized)
        .filter(|(_, normal)| !targets.contains(normal))
        .map(|(raw, _)| raw)
        .collect();

    let mut global = ctx.global_store().context("Failed to open the global config")?;
    if remaining.is_empty() {
        if global.contains(CACHE_IMAGES) {
            global.unset(CACHE_IMAGES)?;
        }
    } else {
        global.set(CACHE_IMAGES, &remaining.join(","), &ctx.setting_context())?;
    }
    Ok(())
}
