use std::env;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use image_patcher::config::{CONFIG_ENV_VAR, PatchConfig};
use image_patcher::connhelper::get_connection_helper;
use image_patcher::image::{ImageResolver, is_index_media_type, platform_label};
use image_patcher::pkgmgr::{PackageManager, get_package_manager};

fn load_config() -> Result<PatchConfig> {
    match env::args().nth(1) {
        Some(path) => PatchConfig::from_file(&path).with_context(|| format!("loading config from {path}")),
        None => PatchConfig::from_env(CONFIG_ENV_VAR)
            .with_context(|| format!("no config path given and {CONFIG_ENV_VAR} is unusable")),
    }
}

async fn describe_image(config: &PatchConfig) -> Result<()> {
    let build = config.build();
    let resolver = ImageResolver::from_env().context("setting up image resolver")?;

    let descriptor = resolver
        .image_descriptor(build.image(), build.runtime())
        .await
        .with_context(|| format!("resolving {}", build.image()))?;
    info!(
        image = build.image(),
        media_type = %descriptor.media_type(),
        digest = %descriptor.digest(),
        "resolved source image"
    );

    if let Some(platform) = build.platform() {
        if is_index_media_type(&descriptor.media_type().to_string()) {
            let label = platform_label(platform);
            match resolver.platform_manifest_annotations(build.image(), Some(platform)).await {
                Ok(annotations) => info!(platform = %label, count = annotations.len(), "platform manifest annotations"),
                Err(err) => warn!(platform = %label, error = %err, "could not read platform annotations"),
            }
        }
    }
    Ok(())
}

fn check_builder(config: &PatchConfig) -> Result<()> {
    let Some(addr) = config.build().buildkit_addr() else {
        return Ok(());
    };
    match get_connection_helper(addr).with_context(|| format!("parsing builder address {addr}"))? {
        Some(_) => info!(addr, "builder reached through connection helper"),
        None => info!(addr, "builder dialed directly"),
    }
    Ok(())
}

fn plan(manager: &dyn PackageManager, config: &PatchConfig) -> Result<()> {
    let created = manager.prepare_staging()?;
    info!(
        staging = %manager.staging_dir().display(),
        created,
        package_type = %manager.package_type(),
        "staging directory ready"
    );

    let updates = manager.plan_updates(config.updates(), config.ignore_errors())?;
    let Some(validated) = manager.validate_staged(&updates)? else {
        info!(requested = updates.len(), "no artifacts staged yet");
        return Ok(());
    };

    for update in &updates {
        match validated.get(&update.name).filter(|u| u.has_artifact()) {
            Some(info) => info!(package = %update.name, version = %info.version, artifact = %info.filename, "ready"),
            None => warn!(package = %update.name, version = %update.fixed_version, "no staged artifact"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    describe_image(&config).await?;
    check_builder(&config)?;

    let manager = get_package_manager(
        config.os_type(),
        config.os_version(),
        config.build(),
        config.working_folder(),
    )?;
    plan(manager.as_ref(), &config)
}
