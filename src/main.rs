// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use bbmrd::backend::create_backend;
use bbmrd::config::{BackendKind, Config};
use bbmrd::logging::{Facility, Logger, Severity};
use bbmrd::mainloop;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to JSON5 configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Thread network interface name (overrides the config file).
    #[arg(long)]
    thread_ifname: Option<String>,

    /// Backbone network interface name (overrides the config file).
    #[arg(long)]
    backbone_ifname: Option<String>,

    /// Routing backend (overrides the config file).
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Minimum log severity (overrides the config file).
    #[arg(long)]
    log_level: Option<Severity>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(thread_ifname) = &args.thread_ifname {
        config.thread_interface = thread_ifname.clone();
    }
    if let Some(backbone_ifname) = &args.backbone_ifname {
        config.backbone_interface = backbone_ifname.clone();
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = Some(log_level);
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let logger = Logger::stderr(config.log_level.unwrap_or(Severity::Info));
    logger.info(
        Facility::Agent,
        &format!(
            "starting: thread={} backbone={} backend={:?}",
            config.thread_interface, config.backbone_interface, config.backend
        ),
    );

    let mut backend = create_backend(&config, &logger);
    mainloop::run(backend.as_mut(), &logger)
}
