use std::path::Path;

use anyhow::{bail, Result};
use toolchain_builder::config::ProvisionConfig;
use toolchain_builder::descriptor;
use toolchain_builder::preflight;
use toolchain_builder::process::{invoking_user, HostRunner};
use toolchain_builder::provision::{self, Stage};

fn usage() -> &'static str {
    "Usage:\n  toolchain-builder provision [config.toml]\n  toolchain-builder status [config.toml]\n  toolchain-builder render [config.toml]\n  toolchain-builder preflight"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd] if cmd == "provision" => provision_cmd(None),
        [cmd, cfg] if cmd == "provision" => provision_cmd(Some(Path::new(cfg))),
        [cmd] if cmd == "status" => status_cmd(None),
        [cmd, cfg] if cmd == "status" => status_cmd(Some(Path::new(cfg))),
        [cmd] if cmd == "render" => render_cmd(None),
        [cmd, cfg] if cmd == "render" => render_cmd(Some(Path::new(cfg))),
        [cmd] if cmd == "preflight" => preflight::check_host_tools(),
        _ => bail!(usage()),
    }
}

fn provision_cmd(config_path: Option<&Path>) -> Result<()> {
    let config = ProvisionConfig::load(config_path)?;
    let user = invoking_user()?;
    preflight::check_host_tools()?;

    let runner = HostRunner::privileged();
    provision::run(&config, &runner, &user)?;

    println!(
        "toolchain ready: descriptor at {}, specs at {}",
        config.descriptor_path().display(),
        config.specs_path().display()
    );
    println!(
        "run commands inside the tree with: schroot -c {} -- <command>",
        config.chroot.name
    );
    Ok(())
}

fn status_cmd(config_path: Option<&Path>) -> Result<()> {
    let config = ProvisionConfig::load(config_path)?;
    for stage in Stage::ALL {
        let status = stage.status(&config)?;
        println!("{:<12} {}", stage.slug(), status.label());
    }
    Ok(())
}

fn render_cmd(config_path: Option<&Path>) -> Result<()> {
    let config = ProvisionConfig::load(config_path)?;
    print!("{}", descriptor::render(&config));
    Ok(())
}
