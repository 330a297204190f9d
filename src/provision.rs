//! Stage sequencing for a provisioning run.
//!
//! Six forward-only stages, each safe to re-run: the marker-guarded stages
//! skip completed work, the rest overwrite deterministically. The first
//! failing stage aborts the run with no rollback; a re-invocation starts
//! from the top and the markers skip what already finished.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::chroot::{self, ChrootOutcome};
use crate::config::ProvisionConfig;
use crate::descriptor;
use crate::links;
use crate::process::{path_arg, HostRunner};
use crate::specs;

const RUN_REPORT_FILENAME: &str = "toolchain-builder-run.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HostDeps,
    Directories,
    Chroot,
    Descriptor,
    Specs,
    Symlinks,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::HostDeps,
        Stage::Directories,
        Stage::Chroot,
        Stage::Descriptor,
        Stage::Specs,
        Stage::Symlinks,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Stage::HostDeps => "host-deps",
            Stage::Directories => "directories",
            Stage::Chroot => "chroot",
            Stage::Descriptor => "descriptor",
            Stage::Specs => "specs",
            Stage::Symlinks => "symlinks",
        }
    }

    /// Recompute the stage's status from its observable markers, without
    /// side effects.
    pub fn status(self, config: &ProvisionConfig) -> Result<StageStatus> {
        match self {
            Stage::Chroot => Ok(if chroot::bootstrap_marker(config).exists() {
                StageStatus::Applied
            } else {
                StageStatus::Pending
            }),
            Stage::Symlinks => {
                let pending = links::pending_relinks(&config.root().join("lib"))?;
                Ok(if config.root().exists() && pending.is_empty() {
                    StageStatus::Applied
                } else {
                    StageStatus::Pending
                })
            }
            _ => Ok(StageStatus::Reapplied),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Marker present; the privileged work will be skipped.
    Applied,
    /// Marker absent; the stage will perform its work.
    Pending,
    /// No marker; the stage overwrites deterministically every run.
    Reapplied,
}

impl StageStatus {
    pub fn label(self) -> &'static str {
        match self {
            StageStatus::Applied => "applied",
            StageStatus::Pending => "pending",
            StageStatus::Reapplied => "reapplied each run",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StageOutcome {
    pub stage: &'static str,
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at_utc: String,
    pub finished_at_utc: String,
    pub stages: Vec<StageOutcome>,
}

fn utc_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Run every stage in order against the configuration.
///
/// Strictly sequential; each external command blocks the run until it
/// exits. The report of stage outcomes is also written as JSON into the
/// scratch directory.
pub fn run(config: &ProvisionConfig, runner: &HostRunner, user: &str) -> Result<RunReport> {
    let started_at_utc = utc_now();
    let mut stages = Vec::new();

    for stage in Stage::ALL {
        let action = apply_stage(stage, config, runner, user)
            .with_context(|| format!("stage '{}' failed", stage.slug()))?;
        println!("[provision:{}] {}", stage.slug(), action);
        stages.push(StageOutcome {
            stage: stage.slug(),
            action,
        });
    }

    let report = RunReport {
        started_at_utc,
        finished_at_utc: utc_now(),
        stages,
    };
    let report_path = write_run_report(config, &report)?;
    println!("[provision] run report at {}", report_path.display());
    Ok(report)
}

fn apply_stage(
    stage: Stage,
    config: &ProvisionConfig,
    runner: &HostRunner,
    user: &str,
) -> Result<String> {
    match stage {
        Stage::HostDeps => {
            runner.run("apt-get", &["update"])?;
            let mut args = vec!["install", "-y"];
            args.extend(config.host_packages.iter().map(String::as_str));
            runner.run("apt-get", &args)?;
            Ok(format!(
                "installed {} host package(s)",
                config.host_packages.len()
            ))
        }
        Stage::Directories => {
            let chroot_parent = config
                .root()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| config.root().to_path_buf());
            runner.run(
                "mkdir",
                &[
                    "-p",
                    path_arg(&config.output.directory)?,
                    path_arg(&chroot_parent)?,
                ],
            )?;
            Ok("output and chroot directories present".to_string())
        }
        Stage::Chroot => match chroot::ensure(config, runner, user)? {
            ChrootOutcome::AlreadyBootstrapped => {
                Ok("tree already bootstrapped; registration refreshed".to_string())
            }
            ChrootOutcome::Bootstrapped => Ok("tree bootstrapped and registered".to_string()),
        },
        Stage::Descriptor => {
            descriptor::write_descriptor(config, runner)?;
            Ok(format!("wrote {}", config.descriptor_path().display()))
        }
        Stage::Specs => {
            specs::write_specs(config, runner)?;
            Ok(format!("wrote {}", config.specs_path().display()))
        }
        Stage::Symlinks => {
            let count =
                links::fix_absolute_links(runner, config.root(), &config.root().join("lib"))?;
            Ok(format!("relativized {} link(s)", count))
        }
    }
}

fn write_run_report(config: &ProvisionConfig, report: &RunReport) -> Result<PathBuf> {
    let path = config.scratch_dir.join(RUN_REPORT_FILENAME);
    let json = serde_json::to_string_pretty(report).context("serializing run report")?;
    fs::write(&path, json)
        .with_context(|| format!("writing run report '{}'", path.display()))?;
    Ok(path)
}
