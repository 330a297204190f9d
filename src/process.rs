//! Host command execution.
//!
//! Every host mutation funnels through [`HostRunner`]: one place decides
//! whether commands are prefixed with `sudo`, and a failure carries the
//! command line plus the tool's own diagnostics. Core logic stays pure and
//! testable by taking a runner parameter instead of shelling out itself.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Runs external commands synchronously, optionally through `sudo`.
#[derive(Debug, Clone, Copy)]
pub struct HostRunner {
    privileged: bool,
}

impl HostRunner {
    /// Runner that elevates every command with `sudo`.
    pub fn privileged() -> Self {
        Self { privileged: true }
    }

    /// Runner without privilege elevation, for tests and callers already
    /// running as root.
    pub fn direct() -> Self {
        Self { privileged: false }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd;
        if self.privileged {
            cmd = Command::new("sudo");
            cmd.arg(program);
        } else {
            cmd = Command::new(program);
        }
        cmd.args(args);
        cmd
    }

    /// Run a command with inherited stdio, failing on non-zero exit.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let status = self
            .command(program, args)
            .status()
            .with_context(|| format!("spawning '{}'", render(program, args)))?;
        if !status.success() {
            bail!("'{}' failed with {}", render(program, args), status);
        }
        Ok(())
    }

    /// Run a command from a specific working directory.
    pub fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<()> {
        let status = self
            .command(program, args)
            .current_dir(dir)
            .status()
            .with_context(|| {
                format!(
                    "spawning '{}' in '{}'",
                    render(program, args),
                    dir.display()
                )
            })?;
        if !status.success() {
            bail!(
                "'{}' failed in '{}' with {}",
                render(program, args),
                dir.display(),
                status
            );
        }
        Ok(())
    }

    /// Run a shell snippet. Only for steps that need shell expansion
    /// (globs); everything else goes through [`HostRunner::run`].
    pub fn shell(&self, script: &str) -> Result<()> {
        self.run("sh", &["-c", script])
    }

    /// Run a command and capture its stdout as UTF-8.
    pub fn capture(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self
            .command(program, args)
            .output()
            .with_context(|| format!("spawning '{}'", render(program, args)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "'{}' failed with {}: {}",
                render(program, args),
                output.status,
                stderr.trim()
            );
        }
        String::from_utf8(output.stdout)
            .with_context(|| format!("'{}' produced non-UTF-8 output", render(program, args)))
    }
}

fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Borrow a path as UTF-8 for command assembly.
pub fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("non-UTF-8 path '{}'", path.display()))
}

/// Fail with a description if a path does not exist.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        bail!("{} not found at: {}", what, path.display())
    }
}

/// Write `content` to the scratch directory, then move it into a
/// (typically privileged) destination directory via the runner.
///
/// Passing `owned_by_root` hands the file to root before the move, which
/// system directories like `/etc/schroot/chroot.d` require.
pub fn install_file(
    runner: &HostRunner,
    scratch_dir: &Path,
    file_name: &str,
    content: &str,
    dest_dir: &Path,
    owned_by_root: bool,
) -> Result<PathBuf> {
    let scratch = scratch_dir.join(file_name);
    fs::write(&scratch, content)
        .with_context(|| format!("writing scratch file '{}'", scratch.display()))?;
    if owned_by_root {
        runner.run("chown", &["root:root", path_arg(&scratch)?])?;
    }
    let dest = dest_dir.join(file_name);
    runner.run("mv", &[path_arg(&scratch)?, path_arg(&dest)?])?;
    Ok(dest)
}

/// Name of the user the provisioning run acts on behalf of.
///
/// Resolved once at the binary edge and threaded into the components that
/// need it; under sudo the original account is preferred over root.
pub fn invoking_user() -> Result<String> {
    for key in ["SUDO_USER", "USER", "LOGNAME"] {
        if let Ok(name) = std::env::var(key) {
            if !name.is_empty() {
                return Ok(name);
            }
        }
    }
    bail!("cannot determine invoking user; set USER or LOGNAME")
}
