//! Foreign-architecture chroot bootstrap and registration.
//!
//! The tree is produced by a two-stage debootstrap: the first stage runs on
//! the host, then the QEMU user-mode emulator binaries are copied in so the
//! second stage (and every later in-chroot command) runs transparently under
//! binfmt emulation. The finished tree is registered as a named schroot so
//! commands can be run inside it.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::ProvisionConfig;
use crate::process::{ensure_exists, install_file, path_arg, HostRunner};

/// System directory schroot reads chroot definitions from.
pub const SCHROOT_CONFIG_DIR: &str = "/etc/schroot/chroot.d";

/// Whether the bootstrap had to run or the tree was already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChrootOutcome {
    AlreadyBootstrapped,
    Bootstrapped,
}

/// Marker checked before bootstrapping: a usable tree has a shell.
pub fn bootstrap_marker(config: &ProvisionConfig) -> PathBuf {
    config.root().join("bin/bash")
}

/// Install the target distribution's archive keyring if it is missing.
pub fn ensure_keyring(config: &ProvisionConfig, runner: &HostRunner) -> Result<()> {
    if config.chroot.keyring_path.is_file() {
        return Ok(());
    }
    let package = config.scratch_dir.join(config.keyring_package_file());
    runner.run(
        "wget",
        &["-O", path_arg(&package)?, &config.chroot.keyring_url],
    )?;
    runner.run("dpkg", &["-i", path_arg(&package)?])?;
    Ok(())
}

/// Run the two-stage debootstrap unless the tree already has a shell.
///
/// The marker check is a best-effort existence check; it does not validate
/// the content of a prior run.
pub fn bootstrap(config: &ProvisionConfig, runner: &HostRunner) -> Result<ChrootOutcome> {
    if bootstrap_marker(config).exists() {
        return Ok(ChrootOutcome::AlreadyBootstrapped);
    }

    let root = path_arg(config.root())?;
    let keyring_flag = format!("--keyring={}", config.chroot.keyring_path.display());
    runner.run(
        "debootstrap",
        &[
            "--arch",
            &config.chroot.arch,
            "--foreign",
            &keyring_flag,
            &config.chroot.suite,
            root,
            &config.chroot.mirror,
        ],
    )?;
    runner.shell(&format!("cp {} {}/usr/bin", config.chroot.qemu_glob, root))?;
    runner.run("chroot", &[root, "/debootstrap/debootstrap", "--second-stage"])?;

    ensure_exists(&bootstrap_marker(config), "chroot shell after second stage")?;
    Ok(ChrootOutcome::Bootstrapped)
}

/// Render the schroot definition for the tree, granting the invoking user
/// session and root-group access.
pub fn render_session_record(config: &ProvisionConfig, user: &str) -> String {
    format!(
        "[{name}]\n\
         description={description}\n\
         type=directory\n\
         directory={directory}\n\
         users={user}\n\
         root-groups=root,{user}\n",
        name = config.chroot.name,
        description = config.chroot.description,
        directory = config.root().display(),
        user = user,
    )
}

/// Install the schroot definition, overwriting any previous one.
pub fn register_session(
    config: &ProvisionConfig,
    runner: &HostRunner,
    user: &str,
) -> Result<()> {
    install_file(
        runner,
        &config.scratch_dir,
        &config.chroot.name,
        &render_session_record(config, user),
        Path::new(SCHROOT_CONFIG_DIR),
        true,
    )?;
    Ok(())
}

/// Install the configured build packages inside the chroot.
pub fn install_build_packages(config: &ProvisionConfig, runner: &HostRunner) -> Result<()> {
    let name = config.chroot.name.as_str();
    runner.run("schroot", &["-c", name, "--", "apt-get", "update"])?;

    let mut args = vec!["-c", name, "--", "apt-get", "install", "-y"];
    args.extend(config.target.chroot_packages.iter().map(String::as_str));
    runner.run("schroot", &args)?;
    Ok(())
}

/// Bring the chroot fully up: keyring, bootstrap, registration, packages.
///
/// Only the keyring and the bootstrap are marker-guarded; registration and
/// the package install re-apply on every run.
pub fn ensure(config: &ProvisionConfig, runner: &HostRunner, user: &str) -> Result<ChrootOutcome> {
    ensure_keyring(config, runner)?;
    let outcome = bootstrap(config, runner)?;
    register_session(config, runner, user)?;
    install_build_packages(config, runner)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_render_session_record_grants_invoking_user() {
        let record = render_session_record(&ProvisionConfig::default(), "alice");
        assert_eq!(
            record,
            "[raspbian_buster_armhf]\n\
             description=Raspbian Buster armhf chroot\n\
             type=directory\n\
             directory=/var/chroot/raspbian_buster_armhf\n\
             users=alice\n\
             root-groups=root,alice\n"
        );
    }

    #[test]
    fn test_bootstrap_marker_is_tree_shell() {
        let config = ProvisionConfig::default();
        assert_eq!(
            bootstrap_marker(&config),
            PathBuf::from("/var/chroot/raspbian_buster_armhf/bin/bash")
        );
    }

    #[test]
    fn test_ensure_keyring_skips_when_present() {
        let temp = TempDir::new().unwrap();
        let keyring = temp.path().join("archive-keyring.gpg");
        fs::write(&keyring, b"gpg").unwrap();

        let mut config = ProvisionConfig::default();
        config.chroot.keyring_path = keyring;

        // With the keyring in place nothing is downloaded, so the direct
        // runner never executes wget and the call succeeds offline.
        ensure_keyring(&config, &HostRunner::direct()).unwrap();
    }

    #[test]
    fn test_bootstrap_short_circuits_on_marker() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/bash"), b"#!").unwrap();

        let mut config = ProvisionConfig::default();
        config.chroot.directory = root;

        let outcome = bootstrap(&config, &HostRunner::direct()).unwrap();
        assert_eq!(outcome, ChrootOutcome::AlreadyBootstrapped);
    }
}
