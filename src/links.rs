//! Symlink relativization inside the chroot tree.
//!
//! debootstrap leaves shared-library symlinks pointing at absolute targets
//! such as `/lib/arm-linux-gnueabihf/libc.so.6`. The cross linker resolves
//! those on the host, outside the tree, so every eligible absolute link is
//! rewritten to an equivalent relative target and the tree stays
//! self-contained.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

use crate::process::{path_arg, HostRunner};

fn relink_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:\.so(?:\.\d+)?|\.a)$").expect("pattern compiles"))
}

/// Whether an entry name marks a shared-library or static-archive link:
/// `*.so`, `*.so.<digits>` (single numeric suffix segment), or `*.a`.
pub fn is_relink_candidate(name: &str) -> bool {
    relink_name_pattern().is_match(name)
}

/// Relative replacement for an absolute symlink target.
///
/// Resolving the result from the link's own directory reaches `target`
/// reinterpreted as relative to `root`: one `../` per component of the
/// link's root-relative parent directory, then the target with its leading
/// slash stripped.
pub fn relative_target(root: &Path, link: &Path, target: &Path) -> Result<String> {
    let rel = link.strip_prefix(root).with_context(|| {
        format!(
            "link '{}' is outside the tree '{}'",
            link.display(),
            root.display()
        )
    })?;
    let depth = rel
        .parent()
        .map(|parent| parent.components().count())
        .unwrap_or(0);
    let stripped = path_arg(target)?.trim_start_matches('/');
    Ok(format!("{}{}", "../".repeat(depth), stripped))
}

/// Eligible links under `scan_dir` whose targets are still absolute,
/// as (link location, current target) pairs.
///
/// Relative targets are already self-contained and are not reported, so a
/// fully fixed tree yields an empty list.
pub fn pending_relinks(scan_dir: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut pending = Vec::new();
    if !scan_dir.exists() {
        return Ok(pending);
    }
    for entry in WalkDir::new(scan_dir) {
        let entry = entry.with_context(|| format!("walking '{}'", scan_dir.display()))?;
        if !entry.path_is_symlink() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !is_relink_candidate(name) {
            continue;
        }
        let target = fs::read_link(entry.path())
            .with_context(|| format!("reading link target of '{}'", entry.path().display()))?;
        if !target.is_absolute() {
            continue;
        }
        pending.push((entry.path().to_path_buf(), target));
    }
    Ok(pending)
}

/// Rewrite every eligible absolute symlink under `scan_dir` in place.
///
/// Each link is replaced where it stands via `ln -sf` in its own
/// directory; a failed recreation aborts the pass. Returns the number of
/// rewritten links, which is zero on a second pass over the same tree.
pub fn fix_absolute_links(runner: &HostRunner, root: &Path, scan_dir: &Path) -> Result<usize> {
    let pending = pending_relinks(scan_dir)?;
    for (link, target) in &pending {
        let replacement = relative_target(root, link, target)?;
        let parent = link.parent().ok_or_else(|| {
            anyhow::anyhow!("link '{}' has no parent directory", link.display())
        })?;
        let name = link
            .file_name()
            .and_then(|part| part.to_str())
            .ok_or_else(|| anyhow::anyhow!("unusable link name '{}'", link.display()))?;
        println!(
            "  relink {} -> {} (was {})",
            link.display(),
            replacement,
            target.display()
        );
        runner.run_in(parent, "ln", &["-sf", &replacement, name])?;
    }
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn test_relink_candidate_names() {
        assert!(is_relink_candidate("libc.so"));
        assert!(is_relink_candidate("libc.so.6"));
        assert!(is_relink_candidate("libpthread.so.0"));
        assert!(is_relink_candidate("libm.a"));

        // Multi-segment version suffixes fall outside the pattern.
        assert!(!is_relink_candidate("libfoo.so.1.2"));
        assert!(!is_relink_candidate("crt1.o"));
        assert!(!is_relink_candidate("README"));
        assert!(!is_relink_candidate("libso"));
    }

    #[test]
    fn test_relative_target_depth_two() {
        let got = relative_target(
            Path::new("/var/chroot/tree"),
            Path::new("/var/chroot/tree/lib/arm-linux-gnueabihf/libc.so"),
            Path::new("/lib/arm-linux-gnueabihf/libc.so.6"),
        )
        .unwrap();
        assert_eq!(got, "../../lib/arm-linux-gnueabihf/libc.so.6");
    }

    #[test]
    fn test_relative_target_at_tree_root() {
        let got = relative_target(
            Path::new("/var/chroot/tree"),
            Path::new("/var/chroot/tree/libz.so"),
            Path::new("/lib/libz.so.1"),
        )
        .unwrap();
        assert_eq!(got, "lib/libz.so.1");
    }

    #[test]
    fn test_relative_target_rejects_link_outside_tree() {
        let result = relative_target(
            Path::new("/var/chroot/tree"),
            Path::new("/elsewhere/libz.so"),
            Path::new("/lib/libz.so.1"),
        );
        assert!(result.is_err());
    }

    fn tree_with_absolute_link() -> (TempDir, PathBuf, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        let libdir = root.join("lib/arm-linux-gnueabihf");
        fs::create_dir_all(&libdir).unwrap();

        let real = libdir.join("libc.so.6");
        fs::write(&real, b"shared object").unwrap();

        let link = libdir.join("libc.so");
        symlink("/lib/arm-linux-gnueabihf/libc.so.6", &link).unwrap();

        (temp, root, link, real)
    }

    #[test]
    fn test_fix_absolute_links_resolves_inside_tree() {
        let (_temp, root, link, real) = tree_with_absolute_link();

        let fixed =
            fix_absolute_links(&HostRunner::direct(), &root, &root.join("lib")).unwrap();
        assert_eq!(fixed, 1);

        let new_target = fs::read_link(&link).unwrap();
        assert_eq!(
            new_target,
            PathBuf::from("../../lib/arm-linux-gnueabihf/libc.so.6")
        );
        // The relative target reaches the identical file inside the tree.
        assert_eq!(
            fs::canonicalize(&link).unwrap(),
            fs::canonicalize(&real).unwrap()
        );
    }

    #[test]
    fn test_fix_absolute_links_second_pass_is_noop() {
        let (_temp, root, link, _real) = tree_with_absolute_link();
        let scan = root.join("lib");

        fix_absolute_links(&HostRunner::direct(), &root, &scan).unwrap();
        let before = fs::read_link(&link).unwrap();

        let fixed = fix_absolute_links(&HostRunner::direct(), &root, &scan).unwrap();
        assert_eq!(fixed, 0);
        assert_eq!(fs::read_link(&link).unwrap(), before);
    }

    #[test]
    fn test_fix_absolute_links_skips_other_names_and_relative_targets() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        let libdir = root.join("lib");
        fs::create_dir_all(&libdir).unwrap();

        // Absolute target but a non-library name.
        symlink("/etc/hostname", libdir.join("hostname")).unwrap();
        // Library name but already relative.
        fs::write(libdir.join("libm.so.6"), b"m").unwrap();
        symlink("libm.so.6", libdir.join("libm.so")).unwrap();

        let fixed = fix_absolute_links(&HostRunner::direct(), &root, &libdir).unwrap();
        assert_eq!(fixed, 0);
        assert_eq!(
            fs::read_link(libdir.join("hostname")).unwrap(),
            PathBuf::from("/etc/hostname")
        );
        assert_eq!(
            fs::read_link(libdir.join("libm.so")).unwrap(),
            PathBuf::from("libm.so.6")
        );
    }

    #[test]
    fn test_pending_relinks_empty_for_missing_directory() {
        let temp = TempDir::new().unwrap();
        let pending = pending_relinks(&temp.path().join("no-such-lib")).unwrap();
        assert!(pending.is_empty());
    }
}
