//! Compiler driver specs rewriting.
//!
//! The text dumped by `gcc -dumpspecs` controls how the driver invokes its
//! subtools. Two token classes are rewritten so an unmodified driver links
//! against the chroot instead of the host: the `%D` search-directory
//! placeholder, and bare startup object filenames such as `crt1.o` whose
//! default resolution would otherwise pick the wrong architecture variant.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

use crate::config::ProvisionConfig;
use crate::process::{install_file, path_arg, HostRunner};

/// Placeholder the driver expands to its default `-L` directory list.
pub const SEARCH_DIR_PLACEHOLDER: &str = "%D";

fn object_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\w+\.o").expect("pattern compiles"))
}

/// Filename-to-path index of every `.o` file under a tree root.
///
/// Each name maps to the lexicographically smallest absolute path carrying
/// it, so resolution never depends on directory iteration order.
#[derive(Debug, Default)]
pub struct ObjectIndex {
    by_name: BTreeMap<String, PathBuf>,
}

impl ObjectIndex {
    /// Build the index with a single recursive scan.
    pub fn scan(root: &Path) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        for entry in WalkDir::new(root) {
            let entry = entry
                .with_context(|| format!("scanning '{}' for object files", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if !name.ends_with(".o") {
                continue;
            }
            let path = entry.path().to_path_buf();
            match by_name.entry(name.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(path);
                }
                Entry::Occupied(mut slot) => {
                    if path < *slot.get() {
                        slot.insert(path);
                    }
                }
            }
        }
        Ok(Self { by_name })
    }

    pub fn resolve(&self, name: &str) -> Option<&Path> {
        self.by_name.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Replace the `%D` placeholder with a prebuilt `-L` flag string.
///
/// Once no placeholder remains the call is a no-op, so re-running over
/// already substituted text changes nothing.
pub fn substitute_search_paths(specs: &str, search_flags: &str) -> String {
    specs.replace(SEARCH_DIR_PLACEHOLDER, search_flags)
}

/// Resolve bare object filenames to absolute paths inside the tree.
///
/// Tokens absent from the index stay verbatim; the driver's default
/// resolution is left to succeed or fail at link time.
pub fn resolve_startup_objects(specs: &str, index: &ObjectIndex) -> String {
    object_token_pattern()
        .replace_all(specs, |caps: &Captures| match index.resolve(&caps[0]) {
            Some(path) => path.display().to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Full rewrite: search-path substitution, then object resolution.
pub fn rewrite(specs: &str, search_flags: &str, index: &ObjectIndex) -> String {
    resolve_startup_objects(&substitute_search_paths(specs, search_flags), index)
}

/// Dump the driver's default specs, rewrite them against the tree, and
/// install the result at the configured specs path.
pub fn write_specs(config: &ProvisionConfig, runner: &HostRunner) -> Result<()> {
    let cxx = path_arg(&config.target.cxx_compiler)?;
    let specs = runner.capture(cxx, &["-dumpspecs"])?;

    let index = ObjectIndex::scan(config.root())?;
    let resolved = object_token_pattern()
        .find_iter(&specs)
        .filter(|token| index.resolve(token.as_str()).is_some())
        .count();
    println!("  specs: resolving {} startup object reference(s)", resolved);

    let rewritten = rewrite(&specs, &config.linker_search_flags(), &index);
    let file_name = format!("{}-specs.txt", config.output.profile);
    install_file(
        runner,
        &config.scratch_dir,
        &file_name,
        &rewritten,
        &config.output.directory,
        false,
    )?;
    Ok(())
}
