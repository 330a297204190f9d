//! CMake toolchain descriptor emission.
//!
//! The descriptor tells downstream builds which compilers, flags, and
//! sysroot to use. Programs are located on the host (the cross binaries
//! live there); libraries, headers, and packages resolve only inside the
//! sysroot.

use anyhow::Result;

use crate::config::ProvisionConfig;
use crate::process::{install_file, HostRunner};

/// Render the toolchain descriptor text.
///
/// A pure function of the configuration: the same tree and compiler paths
/// produce byte-identical output.
pub fn render(config: &ProvisionConfig) -> String {
    let flags = config.compiler_flags();
    format!(
        "set(CMAKE_SYSTEM_NAME Linux)\n\
         set(CMAKE_SYSTEM_PROCESSOR {processor})\n\
         \n\
         set(CMAKE_SYSROOT {root})\n\
         \n\
         set(CMAKE_C_COMPILER {cc})\n\
         set(CMAKE_CXX_COMPILER {cxx})\n\
         set(CMAKE_C_FLAGS \"{flags}\")\n\
         set(CMAKE_CXX_FLAGS \"{flags}\")\n\
         \n\
         set(CMAKE_FIND_ROOT_PATH_MODE_PROGRAM NEVER)\n\
         set(CMAKE_FIND_ROOT_PATH_MODE_LIBRARY ONLY)\n\
         set(CMAKE_FIND_ROOT_PATH_MODE_INCLUDE ONLY)\n\
         set(CMAKE_FIND_ROOT_PATH_MODE_PACKAGE ONLY)\n",
        processor = config.target.processor,
        root = config.root().display(),
        cc = config.target.c_compiler.display(),
        cxx = config.target.cxx_compiler.display(),
        flags = flags,
    )
}

/// Write the descriptor to its configured location, overwriting any
/// previous run's output.
pub fn write_descriptor(config: &ProvisionConfig, runner: &HostRunner) -> Result<()> {
    let file_name = format!("{}.cmake", config.output.profile);
    install_file(
        runner,
        &config.scratch_dir,
        &file_name,
        &render(config),
        &config.output.directory,
        false,
    )?;
    Ok(())
}
