//! Infrastructure for provisioning emulated cross-compilation toolchains.
//!
//! Turns a Debian host into a cross-build environment for a foreign
//! architecture:
//!
//! - **Host setup** - vendor cross compilers and chroot tooling via apt
//! - **Chroot bootstrap** - two-stage debootstrap under QEMU user-mode
//!   emulation, registered as a named schroot
//! - **Specs rewriting** - the compiler driver's library search paths and
//!   startup objects redirected into the chroot
//! - **Symlink fixup** - absolute library links inside the tree made
//!   relative so it stays self-contained
//! - **Descriptor emission** - a CMake toolchain file for downstream builds
//!
//! # Architecture
//!
//! ```text
//! provision (orchestrator)
//!     │
//!     ├── preflight  - host tool validation before any stage runs
//!     ├── chroot     - debootstrap + schroot registration
//!     ├── specs      - %D substitution and crt*.o resolution
//!     ├── links      - symlink classification and relativization
//!     └── descriptor - CMake toolchain file
//!
//! process (HostRunner) carries every host mutation; config supplies the
//! tree root, compiler paths, and output locations to each component.
//! ```
//!
//! Execution is single-threaded and strictly sequential; each external
//! command blocks the run until it exits.

pub mod chroot;
pub mod config;
pub mod descriptor;
pub mod links;
pub mod preflight;
pub mod process;
pub mod provision;
pub mod specs;

pub use config::ProvisionConfig;
pub use process::HostRunner;
pub use provision::{run, Stage, StageStatus};
