//! Provisioning configuration.
//!
//! The defaults describe the reference toolchain: Debian's GCC 8
//! `arm-linux-gnueabihf` cross compilers against a Raspbian Buster armhf
//! chroot at `/var/chroot/raspbian_buster_armhf`, with outputs under
//! `/opt/toolchains`. Any field can be overridden from a TOML file; a run
//! without one uses the defaults verbatim.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    pub target: TargetConfig,
    pub chroot: ChrootConfig,
    pub output: OutputConfig,
    /// Host packages installed before any other stage runs.
    pub host_packages: Vec<String>,
    /// Where intermediate files land before being moved into place.
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetConfig {
    /// Target triplet, e.g. `arm-linux-gnueabihf`.
    pub triplet: String,
    /// CMake system processor name.
    pub processor: String,
    /// Cross-compiler major version; selects the GCC runtime directory.
    pub compiler_version: String,
    pub c_compiler: PathBuf,
    pub cxx_compiler: PathBuf,
    /// CPU/FPU/ABI selection flags.
    pub cpu_flags: Vec<String>,
    /// Preprocessor defines matching the target distribution's compiler.
    pub defines: Vec<String>,
    /// Build packages installed inside the chroot.
    pub chroot_packages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChrootConfig {
    /// schroot session name.
    pub name: String,
    pub description: String,
    /// The tree acting as the target filesystem root.
    pub directory: PathBuf,
    /// debootstrap suite.
    pub suite: String,
    /// debootstrap architecture.
    pub arch: String,
    pub mirror: String,
    /// Archive keyring package fetched when the keyring is missing.
    pub keyring_url: String,
    /// Where the keyring lands once its package is installed.
    pub keyring_path: PathBuf,
    /// Glob for the QEMU user-mode emulator binaries copied into the tree.
    pub qemu_glob: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Toolchain output directory.
    pub directory: PathBuf,
    /// Basename for the descriptor and specs files.
    pub profile: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            chroot: ChrootConfig::default(),
            output: OutputConfig::default(),
            host_packages: strings(&[
                "gcc-8-arm-linux-gnueabihf",
                "g++-8-arm-linux-gnueabihf",
                "cmake",
                "build-essential",
                "qemu-user-static",
                "binfmt-support",
                "debootstrap",
                "schroot",
            ]),
            scratch_dir: PathBuf::from("/tmp"),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            triplet: "arm-linux-gnueabihf".to_string(),
            processor: "arm".to_string(),
            compiler_version: "8".to_string(),
            c_compiler: PathBuf::from("/usr/bin/arm-linux-gnueabihf-gcc-8"),
            cxx_compiler: PathBuf::from("/usr/bin/arm-linux-gnueabihf-g++-8"),
            cpu_flags: strings(&[
                "-mcpu=arm1176jzf-s",
                "-mtune=arm1176jzf-s",
                "-march=armv6",
                "-mfpu=vfp",
                "-mfloat-abi=hard",
                "-marm",
            ]),
            defines: strings(&[
                "__GCC_HAVE_SYNC_COMPARE_AND_SWAP_1",
                "__GCC_HAVE_SYNC_COMPARE_AND_SWAP_2",
                "__GCC_HAVE_SYNC_COMPARE_AND_SWAP_8",
                "__ARM_FEATURE_LDREX=4",
                "__GCC_ATOMIC_BOOL_LOCK_FREE=1",
                "__GCC_ATOMIC_CHAR_LOCK_FREE=1",
                "__GCC_ATOMIC_CHAR16_T_LOCK_FREE=1",
                "__GCC_ATOMIC_LLONG_LOCK_FREE=1",
                "__GCC_ATOMIC_SHORT_LOCK_FREE=1",
                "__pic__",
                "__PIC__",
                "__pie__",
                "__PIE__",
            ]),
            chroot_packages: strings(&["build-essential", "g++", "gcc", "cmake"]),
        }
    }
}

impl Default for ChrootConfig {
    fn default() -> Self {
        Self {
            name: "raspbian_buster_armhf".to_string(),
            description: "Raspbian Buster armhf chroot".to_string(),
            directory: PathBuf::from("/var/chroot/raspbian_buster_armhf"),
            suite: "buster".to_string(),
            arch: "armhf".to_string(),
            mirror: "http://ftp.acc.umu.se/mirror/raspbian/raspbian/".to_string(),
            keyring_url: "http://archive.raspbian.org/raspbian/pool/main/r/raspbian-archive-keyring/raspbian-archive-keyring_20120528.2_all.deb".to_string(),
            keyring_path: PathBuf::from("/usr/share/keyrings/raspbian-archive-keyring.gpg"),
            qemu_glob: "/usr/bin/qemu-arm*".to_string(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/opt/toolchains"),
            profile: "gcc-8-armv6".to_string(),
        }
    }
}

impl ProvisionConfig {
    /// Load a configuration file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let parsed: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config '{}'", path.display()))?;
        Ok(parsed)
    }

    /// The tree acting as the cross compiler's filesystem root.
    pub fn root(&self) -> &Path {
        &self.chroot.directory
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.output
            .directory
            .join(format!("{}.cmake", self.output.profile))
    }

    pub fn specs_path(&self) -> PathBuf {
        self.output
            .directory
            .join(format!("{}-specs.txt", self.output.profile))
    }

    /// The `-L` flags substituted for the driver's default search
    /// directories: bare lib, the architecture-qualified lib, both usr/lib
    /// variants, and the GCC runtime directory, all under the tree root.
    pub fn linker_search_flags(&self) -> String {
        let root = self.chroot.directory.display();
        let triplet = &self.target.triplet;
        let dirs = [
            format!("{root}/lib"),
            format!("{root}/lib/{triplet}"),
            format!("{root}/usr/lib"),
            format!("{root}/usr/lib/{triplet}"),
            format!(
                "{root}/usr/lib/gcc/{triplet}/{}",
                self.target.compiler_version
            ),
        ];
        dirs.iter()
            .map(|dir| format!("-L{dir}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The flags string shared by CMAKE_C_FLAGS and CMAKE_CXX_FLAGS.
    pub fn compiler_flags(&self) -> String {
        let root = self.chroot.directory.display();
        let mut parts = self.target.cpu_flags.clone();
        parts.push(format!("-isystem={root}"));
        parts.extend(self.target.defines.iter().map(|d| format!("-D{d}")));
        parts.push(format!("-Wl,--sysroot={root}"));
        parts.push(format!("-specs={}", self.specs_path().display()));
        parts.join(" ")
    }

    /// Filename of the keyring package named by `keyring_url`.
    pub fn keyring_package_file(&self) -> &str {
        self.chroot
            .keyring_url
            .rsplit('/')
            .next()
            .unwrap_or("archive-keyring.deb")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_paths() {
        let config = ProvisionConfig::default();
        assert_eq!(
            config.descriptor_path(),
            PathBuf::from("/opt/toolchains/gcc-8-armv6.cmake")
        );
        assert_eq!(
            config.specs_path(),
            PathBuf::from("/opt/toolchains/gcc-8-armv6-specs.txt")
        );
    }

    #[test]
    fn test_linker_search_flags_cover_five_directories() {
        let config = ProvisionConfig::default();
        let flags = config.linker_search_flags();
        assert_eq!(flags.matches("-L").count(), 5);
        assert!(flags.contains("-L/var/chroot/raspbian_buster_armhf/lib "));
        assert!(flags.contains("-L/var/chroot/raspbian_buster_armhf/lib/arm-linux-gnueabihf"));
        assert!(flags.contains("-L/var/chroot/raspbian_buster_armhf/usr/lib "));
        assert!(flags.contains("-L/var/chroot/raspbian_buster_armhf/usr/lib/arm-linux-gnueabihf"));
        assert!(flags.ends_with("/usr/lib/gcc/arm-linux-gnueabihf/8"));
    }

    #[test]
    fn test_compiler_flags_reference_sysroot_and_specs() {
        let config = ProvisionConfig::default();
        let flags = config.compiler_flags();
        assert!(flags.starts_with("-mcpu=arm1176jzf-s"));
        assert!(flags.contains("-isystem=/var/chroot/raspbian_buster_armhf"));
        assert!(flags.contains("-D__ARM_FEATURE_LDREX=4"));
        assert!(flags.contains("-Wl,--sysroot=/var/chroot/raspbian_buster_armhf"));
        assert!(flags.ends_with("-specs=/opt/toolchains/gcc-8-armv6-specs.txt"));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = ProvisionConfig::load(None).unwrap();
        assert_eq!(config.chroot.name, "raspbian_buster_armhf");
        assert_eq!(config.host_packages.len(), 8);
    }

    #[test]
    fn test_toml_overrides_merge_with_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("toolchain.toml");
        fs::write(
            &path,
            "[chroot]\n\
             name = \"bookworm_arm64\"\n\
             directory = \"/var/chroot/bookworm_arm64\"\n\
             suite = \"bookworm\"\n\
             arch = \"arm64\"\n\
             \n\
             [output]\n\
             profile = \"gcc-12-armv8\"\n",
        )
        .unwrap();

        let config = ProvisionConfig::load(Some(&path)).unwrap();
        assert_eq!(config.chroot.suite, "bookworm");
        assert_eq!(
            config.descriptor_path(),
            PathBuf::from("/opt/toolchains/gcc-12-armv8.cmake")
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.target.triplet, "arm-linux-gnueabihf");
    }

    #[test]
    fn test_unknown_config_fields_are_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("toolchain.toml");
        fs::write(&path, "mystery_knob = true\n").unwrap();
        assert!(ProvisionConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_keyring_package_file_is_url_basename() {
        let config = ProvisionConfig::default();
        assert_eq!(
            config.keyring_package_file(),
            "raspbian-archive-keyring_20120528.2_all.deb"
        );
    }
}
