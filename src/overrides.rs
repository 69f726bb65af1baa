//! Compensation for packages the resolver cannot handle from metadata
//! alone.
//!
//! Every list here works around a specific ebuild or an unimplemented
//! feature (`USE_EXPAND` groups in particular) and is expected to shrink.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::atom::Atom;
use crate::config::{HackSource, PackageRef};
use crate::error::{Error, Result};
use crate::version::Version;

/// Packages that are never installable, regardless of the repositories.
///
/// A dependency matches when its package name is equal, its slot (if
/// `slots` is non-empty) is one of `slots`, and its first USE dependency
/// equals `use_dep` and starts with `use_dep_prefix` (each if given).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Unavailable {
    pub package: String,
    pub slots: Vec<String>,
    pub use_dep: Option<String>,
    pub use_dep_prefix: Option<String>,
}

impl Unavailable {
    fn new(package: &str, slots: &[&str]) -> Unavailable {
        Unavailable {
            package: package.to_string(),
            slots: slots.iter().map(|s| s.to_string()).collect(),
            ..Unavailable::default()
        }
    }

    fn with_use_dep(package: &str, use_dep: &str) -> Unavailable {
        Unavailable {
            use_dep: Some(use_dep.to_string()),
            ..Unavailable::new(package, &[])
        }
    }

    fn with_use_dep_prefix(package: &str, prefix: &str) -> Unavailable {
        Unavailable {
            use_dep_prefix: Some(prefix.to_string()),
            ..Unavailable::new(package, &[])
        }
    }

    pub fn matches(&self, atom: &Atom) -> bool {
        if atom.package_name() != self.package {
            return false;
        }
        if !self.slots.is_empty() && !self.slots.iter().any(|slot| slot == atom.slot_dep()) {
            return false;
        }
        if self.use_dep.is_none() && self.use_dep_prefix.is_none() {
            return true;
        }
        let Some(first) = atom.use_deps().first().map(|dep| dep.as_str()) else {
            return false;
        };
        self.use_dep.as_deref().map_or(true, |want| first == want)
            && self
                .use_dep_prefix
                .as_deref()
                .map_or(true, |prefix| first.starts_with(prefix))
    }
}

/// Hard-coded adjustments applied by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyOverrides {
    /// USE flags set for every package.
    pub force_use: Vec<String>,
    /// Package names treated as installed at version `0`.
    pub force_provided: Vec<String>,
    /// Ebuild file names never selected.
    pub invalid_ebuilds: Vec<String>,
    /// Runtime dependencies replacing those of the named packages.
    pub forced_deps: BTreeMap<String, Vec<String>>,
    /// Dependencies added per package and dependency variable.
    pub extra_deps: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    pub unavailable: Vec<Unavailable>,
}

impl LegacyOverrides {
    /// The lists needed by the ChromiumOS tree.
    pub fn builtin() -> LegacyOverrides {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let forced_deps = [
            ("virtual/chromeos-bootcomplete", "chromeos-base/bootcomplete-login"),
            ("virtual/editor", "app-editors/vim"),
            ("virtual/logger", "app-admin/rsyslog"),
            ("virtual/update-policy", "chromeos-base/update-policy-chromeos"),
        ]
        .into_iter()
        .map(|(name, dep)| (name.to_string(), vec![dep.to_string()]))
        .collect();
        let extra_deps = [
            ("app-text/poppler", "DEPEND", "dev-libs/boost"),
            ("dev-python/m2crypto", "DEPEND", "dev-lang/python:3.6"),
            ("x11-libs/libXau", "RDEPEND", "x11-base/xorg-proto"),
        ]
        .into_iter()
        .map(|(name, var, dep)| {
            let deps = [(var.to_string(), vec![dep.to_string()])].into_iter().collect();
            (name.to_string(), deps)
        })
        .collect();

        LegacyOverrides {
            force_use: strings(&[
                "board_use_arm64-generic",
                "chromeos_kernel_family_chromeos",
                "cpu_flags_arm_neon",
                "elibc_glibc",
                "input_devices_evdev",
                "kernel_linux",
                "linux_firmware_iwlwifi-all",
                "linux_firmware_rt2870",
                "linux_firmware_rtl8153",
                "ozone_platform_default_gbm",
                "ozone_platform_gbm",
                "ozone_platform_headless",
                "python_single_target_python3_6",
                "python_targets_python3_6",
                "ruby_targets_ruby25",
                "video_cards_llvmpipe",
            ]),
            force_provided: strings(&["virtual/rust-binaries", "virtual/rust"]),
            invalid_ebuilds: strings(&["chromeos-lacros-9999.ebuild"]),
            forced_deps,
            extra_deps,
            unavailable: vec![
                Unavailable::new("dev-lang/python", &["2.7", "3.7", "3.8"]),
                Unavailable::with_use_dep("dev-libs/libverto", "libevent"),
                Unavailable::with_use_dep_prefix("dev-python/m2crypto", "python_targets_python3_7"),
                Unavailable::new("media-libs/jpeg", &[]),
            ],
        }
    }

    /// A configuration layer setting `force_use` and providing
    /// `force_provided`.
    pub fn hack_source(&self) -> Result<HackSource> {
        let version: Version = "0".parse()?;
        let provided = self
            .force_provided
            .iter()
            .map(|name| {
                crate::atom::check_category_and_package(name)
                    .map_err(|e| Error::InvalidConfig(format!("force_provided: {e}")))?;
                Ok(PackageRef {
                    name: name.clone(),
                    version: version.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(HackSource::new(self.force_use.join(" "), provided))
    }

    /// Forced runtime dependencies of `package_name`, parsed.
    pub fn forced_deps(&self, package_name: &str) -> Result<Option<Vec<Atom>>> {
        self.forced_deps
            .get(package_name)
            .map(|deps| parse_atoms(deps))
            .transpose()
    }

    /// Additional `var` dependencies of `package_name`, parsed.
    pub fn extra_deps(&self, package_name: &str, var: &str) -> Result<Vec<Atom>> {
        match self.extra_deps.get(package_name).and_then(|deps| deps.get(var)) {
            Some(deps) => parse_atoms(deps),
            None => Ok(Vec::new()),
        }
    }

    pub fn is_invalid_ebuild(&self, file_name: &str) -> bool {
        self.invalid_ebuilds.iter().any(|name| name == file_name)
    }

    pub fn is_unavailable(&self, atom: &Atom) -> bool {
        self.unavailable.iter().any(|rule| rule.matches(atom))
    }
}

fn parse_atoms(deps: &[String]) -> Result<Vec<Atom>> {
    deps.iter().map(|dep| dep.parse()).collect()
}
