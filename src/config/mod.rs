//! Layered Portage configuration.
//!
//! Every layer (a profile, the user's `/etc/portage`, built-in overrides)
//! implements [`ConfigSource`]. A [`Bundle`] stacks them in priority order.

mod layer;
mod parse;
mod user;

use std::collections::BTreeMap;
use std::fmt;

use crate::atom::{Atom, TargetPackage, UseFlags};
use crate::error::Result;
use crate::makevars::Vars;
use crate::version::Version;

pub use layer::{ConfigLayer, PackageMask};
pub use parse::{parse_lines, parse_package_provided, parse_package_use_list, parse_use_list, PackageUse};
pub use user::UserConfigSource;

/// USE flag states collected from `use.mask`/`use.force` style files.
///
/// `true` masks (or forces) the flag, `false` undoes an earlier entry.
pub type FlagStates = BTreeMap<String, bool>;

/// A package known by name and version only, before its ebuild is
/// evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    /// `category/package`
    pub name: String,
    pub version: Version,
}

impl PackageRef {
    /// The package as an atom target, with no slot or USE flags.
    pub fn to_target(&self) -> TargetPackage {
        TargetPackage {
            name: self.name.clone(),
            version: self.version.clone(),
            main_slot: String::new(),
            use_flags: UseFlags::new(),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// A layer of configuration.
///
/// The variable evaluation methods update `env` in place so later layers can
/// refer to values set by earlier ones, and return one snapshot per file in
/// application order.
pub trait ConfigSource: Send + Sync {
    fn eval_global_vars(&self, env: &mut Vars) -> Result<Vec<Vars>>;

    fn eval_package_vars(&self, package: &PackageRef, env: &mut Vars) -> Result<Vec<Vars>>;

    fn use_masks_and_forces(
        &self,
        package: &PackageRef,
        masks: &mut FlagStates,
        forces: &mut FlagStates,
    ) -> Result<()>;

    fn package_masks(&self) -> Result<Vec<Atom>>;

    /// Packages to treat as installed without an ebuild.
    fn provided_packages(&self) -> Result<Vec<PackageRef>>;
}

/// Configuration sources applied in order; later sources override earlier
/// ones.
#[derive(Default)]
pub struct Bundle {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl Bundle {
    pub fn new(sources: Vec<Box<dyn ConfigSource>>) -> Bundle {
        Bundle { sources }
    }

    pub fn push(&mut self, source: impl ConfigSource + 'static) {
        self.sources.push(Box::new(source));
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl ConfigSource for Bundle {
    fn eval_global_vars(&self, env: &mut Vars) -> Result<Vec<Vars>> {
        let mut layers = Vec::new();
        for source in &self.sources {
            layers.extend(source.eval_global_vars(env)?);
        }
        Ok(layers)
    }

    fn eval_package_vars(&self, package: &PackageRef, env: &mut Vars) -> Result<Vec<Vars>> {
        let mut layers = Vec::new();
        for source in &self.sources {
            layers.extend(source.eval_package_vars(package, env)?);
        }
        Ok(layers)
    }

    fn use_masks_and_forces(
        &self,
        package: &PackageRef,
        masks: &mut FlagStates,
        forces: &mut FlagStates,
    ) -> Result<()> {
        for source in &self.sources {
            source.use_masks_and_forces(package, masks, forces)?;
        }
        Ok(())
    }

    fn package_masks(&self) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        for source in &self.sources {
            atoms.extend(source.package_masks()?);
        }
        Ok(atoms)
    }

    fn provided_packages(&self) -> Result<Vec<PackageRef>> {
        let mut packages = Vec::new();
        for source in &self.sources {
            packages.extend(source.provided_packages()?);
        }
        Ok(packages)
    }
}

/// Fixed USE flags and provided packages injected on top of the real
/// configuration.
#[derive(Debug, Clone, Default)]
pub struct HackSource {
    use_flags: String,
    provided: Vec<PackageRef>,
}

impl HackSource {
    pub fn new(use_flags: impl Into<String>, provided: Vec<PackageRef>) -> HackSource {
        HackSource {
            use_flags: use_flags.into(),
            provided,
        }
    }
}

impl ConfigSource for HackSource {
    fn eval_global_vars(&self, env: &mut Vars) -> Result<Vec<Vars>> {
        env.insert("USE", self.use_flags.as_str());
        Ok(vec![[("USE", self.use_flags.as_str())].into_iter().collect()])
    }

    fn eval_package_vars(&self, _package: &PackageRef, env: &mut Vars) -> Result<Vec<Vars>> {
        self.eval_global_vars(env)
    }

    fn use_masks_and_forces(
        &self,
        _package: &PackageRef,
        _masks: &mut FlagStates,
        _forces: &mut FlagStates,
    ) -> Result<()> {
        Ok(())
    }

    fn package_masks(&self) -> Result<Vec<Atom>> {
        Ok(Vec::new())
    }

    fn provided_packages(&self) -> Result<Vec<PackageRef>> {
        Ok(self.provided.clone())
    }
}
