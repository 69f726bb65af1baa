use std::path::Path;

use super::parse::{parse_lines, parse_package_provided, parse_package_use_list, parse_use_list, PackageUse};
use super::{FlagStates, PackageRef};
use crate::atom::{Atom, TargetPackage};
use crate::error::{Error, Result};

/// A `package.mask` entry; `-atom` lines lift an inherited mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMask {
    pub atom: Atom,
    pub unmask: bool,
}

/// The line-based files of one profile directory (or of
/// `/etc/portage/profile`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub package_use: Vec<PackageUse>,
    pub use_mask: Vec<String>,
    pub use_force: Vec<String>,
    pub package_use_mask: Vec<PackageUse>,
    pub package_use_force: Vec<PackageUse>,
    pub package_mask: Vec<PackageMask>,
    pub provided: Vec<PackageRef>,
}

impl ConfigLayer {
    /// Load every supported file under `dir`. Missing files are empty.
    pub fn load(dir: &Path) -> Result<ConfigLayer> {
        Ok(ConfigLayer {
            package_use: parse_package_use_list(&dir.join("package.use"))?,
            use_mask: parse_use_list(&dir.join("use.mask"))?,
            use_force: parse_use_list(&dir.join("use.force"))?,
            package_use_mask: parse_package_use_list(&dir.join("package.use.mask"))?,
            package_use_force: parse_package_use_list(&dir.join("package.use.force"))?,
            package_mask: load_package_mask(&dir.join("package.mask"))?,
            provided: parse_package_provided(&dir.join("package.provided"))?,
        })
    }

    /// Flags from `package.use` entries matching `target`, in file order.
    pub fn package_use_flags(&self, target: &TargetPackage) -> Vec<&str> {
        self.package_use
            .iter()
            .filter(|entry| entry.atom.matches(target))
            .flat_map(|entry| entry.flags.iter().map(String::as_str))
            .collect()
    }

    pub fn apply_use_masks_and_forces(
        &self,
        target: &TargetPackage,
        masks: &mut FlagStates,
        forces: &mut FlagStates,
    ) {
        apply_flags(masks, self.use_mask.iter().map(String::as_str));
        apply_flags(masks, matching_flags(&self.package_use_mask, target));
        apply_flags(forces, self.use_force.iter().map(String::as_str));
        apply_flags(forces, matching_flags(&self.package_use_force, target));
    }

    /// Fold this layer's `package.mask` into `masks`.
    pub fn apply_package_masks(&self, masks: &mut Vec<Atom>) {
        for entry in &self.package_mask {
            if entry.unmask {
                masks.retain(|atom| atom != &entry.atom);
            } else {
                masks.push(entry.atom.clone());
            }
        }
    }
}

fn matching_flags<'a>(
    entries: &'a [PackageUse],
    target: &'a TargetPackage,
) -> impl Iterator<Item = &'a str> {
    entries
        .iter()
        .filter(move |entry| entry.atom.matches(target))
        .flat_map(|entry| entry.flags.iter().map(String::as_str))
}

fn apply_flags<'a>(states: &mut FlagStates, flags: impl Iterator<Item = &'a str>) {
    for flag in flags {
        match flag.strip_prefix('-') {
            Some(flag) => states.insert(flag.to_string(), false),
            None => states.insert(flag.to_string(), true),
        };
    }
}

fn load_package_mask(path: &Path) -> Result<Vec<PackageMask>> {
    parse_lines(path)?
        .into_iter()
        .map(|(n, line)| {
            let (unmask, atom) = match line.strip_prefix('-') {
                Some(atom) => (true, atom),
                None => (false, line.as_str()),
            };
            let atom = atom.parse::<Atom>().map_err(|e| Error::Syntax {
                location: format!("{}:{n}", path.display()),
                message: e.to_string(),
            })?;
            Ok(PackageMask { atom, unmask })
        })
        .collect()
}
