//! Portage profiles.
//!
//! A profile is a directory under some repository's `profiles/` tree. It may
//! inherit from other profiles listed in its `parent` file, either as
//! `repo-name:path` or as a path relative to itself. Settings are applied
//! parents first.
//!
//! See [PMS 5](https://projects.gentoo.org/pms/9/pms.html#profiles).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::atom::Atom;
use crate::config::{parse_lines, ConfigLayer, ConfigSource, FlagStates, PackageRef};
use crate::error::{Error, Result};
use crate::makevars::Vars;
use crate::shell;

const MAKE_DEFAULTS: &str = "make.defaults";

/// Looks up parent profiles while a profile is being loaded.
pub trait ProfileResolver {
    /// Resolve a `parent` line found in the profile at `base`.
    fn resolve_profile(&self, reference: &str, base: &Path) -> Result<Arc<Profile>>;
}

/// A profile node with its resolved parents.
#[derive(Debug)]
pub struct Profile {
    name: String,
    path: PathBuf,
    parents: Vec<Arc<Profile>>,
}

impl Profile {
    /// Load the profile at `path`, resolving its parents through `resolver`.
    pub fn load(path: &Path, name: &str, resolver: &dyn ProfileResolver) -> Result<Profile> {
        if !path.is_dir() {
            return Err(Error::ProfileNotFound(name.to_string()));
        }

        let parents = parse_lines(&path.join("parent"))?
            .into_iter()
            .map(|(_, reference)| {
                resolver
                    .resolve_profile(&reference, path)
                    .map_err(|e| Error::resolving(format!("profile {name}"), e))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Profile {
            name: name.to_string(),
            path: path.to_path_buf(),
            parents,
        })
    }

    /// `repo-name:relative/path`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn parents(&self) -> &[Arc<Profile>] {
        &self.parents
    }

    /// This profile and all its ancestors, parents first.
    fn lineage<'a>(&'a self, out: &mut Vec<&'a Profile>) {
        for parent in &self.parents {
            parent.lineage(out);
        }
        out.push(self);
    }

    /// Read every profile file along the inheritance chain.
    pub fn parse(&self) -> Result<ParsedProfile> {
        let mut lineage = Vec::new();
        self.lineage(&mut lineage);

        let mut vars = Vars::new();
        let mut layers = Vec::with_capacity(lineage.len());
        for profile in lineage {
            let make_defaults = profile.path.join(MAKE_DEFAULTS);
            if make_defaults.exists() {
                shell::parse_make_defaults(&make_defaults, &mut vars)?;
            }
            layers.push(ConfigLayer::load(&profile.path)?);
        }

        Ok(ParsedProfile {
            name: self.name.clone(),
            vars,
            layers,
        })
    }
}

/// A profile with all of its files read, usable as a [`ConfigSource`].
#[derive(Debug, Clone)]
pub struct ParsedProfile {
    name: String,
    vars: Vars,
    layers: Vec<ConfigLayer>,
}

impl ParsedProfile {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variables from all `make.defaults` files, incremental ones unfinalized.
    pub fn vars(&self) -> &Vars {
        &self.vars
    }
}

impl ConfigSource for ParsedProfile {
    fn eval_global_vars(&self, env: &mut Vars) -> Result<Vec<Vars>> {
        env.extend(&self.vars);
        Ok(vec![self.vars.clone()])
    }

    fn eval_package_vars(&self, package: &PackageRef, env: &mut Vars) -> Result<Vec<Vars>> {
        let mut snapshots = self.eval_global_vars(env)?;
        let target = package.to_target();
        let flags: Vec<&str> = self
            .layers
            .iter()
            .flat_map(|layer| layer.package_use_flags(&target))
            .collect();
        if !flags.is_empty() {
            snapshots.push([("USE", flags.join(" "))].into_iter().collect());
        }
        Ok(snapshots)
    }

    fn use_masks_and_forces(
        &self,
        package: &PackageRef,
        masks: &mut FlagStates,
        forces: &mut FlagStates,
    ) -> Result<()> {
        let target = package.to_target();
        for layer in &self.layers {
            layer.apply_use_masks_and_forces(&target, masks, forces);
        }
        Ok(())
    }

    fn package_masks(&self) -> Result<Vec<Atom>> {
        let mut masks = Vec::new();
        for layer in &self.layers {
            layer.apply_package_masks(&mut masks);
        }
        Ok(masks)
    }

    fn provided_packages(&self) -> Result<Vec<PackageRef>> {
        Ok(self
            .layers
            .iter()
            .flat_map(|layer| layer.provided.iter().cloned())
            .collect())
    }
}
