use std::path::{Path, PathBuf};

use tracing::debug;

use super::layer::ConfigLayer;
use super::{ConfigSource, FlagStates, PackageRef};
use crate::atom::Atom;
use crate::error::Result;
use crate::makevars::Vars;
use crate::shell;

const MAKE_CONF_PATHS: &[&str] = &["etc/make.conf", "etc/portage/make.conf"];

/// The user's configuration under a board root: `make.conf`,
/// `/etc/portage/package.use` and the `/etc/portage/profile` overrides.
#[derive(Debug, Clone)]
pub struct UserConfigSource {
    root: PathBuf,
    package_use: ConfigLayer,
    profile: ConfigLayer,
}

impl UserConfigSource {
    pub fn load(root: impl Into<PathBuf>) -> Result<UserConfigSource> {
        let root = root.into();
        let portage_dir = root.join("etc/portage");
        let package_use = ConfigLayer {
            package_use: super::parse_package_use_list(&portage_dir.join("package.use"))?,
            ..ConfigLayer::default()
        };
        let profile = ConfigLayer::load(&portage_dir.join("profile"))?;
        Ok(UserConfigSource {
            root,
            package_use,
            profile,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ConfigSource for UserConfigSource {
    fn eval_global_vars(&self, env: &mut Vars) -> Result<Vec<Vars>> {
        let mut layers = Vec::new();
        for rel in MAKE_CONF_PATHS {
            let path = self.root.join(rel);
            if !path.exists() {
                continue;
            }
            debug!("Evaluating {}", path.display());
            layers.push(shell::eval(&path, env, true)?);
        }
        Ok(layers)
    }

    fn eval_package_vars(&self, package: &PackageRef, env: &mut Vars) -> Result<Vec<Vars>> {
        let mut layers = self.eval_global_vars(env)?;
        let target = package.to_target();
        let flags = [&self.package_use, &self.profile]
            .iter()
            .flat_map(|layer| layer.package_use_flags(&target))
            .collect::<Vec<_>>();
        if !flags.is_empty() {
            layers.push([("USE", flags.join(" "))].into_iter().collect());
        }
        Ok(layers)
    }

    fn use_masks_and_forces(
        &self,
        package: &PackageRef,
        masks: &mut FlagStates,
        forces: &mut FlagStates,
    ) -> Result<()> {
        self.profile
            .apply_use_masks_and_forces(&package.to_target(), masks, forces);
        Ok(())
    }

    fn package_masks(&self) -> Result<Vec<Atom>> {
        let mut masks = Vec::new();
        self.profile.apply_package_masks(&mut masks);
        Ok(masks)
    }

    fn provided_packages(&self) -> Result<Vec<PackageRef>> {
        Ok(self.profile.provided.clone())
    }
}
