use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::atom::{TargetPackage, UseFlags};
use crate::eapi::Eapi;
use crate::ebuild::EbuildInfo;
use crate::error::Result;
use crate::keyword::Stability;
use crate::makevars::Vars;
use crate::version::Version;

/// A candidate package: an ebuild together with its evaluated metadata.
#[derive(Debug, Clone)]
pub struct Package {
    path: PathBuf,
    info: Arc<EbuildInfo>,
    target: TargetPackage,
}

impl Package {
    pub fn new(path: PathBuf, name: String, version: Version, info: Arc<EbuildInfo>) -> Package {
        let target = TargetPackage {
            name,
            version,
            main_slot: main_slot(info.metadata.value("SLOT")).to_string(),
            use_flags: info.use_flags.clone(),
        };
        Package { path, info, target }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `category/package`
    pub fn name(&self) -> &str {
        &self.target.name
    }

    pub fn category(&self) -> &str {
        self.target
            .name
            .split_once('/')
            .map_or(self.target.name.as_str(), |(category, _)| category)
    }

    pub fn version(&self) -> &Version {
        &self.target.version
    }

    pub fn use_flags(&self) -> &UseFlags {
        &self.target.use_flags
    }

    pub fn metadata(&self) -> &Vars {
        &self.info.metadata
    }

    pub fn target(&self) -> &TargetPackage {
        &self.target
    }

    /// `SLOT` without the sub-slot.
    pub fn main_slot(&self) -> &str {
        &self.target.main_slot
    }

    pub fn eapi(&self) -> Result<Eapi> {
        Eapi::of_ebuild(self.metadata().get("EAPI"))
    }

    /// Stability of this package on the configured `ARCH`.
    pub fn stability(&self) -> Result<Stability> {
        Stability::of(self.metadata().value("KEYWORDS"), self.metadata().value("ARCH"))
    }

    /// Whether the ebuild inherits `eclass`.
    pub fn uses_eclass(&self, eclass: &str) -> bool {
        self.metadata().list("INHERITED").contains(&eclass)
    }
}

fn main_slot(slot: &str) -> &str {
    slot.split_once('/').map_or(slot, |(main, _)| main)
}
