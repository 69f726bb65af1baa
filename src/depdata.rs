//! Resolved package records, keyed by label.
//!
//! The JSON form is consumed by the build file generator, so field names
//! and ordering must stay stable.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a distribution file comes from and how to verify it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UriInfo {
    pub uris: Vec<String>,
    pub size: u64,
    pub integrity: String,
    #[serde(rename = "SHA256")]
    pub sha256: String,
    #[serde(rename = "SHA512")]
    pub sha512: String,
}

/// One resolved package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInfo {
    pub name: String,
    pub main_slot: String,
    /// Relative to the source root.
    pub ebuild_path: String,
    pub version: String,
    pub build_deps: Vec<String>,
    pub local_src: Vec<String>,
    pub runtime_deps: Vec<String>,
    pub src_uris: BTreeMap<String, UriInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_deps: Vec<String>,
}

/// Records keyed by `//<package dir>:<main slot>`.
pub type PackageInfoMap = BTreeMap<String, PackageInfo>;

/// Write `infos` as indented JSON.
pub fn save(path: &Path, infos: &PackageInfoMap) -> Result<()> {
    let mut json = serde_json::to_string_pretty(infos)?;
    json.push('\n');
    fs::write(path, json).map_err(|e| Error::io(path, e))
}

pub fn load(path: &Path) -> Result<PackageInfoMap> {
    let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Replace every record's post-dependencies with those reachable through
/// its runtime dependencies, itself excluded.
///
/// A package that runtime-depends on `Q` gets `Q`'s post-dependencies even
/// though it never names them.
pub fn propagate_post_deps(infos: &mut PackageInfoMap) {
    let mut memo: HashMap<String, BTreeSet<String>> = HashMap::new();
    let records: &PackageInfoMap = infos;
    let propagated: Vec<(String, BTreeSet<String>)> = records
        .keys()
        .map(|label| {
            let (post_deps, _) = collect_post_deps(records, label, &mut memo, &mut BTreeSet::new());
            (label.clone(), post_deps)
        })
        .collect();
    for (label, post_deps) in propagated {
        if let Some(info) = infos.get_mut(&label) {
            info.post_deps = post_deps.into_iter().filter(|dep| *dep != label).collect();
        }
    }
}

/// Post-dependencies of `label` and everything it runtime-depends on.
///
/// The resolver rejects runtime cycles, but records loaded from elsewhere
/// may contain them. A label on the `visiting` path contributes nothing
/// when reached again; the flag is `false` when the result passed through
/// such a cut, and only complete results are memoized.
fn collect_post_deps(
    infos: &PackageInfoMap,
    label: &str,
    memo: &mut HashMap<String, BTreeSet<String>>,
    visiting: &mut BTreeSet<String>,
) -> (BTreeSet<String>, bool) {
    if let Some(post_deps) = memo.get(label) {
        return (post_deps.clone(), true);
    }
    let Some(info) = infos.get(label) else {
        return (BTreeSet::new(), true);
    };
    if !visiting.insert(label.to_string()) {
        return (BTreeSet::new(), false);
    }

    let mut post_deps: BTreeSet<String> = info.post_deps.iter().cloned().collect();
    let mut complete = true;
    for dep in &info.runtime_deps {
        let (deps, dep_complete) = collect_post_deps(infos, dep, memo, visiting);
        post_deps.extend(deps);
        complete &= dep_complete;
    }

    visiting.remove(label);
    if complete {
        memo.insert(label.to_string(), post_deps.clone());
    }
    (post_deps, complete)
}
