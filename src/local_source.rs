//! Local source directories of `cros-workon` packages.
//!
//! `CROS_WORKON_PROJECT`, `CROS_WORKON_LOCALNAME` and `CROS_WORKON_SUBTREE`
//! are parallel arrays (joined with `|` by the evaluator) naming the
//! checkouts under the source root a package builds from. Each directory
//! becomes a `//<path>:src` label.

use std::collections::{BTreeMap, BTreeSet};

use crate::depdata::PackageInfoMap;
use crate::error::{Error, Result};
use crate::packages::Package;

const PLATFORM2: &str = "platform2";

/// Directories used whole even when a `SUBTREE` is given.
const WHOLE_CHECKOUTS: &[&str] = &["platform/vboot_reference", "third_party/coreboot"];

/// Packages that need chromite without inheriting an eclass that implies it.
const CHROMITE_PACKAGES: &[&str] = &["dev-libs/gobject-introspection"];

/// Source targets whose subdirectories are separate packages.
const NO_SUB_TARGETS: &[&str] = &["//platform2"];

const CHROME_SRC: &str = "@chrome//:src";
const CHROMITE_SRC: &str = "@chromite//:src";

fn split_array(value: &str) -> Vec<&str> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split('|').collect()
    }
}

/// Source labels of `package`, sorted and unique.
pub fn extract_local_sources(package: &Package) -> Result<Vec<String>> {
    let metadata = package.metadata();
    let projects = split_array(metadata.value("CROS_WORKON_PROJECT"));
    let local_names = split_array(metadata.value("CROS_WORKON_LOCALNAME"));
    let subtrees = split_array(metadata.value("CROS_WORKON_SUBTREE"));

    for (var, values) in [("LOCALNAME", &local_names), ("SUBTREE", &subtrees)] {
        if !values.is_empty() && values.len() != projects.len() {
            return Err(Error::Syntax {
                location: package.path().display().to_string(),
                message: format!(
                    "number of elements in CROS_WORKON_{var} ({}) and CROS_WORKON_PROJECT ({}) don't match",
                    values.len(),
                    projects.len()
                ),
            });
        }
    }

    let mut paths = BTreeSet::new();
    for (i, project) in projects.iter().enumerate() {
        let mut local_name = local_names.get(i).copied().unwrap_or_default();
        let subtree = subtrees.get(i).copied().unwrap_or_default();

        // The ebuild names the checkout relative to the wrong directory.
        if *project == "cros/platform/chromiumos-assets" && local_name == "chromiumos-assets" {
            local_name = "platform/chromiumos-assets";
        }

        let base = if local_name.is_empty() {
            project.strip_prefix("cros/").map(str::to_string)
        } else if package.category() == "chromeos-base" {
            Some(local_name.to_string())
        } else if let Some(stripped) = local_name.strip_prefix("../") {
            Some(stripped.to_string())
        } else {
            Some(format!("third_party/{local_name}"))
        };

        if let Some(base) = base {
            if subtree.is_empty() {
                paths.insert(base);
            } else {
                paths.extend(apply_subtree(base, subtree));
            }
        }

        if *project == "cros/third_party/kernel" {
            paths.insert("third_party/chromiumos-overlay/eclass/cros-kernel".to_string());
        }
    }

    let mut labels: BTreeSet<String> = paths
        .into_iter()
        .map(|path| {
            // sys_util_core needs its own pinned crosvm checkout.
            if package.name() == "dev-rust/sys_util_core" && path == "platform/crosvm" {
                "platform/crosvm-sys_util_core".to_string()
            } else {
                path
            }
        })
        .map(|path| format!("//{path}:src"))
        .collect();

    if package.uses_eclass("chromium-source") {
        labels.insert(CHROME_SRC.to_string());
    }
    if CHROMITE_PACKAGES.contains(&package.name())
        || package.uses_eclass("platform")
        || package.uses_eclass("dlc")
    {
        labels.insert(CHROMITE_SRC.to_string());
    }

    Ok(labels.into_iter().collect())
}

/// Only `platform2` checkouts are split per subtree.
fn apply_subtree(base: String, subtree: &str) -> Vec<String> {
    if WHOLE_CHECKOUTS.contains(&base.as_str()) || !base.starts_with(PLATFORM2) {
        return vec![base];
    }
    subtree
        .split(' ')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry {
            ".gn" => Some(base.clone()),
            ".clang-format" => None,
            "chromeos-config/cros_config_host" => Some(format!("{base}/chromeos-config")),
            _ => Some(format!("{base}/{entry}")),
        })
        .collect()
}

/// Give packages depending on a source directory the source targets of its
/// subdirectories too, since those are only visible as separate packages.
///
/// `//platform2/iioservice:src` gains `//platform2/iioservice/mojo:src` when
/// some other package lists the latter.
pub fn fixup_local_sources(infos: &mut PackageInfoMap) {
    let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (label, info) in infos.iter() {
        for src in &info.local_src {
            let target = src.strip_suffix(":src").unwrap_or(src);
            owners.entry(target.to_string()).or_default().push(label.clone());
        }
    }

    let targets: Vec<&String> = owners.keys().collect();
    let mut additions: Vec<(String, String)> = Vec::new();
    for (i, parent) in targets.iter().enumerate() {
        if NO_SUB_TARGETS.contains(&parent.as_str()) {
            continue;
        }
        for child in &targets[i + 1..] {
            match child.strip_prefix(parent.as_str()) {
                None => break,
                // A sibling such as `foo-bar` after `foo`.
                Some(rest) if !rest.starts_with('/') => continue,
                Some(_) => {}
            }
            for label in &owners[*parent] {
                additions.push((label.clone(), format!("{child}:src")));
            }
        }
    }

    for (label, src) in additions {
        if let Some(info) = infos.get_mut(&label) {
            if !info.local_src.contains(&src) {
                info.local_src.push(src);
                info.local_src.sort();
            }
        }
    }
}
