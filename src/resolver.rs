//! Dependency graph extraction.
//!
//! Starting from a set of atoms, [`Resolver::resolve`] selects one version
//! of every package reachable through `RDEPEND`, `DEPEND`/`BDEPEND` and
//! `PDEPEND`, and records each one under its label
//! `//<ebuild dir relative to the source root>:<main slot>`.
//!
//! Post-dependencies (`PDEPEND`) are queued and resolved once everything
//! else is, then propagated to every package that reaches them through
//! runtime dependencies.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atom::{Atom, TargetPackage, UseFlags};
use crate::config::{Bundle, ConfigSource, PackageRef, UserConfigSource};
use crate::depdata::{self, PackageInfo, PackageInfoMap};
use crate::dependency::{Deps, Expr};
use crate::ebuild::{CachedReader, EbuildReader, Processor};
use crate::error::{Error, Result};
use crate::keyword::Stability;
use crate::local_source;
use crate::makevars::Vars;
use crate::overrides::LegacyOverrides;
use crate::packages::Package;
use crate::repository::{clean_path, RepoSet};
use crate::src_uri;

const DEFAULT_SOURCE_ROOT: &str = "/mnt/host/source/src";
const MAKE_PROFILE: &str = "etc/portage/make.profile";

/// Resolver settings.
///
/// ```toml
/// source_root = "/mnt/host/source/src"
/// stability_order = ["testing", "stable"]
///
/// [overrides]
/// force_use = ["kernel_linux"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Every selected ebuild must live below this directory.
    pub source_root: PathBuf,
    /// Stability tiers tried in order; the first tier with a candidate wins.
    pub stability_order: Vec<Stability>,
    pub overrides: LegacyOverrides,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            source_root: PathBuf::from(DEFAULT_SOURCE_ROOT),
            stability_order: vec![Stability::Testing, Stability::Stable],
            overrides: LegacyOverrides::builtin(),
        }
    }
}

impl ResolverConfig {
    pub fn load(path: &Path) -> Result<ResolverConfig> {
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&contents)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))
    }
}

/// Package selection against a set of repositories and a configuration.
pub struct Resolver {
    repos: Arc<RepoSet>,
    config: Arc<dyn ConfigSource>,
    reader: Box<dyn EbuildReader>,
    settings: ResolverConfig,
    masks: Vec<Atom>,
    provided: HashMap<String, Vec<PackageRef>>,
}

impl Resolver {
    /// Package masks and provided packages are read from `config` once.
    pub fn new(
        repos: Arc<RepoSet>,
        config: Arc<dyn ConfigSource>,
        reader: Box<dyn EbuildReader>,
        settings: ResolverConfig,
    ) -> Result<Resolver> {
        let masks = config.package_masks()?;
        let mut provided: HashMap<String, Vec<PackageRef>> = HashMap::new();
        for package in config.provided_packages()? {
            provided.entry(package.name.clone()).or_default().push(package);
        }
        Ok(Resolver {
            repos,
            config,
            reader,
            settings,
            masks,
            provided,
        })
    }

    /// Set up a resolver for the board sysroot at `root`.
    ///
    /// Repositories come from `PORTDIR` and `PORTDIR_OVERLAY` in
    /// `make.conf`, the profile from the `etc/portage/make.profile` link.
    /// The configuration stacks the profile, the user configuration and the
    /// forced USE flags and provided packages of `settings.overrides`.
    pub fn from_root(root: &Path, settings: ResolverConfig) -> Result<Resolver> {
        let user = UserConfigSource::load(root)?;
        let mut boot_env = Vars::new();
        user.eval_global_vars(&mut boot_env)?;
        let repos = Arc::new(RepoSet::load(&overlays(&boot_env)?)?);

        let link = root.join(MAKE_PROFILE);
        let target = fs::read_link(&link).map_err(|e| Error::io(&link, e))?;
        let profile_path = if target.is_absolute() {
            target
        } else {
            clean_path(&root.join("etc/portage").join(target))
        };
        let profile = repos.profile_by_path(&profile_path)?.parse()?;
        debug!("Using profile {}", profile.name());

        let mut bundle = Bundle::default();
        bundle.push(profile);
        bundle.push(user);
        bundle.push(settings.overrides.hack_source()?);
        let config: Arc<dyn ConfigSource> = Arc::new(bundle);

        let reader = Box::new(CachedReader::new(Processor::new(Arc::clone(&config))));
        Resolver::new(repos, config, reader, settings)
    }

    pub fn repos(&self) -> &RepoSet {
        &self.repos
    }

    pub fn config(&self) -> &dyn ConfigSource {
        self.config.as_ref()
    }

    pub fn settings(&self) -> &ResolverConfig {
        &self.settings
    }

    /// Unmasked packages matching `atom`, newest first.
    ///
    /// Ebuilds that fail to evaluate are skipped with a warning.
    pub fn packages(&self, atom: &Atom) -> Result<Vec<Package>> {
        let mut packages = Vec::new();
        for repo_package in self.repos.packages(atom.package_name())? {
            let info = match self.reader.read(&repo_package.path) {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        "Ignored ebuild: failed to evaluate {}: {e}",
                        repo_package.path.display()
                    );
                    continue;
                }
            };
            let package = Package::new(
                repo_package.path,
                atom.package_name().to_string(),
                repo_package.version,
                info,
            );
            if self.masks.iter().any(|mask| mask.matches(package.target())) {
                continue;
            }
            if atom.matches(package.target()) {
                packages.push(package);
            }
        }
        packages.sort_by(|a, b| b.version().cmp(a.version()));
        Ok(packages)
    }

    /// The package to use for `atom`.
    ///
    /// Candidates are tried newest first within each tier of
    /// `stability_order`; blocklisted ebuild files are never chosen.
    pub fn best_package(&self, atom: &Atom) -> Result<Package> {
        let candidates = self.packages(atom)?;
        for tier in &self.settings.stability_order {
            for candidate in &candidates {
                let file_name = candidate
                    .path()
                    .file_name()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                if self.settings.overrides.is_invalid_ebuild(&file_name) {
                    continue;
                }
                if candidate.stability()? == *tier {
                    return Ok(candidate.clone());
                }
            }
        }
        Err(Error::NoCandidate {
            atom: atom.to_string(),
        })
    }

    /// Whether `atom` is satisfied by a `package.provided` entry.
    ///
    /// Provided packages have no slot or USE flags.
    pub fn is_provided(&self, atom: &Atom) -> bool {
        self.provided
            .get(atom.package_name())
            .into_iter()
            .flatten()
            .any(|package| {
                atom.matches(&TargetPackage {
                    name: package.name.clone(),
                    version: package.version.clone(),
                    main_slot: String::new(),
                    use_flags: UseFlags::new(),
                })
            })
    }

    /// The atoms `package` depends on through `var`.
    ///
    /// USE conditionals are evaluated with the package's flags, blockers and
    /// provided packages are dropped, dependencies without any candidate are
    /// unsatisfiable, and the first remaining alternative of every `||`
    /// group is taken.
    pub fn dependencies(&self, package: &Package, var: &str) -> Result<Vec<Atom>> {
        let overrides = &self.settings.overrides;
        if let Some(forced) = overrides.forced_deps(package.name())? {
            return Ok(if var == "RDEPEND" { forced } else { Vec::new() });
        }

        let deps = Deps::parse(package.metadata().value(var))?
            .resolve_use(package.use_flags())
            .try_map_packages(|atom, blocks| self.rewrite_dependency(atom, blocks))?
            .simplify()
            .pick_first_alternatives()
            .simplify();
        if deps.children().iter().any(Expr::is_const_false) {
            return Err(Error::NondeterministicDeps(format!(
                "{var} of {} is unsatisfiable: {}",
                package.name(),
                package.metadata().value(var)
            )));
        }
        let mut atoms = deps.deterministic_atoms()?;
        atoms.extend(overrides.extra_deps(package.name(), var)?);
        Ok(atoms)
    }

    fn rewrite_dependency(&self, atom: &Atom, blocks: u8) -> Result<Expr> {
        if blocks > 0 {
            return Ok(Expr::const_true());
        }
        if self.settings.overrides.is_unavailable(atom) {
            return Ok(Expr::const_false());
        }
        if self.is_provided(atom) {
            return Ok(Expr::const_true());
        }
        if self.packages(atom)?.is_empty() {
            return Ok(Expr::const_false());
        }
        Ok(Expr::package(atom.clone()))
    }

    /// Resolve `atoms` and everything they depend on.
    ///
    /// The returned records have their post-dependencies propagated through
    /// runtime dependencies, and local source targets expanded to nested
    /// source directories used by other packages.
    pub fn resolve(&self, atoms: &[Atom]) -> Result<PackageInfoMap> {
        let mut resolution = Resolution {
            resolver: self,
            nodes: BTreeMap::new(),
            post_deps: VecDeque::new(),
        };
        for atom in atoms {
            resolution.resolve_atom(atom)?;
        }
        resolution.resolve_post_deps()?;

        let mut infos = resolution.into_infos();
        local_source::fixup_local_sources(&mut infos);
        depdata::propagate_post_deps(&mut infos);
        Ok(infos)
    }
}

/// `PORTDIR` followed by the `PORTDIR_OVERLAY` entries.
fn overlays(env: &Vars) -> Result<Vec<PathBuf>> {
    let portdir = env
        .get("PORTDIR")
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::InvalidConfig("PORTDIR is not defined".to_string()))?;
    Ok(std::iter::once(portdir)
        .chain(env.list("PORTDIR_OVERLAY"))
        .map(PathBuf::from)
        .collect())
}

/// A label is in progress while its dependencies are being resolved.
enum NodeState {
    InProgress,
    Done(PackageInfo),
}

/// State of one [`Resolver::resolve`] call.
struct Resolution<'a> {
    resolver: &'a Resolver,
    nodes: BTreeMap<String, NodeState>,
    /// Labels with unresolved post-dependencies, in discovery order.
    post_deps: VecDeque<(String, Vec<Atom>)>,
}

impl Resolution<'_> {
    /// Resolve `atom` and return its label.
    fn resolve_atom(&mut self, atom: &Atom) -> Result<String> {
        debug!("{atom}");
        let package = self.resolver.best_package(atom)?;

        let source_root = &self.resolver.settings.source_root;
        let rel_path = package
            .path()
            .strip_prefix(source_root)
            .map_err(|_| Error::OutsideSourceRoot {
                path: package.path().to_path_buf(),
                root: source_root.clone(),
            })?
            .to_path_buf();
        let dir = rel_path.parent().unwrap_or_else(|| Path::new(""));
        let label = format!("//{}:{}", dir.display(), package.main_slot());

        match self.nodes.get(&label) {
            Some(NodeState::InProgress) => return Err(Error::Cycle { label }),
            Some(NodeState::Done(info)) => {
                let got = package.version().to_string();
                if info.version != got {
                    return Err(Error::InconsistentSelection {
                        label,
                        got,
                        want: info.version.clone(),
                    });
                }
                return Ok(label);
            }
            None => {}
        }

        self.nodes.insert(label.clone(), NodeState::InProgress);
        let info = self
            .resolve_package(&package, &label, &rel_path)
            .map_err(|e| Error::resolving(label.clone(), e))?;
        self.nodes.insert(label.clone(), NodeState::Done(info));
        Ok(label)
    }

    fn resolve_package(&mut self, package: &Package, label: &str, rel_path: &Path) -> Result<PackageInfo> {
        let resolver = self.resolver;

        let mut raw_runtime_deps = resolver.dependencies(package, "RDEPEND")?;
        let mut raw_build_deps = Vec::new();
        for var in package.eapi()?.build_dependency_vars() {
            raw_build_deps.extend(resolver.dependencies(package, var)?);
        }
        let raw_post_deps = resolver.dependencies(package, "PDEPEND")?;
        if !raw_post_deps.is_empty() {
            self.post_deps.push_back((label.to_string(), raw_post_deps));
        }

        // Source-only Rust crates list their dependencies in DEPEND, but
        // dependents need them at runtime too.
        if is_rust_source_package(package) {
            raw_runtime_deps.extend(raw_build_deps.iter().cloned());
        }

        let runtime_deps = self.resolve_deps(&raw_runtime_deps)?;
        if !runtime_deps.is_empty() {
            debug!("  R: {}", runtime_deps.join(", "));
        }
        let build_deps = self.resolve_deps(&raw_build_deps)?;
        if !build_deps.is_empty() {
            debug!("  B: {}", build_deps.join(", "));
        }

        let local_src = local_source::extract_local_sources(package)?;
        if !local_src.is_empty() {
            debug!("  S: {}", local_src.join(", "));
        }
        let src_uris = src_uri::extract_uris(package)?;

        Ok(PackageInfo {
            name: package.name().to_string(),
            main_slot: package.main_slot().to_string(),
            ebuild_path: rel_path.display().to_string(),
            version: package.version().to_string(),
            build_deps,
            local_src,
            runtime_deps,
            src_uris,
            post_deps: Vec::new(),
        })
    }

    /// Sorted, unique labels of `atoms`.
    fn resolve_deps(&mut self, atoms: &[Atom]) -> Result<Vec<String>> {
        let mut labels = BTreeSet::new();
        for atom in atoms {
            labels.insert(self.resolve_atom(atom)?);
        }
        Ok(labels.into_iter().collect())
    }

    /// Drain the post-dependency queue; resolving an entry may queue more.
    fn resolve_post_deps(&mut self) -> Result<()> {
        while let Some((label, atoms)) = self.post_deps.pop_front() {
            info!("P: {label}");
            let post_deps = self
                .resolve_deps(&atoms)
                .map_err(|e| Error::resolving(format!("{label} (PDEPEND)"), e))?;
            if let Some(NodeState::Done(info)) = self.nodes.get_mut(&label) {
                info.post_deps = post_deps;
            }
        }
        Ok(())
    }

    fn into_infos(self) -> PackageInfoMap {
        self.nodes
            .into_iter()
            .filter_map(|(label, state)| match state {
                NodeState::Done(info) => Some((label, info)),
                NodeState::InProgress => None,
            })
            .collect()
    }
}

fn is_rust_source_package(package: &Package) -> bool {
    package.uses_eclass("cros-rust")
        && !package.uses_eclass("cros-workon")
        && package.metadata().value("HAS_SRC_COMPILE") == "0"
}
