//! Ebuild repositories (overlays) and the ordered set of them.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::config::parse_lines;
use crate::error::{Error, Result};
use crate::profile::{Profile, ProfileResolver};
use crate::version::Version;

const EBUILD_EXT: &str = ".ebuild";

/// An ebuild file found in a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPackage {
    pub path: PathBuf,
    pub version: Version,
}

/// A single overlay.
#[derive(Debug)]
pub struct Repo {
    root: PathBuf,
    name: String,
    eapi: String,
    profiles: RwLock<HashMap<PathBuf, Arc<Profile>>>,
}

impl Repo {
    /// Read the repository metadata under `root`.
    ///
    /// The name comes from `profiles/repo_name`, then `repo-name` in
    /// `metadata/layout.conf`, and is synthesized as `x-<dirname>` when both
    /// are missing.
    pub fn load(root: impl Into<PathBuf>) -> Result<Repo> {
        let root = root.into();
        let layout = read_layout_conf(&root.join("metadata/layout.conf"))?;

        let name = match read_single_line(&root.join("profiles/repo_name"))? {
            Some(name) => name,
            None => layout.get("repo-name").cloned().unwrap_or_default(),
        };
        let name = if name.is_empty() {
            let dirname = root
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            format!("x-{dirname}")
        } else {
            name
        };

        let eapi = read_single_line(&root.join("profiles/eapi"))?.unwrap_or_else(|| "0".to_string());

        Ok(Repo {
            root,
            name,
            eapi,
            profiles: RwLock::new(HashMap::new()),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default EAPI of the repository's profiles.
    pub fn eapi(&self) -> &str {
        &self.eapi
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    /// Ebuilds of `package_name` (`category/package`), newest first.
    ///
    /// Files whose version does not parse are skipped with a warning.
    pub fn packages(&self, package_name: &str) -> Result<Vec<RepoPackage>> {
        let package_dir = self.root.join(package_name);
        let entries = match fs::read_dir(&package_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&package_dir, e)),
        };

        let short_name = package_name.rsplit('/').next().unwrap_or(package_name);
        let prefix = format!("{short_name}-");

        let mut packages = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&package_dir, e))?;
            let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
            if !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(version_str) = file_name
                .to_str()
                .and_then(|s| s.strip_prefix(&prefix))
                .and_then(|s| s.strip_suffix(EBUILD_EXT))
            else {
                continue;
            };

            let path = entry.path();
            match version_str.parse::<Version>() {
                Ok(version) => packages.push(RepoPackage { path, version }),
                Err(_) => warn!("Ignored ebuild: invalid version: {}", path.display()),
            }
        }

        packages.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.path.cmp(&b.path)));
        Ok(packages)
    }

    /// The profile at `rel_path` under `profiles/`, loaded once and cached.
    ///
    /// The cache lock is not held while parents are resolved, since they may
    /// live in this same repository.
    pub fn profile(&self, rel_path: &str, resolver: &dyn ProfileResolver) -> Result<Arc<Profile>> {
        let key = clean_path(Path::new(rel_path.trim_end_matches('/')));
        if key.is_absolute() || key.starts_with("..") {
            return Err(Error::ProfileNotFound(format!(
                "{}:{rel_path}: invalid profile path",
                self.name
            )));
        }

        if let Some(profile) = self.profiles.read().get(&key) {
            return Ok(Arc::clone(profile));
        }

        let name = format!("{}:{}", self.name, key.display());
        let profile = Arc::new(Profile::load(&self.profiles_dir().join(&key), &name, resolver)?);

        self.profiles
            .write()
            .entry(key)
            .or_insert_with(|| Arc::clone(&profile));
        Ok(profile)
    }
}

/// Repositories in priority order, lowest first.
#[derive(Debug, Default)]
pub struct RepoSet {
    repos: Vec<Repo>,
}

impl RepoSet {
    pub fn new(repos: Vec<Repo>) -> RepoSet {
        RepoSet { repos }
    }

    /// Load every repository in `roots`.
    pub fn load<P: AsRef<Path>>(roots: &[P]) -> Result<RepoSet> {
        let repos = roots
            .iter()
            .map(|root| {
                let root = root.as_ref();
                Repo::load(root).map_err(|e| Error::Repository {
                    path: root.to_path_buf(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<_>>()?;
        Ok(RepoSet { repos })
    }

    pub fn repos(&self) -> &[Repo] {
        &self.repos
    }

    /// Look up a repository by name. The last one wins on duplicates.
    pub fn get(&self, name: &str) -> Option<&Repo> {
        self.repos.iter().rev().find(|repo| repo.name() == name)
    }

    /// Resolve a `repo-name:relative/path` profile name.
    pub fn profile(&self, name: &str) -> Result<Arc<Profile>> {
        let (repo_name, rel_path) = name.split_once(':').ok_or_else(|| {
            Error::ProfileNotFound(format!(
                "{name}: must be <repo-name>:<profile-path>"
            ))
        })?;
        let repo = self.get(repo_name).ok_or_else(|| {
            Error::ProfileNotFound(format!("{name}: repository {repo_name} does not exist"))
        })?;
        repo.profile(rel_path, self)
    }

    /// Resolve the profile at an absolute (or working-directory relative)
    /// path by finding the repository whose `profiles/` contains it.
    pub fn profile_by_path(&self, path: &Path) -> Result<Arc<Profile>> {
        let path = if path.is_absolute() {
            clean_path(path)
        } else {
            let cwd = env::current_dir().map_err(|e| Error::io(path, e))?;
            clean_path(&cwd.join(path))
        };

        for repo in &self.repos {
            if let Ok(rel) = path.strip_prefix(repo.profiles_dir()) {
                if rel.as_os_str().is_empty() {
                    continue;
                }
                return repo.profile(&rel.to_string_lossy(), self);
            }
        }
        Err(Error::ProfileNotFound(format!(
            "{}: not under a known repository",
            path.display()
        )))
    }

    /// `eclass/` directories in priority order.
    pub fn eclass_dirs(&self) -> Vec<PathBuf> {
        self.repos
            .iter()
            .map(|repo| repo.root_dir().join("eclass"))
            .collect()
    }

    /// Ebuilds of `package_name` from every repository, each repository's
    /// list newest first.
    pub fn packages(&self, package_name: &str) -> Result<Vec<RepoPackage>> {
        let mut packages = Vec::new();
        for repo in &self.repos {
            packages.extend(repo.packages(package_name)?);
        }
        Ok(packages)
    }
}

impl ProfileResolver for RepoSet {
    fn resolve_profile(&self, reference: &str, base: &Path) -> Result<Arc<Profile>> {
        if reference.contains(':') {
            self.profile(reference)
        } else {
            self.profile_by_path(&base.join(reference))
        }
    }
}

/// Lexically normalize `path`, resolving `.` and `..` without touching the
/// filesystem.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn read_single_line(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

fn read_layout_conf(path: &Path) -> Result<HashMap<String, String>> {
    parse_lines(path)?
        .into_iter()
        .map(|(n, line)| {
            let (key, value) = line.split_once('=').ok_or_else(|| Error::Syntax {
                location: format!("{}:{n}", path.display()),
                message: "expected key = value".to_string(),
            })?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn repo_name_sources() {
        let tmp = tempfile::tempdir().unwrap();

        let a = tmp.path().join("a");
        write(&a.join("profiles/repo_name"), "alpha\n");
        write(&a.join("metadata/layout.conf"), "repo-name = ignored\n");
        write(&a.join("profiles/eapi"), "7\n");

        let b = tmp.path().join("b");
        write(&b.join("metadata/layout.conf"), "# comment\nmasters = gentoo\nrepo-name = beta\n");

        let c = tmp.path().join("overlay-c");
        fs::create_dir_all(&c).unwrap();

        let repos = RepoSet::load(&[&a, &b, &c]).unwrap();
        let names: Vec<&str> = repos.repos().iter().map(Repo::name).collect();
        assert_eq!(names, ["alpha", "beta", "x-overlay-c"]);
        assert_eq!(repos.repos()[0].eapi(), "7");
        assert_eq!(repos.repos()[1].eapi(), "0");
        assert!(repos.get("beta").is_some());
        assert!(repos.get("gamma").is_none());
    }

    #[test]
    fn corrupted_layout_conf() {
        let tmp = tempfile::tempdir().unwrap();
        write(&tmp.path().join("metadata/layout.conf"), "no equals sign\n");
        assert!(matches!(
            RepoSet::load(&[tmp.path()]),
            Err(Error::Repository { .. })
        ));
    }

    #[test]
    fn packages_sorted_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("dev-libs/foo");
        for name in [
            "foo-1.0.ebuild",
            "foo-1.10.ebuild",
            "foo-1.2-r1.ebuild",
            "foo-bad.ebuild",
            "foo-1.5.tar.gz",
            "Manifest",
            "bar-9.ebuild",
        ] {
            write(&dir.join(name), "");
        }
        fs::create_dir_all(dir.join("files")).unwrap();

        let repo = Repo::load(tmp.path()).unwrap();
        let versions: Vec<String> = repo
            .packages("dev-libs/foo")
            .unwrap()
            .iter()
            .map(|p| p.version.to_string())
            .collect();
        assert_eq!(versions, ["1.10", "1.2-r1", "1.0"]);
        assert!(repo.packages("dev-libs/missing").unwrap().is_empty());
    }

    #[test]
    fn profiles_resolve_across_repositories() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("base");
        let board = tmp.path().join("board");
        write(&base.join("profiles/repo_name"), "base\n");
        write(&base.join("profiles/default/linux/make.defaults"), "ARCH=amd64\n");
        write(&base.join("profiles/targets/make.defaults"), "USE=\"t\"\n");
        write(&board.join("profiles/repo_name"), "board\n");
        write(
            &board.join("profiles/main/parent"),
            "base:default/linux\n../extra\n",
        );
        write(&board.join("profiles/extra/parent"), "base:targets/\n");

        let repos = RepoSet::load(&[&base, &board]).unwrap();
        let profile = repos.profile_by_path(&board.join("profiles/main")).unwrap();
        assert_eq!(profile.name(), "board:main");
        let parents: Vec<&str> = profile.parents().iter().map(|p| p.name()).collect();
        assert_eq!(parents, ["base:default/linux", "board:extra"]);
        assert_eq!(profile.parents()[1].parents()[0].name(), "base:targets");

        // Cached: the same node comes back.
        let again = repos.profile("board:main").unwrap();
        assert!(Arc::ptr_eq(&profile, &again));

        assert!(matches!(
            repos.profile("board:../escape"),
            Err(Error::ProfileNotFound(_))
        ));
        assert!(matches!(repos.profile("nope"), Err(Error::ProfileNotFound(_))));
        assert!(matches!(
            repos.profile_by_path(&tmp.path().join("elsewhere")),
            Err(Error::ProfileNotFound(_))
        ));

        let eclass_dirs = repos.eclass_dirs();
        assert_eq!(eclass_dirs, [base.join("eclass"), board.join("eclass")]);
    }

    #[test]
    fn clean_paths() {
        assert_eq!(clean_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(clean_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(clean_path(Path::new("/..")), PathBuf::from("/"));
    }
}
