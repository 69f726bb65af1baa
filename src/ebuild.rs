//! Ebuild metadata evaluation.
//!
//! Metadata is taken from the repository's `metadata/md5-cache` when an
//! entry exists, and otherwise by evaluating the ebuild with the restricted
//! shell evaluator. Either way the result is layered on top of the global
//! configuration variables and the package variables (`P`, `PN`, ...), and
//! the effective USE flags are computed from `IUSE` defaults, the
//! configuration cascade and the USE masks and forces.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::atom::UseFlags;
use crate::cache::CacheEntry;
use crate::config::{ConfigSource, FlagStates, PackageRef};
use crate::error::{Error, Result};
use crate::iuse::IUse;
use crate::makevars::Vars;
use crate::shell;
use crate::version::Version;

const EBUILD_EXT: &str = ".ebuild";
const MD5_CACHE_DIR: &str = "metadata/md5-cache";

/// Evaluated metadata of one ebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbuildInfo {
    /// Every variable visible after evaluation, configuration included.
    pub metadata: Vars,
    /// Effective USE flags.
    pub use_flags: UseFlags,
}

/// Reads ebuild metadata.
pub trait EbuildReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Arc<EbuildInfo>>;
}

/// Evaluates ebuilds against a configuration cascade.
pub struct Processor {
    config: Arc<dyn ConfigSource>,
}

impl Processor {
    pub fn new(config: Arc<dyn ConfigSource>) -> Processor {
        Processor { config }
    }

    fn read_info(&self, path: &Path) -> Result<EbuildInfo> {
        let package = extract_package(path)?;

        let mut env = Vars::new();
        self.config.eval_global_vars(&mut env)?;
        env.extend(&package_vars(&package));

        let metadata = match md5_cache_path(path, &package) {
            Some(cache_path) if cache_path.is_file() => {
                debug!("Using metadata cache {}", cache_path.display());
                let contents =
                    fs::read_to_string(&cache_path).map_err(|e| Error::io(&cache_path, e))?;
                let entry = CacheEntry::parse(&contents)
                    .map_err(|e| Error::resolving(cache_path.display().to_string(), e))?;
                env.extend(&entry.into_vars());
                env
            }
            _ => {
                let assigned = shell::eval_ebuild(path, &mut env)?;
                env.extend(&assigned);
                env
            }
        };

        let use_flags = compute_use_flags(&package, self.config.as_ref(), &metadata)?;
        Ok(EbuildInfo {
            metadata,
            use_flags,
        })
    }
}

impl EbuildReader for Processor {
    fn read(&self, path: &Path) -> Result<Arc<EbuildInfo>> {
        self.read_info(path).map(Arc::new).map_err(|e| {
            Error::resolving(format!("reading ebuild metadata: {}", path.display()), e)
        })
    }
}

type CachedRead = std::result::Result<Arc<EbuildInfo>, Arc<Error>>;

/// Memoizes the reads of another [`EbuildReader`], failures included.
pub struct CachedReader<R> {
    inner: R,
    cache: Mutex<HashMap<PathBuf, CachedRead>>,
}

impl<R: EbuildReader> CachedReader<R> {
    pub fn new(inner: R) -> CachedReader<R> {
        CachedReader {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl<R: EbuildReader> EbuildReader for CachedReader<R> {
    fn read(&self, path: &Path) -> Result<Arc<EbuildInfo>> {
        if let Some(cached) = self.cache.lock().get(path) {
            return cached.clone().map_err(Error::Shared);
        }
        let read = self.inner.read(path).map_err(Arc::new);
        self.cache.lock().insert(path.to_path_buf(), read.clone());
        read.map_err(Error::Shared)
    }
}

/// Derive the package name and version from
/// `<category>/<package>/<package>-<version>.ebuild`.
pub fn extract_package(path: &Path) -> Result<PackageRef> {
    let invalid = |message: &str| Error::Repository {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid("invalid ebuild path"))?;
    let stem = file_name
        .strip_suffix(EBUILD_EXT)
        .ok_or_else(|| invalid("must have suffix .ebuild"))?;

    let mut dirs = path.ancestors().skip(1).filter_map(|p| p.file_name()?.to_str());
    let (Some(short_name), Some(category)) = (dirs.next(), dirs.next()) else {
        return Err(invalid("ebuild must live in <category>/<package>/"));
    };

    let (prefix, version) = Version::extract_suffix(stem)?;
    let name = prefix
        .strip_suffix('-')
        .ok_or_else(|| invalid("invalid package name"))?;
    if name != short_name {
        return Err(invalid("ebuild name mismatch with directory name"));
    }

    Ok(PackageRef {
        name: format!("{category}/{short_name}"),
        version,
    })
}

/// The variables PMS predefines for an ebuild.
///
/// ```
/// use portage_depgraph::config::PackageRef;
/// use portage_depgraph::ebuild::package_vars;
///
/// let vars = package_vars(&PackageRef {
///     name: "sys-apps/foo".to_string(),
///     version: "1.2-r3".parse().unwrap(),
/// });
/// assert_eq!(vars.value("P"), "foo-1.2");
/// assert_eq!(vars.value("PF"), "foo-1.2-r3");
/// assert_eq!(vars.value("PR"), "r3");
/// ```
pub fn package_vars(package: &PackageRef) -> Vars {
    let (category, short_name) = package
        .name
        .split_once('/')
        .unwrap_or(("", package.name.as_str()));
    let pv = package.version.drop_revision().to_string();
    let pvr = package.version.to_string();
    [
        ("P", format!("{short_name}-{pv}")),
        ("PF", format!("{short_name}-{pvr}")),
        ("PN", short_name.to_string()),
        ("CATEGORY", category.to_string()),
        ("PR", format!("r{}", package.version.revision().unwrap_or("0"))),
        ("PV", pv),
        ("PVR", pvr),
    ]
    .into_iter()
    .collect()
}

fn md5_cache_path(ebuild: &Path, package: &PackageRef) -> Option<PathBuf> {
    let repo_root = ebuild.parent()?.parent()?.parent()?;
    let (category, short_name) = package.name.split_once('/')?;
    Some(
        repo_root
            .join(MD5_CACHE_DIR)
            .join(category)
            .join(format!("{short_name}-{}", package.version)),
    )
}

/// Effective USE flags: `IUSE` defaults, then the configuration layers,
/// finalized; masked flags are removed and forced ones added.
///
/// Flags are not restricted to `IUSE` since `USE_EXPAND` groups are not
/// expanded.
pub fn compute_use_flags(
    package: &PackageRef,
    config: &dyn ConfigSource,
    metadata: &Vars,
) -> Result<UseFlags> {
    let mut layers: Vec<Vars> = vec![[("USE", IUse::default_use(metadata.value("IUSE"))?)]
        .into_iter()
        .collect()];
    let mut env = Vars::new();
    layers.extend(config.eval_package_vars(package, &mut env)?);
    let vars = Vars::finalize(&layers);

    let mut masks = FlagStates::new();
    let mut forces = FlagStates::new();
    config.use_masks_and_forces(package, &mut masks, &mut forces)?;
    let masked = |flag: &str| masks.get(flag).copied().unwrap_or(false);

    let mut use_flags: UseFlags = vars
        .list("USE")
        .into_iter()
        .filter(|flag| !masked(flag))
        .map(str::to_string)
        .collect();
    use_flags.extend(
        forces
            .iter()
            .filter(|(flag, forced)| **forced && !masked(flag))
            .map(|(flag, _)| flag.clone()),
    );
    Ok(use_flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::config::{Bundle, HackSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Masks `masked` and forces `forced` for every package.
    struct FlagSource {
        masked: &'static str,
        forced: &'static str,
    }

    impl ConfigSource for FlagSource {
        fn eval_global_vars(&self, _env: &mut Vars) -> Result<Vec<Vars>> {
            Ok(Vec::new())
        }

        fn eval_package_vars(&self, _package: &PackageRef, _env: &mut Vars) -> Result<Vec<Vars>> {
            Ok(Vec::new())
        }

        fn use_masks_and_forces(
            &self,
            _package: &PackageRef,
            masks: &mut FlagStates,
            forces: &mut FlagStates,
        ) -> Result<()> {
            masks.insert(self.masked.to_string(), true);
            forces.insert(self.forced.to_string(), true);
            Ok(())
        }

        fn package_masks(&self) -> Result<Vec<Atom>> {
            Ok(Vec::new())
        }

        fn provided_packages(&self) -> Result<Vec<PackageRef>> {
            Ok(Vec::new())
        }
    }

    fn config(use_flags: &str) -> Arc<dyn ConfigSource> {
        let mut bundle = Bundle::default();
        bundle.push(HackSource::new(use_flags, Vec::new()));
        bundle.push(FlagSource {
            masked: "masked",
            forced: "forced",
        });
        Arc::new(bundle)
    }

    #[test]
    fn extract_package_from_path() {
        let package = extract_package(Path::new("/repo/dev-libs/foo-bar/foo-bar-1.2_rc3-r1.ebuild")).unwrap();
        assert_eq!(package.name, "dev-libs/foo-bar");
        assert_eq!(package.version.to_string(), "1.2_rc3-r1");

        for bad in [
            "/repo/dev-libs/foo/bar-1.0.ebuild",
            "/repo/dev-libs/foo/foo-1.0.tar.gz",
            "/repo/dev-libs/foo/foo1.0.ebuild",
            "foo-1.0.ebuild",
        ] {
            assert!(extract_package(Path::new(bad)).is_err(), "{bad}");
        }
    }

    #[test]
    fn package_vars_without_revision() {
        let vars = package_vars(&PackageRef {
            name: "dev-libs/foo".to_string(),
            version: "2.0".parse().unwrap(),
        });
        assert_eq!(vars.value("PR"), "r0");
        assert_eq!(vars.value("PVR"), "2.0");
        assert_eq!(vars.value("CATEGORY"), "dev-libs");
        assert_eq!(vars.value("PN"), "foo");
    }

    #[test]
    fn use_flags_from_iuse_config_and_forces() {
        let package = PackageRef {
            name: "dev-libs/foo".to_string(),
            version: "1".parse().unwrap(),
        };
        let metadata: Vars = [("IUSE", "+ssl +debug masked test")].into_iter().collect();
        let flags = compute_use_flags(&package, config("-debug test masked").as_ref(), &metadata).unwrap();
        let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
        assert_eq!(flags, ["forced", "ssl", "test"]);
    }

    #[test]
    fn read_evaluates_ebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let ebuild = tmp.path().join("dev-libs/foo/foo-1.0-r2.ebuild");
        write(
            &ebuild,
            "EAPI=7\ninherit cros-workon\nSLOT=\"0/${PVR}\"\nIUSE=\"+zlib\"\nRDEPEND=\"zlib? ( sys-libs/zlib )\"\n",
        );

        let processor = Processor::new(config("ipv6"));
        let info = processor.read(&ebuild).unwrap();
        assert_eq!(info.metadata.value("SLOT"), "0/1.0-r2");
        assert_eq!(info.metadata.value("INHERITED"), "cros-workon");
        assert_eq!(info.metadata.value("USE"), "ipv6");
        let flags: Vec<&str> = info.use_flags.iter().map(String::as_str).collect();
        assert_eq!(flags, ["forced", "ipv6", "zlib"]);
    }

    #[test]
    fn read_prefers_md5_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let ebuild = tmp.path().join("dev-libs/foo/foo-1.0.ebuild");
        // Not parseable by the restricted evaluator.
        write(&ebuild, "src_compile() { emake; }\n");
        write(
            &tmp.path().join("metadata/md5-cache/dev-libs/foo-1.0"),
            "EAPI=7\nSLOT=0\nDEPEND=dev-libs/bar\n_eclasses_=toolchain-funcs\tabc\n",
        );

        let info = Processor::new(config("")).read(&ebuild).unwrap();
        assert_eq!(info.metadata.value("DEPEND"), "dev-libs/bar");
        assert_eq!(info.metadata.value("INHERITED"), "toolchain-funcs");
        assert_eq!(info.metadata.value("PF"), "foo-1.0");
    }

    #[test]
    fn read_errors_carry_the_path() {
        let tmp = tempfile::tempdir().unwrap();
        let ebuild = tmp.path().join("dev-libs/foo/foo-1.0.ebuild");
        write(&ebuild, "src_compile() { emake; }\n");
        let err = Processor::new(config("")).read(&ebuild).unwrap_err();
        assert!(err.to_string().starts_with("reading ebuild metadata: "));
        assert!(matches!(err.root_cause(), Error::Syntax { .. }));
    }

    /// Counts reads; paths starting with `bad` fail.
    struct CountingReader(AtomicUsize);

    impl EbuildReader for CountingReader {
        fn read(&self, path: &Path) -> Result<Arc<EbuildInfo>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if path.starts_with("bad") {
                return Err(Error::Syntax {
                    location: path.display().to_string(),
                    message: "unexpected token".to_string(),
                });
            }
            Ok(Arc::new(EbuildInfo {
                metadata: Vars::new(),
                use_flags: UseFlags::new(),
            }))
        }
    }

    #[test]
    fn cached_reader_reads_once() {
        let reader = CachedReader::new(CountingReader(AtomicUsize::new(0)));
        let a = reader.read(Path::new("a.ebuild")).unwrap();
        let b = reader.read(Path::new("a.ebuild")).unwrap();
        reader.read(Path::new("b.ebuild")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reader.inner.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cached_reader_remembers_failures() {
        let reader = CachedReader::new(CountingReader(AtomicUsize::new(0)));
        for _ in 0..2 {
            let err = reader.read(Path::new("bad/foo-1.ebuild")).unwrap_err();
            assert!(matches!(err.root_cause(), Error::Syntax { location, .. } if location == "bad/foo-1.ebuild"));
        }
        assert_eq!(reader.inner.0.load(Ordering::SeqCst), 1);
    }
}
