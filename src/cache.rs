use crate::eapi::Eapi;
use crate::error::Result;
use crate::makevars::Vars;

const MD5_KEY: &str = "_md5_";
const ECLASSES_KEY: &str = "_eclasses_";

/// A parsed md5-cache entry.
///
/// Represents a single file from `metadata/md5-cache/<category>/<package>-<version>`:
/// the variables an ebuild sets, precomputed by the package manager so the
/// ebuild does not have to be sourced.
///
/// See [PMS 14.2](https://projects.gentoo.org/pms/9/pms.html#mddict-cache-file-format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Metadata variables (`EAPI`, `SLOT`, `DEPEND`, ...).
    pub vars: Vars,

    /// MD5 checksum of the ebuild file (from `_md5_`).
    pub md5: Option<String>,

    /// Eclass inheritance list with checksums (from `_eclasses_`).
    pub eclasses: Vec<(String, String)>,
}

impl CacheEntry {
    /// Parse the contents of a cache file.
    ///
    /// Lines are `KEY=VALUE` pairs in arbitrary order; lines without `=` are
    /// ignored. The `EAPI` is validated.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::CacheEntry;
    ///
    /// let input = "\
    /// EAPI=7
    /// SLOT=0/1
    /// RDEPEND=dev-libs/a
    /// _eclasses_=cros-workon\tabc123
    /// ";
    /// let entry = CacheEntry::parse(input).unwrap();
    /// assert_eq!(entry.vars.value("RDEPEND"), "dev-libs/a");
    /// assert_eq!(entry.eclasses[0].0, "cros-workon");
    /// ```
    pub fn parse(input: &str) -> Result<CacheEntry> {
        let mut vars = Vars::new();
        let mut md5 = None;
        let mut eclasses = Vec::new();

        for line in input.lines() {
            let line = line.trim_end();
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                MD5_KEY => md5 = Some(value.to_string()),
                ECLASSES_KEY => eclasses = parse_eclasses(value),
                _ => vars.insert(key, value),
            }
        }

        Eapi::of_ebuild(vars.get("EAPI"))?;

        Ok(CacheEntry {
            vars,
            md5,
            eclasses,
        })
    }

    /// The metadata variables, with `INHERITED` filled in from `_eclasses_`
    /// when the cache omits it.
    pub fn into_vars(self) -> Vars {
        let mut vars = self.vars;
        if !vars.contains("INHERITED") && !self.eclasses.is_empty() {
            let names: Vec<&str> = self.eclasses.iter().map(|(name, _)| name.as_str()).collect();
            vars.insert("INHERITED", names.join(" "));
        }
        vars
    }
}

/// Parse the `_eclasses_` value: tab-separated pairs of `name\tchecksum`.
fn parse_eclasses(s: &str) -> Vec<(String, String)> {
    let parts: Vec<&str> = s.split('\t').filter(|p| !p.is_empty()).collect();
    parts
        .chunks_exact(2)
        .map(|chunk| (chunk[0].to_string(), chunk[1].to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const EXAMPLE_CACHE: &str = "\
DEFINED_PHASES=install test unpack
DEPEND=>=sys-devel/clang-10.0.0_rc1:* dev-python/setuptools
DESCRIPTION=Python bindings for sys-devel/clang
EAPI=7
IUSE=test +python_targets_python3_6
KEYWORDS=~amd64 ~x86
RDEPEND=>=sys-devel/clang-10.0.0_rc1:*
SLOT=0
_eclasses_=llvm.org\t4e92abc\tmultibuild\t40fe1234
_md5_=4539d849d3cea8ac84debad9b3154143
";

    #[test]
    fn parse_example() {
        let entry = CacheEntry::parse(EXAMPLE_CACHE).unwrap();
        assert_eq!(entry.vars.value("EAPI"), "7");
        assert_eq!(entry.vars.value("KEYWORDS"), "~amd64 ~x86");
        assert_eq!(
            entry.vars.value("DEPEND"),
            ">=sys-devel/clang-10.0.0_rc1:* dev-python/setuptools"
        );
        assert!(!entry.vars.contains(MD5_KEY));
        assert_eq!(
            entry.md5.as_deref(),
            Some("4539d849d3cea8ac84debad9b3154143")
        );
        assert_eq!(entry.eclasses.len(), 2);

        let vars = entry.into_vars();
        assert_eq!(vars.value("INHERITED"), "llvm.org multibuild");
    }

    #[test]
    fn explicit_inherited_is_kept() {
        let entry = CacheEntry::parse("INHERITED=a b\n_eclasses_=c\t1\n").unwrap();
        assert_eq!(entry.into_vars().value("INHERITED"), "a b");
    }

    #[test]
    fn invalid_eapi() {
        let err = CacheEntry::parse("EAPI=prefix\nSLOT=0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidEapi(ref s) if s == "prefix"));
    }

    #[test]
    fn eclasses_odd_count() {
        // The trailing name without a checksum is dropped.
        let eclasses = parse_eclasses("llvm.org\tabc123\torphan");
        assert_eq!(eclasses, [("llvm.org".to_string(), "abc123".to_string())]);
        assert!(parse_eclasses("").is_empty());
    }

    #[test]
    fn empty_values_and_junk_lines() {
        let entry = CacheEntry::parse("\nSLOT=\nnot a pair\n").unwrap();
        assert_eq!(entry.vars.get("SLOT"), Some(""));
        assert_eq!(entry.vars.len(), 1);
    }
}
