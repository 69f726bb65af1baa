use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::version::Version;

/// A set of enabled USE flags.
pub type UseFlags = BTreeSet<String>;

/// Version comparison operator of an atom.
///
/// See [PMS 8.3.1](https://projects.gentoo.org/pms/9/pms.html#operators).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionOperator {
    /// No operator: any version.
    None,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `=` (with optional trailing `*`)
    Equal,
    /// `~`: equal ignoring the revision.
    Approximate,
    /// `>=`
    GreaterEqual,
    /// `>`
    Greater,
}

impl VersionOperator {
    // Two-character operators come first so that `<=` wins over `<`.
    const PREFIXES: [(&'static str, VersionOperator); 6] = [
        ("<=", VersionOperator::LessEqual),
        ("<", VersionOperator::Less),
        ("=", VersionOperator::Equal),
        ("~", VersionOperator::Approximate),
        (">=", VersionOperator::GreaterEqual),
        (">", VersionOperator::Greater),
    ];

    fn strip(s: &str) -> (VersionOperator, &str) {
        Self::PREFIXES
            .iter()
            .find_map(|(prefix, op)| s.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((VersionOperator::None, s))
    }

    /// The operator as written.
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionOperator::None => "",
            VersionOperator::Less => "<",
            VersionOperator::LessEqual => "<=",
            VersionOperator::Equal => "=",
            VersionOperator::Approximate => "~",
            VersionOperator::GreaterEqual => ">=",
            VersionOperator::Greater => ">",
        }
    }
}

impl fmt::Display for VersionOperator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A USE dependency such as `ssl(+)` or `-debug`, kept verbatim.
///
/// USE dependencies are carried through parsing and formatting but are not
/// evaluated by [`Atom::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UseDependency {
    raw: String,
}

impl UseDependency {
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for UseDependency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A concrete package an [`Atom`] can be tested against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPackage {
    /// `category/package`
    pub name: String,
    pub version: Version,
    /// Slot without the sub-slot; empty when unknown.
    pub main_slot: String,
    pub use_flags: UseFlags,
}

/// A package dependency specification.
///
/// ```text
/// [op]category/package[-version[*]][:slot][[use,deps]]
/// ```
///
/// See [PMS 8.3](https://projects.gentoo.org/pms/9/pms.html#package-dependency-specifications).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    name: String,
    op: VersionOperator,
    version: Option<Version>,
    wildcard: bool,
    slot_dep: String,
    use_deps: Vec<UseDependency>,
}

impl Atom {
    /// An atom matching any version of `name`.
    ///
    /// The name is not validated; use [`FromStr`] for untrusted input.
    pub fn any_version(name: impl Into<String>) -> Atom {
        Atom {
            name: name.into(),
            op: VersionOperator::None,
            version: None,
            wildcard: false,
            slot_dep: String::new(),
            use_deps: Vec::new(),
        }
    }

    /// `category/package`
    pub fn package_name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        self.name.split('/').next().unwrap_or(&self.name)
    }

    pub fn operator(&self) -> VersionOperator {
        self.op
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Whether the version ends in `*` (only with `=`).
    pub fn wildcard(&self) -> bool {
        self.wildcard
    }

    /// Slot dependency as written after `:`, empty if absent.
    pub fn slot_dep(&self) -> &str {
        &self.slot_dep
    }

    pub fn use_deps(&self) -> &[UseDependency] {
        &self.use_deps
    }

    /// Whether `target` satisfies this atom.
    ///
    /// Only the main slot of a slot dependency is compared; sub-slots and
    /// USE dependencies are not checked.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::{Atom, TargetPackage, UseFlags};
    ///
    /// let atom: Atom = "=dev-rust/atomic-polyfill-0.1*".parse().unwrap();
    /// let target = TargetPackage {
    ///     name: "dev-rust/atomic-polyfill".to_string(),
    ///     version: "0.1.0".parse().unwrap(),
    ///     main_slot: "0".to_string(),
    ///     use_flags: UseFlags::new(),
    /// };
    /// assert!(atom.matches(&target));
    /// ```
    pub fn matches(&self, target: &TargetPackage) -> bool {
        if target.name != self.name {
            return false;
        }
        if !matches!(self.slot_dep.as_str(), "" | "*" | "=") {
            let slot = self.slot_dep.trim_end_matches('=');
            let main_slot = slot.split('/').next().unwrap_or(slot);
            if target.main_slot != main_slot {
                return false;
            }
        }

        let Some(want) = &self.version else {
            return true;
        };
        let have = &target.version;
        match self.op {
            VersionOperator::None => true,
            VersionOperator::Less => have < want,
            VersionOperator::LessEqual => have <= want,
            VersionOperator::Equal if self.wildcard => have.has_prefix(want),
            VersionOperator::Equal => have == want,
            VersionOperator::Approximate => have.drop_revision() == *want,
            VersionOperator::GreaterEqual => have >= want,
            VersionOperator::Greater => have > want,
        }
    }
}

impl FromStr for Atom {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let invalid = |msg: &str| Error::InvalidAtom(format!("{input}: {msg}"));
        let mut rest = input;

        let mut use_deps = Vec::new();
        if let Some(body) = rest.strip_suffix(']') {
            let (head, deps) = body
                .split_once('[')
                .ok_or_else(|| invalid("invalid use dependencies"))?;
            use_deps = deps
                .split(',')
                .map(|raw| UseDependency {
                    raw: raw.to_string(),
                })
                .collect();
            rest = head;
        }

        let mut slot_dep = String::new();
        if let Some((head, slot)) = rest.split_once(':') {
            slot_dep = slot.to_string();
            rest = head;
        }

        let (op, after_op) = VersionOperator::strip(rest);
        rest = after_op;

        let mut version = None;
        let mut wildcard = false;
        if op != VersionOperator::None {
            if let Some(head) = rest.strip_suffix('*') {
                if op != VersionOperator::Equal {
                    return Err(invalid("wildcard is only allowed with '='"));
                }
                wildcard = true;
                rest = head;
            }
            let (head, ver) = Version::extract_suffix(rest)
                .map_err(|e| Error::InvalidAtom(format!("{input}: {e}")))?;
            rest = head
                .strip_suffix('-')
                .ok_or_else(|| invalid("missing '-' before version"))?;
            version = Some(ver);
        }

        check_category_and_package(rest).map_err(|e| Error::InvalidAtom(format!("{input}: {e}")))?;

        Ok(Atom {
            name: rest.to_string(),
            op,
            version,
            wildcard,
            slot_dep,
            use_deps,
        })
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.op, self.name)?;
        if let Some(ver) = &self.version {
            write!(f, "-{ver}")?;
            if self.wildcard {
                write!(f, "*")?;
            }
        }
        if !self.slot_dep.is_empty() {
            write!(f, ":{}", self.slot_dep)?;
        }
        if !self.use_deps.is_empty() {
            write!(f, "[")?;
            for (i, dep) in self.use_deps.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{dep}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Validate a category name.
///
/// See [PMS 3.1.1](https://projects.gentoo.org/pms/9/pms.html#category-names).
pub fn check_category(s: &str) -> Result<()> {
    let mut chars = s.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidAtom(format!("invalid category name {s:?}")))
    }
}

/// Validate a package name.
///
/// A package name must not end in a hyphen followed by something that
/// parses as a version.
///
/// See [PMS 3.1.2](https://projects.gentoo.org/pms/9/pms.html#package-names).
pub fn check_package(s: &str) -> Result<()> {
    let mut chars = s.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '-'));
    if !valid {
        return Err(Error::InvalidAtom(format!("invalid package name {s:?}")));
    }
    if let Ok((prefix, _)) = Version::extract_suffix(s) {
        if prefix.ends_with('-') {
            return Err(Error::InvalidAtom(format!(
                "invalid package name {s:?}: version-like suffix"
            )));
        }
    }
    Ok(())
}

/// Validate a `category/package` name.
pub fn check_category_and_package(s: &str) -> Result<()> {
    let (category, package) = s
        .split_once('/')
        .ok_or_else(|| Error::InvalidAtom(format!("invalid package name {s:?}")))?;
    check_category(category)?;
    check_package(package)
}
