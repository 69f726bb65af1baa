use std::fs;
use std::path::Path;

use super::PackageRef;
use crate::atom::Atom;
use crate::error::{Error, Result};
use crate::version::Version;

/// A `package.use` style entry: an atom followed by flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUse {
    pub atom: Atom,
    pub flags: Vec<String>,
}

/// Non-empty, non-comment lines of `path`, trimmed, with their line numbers.
///
/// A missing file yields an empty list.
pub fn parse_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(path, e)),
    };
    Ok(contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| (n, line.to_string()))
        .collect())
}

fn syntax_error(path: &Path, line: usize, message: impl ToString) -> Error {
    Error::Syntax {
        location: format!("{}:{line}", path.display()),
        message: message.to_string(),
    }
}

/// Flags listed one or more per line, as in `use.mask`.
pub fn parse_use_list(path: &Path) -> Result<Vec<String>> {
    Ok(parse_lines(path)?
        .into_iter()
        .flat_map(|(_, line)| {
            line.split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect())
}

/// Lines of `<atom> <flag>...`.
pub fn parse_package_use_list(path: &Path) -> Result<Vec<PackageUse>> {
    parse_lines(path)?
        .into_iter()
        .map(|(n, line)| {
            let mut fields = line.split_whitespace();
            let atom = fields
                .next()
                .unwrap_or_default()
                .parse::<Atom>()
                .map_err(|e| syntax_error(path, n, e))?;
            Ok(PackageUse {
                atom,
                flags: fields.map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Lines of `<category>/<package>-<version>`.
///
/// # Examples
///
/// ```
/// use portage_depgraph::config::parse_package_provided;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("package.provided");
/// std::fs::write(&path, "# comment\nsys-libs/glibc-2.35-r1\n").unwrap();
///
/// let provided = parse_package_provided(&path).unwrap();
/// assert_eq!(provided[0].name, "sys-libs/glibc");
/// assert_eq!(provided[0].version.to_string(), "2.35-r1");
/// ```
pub fn parse_package_provided(path: &Path) -> Result<Vec<PackageRef>> {
    parse_lines(path)?
        .into_iter()
        .map(|(n, line)| {
            let (prefix, version) = Version::extract_suffix(&line)
                .map_err(|e| syntax_error(path, n, format!("invalid provided package {line}: {e}")))?;
            let name = prefix
                .strip_suffix('-')
                .ok_or_else(|| syntax_error(path, n, format!("invalid provided package {line}")))?;
            Ok(PackageRef {
                name: name.to_string(),
                version,
            })
        })
        .collect()
}
