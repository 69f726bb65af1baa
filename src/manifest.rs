//! Package `Manifest` files.
//!
//! Only `DIST` lines are read:
//!
//! ```text
//! DIST <file> <size> <HASH> <hex> [<HASH> <hex>]...
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};

const MANIFEST: &str = "Manifest";

/// Hashes usable as a subresource integrity string, most preferred first.
const INTEGRITY_HASHES: &[&str] = &["SHA512", "SHA256", "BLAKE2B"];

/// A distribution file listed in a `Manifest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub size: u64,
    /// `<hash>-<base64 digest>`, e.g. `sha512-...`.
    pub integrity: String,
    /// Hex digests as written; empty when the manifest omits them.
    pub sha256: String,
    pub sha512: String,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    files: HashMap<String, ManifestEntry>,
}

impl Manifest {
    /// Read `<dir>/Manifest`.
    pub fn load(dir: &Path) -> Result<Manifest> {
        let path = dir.join(MANIFEST);
        let contents = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Manifest::parse(path, &contents)
    }

    /// Parse manifest text read from `path`.
    ///
    /// Files without any supported hash are left out.
    pub fn parse(path: impl Into<PathBuf>, contents: &str) -> Result<Manifest> {
        let path = path.into();
        let invalid = |n: usize, message: String| Error::InvalidManifest {
            path: path.clone(),
            message: format!("line {n}: {message}"),
        };

        let mut files = HashMap::new();
        for (i, line) in contents.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 || fields[0] != "DIST" {
                continue;
            }

            let file_name = urlencoding::decode(fields[1])
                .map_err(|e| invalid(i + 1, format!("{}: {e}", fields[1])))?
                .into_owned();
            let size = fields[2]
                .parse::<u64>()
                .map_err(|e| invalid(i + 1, format!("size {}: {e}", fields[2])))?;
            let hashes: HashMap<&str, &str> = fields[3..]
                .chunks_exact(2)
                .map(|pair| (pair[0], pair[1]))
                .collect();

            let Some((name, hex_digest)) = INTEGRITY_HASHES
                .iter()
                .find_map(|name| hashes.get(name).map(|digest| (*name, *digest)))
            else {
                continue;
            };
            let integrity = integrity(name, hex_digest).map_err(|e| invalid(i + 1, e))?;

            files.insert(
                file_name,
                ManifestEntry {
                    size,
                    integrity,
                    sha256: hashes.get("SHA256").copied().unwrap_or_default().to_string(),
                    sha512: hashes.get("SHA512").copied().unwrap_or_default().to_string(),
                },
            );
        }

        Ok(Manifest { path, files })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, file_name: &str) -> Option<&ManifestEntry> {
        self.files.get(file_name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Convert a hex digest into a subresource integrity string.
///
/// ```
/// use portage_depgraph::manifest::integrity;
///
/// assert_eq!(integrity("SHA256", "00ff10").unwrap(), "sha256-AP8Q");
/// ```
pub fn integrity(hash_name: &str, hex_digest: &str) -> std::result::Result<String, String> {
    let bytes = hex::decode(hex_digest).map_err(|e| format!("{hash_name} {hex_digest}: {e}"))?;
    Ok(format!("{}-{}", hash_name.to_lowercase(), STANDARD.encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST_TEXT: &str = "\
DIST foo-1.0.tar.gz 1024 BLAKE2B aabb SHA512 00ff
DIST bar%2Bbaz.zip 7 SHA256 0102 BLAKE2B ccdd
DIST b2only.tar 3 BLAKE2B 10
DIST unhashed.tar 5 MD5 abcd
EBUILD foo-1.0.ebuild 100 SHA512 1234
AUX fix.patch 10 SHA256 ab
";

    #[test]
    fn parse_dist_lines() {
        let manifest = Manifest::parse("/repo/x/y/Manifest", MANIFEST_TEXT).unwrap();
        assert_eq!(manifest.len(), 3);

        let foo = manifest.get("foo-1.0.tar.gz").unwrap();
        assert_eq!(foo.size, 1024);
        assert_eq!(foo.integrity, "sha512-AP8=");
        assert_eq!(foo.sha512, "00ff");
        assert_eq!(foo.sha256, "");

        let bar = manifest.get("bar+baz.zip").unwrap();
        assert_eq!(bar.integrity, "sha256-AQI=");
        assert_eq!(bar.sha256, "0102");

        assert_eq!(manifest.get("b2only.tar").unwrap().integrity, "blake2b-EA==");
        assert!(manifest.get("unhashed.tar").is_none());
        assert!(manifest.get("foo-1.0.ebuild").is_none());
    }

    #[test]
    fn malformed_lines() {
        let err = Manifest::parse("Manifest", "DIST a 12x SHA512 00\n").unwrap_err();
        match err {
            Error::InvalidManifest { message, .. } => assert!(message.starts_with("line 1: size")),
            other => panic!("expected InvalidManifest, got {other}"),
        }
        assert!(Manifest::parse("Manifest", "DIST a 1 SHA512 zz\n").is_err());
    }

    #[test]
    fn load_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::load(dir.path()).unwrap_err();
        assert!(err.is_not_found());

        fs::write(dir.path().join(MANIFEST), MANIFEST_TEXT).unwrap();
        let manifest = Manifest::load(dir.path()).unwrap();
        assert_eq!(manifest.path(), dir.path().join(MANIFEST));
        assert!(!manifest.is_empty());
    }
}
