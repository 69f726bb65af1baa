use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How well a package is tested on an architecture.
///
/// Also used as a selection tier by the resolver, hence the serde support:
/// configuration files spell the tiers `stable`, `testing` and `broken`.
///
/// See [PMS 7.3.3](https://projects.gentoo.org/pms/9/pms.html#keywords).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    /// `amd64`
    Stable,
    /// `~amd64`
    Testing,
    /// `-amd64` or `-*`
    Broken,
}

impl Stability {
    /// Stability of a package with `KEYWORDS` set to `keywords` on `arch`.
    ///
    /// The architecture keyword is consulted first, then the `*` wildcard.
    /// Packages with no applicable keyword are treated as testing.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::Stability;
    ///
    /// assert_eq!(Stability::of("amd64 ~arm64", "amd64").unwrap(), Stability::Stable);
    /// assert_eq!(Stability::of("amd64 ~arm64", "arm64").unwrap(), Stability::Testing);
    /// assert_eq!(Stability::of("-* amd64", "x86").unwrap(), Stability::Broken);
    /// assert_eq!(Stability::of("", "x86").unwrap(), Stability::Testing);
    /// ```
    pub fn of(keywords: &str, arch: &str) -> Result<Stability> {
        let keywords = Keyword::parse_line(keywords)?;
        for wanted in [arch, "*"] {
            let mut best = None;
            for keyword in keywords.iter().filter(|k| k.arch == wanted) {
                best = Some(match (best, keyword.stability) {
                    (Some(Stability::Stable), _) | (_, Stability::Stable) => Stability::Stable,
                    (Some(Stability::Testing), _) | (_, Stability::Testing) => Stability::Testing,
                    _ => Stability::Broken,
                });
            }
            if let Some(stability) = best {
                return Ok(stability);
            }
        }
        Ok(Stability::Testing)
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Stability::Stable => "stable",
            Stability::Testing => "testing",
            Stability::Broken => "broken",
        })
    }
}

/// A single entry of the `KEYWORDS` variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyword {
    /// Architecture name, or `*` for every architecture.
    pub arch: String,
    pub stability: Stability,
}

impl Keyword {
    /// Parse a space-separated `KEYWORDS` line.
    pub fn parse_line(input: &str) -> Result<Vec<Keyword>> {
        input
            .split_whitespace()
            .map(|token| token.parse())
            .collect()
    }
}

impl FromStr for Keyword {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (stability, arch) = match s.as_bytes().first() {
            Some(b'~') => (Stability::Testing, &s[1..]),
            Some(b'-') => (Stability::Broken, &s[1..]),
            _ => (Stability::Stable, s),
        };
        if arch.is_empty() {
            return Err(Error::InvalidKeyword(s.to_string()));
        }
        Ok(Keyword {
            arch: arch.to_string(),
            stability,
        })
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.stability {
            Stability::Stable => write!(f, "{}", self.arch),
            Stability::Testing => write!(f, "~{}", self.arch),
            Stability::Broken => write!(f, "-{}", self.arch),
        }
    }
}
