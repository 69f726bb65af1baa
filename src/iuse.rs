use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default state of an `IUSE` flag, written as a `+` or `-` prefix.
///
/// See [PMS 7.2](https://projects.gentoo.org/pms/9/pms.html#mandatory-ebuilddefined-variables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IUseDefault {
    Enabled,
    Disabled,
}

/// A single USE flag entry from the `IUSE` variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IUse {
    pub name: String,
    pub default: Option<IUseDefault>,
}

impl IUse {
    /// Parse a space-separated `IUSE` line.
    pub fn parse_line(input: &str) -> Result<Vec<IUse>> {
        input
            .split_whitespace()
            .map(|token| token.parse())
            .collect()
    }

    /// The flags `iuse` enables by default, sorted and space separated,
    /// suitable as the lowest layer of an incremental `USE`.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::IUse;
    ///
    /// assert_eq!(IUse::default_use("zlib +ssl -debug +cxx").unwrap(), "cxx ssl");
    /// ```
    pub fn default_use(iuse: &str) -> Result<String> {
        let mut enabled: Vec<String> = IUse::parse_line(iuse)?
            .into_iter()
            .filter(|flag| flag.default == Some(IUseDefault::Enabled))
            .map(|flag| flag.name)
            .collect();
        enabled.sort();
        Ok(enabled.join(" "))
    }
}

impl FromStr for IUse {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (default, name) = match s.as_bytes().first() {
            Some(b'+') => (Some(IUseDefault::Enabled), &s[1..]),
            Some(b'-') => (Some(IUseDefault::Disabled), &s[1..]),
            _ => (None, s),
        };
        if name.is_empty() {
            return Err(Error::InvalidIUse(s.to_string()));
        }
        Ok(IUse {
            name: name.to_string(),
            default,
        })
    }
}

impl fmt::Display for IUse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.default {
            Some(IUseDefault::Enabled) => write!(f, "+{}", self.name),
            Some(IUseDefault::Disabled) => write!(f, "-{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
