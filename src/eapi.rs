use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The EAPI an ebuild is written against, `0` to `9`.
///
/// The resolver only cares which dependency variables an ebuild may set.
/// See [PMS 8.1](https://projects.gentoo.org/pms/latest/pms.html#dependency-classes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Eapi(u8);

const LATEST: u8 = 9;

const BUILD_VARS: &[&str] = &["DEPEND"];
const BUILD_VARS_WITH_BDEPEND: &[&str] = &["DEPEND", "BDEPEND"];

impl Eapi {
    /// What an ebuild without an `EAPI` assignment gets.
    pub const DEFAULT: Eapi = Eapi(0);

    pub fn has_bdepend(self) -> bool {
        self.0 >= 7
    }

    /// Variables whose dependencies must be installed on the build host.
    pub fn build_dependency_vars(self) -> &'static [&'static str] {
        if self.has_bdepend() {
            BUILD_VARS_WITH_BDEPEND
        } else {
            BUILD_VARS
        }
    }

    /// The EAPI an ebuild declares; an unset or empty `EAPI` means 0.
    pub fn of_ebuild(eapi: Option<&str>) -> Result<Eapi> {
        match eapi.map(str::trim) {
            None | Some("") => Ok(Eapi::DEFAULT),
            Some(s) => s.parse(),
        }
    }
}

impl fmt::Display for Eapi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Eapi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // A single digit only: "07" and "+7" are not EAPIs.
        match s.as_bytes() {
            [digit @ b'0'..=b'9'] if digit - b'0' <= LATEST => Ok(Eapi(digit - b'0')),
            _ => Err(Error::InvalidEapi(s.to_string())),
        }
    }
}
