//! Dependency specification expressions.
//!
//! Parses and manipulates the values of `DEPEND`, `RDEPEND`, `BDEPEND` and
//! `PDEPEND`: whitespace separated atoms, optionally blocked with `!`/`!!`,
//! grouped with `( )`, `|| ( )`, `^^ ( )`, `?? ( )` or `flag? ( )`.
//!
//! See [PMS 8.2](https://projects.gentoo.org/pms/9/pms.html#dependency-specification-format).

mod algorithm;
mod grammar;

use std::fmt;
use std::str::FromStr;

use winnow::prelude::*;

use crate::atom::Atom;
use crate::error::{Error, Result};

/// A node of a dependency expression tree.
///
/// An empty [`Expr::AllOf`] is the constant true and an empty
/// [`Expr::AnyOf`] is the constant false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `( ... )`: every child must be satisfied.
    AllOf(Vec<Expr>),
    /// `|| ( ... )`: at least one child must be satisfied.
    AnyOf(Vec<Expr>),
    /// `^^ ( ... )`: exactly one child must be satisfied.
    ExactlyOneOf(Vec<Expr>),
    /// `?? ( ... )`: at most one child may be satisfied.
    AtMostOneOf(Vec<Expr>),
    /// `flag? ( ... )` or `!flag? ( ... )`.
    UseConditional {
        flag: String,
        /// `false` for `!flag?`.
        expect: bool,
        /// Children of the implicit all-of group.
        children: Vec<Expr>,
    },
    /// A package atom, blocked once (`!`) or twice (`!!`) when `blocks > 0`.
    Package { atom: Atom, blocks: u8 },
}

impl Expr {
    /// The always-satisfied expression.
    pub fn const_true() -> Expr {
        Expr::AllOf(Vec::new())
    }

    /// The never-satisfied expression.
    pub fn const_false() -> Expr {
        Expr::AnyOf(Vec::new())
    }

    pub fn is_const_true(&self) -> bool {
        matches!(self, Expr::AllOf(children) if children.is_empty())
    }

    pub fn is_const_false(&self) -> bool {
        matches!(self, Expr::AnyOf(children) if children.is_empty())
    }

    /// A non-blocking package leaf.
    pub fn package(atom: Atom) -> Expr {
        Expr::Package { atom, blocks: 0 }
    }

    /// Children of an all-of group, wrapping any other node.
    pub(crate) fn into_all_of_children(self) -> Vec<Expr> {
        match self {
            Expr::AllOf(children) => children,
            other => vec![other],
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::AllOf(children) => fmt_group(f, "", children),
            Expr::AnyOf(children) => fmt_group(f, "|| ", children),
            Expr::ExactlyOneOf(children) => fmt_group(f, "^^ ", children),
            Expr::AtMostOneOf(children) => fmt_group(f, "?? ", children),
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => {
                if !expect {
                    write!(f, "!")?;
                }
                write!(f, "{flag}? ")?;
                fmt_group(f, "", children)
            }
            Expr::Package { atom, blocks } => {
                for _ in 0..*blocks {
                    write!(f, "!")?;
                }
                write!(f, "{atom}")
            }
        }
    }
}

fn fmt_group(f: &mut fmt::Formatter, prefix: &str, children: &[Expr]) -> fmt::Result {
    write!(f, "{prefix}( ")?;
    if !children.is_empty() {
        fmt_entries(f, children)?;
        write!(f, " ")?;
    }
    write!(f, ")")
}

fn fmt_entries(f: &mut fmt::Formatter, entries: &[Expr]) -> fmt::Result {
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{entry}")?;
    }
    Ok(())
}

/// A parsed dependency string: the children of the implicit top-level all-of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deps {
    children: Vec<Expr>,
}

impl Deps {
    pub fn new(children: Vec<Expr>) -> Deps {
        Deps { children }
    }

    /// Parse a dependency specification string.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::{Deps, Expr};
    ///
    /// let deps = Deps::parse("dev-libs/a ssl? ( dev-libs/openssl ) || ( x y/z )");
    /// assert!(deps.is_err());
    ///
    /// let deps = Deps::parse("dev-libs/a ssl? ( dev-libs/openssl ) || ( a/x b/y )").unwrap();
    /// assert_eq!(deps.children().len(), 3);
    /// assert!(matches!(deps.children()[2], Expr::AnyOf(_)));
    /// ```
    pub fn parse(input: &str) -> Result<Deps> {
        grammar::parse_deps_string()
            .parse(input)
            .map(Deps::new)
            .map_err(|e| Error::InvalidDependency(format!("{e}")))
    }

    pub fn children(&self) -> &[Expr] {
        &self.children
    }

    pub fn into_children(self) -> Vec<Expr> {
        self.children
    }

    /// The root as a single all-of expression.
    pub fn to_expr(&self) -> Expr {
        Expr::AllOf(self.children.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl From<Expr> for Deps {
    fn from(expr: Expr) -> Deps {
        Deps::new(expr.into_all_of_children())
    }
}

impl FromStr for Deps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Deps::parse(s)
    }
}

impl fmt::Display for Deps {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_entries(f, &self.children)
    }
}
