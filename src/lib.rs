//! Portage dependency resolution based on [PMS].
//!
//! This crate reads ebuild repositories, profiles and the user
//! configuration of a board sysroot, and computes a static dependency graph:
//! one selected version per package with its build, runtime and post
//! dependencies, local source directories and distribution files.
//!
//! [PMS]: https://projects.gentoo.org/pms/latest/pms.html
//!
//! # Overview
//!
//! - [`Version`], [`Atom`] and [`Deps`] parse and evaluate the PMS
//!   vocabulary: versions, package dependency specifications and
//!   dependency expressions.
//! - [`config`] layers configuration sources (profiles, `/etc/portage`,
//!   built-in overrides) and [`shell`] evaluates the assignment-only shell
//!   subset they are written in.
//! - [`RepoSet`] enumerates ebuilds across overlays and loads profiles.
//! - [`Resolver`] selects packages and walks their dependencies into a
//!   [`PackageInfoMap`].
//!
//! # Examples
//!
//! Evaluate a dependency string:
//!
//! ```
//! use portage_depgraph::{Deps, UseFlags};
//!
//! let deps = Deps::parse("ssl? ( dev-libs/openssl ) !dev-libs/libressl sys-libs/zlib").unwrap();
//! let flags: UseFlags = ["ssl".to_string()].into_iter().collect();
//! let atoms: Vec<String> = deps
//!     .resolve_use(&flags)
//!     .remove_blocks()
//!     .unwrap()
//!     .simplify()
//!     .deterministic_atoms()
//!     .unwrap()
//!     .iter()
//!     .map(|atom| atom.to_string())
//!     .collect();
//! assert_eq!(atoms, ["dev-libs/openssl", "sys-libs/zlib"]);
//! ```
//!
//! Resolve a board's packages:
//!
//! ```no_run
//! use std::path::Path;
//!
//! use portage_depgraph::{Atom, Resolver, ResolverConfig};
//!
//! let resolver = Resolver::from_root(Path::new("/build/arm64-generic"), ResolverConfig::default())?;
//! let infos = resolver.resolve(&[Atom::any_version("virtual/target-os")])?;
//! portage_depgraph::depdata::save(Path::new("deps.json"), &infos)?;
//! # Ok::<(), portage_depgraph::Error>(())
//! ```

mod atom;
mod cache;
pub mod config;
pub mod depdata;
mod dependency;
mod eapi;
pub mod ebuild;
mod error;
mod iuse;
mod keyword;
mod local_source;
pub mod makevars;
pub mod manifest;
mod overrides;
mod packages;
mod profile;
mod repository;
mod resolver;
pub mod shell;
mod src_uri;
mod version;

// Re-export public types
pub use atom::{
    check_category, check_category_and_package, check_package, Atom, TargetPackage,
    UseDependency, UseFlags, VersionOperator,
};
pub use cache::CacheEntry;
pub use depdata::{PackageInfo, PackageInfoMap, UriInfo};
pub use dependency::{Deps, Expr};
pub use eapi::Eapi;
pub use error::{Error, Result};
pub use iuse::{IUse, IUseDefault};
pub use keyword::{Keyword, Stability};
pub use local_source::{extract_local_sources, fixup_local_sources};
pub use overrides::{LegacyOverrides, Unavailable};
pub use packages::Package;
pub use profile::{ParsedProfile, Profile, ProfileResolver};
pub use repository::{Repo, RepoPackage, RepoSet};
pub use resolver::{Resolver, ResolverConfig};
pub use src_uri::{dist_files, extract_uris, SrcUriEntry};
pub use version::{Suffix, SuffixLabel, Version};
