use std::collections::{BTreeMap, BTreeSet};

use super::{Deps, Expr};
use crate::atom::{Atom, TargetPackage, UseFlags};
use crate::error::{Error, Result};

impl Deps {
    /// Evaluate USE conditionals against `use_flags`.
    ///
    /// Conditionals whose flag state matches are replaced by their group,
    /// the others by the constant true.
    pub fn resolve_use(&self, use_flags: &UseFlags) -> Deps {
        Deps::new(
            self.children
                .iter()
                .map(|child| child.resolve_use(use_flags))
                .collect(),
        )
    }

    /// Fold constants and flatten nested all-of groups.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::{Deps, UseFlags};
    ///
    /// let deps = Deps::parse("flagA? ( cat/pkgX ) || ( cat/pkgY cat/pkgZ )").unwrap();
    /// let resolved = deps.resolve_use(&UseFlags::new()).simplify();
    /// assert_eq!(resolved.to_string(), "|| ( cat/pkgY cat/pkgZ )");
    /// ```
    pub fn simplify(&self) -> Deps {
        Deps::from(self.to_expr().simplify())
    }

    /// Non-blocking atoms in depth-first order.
    pub fn atoms(&self) -> Vec<&Atom> {
        let mut atoms = Vec::new();
        for child in &self.children {
            child.collect_atoms(&mut atoms);
        }
        atoms
    }

    /// Sorted, unique package names of [`Deps::atoms`].
    pub fn packages(&self) -> Vec<String> {
        self.atoms()
            .into_iter()
            .map(|atom| atom.package_name().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Replace blockers with the constant true.
    ///
    /// An any-of group that loses a child becomes true. Removing a blocker
    /// below `^^` or `??` changes the group's meaning and is an error.
    pub fn remove_blocks(&self) -> Result<Deps> {
        let (children, _) = remove_blocks_children(&self.children)?;
        Ok(Deps::new(children))
    }

    /// Whether the installed `packages` with `use_flags` satisfy these deps.
    pub fn satisfies(&self, packages: &[TargetPackage], use_flags: &UseFlags) -> bool {
        let mut by_name: BTreeMap<&str, Vec<&TargetPackage>> = BTreeMap::new();
        for pkg in packages {
            by_name.entry(pkg.name.as_str()).or_default().push(pkg);
        }
        self.children
            .iter()
            .all(|child| child.satisfied_by(&by_name, use_flags))
    }

    /// Keep only the parts of the tree that mention `package_name`.
    pub fn filter_for_package(&self, package_name: &str) -> Result<Deps> {
        Ok(Deps::new(filter_children(&self.children, package_name)?))
    }

    /// Rewrite every package leaf with `f`.
    pub fn try_map_packages<F>(&self, mut f: F) -> Result<Deps>
    where
        F: FnMut(&Atom, u8) -> Result<Expr>,
    {
        let children = self
            .children
            .iter()
            .map(|child| child.try_map_packages(&mut f))
            .collect::<Result<_>>()?;
        Ok(Deps::new(children))
    }

    /// Infallible variant of [`Deps::try_map_packages`].
    pub fn map_packages<F>(&self, mut f: F) -> Deps
    where
        F: FnMut(&Atom, u8) -> Expr,
    {
        self.try_map_packages(|atom, blocks| Ok(f(atom, blocks)))
            .unwrap_or_default()
    }

    /// Replace every any-of group with its first alternative.
    pub fn pick_first_alternatives(&self) -> Deps {
        Deps::new(
            self.children
                .iter()
                .map(Expr::pick_first_alternative)
                .collect(),
        )
    }

    /// The atoms of a tree with no choice left in it.
    ///
    /// Fails with [`Error::NondeterministicDeps`] when an any-of group has
    /// more than one alternative or an exactly-one/at-most-one group is
    /// still undecided.
    pub fn deterministic_atoms(&self) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        for child in &self.children {
            child.collect_deterministic(&mut atoms)?;
        }
        Ok(atoms)
    }
}

impl Expr {
    fn resolve_use(&self, use_flags: &UseFlags) -> Expr {
        let resolve = |children: &[Expr]| -> Vec<Expr> {
            children.iter().map(|c| c.resolve_use(use_flags)).collect()
        };
        match self {
            Expr::AllOf(children) => Expr::AllOf(resolve(children)),
            Expr::AnyOf(children) => Expr::AnyOf(resolve(children)),
            Expr::ExactlyOneOf(children) => Expr::ExactlyOneOf(resolve(children)),
            Expr::AtMostOneOf(children) => Expr::AtMostOneOf(resolve(children)),
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => {
                if use_flags.contains(flag) == *expect {
                    Expr::AllOf(resolve(children))
                } else {
                    Expr::const_true()
                }
            }
            Expr::Package { .. } => self.clone(),
        }
    }

    /// Constant-fold this expression. Idempotent.
    pub fn simplify(&self) -> Expr {
        match self {
            Expr::AllOf(children) => {
                let mut out = Vec::new();
                for child in children.iter().map(Expr::simplify) {
                    if child.is_const_false() {
                        return Expr::const_false();
                    }
                    match child {
                        Expr::AllOf(inner) => out.extend(inner),
                        other => out.push(other),
                    }
                }
                collapse(out, Expr::AllOf)
            }
            Expr::AnyOf(children) => {
                let mut out = Vec::new();
                for child in children.iter().map(Expr::simplify) {
                    if child.is_const_true() {
                        return Expr::const_true();
                    }
                    if !child.is_const_false() {
                        out.push(child);
                    }
                }
                collapse(out, Expr::AnyOf)
            }
            Expr::ExactlyOneOf(children) => {
                let out = simplify_dropping_false(children);
                match (count_true(&out), out.len()) {
                    (trues, _) if trues >= 2 => Expr::const_false(),
                    (1, 1) => Expr::const_true(),
                    (0, 0) => Expr::const_false(),
                    (0, 1) => out.into_iter().next().unwrap_or_else(Expr::const_false),
                    _ => Expr::ExactlyOneOf(out),
                }
            }
            Expr::AtMostOneOf(children) => {
                let out = simplify_dropping_false(children);
                match (count_true(&out), out.len()) {
                    (trues, _) if trues >= 2 => Expr::const_false(),
                    (_, len) if len <= 1 => Expr::const_true(),
                    _ => Expr::AtMostOneOf(out),
                }
            }
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => {
                let body = Expr::AllOf(children.clone()).simplify();
                if body.is_const_true() {
                    return Expr::const_true();
                }
                Expr::UseConditional {
                    flag: flag.clone(),
                    expect: *expect,
                    children: body.into_all_of_children(),
                }
            }
            Expr::Package { .. } => self.clone(),
        }
    }

    fn collect_atoms<'a>(&'a self, atoms: &mut Vec<&'a Atom>) {
        match self {
            Expr::AllOf(children)
            | Expr::AnyOf(children)
            | Expr::ExactlyOneOf(children)
            | Expr::AtMostOneOf(children)
            | Expr::UseConditional { children, .. } => {
                for child in children {
                    child.collect_atoms(atoms);
                }
            }
            Expr::Package { atom, blocks } => {
                if *blocks == 0 {
                    atoms.push(atom);
                }
            }
        }
    }

    fn satisfied_by(&self, by_name: &BTreeMap<&str, Vec<&TargetPackage>>, use_flags: &UseFlags) -> bool {
        let count = |children: &[Expr]| {
            children
                .iter()
                .filter(|c| c.satisfied_by(by_name, use_flags))
                .count()
        };
        match self {
            Expr::AllOf(children) => children.iter().all(|c| c.satisfied_by(by_name, use_flags)),
            Expr::AnyOf(children) => children.iter().any(|c| c.satisfied_by(by_name, use_flags)),
            Expr::ExactlyOneOf(children) => count(children) == 1,
            Expr::AtMostOneOf(children) => count(children) <= 1,
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => {
                use_flags.contains(flag) != *expect
                    || children.iter().all(|c| c.satisfied_by(by_name, use_flags))
            }
            Expr::Package { atom, .. } => by_name
                .get(atom.package_name())
                .is_some_and(|pkgs| pkgs.iter().any(|pkg| atom.matches(pkg))),
        }
    }

    fn remove_blocks(&self) -> Result<Expr> {
        match self {
            Expr::AllOf(children) => Ok(Expr::AllOf(remove_blocks_children(children)?.0)),
            Expr::AnyOf(children) => {
                let (out, removed) = remove_blocks_children(children)?;
                Ok(if removed {
                    Expr::const_true()
                } else {
                    Expr::AnyOf(out)
                })
            }
            Expr::ExactlyOneOf(children) => {
                let (out, removed) = remove_blocks_children(children)?;
                if removed {
                    return Err(Error::Ambiguous(format!(
                        "cannot remove blocks under {self}"
                    )));
                }
                Ok(Expr::ExactlyOneOf(out))
            }
            Expr::AtMostOneOf(children) => {
                let (out, removed) = remove_blocks_children(children)?;
                if removed {
                    return Err(Error::Ambiguous(format!(
                        "cannot remove blocks under {self}"
                    )));
                }
                Ok(Expr::AtMostOneOf(out))
            }
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => Ok(Expr::UseConditional {
                flag: flag.clone(),
                expect: *expect,
                children: remove_blocks_children(children)?.0,
            }),
            Expr::Package { blocks, .. } if *blocks > 0 => Ok(Expr::const_true()),
            Expr::Package { .. } => Ok(self.clone()),
        }
    }

    fn filter_for_package(&self, package_name: &str) -> Result<Option<Expr>> {
        let filtered = match self {
            Expr::AllOf(children) => {
                Some(filter_children(children, package_name)?).filter(|c| !c.is_empty()).map(Expr::AllOf)
            }
            Expr::AnyOf(children) => {
                Some(filter_children(children, package_name)?).filter(|c| !c.is_empty()).map(Expr::AnyOf)
            }
            Expr::ExactlyOneOf(_) | Expr::AtMostOneOf(_) => {
                return Err(Error::Ambiguous(format!(
                    "cannot filter dependencies for {package_name} under {self}"
                )));
            }
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => Some(filter_children(children, package_name)?)
                .filter(|c| !c.is_empty())
                .map(|children| Expr::UseConditional {
                    flag: flag.clone(),
                    expect: *expect,
                    children,
                }),
            Expr::Package { atom, .. } => {
                (atom.package_name() == package_name).then(|| self.clone())
            }
        };
        Ok(filtered)
    }

    fn try_map_packages<F>(&self, f: &mut F) -> Result<Expr>
    where
        F: FnMut(&Atom, u8) -> Result<Expr>,
    {
        Ok(match self {
            Expr::AllOf(children) => Expr::AllOf(try_map_children(children, f)?),
            Expr::AnyOf(children) => Expr::AnyOf(try_map_children(children, f)?),
            Expr::ExactlyOneOf(children) => Expr::ExactlyOneOf(try_map_children(children, f)?),
            Expr::AtMostOneOf(children) => Expr::AtMostOneOf(try_map_children(children, f)?),
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => Expr::UseConditional {
                flag: flag.clone(),
                expect: *expect,
                children: try_map_children(children, f)?,
            },
            Expr::Package { atom, blocks } => f(atom, *blocks)?,
        })
    }

    fn pick_first_alternative(&self) -> Expr {
        let pick = |children: &[Expr]| -> Vec<Expr> {
            children.iter().map(Expr::pick_first_alternative).collect()
        };
        match self {
            Expr::AllOf(children) => Expr::AllOf(pick(children)),
            Expr::AnyOf(children) => match pick(children).into_iter().next() {
                Some(first) => first,
                None => Expr::const_false(),
            },
            Expr::ExactlyOneOf(children) => Expr::ExactlyOneOf(pick(children)),
            Expr::AtMostOneOf(children) => Expr::AtMostOneOf(pick(children)),
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => Expr::UseConditional {
                flag: flag.clone(),
                expect: *expect,
                children: pick(children),
            },
            Expr::Package { .. } => self.clone(),
        }
    }

    fn collect_deterministic(&self, atoms: &mut Vec<Atom>) -> Result<()> {
        let nondeterministic = || Error::NondeterministicDeps(self.to_string());
        match self {
            Expr::AllOf(children) | Expr::UseConditional { children, .. } => {
                for child in children {
                    child.collect_deterministic(atoms)?;
                }
            }
            Expr::AnyOf(children) => {
                if children.len() >= 2 {
                    return Err(nondeterministic());
                }
                for child in children {
                    child.collect_deterministic(atoms)?;
                }
            }
            Expr::ExactlyOneOf(children) => {
                if children.len() != 1 {
                    return Err(nondeterministic());
                }
                children[0].collect_deterministic(atoms)?;
            }
            Expr::AtMostOneOf(children) => {
                if !children.is_empty() {
                    return Err(nondeterministic());
                }
            }
            Expr::Package { atom, blocks } => {
                if *blocks == 0 {
                    atoms.push(atom.clone());
                }
            }
        }
        Ok(())
    }
}

fn collapse(mut children: Vec<Expr>, group: fn(Vec<Expr>) -> Expr) -> Expr {
    if children.len() == 1 {
        children.remove(0)
    } else {
        group(children)
    }
}

fn simplify_dropping_false(children: &[Expr]) -> Vec<Expr> {
    children
        .iter()
        .map(Expr::simplify)
        .filter(|c| !c.is_const_false())
        .collect()
}

fn count_true(children: &[Expr]) -> usize {
    children.iter().filter(|c| c.is_const_true()).count()
}

/// Returns the rewritten children and whether any of them became true.
fn remove_blocks_children(children: &[Expr]) -> Result<(Vec<Expr>, bool)> {
    let mut out = Vec::new();
    let mut removed = false;
    for child in children {
        let child = child.remove_blocks()?;
        if child.is_const_true() {
            removed = true;
        } else {
            out.push(child);
        }
    }
    Ok((out, removed))
}

fn try_map_children<F>(children: &[Expr], f: &mut F) -> Result<Vec<Expr>>
where
    F: FnMut(&Atom, u8) -> Result<Expr>,
{
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        out.push(child.try_map_packages(&mut *f)?);
    }
    Ok(out)
}

fn filter_children(children: &[Expr], package_name: &str) -> Result<Vec<Expr>> {
    let mut out = Vec::new();
    for child in children {
        if let Some(child) = child.filter_for_package(package_name)? {
            out.push(child);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(s: &str) -> Deps {
        Deps::parse(s).unwrap()
    }

    fn flags(list: &[&str]) -> UseFlags {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn target(name: &str, version: &str) -> TargetPackage {
        TargetPackage {
            name: name.to_string(),
            version: version.parse().unwrap(),
            main_slot: "0".to_string(),
            use_flags: UseFlags::new(),
        }
    }

    #[test]
    fn resolve_use_drops_unset_conditional() {
        let d = deps("flagA? ( cat/pkgX ) || ( cat/pkgY cat/pkgZ )");
        let resolved = d.resolve_use(&UseFlags::new()).simplify();
        assert_eq!(resolved, deps("|| ( cat/pkgY cat/pkgZ )"));

        let resolved = d.resolve_use(&flags(&["flagA"])).simplify();
        assert_eq!(resolved, deps("cat/pkgX || ( cat/pkgY cat/pkgZ )"));
    }

    #[test]
    fn resolve_use_negated_and_nested() {
        let d = deps("!a? ( x/x b? ( y/y ) ) a? ( z/z )");
        assert_eq!(d.resolve_use(&flags(&[])).simplify(), deps("x/x"));
        assert_eq!(d.resolve_use(&flags(&["b"])).simplify(), deps("x/x y/y"));
        assert_eq!(d.resolve_use(&flags(&["a", "b"])).simplify(), deps("z/z"));
    }

    #[test]
    fn resolve_use_is_idempotent() {
        let d = deps("a? ( x/x ) !b? ( y/y || ( c? ( z/z ) w/w ) )");
        let f = flags(&["a", "c"]);
        let once = d.resolve_use(&f);
        assert_eq!(once.resolve_use(&f), once);
    }

    #[test]
    fn simplify_rules() {
        let cases = [
            ("( ( a/a ( b/b ) ) )", "a/a b/b"),
            ("a/a ( )", "a/a"),
            ("a/a || ( )", "|| ( )"),
            ("|| ( a/a ( ) )", ""),
            ("|| ( a/a || ( ) )", "a/a"),
            ("|| ( ( a/a b/b ) )", "a/a b/b"),
            ("|| ( ( a/a b/b ) c/c )", "|| ( ( a/a b/b ) c/c )"),
            ("^^ ( ( ) ( ) a/a )", "|| ( )"),
            ("^^ ( ( ) || ( ) )", ""),
            ("^^ ( || ( ) )", "|| ( )"),
            ("^^ ( || ( ) a/a )", "a/a"),
            ("^^ ( ( ) a/a )", "^^ ( ( ) a/a )"),
            ("?? ( a/a )", ""),
            ("?? ( ( ) ( ) )", "|| ( )"),
            ("?? ( a/a b/b )", "?? ( a/a b/b )"),
            ("x? ( ( ) )", ""),
            ("x? ( || ( ) )", "x? ( || ( ) )"),
            ("x? ( ( a/a ) b/b )", "x? ( a/a b/b )"),
        ];
        for (input, want) in cases {
            assert_eq!(deps(input).simplify(), deps(want), "simplify({input})");
        }
    }

    #[test]
    fn simplify_is_idempotent() {
        for s in [
            "a? ( ( b/b ) ) || ( ( c/c d/d ) e/e ) ^^ ( ( ) f/f ) ?? ( g/g h/h )",
            "x? ( || ( ) ) y/y",
            "|| ( ( ) a/a ) ( ( ( b/b ) ) )",
            "^^ ( ( a/a b/b ) ) ?? ( )",
        ] {
            let once = deps(s).simplify();
            assert_eq!(once.simplify(), once, "{s}");
        }
    }

    #[test]
    fn atoms_skip_blockers() {
        let d = deps("!x/blocked b/b || ( a/a b/b ) c? ( d/d !!e/e )");
        let atoms: Vec<String> = d.atoms().iter().map(|a| a.to_string()).collect();
        assert_eq!(atoms, ["b/b", "a/a", "b/b", "d/d"]);
        assert_eq!(d.packages(), ["a/a", "b/b", "d/d"]);
    }

    #[test]
    fn remove_blocks() {
        assert_eq!(
            deps("!x/x a/a || ( !y/y b/b ) c? ( !z/z d/d )")
                .remove_blocks()
                .unwrap(),
            deps("a/a c? ( d/d )")
        );
        assert!(matches!(
            deps("^^ ( !x/x a/a )").remove_blocks(),
            Err(Error::Ambiguous(_))
        ));
        assert!(matches!(
            deps("?? ( a/a !x/x )").remove_blocks(),
            Err(Error::Ambiguous(_))
        ));
        assert!(deps("^^ ( a/a b/b )").remove_blocks().is_ok());
    }

    #[test]
    fn satisfies() {
        let installed = [target("a/a", "1.0"), target("b/b", "2.0")];
        let f = flags(&["x"]);
        assert!(deps("a/a >=b/b-2").satisfies(&installed, &f));
        assert!(!deps("a/a >b/b-2.0").satisfies(&installed, &f));
        assert!(deps("|| ( c/c a/a )").satisfies(&installed, &f));
        assert!(!deps("|| ( c/c d/d )").satisfies(&installed, &f));
        assert!(deps("^^ ( a/a c/c )").satisfies(&installed, &f));
        assert!(!deps("^^ ( a/a b/b )").satisfies(&installed, &f));
        assert!(deps("?? ( a/a c/c )").satisfies(&installed, &f));
        assert!(!deps("?? ( a/a b/b )").satisfies(&installed, &f));
        assert!(deps("!x? ( c/c )").satisfies(&installed, &f));
        assert!(!deps("x? ( c/c )").satisfies(&installed, &f));
        assert!(deps("").satisfies(&[], &f));
    }

    #[test]
    fn filter_for_package() {
        let d = deps("a/a || ( b/b c/c ) x? ( a/a d/d ) ( d/d )");
        assert_eq!(d.filter_for_package("a/a").unwrap(), deps("a/a x? ( a/a )"));
        assert_eq!(d.filter_for_package("c/c").unwrap(), deps("|| ( c/c )"));
        assert!(d.filter_for_package("z/z").unwrap().is_empty());
        assert!(matches!(
            deps("^^ ( a/a )").filter_for_package("a/a"),
            Err(Error::Ambiguous(_))
        ));
    }

    #[test]
    fn map_packages_rewrites_leaves() {
        let d = deps("a/a || ( !b/b c/c )");
        let mapped = d.map_packages(|atom, blocks| {
            if blocks > 0 || atom.package_name() == "c/c" {
                Expr::const_true()
            } else {
                Expr::package(atom.clone())
            }
        });
        assert_eq!(mapped.simplify(), deps("a/a"));

        let err = d.try_map_packages(|atom, _| {
            Err(Error::NoCandidate {
                atom: atom.to_string(),
            })
        });
        assert!(matches!(err, Err(Error::NoCandidate { atom }) if atom == "a/a"));
    }

    #[test]
    fn pick_first_and_deterministic() {
        let d = deps("|| ( a/a b/b ) c/c");
        assert!(matches!(
            d.deterministic_atoms(),
            Err(Error::NondeterministicDeps(_))
        ));
        let picked = d.pick_first_alternatives().simplify();
        let atoms: Vec<String> = picked
            .deterministic_atoms()
            .unwrap()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(atoms, ["a/a", "c/c"]);
        assert!(deps("?? ( )").deterministic_atoms().unwrap().is_empty());
        assert!(deps("^^ ( a/a b/b )").deterministic_atoms().is_err());
    }
}
