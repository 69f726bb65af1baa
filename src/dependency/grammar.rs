use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, dispatch, fail, opt, peek, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use super::Expr;
use crate::atom::Atom;
use crate::error::{Error, Result};

// Winnow parsers

fn is_flag_start(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

fn is_flag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '@' | '-')
}

fn parse_group(input: &mut &str) -> ModalResult<Vec<Expr>> {
    delimited(
        '(',
        parse_deps_entries,
        cut_err((multispace0, ')')).context(StrContext::Label("closing ')'")),
    )
    .parse_next(input)
}

fn parse_operator_group<'s>(
    operator: &'static str,
    label: &'static str,
) -> impl Parser<&'s str, Vec<Expr>, ErrMode<ContextError>> {
    preceded(
        (operator, multispace0),
        cut_err(parse_group).context(StrContext::Label(label)),
    )
}

fn parse_use_conditional(input: &mut &str) -> ModalResult<Expr> {
    let negated = opt('!').parse_next(input)?.is_some();
    let flag: String = (
        take_while(1, is_flag_start),
        take_while(0.., is_flag_char),
    )
        .take()
        .map(|s: &str| s.to_string())
        .parse_next(input)?;
    '?'.parse_next(input)?;
    multispace0.parse_next(input)?;
    let children = cut_err(parse_group)
        .context(StrContext::Label("USE conditional group"))
        .parse_next(input)?;
    Ok(Expr::UseConditional {
        flag,
        expect: !negated,
        children,
    })
}

fn package_expr(token: &str) -> Result<Expr> {
    let atom_str = token.trim_start_matches('!');
    let blocks = token.len() - atom_str.len();
    if blocks > 2 {
        return Err(Error::InvalidAtom(format!("{token}: too many blockers")));
    }
    Ok(Expr::Package {
        atom: atom_str.parse::<Atom>()?,
        blocks: blocks as u8,
    })
}

/// A package token ends at whitespace or at a group parenthesis.
/// Parentheses inside `[...]` belong to USE dependency defaults.
fn package_token<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    let mut brackets = 0usize;
    let end = input
        .char_indices()
        .find(|&(_, c)| match c {
            '[' => {
                brackets += 1;
                false
            }
            ']' => {
                brackets = brackets.saturating_sub(1);
                false
            }
            '(' | ')' => brackets == 0,
            c => c.is_whitespace(),
        })
        .map_or(input.len(), |(i, _)| i);
    if end == 0 {
        return fail.parse_next(input);
    }
    let (token, rest) = input.split_at(end);
    *input = rest;
    Ok(token)
}

fn parse_package<'s>() -> impl Parser<&'s str, Expr, ErrMode<ContextError>> {
    cut_err(
        package_token
            .try_map(package_expr)
            .context(StrContext::Label("package atom")),
    )
}

fn parse_deps_entry(input: &mut &str) -> ModalResult<Expr> {
    dispatch! {peek(any);
        '(' => parse_group.map(Expr::AllOf),
        ')' => fail,
        '|' => parse_operator_group("||", "'||' group").map(Expr::AnyOf),
        '^' => parse_operator_group("^^", "'^^' group").map(Expr::ExactlyOneOf),
        '?' => parse_operator_group("??", "'??' group").map(Expr::AtMostOneOf),
        _ => alt((
            parse_use_conditional,
            parse_package(),
        )),
    }
    .parse_next(input)
}

fn parse_deps_entries(input: &mut &str) -> ModalResult<Vec<Expr>> {
    repeat(0.., preceded(multispace0, parse_deps_entry)).parse_next(input)
}

pub(crate) fn parse_deps_string<'s>() -> impl Parser<&'s str, Vec<Expr>, ErrMode<ContextError>>
{
    move |input: &mut &'s str| {
        let entries = parse_deps_entries(input)?;
        multispace0.parse_next(input)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::dependency::{Deps, Expr};

    fn pkg(s: &str) -> Expr {
        Expr::package(s.parse().unwrap())
    }

    #[test]
    fn parse_simple_list() {
        let deps = Deps::parse("  dev-libs/a\n\t>=dev-libs/b-1.0:2  ").unwrap();
        assert_eq!(deps.children(), [pkg("dev-libs/a"), pkg(">=dev-libs/b-1.0:2")]);
    }

    #[test]
    fn parse_blockers() {
        let deps = Deps::parse("!dev-libs/a !!dev-libs/b").unwrap();
        match &deps.children()[..] {
            [Expr::Package { blocks: 1, .. }, Expr::Package { blocks: 2, atom }] => {
                assert_eq!(atom.package_name(), "dev-libs/b");
            }
            _ => panic!("expected two blocked packages"),
        }
        assert!(Deps::parse("!!!dev-libs/a").is_err());
    }

    #[test]
    fn parse_use_conditional() {
        let deps = Deps::parse("!ssl? ( dev-libs/libressl ) python_targets_python3_6? ( a/b )")
            .unwrap();
        match &deps.children()[0] {
            Expr::UseConditional {
                flag,
                expect,
                children,
            } => {
                assert_eq!(flag, "ssl");
                assert!(!expect);
                assert_eq!(children, &[pkg("dev-libs/libressl")]);
            }
            _ => panic!("expected UseConditional"),
        }
        assert!(matches!(
            &deps.children()[1],
            Expr::UseConditional { flag, expect: true, .. } if flag == "python_targets_python3_6"
        ));
    }

    #[test]
    fn parse_nested_groups() {
        let deps = Deps::parse("|| ( ( a/a b/b ) ^^ ( c/c ) ?? ( d/d e/e ) )").unwrap();
        match &deps.children()[0] {
            Expr::AnyOf(children) => {
                assert!(matches!(&children[0], Expr::AllOf(c) if c.len() == 2));
                assert!(matches!(&children[1], Expr::ExactlyOneOf(c) if c.len() == 1));
                assert!(matches!(&children[2], Expr::AtMostOneOf(c) if c.len() == 2));
            }
            _ => panic!("expected AnyOf"),
        }
    }

    #[test]
    fn parse_use_deps_with_parentheses() {
        let deps = Deps::parse("dev-libs/a[ssl(+),-debug(-)] b/b").unwrap();
        assert_eq!(deps.children().len(), 2);
    }

    #[test]
    fn closing_parenthesis_ends_an_atom() {
        let deps = Deps::parse("|| ( a/a b/b[ssl(+)])").unwrap();
        assert!(matches!(&deps.children()[0], Expr::AnyOf(c) if c.len() == 2));
        let deps = Deps::parse("ssl? (dev-libs/a)").unwrap();
        assert!(matches!(&deps.children()[0], Expr::UseConditional { children, .. } if children.len() == 1));

        // A stray ')' is a grouping error, not part of the atom.
        let err = Deps::parse("dev-libs/a)").unwrap_err().to_string();
        assert!(!err.contains("package atom"), "{err}");
    }

    #[test]
    fn parse_errors() {
        for s in [
            "|| ( a/a",
            "( a/a",
            "a/a )",
            "ssl? a/a",
            "|| a/a",
            "not-an-atom",
            "=dev-libs/a",
        ] {
            assert!(Deps::parse(s).is_err(), "{s} should not parse");
        }
    }
}
