//! A restricted evaluator for shell-style configuration files.
//!
//! `make.conf`, `make.defaults` and simple ebuilds are bash scripts, but the
//! only constructs that matter for dependency resolution are variable
//! assignments. This module accepts:
//!
//! - `NAME=word` assignments, several per line;
//! - words made of bare text, `'single'` and `"double"` quoted strings, `\`
//!   escapes and `$NAME`/`${NAME}` expansions;
//! - `source <word>` when the caller allows it;
//! - in ebuilds, `inherit <eclass>...` and `NAME=( word... )` arrays.
//!
//! Every other construct is rejected with [`Error::Syntax`]; arrays and
//! `inherit` outside ebuilds are [`Error::Unsupported`].

use std::fs;
use std::path::{Path, PathBuf};

use winnow::combinator::{alt, cut_err, delimited, dispatch, eof, fail, peek, preceded, repeat, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_till, take_while};

use crate::error::{Error, Result};
use crate::makevars::Vars;

const MAX_SOURCE_DEPTH: usize = 16;

/// Evaluate the file at `path`.
///
/// `env` provides the values for expansions and is updated by every
/// assignment. The returned table holds only the variables assigned by the
/// file (and the files it sources).
pub fn eval(path: &Path, env: &mut Vars, allow_source: bool) -> Result<Vars> {
    let evaluator = Evaluator {
        allow_source,
        ebuild: false,
    };
    let mut vars = Vars::new();
    evaluator.eval_file(path, env, &mut vars, 0)?;
    Ok(vars)
}

/// Evaluate an ebuild file: assignments, arrays (joined with `|`) and
/// `inherit`, whose arguments are collected into `INHERITED`.
pub fn eval_ebuild(path: &Path, env: &mut Vars) -> Result<Vars> {
    let evaluator = Evaluator {
        allow_source: false,
        ebuild: true,
    };
    let mut vars = Vars::new();
    evaluator.eval_file(path, env, &mut vars, 0)?;
    Ok(vars)
}

/// Evaluate a profile `make.defaults` file into `vars`.
///
/// Expansions see the non-incremental variables accumulated so far;
/// incremental variables are appended to their inherited values.
pub fn parse_make_defaults(path: &Path, vars: &mut Vars) -> Result<()> {
    let mut env = vars.without_incremental();
    let assigned = eval(path, &mut env, false)?;
    vars.merge(&assigned);
    Ok(())
}

struct Evaluator {
    allow_source: bool,
    ebuild: bool,
}

impl Evaluator {
    fn eval_file(&self, path: &Path, env: &mut Vars, vars: &mut Vars, depth: usize) -> Result<()> {
        let source = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let statements = parse_script(path, &source)?;

        for Statement { line, command } in statements {
            let location = || format!("{}:{line}", path.display());
            match command {
                Command::Assign(assignments) => {
                    for (name, value) in assignments {
                        let value = match value {
                            Value::Scalar(word) => expand(&word, env),
                            Value::Array(_) if !self.ebuild => {
                                return Err(Error::Unsupported(format!(
                                    "{}: array assignment to {name}",
                                    location()
                                )));
                            }
                            Value::Array(words) => words
                                .iter()
                                .map(|word| expand(word, env))
                                .collect::<Vec<_>>()
                                .join("|"),
                        };
                        env.insert(name.as_str(), value.as_str());
                        vars.insert(name, value);
                    }
                }
                Command::Source(word) => {
                    if !self.allow_source {
                        return Err(Error::Syntax {
                            location: location(),
                            message: "source is not allowed here".to_string(),
                        });
                    }
                    if depth >= MAX_SOURCE_DEPTH {
                        return Err(Error::Syntax {
                            location: location(),
                            message: "source nesting is too deep".to_string(),
                        });
                    }
                    let included = resolve_relative(path, &expand(&word, env));
                    self.eval_file(&included, env, vars, depth + 1)?;
                }
                Command::Inherit(words) => {
                    if !self.ebuild {
                        return Err(Error::Unsupported(format!(
                            "{}: inherit outside an ebuild",
                            location()
                        )));
                    }
                    let mut inherited = vars.list("INHERITED").join(" ");
                    for word in &words {
                        if !inherited.is_empty() {
                            inherited.push(' ');
                        }
                        inherited.push_str(&expand(word, env));
                    }
                    vars.insert("INHERITED", inherited);
                }
            }
        }
        Ok(())
    }
}

fn resolve_relative(path: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        return target.to_path_buf();
    }
    match path.parent() {
        Some(dir) => dir.join(target),
        None => target.to_path_buf(),
    }
}

fn expand(word: &[WordPart], env: &Vars) -> String {
    word.iter()
        .map(|part| match part {
            WordPart::Literal(s) => s.as_str(),
            WordPart::Var(name) => env.value(name),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WordPart {
    Literal(String),
    Var(String),
}

type Word = Vec<WordPart>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Scalar(Word),
    Array(Vec<Word>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Assign(Vec<(String, Value)>),
    Source(Word),
    Inherit(Vec<Word>),
}

#[derive(Debug)]
struct Statement {
    line: usize,
    command: Command,
}

fn line_at(source: &str, rest: &str) -> usize {
    let offset = source.len() - rest.len();
    source[..offset].matches('\n').count() + 1
}

fn parse_script(path: &Path, source: &str) -> Result<Vec<Statement>> {
    let syntax_error = |rest: &str, e: ErrMode<ContextError>| Error::Syntax {
        location: format!("{}:{}", path.display(), line_at(source, rest)),
        message: match e {
            ErrMode::Backtrack(e) | ErrMode::Cut(e) => e.to_string(),
            ErrMode::Incomplete(_) => "unexpected end of input".to_string(),
        },
    };

    let mut input = source;
    let mut statements = Vec::new();
    loop {
        separators
            .parse_next(&mut input)
            .map_err(|e| syntax_error(input, e))?;
        if input.is_empty() {
            break;
        }
        let line = line_at(source, input);
        let command = terminated(statement, statement_end)
            .parse_next(&mut input)
            .map_err(|e| syntax_error(input, e))?;
        statements.push(Statement { line, command });
    }
    Ok(statements)
}

// Winnow parsers

fn is_bare_char(c: char) -> bool {
    !c.is_whitespace()
        && !matches!(
            c,
            ';' | '"' | '\'' | '$' | '\\' | '`' | '(' | ')' | '|' | '&' | '<' | '>'
        )
}

fn comment(input: &mut &str) -> ModalResult<()> {
    ('#', take_till(0.., '\n')).void().parse_next(input)
}

/// Spaces, tabs and line continuations inside a statement.
fn blank(input: &mut &str) -> ModalResult<()> {
    repeat(
        0..,
        alt((take_while(1.., [' ', '\t', '\r']).void(), "\\\n".void())),
    )
    .parse_next(input)
}

/// Whitespace and comments spanning lines, as inside `( ... )`.
fn multiline_blank(input: &mut &str) -> ModalResult<()> {
    repeat(
        0..,
        alt((
            take_while(1.., [' ', '\t', '\r', '\n']).void(),
            "\\\n".void(),
            comment,
        )),
    )
    .parse_next(input)
}

/// Anything that may separate two statements.
fn separators(input: &mut &str) -> ModalResult<()> {
    repeat(
        0..,
        alt((
            take_while(1.., [' ', '\t', '\r', '\n', ';']).void(),
            "\\\n".void(),
            comment,
        )),
    )
    .parse_next(input)
}

fn statement_end(input: &mut &str) -> ModalResult<()> {
    preceded(
        blank,
        cut_err(peek(alt((eof.void(), one_of(['\n', ';', '#']).void()))))
            .context(StrContext::Expected(StrContextValue::Description(
                "end of statement",
            ))),
    )
    .parse_next(input)
}

fn name(input: &mut &str) -> ModalResult<String> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .map(str::to_string)
        .parse_next(input)
}

fn expansion(input: &mut &str) -> ModalResult<WordPart> {
    preceded(
        '$',
        cut_err(alt((delimited('{', name, '}'), name)))
            .context(StrContext::Label("variable expansion")),
    )
    .map(WordPart::Var)
    .parse_next(input)
}

fn escaped(input: &mut &str) -> ModalResult<WordPart> {
    preceded('\\', cut_err(any))
        .map(|c: char| match c {
            '\n' => WordPart::Literal(String::new()),
            c => WordPart::Literal(c.to_string()),
        })
        .parse_next(input)
}

fn single_quoted(input: &mut &str) -> ModalResult<WordPart> {
    preceded(
        '\'',
        cut_err(terminated(take_till(0.., '\''), '\''))
            .context(StrContext::Label("single-quoted string")),
    )
    .map(|s: &str| WordPart::Literal(s.to_string()))
    .parse_next(input)
}

fn double_quoted_escape(input: &mut &str) -> ModalResult<WordPart> {
    preceded('\\', cut_err(any))
        .map(|c: char| match c {
            '"' | '\\' | '$' | '`' => WordPart::Literal(c.to_string()),
            '\n' => WordPart::Literal(String::new()),
            c => WordPart::Literal(format!("\\{c}")),
        })
        .parse_next(input)
}

fn double_quoted_part(input: &mut &str) -> ModalResult<WordPart> {
    dispatch! {peek(any);
        '$' => expansion,
        '\\' => double_quoted_escape,
        '`' => cut_err(fail).context(StrContext::Label("command substitution")),
        '"' => fail,
        _ => take_till(1.., ['"', '$', '\\', '`']).map(|s: &str| WordPart::Literal(s.to_string())),
    }
    .parse_next(input)
}

fn double_quoted(input: &mut &str) -> ModalResult<Vec<WordPart>> {
    preceded(
        '"',
        cut_err(terminated(repeat(0.., double_quoted_part), '"'))
            .context(StrContext::Label("double-quoted string")),
    )
    .parse_next(input)
}

fn word_part(input: &mut &str) -> ModalResult<Vec<WordPart>> {
    dispatch! {peek(any);
        '\'' => single_quoted.map(|part| vec![part]),
        '"' => double_quoted,
        '$' => expansion.map(|part| vec![part]),
        '\\' => escaped.map(|part| vec![part]),
        '`' => cut_err(fail).context(StrContext::Label("command substitution")),
        _ => take_while(1.., is_bare_char).map(|s: &str| vec![WordPart::Literal(s.to_string())]),
    }
    .parse_next(input)
}

fn flatten(parts: Vec<Vec<WordPart>>) -> Word {
    parts.into_iter().flatten().collect()
}

/// A possibly empty word.
fn word0(input: &mut &str) -> ModalResult<Word> {
    repeat(0.., word_part).map(flatten).parse_next(input)
}

fn word1(input: &mut &str) -> ModalResult<Word> {
    repeat(1.., word_part).map(flatten).parse_next(input)
}

fn array(input: &mut &str) -> ModalResult<Vec<Word>> {
    preceded(
        '(',
        cut_err(terminated(
            repeat(0.., preceded(multiline_blank, word1)),
            (multiline_blank, ')'),
        ))
        .context(StrContext::Label("array")),
    )
    .parse_next(input)
}

fn assignment(input: &mut &str) -> ModalResult<(String, Value)> {
    let name = terminated(name, '=').parse_next(input)?;
    let value = alt((array.map(Value::Array), word0.map(Value::Scalar))).parse_next(input)?;
    Ok((name, value))
}

fn keyword_command<'s>(keyword: &'static str) -> impl Parser<&'s str, (), ErrMode<ContextError>> {
    (keyword, take_while(1.., [' ', '\t'])).void()
}

fn statement(input: &mut &str) -> ModalResult<Command> {
    alt((
        preceded(
            keyword_command("source"),
            cut_err(word1).context(StrContext::Label("source argument")),
        )
        .map(Command::Source),
        preceded(
            keyword_command("inherit"),
            repeat(0.., terminated(word1, blank)),
        )
        .map(Command::Inherit),
        repeat(1.., terminated(assignment, blank)).map(Command::Assign),
        cut_err(fail).context(StrContext::Label("statement")),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs.iter().copied().collect()
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn eval_str(contents: &str) -> Result<Vars> {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "make.conf", contents);
        eval(&path, &mut Vars::new(), false)
    }

    #[test]
    fn simple_assignments() {
        assert_eq!(
            eval_str("A=a; B=\"b\"").unwrap(),
            vars(&[("A", "a"), ("B", "b")])
        );
    }

    #[test]
    fn expansions() {
        assert_eq!(
            eval_str("A=a; B=\"${A} $A\"").unwrap(),
            vars(&[("A", "a"), ("B", "a a")])
        );
        assert_eq!(
            eval_str("A=x B=$A$A C=${MISSING}").unwrap(),
            vars(&[("A", "x"), ("B", "xx"), ("C", "")])
        );
    }

    #[test]
    fn source_directive() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sub.conf", "B=\"${A}${A}\"\n");
        let path = write(dir.path(), "main.conf", "A=a; source sub.conf; C=\"c${B}c\"\n");

        let got = eval(&path, &mut Vars::new(), true).unwrap();
        assert_eq!(got, vars(&[("A", "a"), ("B", "aa"), ("C", "caac")]));

        let err = eval(&path, &mut Vars::new(), false).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }), "{err}");
    }

    #[test]
    fn updates_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "make.conf", "B=$A\n");
        let mut env = vars(&[("A", "a"), ("B", "b")]);
        let got = eval(&path, &mut env, false).unwrap();
        assert_eq!(got, vars(&[("B", "a")]));
        assert_eq!(env, vars(&[("A", "a"), ("B", "a")]));
    }

    #[test]
    fn quoting_and_escapes() {
        let got = eval_str("A='x $y' B=\"q\\\"\\$z\\n\" C=a\\ b D=a\\\nb E=").unwrap();
        assert_eq!(
            got,
            vars(&[
                ("A", "x $y"),
                ("B", "q\"$z\\n"),
                ("C", "a b"),
                ("D", "ab"),
                ("E", ""),
            ])
        );
    }

    #[test]
    fn multiline_values_and_comments() {
        let got = eval_str("# header\nUSE=\"a\n  b\" # trailing\n\n;X=1#not-a-comment\n").unwrap();
        assert_eq!(got, vars(&[("USE", "a\n  b"), ("X", "1#not-a-comment")]));
    }

    #[test]
    fn syntax_errors_carry_location() {
        let err = eval_str("A=1\necho hi\n").unwrap_err();
        match err {
            Error::Syntax { location, .. } => assert!(location.ends_with(":2"), "{location}"),
            other => panic!("expected Syntax, got {other}"),
        }

        for s in [
            "A=$(date)",
            "A=`date`",
            "A+=b",
            "A=\"unterminated",
            "A=${B:-c}",
            "A=b | c",
        ] {
            assert!(
                matches!(eval_str(s), Err(Error::Syntax { .. })),
                "{s} should be rejected"
            );
        }
    }

    #[test]
    fn ebuild_constructs_outside_ebuilds() {
        for s in ["A=(x y)", "inherit eutils"] {
            match eval_str(s) {
                Err(Error::Unsupported(message)) => assert!(message.contains(":1: "), "{message}"),
                other => panic!("{s}: expected Unsupported, got {other:?}"),
            }
        }
    }

    #[test]
    fn make_defaults_merges_incremental() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "make.defaults",
            "USE=\"b ${USE}\"\nARCH=amd64\nX=\"${ARCH}\"\n",
        );
        let mut v = vars(&[("USE", "a"), ("ARCH", "x86")]);
        parse_make_defaults(&path, &mut v).unwrap();
        assert_eq!(v.list("USE"), ["a", "b"]);
        assert_eq!(v.value("ARCH"), "amd64");
        assert_eq!(v.value("X"), "amd64");
    }

    #[test]
    fn ebuild_dialect() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "foo-1.ebuild",
            "EAPI=7\ninherit cros-workon toolchain-funcs\ninherit flag-o-matic\n\
             CROS_WORKON_PROJECT=(\n  \"chromiumos/a\" # first\n  \"chromiumos/b\"\n)\n\
             DESCRIPTION=\"${PN} package\"\n",
        );
        let mut env = vars(&[("PN", "foo")]);
        let got = eval_ebuild(&path, &mut env).unwrap();
        assert_eq!(
            got.value("INHERITED"),
            "cros-workon toolchain-funcs flag-o-matic"
        );
        assert_eq!(got.value("CROS_WORKON_PROJECT"), "chromiumos/a|chromiumos/b");
        assert_eq!(got.value("DESCRIPTION"), "foo package");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = eval(&dir.path().join("nope"), &mut Vars::new(), false).unwrap_err();
        assert!(err.is_not_found());
    }
}
