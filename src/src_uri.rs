use std::collections::BTreeMap;
use std::fmt;

use winnow::ascii::multispace0;
use winnow::combinator::{cut_err, delimited, dispatch, opt, peek, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext};
use winnow::prelude::*;
use winnow::token::{any, take_while};

use crate::atom::UseFlags;
use crate::depdata::UriInfo;
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::packages::Package;

/// A single entry in a `SRC_URI` expression.
///
/// See [PMS 7.3.2](https://projects.gentoo.org/pms/9/pms.html#srcuri)
/// and [PMS 8.2](https://projects.gentoo.org/pms/9/pms.html#dependency-specification-format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrcUriEntry {
    /// `url` or `url -> file`.
    Uri { url: String, rename: Option<String> },
    /// `[!]flag? ( entries... )`
    UseConditional {
        flag: String,
        negated: bool,
        entries: Vec<SrcUriEntry>,
    },
    /// `( entries... )`
    Group(Vec<SrcUriEntry>),
}

impl SrcUriEntry {
    /// Parse a `SRC_URI` expression string into a list of entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::SrcUriEntry;
    ///
    /// let entries = SrcUriEntry::parse(
    ///     "https://example.com/foo-1.0.tar.gz ssl? ( https://example.com/ssl.patch )"
    /// ).unwrap();
    /// assert_eq!(entries.len(), 2);
    /// ```
    pub fn parse(input: &str) -> Result<Vec<SrcUriEntry>> {
        parse_src_uri_string()
            .parse(input)
            .map_err(|e| Error::InvalidSrcUri(format!("{e}")))
    }

    /// The local file name: the rename target, or the last path component
    /// of the URL. `None` for groups and conditionals.
    pub fn file_name(&self) -> Option<Result<&str>> {
        match self {
            SrcUriEntry::Uri {
                rename: Some(target),
                ..
            } => Some(Ok(target)),
            SrcUriEntry::Uri { url, rename: None } => Some(filename_from_url(url)),
            _ => None,
        }
    }
}

/// Group the URIs active under `use_flags` by local file name.
///
/// Files fetched from several mirrors keep their URIs in order of
/// appearance.
///
/// # Examples
///
/// ```
/// use portage_depgraph::{dist_files, SrcUriEntry, UseFlags};
///
/// let entries = SrcUriEntry::parse(
///     "mirror://gnu/a-1.tar.xz https://ftp.gnu.org/a-1.tar.xz \
///      doc? ( https://example.com/v1.zip -> a-doc-1.zip )",
/// ).unwrap();
/// let files = dist_files(&entries, &UseFlags::new()).unwrap();
/// assert_eq!(files.len(), 1);
/// assert_eq!(files["a-1.tar.xz"].len(), 2);
/// ```
pub fn dist_files(
    entries: &[SrcUriEntry],
    use_flags: &UseFlags,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut files = BTreeMap::new();
    collect_dist_files(entries, use_flags, &mut files)?;
    Ok(files)
}

fn collect_dist_files(
    entries: &[SrcUriEntry],
    use_flags: &UseFlags,
    files: &mut BTreeMap<String, Vec<String>>,
) -> Result<()> {
    for entry in entries {
        match entry {
            SrcUriEntry::Uri { url, .. } => {
                if let Some(file_name) = entry.file_name() {
                    files
                        .entry(file_name?.to_string())
                        .or_insert_with(Vec::new)
                        .push(url.clone());
                }
            }
            SrcUriEntry::UseConditional {
                flag,
                negated,
                entries,
            } => {
                if use_flags.contains(flag) != *negated {
                    collect_dist_files(entries, use_flags, files)?;
                }
            }
            SrcUriEntry::Group(entries) => collect_dist_files(entries, use_flags, files)?,
        }
    }
    Ok(())
}

/// The distribution files of `package` joined with its `Manifest`.
///
/// Packages without `SRC_URI` (or whose `SRC_URI` is empty under the
/// package's USE flags) do not need a `Manifest`.
pub fn extract_uris(package: &Package) -> Result<BTreeMap<String, UriInfo>> {
    let src_uri = package.metadata().value("SRC_URI");
    let entries = SrcUriEntry::parse(src_uri)?;
    let files = dist_files(&entries, package.use_flags())?;
    if files.is_empty() {
        return Ok(BTreeMap::new());
    }

    let dir = package.path().parent().unwrap_or(package.path());
    let manifest = Manifest::load(dir)?;
    files
        .into_iter()
        .map(|(file_name, uris)| {
            let entry = manifest.get(&file_name).ok_or_else(|| Error::InvalidManifest {
                path: manifest.path().to_path_buf(),
                message: format!("cannot find file {file_name}"),
            })?;
            let info = UriInfo {
                uris,
                size: entry.size,
                integrity: entry.integrity.clone(),
                sha256: entry.sha256.clone(),
                sha512: entry.sha512.clone(),
            };
            Ok((file_name, info))
        })
        .collect()
}

/// Extract the file name from a URL (last path component, without query
/// or fragment).
fn filename_from_url(url: &str) -> Result<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && path.contains('/') => Ok(name),
        _ => Err(Error::InvalidSrcUri(format!("{url}: no file name"))),
    }
}

impl fmt::Display for SrcUriEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SrcUriEntry::Uri { url, rename: None } => write!(f, "{url}"),
            SrcUriEntry::Uri {
                url,
                rename: Some(target),
            } => write!(f, "{url} -> {target}"),
            SrcUriEntry::UseConditional {
                flag,
                negated,
                entries,
            } => {
                if *negated {
                    write!(f, "!")?;
                }
                write!(f, "{flag}? ")?;
                fmt_group(f, entries)
            }
            SrcUriEntry::Group(entries) => fmt_group(f, entries),
        }
    }
}

fn fmt_group(f: &mut fmt::Formatter, entries: &[SrcUriEntry]) -> fmt::Result {
    write!(f, "(")?;
    for entry in entries {
        write!(f, " {entry}")?;
    }
    write!(f, " )")
}

// Winnow parsers

fn is_uri_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')'
}

fn is_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '%' | '~' | ',')
}

fn is_flag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '@')
}

fn parse_filename<'s>() -> impl Parser<&'s str, String, ErrMode<ContextError>> {
    take_while(1.., is_filename_char).map(|s: &str| s.to_string())
}

/// Parse a single URI, optionally followed by `-> filename`.
fn parse_uri_entry(input: &mut &str) -> ModalResult<SrcUriEntry> {
    let url = take_while(1.., is_uri_char).parse_next(input)?;
    let rename = opt(preceded(
        (multispace0, "->", multispace0),
        cut_err(parse_filename()).context(StrContext::Label("renamed file")),
    ))
    .parse_next(input)?;
    Ok(SrcUriEntry::Uri {
        url: url.to_string(),
        rename,
    })
}

/// Parse `[!]flag? ( entries... )`, falling back to a URI when the token
/// is not followed by `?`.
fn parse_conditional_or_uri(input: &mut &str) -> ModalResult<SrcUriEntry> {
    let checkpoint = *input;
    let negated = opt('!').parse_next(input)?.is_some();
    let flag: ModalResult<&str> = take_while(1.., is_flag_char).parse_next(input);
    if let Ok(flag) = flag {
        if opt('?').parse_next(input)?.is_some() && input.starts_with(char::is_whitespace) {
            multispace0.parse_next(input)?;
            let entries = cut_err(parse_group_body)
                .context(StrContext::Label("USE conditional group"))
                .parse_next(input)?;
            return Ok(SrcUriEntry::UseConditional {
                flag: flag.to_string(),
                negated,
                entries,
            });
        }
    }
    *input = checkpoint;
    parse_uri_entry(input)
}

fn parse_group_body(input: &mut &str) -> ModalResult<Vec<SrcUriEntry>> {
    delimited(
        '(',
        parse_src_uri_entries,
        cut_err((multispace0, ')')).context(StrContext::Label("closing ')'")),
    )
    .parse_next(input)
}

/// Parse a single SRC_URI entry.
fn parse_src_uri_entry(input: &mut &str) -> ModalResult<SrcUriEntry> {
    dispatch! {peek(any);
        '(' => parse_group_body.map(SrcUriEntry::Group),
        _ => parse_conditional_or_uri,
    }
    .parse_next(input)
}

/// Parse zero or more SRC_URI entries separated by whitespace.
fn parse_src_uri_entries(input: &mut &str) -> ModalResult<Vec<SrcUriEntry>> {
    repeat(0.., preceded(multispace0, parse_src_uri_entry)).parse_next(input)
}

fn parse_src_uri_string<'s>() -> impl Parser<&'s str, Vec<SrcUriEntry>, ErrMode<ContextError>> {
    move |input: &mut &'s str| {
        let entries = parse_src_uri_entries(input)?;
        multispace0.parse_next(input)?;
        Ok(entries)
    }
}
