use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A version suffix label.
///
/// Ordered as `_alpha < _beta < _pre < _rc < _p`; an absent suffix sorts
/// between `_rc` and `_p`.
///
/// See [PMS 3.3](https://projects.gentoo.org/pms/9/pms.html#version-specifications).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SuffixLabel {
    Alpha,
    Beta,
    Pre,
    Rc,
    P,
}

impl SuffixLabel {
    const ALL: [SuffixLabel; 5] = [
        SuffixLabel::Alpha,
        SuffixLabel::Beta,
        SuffixLabel::Pre,
        SuffixLabel::Rc,
        SuffixLabel::P,
    ];

    /// The label as written, including the leading underscore.
    pub fn as_str(&self) -> &'static str {
        match self {
            SuffixLabel::Alpha => "_alpha",
            SuffixLabel::Beta => "_beta",
            SuffixLabel::Pre => "_pre",
            SuffixLabel::Rc => "_rc",
            SuffixLabel::P => "_p",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SuffixLabel::Alpha => 1,
            SuffixLabel::Beta => 2,
            SuffixLabel::Pre => 3,
            SuffixLabel::Rc => 4,
            SuffixLabel::P => 6,
        }
    }
}

/// Rank of a missing suffix relative to [`SuffixLabel::rank`].
const NO_SUFFIX_RANK: u8 = 5;

/// One `_label[N]` version suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Suffix {
    pub label: SuffixLabel,
    /// Numeric argument as written; empty when absent.
    pub number: String,
}

impl Suffix {
    fn compare(&self, other: &Suffix) -> Ordering {
        self.label
            .rank()
            .cmp(&other.label.rank())
            .then_with(|| compare_string_int(&self.number, &other.number))
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.label.as_str(), self.number)
    }
}

/// A package version such as `1.2.3b_rc1_p2-r4`.
///
/// Numeric components keep their textual form so formatting round-trips
/// (`1.010` stays `1.010`). Equality and ordering follow the Portage
/// comparison algorithm, so `1.0` and `1.0-r0` are equal.
///
/// See [PMS 3.2](https://projects.gentoo.org/pms/9/pms.html#version-comparison).
#[derive(Debug, Clone)]
pub struct Version {
    main: Vec<String>,
    letter: Option<char>,
    suffixes: Vec<Suffix>,
    revision: String,
}

impl Version {
    /// Split a trailing version off a string.
    ///
    /// Returns the unparsed prefix together with the version. The prefix
    /// keeps any separating hyphen.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_depgraph::Version;
    ///
    /// let (prefix, ver) = Version::extract_suffix("net-misc/curl-7.78.0-r1").unwrap();
    /// assert_eq!(prefix, "net-misc/curl-");
    /// assert_eq!(ver.to_string(), "7.78.0-r1");
    /// ```
    pub fn extract_suffix(input: &str) -> Result<(&str, Version)> {
        let mut rest = input;

        let mut revision = String::new();
        if let Some(pos) = rest.rfind("-r") {
            let digits = &rest[pos + 2..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                revision = digits.to_string();
                rest = &rest[..pos];
            }
        }

        let mut suffixes = Vec::new();
        while let Some((head, suffix)) = strip_suffix_token(rest) {
            suffixes.push(suffix);
            rest = head;
        }
        suffixes.reverse();

        let mut letter = None;
        if let Some(c) = rest.chars().next_back() {
            if c.is_ascii_lowercase() {
                letter = Some(c);
                rest = &rest[..rest.len() - 1];
            }
        }

        let start = main_start(rest)
            .ok_or_else(|| Error::InvalidVersion(format!("{input}: missing numeric part")))?;
        let main = rest[start..].split('.').map(str::to_string).collect();

        Ok((
            &rest[..start],
            Version {
                main,
                letter,
                suffixes,
                revision,
            },
        ))
    }

    /// Numeric components as written.
    pub fn main(&self) -> &[String] {
        &self.main
    }

    /// Optional trailing letter.
    pub fn letter(&self) -> Option<char> {
        self.letter
    }

    /// Version suffixes in order.
    pub fn suffixes(&self) -> &[Suffix] {
        &self.suffixes
    }

    /// Revision number without the `-r` prefix, if any.
    pub fn revision(&self) -> Option<&str> {
        if self.revision.is_empty() {
            None
        } else {
            Some(&self.revision)
        }
    }

    /// First numeric component.
    pub fn major(&self) -> &str {
        self.main.first().map(String::as_str).unwrap_or("0")
    }

    /// A copy of this version without its revision.
    pub fn drop_revision(&self) -> Version {
        Version {
            revision: String::new(),
            ..self.clone()
        }
    }

    /// Whether this version matches `prefix` as used by `=pkg-1.2*`.
    ///
    /// The revision is ignored unless the prefix has one. Suffixes are
    /// truncated to the prefix's count; when the prefix has neither suffix
    /// nor letter, the letter is ignored and numeric components are
    /// truncated too.
    pub fn has_prefix(&self, prefix: &Version) -> bool {
        let mut copy = self.clone();
        if prefix.revision.is_empty() {
            copy.revision.clear();
            copy.suffixes.truncate(prefix.suffixes.len());
            if prefix.suffixes.is_empty() && prefix.letter.is_none() {
                copy.letter = None;
                copy.main.truncate(prefix.main.len());
            }
        }
        copy.compare(prefix) == Ordering::Equal
    }

    /// Compare two versions with the Portage algorithm.
    pub fn compare(&self, other: &Version) -> Ordering {
        let first = compare_string_int(self.major(), other.major());
        if first != Ordering::Equal {
            return first;
        }

        for (a, b) in self.main.iter().zip(&other.main).skip(1) {
            let ord = if a.starts_with('0') || b.starts_with('0') {
                a.trim_end_matches('0').cmp(b.trim_end_matches('0'))
            } else {
                compare_string_int(a, b)
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        let ord = self.main.len().cmp(&other.main.len());
        if ord != Ordering::Equal {
            return ord;
        }

        let ord = self.letter.cmp(&other.letter);
        if ord != Ordering::Equal {
            return ord;
        }

        for (a, b) in self.suffixes.iter().zip(&other.suffixes) {
            let ord = a.compare(b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        let common = self.suffixes.len().min(other.suffixes.len());
        match (self.suffixes.get(common), other.suffixes.get(common)) {
            (Some(extra), None) => return extra.label.rank().cmp(&NO_SUFFIX_RANK),
            (None, Some(extra)) => return NO_SUFFIX_RANK.cmp(&extra.label.rank()),
            _ => {}
        }

        compare_string_int(&self.revision, &other.revision)
    }
}

fn strip_suffix_token(s: &str) -> Option<(&str, Suffix)> {
    let digits_start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map_or(s.len(), |(i, _)| i);
    let head = &s[..digits_start];
    SuffixLabel::ALL.iter().find_map(|label| {
        head.strip_suffix(label.as_str()).map(|rest| {
            (
                rest,
                Suffix {
                    label: *label,
                    number: s[digits_start..].to_string(),
                },
            )
        })
    })
}

/// Start of the leftmost `[0-9]+(\.[0-9]+)*` match anchored at the end.
fn main_start(s: &str) -> Option<usize> {
    let tail = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .last()
        .map(|(i, _)| i)?;
    (tail..s.len())
        .filter(|&i| s.is_char_boundary(i))
        .find(|&i| is_dotted_number(&s[i..]))
}

fn is_dotted_number(s: &str) -> bool {
    !s.is_empty()
        && s
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Compare two decimal strings by numeric value.
fn compare_string_int(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (rest, ver) = Version::extract_suffix(s)?;
        if !rest.is_empty() {
            return Err(Error::InvalidVersion(format!("{s}: excess prefix")));
        }
        Ok(ver)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.main.join("."))?;
        if let Some(letter) = self.letter {
            write!(f, "{letter}")?;
        }
        for suffix in &self.suffixes {
            write!(f, "{suffix}")?;
        }
        if !self.revision.is_empty() {
            write!(f, "-r{}", self.revision)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn parse_components() {
        let ver = v("1.2.3b_alpha4_p-r5");
        assert_eq!(ver.main(), ["1", "2", "3"]);
        assert_eq!(ver.letter(), Some('b'));
        assert_eq!(ver.suffixes().len(), 2);
        assert_eq!(ver.suffixes()[0].label, SuffixLabel::Alpha);
        assert_eq!(ver.suffixes()[0].number, "4");
        assert_eq!(ver.suffixes()[1].label, SuffixLabel::P);
        assert_eq!(ver.suffixes()[1].number, "");
        assert_eq!(ver.revision(), Some("5"));
        assert_eq!(ver.major(), "1");
    }

    #[test]
    fn display_round_trip() {
        for s in [
            "0",
            "1.010",
            "7.78.0-r1",
            "1.0a",
            "2.0_rc1",
            "1_alpha_beta2_pre_rc3_p",
            "9999",
            "1.2.3b_p20220101-r12",
        ] {
            assert_eq!(v(s).to_string(), s);
        }
    }

    #[test]
    fn invalid_versions() {
        for s in ["", "a", "1.", ".1", "1..2", "1.0-r", "1.0_gamma", "foo-1.0"] {
            assert!(s.parse::<Version>().is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn extract_suffix_prefixes() {
        let (prefix, ver) = Version::extract_suffix("curl-7.78.0-r1").unwrap();
        assert_eq!(prefix, "curl-");
        assert_eq!(ver.to_string(), "7.78.0-r1");

        let (prefix, ver) = Version::extract_suffix("7.78.0-r1").unwrap();
        assert_eq!(prefix, "");
        assert_eq!(ver.to_string(), "7.78.0-r1");

        let (prefix, ver) = Version::extract_suffix("bzip2").unwrap();
        assert_eq!(prefix, "bzip");
        assert_eq!(ver.to_string(), "2");

        assert!(Version::extract_suffix("curl").is_err());
    }

    #[test]
    fn compare_table() {
        let cases = [
            ("1.0", "1.0", Ordering::Equal),
            ("1.0", "2.0", Ordering::Less),
            ("1.9", "1.10", Ordering::Less),
            ("1.099", "1.0100", Ordering::Greater),
            ("1.010", "1.01", Ordering::Equal),
            ("1.0280", "1.02800", Ordering::Equal),
            ("1.0", "1.0.0", Ordering::Less),
            ("1.0", "1.000", Ordering::Equal),
            ("01.0", "1.0", Ordering::Equal),
            ("1.0", "1.0a", Ordering::Less),
            ("1.0b", "1.0a", Ordering::Greater),
            ("1.0_alpha", "1.0_alpha0", Ordering::Equal),
            ("1.0_alpha", "1.0_beta", Ordering::Less),
            ("1.0_beta", "1.0_pre", Ordering::Less),
            ("1.0_pre", "1.0_rc", Ordering::Less),
            ("1.0_rc", "1.0", Ordering::Less),
            ("1.0", "1.0_p", Ordering::Less),
            ("1.0", "1.0_p1", Ordering::Less),
            ("1.0", "1.0_rc1", Ordering::Greater),
            ("1.0_rc1", "1.0_rc2", Ordering::Less),
            ("1.0_alpha_p", "1.0_alpha", Ordering::Greater),
            ("1.0_alpha_rc", "1.0_alpha", Ordering::Less),
            ("1.0_p_alpha", "1.0", Ordering::Greater),
            ("1.0", "1.0-r0", Ordering::Equal),
            ("1.0-r1", "1.0", Ordering::Greater),
            ("1.0-r9", "1.0-r10", Ordering::Less),
        ];
        for (a, b, want) in cases {
            assert_eq!(v(a).compare(&v(b)), want, "{a} vs {b}");
            assert_eq!(v(b).compare(&v(a)), want.reverse(), "{b} vs {a}");
        }
    }

    #[test]
    fn first_extra_suffix_decides() {
        // The first suffix without a counterpart is ranked against "no
        // suffix"; later suffixes never matter.
        assert!(v("1_alpha_p") > v("1_alpha"));
        assert!(v("1_alpha_rc_p") < v("1_alpha"));
        assert!(v("1_alpha_p_rc") > v("1_alpha"));
        assert!(v("1_alpha_p_rc") > v("1_alpha_p_alpha"));
    }

    #[test]
    fn equivalence_class() {
        let vers = ["1.0.2", "1.0.2-r0", "1.000.2"];
        for a in vers {
            for b in vers {
                assert_eq!(v(a), v(b), "{a} == {b}");
            }
        }
    }

    #[test]
    fn ordering_is_transitive_on_sample() {
        let mut sample: Vec<Version> = [
            "1.0_p1", "1.0", "0.9", "1.0_rc1", "1.0a", "1.0-r2", "1.10", "1.9", "1.0_alpha",
        ]
        .iter()
        .map(|s| v(s))
        .collect();
        sample.sort();
        let sorted: Vec<String> = sample.iter().map(|v| v.to_string()).collect();
        assert_eq!(
            sorted,
            ["0.9", "1.0_alpha", "1.0_rc1", "1.0", "1.0-r2", "1.0_p1", "1.0a", "1.9", "1.10"]
        );
    }

    #[test]
    fn drop_revision() {
        assert_eq!(v("1.2-r3").drop_revision().to_string(), "1.2");
        assert_eq!(v("1.2").drop_revision().to_string(), "1.2");
    }

    #[test]
    fn has_prefix() {
        assert!(v("0.1.0").has_prefix(&v("0.1")));
        assert!(v("1.0.0").has_prefix(&v("1")));
        assert!(v("1.2b-r1").has_prefix(&v("1.2")));
        assert!(v("1.2_rc1_p2").has_prefix(&v("1.2_rc1")));
        assert!(!v("1.2_rc1").has_prefix(&v("1.2_rc2")));
        assert!(!v("1.3").has_prefix(&v("1.2")));
        assert!(!v("1.2-r1").has_prefix(&v("1.2-r2")));
        assert!(!v("1").has_prefix(&v("1.0")));
    }
}
