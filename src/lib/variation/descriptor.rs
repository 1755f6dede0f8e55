//! Allele descriptors: the key under which a [`Variation`](super::Variation) is counted.
//!
//! Descriptors have a compact text form used for ordering, debugging and interchange:
//!
//! | form | meaning |
//! |------|---------|
//! | `A` | reference or substituted base |
//! | `A&CG` | multi-nucleotide substitution starting with `A` |
//! | `+ACG` | insertion of `ACG` after the anchor position |
//! | `-3` | deletion of three reference bases |
//! | `&TT` | trailing mismatched bases |
//! | `#TT^GG`, `#TT^2` | matched bases then a second insertion or deletion |
//! | `^AGT` | insertion directly following a deletion |
//! | `<DEL>`, `<DUP>` | structural deletion or duplication |
//!
//! Equality and ordering follow the text form, so a reference base and a substitution to the
//! same base compare equal.

use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::errors::VardictError;

/// A second indel linked to the first through a short run of matched bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkedIndel {
    Insertion(Vec<u8>),
    Deletion(u32),
}

/// One piece of a complex descriptor tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailSegment {
    /// `&bases`: bases that differ from the reference right after the event.
    Matched(Vec<u8>),
    /// `#matched^indel`.
    Linked { matched: Vec<u8>, indel: LinkedIndel },
    /// `^bases`.
    Inserted(Vec<u8>),
}

/// Ordered tail segments following the head of an indel descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplexTail(pub Vec<TailSegment>);

impl ComplexTail {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn single(segment: TailSegment) -> Self {
        Self(vec![segment])
    }

    /// Bases of the first `&` segment.
    #[must_use]
    pub fn first_matched(&self) -> Option<&[u8]> {
        self.0.iter().find_map(|s| match s {
            TailSegment::Matched(b) => Some(b.as_slice()),
            _ => None,
        })
    }

    /// True when the tail contains a `#..^..` link.
    #[must_use]
    pub fn has_link(&self) -> bool {
        self.0.iter().any(|s| matches!(s, TailSegment::Linked { .. }))
    }

    /// Matched bases of the first `#..^..` link.
    #[must_use]
    pub fn first_linked_matched(&self) -> Option<&[u8]> {
        self.0.iter().find_map(|s| match s {
            TailSegment::Linked { matched, .. } => Some(matched.as_slice()),
            _ => None,
        })
    }

    /// Bases of the first insertion in the tail, linked or direct.
    #[must_use]
    pub fn first_inserted(&self) -> Option<&[u8]> {
        self.0.iter().find_map(|s| match s {
            TailSegment::Inserted(b) | TailSegment::Linked { indel: LinkedIndel::Insertion(b), .. } => {
                Some(b.as_slice())
            }
            _ => None,
        })
    }

    /// Length of a linked deletion closing the tail.
    #[must_use]
    pub fn trailing_deletion(&self) -> Option<u32> {
        match self.0.last() {
            Some(TailSegment::Linked { indel: LinkedIndel::Deletion(len), .. }) => Some(*len),
            _ => None,
        }
    }

    /// Every base carried by the tail, in order, without markers or deletion lengths.
    #[must_use]
    pub fn bases(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in &self.0 {
            match segment {
                TailSegment::Matched(b) | TailSegment::Inserted(b) => out.extend_from_slice(b),
                TailSegment::Linked { matched, indel } => {
                    out.extend_from_slice(matched);
                    if let LinkedIndel::Insertion(b) = indel {
                        out.extend_from_slice(b);
                    }
                }
            }
        }
        out
    }

    fn render_into(&self, out: &mut String) {
        for segment in &self.0 {
            match segment {
                TailSegment::Matched(bases) => {
                    out.push('&');
                    push_bases(out, bases);
                }
                TailSegment::Linked { matched, indel } => {
                    out.push('#');
                    push_bases(out, matched);
                    out.push('^');
                    match indel {
                        LinkedIndel::Insertion(bases) => push_bases(out, bases),
                        LinkedIndel::Deletion(len) => {
                            let _ = write!(out, "{len}");
                        }
                    }
                }
                TailSegment::Inserted(bases) => {
                    out.push('^');
                    push_bases(out, bases);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvKind {
    Deletion,
    Duplication,
}

impl SvKind {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Deletion => "<DEL>",
            Self::Duplication => "<DUP>",
        }
    }
}

/// The allele observed at one position.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Reference(u8),
    Snv(u8),
    /// At least two bases; rendered as the first base, `&`, then the rest.
    Mnp(Vec<u8>),
    Insertion { bases: Vec<u8>, tail: ComplexTail },
    Deletion { length: u32, tail: ComplexTail },
    StructuralVariant(SvKind),
}

fn push_bases(out: &mut String, bases: &[u8]) {
    out.extend(bases.iter().map(|&b| b as char));
}

impl Descriptor {
    /// A single observed base, tagged against the reference base at its position.
    #[must_use]
    pub fn base(observed: u8, reference: Option<u8>) -> Self {
        if reference == Some(observed) { Self::Reference(observed) } else { Self::Snv(observed) }
    }

    #[must_use]
    pub fn insertion(bases: impl Into<Vec<u8>>) -> Self {
        Self::Insertion { bases: bases.into(), tail: ComplexTail::default() }
    }

    #[must_use]
    pub fn deletion(length: u32) -> Self {
        Self::Deletion { length, tail: ComplexTail::default() }
    }

    /// A deletion followed by mismatched bases (`-len&bases`).
    #[must_use]
    pub fn deletion_with_matched(length: u32, bases: impl Into<Vec<u8>>) -> Self {
        let bases = bases.into();
        if bases.is_empty() {
            return Self::deletion(length);
        }
        Self::Deletion { length, tail: ComplexTail::single(TailSegment::Matched(bases)) }
    }

    /// Single-base descriptor (reference or substitution).
    #[must_use]
    pub fn single_base(&self) -> Option<u8> {
        match self {
            Self::Reference(b) | Self::Snv(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_insertion(&self) -> bool {
        matches!(self, Self::Insertion { .. })
    }

    #[must_use]
    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::Deletion { .. })
    }

    #[must_use]
    pub fn is_indel(&self) -> bool {
        self.is_insertion() || self.is_deletion()
    }

    /// Deleted reference length, for deletions.
    #[must_use]
    pub fn deletion_length(&self) -> Option<u32> {
        match self {
            Self::Deletion { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// Inserted bases (head only), for insertions.
    #[must_use]
    pub fn inserted_bases(&self) -> Option<&[u8]> {
        match self {
            Self::Insertion { bases, .. } => Some(bases),
            _ => None,
        }
    }

    #[must_use]
    pub fn tail(&self) -> Option<&ComplexTail> {
        match self {
            Self::Insertion { tail, .. } | Self::Deletion { tail, .. } => Some(tail),
            _ => None,
        }
    }

    /// Insertion from text such as `ACG` or `ACG&TT`, split at the first `&`.
    #[must_use]
    pub fn insertion_from_text(text: &[u8]) -> Self {
        match text.iter().position(|&b| b == b'&') {
            Some(i) if i + 1 < text.len() => Self::Insertion {
                bases: text[..i].to_vec(),
                tail: ComplexTail::single(TailSegment::Matched(text[i + 1..].to_vec())),
            },
            Some(i) => Self::insertion(text[..i].to_vec()),
            None => Self::insertion(text.to_vec()),
        }
    }

    /// Head bases followed by every tail base, for insertions; tail bases only, for deletions.
    #[must_use]
    pub fn flattened_bases(&self) -> Vec<u8> {
        match self {
            Self::Insertion { bases, tail } => {
                let mut out = bases.clone();
                out.extend(tail.bases());
                out
            }
            Self::Deletion { tail, .. } => tail.bases(),
            Self::Reference(b) | Self::Snv(b) => vec![*b],
            Self::Mnp(bases) => bases.clone(),
            Self::StructuralVariant(_) => Vec::new(),
        }
    }

    /// True when the text form carries any of `&`, `#` or `^`.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        match self {
            Self::Mnp(_) => true,
            Self::Insertion { tail, .. } | Self::Deletion { tail, .. } => !tail.is_empty(),
            _ => false,
        }
    }

    /// Canonical text form.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Reference(b) | Self::Snv(b) => out.push(*b as char),
            Self::Mnp(bases) => {
                if let Some((first, rest)) = bases.split_first() {
                    out.push(*first as char);
                    out.push('&');
                    push_bases(&mut out, rest);
                }
            }
            Self::Insertion { bases, tail } => {
                out.push('+');
                push_bases(&mut out, bases);
                tail.render_into(&mut out);
            }
            Self::Deletion { length, tail } => {
                let _ = write!(out, "-{length}");
                tail.render_into(&mut out);
            }
            Self::StructuralVariant(kind) => out.push_str(kind.symbol()),
        }
        out
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Descriptor {}

impl PartialOrd for Descriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Descriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.single_base(), other.single_base()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.render().cmp(&other.render()),
        }
    }
}

const SPECIAL: &[u8] = b"&#^";

fn take_bases(s: &[u8], i: &mut usize) -> Vec<u8> {
    let start = *i;
    while *i < s.len() && !SPECIAL.contains(&s[*i]) {
        *i += 1;
    }
    s[start..*i].to_vec()
}

fn parse_tail(text: &str, s: &[u8], mut i: usize) -> crate::errors::Result<ComplexTail> {
    let invalid = |reason: String| VardictError::InvalidDescriptor {
        descriptor: text.to_string(),
        reason,
    };
    let mut segments = Vec::new();
    while i < s.len() {
        let marker = s[i];
        i += 1;
        match marker {
            b'&' => segments.push(TailSegment::Matched(take_bases(s, &mut i))),
            b'^' => segments.push(TailSegment::Inserted(take_bases(s, &mut i))),
            b'#' => {
                let matched = take_bases(s, &mut i);
                if s.get(i) != Some(&b'^') {
                    return Err(invalid("'#' must be followed by '^'".to_string()));
                }
                i += 1;
                let raw = take_bases(s, &mut i);
                let indel = if !raw.is_empty() && raw.iter().all(u8::is_ascii_digit) {
                    let len = std::str::from_utf8(&raw)
                        .ok()
                        .and_then(|d| d.parse().ok())
                        .ok_or_else(|| invalid("bad linked deletion length".to_string()))?;
                    LinkedIndel::Deletion(len)
                } else {
                    LinkedIndel::Insertion(raw)
                };
                segments.push(TailSegment::Linked { matched, indel });
            }
            other => return Err(invalid(format!("unexpected '{}'", other as char))),
        }
    }
    Ok(ComplexTail(segments))
}

impl FromStr for Descriptor {
    type Err = VardictError;

    fn from_str(text: &str) -> crate::errors::Result<Self> {
        let invalid = |reason: &str| VardictError::InvalidDescriptor {
            descriptor: text.to_string(),
            reason: reason.to_string(),
        };
        let s = text.as_bytes();
        match s {
            [] => Err(invalid("empty")),
            b"<DEL>" => Ok(Self::StructuralVariant(SvKind::Deletion)),
            b"<DUP>" => Ok(Self::StructuralVariant(SvKind::Duplication)),
            [b'+', ..] => {
                let mut i = 1;
                let bases = take_bases(s, &mut i);
                if bases.is_empty() {
                    return Err(invalid("insertion without bases"));
                }
                Ok(Self::Insertion { bases, tail: parse_tail(text, s, i)? })
            }
            [b'-', ..] => {
                let digits = s[1..].iter().take_while(|b| b.is_ascii_digit()).count();
                let length = text[1..=digits].parse().map_err(|_| invalid("bad deletion length"))?;
                Ok(Self::Deletion { length, tail: parse_tail(text, s, 1 + digits)? })
            }
            [b] if !SPECIAL.contains(b) => Ok(Self::Snv(*b)),
            [b, b'&', rest @ ..] if !SPECIAL.contains(b) && !rest.iter().any(|c| SPECIAL.contains(c)) => {
                let mut bases = Vec::with_capacity(rest.len() + 1);
                bases.push(*b);
                bases.extend_from_slice(rest);
                Ok(Self::Mnp(bases))
            }
            _ => Err(invalid("unrecognised descriptor")),
        }
    }
}
