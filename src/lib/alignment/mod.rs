//! Aligned reads as the caller sees them.
//!
//! [`AlignmentRecord`] carries only the fields the walker consults, decoded once from a noodles
//! [`RecordBuf`]. CIGARs are kept as `(Kind, usize)` pairs so that they can be rewritten by
//! [`cigar::modify_cigar`] without touching the source record.

pub mod cigar;
pub mod source;

pub use source::{AlignmentSource, BamSource, MemorySource};

use anyhow::{Context, Result};
use noodles::sam;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;

/// CIGAR operations as `(kind, length)` pairs.
pub type CigarOps = Vec<(Kind, usize)>;

/// One aligned read.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub name: String,
    pub flags: Flags,
    pub chrom: String,
    /// 1-based leftmost aligned position.
    pub position: i64,
    pub mapping_quality: u8,
    pub cigar: CigarOps,
    /// Uppercased read bases; empty when the record stores none.
    pub sequence: Vec<u8>,
    /// Raw Phred base qualities.
    pub qualities: Vec<u8>,
    /// Mate contig, when the mate is placed.
    pub mate_chrom: Option<String>,
    pub mate_position: i64,
    pub template_length: i64,
    /// The `NM` tag, when present.
    pub edit_distance: Option<i32>,
    /// True when an `SA` tag is present.
    pub has_supplementary_alignments: bool,
}

fn int_value(value: &Value) -> Option<i32> {
    match value {
        Value::Int8(i) => Some(i32::from(*i)),
        Value::UInt8(i) => Some(i32::from(*i)),
        Value::Int16(i) => Some(i32::from(*i)),
        Value::UInt16(i) => Some(i32::from(*i)),
        Value::Int32(i) => Some(*i),
        Value::UInt32(i) => i32::try_from(*i).ok(),
        _ => None,
    }
}

fn reference_name(header: &sam::Header, id: Option<usize>) -> Result<Option<String>> {
    let Some(id) = id else {
        return Ok(None);
    };
    let (name, _) =
        header.reference_sequences().get_index(id).context("Reference sequence ID not found in header")?;
    Ok(Some(std::str::from_utf8(name.as_ref())?.to_string()))
}

impl AlignmentRecord {
    /// Decodes the fields the caller needs from a noodles record.
    pub fn from_record_buf(header: &sam::Header, record: &RecordBuf) -> Result<Self> {
        let chrom = reference_name(header, record.reference_sequence_id())?.unwrap_or_default();
        let mate_chrom = reference_name(header, record.mate_reference_sequence_id())?;
        let mut sequence = record.sequence().as_ref().to_vec();
        sequence.make_ascii_uppercase();
        let data = record.data();
        Ok(Self {
            name: record.name().map(|n| n.to_string()).unwrap_or_default(),
            flags: record.flags(),
            chrom,
            position: record.alignment_start().map_or(0, |p| usize::from(p) as i64),
            mapping_quality: record.mapping_quality().map_or(255, |q| q.get()),
            cigar: record.cigar().as_ref().iter().map(|op| (op.kind(), op.len())).collect(),
            sequence,
            qualities: record.quality_scores().as_ref().to_vec(),
            mate_chrom,
            mate_position: record.mate_alignment_start().map_or(0, |p| usize::from(p) as i64),
            template_length: i64::from(record.template_length()),
            edit_distance: data.get(&Tag::EDIT_DISTANCE).and_then(int_value),
            has_supplementary_alignments: data.get(&Tag::OTHER_ALIGNMENTS).is_some(),
        })
    }

    /// True when the mate sits on the same contig.
    #[must_use]
    pub fn mate_on_same_chrom(&self) -> bool {
        self.mate_chrom.as_deref() == Some(self.chrom.as_str())
    }

    /// Reference bases covered by M and D operations.
    #[must_use]
    pub fn aligned_length(&self) -> i64 {
        aligned_length(&self.cigar)
    }

    /// Base quality at read offset `i`, 0 when the record carries no qualities.
    #[must_use]
    pub fn quality(&self, i: usize) -> u8 {
        self.qualities.get(i).copied().unwrap_or(0)
    }
}

/// Parses a CIGAR string into operations, skipping zero-length ones.
///
/// ```
/// use noodles::sam::alignment::record::cigar::op::Kind;
/// use vardict_lib::alignment::parse_cigar_string;
///
/// assert_eq!(parse_cigar_string("3S10M"), vec![(Kind::SoftClip, 3), (Kind::Match, 10)]);
/// ```
#[must_use]
pub fn parse_cigar_string(cigar_str: &str) -> CigarOps {
    let mut ops = Vec::new();
    let mut num_str = String::new();

    for ch in cigar_str.chars() {
        if ch.is_ascii_digit() {
            num_str.push(ch);
        } else {
            let len: usize = num_str.parse().unwrap_or(0);
            num_str.clear();

            let kind = match ch {
                'M' => Kind::Match,
                'I' => Kind::Insertion,
                'D' => Kind::Deletion,
                'N' => Kind::Skip,
                'S' => Kind::SoftClip,
                'H' => Kind::HardClip,
                'P' => Kind::Pad,
                '=' => Kind::SequenceMatch,
                'X' => Kind::SequenceMismatch,
                _ => continue,
            };

            if len > 0 {
                ops.push((kind, len));
            }
        }
    }

    ops
}

/// Symbol of an operation kind.
#[must_use]
pub fn kind_symbol(kind: Kind) -> char {
    match kind {
        Kind::Match => 'M',
        Kind::Insertion => 'I',
        Kind::Deletion => 'D',
        Kind::Skip => 'N',
        Kind::SoftClip => 'S',
        Kind::HardClip => 'H',
        Kind::Pad => 'P',
        Kind::SequenceMatch => '=',
        Kind::SequenceMismatch => 'X',
    }
}

/// Renders operations back to CIGAR text.
#[must_use]
pub fn format_cigar(ops: &[(Kind, usize)]) -> String {
    ops.iter().map(|(kind, len)| format!("{len}{}", kind_symbol(*kind))).collect()
}

/// Reference bases covered by M and D operations (and their `=`/`X` forms).
#[must_use]
pub fn aligned_length(ops: &[(Kind, usize)]) -> i64 {
    ops.iter()
        .filter_map(|(kind, len)| match kind {
            Kind::Match | Kind::Deletion | Kind::SequenceMatch | Kind::SequenceMismatch => {
                Some(*len as i64)
            }
            _ => None,
        })
        .sum()
}

/// Read bases consumed by M and I operations.
#[must_use]
pub fn match_insertion_length(ops: &[(Kind, usize)]) -> i64 {
    ops.iter()
        .filter(|(kind, _)| {
            matches!(kind, Kind::Match | Kind::Insertion | Kind::SequenceMatch | Kind::SequenceMismatch)
        })
        .map(|(_, len)| *len as i64)
        .sum()
}

/// Read bases consumed by M, I and S operations.
#[must_use]
pub fn read_span_length(ops: &[(Kind, usize)]) -> i64 {
    match_insertion_length(ops)
        + ops.iter().filter(|(kind, _)| *kind == Kind::SoftClip).map(|(_, len)| *len as i64).sum::<i64>()
}

/// Total length of I and D operations.
#[must_use]
pub fn indel_length(ops: &[(Kind, usize)]) -> i64 {
    ops.iter()
        .filter(|(kind, _)| matches!(kind, Kind::Insertion | Kind::Deletion))
        .map(|(_, len)| *len as i64)
        .sum()
}
