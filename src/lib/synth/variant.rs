//! The synthesized variant record and the per-record helpers shared by every output mode.

use std::fmt;

use bstr::BString;

use crate::config::CallerConfig;
use crate::variation::{Descriptor, SvKind};

/// Strand-bias classes for the reference allele and the variant allele.
///
/// Each class is `0` (too few reads to tell), `1` (biased) or `2` (balanced, or seen on both
/// strands when there are few reads).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrandBias {
    pub reference: u8,
    pub variant: u8,
}

impl fmt::Display for StrandBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.reference, self.variant)
    }
}

/// Classifies the strand balance of `forward` and `reverse` supporting reads.
///
/// # Examples
/// ```
/// use vardict_lib::config::CallerConfig;
/// use vardict_lib::synth::strand_bias;
///
/// let config = CallerConfig::default();
/// assert_eq!(strand_bias(6, 6, &config), 2);
/// assert_eq!(strand_bias(12, 0, &config), 0);
/// ```
#[must_use]
pub fn strand_bias(forward: i32, reverse: i32, config: &CallerConfig) -> u8 {
    let total = forward + reverse;
    if total <= 12 {
        return if forward * reverse > 0 { 2 } else { 0 };
    }
    let total = f64::from(total);
    let balanced = f64::from(forward) / total >= config.bias
        && f64::from(reverse) / total >= config.bias
        && forward >= config.min_bias_reads
        && reverse >= config.min_bias_reads;
    if balanced { 2 } else { 1 }
}

/// Variant class derived from the final alleles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Snv,
    Insertion,
    Deletion,
    Complex,
    Structural(SvKind),
}

impl VarType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snv => "SNV",
            Self::Insertion => "Insertion",
            Self::Deletion => "Deletion",
            Self::Complex => "Complex",
            Self::Structural(SvKind::Deletion) => "DEL",
            Self::Structural(SvKind::Duplication) => "DUP",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a reference/variant allele pair.
#[must_use]
pub fn var_type(reference: &[u8], variant: &[u8]) -> VarType {
    match (reference, variant) {
        ([_], [_]) => VarType::Snv,
        ([r, ..], [v, ..]) if r != v => VarType::Complex,
        ([_], [_, _, ..]) if variant.starts_with(reference) => VarType::Insertion,
        ([_, _, ..], [_]) if reference.starts_with(variant) => VarType::Deletion,
        _ => VarType::Complex,
    }
}

/// One reported allele at one position, or the reference record of that position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variant {
    /// The table key this record was built from; `None` for an empty reference record.
    pub descriptor: Option<Descriptor>,
    /// Set when a long indel is reported as a symbolic allele.
    pub structural: Option<SvKind>,
    pub start: i64,
    pub end: i64,
    pub ref_allele: BString,
    pub var_allele: BString,
    /// Reads covering the position.
    pub total_depth: i32,
    /// Reads supporting this allele.
    pub depth: i32,
    pub ref_forward: i32,
    pub ref_reverse: i32,
    pub forward: i32,
    pub reverse: i32,
    pub genotype: String,
    pub frequency: f64,
    pub bias: StrandBias,
    pub mean_position: f64,
    pub position_varies: bool,
    pub mean_quality: f64,
    pub quality_varies: bool,
    pub mean_mapq: f64,
    pub quality_ratio: f64,
    pub high_quality_frequency: f64,
    pub extra_frequency: f64,
    pub shift3: i64,
    pub msi: f64,
    /// Length of the repeat unit behind `msi`.
    pub msi_unit: usize,
    pub mean_mismatches: f64,
    pub high_quality_count: i32,
    pub high_quality_depth: i32,
    pub left_flank: BString,
    pub right_flank: BString,
    /// Candidate summary of the whole position, when tracing is on.
    pub debug: Option<String>,
}

impl Variant {
    /// Class of this record; symbolic alleles take precedence over the allele shapes.
    #[must_use]
    pub fn var_type(&self) -> VarType {
        match self.structural {
            Some(kind) => VarType::Structural(kind),
            None => var_type(&self.ref_allele, &self.var_allele),
        }
    }

    /// Text of the table key (`""` for an empty reference record).
    #[must_use]
    pub fn key(&self) -> String {
        self.descriptor.as_ref().map(Descriptor::render).unwrap_or_default()
    }
}

/// Trims bases shared by both alleles of a complex variant, moving them into the flanks.
///
/// At least one base of each allele always remains.
pub fn adj_complex(variant: &mut Variant) {
    let refnt = variant.ref_allele.clone();
    let varnt = variant.var_allele.clone();
    let mut n = 0;
    while refnt.len() - n > 1 && varnt.len() - n > 1 && refnt[n] == varnt[n] {
        n += 1;
    }
    if n > 0 {
        variant.start += n as i64;
        variant.ref_allele = refnt[n..].into();
        variant.var_allele = varnt[n..].into();
        let mut left = variant.left_flank.to_vec();
        left.extend_from_slice(&refnt[..n]);
        variant.left_flank = left.get(n..).unwrap_or_default().into();
    }

    let refnt = variant.ref_allele.clone();
    let varnt = variant.var_allele.clone();
    let mut n = 1;
    while refnt.len() > n && varnt.len() > n && refnt[refnt.len() - n] == varnt[varnt.len() - n] {
        n += 1;
    }
    if n > 1 {
        let trim = n - 1;
        variant.end -= trim as i64;
        variant.ref_allele = refnt[..refnt.len() - trim].into();
        variant.var_allele = varnt[..varnt.len() - trim].into();
        let mut right = refnt[refnt.len() - trim..].to_vec();
        let keep = variant.right_flank.len().saturating_sub(trim);
        right.extend_from_slice(&variant.right_flank[..keep]);
        variant.right_flank = right.into();
    }
}
