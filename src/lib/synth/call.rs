//! Choosing which synthesized records are reported, per execution mode.

use ahash::AHashSet;
use bstr::BString;
use itertools::Itertools;

use super::{PositionVariants, RegionVariants, VarType, Variant, adj_complex, is_good_var};
use crate::config::CallerConfig;
use crate::region::Region;
use crate::walker::SpliceSet;

/// One reported row of a single-sample run.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub position: i64,
    /// `None` for an empty pileup row.
    pub variant: Option<Variant>,
    /// `None` for reference-only pileup rows.
    pub var_type: Option<VarType>,
}

/// One row comparing an allele across two samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PairedCall {
    pub position: i64,
    pub first: Option<Variant>,
    pub second: Option<Variant>,
    pub var_type: VarType,
}

impl PairedCall {
    /// The record whose alleles and repeat context describe the row.
    #[must_use]
    pub fn lead(&self) -> Option<&Variant> {
        self.first
            .as_ref()
            .filter(|v| v.depth > 0)
            .or(self.second.as_ref().filter(|v| v.depth > 0))
            .or(self.first.as_ref())
    }
}

/// One row of an amplicon run: the best allele at a position across overlapping amplicons.
#[derive(Debug, Clone, PartialEq)]
pub struct AmpliconCall {
    pub position: i64,
    pub variant: Option<Variant>,
    pub var_type: Option<VarType>,
    /// Amplicon of the highest-frequency good call, or the first covering amplicon.
    pub amplicon: String,
    /// Amplicons calling the allele, less those whose primers overlap it.
    pub good_amplicons: usize,
    /// `good_amplicons` plus amplicons whose insert covers the allele but do not call it.
    pub covering_amplicons: usize,
    /// Amplicons with under 2% of the best depth.
    pub no_coverage: usize,
    /// Different amplicons call different alleles.
    pub conflict: bool,
}

fn positions(region: &Region, vars: &RegionVariants, pileup: bool) -> Vec<i64> {
    if pileup {
        (region.start..=region.end).collect()
    } else {
        vars.range(region.start..=region.end).map(|(&p, _)| p).collect()
    }
}

fn finalize(variant: &Variant) -> (Variant, VarType) {
    let mut variant = variant.clone();
    let var_type = variant.var_type();
    if var_type == VarType::Complex {
        adj_complex(&mut variant);
    }
    (variant, var_type)
}

/// Reportable rows of one single-sample region, in position order.
///
/// Alleles failing [`is_good_var`] are kept only in pileup mode, which also reports reference
/// records and empty rows for uncovered positions.
#[must_use]
pub fn select_calls(region: &Region, vars: &RegionVariants, splices: &SpliceSet, config: &CallerConfig) -> Vec<Call> {
    let mut calls = Vec::new();
    for p in positions(region, vars, config.pileup) {
        let at = vars.get(&p);
        let Some(at) = at.filter(|a| !a.variants.is_empty()) else {
            if config.pileup {
                calls.push(Call { position: p, variant: at.and_then(|a| a.reference.clone()), var_type: None });
            }
            continue;
        };
        for v in &at.variants {
            if v.ref_allele.contains(&b'N') {
                continue;
            }
            if !config.pileup && !is_good_var(v, at.reference.as_ref(), v.var_type(), splices, config) {
                continue;
            }
            let (variant, var_type) = finalize(v);
            calls.push(Call { position: p, variant: Some(variant), var_type: Some(var_type) });
        }
    }
    calls
}

/// Good alleles at the front of `at.variants`, stopping at the first that fails the filter.
fn leading_good<'v>(at: &'v PositionVariants, splices: &SpliceSet, config: &CallerConfig) -> Vec<&'v Variant> {
    at.variants
        .iter()
        .take_while(|v| is_good_var(v, at.reference.as_ref(), v.var_type(), splices, config))
        .collect()
}

/// Rows comparing the same region across two samples.
///
/// Every good allele of either sample is reported once, next to the other sample's record for
/// the same allele (or its reference record when the allele is absent there).
#[must_use]
pub fn select_paired_calls(
    region: &Region,
    first: &RegionVariants,
    second: &RegionVariants,
    splices: &SpliceSet,
    config: &CallerConfig,
) -> Vec<PairedCall> {
    let span = region.start..=region.end;
    let all = first
        .range(span.clone())
        .map(|(&p, _)| p)
        .merge(second.range(span).map(|(&p, _)| p))
        .dedup();

    let empty = PositionVariants::default();
    let mut calls = Vec::new();
    for p in all {
        let a = first.get(&p).unwrap_or(&empty);
        let b = second.get(&p).unwrap_or(&empty);
        let good_a = leading_good(a, splices, config);
        for v in &good_a {
            let (lead, var_type) = finalize(v);
            let other = v
                .descriptor
                .as_ref()
                .and_then(|d| b.find(d))
                .or(b.reference.as_ref())
                .cloned();
            calls.push(PairedCall { position: p, first: Some(lead), second: other, var_type });
        }
        for v in leading_good(b, splices, config) {
            let seen = good_a.iter().any(|g| g.descriptor == v.descriptor);
            if seen {
                continue;
            }
            let (lead, var_type) = finalize(v);
            let other = v
                .descriptor
                .as_ref()
                .and_then(|d| a.find(d))
                .or(a.reference.as_ref())
                .cloned();
            calls.push(PairedCall { position: p, first: other, second: Some(lead), var_type });
        }
    }
    calls
}

/// Rows of one amplicon group: at each position inside any amplicon insert, the best good call
/// across the amplicons covering it, with counts of agreeing and covering amplicons.
#[must_use]
pub fn select_amplicon_calls(
    amplicons: &[(Region, RegionVariants)],
    splices: &SpliceSet,
    config: &CallerConfig,
) -> Vec<AmpliconCall> {
    let mut by_position: std::collections::BTreeMap<i64, Vec<usize>> = std::collections::BTreeMap::new();
    for (j, (region, _)) in amplicons.iter().enumerate() {
        for p in region.insert_start..=region.insert_end {
            by_position.entry(p).or_default().push(j);
        }
    }

    let mut calls = Vec::new();
    for (p, amps) in by_position {
        let at = |j: usize| amplicons[j].1.get(&p);
        let mut good: Vec<(&Variant, usize)> = Vec::new();
        let mut refs: Vec<&Variant> = Vec::new();
        let mut best = None;
        let mut max_af = 0.0;
        let mut conflict = false;
        let mut max_cov = 0;
        let mut called: AHashSet<(usize, BString, BString)> = AHashSet::new();
        let mut depths = Vec::with_capacity(amps.len());

        for &j in &amps {
            let reference = at(j).and_then(|a| a.reference.as_ref());
            if let Some(tv) = at(j).and_then(|a| a.variants.first()) {
                depths.push(tv.total_depth);
                if is_good_var(tv, reference, tv.var_type(), splices, config) {
                    good.push((tv, j));
                    if best.is_some_and(|n| n != &tv.descriptor) {
                        conflict = true;
                    }
                    if tv.frequency > max_af {
                        max_af = tv.frequency;
                        best = Some(&tv.descriptor);
                    }
                    called.insert((j, tv.ref_allele.clone(), tv.var_allele.clone()));
                    max_cov = max_cov.max(tv.total_depth);
                }
            } else {
                depths.push(reference.map_or(0, |r| r.total_depth));
            }
            if let Some(r) = reference {
                refs.push(r);
            }
        }
        let no_coverage = depths.iter().filter(|&&d| d < max_cov / 50).count();
        good.sort_by(|a, b| b.0.frequency.total_cmp(&a.0.frequency));
        refs.sort_by(|a, b| b.total_depth.cmp(&a.total_depth));

        let Some(&(lead, lead_amp)) = good.first() else {
            if config.pileup {
                calls.push(AmpliconCall {
                    position: p,
                    variant: refs.first().map(|r| (*r).clone()),
                    var_type: None,
                    amplicon: amplicons[amps[0]].0.to_string(),
                    good_amplicons: 0,
                    covering_amplicons: 0,
                    no_coverage,
                    conflict: false,
                });
            }
            continue;
        };

        if conflict {
            let agreeing = amps
                .iter()
                .filter(|&&j| {
                    let Some(a) = at(j) else { return false };
                    lead.descriptor
                        .as_ref()
                        .and_then(|d| a.find(d))
                        .is_some_and(|v| is_good_var(v, a.reference.as_ref(), v.var_type(), splices, config))
                })
                .count();
            if agreeing == good.len() {
                conflict = false;
            }
        }

        let mut good_amplicons = good.len();
        let mut uncalled = 0;
        for &j in &amps {
            let region = &amplicons[j].0;
            if called.contains(&(j, lead.ref_allele.clone(), lead.var_allele.clone())) {
                continue;
            }
            if lead.start >= region.insert_start && lead.end <= region.insert_end {
                uncalled += 1;
            } else if (lead.start < region.insert_end && region.insert_end < lead.end)
                || (lead.start < region.insert_start && region.insert_start < lead.end)
            {
                good_amplicons = good_amplicons.saturating_sub(1).max(1);
            }
        }
        if conflict && good_amplicons < good.len() {
            conflict = false;
        }

        let (variant, var_type) = finalize(lead);
        calls.push(AmpliconCall {
            position: p,
            variant: Some(variant),
            var_type: Some(var_type),
            amplicon: amplicons[lead_amp].0.to_string(),
            good_amplicons,
            covering_amplicons: good_amplicons + uncalled,
            no_coverage,
            conflict,
        });
    }
    calls
}
