//! Variant synthesis: turns a realigned [`VariationTable`] into ranked [`Variant`] records.
//!
//! For every covered position inside the region, each allele's running sums become one
//! candidate record. Candidates are ranked by total base quality, the reference allele is split
//! off, and every remaining allele is resolved into reference/variant allele strings with its
//! repeat context, genotype and flanks. [`call`] then decides which records are reported.

pub mod call;
pub mod filter;
pub mod msi;
pub mod variant;

use std::collections::BTreeMap;

use anyhow::{Result, ensure};
use log::warn;

pub use call::{AmpliconCall, Call, PairedCall, select_amplicon_calls, select_calls, select_paired_calls};
pub use filter::is_good_var;
pub use msi::{RepeatStats, find_repeat_stats};
pub use variant::{StrandBias, VarType, Variant, adj_complex, strand_bias, var_type};

use crate::config::CallerConfig;
use crate::reference::ReferenceWindow;
use crate::region::Region;
use crate::variation::{Descriptor, LinkedIndel, SvKind, TailSegment, Variation, VariationTable};

/// Records synthesized at one position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionVariants {
    pub reference: Option<Variant>,
    /// Non-reference alleles, highest total quality first.
    pub variants: Vec<Variant>,
}

impl PositionVariants {
    /// The variant record built from `descriptor`, if any.
    #[must_use]
    pub fn find(&self, descriptor: &Descriptor) -> Option<&Variant> {
        self.variants.iter().find(|v| v.descriptor.as_ref() == Some(descriptor))
    }
}

/// Synthesized records of one region, by position.
pub type RegionVariants = BTreeMap<i64, PositionVariants>;

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn text(bases: &[u8]) -> String {
    String::from_utf8_lossy(bases).into_owned()
}

/// Builds [`Variant`] records from one region's table.
pub struct VariantSynthesizer<'a> {
    config: &'a CallerConfig,
    region: &'a Region,
    window: &'a ReferenceWindow,
    keep_all: bool,
}

impl<'a> VariantSynthesizer<'a> {
    #[must_use]
    pub fn new(config: &'a CallerConfig, region: &'a Region, window: &'a ReferenceWindow) -> Self {
        Self { config, region, window, keep_all: false }
    }

    /// Keeps positions whose variants are all below the frequency threshold, and positions seen
    /// only as reference. Paired comparison needs both samples' records at every position.
    #[must_use]
    pub fn keep_all_positions(mut self, keep: bool) -> Self {
        self.keep_all = keep;
        self
    }

    /// Synthesizes every covered position of the region.
    ///
    /// A position that fails is logged and left out; the rest of the region is unaffected.
    #[must_use]
    pub fn synthesize(&self, table: &VariationTable) -> RegionVariants {
        let mut out = RegionVariants::new();
        for (&p, alleles) in table.variants.range(self.region.start..=self.region.end) {
            match self.synthesize_position(p, alleles, table) {
                Ok(Some(vars)) => {
                    out.insert(p, vars);
                }
                Ok(None) => {}
                Err(e) => warn!("{}: skipping position {p}: {e:#}", self.region),
            }
        }
        out
    }

    fn synthesize_position(
        &self,
        p: i64,
        alleles: &BTreeMap<Descriptor, Variation>,
        table: &VariationTable,
    ) -> Result<Option<PositionVariants>> {
        let mut tcov = table.coverage_at(p);
        if tcov <= 0 {
            return Ok(None);
        }
        let ref_base = self.window.get(p);
        let insertions = table.insertions.get(&p);
        let reference_only = insertions.is_none()
            && alleles.len() == 1
            && alleles.keys().all(|d| ref_base.is_some() && d.single_base() == ref_base);
        if reference_only && !self.config.pileup && !self.keep_all {
            return Ok(None);
        }

        let mut hicov: i32 = alleles.values().map(|v| v.high_quality).sum();
        let mut candidates = Vec::new();
        let mut trace = Vec::new();
        for (descriptor, v) in alleles {
            ensure!(v.is_non_negative(), "negative counts for {descriptor}");
            if v.count == 0 {
                continue;
            }
            let candidate = self.candidate(descriptor, v, &mut tcov, hicov);
            if self.config.debug {
                trace.push(trace_entry("", &candidate));
            }
            candidates.push(candidate);
        }
        for (descriptor, v) in insertions.into_iter().flatten() {
            ensure!(v.is_non_negative(), "negative counts for {descriptor}");
            if v.count == 0 {
                continue;
            }
            hicov += v.high_quality;
            let candidate = self.candidate(descriptor, v, &mut tcov, hicov);
            if self.config.debug {
                trace.push(trace_entry("I", &candidate));
            }
            candidates.push(candidate);
        }

        candidates.sort_by(|a, b| {
            let qa = a.mean_quality * f64::from(a.depth);
            let qb = b.mean_quality * f64::from(b.depth);
            qb.total_cmp(&qa)
        });
        let mut reference = None;
        let mut variants = Vec::new();
        for candidate in candidates {
            let is_reference = ref_base.is_some()
                && candidate.descriptor.as_ref().and_then(Descriptor::single_base) == ref_base;
            if is_reference {
                reference = Some(candidate);
            } else {
                variants.push(candidate);
            }
        }
        let max_freq = variants.iter().map(|v| v.frequency).fold(0.0, f64::max);
        if !self.config.pileup && !self.keep_all && max_freq <= self.config.freq {
            return Ok(None);
        }

        let genotype1 = match (&reference, variants.first()) {
            (Some(r), first) if r.frequency < self.config.freq => first.map(Variant::key).unwrap_or_default(),
            (Some(r), _) => r.key(),
            (None, Some(first)) => first.key(),
            (None, None) => String::new(),
        };
        let (rfc, rrc) = reference.as_ref().map_or((0, 0), |r| (r.forward, r.reverse));
        let ref_bias = reference.as_ref().map_or(0, |r| r.bias.variant);
        let debug = self.config.debug.then(|| trace.join(" & "));

        for variant in &mut variants {
            self.resolve_alleles(p, variant, &genotype1);
            variant.total_depth = tcov;
            variant.ref_forward = rfc;
            variant.ref_reverse = rrc;
            variant.frequency = round3(variant.frequency);
            variant.high_quality_frequency = round3(variant.high_quality_frequency);
            variant.bias.reference = ref_bias;
            variant.debug.clone_from(&debug);
        }

        if variants.is_empty() && reference.is_none() {
            reference = Some(Variant::default());
        }
        if let Some(r) = reference.as_mut() {
            let base = ref_base.map(|b| text(&[b])).unwrap_or_default();
            r.total_depth = tcov;
            r.depth = 0;
            r.frequency = 0.0;
            r.ref_forward = rfc;
            r.ref_reverse = rrc;
            r.forward = 0;
            r.reverse = 0;
            r.msi = 0.0;
            r.msi_unit = 0;
            r.bias = StrandBias { reference: r.bias.variant, variant: 0 };
            r.shift3 = 0;
            r.start = p;
            r.end = p;
            r.ref_allele = base.clone().into();
            r.var_allele = base.clone().into();
            r.genotype = format!("{base}/{base}");
            r.left_flank.clear();
            r.right_flank.clear();
            r.debug.clone_from(&debug);
        }
        Ok(Some(PositionVariants { reference, variants }))
    }

    /// A record holding one allele's averaged statistics; alleles and positions are filled in
    /// later. Raises `tcov` when realignment credited more reads than the walk covered.
    fn candidate(&self, descriptor: &Descriptor, v: &Variation, tcov: &mut i32, hicov: i32) -> Variant {
        if v.count > *tcov && v.count - *tcov < v.extra {
            *tcov = v.count;
        }
        let count = f64::from(v.count);
        let total = f64::from(*tcov);
        let low = if v.low_quality == 0 { 0.5 } else { f64::from(v.low_quality) };
        Variant {
            descriptor: Some(descriptor.clone()),
            depth: v.count,
            forward: v.forward,
            reverse: v.reverse,
            bias: StrandBias { reference: 0, variant: strand_bias(v.forward, v.reverse, self.config) },
            frequency: count / total,
            mean_position: v.position_sum as f64 / count,
            position_varies: v.position_varies,
            mean_quality: v.quality_sum / count,
            quality_varies: v.quality_varies,
            mean_mapq: v.mapq_sum as f64 / count,
            quality_ratio: f64::from(v.high_quality) / low,
            high_quality_frequency: if hicov > 0 { f64::from(v.high_quality) / f64::from(hicov) } else { 0.0 },
            extra_frequency: if v.extra == 0 { 0.0 } else { f64::from(v.extra) / total },
            mean_mismatches: v.mismatch_sum as f64 / count,
            high_quality_count: v.high_quality,
            high_quality_depth: hicov,
            ..Variant::default()
        }
    }

    /// Fills the alleles, span, repeat context, genotype and flanks of a non-reference record.
    fn resolve_alleles(&self, p: i64, variant: &mut Variant, genotype1: &str) {
        let Some(descriptor) = variant.descriptor.clone() else {
            return;
        };
        let w = self.window;
        let chrom_len = w.chrom_len();
        let move3 = self.config.move_indels_to_3;
        let mut sp = p;
        let mut ep = p;
        let mut stats = RepeatStats::default();
        let mut ref_allele;
        let mut var_allele;

        match &descriptor {
            Descriptor::Insertion { bases, tail } => {
                let right = w.fetch(p + 1, (p + 70).min(chrom_len));
                if tail.first_matched().is_none() && !tail.has_link() {
                    let left = w.fetch((p - 50).max(1), p);
                    stats = find_repeat_stats(bases, &right, Some(left.as_slice())).max(find_repeat_stats(&left, &right, None));
                    stats.floor_by_shift(bases.len());
                }
                if move3 && stats.shift3 > 0 {
                    let shift = stats.shift3;
                    sp += shift;
                    ep += shift;
                    ref_allele = w.fetch(sp, sp);
                    var_allele = ref_allele.clone();
                    var_allele.extend(bases.iter().chain(&right).skip(shift as usize).take(bases.len()));
                } else {
                    ref_allele = w.fetch(p, p);
                    var_allele = ref_allele.clone();
                    var_allele.extend(descriptor.flattened_bases());
                }
            }
            Descriptor::Deletion { length, tail } => {
                let dellen = i64::from(*length);
                ep = p + dellen - 1;
                let left = w.fetch((p - 70).max(1), p - 1);
                let tseq = w.fetch(p, (p + dellen + 70).min(chrom_len));
                let (deleted, right) = tseq.split_at((*length as usize).min(tseq.len()));
                stats = find_repeat_stats(deleted, right, Some(left.as_slice())).max(find_repeat_stats(&left, right, Some(left.as_slice())));
                stats.floor_by_shift(*length as usize);
                if tail.is_empty() {
                    let shift = if move3 { stats.shift3 } else { 0 };
                    sp = p + shift - 1;
                    ep += shift;
                    ref_allele = w.fetch(sp, ep);
                    var_allele = w.fetch(sp, sp);
                } else {
                    ref_allele = w.fetch(p, ep);
                    var_allele = tail.bases();
                }
            }
            _ => {
                let left = w.fetch((p - 30).max(1), p + 1);
                let right = w.fetch(p + 2, (p + 70).min(chrom_len));
                stats = find_repeat_stats(&left, &right, None);
                ref_allele = w.fetch(p, p);
                var_allele = descriptor.flattened_bases();
            }
        }

        let mut genotype1 = genotype1.to_string();
        let mut genotype2 = descriptor.render();
        let matched_runs: Vec<usize> = match &descriptor {
            Descriptor::Mnp(bases) => vec![bases.len().saturating_sub(1)],
            Descriptor::Insertion { tail, .. } | Descriptor::Deletion { tail, .. } => tail
                .0
                .iter()
                .filter_map(|s| match s {
                    TailSegment::Matched(b) if !b.is_empty() => Some(b.len()),
                    _ => None,
                })
                .take(2)
                .collect(),
            _ => Vec::new(),
        };
        for &len in &matched_runs {
            let tch = w.fetch(ep + 1, ep + len as i64);
            ref_allele.extend_from_slice(&tch);
            genotype1.push_str(&text(&tch));
            ep += len as i64;
        }
        if !matched_runs.is_empty() && descriptor.is_insertion() {
            ref_allele.drain(..ref_allele.len().min(1));
            var_allele.drain(..var_allele.len().min(1));
            sp += 1;
        }

        let link = descriptor.tail().and_then(|t| {
            t.0.iter().find_map(|s| match s {
                TailSegment::Linked { matched, indel } => Some((matched, indel)),
                _ => None,
            })
        });
        if let Some((matched, indel)) = link {
            let mlen = matched.len() as i64;
            ep += mlen;
            ref_allele.extend(w.fetch(ep - mlen + 1, ep));
            if let LinkedIndel::Deletion(d) = indel {
                let d = i64::from(*d);
                ref_allele.extend(w.fetch(ep + 1, ep + d));
                ep += d;
            }
            genotype1 = genotype1.replacen('#', "m", 1).replacen('^', "i", 1);
            genotype2 = genotype2.replacen('#', "m", 1).replacen('^', "i", 1);
        }

        let sv_min = i64::from(self.config.sv_min_length);
        match &descriptor {
            Descriptor::Deletion { length, .. } if i64::from(*length) >= sv_min => {
                ref_allele.truncate(1);
                var_allele = SvKind::Deletion.symbol().as_bytes().to_vec();
                variant.structural = Some(SvKind::Deletion);
            }
            Descriptor::Insertion { bases, .. } if bases.len() as i64 > sv_min => {
                ref_allele.truncate(1);
                var_allele = SvKind::Duplication.symbol().as_bytes().to_vec();
                variant.structural = Some(SvKind::Duplication);
            }
            _ => {}
        }

        variant.left_flank = w.fetch((sp - 20).max(1), sp - 1).into();
        variant.right_flank = w.fetch(ep + 1, (ep + 20).min(chrom_len)).into();
        variant.genotype = format!("{genotype1}/{genotype2}").replace(['&', '#'], "").replace('^', "i");
        variant.msi = stats.msi;
        variant.msi_unit = stats.unit.len();
        variant.shift3 = stats.shift3;
        variant.start = sp;
        variant.end = ep;
        variant.ref_allele = ref_allele.into();
        variant.var_allele = var_allele.into();
    }
}

fn trace_entry(prefix: &str, v: &Variant) -> String {
    format!(
        "{prefix}{}:{}:F-{}:R-{}:{:.3}:{}:{}:{}:{}:{}:{:.3}:{}:{}",
        v.key(),
        v.forward + v.reverse,
        v.forward,
        v.reverse,
        v.frequency,
        v.bias.variant,
        v.mean_position,
        u8::from(v.position_varies),
        v.mean_quality,
        u8::from(v.quality_varies),
        v.high_quality_frequency,
        v.mean_mapq,
        v.quality_ratio,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variation::{Observation, Strand};
    use crate::walker::tests::REF;
    use approx::assert_relative_eq;

    fn obs(strand: Strand) -> Observation {
        Observation { strand, read_position: 15, quality: 35.0, mapping_quality: 60, mismatches: 1 }
    }

    /// Adds `n` reads alternating strands to an allele.
    fn support(table: &mut VariationTable, pos: i64, descriptor: &Descriptor, n: usize, insertion: bool) {
        for i in 0..n {
            let strand = if i % 2 == 0 { Strand::Forward } else { Strand::Reverse };
            let v = if insertion { table.insertion_mut(pos, descriptor) } else { table.variant_mut(pos, descriptor) };
            v.add(&obs(strand), 22.5);
        }
    }

    fn covered_table(window: &ReferenceWindow, from: i64, to: i64, depth: usize) -> VariationTable {
        let mut table = VariationTable::new();
        for pos in from..=to {
            let base = window.get(pos).unwrap_or(b'N');
            support(&mut table, pos, &Descriptor::Reference(base), depth, false);
            table.add_coverage(pos, depth as i32);
        }
        table
    }

    #[test]
    fn test_insertion_at_thirty_percent() {
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 20, 40, "chr1");
        let config = CallerConfig::default();
        let mut table = covered_table(&window, 20, 40, 20);
        support(&mut table, 30, &Descriptor::insertion(b"T".to_vec()), 6, true);

        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        assert_eq!(vars.len(), 1);
        let at = &vars[&30];
        assert_eq!(at.variants.len(), 1);
        let ins = &at.variants[0];
        assert_relative_eq!(ins.frequency, 0.3);
        assert_eq!(ins.ref_allele, "A");
        assert_eq!(ins.var_allele, "AT");
        assert_eq!((ins.start, ins.end), (30, 30));
        assert_eq!(ins.var_type(), VarType::Insertion);
        assert_eq!(ins.genotype, "A/+T");
        assert_eq!(ins.bias, StrandBias { reference: 2, variant: 2 });
        assert_eq!(ins.left_flank, &REF[9..29]);
        assert_eq!(ins.right_flank, &REF[30..50]);
        assert!(at.reference.as_ref().is_some_and(|r| r.depth == 0 && r.total_depth == 20));
    }

    #[test]
    fn test_reference_only_positions_skipped() {
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 20, 40, "chr1");
        let table = covered_table(&window, 20, 40, 10);
        let config = CallerConfig::default();
        assert!(VariantSynthesizer::new(&config, &region, &window).synthesize(&table).is_empty());

        let kept = VariantSynthesizer::new(&config, &region, &window).keep_all_positions(true).synthesize(&table);
        assert_eq!(kept.len(), 21);
        let r = kept[&25].reference.as_ref().map(|r| r.genotype.clone());
        assert_eq!(r.as_deref(), Some("C/C"));
    }

    #[test]
    fn test_deletion_alleles_and_repeat() {
        // deleting one of the two T's at 4-5
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 1, 60, "chr1");
        let config = CallerConfig::default();
        let mut table = covered_table(&window, 3, 8, 10);
        support(&mut table, 4, &Descriptor::deletion(1), 10, false);
        table.add_coverage(4, 10);

        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        let del = &vars[&4].variants[0];
        assert_eq!((del.start, del.end), (3, 4));
        assert_eq!((del.ref_allele.as_slice(), del.var_allele.as_slice()), (&b"GT"[..], &b"G"[..]));
        assert_eq!(del.shift3, 1);
        assert_eq!(del.msi_unit, 1);
        assert_relative_eq!(del.msi, 2.0);
        assert_eq!(del.var_type(), VarType::Deletion);
    }

    #[test]
    fn test_move_deletion_to_three_prime() {
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 1, 60, "chr1");
        let config = CallerConfig { move_indels_to_3: true, ..CallerConfig::default() };
        let mut table = covered_table(&window, 3, 8, 10);
        support(&mut table, 4, &Descriptor::deletion(1), 10, false);

        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        let del = &vars[&4].variants[0];
        assert_eq!((del.start, del.end), (4, 5));
        assert_eq!((del.ref_allele.as_slice(), del.var_allele.as_slice()), (&b"TT"[..], &b"T"[..]));
    }

    #[test]
    fn test_mnp_alleles() {
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 1, 60, "chr1");
        let config = CallerConfig::default();
        let mut table = covered_table(&window, 21, 22, 10);
        support(&mut table, 21, &Descriptor::Mnp(b"GA".to_vec()), 5, false);

        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        let mnp = &vars[&21].variants[0];
        assert_eq!((mnp.start, mnp.end), (21, 22));
        assert_eq!((mnp.ref_allele.as_slice(), mnp.var_allele.as_slice()), (&b"CT"[..], &b"GA"[..]));
        assert_eq!(mnp.genotype, "CT/GA");
        assert_eq!(mnp.var_type(), VarType::Complex);
    }

    #[test]
    fn test_long_deletion_promoted() {
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 1, 60, "chr1");
        let config = CallerConfig { sv_min_length: 10, ..CallerConfig::default() };
        let mut table = covered_table(&window, 10, 10, 10);
        support(&mut table, 10, &Descriptor::deletion(12), 8, false);

        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        let sv = &vars[&10].variants[0];
        assert_eq!(sv.var_allele, "<DEL>");
        assert_eq!(sv.ref_allele.len(), 1);
        assert_eq!(sv.end, 21);
        assert_eq!(sv.var_type(), VarType::Structural(SvKind::Deletion));
    }

    #[test]
    fn test_coverage_raised_by_extra_reads() {
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 1, 60, "chr1");
        let config = CallerConfig::default();
        let mut table = VariationTable::new();
        table.add_coverage(30, 4);
        let mut clipped = Variation::default();
        for _ in 0..6 {
            clipped.add(&obs(Strand::Forward), 22.5);
        }
        table.credit_variant(30, &Descriptor::deletion(3), &clipped, None, &window);

        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        let del = &vars[&30].variants[0];
        assert_eq!(del.total_depth, 6);
        assert_relative_eq!(del.frequency, 1.0);
        assert_relative_eq!(del.extra_frequency, 1.0);
    }

    #[test]
    fn test_debug_trace() {
        let window = ReferenceWindow::from_bases(REF);
        let region = Region::new("chr1", 1, 60, "chr1");
        let config = CallerConfig { debug: true, ..CallerConfig::default() };
        let mut table = covered_table(&window, 30, 30, 4);
        support(&mut table, 30, &Descriptor::Snv(b'G'), 4, false);
        table.add_coverage(30, 4);

        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        let trace = vars[&30].variants[0].debug.clone().unwrap_or_default();
        assert!(trace.contains("G:4:F-2:R-2:0.500"));
        assert!(trace.contains(" & "));
    }
}
