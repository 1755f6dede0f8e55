//! Local realignment of one region's evidence.
//!
//! After the walk, reads that an aligner could not place across an indel still carry evidence for
//! it: as soft clips, or as a few mismatches right next to the event. The passes here move that
//! evidence onto the indel allele, in this order:
//!
//! 1. small deletions seeded by the walker ([`RealignmentEngine::realign_deletions`])
//! 2. small insertions seeded by the walker ([`RealignmentEngine::realign_insertions`])
//! 3. large deletions recovered from clip consensus ([`RealignmentEngine::realign_large_deletions`])
//! 4. large insertions recovered from clip consensus ([`RealignmentEngine::realign_large_insertions`])
//! 5. insertions spanned by a facing pair of clips ([`RealignmentEngine::realign_paired_clips`])
//!
//! Each soft-clip record is credited at most once; the `used` flag is set as soon as it is.
//! Split MNP evidence is merged back afterwards by [`RealignmentEngine::adjust_mnps`], whether or not
//! realignment is enabled.

mod large_del;
mod large_ins;
pub mod mismatch;
mod paired_clip;
mod small_del;
mod small_ins;

pub use large_del::find_bp;
pub use large_ins::{adj_ins_pos, find_bi};
pub use paired_clip::find_35_match;

use std::collections::BTreeMap;

use anyhow::Result;
use log::debug;
use noodles::sam::alignment::record::cigar::op::Kind;

use crate::alignment::AlignmentSource;
use crate::config::CallerConfig;
use crate::reference::ReferenceWindow;
use crate::variation::{Descriptor, SoftClipRecord, Variation, VariationTable};

/// Which allele map an indel lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Variant,
    Insertion,
}

/// Runs the realignment passes over one region's table.
pub struct RealignmentEngine<'a> {
    table: &'a mut VariationTable,
    window: &'a ReferenceWindow,
    config: &'a CallerConfig,
    chrom: &'a str,
    source: Option<&'a mut dyn AlignmentSource>,
}

/// True when the bases after the first are a run of `run` A's or T's.
fn has_poly_at_tail(seq: &[u8], run: usize) -> bool {
    seq.get(1..=run).is_some_and(|s| s.iter().all(|&b| b == b'A') || s.iter().all(|&b| b == b'T'))
}

/// Clip anchors, largest clip count first, then by position.
fn clip_order(clips: &BTreeMap<i64, SoftClipRecord>) -> Vec<i64> {
    let mut order: Vec<(i64, i32)> = clips.iter().map(|(&p, c)| (p, c.count())).collect();
    order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    order.into_iter().map(|(p, _)| p).collect()
}

/// Mean read position of `v`, `NaN` when it holds no reads.
fn mean_position(v: &Variation) -> f64 {
    v.position_sum as f64 / f64::from(v.count)
}

impl<'a> RealignmentEngine<'a> {
    #[must_use]
    pub fn new(
        table: &'a mut VariationTable,
        window: &'a ReferenceWindow,
        config: &'a CallerConfig,
        chrom: &'a str,
    ) -> Self {
        Self { table, window, config, chrom, source: None }
    }

    /// Enables the passing-read check against `source`.
    #[must_use]
    pub fn with_source(mut self, source: &'a mut dyn AlignmentSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Runs the enabled passes, then the MNP correction.
    pub fn run(&mut self) -> Result<()> {
        if self.config.realign {
            let seeds = VariationTable::ranked_seeds(&self.table.deletion_seeds);
            debug!("Realigning {} deletion seeds on {}", seeds.len(), self.chrom);
            self.realign_deletions(&seeds)?;

            let seeds = VariationTable::ranked_seeds(&self.table.insertion_seeds);
            debug!("Realigning {} insertion seeds on {}", seeds.len(), self.chrom);
            self.realign_insertions(&seeds);

            self.realign_large_deletions()?;
            self.realign_large_insertions()?;
            self.realign_paired_clips()?;
        }
        self.adjust_mnps();
        Ok(())
    }

    fn read_length(&self) -> i64 {
        i64::from(self.table.read_length)
    }

    fn goodq(&self) -> f64 {
        self.config.good_quality
    }

    /// Consensus of the clip at `pos`, if it exists and is not yet used.
    fn unused_consensus(clips: &mut BTreeMap<i64, SoftClipRecord>, pos: i64) -> Option<Vec<u8>> {
        let clip = clips.get_mut(&pos)?;
        if clip.used {
            return None;
        }
        Some(clip.consensus().to_vec())
    }

    /// Marks the clip at `pos` used and returns its read totals.
    fn take_clip(clips: &mut BTreeMap<i64, SoftClipRecord>, pos: i64) -> Option<Variation> {
        let clip = clips.get_mut(&pos)?;
        clip.used = true;
        Some(clip.totals.clone())
    }

    fn credit(&mut self, target: Target, pos: i64, descriptor: &Descriptor, source: &Variation, release_at: Option<i64>) {
        match target {
            Target::Variant => self.table.credit_variant(pos, descriptor, source, release_at, self.window),
            Target::Insertion => self.table.credit_insertion(pos, descriptor, source, release_at, self.window),
        }
    }

    fn allele(&self, target: Target, pos: i64, descriptor: &Descriptor) -> Option<&Variation> {
        match target {
            Target::Variant => self.table.variant(pos, descriptor),
            Target::Insertion => self.table.insertion(pos, descriptor),
        }
    }

    /// True when no read spans `start..end` with reference bases on both sides.
    ///
    /// Reads carrying a deletion of exactly `end - start` bases are ignored.
    fn no_passing_reads(&mut self, start: i64, end: i64) -> Result<bool> {
        let Some(source) = self.source.as_deref_mut() else {
            return Ok(false);
        };
        let dlen = usize::try_from(end - start).unwrap_or(0);
        let mut passing = 0;
        for record in source.fetch(self.chrom, start, end)? {
            if record.cigar.iter().any(|&(k, l)| k == Kind::Deletion && l == dlen) {
                continue;
            }
            let read_end = record.position + record.aligned_length();
            if read_end > end + 2 && record.position < start - 2 {
                passing += 1;
            }
        }
        debug!("Passing reads over {}:{start}-{end}: {passing}", self.chrom);
        Ok(passing <= 0)
    }

    /// Hands the reference reads at `pos` to a repeat indel when no read spans it.
    fn reassign_unspanned_reference(
        &mut self,
        target: Target,
        pos: i64,
        descriptor: &Descriptor,
        span: (i64, i64),
        factor: f64,
    ) -> Result<()> {
        if self.source.is_none() {
            return Ok(());
        }
        let Some(reference) = self.table.reference_at(pos, self.window).cloned() else {
            return Ok(());
        };
        let allele_count = self.allele(target, pos, descriptor).map_or(0, |v| v.count);
        if reference.count == 0 || f64::from(allele_count) <= f64::from(reference.count) * factor {
            return Ok(());
        }
        if self.no_passing_reads(span.0, span.1)? {
            debug!("No passing reads for {descriptor} at {pos}, moving {} reference reads", reference.count);
            self.credit(target, pos, descriptor, &reference, Some(pos));
        }
        Ok(())
    }

    /// Merges single-base evidence split off the ends of a multi-nucleotide substitution.
    pub fn adjust_mnps(&mut self) {
        let seeds: Vec<(i64, Vec<Descriptor>)> =
            self.table.mnp_seeds.iter().map(|(&p, m)| (p, m.keys().cloned().collect())).collect();
        for (p, descriptors) in seeds {
            for vn in descriptors {
                let Descriptor::Mnp(bases) = &vn else {
                    continue;
                };
                if self.table.variant(p, &vn).is_none() {
                    continue;
                }
                let len = bases.len();
                for i in 0..len - 1 {
                    let vref_count = self.table.variant(p, &vn).map_or(0, |v| v.count);
                    if i == 0 {
                        let left = Descriptor::Snv(bases[0]);
                        if let Some(tref) = self.table.variant(p, &left).cloned() {
                            if tref.count < vref_count && mean_position(&tref) <= (i + 1) as f64 {
                                debug!("Merging left piece {left} into {vn} at {p}");
                                self.table.credit_variant(p, &vn, &tref, None, self.window);
                                self.table.remove_variant(p, &left);
                            }
                        }
                    }
                    if i + 2 == len {
                        let vref_count = self.table.variant(p, &vn).map_or(0, |v| v.count);
                        let rp = p + i as i64 + 1;
                        let right = Descriptor::Snv(bases[len - 1]);
                        if let Some(tref) = self.table.variant(rp, &right).cloned() {
                            if tref.count < vref_count && mean_position(&tref) <= (len - i - 1) as f64 {
                                debug!("Merging right piece {right} into {vn} at {p}");
                                self.table.credit_variant(p, &vn, &tref, None, self.window);
                                self.table.add_coverage(p, tref.count);
                                self.table.remove_variant(rp, &right);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::MemorySource;
    use crate::region::Region;
    use crate::synth::VariantSynthesizer;
    use crate::variation::{Observation, Strand};
    use crate::walker::tests::{REF, read};
    use crate::walker::{CigarWalker, SpliceSet};

    fn obs(pos: i32) -> Observation {
        Observation { strand: Strand::Forward, read_position: pos, quality: 30.0, mapping_quality: 60, mismatches: 0 }
    }

    fn walk(records: &[crate::alignment::AlignmentRecord], config: &CallerConfig, window: &ReferenceWindow) -> VariationTable {
        let region = Region::new("chr1", 1, window.chrom_len(), "g");
        let splices = SpliceSet::default();
        let mut walker = CigarWalker::new(config, &region, window, &splices);
        let mut table = VariationTable::new();
        walker.walk_all(records, &mut table);
        table
    }

    #[test]
    fn test_clipped_reads_join_deletion() -> Result<()> {
        let window = ReferenceWindow::from_bases(REF);
        let config = CallerConfig::default();
        let mut reads = Vec::new();
        let mut deleted = REF[10..25].to_vec();
        deleted.extend_from_slice(&REF[28..43]);
        for _ in 0..4 {
            reads.push(read(11, "15M3D15M", &deleted, 0));
        }
        // reads ending inside the deletion keep the post-deletion bases as a clip
        let mut clipped = REF[5..25].to_vec();
        clipped.extend_from_slice(&REF[28..34]);
        for _ in 0..2 {
            reads.push(read(6, "20M6S", &clipped, 0));
        }

        let mut table = walk(&reads, &config, &window);
        assert_eq!(table.soft_clips_3.get(&26).map(SoftClipRecord::count), Some(2));
        RealignmentEngine::new(&mut table, &window, &config, "chr1").run()?;

        let deletion = table.variant(26, &Descriptor::deletion(3)).expect("deletion");
        assert_eq!(deletion.count, 6);
        assert_eq!(deletion.extra, 2);
        assert!(table.soft_clips_3.get(&26).is_some_and(|c| c.used));
        assert_eq!(table.coverage_at(26), 6);
        Ok(())
    }

    /// An AAA run at 11..=13.
    const HOMOPOLYMER: &[u8] = b"ACGTCAGTGCAAATGCATCCAGTCGACTGATCGGTACCGG";

    #[test]
    fn test_homopolymer_deletion_collects_clipped_reads() -> Result<()> {
        let window = ReferenceWindow::from_bases(HOMOPOLYMER);
        let config = CallerConfig::default();
        let mut deleted = HOMOPOLYMER[..10].to_vec();
        deleted.extend_from_slice(&HOMOPOLYMER[11..31]);
        let mut reads: Vec<_> = (0..4).map(|_| read(1, "10M1D20M", &deleted, 0)).collect();
        // the same allele aligned straight through the run, clipped where it stops matching
        let mut clipped = HOMOPOLYMER[..12].to_vec();
        clipped.extend_from_slice(b"TGCAT");
        reads.extend((0..2).map(|_| read(1, "12M5S", &clipped, 0)));
        reads.extend((0..4).map(|_| read(1, "30M", &HOMOPOLYMER[..30], 0)));

        let mut table = walk(&reads, &config, &window);
        let deletion = Descriptor::deletion(1);
        assert_eq!(table.variant(11, &deletion).map(|v| v.count), Some(4));
        assert_eq!(table.soft_clips_3.get(&13).map(SoftClipRecord::count), Some(2));
        assert_eq!(table.reference_at(11, &window).map(|v| v.count), Some(6));
        RealignmentEngine::new(&mut table, &window, &config, "chr1").run()?;

        assert_eq!(table.variant(11, &deletion).map(|v| (v.count, v.extra)), Some((6, 2)));
        assert!(table.soft_clips_3.get(&13).is_some_and(|c| c.used));
        assert_eq!(table.reference_at(11, &window).map(|v| v.count), Some(4));

        let region = Region::new("chr1", 1, 40, "g");
        let vars = VariantSynthesizer::new(&config, &region, &window).synthesize(&table);
        let del = vars.get(&11).and_then(|at| at.find(&deletion)).expect("deletion record");
        assert_eq!(del.depth, 6);
        assert_eq!((del.ref_allele.as_slice(), del.var_allele.as_slice()), (&b"CA"[..], &b"C"[..]));
        Ok(())
    }

    #[test]
    fn test_unrelated_clip_pair_left_alone() -> Result<()> {
        let window = ReferenceWindow::from_bases(REF);
        let config = CallerConfig::default();
        let mut three = REF[10..30].to_vec();
        three.extend_from_slice(&[b'G'; 12]);
        let mut five = vec![b'T'; 12];
        five.extend_from_slice(&REF[30..50]);
        let mut reads: Vec<_> = (0..3).map(|_| read(11, "20M12S", &three, 0)).collect();
        reads.extend((0..3).map(|_| read(31, "12S20M", &five, 0)));

        let mut table = walk(&reads, &config, &window);
        assert_eq!(table.soft_clips_3.get(&31).map(SoftClipRecord::count), Some(3));
        assert_eq!(table.soft_clips_5.get(&31).map(SoftClipRecord::count), Some(3));
        RealignmentEngine::new(&mut table, &window, &config, "chr1").run()?;

        assert!(table.soft_clips_3.get(&31).is_some_and(|c| !c.used));
        assert!(table.soft_clips_5.get(&31).is_some_and(|c| !c.used));
        assert!(table.insertions.is_empty());
        Ok(())
    }

    #[test]
    fn test_adjust_mnps_merges_split_pieces() {
        let window = ReferenceWindow::from_bases(REF);
        let config = CallerConfig::default();
        let mut table = VariationTable::new();
        let mnp = Descriptor::Mnp(b"GA".to_vec());
        for _ in 0..5 {
            table.variant_mut(21, &mnp).add(&obs(10), 22.5);
        }
        table.note_mnp(21, &mnp);
        table.variant_mut(21, &Descriptor::Snv(b'G')).add(&obs(1), 22.5);
        table.variant_mut(22, &Descriptor::Snv(b'A')).add(&obs(1), 22.5);
        table.variant_mut(22, &Descriptor::Snv(b'A')).add(&obs(1), 22.5);

        RealignmentEngine::new(&mut table, &window, &config, "chr1").adjust_mnps();
        assert_eq!(table.variant(21, &mnp).map(|v| v.count), Some(8));
        assert!(table.variant(21, &Descriptor::Snv(b'G')).is_none());
        assert!(table.variant(22, &Descriptor::Snv(b'A')).is_none());
        assert_eq!(table.coverage_at(21), 2);
    }

    #[test]
    fn test_no_passing_reads() -> Result<()> {
        let window = ReferenceWindow::from_bases(REF);
        let config = CallerConfig::default();
        let mut table = VariationTable::new();

        let mut spanning = MemorySource::new(vec![read(1, "40M", &REF[..40], 0)]);
        let mut realigner = RealignmentEngine::new(&mut table, &window, &config, "chr1").with_source(&mut spanning);
        assert!(!realigner.no_passing_reads(10, 20)?);

        let mut deleted = REF[..9].to_vec();
        deleted.extend_from_slice(&REF[19..40]);
        let mut carrying = MemorySource::new(vec![read(1, "9M10D21M", &deleted, 0)]);
        let mut realigner = RealignmentEngine::new(&mut table, &window, &config, "chr1").with_source(&mut carrying);
        assert!(realigner.no_passing_reads(10, 20)?);
        Ok(())
    }

    #[test]
    fn test_clip_order() {
        let mut clips: BTreeMap<i64, SoftClipRecord> = BTreeMap::new();
        for (pos, n) in [(30, 1), (10, 3), (20, 3)] {
            let clip = clips.entry(pos).or_default();
            for _ in 0..n {
                clip.add_read(&obs(5), 22.5);
            }
        }
        assert_eq!(clip_order(&clips), vec![10, 20, 30]);
        assert!(has_poly_at_tail(b"CAAAAAAAG", 7));
        assert!(!has_poly_at_tail(b"CAAAAAAG", 7));
    }
}
