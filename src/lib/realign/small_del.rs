//! Realignment around deletions seeded by the walker.

use anyhow::Result;
use log::debug;

use super::mismatch::{ClipEnd, MismatchScan, find_mm3, find_mm5};
use super::{RealignmentEngine, Target, mean_position};
use crate::seq::{MatchDirection, is_match, substr};
use crate::variation::{Descriptor, Seed, TailSegment};

impl RealignmentEngine<'_> {
    /// Folds flanking mismatches and clips into each seeded deletion, largest seeds first.
    pub fn realign_deletions(&mut self, seeds: &[Seed]) -> Result<()> {
        for seed in seeds {
            let Descriptor::Deletion { length, tail } = &seed.descriptor else {
                continue;
            };
            let p = seed.position;
            let vn = &seed.descriptor;
            let dellen = i64::from(*length) + i64::from(tail.trailing_deletion().unwrap_or(0));
            let extra = tail.bases();
            let extrains = tail.first_inserted().map_or(0, <[u8]>::len) as i64;
            let shift = extra.len() as i64 - extrains;

            self.table.variant_mut(p, vn);

            let mut upstream = self.window.fetch((p - dellen - 100).max(1), p - 1);
            upstream.extend_from_slice(&extra);
            let sanend = (p + 2 * dellen + 100).min(self.window.chrom_len());
            let mut downstream = extra.clone();
            downstream.extend(self.window.fetch(p + dellen + shift, sanend));

            let r3 = find_mm3(self.window, p, &downstream, &mut self.table.soft_clips_3);
            let r5 = find_mm5(self.window, p + dellen + shift - 1, &upstream, &mut self.table.soft_clips_5);
            self.absorb_edge_mismatches(Target::Variant, p, vn, seed.count, dellen, &r3, &r5);
            self.drop_shifted_mismatches(&r3, &r5);

            for &sc5 in &r5.clip_positions {
                let Some(consensus) = Self::unused_consensus(&mut self.table.soft_clips_5, sc5) else {
                    continue;
                };
                if consensus.is_empty() || !is_match(&consensus, &upstream, MatchDirection::Backward) {
                    continue;
                }
                let Some(totals) = Self::take_clip(&mut self.table.soft_clips_5, sc5) else {
                    continue;
                };
                if sc5 > p {
                    self.table.add_coverage(p, totals.count);
                }
                debug!("5' clip at {sc5} joins {vn} at {p}");
                self.table.credit_variant(p, vn, &totals, None, self.window);
            }

            for &sc3 in &r3.clip_positions {
                let Some(consensus) = Self::unused_consensus(&mut self.table.soft_clips_3, sc3) else {
                    continue;
                };
                let flank = substr(&downstream, sc3 - p, None);
                if consensus.is_empty() || !is_match(&consensus, flank, MatchDirection::Forward) {
                    continue;
                }
                let Some(totals) = Self::take_clip(&mut self.table.soft_clips_3, sc3) else {
                    continue;
                };
                if sc3 <= p {
                    self.table.add_coverage(p, totals.count);
                }
                debug!("3' clip at {sc3} joins {vn} at {p}");
                let release = (sc3 > p).then_some(p);
                self.table.credit_variant(p, vn, &totals, release, self.window);
            }

            let pe = p + dellen + shift;
            let rlen = self.read_length();
            if pe - p >= 5 && pe - p < rlen - 10 {
                let factor = 2.0 * (1.0 - (pe - p) as f64 / rlen as f64);
                self.reassign_unspanned_reference(Target::Variant, p, vn, (p, pe), factor)?;
            }
        }

        for seed in seeds.iter().rev() {
            let Descriptor::Deletion { length, tail } = &seed.descriptor else {
                continue;
            };
            let [TailSegment::Matched(bases)] = tail.0.as_slice() else {
                continue;
            };
            if !bases.iter().all(|b| b"ATGC".contains(b)) {
                continue;
            }
            let p = seed.position;
            let plain = Descriptor::deletion(*length);
            let (Some(vref), Some(tref)) = (self.table.variant(p, &seed.descriptor), self.table.variant(p, &plain))
            else {
                continue;
            };
            if vref.count < tref.count {
                let vref = vref.clone();
                debug!("Merging {} into {plain} at {p}", seed.descriptor);
                self.table.credit_variant(p, &plain, &vref, None, self.window);
                self.table.remove_variant(p, &seed.descriptor);
            }
        }
        Ok(())
    }

    /// Credits flanking mismatches that look like misaligned indel reads to the indel at `p`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn absorb_edge_mismatches(
        &mut self,
        target: Target,
        p: i64,
        vn: &Descriptor,
        seed_count: i32,
        indel_len: i64,
        r3: &MismatchScan,
        r5: &MismatchScan,
    ) {
        let goodq = self.goodq();
        for m in r3.mismatches.iter().chain(&r5.mismatches) {
            let key = m.descriptor();
            let Some(tv) = self.table.variant(m.position, &key).cloned() else {
                continue;
            };
            if tv.count == 0 || tv.quality_sum / f64::from(tv.count) < goodq {
                continue;
            }
            let matched = match m.end {
                ClipEnd::Three => r3.matched,
                ClipEnd::Five => r5.matched,
            };
            if mean_position(&tv) > f64::from(matched + 4) {
                continue;
            }
            if i64::from(tv.count) >= i64::from(seed_count) + indel_len
                || (seed_count > 0 && tv.count / seed_count >= 8)
            {
                continue;
            }

            if m.position > p && m.end == ClipEnd::Five {
                match target {
                    Target::Variant => {
                        let f = if tv.position_sum == 0 {
                            1.0
                        } else {
                            ((m.position - p) as f64 / mean_position(&tv)).min(1.0)
                        };
                        #[allow(clippy::cast_possible_truncation)]
                        let spanning = (f64::from(tv.count) * f) as i32;
                        self.table.add_coverage(p, spanning);
                        if let Some(reference) = self.table.reference_at_mut(p, self.window) {
                            reference.subtract_spanning(&tv, indel_len);
                        }
                    }
                    Target::Insertion => self.table.add_coverage(p, tv.count),
                }
            }
            debug!("Mismatch {key} at {} joins {vn} at {p}", m.position);
            let release = (m.position > p && m.end == ClipEnd::Three).then_some(p);
            self.credit(target, p, vn, &tv, release);
            self.table.remove_variant(m.position, &key);
        }
    }

    /// Removes lone mismatches that a flank scan found inside a longer match.
    pub(crate) fn drop_shifted_mismatches(&mut self, r3: &MismatchScan, r5: &MismatchScan) {
        for (pos, base) in [r3, r5].into_iter().filter_map(|scan| scan.shifted_mismatch) {
            self.table.remove_variant(pos, &Descriptor::Snv(base));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallerConfig;
    use crate::reference::ReferenceWindow;
    use crate::variation::{Observation, SoftClipRecord, Strand, VariationTable};

    /// An AAA run at 11..=13.
    const HOMOPOLYMER: &[u8] = b"ACGTCAGTGCAAATGCATCCAGTCGACTGATCGGTACCGG";

    fn obs() -> Observation {
        Observation { strand: Strand::Forward, read_position: 10, quality: 30.0, mapping_quality: 60, mismatches: 0 }
    }

    #[test]
    fn test_homopolymer_deletion_absorbs_shifted_clip() -> Result<()> {
        let window = ReferenceWindow::from_bases(HOMOPOLYMER);
        let config = CallerConfig::default();
        let mut table = VariationTable::new();
        let deletion = Descriptor::deletion(1);
        for _ in 0..4 {
            table.variant_mut(11, &deletion).add(&obs(), 22.5);
        }
        table.note_deletion(11, &deletion);
        for _ in 0..6 {
            table.variant_mut(11, &Descriptor::Reference(b'A')).add(&obs(), 22.5);
        }
        // reads aligned straight through the run, clipped two bases downstream
        let mut clip = SoftClipRecord::default();
        for _ in 0..2 {
            clip.add_read(&obs(), 22.5);
            for (offset, &base) in b"TGCAT".iter().enumerate() {
                clip.add_base(offset, base, &obs(), 22.5);
            }
        }
        table.soft_clips_3.insert(13, clip);

        let seeds = VariationTable::ranked_seeds(&table.deletion_seeds);
        RealignmentEngine::new(&mut table, &window, &config, "chr1").realign_deletions(&seeds)?;

        assert_eq!(table.variant(11, &deletion).map(|v| (v.count, v.extra)), Some((6, 2)));
        assert!(table.soft_clips_3.get(&13).is_some_and(|c| c.used));
        assert_eq!(table.reference_at(11, &window).map(|v| v.count), Some(4));
        Ok(())
    }
}
