//! Realignment around insertions seeded by the walker.

use log::debug;

use super::mismatch::{find_mm3, find_mm5};
use super::{RealignmentEngine, Target};
use crate::seq::{MatchDirection, is_match, substr};
use crate::variation::{Descriptor, Seed, TailSegment};

fn is_acgt(bases: &[u8]) -> bool {
    bases.iter().all(|b| b"ATGC".contains(b))
}

impl RealignmentEngine<'_> {
    /// Folds flanking mismatches and clips into each seeded insertion, largest seeds first.
    pub fn realign_insertions(&mut self, seeds: &[Seed]) {
        for seed in seeds {
            let Descriptor::Insertion { bases, tail } = &seed.descriptor else {
                continue;
            };
            if bases.is_empty() || !is_acgt(bases) {
                continue;
            }
            let p = seed.position;
            let vn = &seed.descriptor;
            let extra = tail.first_matched().filter(|m| is_acgt(m)).map_or(0, <[u8]>::len) as i64;
            let compm = tail.first_linked_matched().map_or(0, <[u8]>::len) as i64;
            let flattened = vn.flattened_bases();
            let vlen = vn.render().len() as i64;

            let mut upstream = self.window.fetch((p - 100 - vlen + 1).max(1), p);
            upstream.extend_from_slice(&flattened);
            let sanend = (p + vlen + 100).min(self.window.chrom_len());
            let mut downstream = flattened.clone();
            downstream.extend(self.window.fetch(p + extra + 1 + compm, sanend));

            let r3 = find_mm3(self.window, p + 1, &downstream, &mut self.table.soft_clips_3);
            let r5 = find_mm5(self.window, p + extra + compm, &upstream, &mut self.table.soft_clips_5);
            self.table.insertion_mut(p, vn);
            self.absorb_edge_mismatches(Target::Insertion, p, vn, seed.count, bases.len() as i64, &r3, &r5);
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
                self.table.credit_insertion(p, vn, &totals, None, self.window);
            }

            for &sc3 in &r3.clip_positions {
                let Some(consensus) = Self::unused_consensus(&mut self.table.soft_clips_3, sc3) else {
                    continue;
                };
                let flank = substr(&downstream, sc3 - p - 1, None);
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
                self.table.credit_insertion(p, vn, &totals, release, self.window);
            }
        }

        for seed in seeds {
            let Descriptor::Insertion { bases, tail } = &seed.descriptor else {
                continue;
            };
            let [TailSegment::Matched(matched)] = tail.0.as_slice() else {
                continue;
            };
            if !is_acgt(bases) || !is_acgt(matched) {
                continue;
            }
            let p = seed.position;
            let plain = Descriptor::insertion(bases.clone());
            let (Some(vref), Some(tref)) = (self.table.insertion(p, &seed.descriptor), self.table.insertion(p, &plain))
            else {
                continue;
            };
            if vref.count < tref.count {
                let vref = vref.clone();
                debug!("Merging {} into {plain} at {p}", seed.descriptor);
                self.table.credit_insertion(p, &plain, &vref, Some(p), self.window);
                self.table.remove_insertion(p, &seed.descriptor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallerConfig;
    use crate::reference::ReferenceWindow;
    use crate::variation::{ComplexTail, Observation, Strand, VariationTable};
    use crate::walker::tests::REF;

    fn obs() -> Observation {
        Observation { strand: Strand::Reverse, read_position: 12, quality: 30.0, mapping_quality: 60, mismatches: 1 }
    }

    #[test]
    fn test_complex_insertion_merges_into_plain() {
        let window = ReferenceWindow::from_bases(REF);
        let config = CallerConfig::default();
        let mut table = VariationTable::new();
        let plain = Descriptor::insertion(b"GG".to_vec());
        let complex = Descriptor::Insertion {
            bases: b"GG".to_vec(),
            tail: ComplexTail::single(TailSegment::Matched(b"A".to_vec())),
        };
        for _ in 0..4 {
            table.insertion_mut(30, &plain).add(&obs(), 22.5);
        }
        table.insertion_mut(30, &complex).add(&obs(), 22.5);
        table.note_insertion(30, &plain);
        table.note_insertion(30, &complex);

        let seeds = VariationTable::ranked_seeds(&table.insertion_seeds);
        RealignmentEngine::new(&mut table, &window, &config, "chr1").realign_insertions(&seeds);
        assert_eq!(table.insertion(30, &plain).map(|v| v.count), Some(5));
        assert!(table.insertion(30, &complex).is_none());
    }
}
