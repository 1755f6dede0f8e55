//! Insertions too long for either flank alone: a 5′ clip and a 3′ clip whose clipped bases
//! overlap each other are joined into one inserted sequence.

use anyhow::Result;
use log::debug;

use super::{RealignmentEngine, Target};
use crate::seq::{MatchDirection, is_low_complexity, is_match, show, substr};
use crate::variation::{ComplexTail, Descriptor, Seed, TailSegment};

/// Finds where the end of a 3′ clip `seq3` overlaps a 5′ clip `seq5` (read outward, so
/// reversed). Returns `(bp5, bp3, score)`, all zero when the clips do not overlap.
#[must_use]
pub fn find_35_match(seq5: &[u8], seq3: &[u8]) -> (usize, usize, usize) {
    let (len5, len3) = (seq5.len(), seq3.len());
    for i in 0..len5.saturating_sub(8) {
        for j in 1..len3.saturating_sub(8) {
            let mut mismatches = 0;
            let mut n = 0;
            while n + j <= len3 && i + n <= len5 {
                if seq5.get(i + n) != Some(&seq3[len3 - j - n]) {
                    mismatches += 1;
                }
                if mismatches > 3 {
                    break;
                }
                n += 1;
            }
            if n > mismatches + 8
                && (mismatches as f64) / (n as f64) < 0.1
                && (n + j >= len3 || i + n >= len5)
            {
                return (i, j, n - mismatches);
            }
        }
    }
    (0, 0, 0)
}

impl RealignmentEngine<'_> {
    /// Pairs every unused 5′ clip with the nearby 3′ clips whose clipped bases overlap its own.
    pub fn realign_paired_clips(&mut self) -> Result<()> {
        let rlen = self.read_length();
        let fives: Vec<i64> = self.table.soft_clips_5.keys().copied().collect();
        let threes: Vec<i64> = self.table.soft_clips_3.keys().copied().collect();

        for &p5 in &fives {
            for &p3 in &threes {
                if self.table.soft_clips_5.get(&p5).is_none_or(|c| c.used) {
                    break;
                }
                if self.table.soft_clips_3.get(&p3).is_none_or(|c| c.used) {
                    continue;
                }
                if (p5 - p3) as f64 > rlen as f64 / 1.5 || p3 - p5 > rlen - 10 {
                    continue;
                }
                let (Some(seq5), Some(seq3)) = (
                    Self::unused_consensus(&mut self.table.soft_clips_5, p5),
                    Self::unused_consensus(&mut self.table.soft_clips_3, p3),
                ) else {
                    continue;
                };
                if seq5.len() <= 10 || seq3.len() <= 10 {
                    continue;
                }
                let (bp5, bp3, score) = find_35_match(&seq5, &seq3);
                if score == 0 {
                    continue;
                }
                let mut ins = if bp3 > 1 {
                    substr(&seq3, 0, Some(1 - bp3 as i64)).to_vec()
                } else {
                    seq3.clone()
                };
                if bp5 > 0 {
                    ins.extend(seq5[..bp5].iter().rev());
                }
                if is_low_complexity(&ins) {
                    continue;
                }
                let Some((target, bi, descriptor)) = self.pair_allele(p5, p3, &seq5, &seq3, &ins) else {
                    continue;
                };
                debug!("Clips at {p5} and {p3} overlap into {descriptor} at {bi} ({})", show(&ins));
                self.credit_pair(target, bi, &descriptor, p5, p3, rlen)?;
            }
        }
        Ok(())
    }

    /// Decides what allele a clip pair describes, after checking both clips' remaining bases
    /// against the reference past the other clip.
    fn pair_allele(
        &self,
        p5: i64,
        p3: i64,
        seq5: &[u8],
        seq3: &[u8],
        ins: &[u8],
    ) -> Option<(Target, i64, Descriptor)> {
        let ilen = ins.len() as i64;
        let (len5, len3) = (seq5.len() as i64, seq3.len() as i64);
        if len3 > ilen {
            let flank = self.window.fetch(p5, p5 + len3 - ilen + 2);
            if !is_match(substr(seq3, ilen, None), &flank, MatchDirection::Forward) {
                return None;
            }
        }
        if len5 > ilen {
            let from = if p5 > p3 { p3 - len5 - ilen - 2 } else { p3 - (len5 - ilen) - 2 };
            let flank = self.window.fetch(from, p3 - 1);
            if !is_match(substr(seq5, ilen, None), &flank, MatchDirection::Backward) {
                return None;
            }
        }

        if p5 > p3 {
            let spanned = self.window.fetch(p3, p5 - 1);
            let tlen = spanned.len();
            let allele = if tlen > ins.len() {
                let length = u32::try_from(p5 - p3).ok()?;
                let tail = ComplexTail::single(TailSegment::Inserted(ins.to_vec()));
                (Target::Variant, p3, Descriptor::Deletion { length, tail })
            } else if tlen < ins.len() {
                let mut text = ins[..ins.len() - tlen].to_vec();
                text.push(b'&');
                text.extend_from_slice(substr(ins, p3 - p5, None));
                (Target::Insertion, p3 - 1, Descriptor::insertion_from_text(&text))
            } else {
                let length = u32::try_from(ins.len()).ok()?;
                let tail = ComplexTail::single(TailSegment::Inserted(ins.to_vec()));
                (Target::Variant, p3, Descriptor::Deletion { length, tail })
            };
            Some(allele)
        } else {
            let gap = p3 - p5;
            let mut bases = if ilen > gap {
                self.window.fetch(p5, p3)
            } else {
                self.window.fetch(p5, p5 + (gap - ilen) / 2)
            };
            bases.extend_from_slice(ins);
            Some((Target::Insertion, p5 - 1, Descriptor::insertion(bases)))
        }
    }

    fn credit_pair(&mut self, target: Target, bi: i64, descriptor: &Descriptor, p5: i64, p3: i64, rlen: i64) -> Result<()> {
        let (Some(t5), Some(t3)) = (
            Self::take_clip(&mut self.table.soft_clips_5, p5),
            Self::take_clip(&mut self.table.soft_clips_3, p3),
        ) else {
            return Ok(());
        };
        self.table.add_coverage(bi, t5.count);
        self.credit(target, bi, descriptor, &t3, Some(bi));
        self.credit(target, bi, descriptor, &t5, None);

        let count = self.allele(target, bi, descriptor).map_or(0, |v| v.count);
        let seed = [Seed { position: bi, descriptor: descriptor.clone(), count }];
        match target {
            Target::Insertion => {
                if p3 - p5 >= 5 && p3 - p5 > rlen - 10 {
                    self.reassign_unspanned_reference(target, bi, descriptor, (p5, p3), 2.0)?;
                }
                self.realign_insertions(&seed);
            }
            Target::Variant => self.realign_deletions(&seed)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSERT: &[u8] = b"ACGTTGCAAGCTTACGGATC";

    #[test]
    fn test_find_35_match_overlap() {
        let seq3 = &INSERT[..15];
        let seq5: Vec<u8> = INSERT[5..].iter().rev().copied().collect();
        assert_eq!(find_35_match(&seq5, seq3), (5, 1, 10));
    }

    #[test]
    fn test_find_35_match_none() {
        assert_eq!(find_35_match(b"AAAAAAAAAAAAAA", b"CCCCCCCCCCCCCC"), (0, 0, 0));
    }

    #[test]
    fn test_find_35_match_mismatched_clips() {
        assert_eq!(find_35_match(b"AAAAAAAAAAAAAC", b"CCCCCCCCCCCCCG"), (0, 0, 0));
        assert_eq!(find_35_match(b"ACGTACGTA", b"TTTTTTTTTT"), (0, 0, 0));
    }

    #[test]
    fn test_overlap_rebuilds_insert() {
        let seq3 = &INSERT[..15];
        let seq5: Vec<u8> = INSERT[5..].iter().rev().copied().collect();
        let (bp5, bp3, _) = find_35_match(&seq5, seq3);
        let mut ins = if bp3 > 1 { substr(seq3, 0, Some(1 - bp3 as i64)).to_vec() } else { seq3.to_vec() };
        ins.extend(seq5[..bp5].iter().rev());
        assert_eq!(ins, INSERT.to_vec());
    }
}
