//! Insertions longer than a read can carry, recovered from soft-clip consensus.

use ahash::AHashSet;
use anyhow::Result;
use log::debug;

use super::{RealignmentEngine, Target, clip_order, has_poly_at_tail};
use crate::reference::ReferenceWindow;
use crate::seq::{base_at, is_low_complexity, show, substr};
use crate::variation::{Descriptor, Seed, Variation};

const MAX_MISMATCHES: i64 = 3;

/// Shifts an insertion after `bi` left while the reference repeats its last base, rotating the
/// inserted bases to match. Returns the new anchor and bases.
#[must_use]
pub fn adj_ins_pos(bi: i64, ins: &[u8], window: &ReferenceWindow) -> (i64, Vec<u8>) {
    let len = ins.len();
    if len == 0 {
        return (bi, Vec::new());
    }
    let mut bi = bi;
    let mut n = 1;
    while window.get(bi).is_some_and(|r| r == ins[len - n]) {
        n += 1;
        if n > len {
            n = 1;
        }
        bi -= 1;
    }
    let mut out = ins.to_vec();
    if n > 1 {
        let shift = 1 - n as i64;
        out = substr(ins, shift, None).to_vec();
        out.extend_from_slice(substr(ins, 0, Some(shift)));
    }
    (bi, out)
}

/// Finds an insertion in a clip consensus: the clip splits into inserted bases followed by bases
/// matching the reference from `p` in `direction` (`-1` for 5′ clips, `1` for 3′ clips).
///
/// Returns `(anchor, insertion text, anchor + mismatched tail)`; the text may carry `&` and
/// trailing mismatched bases. The anchor is zero when nothing was found.
#[must_use]
pub fn find_bi(seq: &[u8], p: i64, window: &ReferenceWindow, direction: i64) -> (i64, Vec<u8>, i64) {
    let chrom_len = window.chrom_len();
    let dir_ext = if direction == -1 { 1 } else { 0 };
    let len = seq.len();
    let mut score = 0;
    let mut bi = 0;
    let mut bi2 = 0;
    let mut ins = Vec::new();

    for n in 6..len {
        if p + 6 >= chrom_len {
            break;
        }
        let mut mismatches: i64 = 0;
        let mut matched = AHashSet::new();
        let mut i = 0;
        while i + n < len {
            let pos = p + direction * i as i64 - dir_ext;
            if pos < 1 || pos > chrom_len {
                break;
            }
            let base = seq[i + n];
            if window.is_base(pos, base) {
                matched.insert(base);
            } else {
                mismatches += 1;
            }
            if mismatches > MAX_MISMATCHES {
                break;
            }
            i += 1;
        }
        let mnt = matched.len();
        if mnt < 2 {
            continue;
        }
        let perfect = mismatches == 0 && i + n == len;
        let close = mnt >= 3 && i + n + 1 >= len && i >= 8 && (mismatches as f64) / (i as f64) < 0.15;
        if !(close || (perfect && n >= 20 && i >= 8)) {
            continue;
        }

        let mut insert = seq[..n].to_vec();
        let mut extra = Vec::new();
        let mut ept: i64 = 0;
        loop {
            let at = n + ept as usize;
            if at >= len {
                break;
            }
            if !window.is_base(p + ept * direction - dir_ext, seq[at]) {
                extra.push(seq[at]);
                ept += 1;
                continue;
            }
            if at + 1 >= len {
                break;
            }
            if !window.is_base(p + (ept + 1) * direction - dir_ext, seq[at + 1]) {
                extra.push(seq[at]);
                ept += 1;
                continue;
            }
            break;
        }
        let score_here = i as i64 - mismatches;

        if direction == -1 {
            insert.extend_from_slice(&extra);
            insert.reverse();
            if !extra.is_empty() {
                insert.insert(insert.len() - extra.len(), b'&');
            }
            let anchor = p - 1 - extra.len() as i64;
            if perfect {
                if extra.is_empty() {
                    let (shifted, rotated) = adj_ins_pos(anchor, &insert, window);
                    return (shifted, rotated, shifted);
                }
                return (anchor, insert, p - 1);
            }
            if score_here > score {
                (bi, ins, bi2, score) = (anchor, insert, p - 1, score_here);
            }
        } else {
            let mut s: i64 = -1;
            if extra.is_empty() {
                while s >= -(n as i64) && base_at(&insert, s) == window.get(p + s) {
                    s -= 1;
                }
                if s < -1 {
                    let mut rotated = substr(&insert, s + 1, None).to_vec();
                    rotated.extend_from_slice(substr(&insert, 0, Some(s + 1)));
                    insert = rotated;
                }
            } else {
                insert.push(b'&');
                insert.extend_from_slice(&extra);
            }
            let anchor = p + s;
            let tail_end = p + s + extra.len() as i64;
            if perfect {
                if extra.is_empty() {
                    let (shifted, rotated) = adj_ins_pos(anchor, &insert, window);
                    return (shifted, rotated, shifted);
                }
                return (anchor, insert, tail_end);
            }
            if score_here > score {
                (bi, ins, bi2, score) = (anchor, insert, tail_end, score_here);
            }
        }
    }
    if bi2 == bi && bi != 0 && !ins.is_empty() {
        let (shifted, rotated) = adj_ins_pos(bi, &ins, window);
        return (shifted, rotated, bi2);
    }
    (bi, ins, bi2)
}

impl RealignmentEngine<'_> {
    /// Turns clip consensus that starts with unaligned bases into insertions.
    pub fn realign_large_insertions(&mut self) -> Result<()> {
        for p in clip_order(&self.table.soft_clips_5) {
            let Some(seq) = Self::unused_consensus(&mut self.table.soft_clips_5, p) else {
                continue;
            };
            if seq.len() < 12 || has_poly_at_tail(&seq, 8) || is_low_complexity(&seq) {
                continue;
            }
            let (bi, ins, _) = find_bi(&seq, p, self.window, -1);
            if bi == 0 {
                continue;
            }
            let Some((totals, offsets)) = self.take_clip_with_offsets(true, p) else {
                continue;
            };
            let desc = Descriptor::insertion_from_text(&ins);
            debug!("5' clip at {p} ({}) gives +{} after {bi}", show(&seq), show(&ins));
            self.table.credit_insertion(bi, &desc, &totals, None, self.window);
            self.table.add_coverage(bi, totals.count);

            let len = ins.len() - usize::from(ins.contains(&b'&'));
            for (ii, counts) in offsets.into_iter().filter(|(ii, _)| *ii > len) {
                let pii = bi - ii as i64 + len as i64;
                self.credit_clipped_bases(pii, &counts);
            }
            self.finish_large_insertion(bi, &desc, &ins)?;
        }

        for p in clip_order(&self.table.soft_clips_3) {
            let Some(seq) = Self::unused_consensus(&mut self.table.soft_clips_3, p) else {
                continue;
            };
            if seq.len() < 12 || has_poly_at_tail(&seq, 7) || is_low_complexity(&seq) {
                continue;
            }
            let (bi, ins, _) = find_bi(&seq, p, self.window, 1);
            if bi == 0 {
                continue;
            }
            let Some((totals, offsets)) = self.take_clip_with_offsets(false, p) else {
                continue;
            };
            let desc = Descriptor::insertion_from_text(&ins);
            debug!("3' clip at {p} ({}) gives +{} after {bi}", show(&seq), show(&ins));
            self.table.credit_insertion(bi, &desc, &totals, Some(bi), self.window);

            let len = ins.len() - usize::from(ins.contains(&b'&'));
            for (ii, counts) in offsets.into_iter().filter(|(ii, _)| *ii >= len) {
                let pii = p + ii as i64 - len as i64;
                self.credit_clipped_bases(pii, &counts);
            }
            self.finish_large_insertion(bi, &desc, &ins)?;
        }
        Ok(())
    }

    /// Marks a clip used, returning its totals and per-offset base counts.
    #[allow(clippy::type_complexity)]
    fn take_clip_with_offsets(&mut self, five_prime: bool, pos: i64) -> Option<(Variation, Vec<(usize, Vec<(u8, Variation)>)>)> {
        let clips = if five_prime { &mut self.table.soft_clips_5 } else { &mut self.table.soft_clips_3 };
        let clip = clips.get_mut(&pos)?;
        clip.used = true;
        let offsets = clip
            .offsets()
            .map(|(ii, counts)| (ii, counts.iter().map(|(&b, v)| (b, v.clone())).collect()))
            .collect();
        Some((clip.totals.clone(), offsets))
    }

    /// Credits clipped bases that extend past the insertion to the positions they cover.
    fn credit_clipped_bases(&mut self, pos: i64, counts: &[(u8, Variation)]) {
        for (base, v) in counts {
            let key = Descriptor::base(*base, self.window.get(pos));
            self.table.credit_variant(pos, &key, v, None, self.window);
            self.table.add_coverage(pos, v.count);
        }
    }

    fn finish_large_insertion(&mut self, bi: i64, desc: &Descriptor, ins: &[u8]) -> Result<()> {
        let count = self.table.insertion(bi, desc).map_or(0, |v| v.count);
        self.realign_insertions(&[Seed { position: bi, descriptor: desc.clone(), count }]);

        let repeats_reference =
            ins.iter().enumerate().all(|(i, &b)| self.window.is_base(bi + 1 + i as i64, b));
        let ins_len = ins.len() as i64;
        if repeats_reference && ins_len >= 5 && ins_len < self.read_length() - 10 {
            self.reassign_unspanned_reference(Target::Insertion, bi, desc, (bi, bi + ins_len), 2.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::tests::REF;

    #[test]
    fn test_adj_ins_pos_rotates_through_repeat() {
        let window = ReferenceWindow::from_bases(b"TTTTACGTCGTAAAA");
        assert_eq!(adj_ins_pos(11, b"CGT", &window), (5, b"CGT".to_vec()));
        // one base into the repeat leaves the insertion rotated
        assert_eq!(adj_ins_pos(10, b"TCG", &window), (5, b"CGT".to_vec()));
    }

    #[test]
    fn test_find_bi_three_prime() {
        let window = ReferenceWindow::from_bases(REF);
        // 20 inserted bases, then the reference from position 31
        let mut seq = b"GGGGCCCCAAAATTTTGCGC".to_vec();
        seq.extend_from_slice(&REF[30..45]);
        let (bi, ins, bi2) = find_bi(&seq, 31, &window, 1);
        assert_eq!(bi, 30);
        assert_eq!(bi2, 30);
        assert_eq!(ins, b"GGGGCCCCAAAATTTTGCGC".to_vec());
    }

    #[test]
    fn test_find_bi_five_prime() {
        let window = ReferenceWindow::from_bases(REF);
        // a 5' clip reads outward from the anchor: the insert reversed, then the reference
        // leftward from position 30
        let insert = b"GGGGCCCCAAAATTTTGCGC";
        let mut seq: Vec<u8> = insert.iter().rev().copied().collect();
        seq.extend(REF[15..30].iter().rev());
        let (bi, ins, bi2) = find_bi(&seq, 31, &window, -1);
        assert_eq!((bi, bi2), (30, 30));
        assert_eq!(ins, insert.to_vec());
    }
}
