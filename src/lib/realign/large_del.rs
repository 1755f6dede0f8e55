//! Deletions longer than a read can span, recovered from soft-clip consensus.

use ahash::AHashSet;
use anyhow::Result;
use log::debug;

use super::{RealignmentEngine, clip_order, has_poly_at_tail};
use crate::reference::ReferenceWindow;
use crate::seq::{is_low_complexity, show};
use crate::variation::{Descriptor, Seed};

const MAX_MISMATCHES: i64 = 3;

/// Finds where `seq` lands on the reference when searched from `start` in `direction` (`-1`
/// reads `seq` leftward, `1` rightward), trying up to `distance` offsets.
///
/// Returns the breakpoint: the first deleted position for a 5′ clip, the first kept position for
/// a 3′ clip. Zero when no offset matches well enough.
#[must_use]
pub fn find_bp(seq: &[u8], start: i64, window: &ReferenceWindow, distance: i64, direction: i64) -> i64 {
    let chrom_len = window.chrom_len();
    let len = seq.len() as i64;
    let mut bp = 0;
    let mut score = 0;
    for n in 0..distance {
        let allowed = MAX_MISMATCHES - n / 100;
        let mut mismatches = 0;
        let mut matched = AHashSet::new();
        let mut i: i64 = 0;
        while i < len {
            let pos = start + direction * n + direction * i;
            if pos < 1 || pos > chrom_len {
                break;
            }
            let base = seq[i as usize];
            if window.is_base(pos, base) {
                matched.insert(base);
            } else {
                mismatches += 1;
            }
            if mismatches > allowed {
                break;
            }
            i += 1;
        }
        if matched.len() < 3 {
            continue;
        }
        if mismatches <= allowed
            && i >= len - 2
            && i >= 8 + n / 10
            && (mismatches as f64) / (i as f64) < 0.12
        {
            let lbp = start + direction * n - if direction < 0 { direction } else { 0 };
            if mismatches == 0 && i == len {
                return lbp;
            }
            if i - mismatches > score {
                bp = lbp;
                score = i - mismatches;
            }
        }
    }
    bp
}

impl RealignmentEngine<'_> {
    /// Turns clip consensus that lands further along the reference into deletions.
    pub fn realign_large_deletions(&mut self) -> Result<()> {
        for p in clip_order(&self.table.soft_clips_5) {
            let Some(seq) = Self::unused_consensus(&mut self.table.soft_clips_5, p) else {
                continue;
            };
            if seq.len() < 7 || has_poly_at_tail(&seq, 7) || is_low_complexity(&seq) {
                continue;
            }
            let bp = find_bp(&seq, p - 5, self.window, self.config.indel_size, -1);
            if bp == 0 {
                continue;
            }
            let Ok(dellen) = u32::try_from(p - bp) else {
                continue;
            };
            let mut extra = Vec::new();
            while let Some(&b) = seq.get(extra.len()) {
                if self.window.is_base(bp - extra.len() as i64 - 1, b) {
                    break;
                }
                extra.push(b);
            }
            let bp = bp - extra.len() as i64;
            let gt = Descriptor::deletion_with_matched(dellen, extra);
            debug!("5' clip at {p} ({}) gives {gt} at {bp}", show(&seq));

            let Some(totals) = Self::take_clip(&mut self.table.soft_clips_5, p) else {
                continue;
            };
            for tp in bp..bp + i64::from(dellen) {
                self.table.add_coverage(tp, totals.count);
            }
            self.table.credit_variant(bp, &gt, &totals, None, self.window);
            self.absorb_mirrored_three_prime(bp, i64::from(dellen), &gt);

            let count = self.table.variant(bp, &gt).map_or(0, |v| v.count);
            self.realign_deletions(&[Seed { position: bp, descriptor: gt, count }])?;
        }

        for p in clip_order(&self.table.soft_clips_3) {
            let Some(seq) = Self::unused_consensus(&mut self.table.soft_clips_3, p) else {
                continue;
            };
            if seq.len() < 7 || has_poly_at_tail(&seq, 7) || is_low_complexity(&seq) {
                continue;
            }
            let found = find_bp(&seq, p + 5, self.window, self.config.indel_size, 1);
            if found == 0 {
                continue;
            }
            let Ok(dellen) = u32::try_from(found - p) else {
                continue;
            };
            let mut extra = Vec::new();
            while let Some(&b) = seq.get(extra.len()) {
                if self.window.is_base(found + extra.len() as i64, b) {
                    break;
                }
                extra.push(b);
            }
            let mut bp = p;
            let gt = if extra.is_empty() {
                let d = i64::from(dellen);
                while self.window.get(bp - 1).is_some() && self.window.get(bp - 1) == self.window.get(bp + d - 1) {
                    bp -= 1;
                }
                Descriptor::deletion(dellen)
            } else {
                Descriptor::deletion_with_matched(dellen, extra)
            };
            debug!("3' clip at {p} ({}) gives {gt} at {bp}", show(&seq));

            let Some(clip) = self.table.soft_clips_3.get_mut(&p) else {
                continue;
            };
            clip.totals.position_sum += i64::from(dellen) * i64::from(clip.totals.count);
            clip.used = true;
            let totals = clip.totals.clone();
            for tp in bp..bp + i64::from(dellen) {
                self.table.add_coverage(tp, totals.count);
            }
            self.table.credit_variant(bp, &gt, &totals, None, self.window);

            let count = self.table.variant(bp, &gt).map_or(0, |v| v.count);
            self.realign_deletions(&[Seed { position: bp, descriptor: gt, count }])?;
        }
        Ok(())
    }

    /// Credits the 3′ clip on the far side of a deletion recovered from a 5′ clip.
    ///
    /// Reads clipped there were aligned across the deletion for a few bases, so the bases they
    /// reported inside it are taken back.
    fn absorb_mirrored_three_prime(&mut self, bp: i64, dellen: i64, gt: &Descriptor) {
        let same = |w: &ReferenceWindow, pos: i64| match (w.get(pos), w.get(pos + dellen)) {
            (Some(a), Some(b)) => Some(a == b),
            _ => None,
        };
        let mut n = 0;
        while same(self.window, bp + n) == Some(true) {
            n += 1;
        }
        let mut sc3p = bp + n;
        let mut mismatched = 0;
        while mismatched <= 3 && same(self.window, bp + n) == Some(false) {
            mismatched += 1;
            n += 1;
        }
        if mismatched == 1 {
            while same(self.window, bp + n) == Some(true) {
                n += 1;
            }
            sc3p = bp + n;
        }

        if self.table.soft_clips_3.get(&sc3p).is_none_or(|c| c.used) {
            return;
        }
        let Some(totals) = Self::take_clip(&mut self.table.soft_clips_3, sc3p) else {
            return;
        };
        debug!("3' clip at {sc3p} also joins {gt} at {bp}");
        let release = (sc3p > bp).then_some(bp);
        self.table.credit_variant(bp, gt, &totals, release, self.window);
        if sc3p == bp {
            for tp in bp..bp + dellen {
                self.table.add_coverage(tp, totals.count);
            }
        }
        for ip in bp + 1..sc3p {
            let Some(shifted) = self.window.get(ip + dellen) else {
                continue;
            };
            let key = Descriptor::base(shifted, self.window.get(ip));
            let Some(vv) = self.table.variants.get_mut(&ip).and_then(|m| m.get_mut(&key)) else {
                continue;
            };
            vv.subtract(&totals);
            if vv.count == 0 {
                self.table.remove_variant(ip, &key);
            }
        }
    }
}
