//! Soft-clipped fragments anchored at one reference position.
//!
//! Each clipped read contributes its good-quality clipped bases, indexed by distance from the
//! anchor (offset 0 is the base next to the aligned part). The consensus is computed once and
//! cached; realignment marks a record `used` after folding it into a variant so that no clip is
//! credited twice.

use std::collections::BTreeMap;

use log::debug;

use super::{Observation, Variation};
use crate::seq::show;

/// Clipped evidence at one anchor.
#[derive(Debug, Clone, Default)]
pub struct SoftClipRecord {
    /// Totals over every clipped read anchored here.
    pub totals: Variation,
    bases: BTreeMap<usize, BTreeMap<u8, Variation>>,
    consensus: Option<Vec<u8>>,
    pub used: bool,
}

impl SoftClipRecord {
    /// Records one clipped base at `offset`.
    pub fn add_base(&mut self, offset: usize, base: u8, obs: &Observation, good_quality: f64) {
        self.bases.entry(offset).or_default().entry(base).or_default().add(obs, good_quality);
        self.consensus = None;
    }

    /// Records the clipped read as a whole.
    pub fn add_read(&mut self, obs: &Observation, good_quality: f64) {
        self.totals.add(obs, good_quality);
    }

    /// Number of reads clipped at this anchor.
    #[must_use]
    pub fn count(&self) -> i32 {
        self.totals.count
    }

    /// Per-offset base counts, in offset order.
    pub fn offsets(&self) -> impl Iterator<Item = (usize, &BTreeMap<u8, Variation>)> {
        self.bases.iter().map(|(k, v)| (*k, v))
    }

    /// Consensus of the clipped bases, or an empty sequence when the clips disagree too much.
    ///
    /// At each offset the most frequent base is taken (higher summed quality breaks ties). An
    /// offset where the majority holds under 80% and is not clearly ahead is tolerated once;
    /// the second such offset ends the consensus.
    pub fn consensus(&mut self) -> &[u8] {
        if self.consensus.is_none() {
            let seq = self.compute_consensus();
            self.consensus = Some(seq);
        }
        self.consensus.as_deref().unwrap_or_default()
    }

    fn compute_consensus(&self) -> Vec<u8> {
        let mut total = 0;
        let mut matched = 0;
        let mut seq = Vec::new();
        let mut weak_seen = false;

        for counts in self.bases.values() {
            let mut max = 0;
            let mut max_quality = 0.0;
            let mut best = None;
            let mut depth = 0;
            for (&base, v) in counts {
                depth += v.count;
                if v.count > max || (v.count == max && v.quality_sum > max_quality) {
                    max = v.count;
                    max_quality = v.quality_sum;
                    best = Some(base);
                }
            }
            if (depth - max > 2 || max <= depth - max) && f64::from(max) / f64::from(depth) < 0.8 {
                if weak_seen {
                    break;
                }
                weak_seen = true;
            }
            total += depth;
            matched += max;
            if let Some(base) = best {
                seq.push(base);
            }
        }

        let breadth = self.bases.keys().next_back().copied().unwrap_or(0) as f64;
        let len = seq.len() as f64;
        let accepted = total != 0
            && f64::from(matched) / f64::from(total) > 0.9
            && len / 1.5 > breadth - len
            && (len / breadth > 0.8 || breadth - len < 10.0 || len > 25.0);
        debug!(
            "Candidate consensus {} matched={matched} total={total} accepted={accepted}",
            show(&seq)
        );
        if accepted { seq } else { Vec::new() }
    }
}
