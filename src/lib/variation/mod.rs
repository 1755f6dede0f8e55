//! Per-allele evidence accumulators and the per-region tables that hold them.
//!
//! - [`Descriptor`]: the allele key
//! - [`Variation`]: running sums for one allele at one position
//! - [`SoftClipRecord`]: clipped fragments anchored at one position
//! - [`VariationTable`]: everything a region walk produces

pub mod descriptor;
pub mod soft_clip;
pub mod table;

pub use descriptor::{ComplexTail, Descriptor, LinkedIndel, SvKind, TailSegment};
pub use soft_clip::SoftClipRecord;
pub use table::{Seed, VariationTable};

use log::warn;

/// Read orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    #[must_use]
    pub fn from_reverse_flag(is_reverse: bool) -> Self {
        if is_reverse { Self::Reverse } else { Self::Forward }
    }
}

/// One read's contribution to an allele.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub strand: Strand,
    /// Distance of the event from the nearer read end.
    pub read_position: i32,
    /// Base quality (raw Phred, possibly a mean over several bases).
    pub quality: f64,
    pub mapping_quality: i32,
    pub mismatches: i32,
}

/// Evidence for one allele at one position.
///
/// Sums are divided by `count` only when a variant is synthesized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variation {
    pub count: i32,
    pub forward: i32,
    pub reverse: i32,
    pub position_sum: i64,
    pub quality_sum: f64,
    pub mapq_sum: i64,
    pub mismatch_sum: i64,
    pub high_quality: i32,
    pub low_quality: i32,
    pub position_varies: bool,
    pub quality_varies: bool,
    last_position: i32,
    last_quality: f64,
    /// Reads credited by realignment rather than observed directly.
    pub extra: i32,
}

impl Variation {
    #[must_use]
    pub fn strand_count(&self, strand: Strand) -> i32 {
        match strand {
            Strand::Forward => self.forward,
            Strand::Reverse => self.reverse,
        }
    }

    fn strand_mut(&mut self, strand: Strand) -> &mut i32 {
        match strand {
            Strand::Forward => &mut self.forward,
            Strand::Reverse => &mut self.reverse,
        }
    }

    /// Adds one read.
    pub fn add(&mut self, obs: &Observation, good_quality: f64) {
        self.count += 1;
        *self.strand_mut(obs.strand) += 1;
        self.position_sum += i64::from(obs.read_position);
        self.quality_sum += obs.quality;
        self.mapq_sum += i64::from(obs.mapping_quality);
        self.mismatch_sum += i64::from(obs.mismatches);
        if obs.quality >= good_quality {
            self.high_quality += 1;
        } else {
            self.low_quality += 1;
        }
    }

    /// Adds one read and tracks whether read position or quality vary between reads.
    #[allow(clippy::float_cmp)]
    pub fn observe(&mut self, obs: &Observation, good_quality: f64) {
        if !self.position_varies && self.last_position != 0 && obs.read_position != self.last_position {
            self.position_varies = true;
        }
        if !self.quality_varies && self.last_quality != 0.0 && obs.quality != self.last_quality {
            self.quality_varies = true;
        }
        self.last_position = obs.read_position;
        self.last_quality = obs.quality;
        self.add(obs, good_quality);
    }

    /// Credits a read without touching the quality class counters.
    pub(crate) fn observe_uncounted(&mut self, obs: &Observation, varies_from: &Variation) {
        self.count += 1;
        *self.strand_mut(obs.strand) += 1;
        self.position_varies = varies_from.position_varies;
        self.quality_varies = varies_from.quality_varies;
        self.position_sum += i64::from(obs.read_position);
        self.quality_sum += obs.quality;
        self.mapq_sum += i64::from(obs.mapping_quality);
        self.mismatch_sum += i64::from(obs.mismatches);
        self.last_position = obs.read_position;
        self.last_quality = obs.quality;
    }

    /// Removes one read previously added.
    pub fn remove(&mut self, obs: &Observation, good_quality: f64) {
        self.count -= 1;
        *self.strand_mut(obs.strand) -= 1;
        self.position_sum -= i64::from(obs.read_position);
        self.quality_sum -= obs.quality;
        self.mapq_sum -= i64::from(obs.mapping_quality);
        self.mismatch_sum -= i64::from(obs.mismatches);
        if obs.quality >= good_quality {
            self.high_quality -= 1;
        } else {
            self.low_quality -= 1;
        }
        self.clamp();
    }

    /// Folds `other` into `self` as realigned support, optionally taking the same reads away
    /// from `reference`.
    pub fn merge_from(&mut self, other: &Variation, reference: Option<&mut Variation>) {
        self.count += other.count;
        self.extra += other.count;
        self.high_quality += other.high_quality;
        self.low_quality += other.low_quality;
        self.position_sum += other.position_sum;
        self.quality_sum += other.quality_sum;
        self.mapq_sum += other.mapq_sum;
        self.mismatch_sum += other.mismatch_sum;
        self.position_varies = true;
        self.quality_varies = true;
        self.forward += other.forward;
        self.reverse += other.reverse;

        if let Some(reference) = reference {
            reference.release(other);
        }
    }

    /// Gives up the reads of `other` after they were credited to another allele.
    pub fn release(&mut self, other: &Variation) {
        self.count -= other.count;
        self.high_quality -= other.high_quality;
        self.low_quality -= other.low_quality;
        self.position_sum -= other.position_sum;
        self.quality_sum -= other.quality_sum;
        self.mapq_sum -= other.mapq_sum;
        self.mismatch_sum -= other.mismatch_sum;
        self.forward -= other.forward;
        self.reverse -= other.reverse;
        self.clamp();
    }

    /// Subtracts `other`'s reads (not its mismatches or extra count).
    pub fn subtract(&mut self, other: &Variation) {
        self.count -= other.count;
        self.high_quality -= other.high_quality;
        self.low_quality -= other.low_quality;
        self.position_sum -= other.position_sum;
        self.quality_sum -= other.quality_sum;
        self.mapq_sum -= other.mapq_sum;
        self.forward -= other.forward;
        self.reverse -= other.reverse;
        self.clamp();
    }

    /// Removes the share of `other`'s reads that must also have covered this reference allele,
    /// given an indel of `len` bases. Reads whose mean position is closer to the end than `len`
    /// are assumed not to span it.
    #[allow(clippy::cast_possible_truncation)]
    pub fn subtract_spanning(&mut self, other: &Variation, len: i64) {
        let f = if other.position_sum == 0 {
            0.0
        } else {
            let mean = other.position_sum as f64 / f64::from(other.count);
            (mean - len as f64 + 1.0) / mean
        };
        if f < 0.0 {
            return;
        }
        let f = f.min(1.0);
        self.count = (f64::from(self.count) - f * f64::from(other.count)) as i32;
        self.high_quality = (f64::from(self.high_quality) - f * f64::from(other.high_quality)) as i32;
        self.low_quality = (f64::from(self.low_quality) - f * f64::from(other.low_quality)) as i32;
        self.position_sum = (self.position_sum as f64 - f * other.position_sum as f64) as i64;
        self.quality_sum -= f * other.quality_sum;
        self.mapq_sum = (self.mapq_sum as f64 - f * other.mapq_sum as f64) as i64;
        self.mismatch_sum = (self.mismatch_sum as f64 - f * other.mismatch_sum as f64) as i64;
        self.forward -= (f * f64::from(other.forward)) as i32;
        self.reverse -= (f * f64::from(other.reverse)) as i32;
        self.clamp();
    }

    /// Forces every counter back to zero or above.
    fn clamp(&mut self) {
        let negative = self.count < 0
            || self.high_quality < 0
            || self.low_quality < 0
            || self.position_sum < 0
            || self.quality_sum < 0.0
            || self.mapq_sum < 0
            || self.forward < 0
            || self.reverse < 0;
        if !negative {
            return;
        }
        warn!(
            "Clamping negative counts: count={} fwd={} rev={} hi={} lo={}",
            self.count, self.forward, self.reverse, self.high_quality, self.low_quality
        );
        self.count = self.count.max(0);
        self.high_quality = self.high_quality.max(0);
        self.low_quality = self.low_quality.max(0);
        self.position_sum = self.position_sum.max(0);
        self.quality_sum = self.quality_sum.max(0.0);
        self.mapq_sum = self.mapq_sum.max(0);
        self.forward = self.forward.max(0);
        self.reverse = self.reverse.max(0);
    }

    /// True when no counter is negative.
    #[must_use]
    pub fn is_non_negative(&self) -> bool {
        self.count >= 0
            && self.forward >= 0
            && self.reverse >= 0
            && self.high_quality >= 0
            && self.low_quality >= 0
            && self.position_sum >= 0
            && self.quality_sum >= 0.0
            && self.mapq_sum >= 0
    }
}
