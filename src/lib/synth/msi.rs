//! Microsatellite context of a variant: how many copies of a short repeat surround it and how
//! far it could slide 3′ without changing the read sequence.

/// Longest repeat unit tried.
pub const MAX_UNIT: usize = 8;

/// Repeat context around a variant boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepeatStats {
    /// Repeat copies spanning the boundary for the best unit.
    pub msi: f64,
    /// Bases the variant can shift 3′.
    pub shift3: i64,
    /// The repeat unit behind `msi`.
    pub unit: Vec<u8>,
}

impl RepeatStats {
    /// Keeps whichever of `self` and `other` has the higher score, preferring `self` on ties.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self.msi < other.msi { other } else { self }
    }

    /// Raises the score to `shift3 / variant_len` when that is at least as high.
    pub fn floor_by_shift(&mut self, variant_len: usize) {
        if variant_len == 0 {
            return;
        }
        let shifted = self.shift3 as f64 / variant_len as f64;
        if self.msi <= shifted {
            self.msi = shifted;
        }
    }
}

/// Bases of `seq` covered by whole copies of `unit` ending at its last base.
fn trailing_repeat(seq: &[u8], unit: &[u8]) -> usize {
    seq.rchunks_exact(unit.len()).take_while(|chunk| *chunk == unit).count() * unit.len()
}

/// Bases of `seq` covered by whole copies of `unit` starting at its first base.
fn leading_repeat(seq: &[u8], unit: &[u8]) -> usize {
    seq.chunks_exact(unit.len()).take_while(|chunk| *chunk == unit).count() * unit.len()
}

/// Scores the repeat context at the boundary between `left` and `right`.
///
/// Each unit length `n` takes the last `n` bases of `left` as the candidate unit and counts its
/// copies ending at the boundary (reaching into `left_flank` when given) plus those starting
/// `right`. `shift3` counts leading bases of `right` equal to `left + right` at the same offset.
///
/// # Examples
/// ```
/// use vardict_lib::synth::msi::find_repeat_stats;
///
/// // one extra A inserted into a run of three
/// let stats = find_repeat_stats(b"A", b"AAAGC", Some(b"CGTAA"));
/// assert_eq!(stats.shift3, 3);
/// assert_eq!(stats.unit, b"A");
/// ```
#[must_use]
pub fn find_repeat_stats(left: &[u8], right: &[u8], left_flank: Option<&[u8]>) -> RepeatStats {
    let extended = left_flank.filter(|f| !f.is_empty()).map(|flank| {
        let mut seq = flank.to_vec();
        seq.extend_from_slice(left);
        seq
    });

    let mut best = RepeatStats::default();
    for n in 1..=left.len().min(MAX_UNIT) {
        let unit = &left[left.len() - n..];
        let behind = trailing_repeat(extended.as_deref().unwrap_or(left), unit);
        let score = (behind + leading_repeat(right, unit)) as f64 / n as f64;
        if score > best.msi {
            best.msi = score;
            best.unit = unit.to_vec();
        }
    }

    let shift3 = right
        .iter()
        .enumerate()
        .take_while(|&(i, &b)| left.get(i).or_else(|| right.get(i - left.len())) == Some(&b))
        .count();
    best.shift3 = shift3 as i64;
    best
}
