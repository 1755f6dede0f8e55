//! Mismatches and soft clips flanking an indel.
//!
//! A read that ends a few bases past an indel is usually aligned straight through it: the bases
//! after the event show up as mismatches, or get clipped. These scans walk outward from an indel
//! over its expected flanking sequence and collect both kinds of evidence for the caller to fold
//! back in.

use std::collections::BTreeMap;

use crate::reference::ReferenceWindow;
use crate::seq::{base_at, strip_markers};
use crate::variation::{Descriptor, SoftClipRecord};

/// Which side of the indel a piece of evidence was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipEnd {
    Five,
    Three,
}

/// A run of mismatching bases that may belong to an indel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeMismatch {
    pub bases: Vec<u8>,
    pub position: i64,
    pub end: ClipEnd,
}

impl EdgeMismatch {
    /// The allele these bases were recorded under by the walker.
    #[must_use]
    pub fn descriptor(&self) -> Descriptor {
        match self.bases.as_slice() {
            [b] => Descriptor::Snv(*b),
            bases => Descriptor::Mnp(bases.to_vec()),
        }
    }
}

/// Result of one flank scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchScan {
    pub mismatches: Vec<EdgeMismatch>,
    /// Clip anchors whose clipped bases could be the flank.
    pub clip_positions: Vec<i64>,
    /// Matching bases past the mismatches.
    pub matched: i32,
    /// A lone mismatch that turned out to sit inside a longer matching stretch.
    pub shifted_mismatch: Option<(i64, u8)>,
}

/// Scans forward from `pos` over the expected 3′ flank `flank`.
///
/// When exactly one mismatch is found and the flank keeps matching past it, the clip anchored
/// where that match ends is marked used.
pub fn find_mm3(
    window: &ReferenceWindow,
    pos: i64,
    flank: &[u8],
    clips: &mut BTreeMap<i64, SoftClipRecord>,
) -> MismatchScan {
    let seq = strip_markers(flank);
    let len = seq.len();
    let mut scan = MismatchScan::default();

    let mut n = 0;
    while n < len && window.is_base(pos + n as i64, seq[n]) {
        n += 1;
    }
    let anchor = pos + n as i64;
    scan.clip_positions.push(anchor);

    let mut bases = Vec::new();
    while bases.len() <= 3 && n < len && !window.is_base(pos + n as i64, seq[n]) {
        bases.push(seq[n]);
        scan.mismatches.push(EdgeMismatch { bases: bases.clone(), position: anchor, end: ClipEnd::Three });
        n += 1;
    }

    if bases.len() == 1 {
        let mut matched = 0;
        while n < len && window.is_base(pos + n as i64, seq[n]) {
            n += 1;
            matched += 1;
        }
        if matched > 1 {
            let mut n2 = 0;
            while n + n2 + 1 < len && window.is_base(pos + (n + n2 + 1) as i64, seq[n + n2 + 1]) {
                n2 += 1;
            }
            if n2 > 2 && n + n2 + 1 < len {
                let clip_pos = pos + (n + n2) as i64;
                scan.clip_positions.push(clip_pos);
                scan.shifted_mismatch = Some((pos + n as i64, seq[n]));
                mark_used(clips, clip_pos);
                matched += n2;
            } else {
                let clip_pos = pos + n as i64;
                scan.clip_positions.push(clip_pos);
                mark_used(clips, clip_pos);
            }
        }
        scan.matched = i32::try_from(matched).unwrap_or(i32::MAX);
    }
    scan
}

/// Scans backward from `pos` over the expected 5′ flank `flank`, which ends at `pos`.
pub fn find_mm5(
    window: &ReferenceWindow,
    pos: i64,
    flank: &[u8],
    clips: &mut BTreeMap<i64, SoftClipRecord>,
) -> MismatchScan {
    let seq = strip_markers(flank);
    let at = |i: usize| base_at(&seq, -1 - i as i64);
    let mut scan = MismatchScan::default();

    let mut n = 0;
    let mut bases = Vec::new();
    while bases.len() < 3 {
        let Some(b) = at(n) else { break };
        if window.get(pos - n as i64).is_none_or(|r| r == b) {
            break;
        }
        bases.insert(0, b);
        scan.mismatches.push(EdgeMismatch { bases: bases.clone(), position: pos - n as i64, end: ClipEnd::Five });
        n += 1;
    }
    scan.clip_positions.push(pos + 1);

    if bases.len() == 1 {
        let mut matched = 0;
        while at(n).is_some_and(|b| window.is_base(pos - n as i64, b)) {
            n += 1;
            matched += 1;
        }
        // Unlike the 3' scan, a 5' clip is never moved past a second mismatch.
        if matched > 1 {
            let clip_pos = pos - n as i64;
            scan.clip_positions.push(clip_pos);
            mark_used(clips, clip_pos);
        }
        scan.matched = i32::try_from(matched).unwrap_or(i32::MAX);
    }
    scan
}

fn mark_used(clips: &mut BTreeMap<i64, SoftClipRecord>, pos: i64) {
    if let Some(clip) = clips.get_mut(&pos) {
        clip.used = true;
    }
}
