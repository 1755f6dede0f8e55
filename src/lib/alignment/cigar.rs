//! CIGAR rewriting ahead of the walk.
//!
//! Aligners often place an indel near a read end where a soft clip would be more honest, or
//! split one complex event into several close indels. [`modify_cigar`] turns such ends into soft
//! clips (so clip-based realignment can recover the indel) and fuses close indels into a single
//! deletion plus insertion. Clips that actually match the reference are folded back into the
//! aligned block.

use noodles::sam::alignment::record::cigar::op::Kind;

use super::CigarOps;
use crate::reference::ReferenceWindow;

const MAX_EDGE_MATCH: usize = 10;
const MAX_LEADING_MATCH: usize = 8;

fn is_indel(kind: Kind) -> bool {
    matches!(kind, Kind::Insertion | Kind::Deletion)
}

fn if_insertion(kind: Kind, len: usize) -> usize {
    if kind == Kind::Insertion { len } else { 0 }
}

fn if_deletion(kind: Kind, len: usize) -> i64 {
    if kind == Kind::Deletion { len as i64 } else { 0 }
}

/// Drops zero-length operations and merges neighbours of the same kind.
fn normalize(ops: &mut CigarOps) {
    let mut out: CigarOps = Vec::with_capacity(ops.len());
    for &(kind, len) in ops.iter() {
        if len == 0 {
            continue;
        }
        match out.last_mut() {
            Some((last, n)) if *last == kind => *n += len,
            _ => out.push((kind, len)),
        }
    }
    *ops = out;
}

fn read_length(ops: &[(Kind, usize)]) -> usize {
    ops.iter()
        .filter(|(k, _)| matches!(k, Kind::Match | Kind::Insertion | Kind::SoftClip))
        .map(|(_, l)| l)
        .sum()
}

fn reference_length(ops: &[(Kind, usize)]) -> i64 {
    ops.iter().filter(|(k, _)| matches!(k, Kind::Match | Kind::Deletion)).map(|(_, l)| *l as i64).sum()
}

fn query_matches(query: &[u8], i: usize, window: &ReferenceWindow, pos: i64) -> bool {
    query.get(i).is_some_and(|&b| window.is_base(pos, b))
}

fn query_mismatches(query: &[u8], i: usize, window: &ReferenceWindow, pos: i64) -> bool {
    match (query.get(i), window.get(pos)) {
        (Some(&b), Some(r)) => b != r,
        _ => false,
    }
}

/// One pass of end-indel and close-indel rewrites. Returns true when anything changed.
fn rewrite_once(ops: &mut CigarOps, position: &mut i64, query: &[u8], window: &ReferenceWindow) -> bool {
    let mut changed = false;

    // clip then indel
    if let Some([(Kind::SoftClip, s), (k, l)]) = ops.first_chunk::<2>().copied()
        .filter(|[_, (k, _)]| is_indel(*k))
    {
        *position += if_deletion(k, l);
        ops.splice(0..2, [(Kind::SoftClip, s + if_insertion(k, l))]);
        normalize(ops);
        changed = true;
    }

    // indel then clip
    if let Some([(k, l), (Kind::SoftClip, s)]) = ops.last_chunk::<2>().copied()
        .filter(|[(k, _), _]| is_indel(*k))
    {
        let n = ops.len();
        ops.splice(n - 2.., [(Kind::SoftClip, s + if_insertion(k, l))]);
        normalize(ops);
        changed = true;
    }

    // clip, short match, indel
    if let Some([(Kind::SoftClip, s), (Kind::Match, m), (k, l)]) = ops.first_chunk::<3>().copied()
        .filter(|[_, (_, m), (k, _)]| is_indel(*k) && *m <= MAX_EDGE_MATCH)
    {
        *position += m as i64 + if_deletion(k, l);
        ops.splice(0..3, [(Kind::SoftClip, s + m + if_insertion(k, l))]);
        normalize(ops);
        changed = true;
    }

    // indel, short match, clip
    if let Some([(k, l), (Kind::Match, m), (Kind::SoftClip, s)]) = ops.last_chunk::<3>().copied()
        .filter(|[(k, _), (_, m), _]| is_indel(*k) && *m <= MAX_EDGE_MATCH)
    {
        let n = ops.len();
        ops.splice(n - 3.., [(Kind::SoftClip, s + m + if_insertion(k, l))]);
        normalize(ops);
        changed = true;
    }

    // leading short match, indel, match: clip the short match plus any mismatching bases after
    if let Some([(Kind::Match, m), (k, l), (Kind::Match, mlen)]) = ops.first_chunk::<3>().copied()
        .filter(|[(_, m), (k, _), _]| is_indel(*k) && *m <= MAX_LEADING_MATCH)
    {
        let mut tslen = m + if_insertion(k, l);
        *position += m as i64 + if_deletion(k, l);
        let mut n0 = 0;
        while n0 < mlen && query_mismatches(query, tslen + n0, window, *position + n0 as i64) {
            n0 += 1;
        }
        tslen += n0;
        *position += n0 as i64;
        ops.splice(0..3, [(Kind::SoftClip, tslen), (Kind::Match, mlen - n0)]);
        normalize(ops);
        changed = true;
    }

    // indel, trailing short match
    if let Some([(k, l), (Kind::Match, m)]) = ops.last_chunk::<2>().copied()
        .filter(|[(k, _), (_, m)]| is_indel(*k) && *m <= MAX_LEADING_MATCH)
    {
        let n = ops.len();
        ops.splice(n - 2.., [(Kind::SoftClip, m + if_insertion(k, l))]);
        normalize(ops);
        changed = true;
    }

    changed |= fuse_deletion_pair_with_insertion(ops, *position, query, window);
    changed |= fuse_close_indels(ops);
    changed
}

/// `M D m I m D` with short middle matches becomes `M D I`.
fn fuse_deletion_pair_with_insertion(
    ops: &mut CigarOps,
    position: i64,
    query: &[u8],
    window: &ReferenceWindow,
) -> bool {
    let found = ops.windows(6).position(|w| {
        matches!(
            w,
            [
                (Kind::Match, _),
                (Kind::Deletion, _),
                (Kind::Match, m1),
                (Kind::Insertion, _),
                (Kind::Match, m2),
                (Kind::Deletion, _)
            ] if *m1 < 10 && *m2 < 10 && m1 + m2 <= MAX_EDGE_MATCH
        )
    });
    let Some(j) = found else {
        return false;
    };
    let [(_, lead), (_, d1), (_, m1), (_, ins), (_, m2), (_, d2)] =
        [ops[j], ops[j + 1], ops[j + 2], ops[j + 3], ops[j + 4], ops[j + 5]];
    let mid = m1 + m2;
    let tslen = mid + ins;
    let dlen = d1 + mid + d2;
    let rdoff = lead + read_length(&ops[..j]);
    let refoff = position + lead as i64 + reference_length(&ops[..j]);
    let mut rn = 0;
    while rn < tslen.min(dlen) && query_matches(query, rdoff + rn, window, refoff + rn as i64) {
        rn += 1;
    }
    ops.splice(
        j..j + 6,
        [(Kind::Match, lead + rn), (Kind::Deletion, dlen - rn), (Kind::Insertion, tslen - rn)],
    );
    normalize(ops);
    true
}

/// An indel, a match under ten bases, then another indel (optionally a further insertion)
/// collapse into one deletion plus one insertion.
fn fuse_close_indels(ops: &mut CigarOps) -> bool {
    let mut changed = false;
    for first in [Kind::Deletion, Kind::Insertion] {
        let found = ops.windows(3).position(|w| {
            matches!(w, [(k0, _), (Kind::Match, m), (k2, _)] if *k0 == first && *m < 10 && is_indel(*k2))
        });
        let Some(j) = found else {
            continue;
        };
        let (_, a) = ops[j];
        let (_, b) = ops[j + 1];
        let (k, c) = ops[j + 2];
        let (mut dlen, mut ilen) = if first == Kind::Deletion { (a + b, b) } else { (b, a + b) };
        let mut end = j + 3;
        if k == Kind::Insertion {
            ilen += c;
        } else {
            dlen += c;
            if let Some(&(Kind::Insertion, d)) = ops.get(j + 3) {
                ilen += d;
                end += 1;
            }
        }
        ops.splice(j..end, [(Kind::Deletion, dlen), (Kind::Insertion, ilen)]);
        normalize(ops);
        changed = true;
    }
    changed
}

/// Folds a trailing clip into the aligned block when its bases follow the reference.
fn absorb_trailing_clip(ops: &mut CigarOps, position: i64, query: &[u8], window: &ReferenceWindow) {
    let Some([(Kind::Match, mch), (Kind::SoftClip, soft)]) = ops.last_chunk::<2>().copied() else {
        return;
    };
    let n = ops.len();
    let prefix = &ops[..n - 2];
    let rdoff = mch + read_length(prefix);
    let refoff = position + mch as i64 + reference_length(prefix);
    let mut rn = 0;
    while rn + 1 < soft && query_matches(query, rdoff + rn + 1, window, refoff + rn as i64 + 1) {
        rn += 1;
    }
    if rn > 3 || query_matches(query, rdoff, window, refoff) {
        ops.splice(n - 2.., [(Kind::Match, mch + rn + 1), (Kind::SoftClip, soft - rn - 1)]);
        normalize(ops);
    }
}

/// Folds a leading clip into the aligned block when its bases precede the reference.
fn absorb_leading_clip(ops: &mut CigarOps, position: &mut i64, query: &[u8], window: &ReferenceWindow) {
    let Some([(Kind::SoftClip, soft), (Kind::Match, mch)]) = ops.first_chunk::<2>().copied() else {
        return;
    };
    let mut rn = 0;
    while rn + 1 < soft && query_matches(query, soft - rn - 2, window, *position - rn as i64 - 2) {
        rn += 1;
    }
    if rn > 3 || query_matches(query, soft - 1, window, *position - 1) {
        ops.splice(0..2, [(Kind::SoftClip, soft - rn - 1), (Kind::Match, mch + rn + 1)]);
        normalize(ops);
        *position -= rn as i64 + 1;
    }
}

/// Rewrites a read's CIGAR and start position before it is walked.
///
/// Returns the possibly shifted 1-based start and the new operations. Read bases are never
/// added or removed; only their classification changes.
#[must_use]
pub fn modify_cigar(
    window: &ReferenceWindow,
    position: i64,
    cigar: &[(Kind, usize)],
    query: &[u8],
) -> (i64, CigarOps) {
    let mut ops = cigar.to_vec();
    let mut position = position;
    while rewrite_once(&mut ops, &mut position, query, window) {}
    absorb_trailing_clip(&mut ops, position, query, window);
    absorb_leading_clip(&mut ops, &mut position, query, window);
    (position, ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{format_cigar, parse_cigar_string};
    use rstest::rstest;

    fn window() -> ReferenceWindow {
        ReferenceWindow::from_bases(&[b'G'; 300])
    }

    /// Query with `T` for every clipped or inserted base and `G` elsewhere.
    fn query(pattern: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for (kind, len) in parse_cigar_string(pattern) {
            match kind {
                Kind::SoftClip | Kind::Insertion => out.extend(std::iter::repeat_n(b'T', len)),
                Kind::Match => out.extend(std::iter::repeat_n(b'G', len)),
                _ => {}
            }
        }
        out
    }

    #[rstest]
    #[case("2S3I20M", 100, "5S20M", 100)]
    #[case("2S3D20M", 100, "2S20M", 103)]
    #[case("20M3I2S", 100, "20M5S", 100)]
    #[case("3S5M2I20M", 100, "10S20M", 105)]
    #[case("20M2I3M5S", 100, "20M10S", 100)]
    #[case("20M2D3M4D20M", 100, "20M9D3I20M", 100)]
    #[case("20M2I3M4I20M", 100, "20M3D9I20M", 100)]
    #[case("20M2D3M4D2I20M", 100, "20M9D5I20M", 100)]
    #[case("30M", 100, "30M", 100)]
    fn test_modify_cigar(
        #[case] cigar: &str,
        #[case] position: i64,
        #[case] expected: &str,
        #[case] expected_position: i64,
    ) {
        let ops = parse_cigar_string(cigar);
        let (pos, out) = modify_cigar(&window(), position, &ops, &query(cigar));
        assert_eq!(format_cigar(&out), expected);
        assert_eq!(pos, expected_position);
    }

    #[test]
    fn test_short_leading_match_before_deletion_is_realigned() {
        // the five leading bases match the reference right before the deletion, so they are
        // clipped then folded back in front of the remaining block
        let ops = parse_cigar_string("5M2D30M");
        let (pos, out) = modify_cigar(&window(), 100, &ops, &[b'G'; 35]);
        assert_eq!(format_cigar(&out), "35M");
        assert_eq!(pos, 102);
    }

    #[test]
    fn test_matching_trailing_clip_is_absorbed() {
        let ops = parse_cigar_string("20M5S");
        let (pos, out) = modify_cigar(&window(), 100, &ops, &[b'G'; 25]);
        assert_eq!(format_cigar(&out), "25M");
        assert_eq!(pos, 100);
    }

    #[test]
    fn test_mismatching_clips_are_kept() {
        let cigar = "4S20M4S";
        let ops = parse_cigar_string(cigar);
        let (pos, out) = modify_cigar(&window(), 100, &ops, &query(cigar));
        assert_eq!(format_cigar(&out), cigar);
        assert_eq!(pos, 100);
    }
}
