//! Byte-sequence helpers shared by the walker, realignment and synthesis.
//!
//! Slicing follows a forgiving convention: a negative start counts from the end, a negative
//! length leaves that many bases off the end, and every bound is clamped to the sequence.

/// Forgiving substring of `seq` from `start` with optional `len`.
///
/// ```
/// use vardict_lib::seq::substr;
///
/// assert_eq!(substr(b"ACGTAC", 2, None), b"GTAC");
/// assert_eq!(substr(b"ACGTAC", -2, None), b"AC");
/// assert_eq!(substr(b"ACGTAC", 1, Some(2)), b"CG");
/// assert_eq!(substr(b"ACGTAC", 1, Some(-2)), b"CGT");
/// assert_eq!(substr(b"ACGTAC", 10, Some(3)), b"");
/// ```
#[must_use]
pub fn substr(seq: &[u8], start: i64, len: Option<i64>) -> &[u8] {
    let n = seq.len() as i64;
    let begin = if start < 0 { (n + start).max(0) } else { start.min(n) };
    let end = match len {
        None => n,
        Some(l) if l < 0 => (n + l).max(begin),
        Some(l) => (begin + l).min(n),
    };
    if end <= begin {
        return &[];
    }
    &seq[begin as usize..end as usize]
}

/// Base at `idx`, counting from the end when negative.
#[must_use]
pub fn base_at(seq: &[u8], idx: i64) -> Option<u8> {
    let n = seq.len() as i64;
    let i = if idx < 0 { n + idx } else { idx };
    if i < 0 || i >= n { None } else { Some(seq[i as usize]) }
}

/// Drops the `#` and `^` markers from a descriptor-derived sequence.
#[must_use]
pub fn strip_markers(seq: &[u8]) -> Vec<u8> {
    seq.iter().copied().filter(|&b| b != b'#' && b != b'^').collect()
}

/// True when one base makes up more than three quarters of `seq`, or `seq` is empty.
#[must_use]
pub fn is_low_complexity(seq: &[u8]) -> bool {
    if seq.is_empty() {
        return true;
    }
    let len = seq.len() as f64;
    b"ATGC".iter().any(|&nt| seq.iter().filter(|&&b| b == nt).count() as f64 / len > 0.75)
}

/// Direction in which a clip sequence is compared against a reference stretch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDirection {
    /// Compare `seq1[i]` with `seq2[i]`.
    Forward,
    /// Compare `seq1[i]` with `seq2[len - 1 - i]`.
    Backward,
}

/// True when `seq1` matches `seq2` with at most two mismatches and a mismatch rate below 15%.
#[must_use]
pub fn is_match(seq1: &[u8], seq2: &[u8], direction: MatchDirection) -> bool {
    let seq2 = strip_markers(seq2);
    let mut mismatches = 0;
    for n in 0..seq1.len().min(seq2.len()) {
        let other = match direction {
            MatchDirection::Forward => seq2[n],
            MatchDirection::Backward => seq2[seq2.len() - 1 - n],
        };
        if seq1[n] != other {
            mismatches += 1;
        }
    }
    mismatches <= 2 && f64::from(mismatches) / (seq1.len() as f64) < 0.15
}

/// Lossy byte-to-string for log lines.
#[must_use]
pub fn show(seq: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(b"ACGTAC", 0, None, b"ACGTAC".as_slice())]
    #[case(b"ACGTAC", -1, None, b"C".as_slice())]
    #[case(b"ACGTAC", -10, Some(2), b"AC".as_slice())]
    #[case(b"ACGTAC", 4, Some(10), b"AC".as_slice())]
    #[case(b"ACGTAC", 3, Some(-4), b"".as_slice())]
    fn test_substr(
        #[case] seq: &[u8],
        #[case] start: i64,
        #[case] len: Option<i64>,
        #[case] expected: &[u8],
    ) {
        assert_eq!(substr(seq, start, len), expected);
    }

    #[test]
    fn test_base_at() {
        assert_eq!(base_at(b"ACG", -1), Some(b'G'));
        assert_eq!(base_at(b"ACG", 0), Some(b'A'));
        assert_eq!(base_at(b"ACG", -4), None);
        assert_eq!(base_at(b"ACG", 3), None);
    }

    #[rstest]
    #[case(b"", true)]
    #[case(b"AAAAAAAT", true)]
    #[case(b"AAAT", false)]
    #[case(b"ACGTACGT", false)]
    fn test_low_complexity(#[case] seq: &[u8], #[case] expected: bool) {
        assert_eq!(is_low_complexity(seq), expected);
    }

    #[test]
    fn test_is_match() {
        let clip = b"ACGTACGTACGTACGTACGT";
        assert!(is_match(clip, clip, MatchDirection::Forward));
        let mut one_off = clip.to_vec();
        one_off[3] = b'A';
        assert!(is_match(clip, &one_off, MatchDirection::Forward));
        let mut three_off = one_off.clone();
        three_off[5] = b'A';
        three_off[9] = b'A';
        assert!(!is_match(clip, &three_off, MatchDirection::Forward));

        let reversed: Vec<u8> = b"TTGCA".iter().rev().copied().collect();
        assert!(is_match(b"TTGCA", &reversed, MatchDirection::Backward));
        assert!(is_match(b"ACG", b"A#C^G", MatchDirection::Forward));
    }
}
