//! The read-to-position aggregation walk.
//!
//! Every accepted read is replayed against the reference along its (rewritten) CIGAR. Each
//! aligned base, insertion and deletion becomes one observation in the [`VariationTable`];
//! soft-clipped ends feed the clip consensus records that realignment later consumes.
//!
//! Read coordinates: `n` is the offset into the read (clipped bases included), `p` is the read
//! position used for the mean-position statistic, and `start` is the reference position.

use ahash::AHashSet;
use log::debug;
use noodles::sam::alignment::record::cigar::op::Kind;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::alignment::cigar::modify_cigar;
use crate::alignment::{AlignmentRecord, indel_length, match_insertion_length, read_span_length};
use crate::config::CallerConfig;
use crate::reference::ReferenceWindow;
use crate::region::Region;
use crate::variation::{
    ComplexTail, Descriptor, LinkedIndel, Observation, Strand, TailSegment, VariationTable,
};

/// Splice junctions (`start-end`) seen across every region of a run.
pub type SpliceSet = Mutex<AHashSet<String>>;

/// Counters reported at the end of a region walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub reads_seen: u64,
    pub reads_used: u64,
}

/// Walks reads of one region into a [`VariationTable`].
pub struct CigarWalker<'a> {
    config: &'a CallerConfig,
    region: &'a Region,
    window: &'a ReferenceWindow,
    splices: &'a SpliceSet,
    rng: Option<StdRng>,
    duplicates: AHashSet<String>,
    duplicate_position: i64,
    pub stats: WalkStats,
}

/// Per-read constants shared by the CIGAR operation handlers.
struct ReadContext<'r> {
    record: &'r AlignmentRecord,
    strand: Strand,
    mismatches: i32,
    /// Read bases consumed by M and I.
    rlen1: i64,
    /// Read bases consumed by M, I and S.
    rlen2: i64,
}

impl ReadContext<'_> {
    fn base(&self, i: usize) -> u8 {
        self.record.sequence.get(i).copied().unwrap_or(b'N')
    }

    fn qual(&self, i: usize) -> f64 {
        f64::from(self.record.quality(i))
    }

    fn bases(&self, from: usize, len: usize) -> Vec<u8> {
        let end = (from + len).min(self.record.sequence.len());
        self.record.sequence.get(from..end).map(<[u8]>::to_vec).unwrap_or_default()
    }

    fn quals(&self, from: usize, len: usize) -> Vec<f64> {
        (from..from + len).filter(|&i| i < self.record.qualities.len()).map(|i| self.qual(i)).collect()
    }

    /// Distance of read position `p` from the nearer end of the aligned read.
    fn read_position(&self, p: i64) -> i32 {
        let tp = if p < self.rlen1 - p { p + 1 } else { self.rlen1 - p };
        i32::try_from(tp).unwrap_or(i32::MAX)
    }

    fn observation(&self, read_position: i64, quality: f64, mismatches: i32) -> Observation {
        Observation {
            strand: self.strand,
            read_position: i32::try_from(read_position).unwrap_or(i32::MAX),
            quality,
            mapping_quality: i32::from(self.record.mapping_quality),
            mismatches,
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() { 0.0 } else { values.iter().sum::<f64>() / values.len() as f64 }
}

fn is_match_op(kind: Kind) -> bool {
    matches!(kind, Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch)
}

fn is_clip_op(kind: Kind) -> bool {
    matches!(kind, Kind::SoftClip | Kind::HardClip)
}

impl<'a> CigarWalker<'a> {
    #[must_use]
    pub fn new(
        config: &'a CallerConfig,
        region: &'a Region,
        window: &'a ReferenceWindow,
        splices: &'a SpliceSet,
    ) -> Self {
        let rng = config.downsampling.map(|_| match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        });
        Self {
            config,
            region,
            window,
            splices,
            rng,
            duplicates: AHashSet::new(),
            duplicate_position: -1,
            stats: WalkStats::default(),
        }
    }

    /// Walks every read into `table`.
    pub fn walk_all<'r, I>(&mut self, records: I, table: &mut VariationTable)
    where
        I: IntoIterator<Item = &'r AlignmentRecord>,
    {
        for record in records {
            self.walk(record, table);
        }
        debug!(
            "{}: used {} of {} reads, read length {}",
            self.region, self.stats.reads_used, self.stats.reads_seen, table.read_length
        );
    }

    /// Walks one read into `table`, unless a filter rejects it.
    pub fn walk(&mut self, record: &AlignmentRecord, table: &mut VariationTable) {
        self.stats.reads_seen += 1;
        let Some(mismatches) = self.accept(record) else {
            return;
        };
        self.stats.reads_used += 1;

        let (position, ops) = modify_cigar(self.window, record.position, &record.cigar, &record.sequence);
        let ctx = ReadContext {
            record,
            strand: Strand::from_reverse_flag(record.flags.is_reverse_complemented()),
            mismatches,
            rlen1: match_insertion_length(&ops),
            rlen2: read_span_length(&ops),
        };
        table.read_length = table.read_length.max(i32::try_from(ctx.rlen2).unwrap_or(i32::MAX));
        self.walk_ops(&ctx, position, &ops, table);
    }

    /// Applies the read filters. Returns the read's mismatch count when it is kept.
    fn accept(&mut self, record: &AlignmentRecord) -> Option<i32> {
        if let (Some(fraction), Some(rng)) = (self.config.downsampling, self.rng.as_mut()) {
            if rng.random::<f64>() <= fraction {
                return None;
            }
        }
        if record.flags.is_unmapped() || record.cigar.is_empty() {
            return None;
        }
        if self.config.min_mapping_quality.is_some_and(|min| record.mapping_quality < min) {
            return None;
        }
        if self.config.filter_non_primary
            && (record.flags.is_secondary() || record.flags.is_duplicate())
        {
            return None;
        }
        if record.sequence.is_empty() {
            return None;
        }
        if self.config.remove_duplicates && self.is_duplicate(record) {
            return None;
        }

        let Some(edit_distance) = record.edit_distance else {
            debug!("No NM tag for mismatches, skipping {}", record.name);
            return None;
        };
        let mismatches = edit_distance - i32::try_from(indel_length(&record.cigar)).unwrap_or(i32::MAX);
        if mismatches > self.config.max_mismatches {
            return None;
        }

        if self.config.amplicon.is_some() && !self.passes_amplicon_filter(record) {
            return None;
        }
        if !record.flags.is_mate_unmapped()
            && record.mate_on_same_chrom()
            && record.has_supplementary_alignments
            && record.flags.is_supplementary()
        {
            return None;
        }
        Some(mismatches)
    }

    fn is_duplicate(&mut self, record: &AlignmentRecord) -> bool {
        if record.position != self.duplicate_position {
            self.duplicates.clear();
        }
        let key = if !record.flags.is_mate_unmapped() && record.mate_chrom.is_some() {
            format!(
                "{}-{}-{}",
                record.position,
                record.mate_chrom.as_deref().unwrap_or_default(),
                record.mate_position
            )
        } else if record.flags.is_mate_unmapped() {
            format!("{}-{}", record.position, crate::alignment::format_cigar(&record.cigar))
        } else {
            return false;
        };
        if !self.duplicates.insert(key) {
            return true;
        }
        self.duplicate_position = record.position;
        false
    }

    /// Keeps reads whose implied segment overlaps the amplicon closely enough.
    fn passes_amplicon_filter(&self, record: &AlignmentRecord) -> bool {
        let Some(params) = self.config.amplicon else {
            return true;
        };
        let region = self.region;
        let mut seg_start = record.position;
        let mut seg_end = seg_start + record.aligned_length() - 1;
        let overlap = |s: i64, e: i64| {
            let ts1 = s.max(region.start);
            let te1 = e.min(region.end);
            (ts1 - te1).abs() as f64 / (e - s) as f64
        };

        let leading_clip = record.cigar.first().is_some_and(|(k, _)| *k == Kind::SoftClip);
        let trailing_clip = record.cigar.last().is_some_and(|(k, _)| *k == Kind::SoftClip);
        if leading_clip || trailing_clip {
            return overlap(seg_start, seg_end) > params.overlap_fraction;
        }
        if record.mate_on_same_chrom() && record.template_length != 0 {
            if record.template_length > 0 {
                seg_end = seg_start + record.template_length - 1;
            } else {
                seg_start = record.mate_position;
                seg_end = record.mate_position - record.template_length - 1;
            }
        }
        (seg_start - region.start).abs() <= params.distance
            && (seg_end - region.end).abs() <= params.distance
            && overlap(seg_start, seg_end) > params.overlap_fraction
    }

    /// Scans up to `len` bases after an indel for mismatches within `vext` of each other.
    ///
    /// Returns the number of bases up to the last mismatch and the mismatch count.
    fn find_offset(&self, ctx: &ReadContext<'_>, ref_pos: i64, read_pos: usize, len: usize) -> (usize, i32) {
        let mut offset = 0;
        let mut mismatches = 0;
        let mut since_mismatch = 0;
        for vi in 0..len {
            if since_mismatch > self.config.vext {
                break;
            }
            let base = ctx.base(read_pos + vi);
            if base == b'N' || ctx.qual(read_pos + vi) < self.config.good_quality {
                break;
            }
            match self.window.get(ref_pos + vi as i64) {
                Some(b'N') => break,
                Some(r) if r != base => {
                    offset = vi + 1;
                    mismatches += 1;
                    since_mismatch = 0;
                }
                Some(_) => since_mismatch += 1,
                None => {}
            }
        }
        (offset, mismatches)
    }

    #[allow(clippy::too_many_lines)]
    fn walk_ops(&self, ctx: &ReadContext<'_>, position: i64, ops: &[(Kind, usize)], table: &mut VariationTable) {
        let cfg = self.config;
        let goodq = cfg.good_quality;
        let first_op = ops.iter().position(|(k, _)| *k != Kind::HardClip).unwrap_or(0);
        let last_op = ops.iter().rposition(|(k, _)| *k != Kind::HardClip).unwrap_or(0);

        let mut start = position;
        let mut n: usize = 0;
        let mut p: i64 = 0;
        let mut offset: usize = 0;
        let mut ci = 0;

        while ci < ops.len() {
            let (mut kind, m) = ops[ci];
            if (ci == first_op || ci == last_op) && kind == Kind::Insertion {
                kind = Kind::SoftClip;
            }

            match kind {
                Kind::Skip => {
                    self.splices.lock().insert(format!("{}-{}", start - 1, start + m as i64 - 1));
                    start += m as i64;
                    offset = 0;
                    ci += 1;
                    continue;
                }
                Kind::SoftClip => {
                    if ci == first_op {
                        self.five_prime_clip(ctx, start, m, table);
                        n += m;
                    } else if ci == last_op {
                        n = self.three_prime_clip(ctx, &mut start, n, &mut p, m, table);
                    } else {
                        n += m;
                    }
                    offset = 0;
                    start = position;
                    ci += 1;
                    continue;
                }
                Kind::HardClip | Kind::Pad => {
                    offset = 0;
                    ci += 1;
                    continue;
                }
                Kind::Insertion => {
                    let insertion_ci = ci;
                    let bases = ctx.bases(n, m);
                    let mut quals = ctx.quals(n, m);
                    let mut tail = Vec::new();
                    let mut multoffs: i64 = 0;
                    let mut multoffp: usize = 0;
                    offset = 0;

                    let linked = match (ops.get(ci + 1), ops.get(ci + 2)) {
                        (Some(&(mk, ci2)), Some(&(k2, ci4)))
                            if is_match_op(mk)
                                && i32::try_from(ci2).unwrap_or(i32::MAX) <= cfg.vext
                                && matches!(k2, Kind::Insertion | Kind::Deletion) =>
                        {
                            Some((ci2, k2, ci4))
                        }
                        _ => None,
                    };
                    if let Some((ci2, k2, ci4)) = linked {
                        let matched = ctx.bases(n + m, ci2);
                        quals.extend(ctx.quals(n + m, ci2));
                        let indel = if k2 == Kind::Insertion {
                            quals.extend(ctx.quals(n + m + ci2, ci4));
                            multoffp += ci2 + ci4;
                            multoffs += ci2 as i64;
                            LinkedIndel::Insertion(ctx.bases(n + m + ci2, ci4))
                        } else {
                            quals.push(ctx.qual(n + m + ci2));
                            multoffp += ci2;
                            multoffs += (ci2 + ci4) as i64;
                            LinkedIndel::Deletion(u32::try_from(ci4).unwrap_or(u32::MAX))
                        };
                        tail.push(TailSegment::Linked { matched, indel });
                        ci += 2;
                        if let Some(&(mk, ci6)) = ops.get(ci + 1) {
                            if is_match_op(mk) {
                                let (off, _) = self.find_offset(ctx, start + multoffs, n + m + multoffp, ci6);
                                offset = off;
                            }
                        }
                        if offset > 0 {
                            quals.extend(ctx.quals(n + m + multoffp, offset));
                            tail.push(TailSegment::Matched(ctx.bases(n + m + multoffp, offset)));
                            for osi in 0..offset {
                                table.add_coverage(start + multoffs + osi as i64, 1);
                            }
                        }
                    } else if let Some(&(mk, ci2)) = ops.get(ci + 1) {
                        if is_match_op(mk) {
                            let (off, _) = self.find_offset(ctx, start, n + m, ci2);
                            offset = off;
                            if offset > 0 {
                                quals.extend(ctx.quals(n + m, offset));
                                tail.push(TailSegment::Matched(ctx.bases(n + m, offset)));
                                for osi in 0..offset {
                                    table.add_coverage(start + osi as i64, 1);
                                }
                            }
                        }
                    }

                    let descriptor = Descriptor::Insertion { bases, tail: ComplexTail(tail) };
                    let anchor = start - 1;
                    if self.region.contains(anchor) && !descriptor.flattened_bases().contains(&b'N') {
                        table.note_insertion(anchor, &descriptor);
                        let tp = i64::from(ctx.read_position(p));
                        let obs = ctx.observation(tp, mean(&quals), ctx.mismatches);
                        table.insertion_mut(anchor, &descriptor).observe(&obs, goodq);

                        if let Some(r) = self.window.get(anchor) {
                            let reference = Descriptor::Reference(r);
                            if n > 0 && ctx.base(n - 1) == r && table.variant(anchor, &reference).is_some() {
                                let prior = ctx.observation(tp, ctx.qual(n - 1), ctx.mismatches);
                                table.variant_mut(anchor, &reference).remove(&prior, goodq);
                            }
                            let after_clip = insertion_ci > 0 && is_clip_op(ops[insertion_ci - 1].0);
                            if after_clip {
                                let inserted = table.insertion(anchor, &descriptor).cloned().unwrap_or_default();
                                table.variant_mut(anchor, &reference).observe_uncounted(&obs, &inserted);
                                table.add_coverage(anchor, 1);
                            }
                        }
                    }

                    n += m + offset + multoffp;
                    p += (m + offset + multoffp) as i64;
                    start += offset as i64 + multoffs;
                    ci += 1;
                    continue;
                }
                Kind::Deletion => {
                    offset = 0;
                    let q1 = if n > 0 { ctx.qual(n - 1) } else { ctx.qual(n) };
                    let mut quals = Vec::new();
                    let mut tail = Vec::new();
                    let mut multoffs: i64 = 0;
                    let mut multoffp: usize = 0;
                    let mut nmoff = 0;

                    let linked = match (ops.get(ci + 1), ops.get(ci + 2)) {
                        (Some(&(mk, ci2)), Some(&(k2, ci4)))
                            if is_match_op(mk)
                                && i32::try_from(ci2).unwrap_or(i32::MAX) <= cfg.vext
                                && matches!(k2, Kind::Insertion | Kind::Deletion) =>
                        {
                            Some((ci2, k2, ci4))
                        }
                        _ => None,
                    };
                    if let Some((ci2, k2, ci4)) = linked {
                        let matched = ctx.bases(n, ci2);
                        quals.extend(ctx.quals(n, ci2));
                        let indel = if k2 == Kind::Insertion {
                            quals.extend(ctx.quals(n + ci2, ci4));
                            multoffs += ci2 as i64;
                            multoffp += ci2 + ci4;
                            LinkedIndel::Insertion(ctx.bases(n + ci2, ci4))
                        } else {
                            multoffs += (ci2 + ci4) as i64;
                            multoffp += ci2;
                            LinkedIndel::Deletion(u32::try_from(ci4).unwrap_or(u32::MAX))
                        };
                        tail.push(TailSegment::Linked { matched, indel });
                        if let Some(&(mk, ci6)) = ops.get(ci + 3) {
                            if is_match_op(mk) {
                                let (off, mm) =
                                    self.find_offset(ctx, start + multoffs + m as i64, n + multoffp, ci6);
                                offset = off;
                                nmoff += mm;
                            }
                        }
                        if offset > 0 {
                            quals.extend(ctx.quals(n + multoffp, offset));
                            tail.push(TailSegment::Matched(ctx.bases(n + multoffp, offset)));
                        }
                        ci += 2;
                    } else if let Some(&(Kind::Insertion, ci2)) = ops.get(ci + 1) {
                        tail.push(TailSegment::Inserted(ctx.bases(n, ci2)));
                        quals.extend(ctx.quals(n, ci2));
                        multoffp += ci2;
                        if let Some(&(mk, ci4)) = ops.get(ci + 2) {
                            if is_match_op(mk) {
                                let (off, mm) = self.find_offset(ctx, start + m as i64, n + multoffp, ci4);
                                offset = off;
                                nmoff += mm;
                            }
                        }
                        if offset > 0 {
                            quals.extend(ctx.quals(n + multoffp, offset));
                            tail.push(TailSegment::Matched(ctx.bases(n + multoffp, offset)));
                        }
                        ci += 1;
                    } else if let Some(&(mk, ci2)) = ops.get(ci + 1) {
                        if is_match_op(mk) {
                            let (off, _) = self.find_offset(ctx, start + m as i64, n, ci2);
                            offset = off;
                            if offset > 0 {
                                quals.extend(ctx.quals(n, offset));
                                tail.push(TailSegment::Matched(ctx.bases(n, offset)));
                            }
                        }
                    }

                    let q2 = ctx.qual(n + offset);
                    quals.push(q1.max(q2));
                    if self.region.contains(start) {
                        let descriptor = Descriptor::Deletion {
                            length: u32::try_from(m).unwrap_or(u32::MAX),
                            tail: ComplexTail(tail),
                        };
                        table.note_deletion(start, &descriptor);
                        let tp = i64::from(ctx.read_position(p));
                        let obs = ctx.observation(tp, mean(&quals), ctx.mismatches - nmoff);
                        table.variant_mut(start, &descriptor).observe(&obs, goodq);
                        for i in 0..m as i64 {
                            table.add_coverage(start + i, 1);
                        }
                    }
                    start += m as i64 + offset as i64 + multoffs;
                    n += offset + multoffp;
                    p += (offset + multoffp) as i64;
                    ci += 1;
                    continue;
                }
                _ => {}
            }

            // matched block
            let mut nmoff = 0;
            let mut moffset = 0;
            let mut i = offset;
            while i < m {
                let trim = cfg.trim_bases_after != 0 && {
                    let cutoff = i64::from(cfg.trim_bases_after);
                    match ctx.strand {
                        Strand::Forward => n as i64 > cutoff,
                        Strand::Reverse => ctx.rlen2 - n as i64 > cutoff,
                    }
                };
                let first = ctx.base(n);
                if first == b'N' {
                    start += 1;
                    n += 1;
                    p += 1;
                    i += 1;
                    continue;
                }
                let mut q = ctx.qual(n);
                let mut qbases = 1;
                let mut qibases = 0;
                let mut mnp_tail = Vec::new();
                while start + 1 >= self.region.start
                    && start < self.region.end
                    && i + 1 < m
                    && q >= goodq
                    && self.window.get(start).is_some_and(|r| r != b'N' && r != ctx.base(n))
                {
                    let next = ctx.base(n + 1);
                    if next == b'N' || self.window.is_base(start + 1, b'N') {
                        break;
                    }
                    if self.window.get(start + 1).is_some_and(|r| r != next) {
                        mnp_tail.push(next);
                        q += ctx.qual(n + 1);
                        qbases += 1;
                        n += 1;
                        p += 1;
                        i += 1;
                        start += 1;
                        nmoff += 1;
                    } else {
                        break;
                    }
                }

                let mut descriptor = if mnp_tail.is_empty() {
                    Descriptor::base(first, self.window.get(start))
                } else {
                    let mut bases = vec![first];
                    bases.extend_from_slice(&mnp_tail);
                    Descriptor::Mnp(bases)
                };

                let mut ddlen: i64 = 0;
                let fold_deletion = match ops.get(ci + 1) {
                    Some(&(Kind::Deletion, dl))
                        if i32::try_from(m - i).unwrap_or(i32::MAX) <= cfg.vext
                            && self.window.get(start).is_some_and(|r| !mnp_tail.is_empty() || r != ctx.base(n))
                            && ctx.qual(n) > goodq =>
                    {
                        Some(dl)
                    }
                    _ => None,
                };
                if let Some(dl) = fold_deletion {
                    let mut bases = vec![first];
                    bases.extend_from_slice(&mnp_tail);
                    while i + 1 < m {
                        bases.push(ctx.base(n + 1));
                        q += ctx.qual(n + 1);
                        qbases += 1;
                        i += 1;
                        n += 1;
                        p += 1;
                        start += 1;
                    }
                    ddlen = dl as i64;
                    let mut tail = vec![TailSegment::Matched(bases)];
                    ci += 1;
                    if let Some(&(Kind::Insertion, ci2)) = ops.get(ci + 1) {
                        tail.push(TailSegment::Inserted(ctx.bases(n + 1, ci2)));
                        for qi in 1..=ci2 {
                            q += ctx.qual(n + qi);
                            qibases += 1;
                        }
                        n += ci2;
                        p += ci2 as i64;
                        ci += 1;
                    }
                    if let Some(&(mk, ci2)) = ops.get(ci + 1) {
                        if is_match_op(mk) {
                            let (toffset, tnm) = self.find_offset(ctx, start + ddlen + 1, n + 1, ci2);
                            if toffset != 0 {
                                for osi in 0..toffset {
                                    table.add_coverage(start + ddlen + 1 + osi as i64, 1);
                                }
                                moffset = toffset;
                                nmoff += tnm;
                                tail.push(TailSegment::Matched(ctx.bases(n + 1, toffset)));
                                for qi in 0..toffset {
                                    q += ctx.qual(n + 1 + qi);
                                    qibases += 1;
                                }
                            }
                        }
                    }
                    descriptor = Descriptor::Deletion {
                        length: u32::try_from(dl).unwrap_or(u32::MAX),
                        tail: ComplexTail(tail),
                    };
                }

                let anchor = start - qbases as i64 + 1;
                if !trim && self.region.contains(anchor) {
                    if matches!(descriptor, Descriptor::Mnp(_)) {
                        table.note_mnp(anchor, &descriptor);
                    }
                    let tp = i64::from(ctx.read_position(p));
                    let quality = q / f64::from(qbases + qibases);
                    let obs = ctx.observation(tp, quality, ctx.mismatches - nmoff);
                    table.variant_mut(anchor, &descriptor).observe(&obs, goodq);
                    for qi in 1..=qbases {
                        table.add_coverage(start - i64::from(qi) + 1, 1);
                    }
                    if descriptor.is_deletion() {
                        table.note_deletion(anchor, &descriptor);
                        for qi in 1..ddlen {
                            table.add_coverage(start + qi, 1);
                        }
                    }
                }
                start += ddlen + 1;
                n += 1;
                p += 1;
                i += 1;
            }
            if moffset != 0 {
                offset = moffset;
                n += moffset;
                start += moffset as i64;
                p += moffset as i64;
            }
            if start > self.region.end {
                break;
            }
            ci += 1;
        }
    }

    /// Leading clip: re-absorb clipped bases that match the reference just before the aligned
    /// block, then feed the rest into the 5′ clip record anchored at the aligned start.
    fn five_prime_clip(&self, ctx: &ReadContext<'_>, start: i64, len: usize, table: &mut VariationTable) {
        let goodq = self.config.good_quality;
        let mut start = start;
        let mut m = len;
        while m >= 1
            && start - 1 > 0
            && self.window.is_base(start - 1, ctx.base(m - 1))
            && ctx.qual(m - 1) > 10.0
        {
            let reference = Descriptor::Reference(ctx.base(m - 1));
            let obs = ctx.observation(m as i64, ctx.qual(m - 1), ctx.mismatches);
            table.variant_mut(start - 1, &reference).add(&obs, goodq);
            table.add_coverage(start - 1, 1);
            start -= 1;
            m -= 1;
        }
        if m == 0 {
            return;
        }

        let mut q = 0.0;
        let mut qn = 0;
        let mut low = 0;
        for si in (0..m).rev() {
            if ctx.base(si) == b'N' {
                break;
            }
            let tq = ctx.qual(si);
            if tq <= 12.0 {
                low += 1;
            }
            if low > 1 {
                break;
            }
            q += tq;
            qn += 1;
        }
        let buffer = self.config.soft_clip_buffer;
        if qn >= 1
            && qn > low
            && start >= self.region.start - buffer
            && start <= self.region.end + buffer
        {
            let clip = table.soft_clips_5.entry(start).or_default();
            for si in (m - qn..m).rev() {
                let obs = ctx.observation((si + qn - m) as i64, ctx.qual(si), ctx.mismatches);
                clip.add_base(m - 1 - si, ctx.base(si), &obs, goodq);
            }
            clip.add_read(&ctx.observation(m as i64, q / qn as f64, ctx.mismatches), goodq);
        }
    }

    /// Trailing clip: the mirror image of [`Self::five_prime_clip`]. Returns the read offset
    /// after the clip.
    fn three_prime_clip(
        &self,
        ctx: &ReadContext<'_>,
        start: &mut i64,
        n: usize,
        p: &mut i64,
        len: usize,
        table: &mut VariationTable,
    ) -> usize {
        let goodq = self.config.good_quality;
        let seq_len = ctx.record.sequence.len();
        let mut n = n;
        let mut m = len;
        while m > 0 && n < seq_len && self.window.is_base(*start, ctx.base(n)) && ctx.qual(n) > 10.0 {
            let reference = Descriptor::Reference(ctx.base(n));
            let obs = ctx.observation(ctx.rlen2 - *p, ctx.qual(n), ctx.mismatches);
            table.variant_mut(*start, &reference).add(&obs, goodq);
            table.add_coverage(*start, 1);
            n += 1;
            *start += 1;
            m -= 1;
            *p += 1;
        }
        if n < seq_len {
            let mut q = 0.0;
            let mut qn = 0;
            let mut low = 0;
            for si in 0..m {
                if ctx.base(n + si) == b'N' {
                    break;
                }
                let tq = ctx.qual(n + si);
                if tq <= 12.0 {
                    low += 1;
                }
                if low > 1 {
                    break;
                }
                q += tq;
                qn += 1;
            }
            let buffer = self.config.soft_clip_buffer;
            if qn >= 1
                && qn > low
                && *start >= self.region.start - buffer
                && *start <= self.region.end + buffer
            {
                let clip = table.soft_clips_3.entry(*start).or_default();
                for si in 0..qn {
                    let obs = ctx.observation((qn - si) as i64, ctx.qual(n + si), ctx.mismatches);
                    clip.add_base(si, ctx.base(n + si), &obs, goodq);
                }
                clip.add_read(&ctx.observation(m as i64, q / qn as f64, ctx.mismatches), goodq);
            }
        }
        n + m
    }
}
