//! Synthetic reads over small reference contigs.

use noodles::sam::alignment::record::Flags;
use vardict_lib::alignment::{AlignmentRecord, indel_length, parse_cigar_string};

/// 60 bases without homopolymers longer than two.
pub const REF1: &[u8] = b"ACGTTGCAAGCTTACGGATCCTAGCATGCAAGTCGACTGATCGGTACCATGGAATTCGCA";

/// A second contig of 60 bases.
pub const REF2: &[u8] = b"GCTAAAGACAATTACATAACATACACGTCAGCACGAAACTTGTTGGCCCAGTGTGAATCG";

/// A mapped forward read with quality 30 bases. NM is `mismatches` plus the indel bases of the
/// CIGAR.
pub fn read(name: &str, chrom: &str, position: i64, cigar: &str, seq: &[u8], mismatches: i32) -> AlignmentRecord {
    let ops = parse_cigar_string(cigar);
    AlignmentRecord {
        name: name.to_string(),
        flags: Flags::empty(),
        chrom: chrom.to_string(),
        position,
        mapping_quality: 60,
        edit_distance: Some(mismatches + i32::try_from(indel_length(&ops)).unwrap_or(0)),
        cigar: ops,
        sequence: seq.to_vec(),
        qualities: vec![30; seq.len()],
        mate_chrom: None,
        mate_position: 0,
        template_length: 0,
        has_supplementary_alignments: false,
    }
}
