//! Region plans run through the worker pool and written as report rows.

use std::sync::Arc;

use vardict_lib::alignment::AlignmentRecord;
use vardict_lib::alignment::source::{MemorySource, SourceProvider};
use vardict_lib::config::CallerConfig;
use vardict_lib::pipeline::{Orchestrator, Task};
use vardict_lib::reference::ReferenceReader;
use vardict_lib::region::{RegionPlan, parse_region, read_bed};
use vardict_lib::report::{ReportMode, ReportWriter};

use crate::helpers::{REF1, REF2, read, write_bed, write_fasta};

/// Five reference reads plus five reads carrying `variant_cigar`/`variant_seq`, all starting at 11.
fn reads_with_event(chrom: &str, contig: &[u8], variant_cigar: &str, variant_seq: &[u8]) -> Vec<AlignmentRecord> {
    let mut reads = Vec::new();
    for i in 0..5 {
        reads.push(read(&format!("{chrom}-ref{i}"), chrom, 11, "30M", &contig[10..40], 0));
        reads.push(read(&format!("{chrom}-alt{i}"), chrom, 11, variant_cigar, variant_seq, 0));
    }
    reads
}

/// Ten reads over chr1:11-40, the first `alt` of which carry T at position 25.
fn snv_reads(prefix: &str, alt: usize) -> Vec<AlignmentRecord> {
    (0..10)
        .map(|i| {
            let mut seq = REF1[10..40].to_vec();
            let mismatches = if i < alt {
                seq[14] = b'T';
                1
            } else {
                0
            };
            read(&format!("{prefix}{i}"), "chr1", 11, "30M", &seq, mismatches)
        })
        .collect()
}

fn run(
    config: CallerConfig,
    reference: ReferenceReader,
    first: MemorySource,
    second: Option<MemorySource>,
    plan: &RegionPlan,
    mode: ReportMode,
) -> (Vec<Task>, Vec<Vec<String>>) {
    let second = second.map(|s| Arc::new(s) as Arc<dyn SourceProvider>);
    let orchestrator = Orchestrator::new(Arc::new(config), Arc::new(reference), Arc::new(first), second);
    let tasks = orchestrator.tasks(plan);

    let mut writer = ReportWriter::new(Vec::new(), "S1", false);
    writer.write_header(mode).expect("Failed to write header");
    orchestrator.run(tasks.clone(), |output| writer.write(&output)).expect("Failed to run tasks");
    let bytes = writer.into_inner().expect("Failed to flush report");

    let text = String::from_utf8(bytes).expect("Report is not UTF-8");
    let rows = text.lines().map(|line| line.split('\t').map(String::from).collect()).collect();
    (tasks, rows)
}

#[test]
fn test_bed_regions_call_deletion_and_insertion() {
    let fasta = write_fasta(&[("chr1", REF1), ("chr2", REF2)]);
    let bed = write_bed(&["chr1\t0\t60\tGENE1", "chr2\t0\t60\tGENE2"]);
    let config = CallerConfig { threads: 2, ..CallerConfig::default() };
    let plan = read_bed(bed.path(), config.extension, None, None).expect("Failed to read BED");
    assert!(plan.amplicon.is_none());
    assert_eq!(plan.region_count(), 2);

    let deletion_seq = [&REF1[10..25], &REF1[28..43]].concat();
    let insertion_seq = [&REF2[10..25], b"GGG".as_slice(), &REF2[25..40]].concat();
    let mut reads = reads_with_event("chr1", REF1, "15M3D15M", &deletion_seq);
    reads.extend(reads_with_event("chr2", REF2, "15M3I15M", &insertion_seq));

    let reference = ReferenceReader::new(fasta.path()).expect("Failed to load FASTA");
    let (tasks, rows) = run(config, reference, MemorySource::new(reads), None, &plan, ReportMode::Single);
    assert_eq!(tasks.len(), 2);

    let header = &rows[0];
    assert_eq!(header.len(), 34);
    let body = &rows[1..];
    assert_eq!(body.len(), 2, "Expected one call per region: {body:?}");

    let deletion = &body[0];
    assert_eq!(deletion.len(), 34);
    assert_eq!(&deletion[..3], ["S1", "GENE1", "chr1"]);
    assert_eq!(deletion[3], "25");
    assert_eq!(deletion[4], "28");
    assert_eq!(deletion[5], "CATG");
    assert_eq!(deletion[6], "C");
    assert_eq!(deletion[8], "5", "Alt depth");
    assert_eq!(deletion[32], "chr1:1-60");
    assert_eq!(deletion[33], "Deletion");

    let insertion = &body[1];
    assert_eq!(&insertion[1..3], ["GENE2", "chr2"]);
    assert_eq!(insertion[3], "25");
    assert_eq!(insertion[4], "25");
    assert_eq!(insertion[5], "A");
    assert_eq!(insertion[6], "AGGG");
    assert_eq!(insertion[33], "Insertion");
}

#[test]
fn test_pileup_reports_reference_positions() {
    let config = CallerConfig { pileup: true, ..CallerConfig::default() };
    let region = parse_region("chr1:20-24:G", 0, false).expect("Failed to parse region");
    let reference = ReferenceReader::from_sequences([("chr1", std::str::from_utf8(REF1).unwrap_or_default())]);

    let (_, rows) = run(
        config,
        reference,
        MemorySource::new(snv_reads("r", 4)),
        None,
        &RegionPlan::single(region),
        ReportMode::Single,
    );
    let body = &rows[1..];
    assert_eq!(body.len(), 5);
    for (row, position) in body.iter().zip(20..) {
        assert_eq!(row[3], position.to_string());
        assert_eq!(row[5], char::from(REF1[position as usize - 1]).to_string());
        assert_eq!(row[33], "", "Reference rows carry no variant type");
    }
}

#[test]
fn test_paired_samples_share_rows() {
    let config = CallerConfig::default();
    let region = parse_region("chr1:1-60", 0, false).expect("Failed to parse region");
    let reference = ReferenceReader::from_sequences([("chr1", std::str::from_utf8(REF1).unwrap_or_default())]);

    let (tasks, rows) = run(
        config,
        reference,
        MemorySource::new(snv_reads("t", 4)),
        Some(MemorySource::new(snv_reads("n", 0))),
        &RegionPlan::single(region),
        ReportMode::Paired,
    );
    assert!(matches!(tasks[0], Task::Paired(_)));

    let header = &rows[0];
    assert_eq!(header.len(), 50);
    let body = &rows[1..];
    assert_eq!(body.len(), 1);
    let row = &body[0];
    assert_eq!(row.len(), 50);
    assert_eq!(&row[3..7], ["25", "25", "C", "T"]);
    assert_eq!(row[7], "10", "First sample total depth");
    assert_eq!(row[8], "4", "First sample alt depth");
    assert_eq!(row[25], "10", "Second sample total depth");
    assert_eq!(row[26], "0", "Second sample alt depth");
    assert_eq!(row[49], "SNV");
}

#[test]
fn test_amplicon_bed_reports_agreeing_amplicons() {
    let bed = write_bed(&["chr1\t10\t40\tAMP1\t.\t.\t15\t35", "chr1\t20\t50\tAMP2\t.\t.\t25\t45"]);
    let plan = read_bed(bed.path(), 0, None, None).expect("Failed to read BED");
    let params = plan.amplicon.expect("Eight-column rows switch to amplicon mode");
    assert_eq!(plan.groups.len(), 1);

    let mut reads = Vec::new();
    for (start, offset) in [(11_i64, 10_usize), (21, 20)] {
        for i in 0..10 {
            let mut seq = REF1[offset..offset + 30].to_vec();
            let mismatches = if i < 4 {
                seq[29 - offset] = b'C';
                1
            } else {
                0
            };
            reads.push(read(&format!("amp{start}-{i}"), "chr1", start, "30M", &seq, mismatches));
        }
    }

    let config = CallerConfig { amplicon: Some(params), ..CallerConfig::default() };
    let reference = ReferenceReader::from_sequences([("chr1", std::str::from_utf8(REF1).unwrap_or_default())]);
    let (tasks, rows) = run(config, reference, MemorySource::new(reads), None, &plan, ReportMode::Amplicon);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].label_region().map(|r| r.gene.as_str()), Some("AMP2"));

    assert_eq!(rows[0].len(), 38);
    let body = &rows[1..];
    assert_eq!(body.len(), 1, "Expected a single call at 30: {body:?}");
    let row = &body[0];
    assert_eq!(row.len(), 38);
    assert_eq!(&row[3..7], ["30", "30", "A", "C"]);
    assert_eq!(row[32], "chr1:11-40");
    assert_eq!(row[33], "SNV");
    assert_eq!(&row[34..38], ["2", "2", "0", "0"]);
}
