//! Malformed inputs are rejected with errors rather than panics.

use std::process::Command;
use std::sync::Arc;

use vardict_lib::alignment::source::MemorySource;
use vardict_lib::config::CallerConfig;
use vardict_lib::errors::VardictError;
use vardict_lib::pipeline::{Orchestrator, Rows};
use vardict_lib::reference::ReferenceReader;
use vardict_lib::region::{Region, RegionPlan, parse_region, read_bed};

use crate::helpers::{REF1, read, write_bed};

#[test]
fn test_bad_region_text() {
    for text in ["chr1", ":1-10", "chr1:a-10", "chr1:1-b:G"] {
        let err = parse_region(text, 0, false).expect_err(text);
        assert!(matches!(err, VardictError::InvalidRegion { .. }), "{text}: {err}");
    }
}

#[test]
fn test_bad_bed_coordinate() {
    let bed = write_bed(&["chr1\t100\tabc\tGENE"]);
    let err = read_bed(bed.path(), 0, None, None).expect_err("Non-numeric end must fail");
    assert!(err.to_string().contains("Invalid region"), "{err}");
}

#[test]
fn test_missing_bed_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    assert!(read_bed(dir.path().join("absent.bed"), 0, None, None).is_err());
}

#[test]
fn test_invalid_config_values() {
    let config = CallerConfig { freq: 1.5, ..CallerConfig::default() };
    assert!(config.validate().is_err());

    let config = CallerConfig { threads: 0, ..CallerConfig::default() };
    assert!(config.validate().is_err());

    assert!(CallerConfig::default().validate().is_ok());
}

#[test]
fn test_missing_contig() {
    let reference = ReferenceReader::from_sequences([("chr1", std::str::from_utf8(REF1).unwrap_or_default())]);
    let err = reference.window(&Region::new("chr9", 1, 10, "G"), 0).expect_err("Unknown contig must fail");
    assert!(err.to_string().contains("chr9"), "{err}");

    let reads = vec![read("r1", "chr9", 1, "10M", &REF1[..10], 0)];
    let orchestrator = Orchestrator::new(
        Arc::new(CallerConfig::default()),
        Arc::new(reference),
        Arc::new(MemorySource::new(reads)),
        None,
    );
    let plan = RegionPlan::single(parse_region("chr9:1-10", 0, false).expect("Failed to parse region"));
    let mut outputs = Vec::new();
    let rows = orchestrator
        .run(orchestrator.tasks(&plan), |output| {
            outputs.push(output);
            Ok(())
        })
        .expect("A failing region does not stop the run");
    assert_eq!(rows, 0);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].rows, Rows::Single(Vec::new()));
}

#[test]
fn test_binary_rejects_missing_reference() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let output = Command::new(env!("CARGO_BIN_EXE_vardict"))
        .args(["call", "-b"])
        .arg(dir.path().join("sample.bam"))
        .arg("-G")
        .arg(dir.path().join("missing.fa"))
        .args(["-R", "chr1:1-100"])
        .output()
        .expect("Failed to run vardict");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing.fa"), "{stderr}");
}

#[test]
fn test_binary_rejects_bad_thread_count() {
    let output = Command::new(env!("CARGO_BIN_EXE_vardict"))
        .args(["call", "-b", "sample.bam", "-G", "ref.fa", "--threads", "abc"])
        .output()
        .expect("Failed to run vardict");
    assert!(!output.status.success());
}
