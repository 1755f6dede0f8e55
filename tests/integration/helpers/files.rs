//! Temporary FASTA and BED files.

use std::io::Write;

use tempfile::NamedTempFile;

/// Writes `(name, bases)` contigs to a FASTA file with 60-base lines.
pub fn write_fasta(contigs: &[(&str, &[u8])]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp FASTA");
    for (name, bases) in contigs {
        writeln!(file, ">{name}").expect("Failed to write FASTA header");
        for line in bases.chunks(60) {
            file.write_all(line).expect("Failed to write FASTA bases");
            writeln!(file).expect("Failed to write FASTA newline");
        }
    }
    file.flush().expect("Failed to flush FASTA");
    file
}

/// Writes tab-separated BED rows.
pub fn write_bed(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp BED");
    for row in rows {
        writeln!(file, "{row}").expect("Failed to write BED row");
    }
    file.flush().expect("Failed to flush BED");
    file
}
