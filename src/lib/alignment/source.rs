//! Where aligned reads come from.
//!
//! The walker and the passing-read check only need "every read overlapping this interval", so
//! both go through [`AlignmentSource`]. [`BamSource`] answers from indexed BAM files; a
//! [`MemorySource`] answers from records held in memory.
//!
//! Indexed readers are not shareable between threads, so region tasks open their own source
//! through a [`SourceProvider`].

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;
use noodles::bam;
use noodles::bgzf;
use noodles::core::{Position, Region};
use noodles::sam;
use noodles::sam::alignment::RecordBuf;

use super::AlignmentRecord;

/// Answers interval queries over aligned reads.
pub trait AlignmentSource {
    /// Reads overlapping `chrom:start-end` (1-based, inclusive), file by file in coordinate
    /// order.
    fn fetch(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<AlignmentRecord>>;
}

/// Opens a fresh [`AlignmentSource`] for one worker.
pub trait SourceProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn AlignmentSource>>;
}

type IndexedBam = bam::io::IndexedReader<bgzf::io::Reader<File>>;

/// One or more indexed BAM files queried together.
pub struct BamSource {
    readers: Vec<(PathBuf, IndexedBam, sam::Header)>,
}

impl BamSource {
    /// Opens every file with its index.
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let mut reader = bam::io::indexed_reader::Builder::default()
                .build_from_path(path)
                .with_context(|| format!("Failed to open indexed BAM: {}", path.display()))?;
            let header = reader.read_header()?;
            readers.push((path.to_path_buf(), reader, header));
        }
        Ok(Self { readers })
    }
}

impl AlignmentSource for BamSource {
    fn fetch(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<AlignmentRecord>> {
        let start = Position::try_from(usize::try_from(start.max(1))?)?;
        let end = Position::try_from(usize::try_from(end.max(1))?)?;
        let region = Region::new(chrom, start..=end);

        let mut out = Vec::new();
        for (path, reader, header) in &mut self.readers {
            if header.reference_sequences().get(chrom.as_bytes()).is_none() {
                debug!("{chrom} not present in {}", path.display());
                continue;
            }
            let query = reader
                .query(header, &region)
                .with_context(|| format!("Failed to query {region} in {}", path.display()))?;
            for result in query {
                let record = result?;
                let record = RecordBuf::try_from_alignment_record(header, &record)?;
                out.push(AlignmentRecord::from_record_buf(header, &record)?);
            }
        }
        Ok(out)
    }
}

/// Paths of indexed BAM files, opened anew for every worker.
#[derive(Debug, Clone)]
pub struct BamFiles(pub Vec<PathBuf>);

impl SourceProvider for BamFiles {
    fn open(&self) -> Result<Box<dyn AlignmentSource>> {
        Ok(Box::new(BamSource::open(&self.0)?))
    }
}

/// Records held in memory, sorted by contig then position.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Arc<Vec<AlignmentRecord>>,
}

impl MemorySource {
    #[must_use]
    pub fn new(mut records: Vec<AlignmentRecord>) -> Self {
        records.sort_by(|a, b| a.chrom.cmp(&b.chrom).then(a.position.cmp(&b.position)));
        Self { records: Arc::new(records) }
    }
}

impl AlignmentSource for MemorySource {
    fn fetch(&mut self, chrom: &str, start: i64, end: i64) -> Result<Vec<AlignmentRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                let span = super::aligned_length(&r.cigar).max(1);
                r.chrom == chrom && r.position <= end && r.position + span - 1 >= start
            })
            .cloned()
            .collect())
    }
}

impl SourceProvider for MemorySource {
    fn open(&self) -> Result<Box<dyn AlignmentSource>> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::parse_cigar_string;
    use noodles::sam::alignment::record::Flags;

    fn record(chrom: &str, position: i64, cigar: &str) -> AlignmentRecord {
        AlignmentRecord {
            name: format!("r{position}"),
            flags: Flags::empty(),
            chrom: chrom.to_string(),
            position,
            mapping_quality: 60,
            cigar: parse_cigar_string(cigar),
            sequence: vec![b'A'; 10],
            qualities: vec![30; 10],
            mate_chrom: None,
            mate_position: 0,
            template_length: 0,
            edit_distance: Some(0),
            has_supplementary_alignments: false,
        }
    }

    #[test]
    fn test_memory_source_overlap() -> Result<()> {
        let mut source = MemorySource::new(vec![
            record("chr1", 150, "10M"),
            record("chr1", 100, "10M"),
            record("chr2", 100, "10M"),
            record("chr1", 95, "2M3D5M"),
        ]);
        let hits = source.fetch("chr1", 100, 105)?;
        let positions: Vec<i64> = hits.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![95, 100]);
        assert!(source.fetch("chr3", 1, 1000)?.is_empty());

        let mut opened = source.open()?;
        assert_eq!(opened.fetch("chr1", 155, 200)?.len(), 1);
        Ok(())
    }

    /// Writes coordinate-sorted reads on chr1 to `sample.bam` with its `.bai`.
    fn write_indexed_bam(dir: &Path, reads: &[(&str, usize, &str)]) -> PathBuf {
        use noodles::sam::alignment::io::Write as _;
        use noodles::sam::alignment::record::MappingQuality;
        use noodles::sam::alignment::record::cigar::Op;
        use noodles::sam::alignment::record::data::field::Tag;
        use noodles::sam::alignment::record_buf::data::field::Value;
        use noodles::sam::alignment::record_buf::{Cigar, Data, QualityScores, Sequence};

        let header: sam::Header = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:1000\n".parse().unwrap();
        let path = dir.join("sample.bam");
        let mut writer = bam::io::Writer::new(File::create(&path).unwrap());
        writer.write_header(&header).unwrap();
        for &(name, start, cigar) in reads {
            let ops: Vec<Op> = parse_cigar_string(cigar).into_iter().map(|(kind, len)| Op::new(kind, len)).collect();
            let len = crate::alignment::read_span_length(&parse_cigar_string(cigar)) as usize;
            let data: Data = [(Tag::EDIT_DISTANCE, Value::from(1_i32))].into_iter().collect();
            let record = RecordBuf::builder()
                .set_name(name)
                .set_flags(Flags::empty())
                .set_reference_sequence_id(0)
                .set_alignment_start(Position::try_from(start).unwrap())
                .set_mapping_quality(MappingQuality::new(60).unwrap())
                .set_cigar(Cigar::from(ops))
                .set_sequence(Sequence::from(vec![b'a'; len]))
                .set_quality_scores(QualityScores::from(vec![30; len]))
                .set_data(data)
                .build();
            writer.write_alignment_record(&header, &record).unwrap();
        }
        drop(writer);

        let index = bam::fs::index(&path).unwrap();
        bam::bai::fs::write(dir.join("sample.bam.bai"), &index).unwrap();
        path
    }

    #[test]
    fn test_bam_source_queries_index() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_indexed_bam(
            dir.path(),
            &[("a", 100, "10M"), ("b", 150, "5S10M"), ("c", 400, "4M2D6M"), ("d", 800, "10M")],
        );
        let mut source = BamSource::open(&[&path])?;

        let hits = source.fetch("chr1", 105, 405)?;
        let names: Vec<&str> = hits.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(hits[1].sequence, b"AAAAAAAAAAAAAAA");
        assert_eq!(hits[2].edit_distance, Some(1));
        assert_eq!(hits[2].aligned_length(), 12);
        assert_eq!(hits[0].chrom, "chr1");

        assert!(source.fetch("chr1", 500, 700)?.is_empty());
        assert!(source.fetch("chrX", 1, 1000)?.is_empty());
        Ok(())
    }
}
