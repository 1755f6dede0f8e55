//! Reference genome FASTA reading with all sequences loaded into memory.
//!
//! Every region task needs random access to a few kilobases around its target, and many tasks run
//! at once, so the whole reference is loaded at startup and shared behind an `Arc`. Bases are
//! uppercased on load.
//!
//! A [`ReferenceWindow`] is the per-region view: the span around the region that candidate
//! generation and realignment may consult. Lookups outside the window return `None`.

use crate::errors::VardictError;
use crate::region::Region;
use anyhow::{Context, Result};
use log::debug;
use noodles::fasta::fai;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read a sequence from a FASTA file using FAI index metadata.
///
/// Reads the entire sequence bytes in one call, then strips newlines in memory.
fn read_sequence_raw(file: &mut File, record: &fai::Record) -> Result<Vec<u8>> {
    let line_bases = record.line_bases() as usize;
    let line_width = record.line_width() as usize;
    let seq_len = record.length() as usize;
    let offset = record.offset();

    if seq_len <= line_bases {
        file.seek(SeekFrom::Start(offset))?;
        let mut sequence = vec![0u8; seq_len];
        file.read_exact(&mut sequence)?;
        sequence.make_ascii_uppercase();
        return Ok(sequence);
    }

    let complete_lines = seq_len / line_bases;
    let remaining_bases = seq_len % line_bases;
    let total_bytes = if remaining_bases > 0 {
        complete_lines * line_width + remaining_bases
    } else {
        (complete_lines - 1) * line_width + line_bases
    };

    file.seek(SeekFrom::Start(offset))?;
    let mut raw_bytes = vec![0u8; total_bytes];
    file.read_exact(&mut raw_bytes)?;

    let mut sequence = Vec::with_capacity(seq_len);
    let terminator_len = line_width - line_bases;
    let mut pos = 0;
    while sequence.len() < seq_len && pos < raw_bytes.len() {
        let bases_to_copy = (seq_len - sequence.len()).min(line_bases).min(raw_bytes.len() - pos);
        sequence.extend_from_slice(&raw_bytes[pos..pos + bases_to_copy]);
        pos += bases_to_copy;
        if sequence.len() < seq_len && pos < raw_bytes.len() {
            pos += terminator_len;
        }
    }

    sequence.make_ascii_uppercase();
    Ok(sequence)
}

/// Find FAI index path for a FASTA file.
fn find_fai_path(fasta_path: &Path) -> Option<PathBuf> {
    let fai_path = fasta_path.with_extension("fa.fai");
    if fai_path.exists() {
        return Some(fai_path);
    }
    let fai_path = PathBuf::from(format!("{}.fai", fasta_path.display()));
    if fai_path.exists() {
        return Some(fai_path);
    }
    None
}

/// A thread-safe reference genome with all sequences preloaded and uppercased.
#[derive(Clone, Default)]
pub struct ReferenceReader {
    sequences: Arc<HashMap<String, Arc<[u8]>>>,
}

impl ReferenceReader {
    /// Loads every sequence of a FASTA file.
    ///
    /// Uses the `.fai` index for raw-byte reading when one exists next to the file.
    ///
    /// # Examples
    /// ```no_run
    /// use vardict_lib::reference::ReferenceReader;
    ///
    /// let reader = ReferenceReader::new("reference.fasta")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VardictError::InvalidFileFormat {
                file_type: "Reference FASTA".to_string(),
                path: path.display().to_string(),
                reason: "File does not exist".to_string(),
            }
            .into());
        }

        debug!("Reading reference FASTA into memory: {}", path.display());
        if let Some(fai_path) = find_fai_path(path) {
            debug!("Using FAI index for fast loading: {}", fai_path.display());
            return Self::new_with_fai(path, &fai_path);
        }
        debug!("No FAI index found, using sequential reading");
        Self::new_sequential(path)
    }

    fn new_with_fai(fasta_path: &Path, fai_path: &Path) -> Result<Self> {
        let index = fai::fs::read(fai_path)
            .with_context(|| format!("Failed to read FAI index: {}", fai_path.display()))?;
        let records: &[fai::Record] = index.as_ref();
        let mut file = File::open(fasta_path)
            .with_context(|| format!("Failed to open FASTA: {}", fasta_path.display()))?;

        let mut sequences = HashMap::with_capacity(records.len());
        for record in records {
            let sequence = read_sequence_raw(&mut file, record)?;
            let name = String::from_utf8_lossy(record.name().as_ref()).into_owned();
            sequences.insert(name, Arc::from(sequence));
        }

        debug!("Loaded {} contigs into memory (FAI-indexed)", sequences.len());
        Ok(Self { sequences: Arc::new(sequences) })
    }

    fn new_sequential(path: &Path) -> Result<Self> {
        use noodles::fasta;

        let mut sequences = HashMap::new();
        let mut reader = fasta::io::reader::Builder.build_from_path(path)?;
        for result in reader.records() {
            let record = result?;
            let name = std::str::from_utf8(record.name())?.to_string();
            let mut sequence = record.sequence().as_ref().to_vec();
            sequence.make_ascii_uppercase();
            sequences.insert(name, Arc::from(sequence));
        }

        debug!("Loaded {} contigs into memory (sequential)", sequences.len());
        Ok(Self { sequences: Arc::new(sequences) })
    }

    /// Builds a reader from in-memory sequences.
    #[must_use]
    pub fn from_sequences<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let sequences = sequences
            .into_iter()
            .map(|(name, seq)| {
                (name.as_ref().to_string(), Arc::from(seq.as_ref().to_ascii_uppercase().into_bytes()))
            })
            .collect();
        Self { sequences: Arc::new(sequences) }
    }

    /// Length of a contig.
    pub fn chrom_len(&self, chrom: &str) -> Result<i64> {
        self.sequences
            .get(chrom)
            .map(|s| s.len() as i64)
            .ok_or_else(|| VardictError::ReferenceNotFound { ref_name: chrom.to_string() }.into())
    }

    /// Retrieves `start..=end` (1-based) from a contig.
    ///
    /// ```no_run
    /// use vardict_lib::reference::ReferenceReader;
    ///
    /// let reader = ReferenceReader::new("reference.fasta")?;
    /// let seq = reader.fetch("chr1", 1, 100)?;
    /// assert_eq!(seq.len(), 100);
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn fetch(&self, chrom: &str, start: i64, end: i64) -> Result<Vec<u8>> {
        let sequence = self
            .sequences
            .get(chrom)
            .ok_or_else(|| VardictError::ReferenceNotFound { ref_name: chrom.to_string() })?;
        if start < 1 || end < start || end > sequence.len() as i64 {
            return Err(VardictError::InvalidParameter {
                parameter: "region".to_string(),
                reason: format!(
                    "Requested region {chrom}:{start}-{end} exceeds sequence length {}",
                    sequence.len()
                ),
            }
            .into());
        }
        Ok(sequence[(start - 1) as usize..end as usize].to_vec())
    }

    /// Opens the window needed to call `region`: the region widened by `extension` plus a fixed
    /// padding on each side, clamped to the contig.
    pub fn window(&self, region: &Region, extension: i64) -> Result<ReferenceWindow> {
        let sequence = self
            .sequences
            .get(&region.chrom)
            .ok_or_else(|| VardictError::ReferenceNotFound { ref_name: region.chrom.clone() })?;
        let (start, end) = region.reference_span(extension);
        let end = end.min(sequence.len() as i64);
        Ok(ReferenceWindow { sequence: Arc::clone(sequence), start, end })
    }
}

/// A bounded view over one contig.
#[derive(Debug, Clone)]
pub struct ReferenceWindow {
    sequence: Arc<[u8]>,
    start: i64,
    end: i64,
}

impl ReferenceWindow {
    /// Builds a window over a whole in-memory contig.
    #[must_use]
    pub fn from_bases(bases: &[u8]) -> Self {
        let sequence: Arc<[u8]> = Arc::from(bases.to_ascii_uppercase());
        let end = sequence.len() as i64;
        Self { sequence, start: 1, end }
    }

    #[must_use]
    pub fn start(&self) -> i64 {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Full length of the underlying contig.
    #[must_use]
    pub fn chrom_len(&self) -> i64 {
        self.sequence.len() as i64
    }

    /// Base at a 1-based position, if inside the window.
    #[must_use]
    pub fn get(&self, pos: i64) -> Option<u8> {
        if pos < self.start || pos > self.end {
            return None;
        }
        self.sequence.get((pos - 1) as usize).copied()
    }

    /// True when the window holds `base` at `pos`.
    #[must_use]
    pub fn is_base(&self, pos: i64, base: u8) -> bool {
        self.get(pos) == Some(base)
    }

    /// Bases `from..=to`, skipping positions outside the window.
    #[must_use]
    pub fn fetch(&self, from: i64, to: i64) -> Vec<u8> {
        let from = from.max(self.start);
        let to = to.min(self.end);
        if from > to {
            return Vec::new();
        }
        self.sequence[(from - 1) as usize..to as usize].to_vec()
    }

    /// Grows the window to cover `from..=to`, clamped to the contig.
    pub fn widen(&mut self, from: i64, to: i64) {
        self.start = self.start.min(from.max(1));
        self.end = self.end.max(to.min(self.chrom_len()));
    }
}
