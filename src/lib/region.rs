//! Target regions: `chr:start-end[:gene]` strings and BED files.
//!
//! Coordinates are 1-based and inclusive once parsed. BED files are zero-based by default and are
//! shifted on read. Amplicon BED files (eight columns with the insert span in columns seven and
//! eight) switch the run into amplicon mode and are grouped into clusters of overlapping inserts.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use crate::config::AmpliconParams;
use crate::errors::VardictError;

/// Extra reference fetched on each side of a region beyond the configured extension.
pub const REFERENCE_PADDING: i64 = 700;

/// One target region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    pub gene: String,
    /// Amplicon insert start (primer-trimmed); equals `start` outside amplicon mode.
    pub insert_start: i64,
    /// Amplicon insert end; equals `end` outside amplicon mode.
    pub insert_end: i64,
}

impl Region {
    #[must_use]
    pub fn new(chrom: impl Into<String>, start: i64, end: i64, gene: impl Into<String>) -> Self {
        Self { chrom: chrom.into(), start, end, gene: gene.into(), insert_start: start, insert_end: end }
    }

    #[must_use]
    pub fn with_insert(mut self, insert_start: i64, insert_end: i64) -> Self {
        self.insert_start = insert_start;
        self.insert_end = insert_end;
        self
    }

    #[must_use]
    pub fn contains(&self, pos: i64) -> bool {
        pos >= self.start && pos <= self.end
    }

    /// Reference span needed to process this region, before clamping to the contig.
    #[must_use]
    pub fn reference_span(&self, extension: i64) -> (i64, i64) {
        ((self.start - extension - REFERENCE_PADDING).max(1), self.end + extension + REFERENCE_PADDING)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

fn parse_coordinate(text: &str, whole: &str) -> crate::errors::Result<i64> {
    text.replace(',', "").trim().parse::<i64>().map_err(|_| VardictError::InvalidRegion {
        region: whole.to_string(),
        reason: format!("'{text}' is not a valid coordinate"),
    })
}

/// Parses `chr:start[-end][:gene]`, extending both sides by `extension`.
///
/// # Examples
/// ```
/// use vardict_lib::region::parse_region;
///
/// let region = parse_region("chr7:55,242,400-55,242,500:EGFR", 0, false).unwrap();
/// assert_eq!((region.start, region.end), (55_242_400, 55_242_500));
/// assert_eq!(region.gene, "EGFR");
/// ```
pub fn parse_region(text: &str, extension: i64, zero_based: bool) -> crate::errors::Result<Region> {
    let mut parts = text.split(':');
    let chrom = parts.next().filter(|c| !c.is_empty()).ok_or_else(|| VardictError::InvalidRegion {
        region: text.to_string(),
        reason: "missing chromosome".to_string(),
    })?;
    let range = parts.next().ok_or_else(|| VardictError::InvalidRegion {
        region: text.to_string(),
        reason: "expected chr:start-end".to_string(),
    })?;
    let gene = parts.next().unwrap_or(chrom);

    let (start, end) = match range.split_once('-') {
        Some((s, e)) => (parse_coordinate(s, text)?, parse_coordinate(e, text)?),
        None => {
            let s = parse_coordinate(range, text)?;
            (s, s)
        }
    };
    let mut start = start - extension;
    let end = end + extension;
    if zero_based && start < end {
        start += 1;
    }
    Ok(Region::new(chrom, start.min(end), end, gene))
}

/// Regions loaded for a run, grouped for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPlan {
    /// Present when the BED file (or configuration) selects amplicon mode.
    pub amplicon: Option<AmpliconParams>,
    /// Each group is one amplicon cluster, or the exons of one BED row.
    pub groups: Vec<Vec<Region>>,
}

impl RegionPlan {
    #[must_use]
    pub fn single(region: Region) -> Self {
        Self { amplicon: None, groups: vec![vec![region]] }
    }

    #[must_use]
    pub fn region_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}

fn is_header_line(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("browser") || line.starts_with("track")
}

fn looks_like_amplicon_row(fields: &[&str]) -> bool {
    if fields.len() != 8 {
        return false;
    }
    let nums: Option<Vec<i64>> =
        [1, 2, 6, 7].iter().map(|&i| fields[i].trim().parse::<i64>().ok()).collect();
    matches!(nums.as_deref(), Some([a1, a2, a6, a7]) if a6 >= a1 && a7 <= a2)
}

fn field<'a>(fields: &[&'a str], idx: usize, line: &str) -> crate::errors::Result<&'a str> {
    fields.get(idx).copied().ok_or_else(|| VardictError::InvalidRegion {
        region: line.to_string(),
        reason: format!("missing column {}", idx + 1),
    })
}

/// Reads a BED file into a [`RegionPlan`].
///
/// Plain rows use `chrom start end [gene]`. Rows in refGene layout (13+ columns) are expanded into
/// their exons clipped to the coding span. Eight-column amplicon rows enable amplicon mode with the
/// default `10:0.95` parameters unless `amplicon` is already set.
pub fn read_bed<P: AsRef<Path>>(
    path: P,
    extension: i64,
    zero_based: Option<bool>,
    amplicon: Option<AmpliconParams>,
) -> Result<RegionPlan> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open BED: {}", path.display()))?;

    let mut amplicon = amplicon;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim_end();
        if is_header_line(line) {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if amplicon.is_none() && looks_like_amplicon_row(&fields) {
            amplicon = Some(AmpliconParams::default());
        }
        rows.push(line.to_string());
    }

    let groups = if amplicon.is_some() {
        amplicon_groups(&rows, zero_based.unwrap_or(true))?
    } else {
        target_groups(&rows, extension, zero_based)?
    };
    debug!("Read {} BED rows into {} region groups from {}", rows.len(), groups.len(), path.display());
    Ok(RegionPlan { amplicon, groups })
}

fn target_groups(rows: &[String], extension: i64, zero_based: Option<bool>) -> Result<Vec<Vec<Region>>> {
    let mut groups = Vec::with_capacity(rows.len());
    for line in rows {
        let fields: Vec<&str> = line.split('\t').collect();
        let simple = match (fields.get(1), fields.get(2)) {
            (Some(a), Some(b)) => match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
                (Ok(a1), Ok(a2)) => a1 <= a2 && fields.len() < 13,
                _ => false,
            },
            _ => false,
        };

        if simple {
            let zb = zero_based.unwrap_or(true);
            let chrom = fields[0];
            let mut start = parse_coordinate(fields[1], line)? - extension;
            let end = parse_coordinate(fields[2], line)? + extension;
            if zb && start < end {
                start += 1;
            }
            let gene = fields.get(3).copied().unwrap_or(chrom);
            groups.push(vec![Region::new(chrom, start, end, gene)]);
            continue;
        }

        // refGene layout: chrom=2 cdsStart=6 cdsEnd=7 exonStarts=9 exonEnds=10 gene=12
        let zb = zero_based.unwrap_or(false);
        let chrom = field(&fields, 2, line)?;
        let cds_start = parse_coordinate(field(&fields, 6, line)?, line)?;
        let cds_end = parse_coordinate(field(&fields, 7, line)?, line)?;
        let gene = fields.get(12).copied().unwrap_or(chrom);
        let starts = field(&fields, 9, line)?.split(',').filter(|s| !s.is_empty());
        let ends = field(&fields, 10, line)?.split(',').filter(|s| !s.is_empty());

        let mut exons = Vec::new();
        for (s, e) in starts.zip(ends) {
            let mut s = parse_coordinate(s, line)?;
            let mut e = parse_coordinate(e, line)?;
            if cds_start > e {
                continue;
            }
            if cds_end > e {
                break;
            }
            s = s.max(cds_start) - extension;
            e = e.min(cds_end) + extension;
            if zb && s < e {
                s += 1;
            }
            exons.push(Region::new(chrom, s, e, gene));
        }
        groups.push(exons);
    }
    Ok(groups)
}

fn amplicon_groups(rows: &[String], zero_based: bool) -> Result<Vec<Vec<Region>>> {
    let mut by_chrom: Vec<(String, Vec<Region>)> = Vec::new();
    for line in rows {
        let fields: Vec<&str> = line.split('\t').collect();
        let chrom = field(&fields, 0, line)?;
        let mut start = parse_coordinate(field(&fields, 1, line)?, line)?;
        let end = parse_coordinate(field(&fields, 2, line)?, line)?;
        let gene = field(&fields, 3, line)?;
        let mut insert_start = parse_coordinate(field(&fields, 6, line)?, line)?;
        let insert_end = parse_coordinate(field(&fields, 7, line)?, line)?;
        if zero_based && start < end {
            start += 1;
            insert_start += 1;
        }
        let region = Region::new(chrom, start, end, gene).with_insert(insert_start, insert_end);
        match by_chrom.iter_mut().find(|(c, _)| c == chrom) {
            Some((_, list)) => list.push(region),
            None => by_chrom.push((chrom.to_string(), vec![region])),
        }
    }

    let mut groups: Vec<Vec<Region>> = Vec::new();
    for (_, mut regions) in by_chrom {
        regions.sort_by_key(|r| r.insert_start);
        let mut current: Vec<Region> = Vec::new();
        let mut prev_end = i64::MIN;
        for region in regions {
            if !current.is_empty() && region.insert_start > prev_end {
                groups.push(std::mem::take(&mut current));
            }
            prev_end = region.insert_end;
            current.push(region);
        }
        if !current.is_empty() {
            groups.push(current);
        }
    }
    Ok(groups)
}

/// Derives a sample name from a BAM path: the part before `.sorted*.bam`, else the file name up
/// to the first `_` or `.`.
///
/// ```
/// use vardict_lib::region::sample_name_from_path;
///
/// assert_eq!(sample_name_from_path("/data/tumor.sorted.bam"), "tumor");
/// assert_eq!(sample_name_from_path("normal_L001.bam"), "normal");
/// ```
#[must_use]
pub fn sample_name_from_path(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if let Some(idx) = file_name.find(".sorted") {
        let stem = &file_name[..idx];
        if let Some(name) = stem.rsplit(['.', '_']).next().filter(|s| !s.is_empty()) {
            return name.to_string();
        }
    }
    file_name.split(['_', '.']).next().filter(|s| !s.is_empty()).unwrap_or(file_name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn bed(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[rstest]
    #[case("chr1:100-200", 0, false, ("chr1", 100, 200, "chr1"))]
    #[case("chr1:1,000-2,000:GENE", 0, false, ("chr1", 1000, 2000, "GENE"))]
    #[case("chr2:500", 0, false, ("chr2", 500, 500, "chr2"))]
    #[case("chr1:100-200", 10, false, ("chr1", 90, 210, "chr1"))]
    #[case("chr1:100-200", 0, true, ("chr1", 101, 200, "chr1"))]
    fn test_parse_region(
        #[case] text: &str,
        #[case] extension: i64,
        #[case] zero_based: bool,
        #[case] expected: (&str, i64, i64, &str),
    ) {
        let region = parse_region(text, extension, zero_based).unwrap();
        assert_eq!(region.chrom, expected.0);
        assert_eq!(region.start, expected.1);
        assert_eq!(region.end, expected.2);
        assert_eq!(region.gene, expected.3);
        assert_eq!(region.insert_start, region.start);
    }

    #[rstest]
    #[case("chr1")]
    #[case(":100-200")]
    #[case("chr1:abc-200")]
    fn test_parse_region_invalid(#[case] text: &str) {
        assert!(parse_region(text, 0, false).is_err());
    }

    #[test]
    fn test_region_display_and_span() {
        let region = Region::new("chr3", 800, 900, "G");
        assert_eq!(region.to_string(), "chr3:800-900");
        assert_eq!(region.reference_span(0), (100, 1600));
        assert_eq!(Region::new("chr3", 10, 20, "G").reference_span(5).0, 1);
        assert!(region.contains(800) && region.contains(900) && !region.contains(901));
    }

    #[test]
    fn test_read_simple_bed() {
        let file = bed(&["track name=x", "# comment", "chr1\t99\t200\tGENE1", "chr2\t9\t20"]);
        let plan = read_bed(file.path(), 0, None, None).unwrap();
        assert!(plan.amplicon.is_none());
        assert_eq!(plan.region_count(), 2);
        assert_eq!(plan.groups[0][0], Region::new("chr1", 100, 200, "GENE1"));
        assert_eq!(plan.groups[1][0].gene, "chr2");
    }

    #[test]
    fn test_read_amplicon_bed_groups_overlapping_inserts() {
        let file = bed(&[
            "chr1\t100\t300\tA1\t0\t+\t120\t280",
            "chr1\t250\t450\tA2\t0\t+\t270\t430",
            "chr1\t1000\t1200\tA3\t0\t+\t1020\t1180",
        ]);
        let plan = read_bed(file.path(), 0, None, None).unwrap();
        assert_eq!(plan.amplicon, Some(AmpliconParams::default()));
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].len(), 2);
        assert_eq!(plan.groups[0][0].start, 101);
        assert_eq!(plan.groups[0][0].insert_start, 121);
        assert_eq!(plan.groups[1][0].gene, "A3");
    }

    #[rstest]
    #[case("/data/tumor.sorted.bam", "tumor")]
    #[case("/data/run1.tumor.sorted.dedup.bam", "tumor")]
    #[case("normal_L001.bam", "normal")]
    #[case("sample.bam", "sample")]
    fn test_sample_name_from_path(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(sample_name_from_path(path), expected);
    }
}
