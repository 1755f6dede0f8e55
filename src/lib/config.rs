//! Immutable caller configuration shared by every stage of a region task.
//!
//! The command layer builds one [`CallerConfig`] from its flattened CLI option groups and hands it
//! to the pipeline behind an `Arc`; nothing reads configuration from global state.

use crate::errors::{Result, VardictError};
use crate::validation::{validate_fraction, validate_min_value};

/// Parameters of the amplicon read filter: a read's implied insert must end within `distance`
/// bases of the amplicon boundaries and overlap it by more than `overlap_fraction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmpliconParams {
    pub distance: i64,
    pub overlap_fraction: f64,
}

impl Default for AmpliconParams {
    fn default() -> Self {
        Self { distance: 10, overlap_fraction: 0.95 }
    }
}

impl std::str::FromStr for AmpliconParams {
    type Err = VardictError;

    /// Parses `distance:overlap`, e.g. `10:0.95`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| VardictError::InvalidParameter {
            parameter: "amplicon".to_string(),
            reason: format!("{reason}: '{s}'"),
        };
        let (dis, ovlp) = s.split_once(':').ok_or_else(|| invalid("expected DIST:OVERLAP"))?;
        let distance = dis.trim().parse().map_err(|_| invalid("distance is not an integer"))?;
        let overlap_fraction =
            ovlp.trim().parse().map_err(|_| invalid("overlap is not a number"))?;
        Ok(Self { distance, overlap_fraction })
    }
}

/// All thresholds and switches used by the walker, realignment, synthesis and reporting.
#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Minimum allele frequency for a variant to be reported.
    pub freq: f64,
    /// Minimum number of high-quality reads supporting a variant.
    pub min_reads: i32,
    /// Minimum reads per strand for the strand-bias test.
    pub min_bias_reads: i32,
    /// Minimum strand fraction for the strand-bias test.
    pub bias: f64,
    /// Base quality at or above which a base counts as high quality.
    pub good_quality: f64,
    /// Reads with a lower mapping quality are skipped.
    pub min_mapping_quality: Option<u8>,
    /// Minimum mean mapping quality of a variant.
    pub min_mean_mapq: f64,
    /// Maximum mismatches (NM minus indel bases) allowed in a read.
    pub max_mismatches: i32,
    /// Window for folding adjacent events into one complex descriptor.
    pub vext: i32,
    /// Bases added on each side of every region.
    pub extension: i64,
    /// Soft clips anchored within this distance outside the region still feed consensus.
    pub soft_clip_buffer: i64,
    /// Search distance for large indel breakpoints.
    pub indel_size: i64,
    /// Run the realignment passes.
    pub realign: bool,
    /// Report every covered position.
    pub pileup: bool,
    /// Minimum mean read position of a variant.
    pub read_pos_filter: f64,
    /// Minimum high/low quality read ratio.
    pub qratio: f64,
    /// Only use the first N bases of each read (0 = off).
    pub trim_bases_after: i32,
    /// Fraction of reads randomly skipped.
    pub downsampling: Option<f64>,
    /// Seed for downsampling.
    pub seed: Option<u64>,
    pub remove_duplicates: bool,
    /// Report indels at their most 3′ position.
    pub move_indels_to_3: bool,
    /// Skip secondary and duplicate-flagged records.
    pub filter_non_primary: bool,
    /// Enables amplicon mode.
    pub amplicon: Option<AmpliconParams>,
    /// Indels at least this long are reported as structural alleles.
    pub sv_min_length: i32,
    /// Worker threads.
    pub threads: usize,
    /// Attach a candidate trace to each variant.
    pub debug: bool,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            freq: 0.01,
            min_reads: 2,
            min_bias_reads: 2,
            bias: 0.05,
            good_quality: 22.5,
            min_mapping_quality: None,
            min_mean_mapq: 0.0,
            max_mismatches: 8,
            vext: 3,
            extension: 0,
            soft_clip_buffer: 0,
            indel_size: 120,
            realign: true,
            pileup: false,
            read_pos_filter: 5.0,
            qratio: 1.5,
            trim_bases_after: 0,
            downsampling: None,
            seed: None,
            remove_duplicates: false,
            move_indels_to_3: false,
            filter_non_primary: true,
            amplicon: None,
            sv_min_length: 1000,
            threads: 1,
            debug: false,
        }
    }
}

impl CallerConfig {
    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        validate_fraction(self.freq)?;
        validate_fraction(self.bias)?;
        if let Some(fraction) = self.downsampling {
            validate_fraction(fraction)?;
        }
        if let Some(amplicon) = self.amplicon {
            validate_fraction(amplicon.overlap_fraction)?;
            validate_min_value(amplicon.distance, 0, "amplicon distance")?;
        }
        validate_min_value(self.min_reads, 0, "min-reads")?;
        validate_min_value(self.vext, 0, "vext")?;
        validate_min_value(self.extension, 0, "extension")?;
        validate_min_value(self.indel_size, 1, "indel-size")?;
        validate_min_value(self.sv_min_length, 1, "sv-min-length")?;
        validate_min_value(self.threads, 1, "threads")?;
        validate_min_value(self.trim_bases_after, 0, "trim")?;
        Ok(())
    }

    /// True when the amplicon read filter and amplicon reporting are active.
    #[must_use]
    pub fn is_amplicon(&self) -> bool {
        self.amplicon.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        CallerConfig::default().validate().unwrap();
        assert!(!CallerConfig::default().is_amplicon());
    }

    #[rstest]
    #[case("10:0.95", 10, 0.95)]
    #[case("5:0.5", 5, 0.5)]
    fn test_parse_amplicon_params(#[case] text: &str, #[case] dis: i64, #[case] ovlp: f64) {
        let params: AmpliconParams = text.parse().unwrap();
        assert_eq!(params.distance, dis);
        assert!((params.overlap_fraction - ovlp).abs() < 1e-12);
    }

    #[rstest]
    #[case("10")]
    #[case("x:0.9")]
    #[case("10:y")]
    fn test_parse_amplicon_params_invalid(#[case] text: &str) {
        assert!(text.parse::<AmpliconParams>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_frequency() {
        let config = CallerConfig { freq: 1.5, ..CallerConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let config = CallerConfig { threads: 0, ..CallerConfig::default() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("threads"));
    }
}
