//! Option groups for the `call` command.
//!
//! Each group is flattened into the command with `#[command(flatten)]` and writes its values into a
//! [`CallerConfig`].

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Args;

use vardict_lib::config::{AmpliconParams, CallerConfig};
use vardict_lib::region::sample_name_from_path;
use vardict_lib::validation::{validate_bam_indexed, validate_file_exists};

/// Alignment, reference and region inputs.
#[derive(Debug, Clone, Args)]
pub struct InputOptions {
    /// Indexed BAM file(s) of the sample; repeat for several files
    #[arg(short = 'b', long = "bam", required = true, num_args = 1..)]
    pub bams: Vec<PathBuf>,

    /// Indexed BAM file(s) of a second sample, reported side by side with the first
    #[arg(long = "bam2", num_args = 1..)]
    pub second_bams: Vec<PathBuf>,

    /// Indexed reference FASTA
    #[arg(short = 'G', long = "reference")]
    pub reference: PathBuf,

    /// A single region, `chr:start-end[:gene]`; overrides the BED file
    #[arg(short = 'R', long = "region")]
    pub region: Option<String>,

    /// BED file of target regions (plain, refGene or eight-column amplicon rows)
    #[arg(long = "bed")]
    pub bed: Option<PathBuf>,

    /// Treat region coordinates as zero-based (BED default) or one-based
    #[arg(short = 'z', long = "zero-based")]
    pub zero_based: Option<bool>,
}

impl InputOptions {
    /// Checks that every input exists and every BAM is indexed.
    pub fn validate(&self) -> Result<()> {
        validate_file_exists(&self.reference, "Reference FASTA")?;
        for bam in self.bams.iter().chain(&self.second_bams) {
            validate_file_exists(bam, "Input BAM")?;
            validate_bam_indexed(bam)?;
        }
        match (&self.region, &self.bed) {
            (None, None) => bail!("Either --region or --bed is required"),
            (None, Some(bed)) => validate_file_exists(bed, "BED file")?,
            _ => {}
        }
        Ok(())
    }

    #[must_use]
    pub fn is_paired(&self) -> bool {
        !self.second_bams.is_empty()
    }
}

/// Sample naming and report layout.
#[derive(Debug, Clone, Default, Args)]
pub struct OutputOptions {
    /// Output file; standard output when absent
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Sample name; derived from the first BAM file name when absent
    #[arg(short = 'N', long = "sample")]
    pub sample: Option<String>,

    /// Name of the second sample; derived from its first BAM file name when absent
    #[arg(long = "sample2")]
    pub second_sample: Option<String>,

    /// Write a header row
    #[arg(long = "header", default_value = "false")]
    pub header: bool,

    /// Report every covered position, including reference-only and filtered ones
    #[arg(short = 'p', long = "pileup", default_value = "false")]
    pub pileup: bool,

    /// Attach a candidate trace to every row
    #[arg(short = 'D', long = "debug", default_value = "false")]
    pub debug: bool,
}

impl OutputOptions {
    /// The sample label written in every row; paired runs join both names with `|`.
    #[must_use]
    pub fn sample_name(&self, inputs: &InputOptions) -> String {
        let derive = |explicit: &Option<String>, bams: &[PathBuf]| {
            explicit.clone().unwrap_or_else(|| {
                bams.first().map(|p| sample_name_from_path(&p.to_string_lossy())).unwrap_or_default()
            })
        };
        let first = derive(&self.sample, &inputs.bams);
        if inputs.is_paired() {
            format!("{first}|{}", derive(&self.second_sample, &inputs.second_bams))
        } else {
            first
        }
    }
}

/// Read filters and variant reporting thresholds.
#[derive(Debug, Clone, Args)]
pub struct FilterOptions {
    /// Minimum allele frequency
    #[arg(short = 'f', long = "min-frequency", default_value_t = 0.01)]
    pub freq: f64,

    /// Minimum high-quality reads supporting a variant
    #[arg(short = 'r', long = "min-reads", default_value_t = 2)]
    pub min_reads: i32,

    /// Minimum reads per strand for the strand-bias test
    #[arg(short = 'B', long = "min-bias-reads", default_value_t = 2)]
    pub min_bias_reads: i32,

    /// Minimum strand fraction for the strand-bias test
    #[arg(long = "bias-fraction", default_value_t = 0.05)]
    pub bias: f64,

    /// Base quality counted as high quality
    #[arg(short = 'q', long = "min-base-quality", default_value_t = 22.5)]
    pub good_quality: f64,

    /// Skip reads with a lower mapping quality
    #[arg(short = 'Q', long = "min-mapping-quality")]
    pub min_mapping_quality: Option<u8>,

    /// Minimum mean mapping quality of a variant
    #[arg(short = 'O', long = "min-mean-mapq", default_value_t = 0.0)]
    pub min_mean_mapq: f64,

    /// Skip reads with more mismatches (NM minus indel bases)
    #[arg(short = 'm', long = "max-mismatches", default_value_t = 8)]
    pub max_mismatches: i32,

    /// Minimum mean position of a variant in its reads
    #[arg(short = 'P', long = "min-read-position", default_value_t = 5.0)]
    pub read_pos_filter: f64,

    /// Minimum high/low quality read ratio
    #[arg(long = "min-quality-ratio", default_value_t = 1.5)]
    pub qratio: f64,

    /// Use only the first N bases of each read (0 keeps whole reads)
    #[arg(short = 'T', long = "trim", default_value_t = 0)]
    pub trim_bases_after: i32,

    /// Randomly skip this fraction of reads
    #[arg(short = 'Z', long = "downsample")]
    pub downsampling: Option<f64>,

    /// Seed for downsampling
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Skip duplicate reads by position and mate
    #[arg(short = 't', long = "remove-duplicates", default_value = "false")]
    pub remove_duplicates: bool,

    /// Keep secondary and duplicate-flagged records
    #[arg(long = "keep-non-primary", default_value = "false")]
    pub keep_non_primary: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        let config = CallerConfig::default();
        Self {
            freq: config.freq,
            min_reads: config.min_reads,
            min_bias_reads: config.min_bias_reads,
            bias: config.bias,
            good_quality: config.good_quality,
            min_mapping_quality: config.min_mapping_quality,
            min_mean_mapq: config.min_mean_mapq,
            max_mismatches: config.max_mismatches,
            read_pos_filter: config.read_pos_filter,
            qratio: config.qratio,
            trim_bases_after: config.trim_bases_after,
            downsampling: config.downsampling,
            seed: config.seed,
            remove_duplicates: config.remove_duplicates,
            keep_non_primary: !config.filter_non_primary,
        }
    }
}

impl FilterOptions {
    pub fn apply(&self, config: &mut CallerConfig) {
        config.freq = self.freq;
        config.min_reads = self.min_reads;
        config.min_bias_reads = self.min_bias_reads;
        config.bias = self.bias;
        config.good_quality = self.good_quality;
        config.min_mapping_quality = self.min_mapping_quality;
        config.min_mean_mapq = self.min_mean_mapq;
        config.max_mismatches = self.max_mismatches;
        config.read_pos_filter = self.read_pos_filter;
        config.qratio = self.qratio;
        config.trim_bases_after = self.trim_bases_after;
        config.downsampling = self.downsampling;
        config.seed = self.seed;
        config.remove_duplicates = self.remove_duplicates;
        config.filter_non_primary = !self.keep_non_primary;
    }
}

/// Region extension, realignment and allele placement.
#[derive(Debug, Clone, Args)]
pub struct RealignOptions {
    /// Bases added on each side of every region
    #[arg(short = 'x', long = "extension", default_value_t = 0)]
    pub extension: i64,

    /// Soft clips anchored this far outside a region still build consensus
    #[arg(long = "soft-clip-buffer", default_value_t = 0)]
    pub soft_clip_buffer: i64,

    /// Window for folding nearby events into one complex variant
    #[arg(short = 'X', long = "vext", default_value_t = 3)]
    pub vext: i32,

    /// Search distance for large indel breakpoints
    #[arg(short = 'I', long = "indel-size", default_value_t = 120)]
    pub indel_size: i64,

    /// Run the soft-clip realignment passes
    #[arg(short = 'k', long = "realign", default_value_t = true, action = clap::ArgAction::Set)]
    pub realign: bool,

    /// Report indels at their most 3' position
    #[arg(long = "move-indels-3prime", default_value = "false")]
    pub move_indels_to_3: bool,

    /// Indels at least this long are reported as <DEL>/<DUP>
    #[arg(short = 'L', long = "sv-min-length", default_value_t = 1000)]
    pub sv_min_length: i32,

    /// Amplicon read filter as DIST:OVERLAP; implied by an eight-column BED
    #[arg(short = 'a', long = "amplicon")]
    pub amplicon: Option<AmpliconParams>,
}

impl Default for RealignOptions {
    fn default() -> Self {
        let config = CallerConfig::default();
        Self {
            extension: config.extension,
            soft_clip_buffer: config.soft_clip_buffer,
            vext: config.vext,
            indel_size: config.indel_size,
            realign: config.realign,
            move_indels_to_3: config.move_indels_to_3,
            sv_min_length: config.sv_min_length,
            amplicon: config.amplicon,
        }
    }
}

impl RealignOptions {
    pub fn apply(&self, config: &mut CallerConfig) {
        config.extension = self.extension;
        config.soft_clip_buffer = self.soft_clip_buffer;
        config.vext = self.vext;
        config.indel_size = self.indel_size;
        config.realign = self.realign;
        config.move_indels_to_3 = self.move_indels_to_3;
        config.sv_min_length = self.sv_min_length;
        config.amplicon = self.amplicon;
    }
}

/// Worker pool size.
#[derive(Debug, Clone, Args)]
pub struct ThreadingOptions {
    /// Number of regions processed concurrently
    #[arg(long = "threads", default_value_t = 1)]
    pub threads: usize,
}

impl ThreadingOptions {
    #[must_use]
    pub fn new(threads: usize) -> Self {
        Self { threads }
    }

    /// Returns a log message describing the threading configuration.
    #[must_use]
    pub fn log_message(&self) -> String {
        if self.threads <= 1 { "Single-threaded mode".to_string() } else { format!("Using {} threads", self.threads) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Wrapper {
        #[command(flatten)]
        filters: FilterOptions,
        #[command(flatten)]
        realign: RealignOptions,
        #[command(flatten)]
        output: OutputOptions,
    }

    #[test]
    fn test_defaults_match_config() {
        let parsed = Wrapper::parse_from(["test"]);
        let mut config = CallerConfig { freq: 0.5, realign: false, ..CallerConfig::default() };
        parsed.filters.apply(&mut config);
        parsed.realign.apply(&mut config);
        let defaults = CallerConfig::default();
        assert!((config.freq - defaults.freq).abs() < f64::EPSILON);
        assert!(config.realign);
        assert!(config.filter_non_primary);
        assert_eq!(config.sv_min_length, defaults.sv_min_length);
        assert_eq!(parsed.filters.min_reads, FilterOptions::default().min_reads);
        assert_eq!(parsed.realign.indel_size, RealignOptions::default().indel_size);
    }

    #[test]
    fn test_parse_overrides() {
        let parsed = Wrapper::parse_from(["test", "-f", "0.05", "-k", "false", "-a", "5:0.9", "--keep-non-primary"]);
        let mut config = CallerConfig::default();
        parsed.filters.apply(&mut config);
        parsed.realign.apply(&mut config);
        assert!((config.freq - 0.05).abs() < f64::EPSILON);
        assert!(!config.realign);
        assert!(!config.filter_non_primary);
        assert_eq!(config.amplicon.map(|a| a.distance), Some(5));
    }

    fn inputs(bams: &[&str], second: &[&str]) -> InputOptions {
        InputOptions {
            bams: bams.iter().map(PathBuf::from).collect(),
            second_bams: second.iter().map(PathBuf::from).collect(),
            reference: PathBuf::from("ref.fa"),
            region: Some("chr1:1-10".to_string()),
            bed: None,
            zero_based: None,
        }
    }

    #[test]
    fn test_sample_name() {
        let output = OutputOptions::default();
        assert_eq!(output.sample_name(&inputs(&["/data/tumor.sorted.bam"], &[])), "tumor");
        assert_eq!(output.sample_name(&inputs(&["t.bam"], &["n_L001.bam"])), "t|n");

        let named = OutputOptions { sample: Some("S1".to_string()), ..OutputOptions::default() };
        assert_eq!(named.sample_name(&inputs(&["t.bam"], &[])), "S1");
    }

    #[test]
    fn test_threading_log_message() {
        assert_eq!(ThreadingOptions::new(1).log_message(), "Single-threaded mode");
        assert!(ThreadingOptions::new(8).log_message().contains("8 threads"));
    }
}
