//! Call variants in target regions of one sample, a sample pair, or an amplicon panel.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use vardict_lib::alignment::source::{BamFiles, SourceProvider};
use vardict_lib::config::CallerConfig;
use vardict_lib::pipeline::Orchestrator;
use vardict_lib::reference::ReferenceReader;
use vardict_lib::region::{RegionPlan, parse_region, read_bed};
use vardict_lib::report::{ReportMode, ReportWriter};

use crate::commands::command::Command;
use crate::commands::common::{FilterOptions, InputOptions, OutputOptions, RealignOptions, ThreadingOptions};

/// Call variants from indexed BAM files.
#[derive(Debug, Parser)]
#[command(
    name = "call",
    about = "\x1b[38;5;72m[CALLING]\x1b[0m        \x1b[36mCall variants in target regions\x1b[0m",
    long_about = r#"
Call SNVs, MNPs, indels, complex and structural variants in target regions.

Reads overlapping each region are walked against the reference, soft-clipped evidence is
realigned into indels, and every allele passing the filters is written as one tab-separated row.

Regions come from --region (one region) or --bed. A BED file with eight columns (insert start and
end in columns seven and eight) switches to amplicon mode. Giving --bam2 reports a second sample
side by side with the first.

Example usage:
  vardict call -G hg38.fa -b tumor.bam -R chr7:55242400-55242500:EGFR
  vardict call -G hg38.fa -b tumor.bam --bed targets.bed --threads 8 -o calls.tsv
  vardict call -G hg38.fa -b tumor.bam --bam2 normal.bam --bed targets.bed --header
"#
)]
pub struct Call {
    #[command(flatten)]
    pub inputs: InputOptions,

    #[command(flatten)]
    pub output: OutputOptions,

    #[command(flatten)]
    pub filters: FilterOptions,

    #[command(flatten)]
    pub realign: RealignOptions,

    #[command(flatten)]
    pub threading: ThreadingOptions,
}

impl Call {
    /// Builds the caller configuration from every option group.
    fn config(&self) -> CallerConfig {
        let mut config = CallerConfig::default();
        self.filters.apply(&mut config);
        self.realign.apply(&mut config);
        config.pileup = self.output.pileup;
        config.debug = self.output.debug;
        config.threads = self.threading.threads;
        config
    }

    /// Loads the regions to process.
    fn plan(&self, config: &CallerConfig) -> Result<RegionPlan> {
        if let Some(text) = &self.inputs.region {
            let region = parse_region(text, config.extension, self.inputs.zero_based.unwrap_or(false))?;
            return Ok(RegionPlan::single(region));
        }
        let Some(bed) = &self.inputs.bed else {
            anyhow::bail!("Either --region or --bed is required");
        };
        read_bed(bed, config.extension, self.inputs.zero_based, config.amplicon)
    }

    fn report_mode(&self, plan: &RegionPlan) -> ReportMode {
        if self.inputs.is_paired() {
            ReportMode::Paired
        } else if plan.amplicon.is_some() {
            ReportMode::Amplicon
        } else {
            ReportMode::Single
        }
    }
}

impl Command for Call {
    fn execute(&self, command_line: &str) -> Result<()> {
        self.inputs.validate()?;
        let mut config = self.config();
        config.validate()?;

        let plan = self.plan(&config)?;
        if config.amplicon.is_none() {
            config.amplicon = plan.amplicon;
        }
        let mode = self.report_mode(&plan);
        let sample = self.output.sample_name(&self.inputs);

        info!("Starting Call");
        info!("Command line: {command_line}");
        info!("Reference: {}", self.inputs.reference.display());
        info!("Sample: {sample}");
        info!("Regions: {} in {} groups ({mode:?} mode)", plan.region_count(), plan.groups.len());
        info!("{}", self.threading.log_message());

        let reference = ReferenceReader::new(&self.inputs.reference)?;
        let first: Arc<dyn SourceProvider> = Arc::new(BamFiles(self.inputs.bams.clone()));
        let second: Option<Arc<dyn SourceProvider>> = self
            .inputs
            .is_paired()
            .then(|| Arc::new(BamFiles(self.inputs.second_bams.clone())) as Arc<dyn SourceProvider>);

        let out: Box<dyn Write> = match &self.output.output {
            Some(path) => Box::new(BufWriter::new(
                File::create(path).with_context(|| format!("Failed to create output: {}", path.display()))?,
            )),
            None => Box::new(BufWriter::new(std::io::stdout().lock())),
        };
        let mut writer = ReportWriter::new(out, sample, config.debug);
        if self.output.header {
            writer.write_header(mode)?;
        }

        let orchestrator = Orchestrator::new(Arc::new(config), Arc::new(reference), first, second);
        let tasks = orchestrator.tasks(&plan);
        let rows = orchestrator.run(tasks, |output| writer.write(&output))?;
        writer.into_inner()?;

        info!("Wrote {rows} rows");
        Ok(())
    }
}
