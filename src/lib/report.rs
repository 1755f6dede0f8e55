//! Tab-separated variant report.
//!
//! Every row starts with sample, gene and contig. The statistic columns are shared by all modes;
//! paired rows carry them once per sample and amplicon rows append amplicon agreement counts.

use std::io::Write;

use anyhow::Result;

use crate::pipeline::{RegionOutput, Rows};
use crate::region::Region;
use crate::synth::{AmpliconCall, Call, PairedCall, Variant};

/// Per-sample statistic columns.
const STAT_COLUMNS: [&str; 17] = [
    "Depth",
    "AltDepth",
    "RefFwdReads",
    "RefRevReads",
    "AltFwdReads",
    "AltRevReads",
    "Genotype",
    "AF",
    "Bias",
    "PMean",
    "PStd",
    "QMean",
    "QStd",
    "MQ",
    "QRatio",
    "HiFreq",
    "ExtraAF",
];

/// Which row layout a report uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMode {
    Single,
    Paired,
    Amplicon,
}

fn zero_or_3(x: f64) -> String {
    if x == 0.0 { "0".to_string() } else { format!("{x:.3}") }
}

/// The 17 statistic fields of one record.
fn stat_fields(v: &Variant) -> Vec<String> {
    vec![
        v.total_depth.to_string(),
        v.depth.to_string(),
        v.ref_forward.to_string(),
        v.ref_reverse.to_string(),
        v.forward.to_string(),
        v.reverse.to_string(),
        v.genotype.clone(),
        zero_or_3(v.frequency),
        v.bias.to_string(),
        format!("{:.1}", v.mean_position),
        u8::from(v.position_varies).to_string(),
        format!("{:.1}", v.mean_quality),
        u8::from(v.quality_varies).to_string(),
        format!("{:.1}", v.mean_mapq),
        format!("{:.3}", v.quality_ratio),
        format!("{:.3}", v.high_quality_frequency),
        zero_or_3(v.extra_frequency),
    ]
}

/// Position, alleles, statistics and repeat context of one record.
fn record_fields(v: &Variant) -> Vec<String> {
    let mut fields = vec![v.start.to_string(), v.end.to_string(), v.ref_allele.to_string(), v.var_allele.to_string()];
    fields.extend(stat_fields(v));
    fields.extend([
        v.shift3.to_string(),
        zero_or_3(v.msi),
        v.msi_unit.to_string(),
        format!("{:.1}", v.mean_mismatches),
        v.high_quality_count.to_string(),
        v.high_quality_depth.to_string(),
        v.left_flank.to_string(),
        v.right_flank.to_string(),
    ]);
    fields
}

/// Fields of a position with no reads at all.
fn empty_fields(position: i64) -> Vec<String> {
    let mut fields = vec![position.to_string(), position.to_string(), String::new(), String::new()];
    fields.extend(["0", "0", "0", "0", "0", "0", "", "0", "0;0", "0", "0", "0", "0", "0", "0", "0", "0"].map(String::from));
    fields.extend(["0", "0", "0", "0", "0", "0", "", ""].map(String::from));
    fields
}

/// Writes report rows for one sample (or sample pair).
pub struct ReportWriter<W: Write> {
    out: W,
    sample: String,
    debug: bool,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W, sample: impl Into<String>, debug: bool) -> Self {
        Self { out, sample: sample.into(), debug }
    }

    /// Writes the column names for `mode`.
    pub fn write_header(&mut self, mode: ReportMode) -> Result<()> {
        let mut columns: Vec<String> = ["Sample", "Gene", "Chr", "Start", "End", "Ref", "Alt"].map(String::from).to_vec();
        let trailing = ["Shift3", "MSI", "MSI_NT"];
        match mode {
            ReportMode::Single | ReportMode::Amplicon => {
                columns.extend(STAT_COLUMNS.map(String::from));
                columns.extend(trailing.map(String::from));
                columns.extend(["NM", "HiAltCount", "HiDepth", "5pFlankSeq", "3pFlankSeq", "Segment", "VarType"].map(String::from));
                if mode == ReportMode::Amplicon {
                    columns.extend(["GoodAmplicons", "CoveringAmplicons", "NoCoverage", "AmpliconFlag"].map(String::from));
                }
            }
            ReportMode::Paired => {
                for sample in ["1", "2"] {
                    columns.extend(STAT_COLUMNS.iter().map(|c| format!("{c}{sample}")));
                    columns.push(format!("NM{sample}"));
                }
                columns.extend(trailing.map(String::from));
                columns.extend(["5pFlankSeq", "3pFlankSeq", "Segment", "VarType"].map(String::from));
            }
        }
        writeln!(self.out, "{}", columns.join("\t"))?;
        Ok(())
    }

    /// Writes every row of one task.
    pub fn write(&mut self, output: &RegionOutput) -> Result<()> {
        match &output.rows {
            Rows::Single(calls) => calls.iter().try_for_each(|c| self.write_call(&output.region, c)),
            Rows::Paired(calls) => calls.iter().try_for_each(|c| self.write_paired(&output.region, c)),
            Rows::Amplicon(calls) => calls.iter().try_for_each(|c| self.write_amplicon(&output.region, c)),
        }
    }

    fn prefix(&self, region: &Region) -> Vec<String> {
        vec![self.sample.clone(), region.gene.clone(), region.chrom.clone()]
    }

    fn write_call(&mut self, region: &Region, call: &Call) -> Result<()> {
        let mut fields = self.prefix(region);
        match &call.variant {
            Some(v) => fields.extend(record_fields(v)),
            None => fields.extend(empty_fields(call.position)),
        }
        fields.push(region.to_string());
        fields.push(call.var_type.map(|t| t.to_string()).unwrap_or_default());
        writeln!(self.out, "{}", fields.join("\t"))?;
        if let Some(trace) = call.variant.as_ref().and_then(|v| v.debug.as_ref()).filter(|_| self.debug) {
            writeln!(self.out, "\t{trace}")?;
        }
        Ok(())
    }

    fn write_paired(&mut self, region: &Region, call: &PairedCall) -> Result<()> {
        let Some(lead) = call.lead() else {
            return Ok(());
        };
        let mut fields = self.prefix(region);
        fields.extend([lead.start.to_string(), lead.end.to_string(), lead.ref_allele.to_string(), lead.var_allele.to_string()]);
        for sample in [&call.first, &call.second] {
            match sample {
                Some(v) => {
                    fields.extend(stat_fields(v));
                    fields.push(format!("{:.1}", v.mean_mismatches));
                }
                None => fields.extend(std::iter::repeat_n("0".to_string(), STAT_COLUMNS.len() + 1)),
            }
        }
        fields.extend([
            lead.shift3.to_string(),
            zero_or_3(lead.msi),
            lead.msi_unit.to_string(),
            lead.left_flank.to_string(),
            lead.right_flank.to_string(),
            region.to_string(),
            call.var_type.to_string(),
        ]);
        writeln!(self.out, "{}", fields.join("\t"))?;
        Ok(())
    }

    fn write_amplicon(&mut self, region: &Region, call: &AmpliconCall) -> Result<()> {
        let mut fields = self.prefix(region);
        match &call.variant {
            Some(v) => {
                fields.extend(record_fields(v));
                fields.push(call.amplicon.clone());
            }
            None => {
                fields.extend(empty_fields(call.position));
                fields.push(format!("{}:{}-{}", region.chrom, call.position, call.position));
            }
        }
        fields.push(call.var_type.map(|t| t.to_string()).unwrap_or_default());
        fields.extend([
            call.good_amplicons.to_string(),
            call.covering_amplicons.to_string(),
            call.no_coverage.to_string(),
            u8::from(call.conflict).to_string(),
        ]);
        if let Some(trace) = call.variant.as_ref().and_then(|v| v.debug.as_ref()).filter(|_| self.debug) {
            fields.push(trace.clone());
        }
        writeln!(self.out, "{}", fields.join("\t"))?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}
