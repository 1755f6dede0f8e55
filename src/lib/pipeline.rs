//! Region tasks and the worker pool that runs them.
//!
//! A [`RegionPipeline`] takes one task through walk, realignment and synthesis. The
//! [`Orchestrator`] fans tasks out over a rayon pool and hands results back in submission order:
//! every task gets its own single-slot channel, and the receivers are queued in a bounded channel
//! as tasks are submitted, so the consumer drains them in order while later tasks still run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, bounded};
use log::{debug, info, warn};

use crate::alignment::source::{AlignmentSource, SourceProvider};
use crate::config::CallerConfig;
use crate::logging::{CallSummary, OperationTimer};
use crate::progress::ProgressTracker;
use crate::realign::RealignmentEngine;
use crate::reference::ReferenceReader;
use crate::region::{Region, RegionPlan};
use crate::synth::{
    AmpliconCall, Call, PairedCall, RegionVariants, VariantSynthesizer, select_amplicon_calls, select_calls,
    select_paired_calls,
};
use crate::variation::VariationTable;
use crate::walker::{CigarWalker, SpliceSet};

/// Lifecycle of one region task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Queued,
    RunningWalk,
    RunningRealign,
    RunningSynthesis,
    Done,
}

/// One unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Single(Region),
    Paired(Region),
    /// One cluster of overlapping amplicons.
    Amplicon(Vec<Region>),
}

impl Task {
    /// Region whose gene and contig label the task's rows.
    #[must_use]
    pub fn label_region(&self) -> Option<&Region> {
        match self {
            Self::Single(region) | Self::Paired(region) => Some(region),
            Self::Amplicon(regions) => regions.last(),
        }
    }
}

/// Rows produced by one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    Single(Vec<Call>),
    Paired(Vec<PairedCall>),
    Amplicon(Vec<AmpliconCall>),
}

impl Rows {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(rows) => rows.len(),
            Self::Paired(rows) => rows.len(),
            Self::Amplicon(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty_like(task: &Task) -> Self {
        match task {
            Task::Single(_) => Self::Single(Vec::new()),
            Task::Paired(_) => Self::Paired(Vec::new()),
            Task::Amplicon(_) => Self::Amplicon(Vec::new()),
        }
    }
}

/// Result of one task, labelled with the region it reports under.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionOutput {
    pub region: Region,
    pub rows: Rows,
}

/// Runs the stages of one task against already opened sources.
pub struct RegionPipeline<'a> {
    config: &'a CallerConfig,
    reference: &'a ReferenceReader,
    splices: &'a SpliceSet,
    state: WorkState,
}

impl<'a> RegionPipeline<'a> {
    #[must_use]
    pub fn new(config: &'a CallerConfig, reference: &'a ReferenceReader, splices: &'a SpliceSet) -> Self {
        Self { config, reference, splices, state: WorkState::Queued }
    }

    #[must_use]
    pub fn state(&self) -> WorkState {
        self.state
    }

    fn advance(&mut self, region: &Region, next: WorkState) {
        debug!("{region}: {:?} -> {next:?}", self.state);
        self.state = next;
    }

    /// Walks, realigns and synthesizes one region from one source.
    ///
    /// `read_length` overrides the read length measured by the walk. Returns the synthesized
    /// records and the read length used.
    pub fn variants(
        &mut self,
        region: &Region,
        source: &mut dyn AlignmentSource,
        read_length: Option<i32>,
        keep_all_positions: bool,
    ) -> Result<(RegionVariants, i32)> {
        let window = self.reference.window(region, self.config.extension)?;

        self.advance(region, WorkState::RunningWalk);
        let records = source
            .fetch(&region.chrom, region.start, region.end)
            .with_context(|| format!("Failed to read alignments for {region}"))?;
        let mut table = VariationTable::new();
        CigarWalker::new(self.config, region, &window, self.splices).walk_all(&records, &mut table);
        if let Some(length) = read_length {
            table.read_length = length;
        }

        self.advance(region, WorkState::RunningRealign);
        RealignmentEngine::new(&mut table, &window, self.config, &region.chrom).with_source(source).run()?;

        self.advance(region, WorkState::RunningSynthesis);
        let vars = VariantSynthesizer::new(self.config, region, &window)
            .keep_all_positions(keep_all_positions)
            .synthesize(&table);
        Ok((vars, table.read_length))
    }

    /// Calls one region of one sample.
    pub fn run_single(&mut self, region: &Region, source: &mut dyn AlignmentSource) -> Result<Vec<Call>> {
        let (vars, _) = self.variants(region, source, None, false)?;
        let calls = select_calls(region, &vars, self.splices, self.config);
        self.advance(region, WorkState::Done);
        Ok(calls)
    }

    /// Calls one region of two samples side by side. The second sample is processed with the
    /// read length measured on the first.
    pub fn run_paired(
        &mut self,
        region: &Region,
        first: &mut dyn AlignmentSource,
        second: &mut dyn AlignmentSource,
    ) -> Result<Vec<PairedCall>> {
        let (first_vars, read_length) = self.variants(region, first, None, true)?;
        let (second_vars, _) = self.variants(region, second, Some(read_length), true)?;
        let calls = select_paired_calls(region, &first_vars, &second_vars, self.splices, self.config);
        self.advance(region, WorkState::Done);
        Ok(calls)
    }

    /// Calls one amplicon cluster, each amplicon from its own table.
    pub fn run_amplicon(
        &mut self,
        amplicons: &[Region],
        source: &mut dyn AlignmentSource,
    ) -> Result<Vec<AmpliconCall>> {
        let mut per_amplicon = Vec::with_capacity(amplicons.len());
        for region in amplicons {
            let (vars, _) = self.variants(region, source, None, false)?;
            per_amplicon.push((region.clone(), vars));
        }
        let calls = select_amplicon_calls(&per_amplicon, self.splices, self.config);
        if let Some(last) = amplicons.last() {
            self.advance(last, WorkState::Done);
        }
        Ok(calls)
    }
}

/// Shared state handed to every worker.
struct Shared {
    config: Arc<CallerConfig>,
    reference: Arc<ReferenceReader>,
    first: Arc<dyn SourceProvider>,
    second: Option<Arc<dyn SourceProvider>>,
    splices: Arc<SpliceSet>,
}

impl Shared {
    fn execute(&self, task: &Task) -> Result<Rows> {
        let mut pipeline = RegionPipeline::new(&self.config, &self.reference, &self.splices);
        let mut first = self.first.open()?;
        match task {
            Task::Single(region) => Ok(Rows::Single(pipeline.run_single(region, first.as_mut())?)),
            Task::Paired(region) => {
                let provider = self.second.as_ref().ok_or_else(|| anyhow!("no second sample for {region}"))?;
                let mut second = provider.open()?;
                Ok(Rows::Paired(pipeline.run_paired(region, first.as_mut(), second.as_mut())?))
            }
            Task::Amplicon(regions) => Ok(Rows::Amplicon(pipeline.run_amplicon(regions, first.as_mut())?)),
        }
    }

    /// Runs a task; a failure or panic is logged and yields no rows.
    fn run(&self, task: &Task) -> Option<RegionOutput> {
        let region = task.label_region()?.clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(task)))
            .unwrap_or_else(|payload| Err(anyhow!("worker panicked: {}", panic_message(payload.as_ref()))));
        let rows = result.unwrap_or_else(|e| {
            warn!("{region}: task failed: {e:#}");
            Rows::empty_like(task)
        });
        Some(RegionOutput { region, rows })
    }
}

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs every task of a plan on a fixed-size pool and yields results in submission order.
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: Arc<CallerConfig>,
        reference: Arc<ReferenceReader>,
        first: Arc<dyn SourceProvider>,
        second: Option<Arc<dyn SourceProvider>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared { config, reference, first, second, splices: Arc::new(SpliceSet::default()) }),
        }
    }

    /// Splice junctions collected so far.
    #[must_use]
    pub fn splices(&self) -> &SpliceSet {
        &self.shared.splices
    }

    /// Turns a region plan into tasks: one per amplicon cluster in amplicon mode, otherwise one
    /// per region (paired when a second sample is present).
    #[must_use]
    pub fn tasks(&self, plan: &RegionPlan) -> Vec<Task> {
        let amplicon = plan.amplicon.is_some() && self.shared.second.is_none();
        if amplicon {
            return plan.groups.iter().filter(|g| !g.is_empty()).cloned().map(Task::Amplicon).collect();
        }
        plan.groups
            .iter()
            .flatten()
            .cloned()
            .map(|region| if self.shared.second.is_some() { Task::Paired(region) } else { Task::Single(region) })
            .collect()
    }

    /// Runs `tasks`, passing each result to `sink` in submission order. Returns the number of rows.
    pub fn run<F>(&self, tasks: Vec<Task>, mut sink: F) -> Result<u64>
    where
        F: FnMut(RegionOutput) -> Result<()>,
    {
        let threads = self.shared.config.threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("Failed to build worker pool")?;
        let timer = OperationTimer::new("Calling variants", "regions");
        let progress = ProgressTracker::new("Processed regions").with_interval(100);
        info!("Processing {} tasks on {threads} threads", tasks.len());

        // Each receiver travels with the empty output its task falls back to.
        let (handles_tx, handles_rx) = bounded::<(Option<RegionOutput>, Receiver<Option<RegionOutput>>)>(threads * 4);
        let mut summary = CallSummary::default();
        thread::scope(|scope| -> Result<()> {
            let pool = &pool;
            scope.spawn(move || {
                for task in tasks {
                    let (tx, rx) = bounded(1);
                    let fallback = task
                        .label_region()
                        .map(|region| RegionOutput { region: region.clone(), rows: Rows::empty_like(&task) });
                    if handles_tx.send((fallback, rx)).is_err() {
                        break;
                    }
                    let shared = Arc::clone(&self.shared);
                    pool.spawn(move || {
                        let _ = tx.send(shared.run(&task));
                    });
                }
            });

            for (fallback, handle) in handles_rx {
                let output = handle.recv().unwrap_or_else(|_| {
                    warn!("A region worker stopped without a result");
                    fallback
                });
                progress.log_if_needed(1);
                if let Some(output) = output {
                    summary.record(&output);
                    sink(output)?;
                }
            }
            Ok(())
        })?;

        progress.log_final();
        timer.log_completion(summary.regions);
        summary.log();
        Ok(summary.rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::AlignmentRecord;
    use crate::alignment::source::MemorySource;
    use crate::synth::{VarType, Variant};
    use crate::walker::tests::{REF, read};
    use anyhow::bail;
    use approx::assert_relative_eq;

    /// Ten reads over 11..=40, four carrying T at position 25.
    fn snv_reads() -> Vec<AlignmentRecord> {
        (0..10)
            .map(|i| {
                let mut seq = REF[10..40].to_vec();
                if i < 4 {
                    seq[14] = b'T';
                }
                read(11, "30M", &seq, i32::from(i < 4))
            })
            .collect()
    }

    fn reference() -> ReferenceReader {
        ReferenceReader::from_sequences([("chr1", std::str::from_utf8(REF).unwrap_or_default())])
    }

    #[test]
    fn test_single_region() -> Result<()> {
        let config = CallerConfig::default();
        let reference = reference();
        let splices = SpliceSet::default();
        let mut source = MemorySource::new(snv_reads());
        let mut pipeline = RegionPipeline::new(&config, &reference, &splices);
        assert_eq!(pipeline.state(), WorkState::Queued);

        let calls = pipeline.run_single(&Region::new("chr1", 1, 60, "g"), &mut source)?;
        assert_eq!(pipeline.state(), WorkState::Done);
        assert_eq!(calls.len(), 1);
        let variant = calls[0].variant.as_ref().map(|v| (v.start, v.ref_allele.clone(), v.var_allele.clone()));
        assert_eq!(variant, Some((25, "C".into(), "T".into())));
        assert_eq!(calls[0].var_type, Some(VarType::Snv));
        Ok(())
    }

    #[test]
    fn test_insertion_in_thirty_percent_of_reads() -> Result<()> {
        let config = CallerConfig::default();
        let reference = reference();
        let splices = SpliceSet::default();
        let mut inserted = REF[10..25].to_vec();
        inserted.push(b'G');
        inserted.extend_from_slice(&REF[25..40]);
        let reads: Vec<AlignmentRecord> = (0..20)
            .map(|i| if i < 6 { read(11, "15M1I15M", &inserted, 0) } else { read(11, "30M", &REF[10..40], 0) })
            .collect();
        let mut source = MemorySource::new(reads);

        let mut pipeline = RegionPipeline::new(&config, &reference, &splices);
        let (vars, _) = pipeline.variants(&Region::new("chr1", 1, 60, "g"), &mut source, None, false)?;
        let found: Vec<&Variant> = vars.values().flat_map(|at| &at.variants).collect();
        assert_eq!(found.len(), 1);
        let ins = found[0];
        assert_eq!(ins.var_type(), VarType::Insertion);
        assert_eq!((ins.start, ins.ref_allele.as_slice(), ins.var_allele.as_slice()), (25, &b"C"[..], &b"CG"[..]));
        assert_eq!(ins.depth, 6);
        assert_relative_eq!(ins.frequency, 0.3);
        Ok(())
    }

    #[test]
    fn test_paired_region() -> Result<()> {
        let config = CallerConfig::default();
        let reference = reference();
        let splices = SpliceSet::default();
        let mut first = MemorySource::new(snv_reads());
        let plain: Vec<AlignmentRecord> = (0..10).map(|_| read(11, "30M", &REF[10..40], 0)).collect();
        let mut second = MemorySource::new(plain);

        let mut pipeline = RegionPipeline::new(&config, &reference, &splices);
        let calls = pipeline.run_paired(&Region::new("chr1", 1, 60, "g"), &mut first, &mut second)?;
        assert_eq!(calls.len(), 1);
        let second_depth = calls[0].second.as_ref().map(|v| (v.depth, v.total_depth));
        assert_eq!(second_depth, Some((0, 10)));
        Ok(())
    }

    struct Failing;

    impl SourceProvider for Failing {
        fn open(&self) -> Result<Box<dyn AlignmentSource>> {
            bail!("cannot open")
        }
    }

    #[test]
    fn test_orchestrator_keeps_submission_order() -> Result<()> {
        let config = Arc::new(CallerConfig { threads: 3, ..CallerConfig::default() });
        let orchestrator = Orchestrator::new(
            config,
            Arc::new(reference()),
            Arc::new(MemorySource::new(snv_reads())),
            None,
        );
        let regions: Vec<Region> = (0..12).map(|i| Region::new("chr1", 1 + i, 60, format!("g{i}"))).collect();
        let plan = RegionPlan { amplicon: None, groups: regions.iter().cloned().map(|r| vec![r]).collect() };
        let tasks = orchestrator.tasks(&plan);
        assert_eq!(tasks.len(), 12);

        let mut seen = Vec::new();
        let rows = orchestrator.run(tasks, |output| {
            seen.push(output.region.gene);
            Ok(())
        })?;
        let expected: Vec<String> = regions.into_iter().map(|r| r.gene).collect();
        assert_eq!(seen, expected);
        assert_eq!(rows, 12);
        Ok(())
    }

    #[test]
    fn test_failed_task_yields_empty_rows() -> Result<()> {
        let orchestrator =
            Orchestrator::new(Arc::new(CallerConfig::default()), Arc::new(reference()), Arc::new(Failing), None);
        let tasks = vec![Task::Single(Region::new("chr1", 1, 60, "g"))];
        let mut outputs = Vec::new();
        orchestrator.run(tasks, |output| {
            outputs.push(output);
            Ok(())
        })?;
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].rows.is_empty());
        Ok(())
    }

    struct Panicking;

    impl SourceProvider for Panicking {
        fn open(&self) -> Result<Box<dyn AlignmentSource>> {
            panic!("source reader crashed")
        }
    }

    #[test]
    fn test_panicking_task_yields_empty_rows() -> Result<()> {
        let config = Arc::new(CallerConfig { threads: 2, ..CallerConfig::default() });
        let orchestrator = Orchestrator::new(config, Arc::new(reference()), Arc::new(Panicking), None);
        let tasks = vec![
            Task::Single(Region::new("chr1", 1, 30, "a")),
            Task::Single(Region::new("chr1", 31, 60, "b")),
        ];
        let mut outputs = Vec::new();
        let rows = orchestrator.run(tasks, |output| {
            outputs.push(output);
            Ok(())
        })?;
        assert_eq!(rows, 0);
        let genes: Vec<&str> = outputs.iter().map(|o| o.region.gene.as_str()).collect();
        assert_eq!(genes, ["a", "b"]);
        assert!(outputs.iter().all(|o| o.rows.is_empty()));
        Ok(())
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_amplicon_plan_groups_tasks() {
        let orchestrator = Orchestrator::new(
            Arc::new(CallerConfig::default()),
            Arc::new(reference()),
            Arc::new(MemorySource::default()),
            None,
        );
        let a = Region::new("chr1", 1, 30, "a").with_insert(5, 25);
        let b = Region::new("chr1", 20, 60, "b").with_insert(25, 55);
        let plan = RegionPlan { amplicon: Some(crate::config::AmpliconParams::default()), groups: vec![vec![a, b]] };
        let tasks = orchestrator.tasks(&plan);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].label_region().map(|r| r.gene.as_str()), Some("b"));
    }
}
