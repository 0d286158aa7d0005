//! Annotation coordinator
//!
//! Splits the input into shards, runs a pool of [`run_worker`] threads over
//! them and merges every successful shard table into one. Communication is
//! limited to three channels (tasks, results, exit acknowledgements) plus the
//! shared [`ProgressCounter`].
//!
//! Any orchestration failure raises the shared abort flag and returns the
//! error straight away. Workers are not joined on that path: the flag makes
//! them kill their running aligner and drain the remaining tasks quickly.

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::aligner::{file_name, Aligner};
use crate::config::AnnotateConfig;
use crate::error::AnnotateError;
use crate::fasta::{self, count_sequences, Compression};
use crate::progress::ProgressCounter;
use crate::shard::{
    self, plan_shards, read_end_prefix, shard_extension, split_fasta, ShardPlan, SplitOptions,
};
use crate::table::AnnotationTable;
use crate::worker::{run_worker, ShardOutcome, WorkItem, WorkerContext};

/// Stop items sent beyond one per worker
pub const EXTRA_STOP_ITEMS: usize = 10;

/// Merged result of one annotation run
#[derive(Debug)]
pub struct AnnotationRun {
    pub table: AnnotationTable,
    /// Shards whose rows are missing from `table`
    pub failed_shards: Vec<PathBuf>,
    pub total_sequences: usize,
}

impl AnnotationRun {
    pub fn has_parse_warnings(&self) -> bool {
        self.table.corrupted_sections() > 0
    }
}

pub struct Annotator {
    config: AnnotateConfig,
    aligner: Arc<dyn Aligner>,
}

impl Annotator {
    pub fn new(config: AnnotateConfig, aligner: Arc<dyn Aligner>) -> Self {
        Self { config, aligner }
    }

    pub fn config(&self) -> &AnnotateConfig {
        &self.config
    }

    fn context(&self, threads: usize, abort: Arc<AtomicBool>) -> WorkerContext {
        WorkerContext {
            operation: self.config.operation,
            thresholds: self.config.thresholds.clone(),
            threads,
            aligner: Arc::clone(&self.aligner),
            progress: ProgressCounter::new(),
            abort,
        }
    }

    fn split_options(&self, input: &Path, plan: &ShardPlan) -> SplitOptions {
        SplitOptions::new(&self.config.shard_dir, plan)
            .with_prefix(read_end_prefix(input))
            .with_ext(shard_extension(input))
            .with_trim(self.config.primer)
    }

    /// Annotate every sequence of `input`
    pub fn annotate(&self, input: &Path) -> Result<AnnotationRun> {
        let total = count_sequences(input)?;
        info!(
            "[annotate] There are {} sequences to be annotated in {}",
            total,
            file_name(input)
        );

        let plan = plan_shards(total, self.config.seqs_per_file, self.config.workers);

        let run = if plan.is_single() {
            self.annotate_single(input, &plan)?
        } else {
            self.annotate_sharded(input, &plan)?
        };

        self.log_summary(&run);
        Ok(run)
    }

    /// Small inputs go to the aligner in one piece, with every thread
    fn annotate_single(&self, input: &Path, plan: &ShardPlan) -> Result<AnnotationRun> {
        let ctx = self.context(self.config.workers, Arc::new(AtomicBool::new(false)));

        // IgBLAST needs plain FASTA with the primer already cut
        let compressed = fasta::detect_compression(input)? != Compression::None;
        let staged = if self.config.primer > 0 || compressed {
            let split = split_fasta(input, &self.split_options(input, plan))?;
            Some(split.shards)
        } else {
            None
        };
        let query = staged
            .as_ref()
            .and_then(|s| s.first())
            .map(PathBuf::as_path)
            .unwrap_or(input);

        let table = ctx
            .process_shard(query)
            .with_context(|| format!("Failed to annotate {}", input.display()))?;

        if let Some(shards) = staged {
            if !self.config.keep_shards {
                shard::remove_shards(&shards);
            }
        }

        Ok(AnnotationRun {
            table,
            failed_shards: Vec::new(),
            total_sequences: plan.total_sequences,
        })
    }

    fn annotate_sharded(&self, input: &Path, plan: &ShardPlan) -> Result<AnnotationRun> {
        let split = split_fasta(input, &self.split_options(input, plan))?;
        info!(
            "[annotate] {} sequences distributed into {} shard files",
            plan.total_sequences, plan.total_files
        );

        let threads = plan.threads_per_shard(self.config.workers);
        let ctx = self.context(threads, Arc::new(AtomicBool::new(false)));

        let (table, failed_shards) = self.run_pool(&split.shards, ctx)?;

        if !self.config.keep_shards {
            shard::remove_shards(&split.shards);
        }

        Ok(AnnotationRun {
            table,
            failed_shards,
            total_sequences: plan.total_sequences,
        })
    }

    /// Dispatch `shards` to the worker pool and merge what comes back.
    /// On error the abort flag of `ctx` is left raised.
    fn run_pool(
        &self,
        shards: &[PathBuf],
        ctx: WorkerContext,
    ) -> Result<(AnnotationTable, Vec<PathBuf>)> {
        let abort = Arc::clone(&ctx.abort);
        let collected = self.dispatch(shards, ctx);
        if collected.is_err() {
            abort.store(true, Ordering::Relaxed);
        }
        collected
    }

    fn dispatch(
        &self,
        shards: &[PathBuf],
        ctx: WorkerContext,
    ) -> Result<(AnnotationTable, Vec<PathBuf>)> {
        let workers = self.config.workers;
        let (task_tx, task_rx) = unbounded::<WorkItem>();
        let (result_tx, result_rx) = unbounded::<ShardOutcome>();
        let (exit_tx, exit_rx) = unbounded::<usize>();

        let closed = |what: &str| AnnotateError::Orchestration(format!("{what} channel closed"));

        for shard in shards {
            task_tx
                .send(WorkItem::Shard(shard.clone()))
                .map_err(|_| closed("task"))?;
        }
        for _ in 0..workers + EXTRA_STOP_ITEMS {
            task_tx.send(WorkItem::Stop).map_err(|_| closed("task"))?;
        }
        drop(task_tx);

        let mut handles = Vec::with_capacity(workers);
        for id in 1..=workers {
            let ctx = ctx.clone();
            let tasks = task_rx.clone();
            let results = result_tx.clone();
            let exits = exit_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("igsweep-worker-{id}"))
                .spawn(move || run_worker(id, ctx, tasks, results, exits))
                .map_err(|e| {
                    AnnotateError::Orchestration(format!("failed to start worker {id}: {e}"))
                })?;
            handles.push(handle);
        }
        // Only workers hold senders from here on, so a dead pool shows up as a disconnect
        drop(result_tx);
        drop(exit_tx);

        let mut table = AnnotationTable::empty(self.config.operation);
        let mut failed = Vec::new();
        for _ in 0..shards.len() {
            let outcome = result_rx.recv().map_err(|_| closed("results"))?;
            match outcome.result {
                Ok(partial) => table.append(partial)?,
                Err(_) => failed.push(outcome.shard),
            }
        }

        info!("[annotate] Results are being collated");

        for _ in 0..workers {
            exit_rx
                .recv()
                .map_err(|_| closed("exit acknowledgement"))?;
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("[annotate] A worker thread terminated abnormally");
            }
        }

        Ok((table, failed))
    }

    fn log_summary(&self, run: &AnnotationRun) {
        info!(
            "[annotate] {} of {} sequences annotated ({})",
            run.table.len(),
            run.total_sequences,
            self.config.operation
        );
        let filtered = run.table.filtered_ids().len();
        if filtered > 0 {
            info!("[annotate] Total filtered sequences: {}", filtered);
        }
        if run.has_parse_warnings() {
            warn!(
                "[annotate] Parse warnings occurred: {} report section(s) were skipped",
                run.table.corrupted_sections()
            );
        } else {
            info!("[annotate] No parse warnings");
        }
        for shard in &run.failed_shards {
            warn!("[annotate] No results from {}", file_name(shard));
        }
    }
}

/// Convenience wrapper around [`Annotator`]
pub fn annotate_fasta(
    input: &Path,
    config: &AnnotateConfig,
    aligner: Arc<dyn Aligner>,
) -> Result<AnnotationRun> {
    Annotator::new(config.clone(), aligner).annotate(input)
}
