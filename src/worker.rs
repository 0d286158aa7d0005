//! Annotation worker task loop
//!
//! A worker pulls [`WorkItem`]s until it sees [`WorkItem::Stop`], runs the
//! aligner and the report parser on each shard, and sends exactly one
//! [`ShardOutcome`] per shard. A failing shard (error or panic) becomes a
//! failed outcome; the worker keeps going.

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::aligner::{file_name, Aligner};
use crate::config::Operation;
use crate::error::AnnotateError;
use crate::igblast_report::parse_report;
use crate::progress::ProgressCounter;
use crate::table::AnnotationTable;
use crate::thresholds::FilterThresholds;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Shard(PathBuf),
    /// Poison pill: acknowledge and exit
    Stop,
}

/// Result of one shard; `Err` means the shard contributed nothing
#[derive(Debug)]
pub struct ShardOutcome {
    pub shard: PathBuf,
    pub worker: usize,
    pub result: Result<AnnotationTable>,
}

/// Everything a worker needs besides its channels
#[derive(Clone)]
pub struct WorkerContext {
    pub operation: Operation,
    pub thresholds: FilterThresholds,
    /// Aligner threads per shard
    pub threads: usize,
    pub aligner: Arc<dyn Aligner>,
    pub progress: ProgressCounter,
    /// Raised by the coordinator when it gives up on the run
    pub abort: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Align and parse a single shard
    pub fn process_shard(&self, shard: &Path) -> Result<AnnotationTable> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(AnnotateError::Aborted {
                shard: shard.to_path_buf(),
            }
            .into());
        }
        let report = self.aligner.align(shard, self.threads, &self.abort)?;
        parse_report(&report, self.operation, &self.thresholds)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker body. Returns after a `Stop` item (or when the task channel closes),
/// having sent its id on `exits`.
pub fn run_worker(
    id: usize,
    ctx: WorkerContext,
    tasks: Receiver<WorkItem>,
    results: Sender<ShardOutcome>,
    exits: Sender<usize>,
) {
    debug!("[worker {id}] started");

    while let Ok(item) = tasks.recv() {
        let shard = match item {
            WorkItem::Shard(shard) => shard,
            WorkItem::Stop => break,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| ctx.process_shard(&shard)))
            .unwrap_or_else(|payload| {
                Err(anyhow!(
                    "worker panicked: {}",
                    panic_message(payload.as_ref())
                ))
            });

        match &result {
            Ok(table) => {
                let collected = ctx.progress.increment_by(table.len());
                info!("[worker {id}] {collected} sequences collected so far");
                let filtered = table.filtered_ids().len();
                if filtered > 0 {
                    info!("[worker {id}] {filtered} unexpected alignments were filtered out");
                }
            }
            Err(e) => {
                error!("[worker {id}] Shard {} failed: {:#}", file_name(&shard), e);
            }
        }

        let outcome = ShardOutcome {
            shard,
            worker: id,
            result,
        };
        if results.send(outcome).is_err() {
            // Coordinator is gone; nothing left to report to
            break;
        }
    }

    let _ = exits.send(id);
    debug!("[worker {id}] exiting");
}
