//! Shard planning and FASTA splitting
//!
//! Large inputs are cut into `part1..partT` files so each worker owns one
//! shard at a time. Shards are written through a temporary file and renamed
//! into place, in order, so the presence of the last shard (or of its
//! aligner report) means a previous split completed and can be reused.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::fasta::{self, FastaReader};

/// Extension of the aligner report that stands next to every shard
pub const REPORT_EXTENSION: &str = "out";

/// How an input of `total` sequences is distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    pub total_sequences: usize,
    pub total_files: usize,
    pub seqs_per_file: usize,
}

impl ShardPlan {
    /// Too small (or too few workers) to be worth splitting
    pub fn is_single(&self) -> bool {
        self.total_files <= 1
    }

    /// Aligner threads each worker may use for one shard
    pub fn threads_per_shard(&self, workers: usize) -> usize {
        workers.div_ceil(self.total_files.max(1)).max(1)
    }
}

/// Work out shard count and size.
///
/// `T = ceil(total / S)`; when that leaves workers idle the shard size is
/// shrunk to `total / workers` so every worker gets a shard.
pub fn plan_shards(total_sequences: usize, seqs_per_file: usize, workers: usize) -> ShardPlan {
    let workers = workers.max(1);
    let mut seqs_per_file = seqs_per_file.max(1);

    if workers == 1 || total_sequences <= seqs_per_file {
        return ShardPlan {
            total_sequences,
            total_files: 1,
            seqs_per_file: total_sequences.max(1),
        };
    }

    let mut total_files = total_sequences.div_ceil(seqs_per_file);
    if total_files < workers {
        seqs_per_file = (total_sequences / workers).max(1);
        total_files = total_sequences.div_ceil(seqs_per_file);
    }

    ShardPlan {
        total_sequences,
        total_files,
        seqs_per_file,
    }
}

/// Read-end prefix for shard names: `sample_R1.fasta` gives `R1_`
pub fn read_end_prefix(input: &Path) -> String {
    let stem = input
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.split('.').next())
        .unwrap_or("");

    match stem.find("_R") {
        Some(idx) => {
            let end: String = stem[idx + 1..].chars().take(2).collect();
            format!("{end}_")
        }
        None => String::new(),
    }
}

/// Shard extension taken from the input: `reads.fa.gz` gives `.fa`.
/// Shards are always plain text, so a compression suffix is dropped.
pub fn shard_extension(input: &Path) -> String {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let name = name
        .strip_suffix(".gz")
        .or_else(|| name.strip_suffix(".bgz"))
        .unwrap_or(name);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => format!(".{ext}"),
        _ => ".fasta".to_string(),
    }
}

/// Where and how shards are written
#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub dir: PathBuf,
    pub prefix: String,
    /// Shard file extension including the dot, e.g. `.fasta`
    pub ext: String,
    pub total_files: usize,
    pub seqs_per_file: usize,
    /// Keep only the first N bases of every sequence (0 keeps them whole)
    pub trim_to: usize,
}

impl SplitOptions {
    pub fn new(dir: impl Into<PathBuf>, plan: &ShardPlan) -> Self {
        Self {
            dir: dir.into(),
            prefix: String::new(),
            ext: ".fasta".to_string(),
            total_files: plan.total_files.max(1),
            seqs_per_file: plan.seqs_per_file.max(1),
            trim_to: 0,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = ext.into();
        self
    }

    pub fn with_trim(mut self, trim_to: usize) -> Self {
        self.trim_to = trim_to;
        self
    }

    /// Path of shard `index` (1-based)
    pub fn shard_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}part{}{}", self.prefix, index, self.ext))
    }

    pub fn shard_paths(&self) -> Vec<PathBuf> {
        (1..=self.total_files).map(|i| self.shard_path(i)).collect()
    }

    /// Whether an earlier run already produced the terminal shard or its report
    pub fn is_complete(&self) -> bool {
        let last = self.shard_path(self.total_files);
        last.exists() || last.with_extension(REPORT_EXTENSION).exists()
    }
}

/// Outcome of a split request
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub shards: Vec<PathBuf>,
    /// Records written; 0 when an earlier split was reused
    pub written: usize,
    pub reused: bool,
}

/// Partition `input` into `options.total_files` shard files.
///
/// Shard `i` receives records `(i-1)*S .. i*S`; the last shard also absorbs
/// anything beyond `T*S`. Input order is kept within every shard.
pub fn split_fasta(input: &Path, options: &SplitOptions) -> Result<SplitResult> {
    let shards = options.shard_paths();

    if options.is_complete() {
        info!(
            "[split] Shards found in {}, skipping split",
            options.dir.display()
        );
        return Ok(SplitResult {
            shards,
            written: 0,
            reused: true,
        });
    }

    let mut reader = FastaReader::open(input)?;

    fs::create_dir_all(&options.dir).with_context(|| {
        format!("Failed to create shard directory: {}", options.dir.display())
    })?;

    info!(
        "[split] Distributing sequences into {} shard(s) of up to {} sequences",
        options.total_files, options.seqs_per_file
    );

    let mut current: Option<(usize, BufWriter<NamedTempFile>)> = None;
    let mut written = 0usize;

    while let Some(mut record) = reader.read_next()? {
        let index = (written / options.seqs_per_file + 1).min(options.total_files);

        if current.as_ref().map(|(i, _)| *i) != Some(index) {
            if let Some((done, writer)) = current.take() {
                persist_shard(writer, &options.shard_path(done))?;
            }
            let temp = NamedTempFile::new_in(&options.dir).with_context(|| {
                format!("Failed to create shard in {}", options.dir.display())
            })?;
            current = Some((index, BufWriter::new(temp)));
        }

        if options.trim_to > 0 && record.sequence.len() > options.trim_to {
            record.sequence.truncate(options.trim_to);
        }

        if let Some((_, writer)) = current.as_mut() {
            fasta::write_record(writer, &record)?;
        }
        written += 1;
    }

    // Inputs shorter than the plan still produce every shard the workers expect
    let last_written = current.as_ref().map(|(i, _)| *i).unwrap_or(0);
    for index in last_written + 1..options.total_files {
        create_empty_shard(&options.shard_path(index), &options.dir)?;
    }
    if let Some((done, writer)) = current.take() {
        persist_shard(writer, &options.shard_path(done))?;
    }
    if last_written < options.total_files {
        create_empty_shard(&options.shard_path(options.total_files), &options.dir)?;
    }

    debug!("[split] Wrote {} sequences", written);

    Ok(SplitResult {
        shards,
        written,
        reused: false,
    })
}

fn persist_shard(writer: BufWriter<NamedTempFile>, path: &Path) -> Result<()> {
    let temp = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to flush shard {}", path.display()))?;
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write shard {}", path.display()))?;
    Ok(())
}

fn create_empty_shard(path: &Path, dir: &Path) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create shard in {}", dir.display()))?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write shard {}", path.display()))?;
    Ok(())
}

/// Remove shard FASTA files; aligner reports are left for reuse
pub fn remove_shards(shards: &[PathBuf]) {
    for shard in shards {
        if let Err(e) = fs::remove_file(shard) {
            debug!("[split] Could not remove {}: {}", shard.display(), e);
        }
    }
}
