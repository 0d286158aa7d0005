//! Germline aligner invocation
//!
//! The pipeline only needs "turn this shard into a report file". The
//! [`Aligner`] trait is that seam; [`IgBlast`] drives the real `igblastn` /
//! `igblastp` binaries, and tests plug in canned reports instead.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{AnnotateConfig, ChainType, SeqType};
use crate::error::AnnotateError;
use crate::shard::REPORT_EXTENSION;

/// How often a running aligner is checked for exit, timeout and abort
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Produces an aligner report for one FASTA shard.
///
/// Implementations must be idempotent: when the report already exists it is
/// returned without rerunning anything.
pub trait Aligner: Send + Sync {
    /// Align `input` using up to `threads` threads and return the report path.
    /// `abort` is raised by the coordinator when the run is being torn down.
    fn align(&self, input: &Path, threads: usize, abort: &AtomicBool) -> Result<PathBuf>;
}

/// Report path for an input: same basename, `.out` extension
pub fn report_path(input: &Path) -> PathBuf {
    input.with_extension(REPORT_EXTENSION)
}

/// `igblastn` / `igblastp` against IMGT germline databases
#[derive(Debug, Clone)]
pub struct IgBlast {
    pub chain: ChainType,
    pub seq_type: SeqType,
    /// Directory containing `imgt_<organism>_ig*` databases
    pub database: PathBuf,
    pub organism: String,
    /// IgBLAST auxiliary data (J-gene frame annotation), DNA only
    pub auxiliary: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Binary to run instead of `igblastn`/`igblastp` from `PATH`
    pub executable: Option<PathBuf>,
}

impl IgBlast {
    pub fn new(chain: ChainType, seq_type: SeqType, database: impl Into<PathBuf>) -> Self {
        Self {
            chain,
            seq_type,
            database: database.into(),
            organism: "human".to_string(),
            auxiliary: None,
            timeout: None,
            executable: None,
        }
    }

    pub fn from_config(config: &AnnotateConfig) -> Self {
        Self::new(config.chain, config.seq_type, config.database.clone())
            .with_timeout(config.aligner_timeout)
    }

    pub fn with_organism(mut self, organism: impl Into<String>) -> Self {
        self.organism = organism.into();
        self
    }

    pub fn with_auxiliary(mut self, auxiliary: Option<PathBuf>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_executable(mut self, executable: Option<PathBuf>) -> Self {
        self.executable = executable;
        self
    }

    /// Path handed to `Command::new`
    pub fn executable(&self) -> &Path {
        self.executable
            .as_deref()
            .unwrap_or_else(|| Path::new(self.program()))
    }

    pub fn program(&self) -> &'static str {
        match self.seq_type {
            SeqType::Dna => "igblastn",
            SeqType::Protein => "igblastp",
        }
    }

    fn germline_db(&self, segment: &str) -> String {
        self.database
            .join(format!("imgt_{}_ig{}", self.organism, segment))
            .to_string_lossy()
            .into_owned()
    }

    /// Full argument list for one invocation
    pub fn arguments(&self, query: &Path, output: &Path, threads: usize) -> Vec<String> {
        let locus = self.chain.locus();
        let mut args = Vec::new();

        match self.seq_type {
            SeqType::Dna => {
                args.extend([
                    "-germline_db_V".to_string(),
                    self.germline_db(&format!("{locus}v")),
                    "-germline_db_J".to_string(),
                    self.germline_db(&format!("{locus}j")),
                    // IgBLAST insists on a D database even for light chains
                    "-germline_db_D".to_string(),
                    self.germline_db("hd"),
                ]);
            }
            SeqType::Protein => {
                args.extend([
                    "-germline_db_V".to_string(),
                    self.germline_db(&format!("{locus}v_p")),
                ]);
            }
        }

        args.extend([
            "-domain_system".to_string(),
            "imgt".to_string(),
            "-query".to_string(),
            query.to_string_lossy().into_owned(),
            "-organism".to_string(),
            self.organism.clone(),
        ]);

        if self.seq_type == SeqType::Dna {
            if let Some(aux) = &self.auxiliary {
                args.push("-auxiliary_data".to_string());
                args.push(aux.to_string_lossy().into_owned());
            }
            args.push("-show_translation".to_string());
        }

        args.extend([
            "-extend_align5end".to_string(),
            "-outfmt".to_string(),
            "7".to_string(),
            "-num_threads".to_string(),
            threads.max(1).to_string(),
            "-out".to_string(),
            output.to_string_lossy().into_owned(),
        ]);

        args
    }
}

impl Aligner for IgBlast {
    fn align(&self, input: &Path, threads: usize, abort: &AtomicBool) -> Result<PathBuf> {
        let report = report_path(input);
        let name = file_name(input);

        if report.exists() {
            info!("[igblast] IgBLAST results were found ... {}", file_name(&report));
            return Ok(report);
        }

        info!("[igblast] Running {} ... {}", self.program(), name);

        // Write to a side file first so an interrupted run never leaves a
        // truncated report that a rerun would pick up
        let partial = input.with_extension("out.partial");
        let stderr_path = input.with_extension("igblast.log");
        let stderr = File::create(&stderr_path)
            .with_context(|| format!("Failed to create {}", stderr_path.display()))?;

        let args = self.arguments(input, &partial, threads);
        debug!("[igblast] {} {}", self.program(), args.join(" "));

        let mut child = Command::new(self.executable())
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .with_context(|| format!("Failed to run {} on {}", self.program(), name))?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if abort.load(Ordering::Relaxed) {
                let _ = child.kill();
                let _ = child.wait();
                let _ = fs::remove_file(&partial);
                return Err(AnnotateError::Aborted {
                    shard: input.to_path_buf(),
                }
                .into());
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() > limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = fs::remove_file(&partial);
                    return Err(AnnotateError::AlignerTimeout {
                        shard: input.to_path_buf(),
                        seconds: limit.as_secs(),
                    }
                    .into());
                }
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let message = fs::read(&stderr_path)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            let _ = fs::remove_file(&partial);
            return Err(AnnotateError::AlignerFailed {
                shard: input.to_path_buf(),
                status: status.to_string(),
            })
            .with_context(|| message.trim().to_string());
        }

        fs::rename(&partial, &report)
            .with_context(|| format!("Failed to move report into {}", report.display()))?;
        let _ = fs::remove_file(&stderr_path);

        Ok(report)
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
