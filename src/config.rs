//! Run configuration shared by the splitter, workers and coordinator

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::thresholds::FilterThresholds;

/// Immunoglobulin chain the germline databases are chosen for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainType {
    Heavy,  // hv
    Kappa,  // kv
    Lambda, // lv
}

impl ChainType {
    /// Locus letter used in IMGT database names (`ighv`, `igkv`, `iglv`)
    pub fn locus(&self) -> char {
        match self {
            ChainType::Heavy => 'h',
            ChainType::Kappa => 'k',
            ChainType::Lambda => 'l',
        }
    }
}

impl FromStr for ChainType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hv" | "heavy" | "igh" => Ok(ChainType::Heavy),
            "kv" | "kappa" | "igk" => Ok(ChainType::Kappa),
            "lv" | "lambda" | "igl" => Ok(ChainType::Lambda),
            _ => anyhow::bail!("Unsupported chain type '{}'. Valid chains: hv, kv, lv", s),
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainType::Heavy => "hv",
            ChainType::Kappa => "kv",
            ChainType::Lambda => "lv",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqType {
    Dna,
    Protein,
}

impl FromStr for SeqType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dna" | "nt" => Ok(SeqType::Dna),
            "protein" | "aa" => Ok(SeqType::Protein),
            _ => anyhow::bail!("Unsupported sequence type '{}'. Valid types: dna, protein", s),
        }
    }
}

/// Which record shape the report parser produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Abundance,
    AlignInfo,
    CdrInfo,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Abundance => "abundance",
            Operation::AlignInfo => "aligninfo",
            Operation::CdrInfo => "cdrinfo",
        }
    }
}

impl FromStr for Operation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abundance" => Ok(Operation::Abundance),
            "aligninfo" => Ok(Operation::AlignInfo),
            "cdrinfo" => Ok(Operation::CdrInfo),
            _ => anyhow::bail!(
                "Unknown task '{}'. Valid tasks: abundance, aligninfo, cdrinfo",
                s
            ),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Everything an annotation run needs
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    pub chain: ChainType,
    pub seq_type: SeqType,
    pub operation: Operation,
    pub thresholds: FilterThresholds,
    /// Directory holding the IMGT germline databases
    pub database: PathBuf,
    /// Number of concurrent workers
    pub workers: usize,
    /// Target number of sequences per shard
    pub seqs_per_file: usize,
    /// Truncate sequences to this many bases before sharding (0 keeps them whole)
    pub primer: usize,
    /// Directory that receives shard files and aligner reports
    pub shard_dir: PathBuf,
    /// Kill the aligner after this long; `None` waits forever
    pub aligner_timeout: Option<Duration>,
    pub keep_shards: bool,
}

impl AnnotateConfig {
    pub fn new(chain: ChainType, database: impl Into<PathBuf>) -> Self {
        Self {
            chain,
            seq_type: SeqType::Dna,
            operation: Operation::CdrInfo,
            thresholds: FilterThresholds::default(),
            database: database.into(),
            workers: 8,
            seqs_per_file: 100_000,
            primer: 0,
            shard_dir: PathBuf::from("tmp"),
            aligner_timeout: None,
            keep_shards: false,
        }
    }

    pub fn with_seq_type(mut self, seq_type: SeqType) -> Self {
        self.seq_type = seq_type;
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_thresholds(mut self, thresholds: FilterThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_seqs_per_file(mut self, seqs_per_file: usize) -> Self {
        self.seqs_per_file = seqs_per_file.max(1);
        self
    }

    pub fn with_primer(mut self, primer: usize) -> Self {
        self.primer = primer;
        self
    }

    pub fn with_shard_dir(mut self, shard_dir: impl Into<PathBuf>) -> Self {
        self.shard_dir = shard_dir.into();
        self
    }

    pub fn with_aligner_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.aligner_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_keep_shards(mut self, keep: bool) -> Self {
        self.keep_shards = keep;
        self
    }
}
