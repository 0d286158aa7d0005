use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use igsweep::output::write_outputs;
use igsweep::thresholds::{parse_float_range, parse_int_range};
use igsweep::{annotate_fasta, AnnotateConfig, ChainType, FilterThresholds, IgBlast, Operation, SeqType};

/// Parse a number that may have metric suffix (k/K=1000, m/M=1e6, g/G=1e9)
/// Supports decimals like "1.5k" = 1500
fn parse_metric_number(s: &str) -> Result<usize, String> {
    if s.is_empty() {
        return Err("Empty string".to_string());
    }

    let (num_part, suffix) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - c.len_utf8()], Some(c)),
        _ => (s, None),
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some('g') | Some('G') => 1_000_000_000.0,
        Some(c) => {
            return Err(format!(
                "Unknown suffix '{c}'. Use k/K (1000), m/M (1e6), or g/G (1e9)"
            ))
        }
        None => 1.0,
    };

    let result = base * multiplier;

    if result < 0.0 || result > usize::MAX as f64 {
        return Err(format!("Value {result} out of range"));
    }

    Ok(result as usize)
}

/// igsweep - parallel IgBLAST annotation of antibody repertoires
///
/// Splits a FASTA file into shards, runs IgBLAST on them with a pool of
/// workers and collates V/D/J gene calls and FR/CDR boundaries per read
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Input FASTA (plain, gzip or bgzip-compressed)
    #[clap(value_name = "FASTA")]
    input: PathBuf,

    /// Output directory
    #[clap(short = 'o', long = "outdir", default_value = ".")]
    outdir: PathBuf,

    /// Number of concurrent workers
    #[clap(short = 't', long = "threads", default_value = "8")]
    threads: usize,

    /// Target number of sequences per shard
    #[clap(long = "seqs-per-file", default_value = "100k", value_parser = parse_metric_number)]
    seqs_per_file: usize,

    /// Chain type: hv, kv or lv
    #[clap(long = "chain", default_value = "hv")]
    chain: ChainType,

    /// Sequence type: dna or protein
    #[clap(long = "seqtype", default_value = "dna")]
    seq_type: SeqType,

    /// What to extract: cdrinfo, abundance or aligninfo
    #[clap(long = "task", default_value = "cdrinfo")]
    task: Operation,

    /// Accepted bit score range of the top V hit (MIN:MAX, inf allowed)
    #[clap(long = "bitscore", default_value = "0:inf", value_parser = parse_float_range)]
    bitscore: RangeInclusive<f64>,

    /// Accepted alignment length range of the top V hit
    #[clap(long = "alignlen", default_value = "0:inf", value_parser = parse_int_range)]
    alignlen: RangeInclusive<i64>,

    /// Accepted subject start range of the top V hit
    #[clap(long = "sstart", default_value = "1:inf", value_parser = parse_int_range)]
    sstart: RangeInclusive<i64>,

    /// Directory containing the IMGT germline databases
    #[clap(long = "database", env = "IGBLASTDB")]
    database: PathBuf,

    /// IgBLAST auxiliary data file (J gene frame annotation)
    #[clap(long = "auxiliary")]
    auxiliary: Option<PathBuf>,

    /// IgBLAST binary to run instead of `igblastn`/`igblastp` from PATH
    #[clap(long = "igblast", value_name = "PATH")]
    igblast: Option<PathBuf>,

    /// Organism of the germline databases
    #[clap(long = "organism", default_value = "human")]
    organism: String,

    /// Trim every sequence to its first N bases before annotation (0 = off)
    #[clap(long = "primer", default_value = "0")]
    primer: usize,

    /// Kill an IgBLAST run after this many seconds (0 = never)
    #[clap(long = "aligner-timeout", default_value = "0")]
    aligner_timeout: u64,

    /// Keep shard FASTA files after a successful run
    #[clap(long = "keep-shards")]
    keep_shards: bool,

    /// Only print warnings and errors
    #[clap(long = "quiet", conflicts_with = "verbose")]
    quiet: bool,

    /// Print debug messages
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,
}

fn sample_name(input: &Path) -> String {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());
    let name = name
        .strip_suffix(".gz")
        .or_else(|| name.strip_suffix(".bgz"))
        .unwrap_or(&name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        log::LevelFilter::Warn
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let timeout = Duration::from_secs(args.aligner_timeout);
    let config = AnnotateConfig::new(args.chain, &args.database)
        .with_seq_type(args.seq_type)
        .with_operation(args.task)
        .with_thresholds(FilterThresholds::new(
            args.bitscore.clone(),
            args.alignlen.clone(),
            args.sstart.clone(),
        ))
        .with_workers(args.threads)
        .with_seqs_per_file(args.seqs_per_file)
        .with_primer(args.primer)
        .with_shard_dir(args.outdir.join("tmp"))
        .with_aligner_timeout(Some(timeout))
        .with_keep_shards(args.keep_shards);

    let aligner = IgBlast::from_config(&config)
        .with_organism(args.organism.clone())
        .with_auxiliary(args.auxiliary.clone())
        .with_executable(args.igblast.clone());

    let run = annotate_fasta(&args.input, &config, Arc::new(aligner))
        .with_context(|| format!("Annotation of {} failed", args.input.display()))?;

    let name = sample_name(&args.input);
    write_outputs(&args.outdir, &name, &run.table)?;

    if !run.failed_shards.is_empty() {
        warn!(
            "{} shard(s) failed; their sequences are missing from the results",
            run.failed_shards.len()
        );
    }
    info!(
        "Done: {} records, {} filtered, parse warnings: {}",
        run.table.len(),
        run.table.filtered_ids().len(),
        if run.has_parse_warnings() { "yes" } else { "no" }
    );

    Ok(())
}
