
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use igsweep::table::AnnotationTable;
use igsweep::{annotate_fasta, AnnotateConfig, ChainType, Operation};
use test_utils::{create_numbered_fasta, FakeAligner};

fn config(dir: &Path, workers: usize, seqs_per_file: usize) -> AnnotateConfig {
    AnnotateConfig::new(ChainType::Heavy, "/db")
        .with_workers(workers)
        .with_seqs_per_file(seqs_per_file)
        .with_shard_dir(dir.join("shards"))
}

fn query_ids(table: &AnnotationTable) -> Vec<String> {
    match table {
        AnnotationTable::CdrInfo(t) => t.records.iter().map(|r| r.query_id.clone()).collect(),
        AnnotationTable::Abundance(t) => t.records.iter().map(|r| r.query_id.clone()).collect(),
        AnnotationTable::AlignInfo(t) => t.records.iter().map(|r| r.query_id.clone()).collect(),
    }
}

#[test]
fn test_sharded_run_annotates_every_sequence() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    let ids = create_numbered_fasta(&input, 250);

    let aligner = Arc::new(FakeAligner::new());
    let run = annotate_fasta(&input, &config(dir.path(), 3, 100), aligner.clone())?;

    assert_eq!(run.total_sequences, 250);
    assert!(run.failed_shards.is_empty());
    assert!(!run.has_parse_warnings());
    assert_eq!(run.table.len(), 250);
    assert_eq!(aligner.run_count(), 3);

    let got: HashSet<String> = query_ids(&run.table).into_iter().collect();
    let expected: HashSet<String> = ids.into_iter().collect();
    assert_eq!(got.len(), 250);
    assert_eq!(got, expected);
    Ok(())
}

#[test]
fn test_failing_shard_is_reported_not_fatal() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    create_numbered_fasta(&input, 500);

    let aligner = Arc::new(FakeAligner::failing_on("part2"));
    let run = annotate_fasta(&input, &config(dir.path(), 2, 100), aligner)?;

    assert_eq!(run.table.len(), 400);
    assert_eq!(run.failed_shards.len(), 1);
    assert!(run.failed_shards[0].ends_with("part2.fasta"));

    let ids: HashSet<String> = query_ids(&run.table).into_iter().collect();
    // Shard 2 held seq101..seq200
    assert!(!ids.contains("seq150"));
    assert!(ids.contains("seq100"));
    assert!(ids.contains("seq201"));
    Ok(())
}

#[test]
fn test_panicking_worker_does_not_hang_the_pool() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    create_numbered_fasta(&input, 500);

    let aligner = Arc::new(FakeAligner::panicking_on("part4"));
    let run = annotate_fasta(&input, &config(dir.path(), 2, 100), aligner)?;

    assert_eq!(run.table.len(), 400);
    assert_eq!(run.failed_shards.len(), 1);
    assert!(run.failed_shards[0].ends_with("part4.fasta"));
    Ok(())
}

#[test]
fn test_small_input_skips_the_split() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    create_numbered_fasta(&input, 20);

    let aligner = Arc::new(FakeAligner::new());
    let run = annotate_fasta(&input, &config(dir.path(), 4, 100), aligner.clone())?;

    assert_eq!(run.table.len(), 20);
    let inputs = aligner.inputs.lock().unwrap().clone();
    assert_eq!(inputs, vec![input.clone()]);
    assert!(!dir.path().join("shards").exists());
    Ok(())
}

#[test]
fn test_primer_trim_stages_a_single_shard() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    create_numbered_fasta(&input, 20);

    let aligner = Arc::new(FakeAligner::new());
    let config = config(dir.path(), 4, 100).with_primer(30);
    let run = annotate_fasta(&input, &config, aligner.clone())?;

    assert_eq!(run.table.len(), 20);
    let staged = dir.path().join("shards").join("part1.fasta");
    assert_eq!(aligner.inputs.lock().unwrap().clone(), vec![staged.clone()]);
    assert!(!staged.exists());
    assert!(staged.with_extension("out").exists());
    Ok(())
}

#[test]
fn test_abundance_counts_merge_across_shards() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    create_numbered_fasta(&input, 250);

    let config = config(dir.path(), 3, 100).with_operation(Operation::Abundance);
    let run = annotate_fasta(&input, &config, Arc::new(FakeAligner::new()))?;

    let AnnotationTable::Abundance(table) = &run.table else {
        panic!("expected an abundance table");
    };
    assert_eq!(table.records.len(), 250);
    assert_eq!(table.gene_counts.values().sum::<usize>(), 250);
    assert_eq!(table.gene_counts.get("IGHV1-2*02"), Some(&125));
    assert_eq!(table.gene_counts.get("IGHV3-23*01"), Some(&125));
    assert!(table.filtered_ids.is_empty());
    Ok(())
}

#[test]
fn test_rerun_reuses_reports() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    create_numbered_fasta(&input, 300);
    let config = config(dir.path(), 3, 100);

    let aligner = Arc::new(FakeAligner::new());
    let first = annotate_fasta(&input, &config, aligner.clone())?;
    assert_eq!(aligner.run_count(), 3);

    let second = annotate_fasta(&input, &config, aligner.clone())?;
    assert_eq!(aligner.run_count(), 3);
    assert_eq!(second.table.len(), first.table.len());
    Ok(())
}

#[test]
fn test_shard_cleanup() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fasta");
    create_numbered_fasta(&input, 300);
    let shards = dir.path().join("shards");

    annotate_fasta(&input, &config(dir.path(), 3, 100), Arc::new(FakeAligner::new()))?;
    assert!(!shards.join("part1.fasta").exists());
    assert!(shards.join("part1.out").exists());

    let kept = TempDir::new()?;
    let input = kept.path().join("reads.fasta");
    create_numbered_fasta(&input, 300);
    let config = config(kept.path(), 3, 100).with_keep_shards(true);
    annotate_fasta(&input, &config, Arc::new(FakeAligner::new()))?;
    assert!(kept.path().join("shards").join("part3.fasta").exists());
    Ok(())
}

#[test]
fn test_shards_keep_the_input_extension() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("reads.fa");
    create_numbered_fasta(&input, 300);

    let config = config(dir.path(), 3, 100).with_keep_shards(true);
    let run = annotate_fasta(&input, &config, Arc::new(FakeAligner::new()))?;
    assert_eq!(run.table.len(), 300);

    let shards = dir.path().join("shards");
    for i in 1..=3 {
        assert!(shards.join(format!("part{i}.fa")).exists());
        assert!(shards.join(format!("part{i}.out")).exists());
    }
    assert!(!shards.join("part1.fasta").exists());
    Ok(())
}

#[test]
fn test_plain_gzip_input() -> Result<()> {
    use flate2::write::GzEncoder;
    use std::io::Write;

    let dir = TempDir::new()?;
    let plain = dir.path().join("plain.fasta");
    let ids = create_numbered_fasta(&plain, 250);
    let input = dir.path().join("reads.fasta.gz");
    let mut encoder = GzEncoder::new(std::fs::File::create(&input)?, flate2::Compression::default());
    encoder.write_all(&std::fs::read(&plain)?)?;
    encoder.finish()?;

    let config = config(dir.path(), 3, 100).with_keep_shards(true);
    let run = annotate_fasta(&input, &config, Arc::new(FakeAligner::new()))?;

    assert_eq!(run.total_sequences, 250);
    assert!(run.failed_shards.is_empty());
    let got: HashSet<String> = query_ids(&run.table).into_iter().collect();
    assert_eq!(got, ids.into_iter().collect::<HashSet<_>>());
    assert!(dir.path().join("shards").join("part3.fasta").exists());
    Ok(())
}

#[test]
fn test_missing_input_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = annotate_fasta(
        &dir.path().join("missing.fasta"),
        &config(dir.path(), 2, 10),
        Arc::new(FakeAligner::new()),
    );
    assert!(result.is_err());
}
