//! Writing annotation results to disk
//!
//! - `<name>_<task>.tsv`: one row per record
//! - `<name>_filtered_ids.txt`: queries rejected by the thresholds
//! - `<name>_vgene_{variant,gene,family}.csv`: V-gene histograms (abundance only)

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::info;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::table::AnnotationTable;

/// Histogram granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountLevel {
    Variant, // allele, e.g. IGHV3-23*01
    Gene,    // IGHV3-23
    Family,  // IGHV3
}

impl CountLevel {
    pub const ALL: [CountLevel; 3] = [CountLevel::Variant, CountLevel::Gene, CountLevel::Family];

    pub fn name(&self) -> &'static str {
        match self {
            CountLevel::Variant => "variant",
            CountLevel::Gene => "gene",
            CountLevel::Family => "family",
        }
    }

    /// Collapse an allele name to this level
    pub fn key<'a>(&self, allele: &'a str) -> &'a str {
        match self {
            CountLevel::Variant => allele,
            CountLevel::Gene => allele.split('*').next().unwrap_or(allele),
            CountLevel::Family => {
                let family = allele
                    .split(['-', '/'])
                    .next()
                    .unwrap_or(allele);
                // Duplicated genes (IGKV1D-39) do not form their own family
                family.trim_end_matches('D')
            }
        }
    }
}

/// Sum allele counts into `level` buckets, keeping first-seen order
pub fn collapse_counts(counts: &IndexMap<String, usize>, level: CountLevel) -> IndexMap<String, usize> {
    let mut collapsed = IndexMap::new();
    for (allele, count) in counts {
        *collapsed
            .entry(level.key(allele).to_string())
            .or_insert(0) += count;
    }
    collapsed
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Write the table as tab-separated text with a header row
pub fn write_table<W: Write>(out: &mut W, table: &AnnotationTable) -> Result<()> {
    writeln!(out, "{}", table.header().join("\t"))?;
    for row in table.rows() {
        writeln!(out, "{}", row.join("\t"))?;
    }
    Ok(())
}

pub fn write_ids<W: Write>(out: &mut W, ids: &[String]) -> Result<()> {
    for id in ids {
        writeln!(out, "{id}")?;
    }
    Ok(())
}

/// Write counts as CSV, most abundant first, followed by a `TOTAL` row
pub fn write_counts<W: Write>(out: &mut W, counts: &IndexMap<String, usize>) -> Result<()> {
    let total: usize = counts.values().sum();
    let mut sorted: Vec<(&String, &usize)> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1));

    writeln!(out, "Class,Count,Proportion")?;
    for (name, count) in sorted {
        let proportion = if total > 0 {
            *count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        writeln!(out, "{name},{count},{proportion:.2}")?;
    }
    writeln!(out, "TOTAL,{total},100.00")?;
    Ok(())
}

/// Write every output file for `table` under `outdir` and return their paths
pub fn write_outputs(outdir: &Path, name: &str, table: &AnnotationTable) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(outdir)
        .with_context(|| format!("Failed to create output directory: {}", outdir.display()))?;
    let mut written = Vec::new();

    let table_path = outdir.join(format!("{}_{}.tsv", name, table.operation()));
    let mut out = create(&table_path)?;
    write_table(&mut out, table)?;
    out.flush()?;
    written.push(table_path);

    if !table.filtered_ids().is_empty() {
        let ids_path = outdir.join(format!("{name}_filtered_ids.txt"));
        let mut out = create(&ids_path)?;
        write_ids(&mut out, table.filtered_ids())?;
        out.flush()?;
        written.push(ids_path);
    }

    if let AnnotationTable::Abundance(abundance) = table {
        for level in CountLevel::ALL {
            let path = outdir.join(format!("{}_vgene_{}.csv", name, level.name()));
            let mut out = create(&path)?;
            write_counts(&mut out, &collapse_counts(&abundance.gene_counts, level))?;
            out.flush()?;
            written.push(path);
        }
    }

    for path in &written {
        info!("[output] A text file has been created ... {}", crate::aligner::file_name(path));
    }
    Ok(written)
}
