
use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;

use igsweep::abundance::parse_abundance;
use igsweep::cdr_info::parse_cdr_info;
use igsweep::output::write_outputs;
use igsweep::table::AnnotationTable;
use igsweep::FilterThresholds;
use test_utils::{render_report, Hit, QuerySection};

#[test]
fn test_cdrinfo_outputs() -> Result<()> {
    let dir = TempDir::new()?;
    let report = render_report(&[
        QuerySection::full("q1", "IGHV1-2*02"),
        QuerySection::new("q2"),
    ]);
    let table = AnnotationTable::CdrInfo(parse_cdr_info(
        Cursor::new(report),
        &FilterThresholds::default(),
    )?);

    let written = write_outputs(dir.path(), "S1", &table)?;
    assert_eq!(written, vec![dir.path().join("S1_cdrinfo.tsv")]);

    let text = fs::read_to_string(&written[0])?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("queryid\t"));
    assert_eq!(lines[0].split('\t').count(), 48);
    assert!(lines[1].starts_with("q1\tIGHV1-2*02\t"));
    assert!(lines[2].starts_with("q2\t"));
    assert!(lines.iter().all(|l| l.split('\t').count() == 48));
    Ok(())
}

#[test]
fn test_abundance_outputs() -> Result<()> {
    let dir = TempDir::new()?;
    let report = render_report(&[
        QuerySection::new("a").with_hit(Hit::v("IGHV3-23*01", 400.0, 290, 1)),
        QuerySection::new("b").with_hit(Hit::v("IGHV3-23*04", 400.0, 290, 1)),
        QuerySection::new("c").with_hit(Hit::v("IGHV3-30*18", 400.0, 290, 1)),
        QuerySection::new("d").with_hit(Hit::v("IGHV1-2*02", 400.0, 290, 1)),
        QuerySection::new("weak").with_hit(Hit::v("IGHV1-2*02", 20.0, 290, 1)),
    ]);
    let thresholds = FilterThresholds::new(100.0..=f64::INFINITY, 0..=i64::MAX, 1..=i64::MAX);
    let table = AnnotationTable::Abundance(parse_abundance(Cursor::new(report), &thresholds)?);

    let outdir = dir.path().join("results");
    let written = write_outputs(&outdir, "S1", &table)?;
    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "S1_abundance.tsv",
            "S1_filtered_ids.txt",
            "S1_vgene_variant.csv",
            "S1_vgene_gene.csv",
            "S1_vgene_family.csv",
        ]
    );

    assert_eq!(fs::read_to_string(outdir.join("S1_filtered_ids.txt"))?, "weak\n");

    let family = fs::read_to_string(outdir.join("S1_vgene_family.csv"))?;
    assert_eq!(
        family,
        "Class,Count,Proportion\nIGHV3,3,75.00\nIGHV1,1,25.00\nTOTAL,4,100.00\n"
    );

    let gene = fs::read_to_string(outdir.join("S1_vgene_gene.csv"))?;
    let gene_lines: Vec<&str> = gene.lines().collect();
    assert_eq!(gene_lines[1], "IGHV3-23,2,50.00");
    assert_eq!(gene_lines.last().copied(), Some("TOTAL,4,100.00"));
    Ok(())
}

#[test]
fn test_empty_table_writes_header_only() -> Result<()> {
    let dir = TempDir::new()?;
    let table = AnnotationTable::empty(igsweep::Operation::AlignInfo);
    let written = write_outputs(dir.path(), "empty", &table)?;
    assert_eq!(written.len(), 1);
    assert_eq!(fs::read_to_string(&written[0])?.lines().count(), 1);
    Ok(())
}
