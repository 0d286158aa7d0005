//! Top V-hit coordinates and strand (`aligninfo` task)

use anyhow::Result;
use std::io::BufRead;

use crate::igblast_report::for_each_top_v_hit;
use crate::record::AlignInfoRecord;
use crate::table::AlignInfoTable;
use crate::thresholds::FilterThresholds;

/// One [`AlignInfoRecord`] per query whose top V hit passes `thresholds`.
///
/// IgBLAST reports reverse-complemented queries as `reversed|ID`; the
/// identifier is unwrapped and the strand recorded.
pub fn parse_align_info<R: BufRead>(
    reader: R,
    thresholds: &FilterThresholds,
) -> Result<AlignInfoTable> {
    let mut table = AlignInfoTable::default();

    let corrupted = for_each_top_v_hit(reader, |query_id, hit| {
        if !hit.passes(thresholds) {
            table.filtered_ids.push(query_id.to_string());
            return;
        }
        let (id, strand) = hit.query_strand();
        table.records.push(AlignInfoRecord {
            query_id: id.to_string(),
            subject_id: hit.subject().to_string(),
            qstart: hit.qstart(),
            sstart: hit.sstart(),
            strand,
        });
    })?;

    table.corrupted_sections = corrupted;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Strand;
    use std::io::Cursor;

    const REPORT: &str = "\
# Query: read1
# Hit table (the first field indicates the chain type of the hit)
# Fields: query id, subject id, % identity, alignment length, mismatches, gap opens, gaps, q. start, q. end, s. start, s. end, evalue, bit score
# 2 hits found
V\treversed|read1\tIGHV4-34*01\t97.30\t296\t8\t0\t0\t12\t307\t1\t296\t2e-110\t410
J\treversed|read1\tIGHJ6*02\t95.00\t60\t3\t0\t0\t340\t399\t4\t63\t1e-20\t90
# Query: read2
# Hit table (the first field indicates the chain type of the hit)
# Fields: query id, subject id, % identity, alignment length, mismatches, gap opens, gaps, q. start, q. end, s. start, s. end, evalue, bit score
# 1 hits found
V\tread2\tIGHV1-69*01\t99.00\t290\t3\t0\t0\t1\t290\t7\t296\t1e-115\t430
";

    #[test]
    fn test_reversed_query_unwrapped() {
        let table = parse_align_info(Cursor::new(REPORT), &FilterThresholds::default()).unwrap();
        assert_eq!(table.records.len(), 2);

        let first = &table.records[0];
        assert_eq!(first.query_id, "read1");
        assert_eq!(first.subject_id, "IGHV4-34*01");
        assert_eq!(first.qstart, Some(12));
        assert_eq!(first.strand, Strand::Reversed);
        assert_eq!(table.records[1].strand, Strand::Forward);
    }

    #[test]
    fn test_subject_start_gate() {
        let thresholds = FilterThresholds::new(0.0..=f64::INFINITY, 0..=i64::MAX, 1..=3);
        let table = parse_align_info(Cursor::new(REPORT), &thresholds).unwrap();
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.filtered_ids, vec!["read2".to_string()]);
    }
}
