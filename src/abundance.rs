//! Top V-hit statistics and V-gene tallies (`abundance` task)

use anyhow::Result;
use std::io::BufRead;

use crate::igblast_report::for_each_top_v_hit;
use crate::record::AbundanceRecord;
use crate::table::AbundanceTable;
use crate::thresholds::FilterThresholds;

/// Collect one [`AbundanceRecord`] per query whose top V hit passes the
/// thresholds and count it against the hit's subject. Queries whose top V hit
/// fails go to `filtered_ids`; queries without hits or without a V top hit
/// appear in neither.
pub fn parse_abundance<R: BufRead>(
    reader: R,
    thresholds: &FilterThresholds,
) -> Result<AbundanceTable> {
    let mut table = AbundanceTable::default();

    let corrupted = for_each_top_v_hit(reader, |query_id, hit| {
        if !hit.passes(thresholds) {
            table.filtered_ids.push(query_id.to_string());
            return;
        }
        table.add_gene(hit.subject(), 1);
        table.records.push(AbundanceRecord {
            query_id: query_id.to_string(),
            identity: hit.identity(),
            align_len: hit.align_len(),
            bit_score: hit.bit_score,
            qstart: hit.qstart(),
            sstart: hit.sstart(),
            mismatches: hit.mismatches(),
            gaps: hit.gaps(),
        });
    })?;

    table.corrupted_sections = corrupted;
    Ok(table)
}
