//! Cutting a read into its framework and CDR substrings

use anyhow::{bail, Result};

use crate::record::{AnnotationRecord, Region, RegionBounds};

/// Slice `seq` with 1-based inclusive bounds
fn slice<'a>(seq: &'a str, region: Region, bounds: &RegionBounds) -> Result<&'a str> {
    let (Some(start), Some(end)) = (bounds.start, bounds.end) else {
        bail!("{} boundaries are missing", region.label());
    };
    if start < 1 || end < start || end as usize > seq.len() {
        bail!(
            "{} boundaries {}..{} do not fit a sequence of length {}",
            region.label(),
            start,
            end,
            seq.len()
        );
    }
    seq.get(start as usize - 1..end as usize)
        .ok_or_else(|| anyhow::anyhow!("{} boundaries split a character", region.label()))
}

/// Split `seq` into the seven regions FR1, CDR1, FR2, CDR2, FR3, CDR3, FR4.
///
/// FR1 through FR3 must be present. CDR3 and FR4 are often not reported
/// (reads ending before the J gene) and come back as empty strings. The
/// pieces, joined, must occur in `seq` or the record does not describe it.
pub fn partition_sequence(seq: &str, record: &AnnotationRecord) -> Result<Vec<String>> {
    let mut parts = Vec::with_capacity(Region::ALL.len());

    for region in Region::ALL {
        let bounds = record.region(region);
        let optional = matches!(region, Region::Cdr3 | Region::Fr4);
        if optional && !bounds.is_present() {
            parts.push(String::new());
            continue;
        }
        parts.push(slice(seq, region, bounds)?.to_string());
    }

    let joined = parts.concat();
    if !seq.contains(joined.as_str()) {
        bail!(
            "Regions of {} do not reassemble into its sequence",
            record.query_id
        );
    }
    Ok(parts)
}
