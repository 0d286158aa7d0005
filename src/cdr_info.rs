//! Full FR/CDR annotation of every query section (`cdrinfo` task)
//!
//! Each section is walked by an explicit state machine:
//!
//! ```text
//! SeekQuery -> SeekRearrangement -> ParseRearrangement -> SeekRegionSummary
//!   -> ParseRegions -> SeekHitsHeader -> ParseHitCount -> ParseVHit
//!   -> ParseDHit -> ParseJHit -> Emit
//! ```
//!
//! Reaching the next `# Query` line or the end of input in any state jumps
//! straight to `Emit`: whatever was filled in so far is kept and the rest
//! stays `None`. Only a malformed row (a [`SectionError`]) discards the
//! section, and that is counted rather than propagated.

use anyhow::Result;
use log::debug;
use std::io::BufRead;

use crate::error::SectionError;
use crate::igblast_report::{
    hit_count, query_id, to_int, HitRow, ReportScanner, Seek, ALIGNMENT_SUMMARY_MARKER,
    FIELDS_MARKER, REARRANGEMENT_MARKER,
};
use crate::record::{
    AnnotationRecord, FrameStatus, GeneAlignment, Region, RegionBounds, StopCodon, Strand,
};
use crate::table::CdrTable;
use crate::thresholds::FilterThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekQuery,
    SeekRearrangement,
    ParseRearrangement,
    SeekRegionSummary,
    ParseRegions,
    SeekHitsHeader,
    ParseHitCount,
    ParseVHit,
    ParseDHit,
    ParseJHit,
    Emit,
}

/// Column positions in the rearrangement summary row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SummaryLayout {
    v_gene: Option<usize>,
    d_gene: Option<usize>,
    j_gene: Option<usize>,
    stop_codon: Option<usize>,
    vj_frame: Option<usize>,
    /// `None` means the last column
    strand: Option<usize>,
}

impl SummaryLayout {
    /// Heavy-chain layout: V, D, J, chain type, stop codon, V-J frame, productive, strand
    const HEAVY: SummaryLayout = SummaryLayout {
        v_gene: Some(0),
        d_gene: Some(1),
        j_gene: Some(2),
        stop_codon: Some(4),
        vj_frame: Some(5),
        strand: None,
    };

    /// Read the layout from the parenthesised field list of the header line.
    ///
    /// Light-chain reports drop the D column, and newer IgBLAST releases add
    /// columns after the strand, so fixed indices are only a fallback.
    fn from_header(header: &str) -> Self {
        let tail = header
            .strip_prefix(REARRANGEMENT_MARKER)
            .unwrap_or(header);
        let fields = match (tail.find('('), tail.find(')')) {
            (Some(open), Some(close)) if open < close => &tail[open + 1..close],
            _ => return Self::HEAVY,
        };
        let names: Vec<String> = fields
            .split(',')
            .map(|f| f.trim().to_lowercase())
            .collect();
        let find = |needle: &str| names.iter().position(|n| n.contains(needle));

        let layout = SummaryLayout {
            v_gene: find("top v gene"),
            d_gene: find("top d gene"),
            j_gene: find("top j gene"),
            stop_codon: find("stop codon"),
            vj_frame: find("v-j frame"),
            strand: find("strand"),
        };
        if layout.v_gene.is_none() {
            Self::HEAVY
        } else {
            layout
        }
    }

    fn min_columns(&self) -> usize {
        [
            self.v_gene,
            self.d_gene,
            self.j_gene,
            self.stop_codon,
            self.vj_frame,
            self.strand,
        ]
        .iter()
        .flatten()
        .max()
        .map(|i| i + 1)
        .unwrap_or(1)
    }
}

/// First of a comma-joined list of equivalent gene calls; `N/A` is no call
fn top_gene(token: &str) -> Option<String> {
    let first = token.split(',').next().unwrap_or("").trim();
    if first.is_empty() || first.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(first.to_string())
    }
}

fn apply_rearrangement(
    record: &mut AnnotationRecord,
    line: &str,
    layout: &SummaryLayout,
) -> Result<(), SectionError> {
    let columns: Vec<&str> = line.trim().split('\t').collect();
    if columns.len() < layout.min_columns() {
        return Err(SectionError::TooFewColumns {
            row: "rearrangement summary",
            found: columns.len(),
            expected: layout.min_columns(),
        });
    }
    let column = |idx: Option<usize>| idx.map(|i| columns[i]);

    record.v_gene = column(layout.v_gene).and_then(top_gene);
    record.d_gene = column(layout.d_gene).and_then(top_gene);
    record.j_gene = column(layout.j_gene).and_then(top_gene);
    record.stop_codon = column(layout.stop_codon).and_then(StopCodon::parse);
    record.vj_frame = column(layout.vj_frame).and_then(FrameStatus::parse);

    let strand = match layout.strand {
        Some(i) => columns[i],
        None => columns[columns.len() - 1],
    };
    record.strand = Some(if strand.trim() == "+" {
        Strand::Forward
    } else {
        Strand::Reversed
    });
    Ok(())
}

/// Match an alignment summary row against the regions not yet seen.
///
/// Labels match by case-insensitive prefix (`FR1-IMGT` is `fr1`); rows must
/// appear in FR1..FR4 order, so `from` is the first region still allowed.
fn match_region(line: &str, from: usize) -> Option<Region> {
    let lower = line.trim_start().to_lowercase();
    Region::ALL[from..]
        .iter()
        .copied()
        .find(|r| lower.starts_with(r.label()))
}

fn parse_region_row(line: &str) -> Result<RegionBounds, SectionError> {
    // "CDR3-IMGT (germline)" carries a qualifier that would shift columns
    let cleaned = line.replace("(germline)", "");
    let columns: Vec<&str> = cleaned.split_whitespace().collect();
    if columns.len() < 7 {
        return Err(SectionError::TooFewColumns {
            row: "alignment summary",
            found: columns.len(),
            expected: 7,
        });
    }
    // label, from, to, length, matches, mismatches, gaps, % identity
    Ok(RegionBounds::new(
        to_int(columns[1]),
        to_int(columns[2]),
        to_int(columns[5]),
        to_int(columns[6]),
    ))
}

fn gene_alignment(hit: &HitRow) -> GeneAlignment {
    GeneAlignment {
        qstart: hit.qstart(),
        qend: None,
        sstart: hit.sstart(),
        mismatches: hit.mismatches(),
        gaps: hit.gaps(),
    }
}

/// Parse every query section of a report into an [`AnnotationRecord`].
///
/// A V hit outside `thresholds` leaves all V/D/J coordinates unset; the
/// record is still emitted and the query is not treated as filtered.
pub fn parse_cdr_info<R: BufRead>(reader: R, thresholds: &FilterThresholds) -> Result<CdrTable> {
    let mut scanner = ReportScanner::new(reader);
    let mut table = CdrTable::default();
    let mut state = State::SeekQuery;
    let mut record: Option<AnnotationRecord> = None;
    let mut layout = SummaryLayout::HEAVY;
    let mut next_region = 0usize;

    loop {
        let step: Result<State, SectionError> = match state {
            State::SeekQuery => {
                if !scanner.seek_query()? {
                    break;
                }
                let line = scanner.current().unwrap_or_default();
                query_id(line).map(|id| {
                    record = Some(AnnotationRecord::new(id));
                    State::SeekRearrangement
                })
            }

            State::SeekRearrangement => {
                match scanner.seek_next_in_section(&[REARRANGEMENT_MARKER])? {
                    Seek::Found(_) => {
                        layout = SummaryLayout::from_header(scanner.current().unwrap_or_default());
                        Ok(State::ParseRearrangement)
                    }
                    Seek::SectionEnd => Ok(State::Emit),
                }
            }

            State::ParseRearrangement => {
                scanner.advance()?;
                match (scanner.section_line(), record.as_mut()) {
                    (Some(line), Some(rec)) => {
                        apply_rearrangement(rec, line, &layout).map(|_| State::SeekRegionSummary)
                    }
                    _ => Ok(State::Emit),
                }
            }

            State::SeekRegionSummary => {
                // A query without a V alignment has no summary; go straight
                // to the hit table rather than running past it
                match scanner.seek_in_section(&[ALIGNMENT_SUMMARY_MARKER, FIELDS_MARKER])? {
                    Seek::Found(0) => {
                        next_region = 0;
                        scanner.advance()?;
                        Ok(State::ParseRegions)
                    }
                    Seek::Found(_) => Ok(State::ParseHitCount),
                    Seek::SectionEnd => Ok(State::Emit),
                }
            }

            State::ParseRegions => {
                let row = scanner.section_line().map(|line| {
                    match_region(line, next_region).map(|region| (region, parse_region_row(line)))
                });
                match row {
                    None => Ok(State::Emit),
                    // "Total" or the hit table banner ends the summary
                    Some(None) => Ok(State::SeekHitsHeader),
                    Some(Some((_, Err(e)))) => Err(e),
                    Some(Some((region, Ok(bounds)))) => {
                        if let Some(rec) = record.as_mut() {
                            rec.set_region(region, bounds);
                        }
                        next_region = region.index() + 1;
                        scanner.advance()?;
                        Ok(State::ParseRegions)
                    }
                }
            }

            State::SeekHitsHeader => match scanner.seek_in_section(&[FIELDS_MARKER])? {
                Seek::Found(_) => Ok(State::ParseHitCount),
                Seek::SectionEnd => Ok(State::Emit),
            },

            State::ParseHitCount => {
                scanner.advance()?;
                match scanner.section_line() {
                    None => Ok(State::Emit),
                    Some(line) => hit_count(line).map(|count| match count {
                        Some(0) => State::Emit,
                        _ => State::ParseVHit,
                    }),
                }
            }

            State::ParseVHit => {
                scanner.advance()?;
                match scanner.section_line() {
                    Some(line) if line.starts_with('V') => HitRow::parse(line).map(|hit| {
                        if hit.passes(thresholds) {
                            if let Some(rec) = record.as_mut() {
                                rec.v = gene_alignment(&hit);
                            }
                            State::ParseDHit
                        } else {
                            State::Emit
                        }
                    }),
                    _ => Ok(State::Emit),
                }
            }

            State::ParseDHit => {
                // Skip the remaining V rows; stop on the first D or J row
                let mut next = Ok(State::Emit);
                while scanner.advance()? {
                    let Some(line) = scanner.section_line() else {
                        break;
                    };
                    if line.starts_with('D') {
                        next = HitRow::parse(line).map(|hit| {
                            if let Some(rec) = record.as_mut() {
                                rec.d = gene_alignment(&hit);
                            }
                            State::ParseJHit
                        });
                        break;
                    }
                    if line.starts_with('J') {
                        next = Ok(State::ParseJHit);
                        break;
                    }
                }
                next
            }

            State::ParseJHit => {
                let mut next = Ok(State::Emit);
                loop {
                    let Some(line) = scanner.section_line() else {
                        break;
                    };
                    if line.starts_with('J') {
                        next = HitRow::parse(line).map(|hit| {
                            if let Some(rec) = record.as_mut() {
                                rec.j = GeneAlignment {
                                    qend: hit.qend(),
                                    ..gene_alignment(&hit)
                                };
                            }
                            State::Emit
                        });
                        break;
                    }
                    if !scanner.advance()? {
                        break;
                    }
                }
                next
            }

            State::Emit => {
                if let Some(rec) = record.take() {
                    table.records.push(rec);
                }
                Ok(State::SeekQuery)
            }
        };

        state = match step {
            Ok(next) => next,
            Err(e) => {
                let id = record
                    .take()
                    .map(|r| r.query_id)
                    .unwrap_or_else(|| "<unknown>".to_string());
                debug!("[parse] Skipping section {}: {}", id, e);
                table.corrupted_sections += 1;
                if scanner.at_query() {
                    scanner.advance()?;
                }
                State::SeekQuery
            }
        };
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = "# V-(D)-J rearrangement summary for query sequence (Top V gene match, Top D gene match, Top J gene match, Chain type, stop codon, V-J frame, Productive, Strand).  Multiple equivalent top matches, if present, are separated by a comma.";
    const LIGHT_HEADER: &str = "# V-(D)-J rearrangement summary for query sequence (Top V gene match, Top J gene match, Chain type, stop codon, V-J frame, Productive, Strand).  Multiple equivalent top matches, if present, are separated by a comma.";

    #[test]
    fn test_layout_from_heavy_header() {
        assert_eq!(SummaryLayout::from_header(HEADER), SummaryLayout {
            v_gene: Some(0),
            d_gene: Some(1),
            j_gene: Some(2),
            stop_codon: Some(4),
            vj_frame: Some(5),
            strand: Some(7),
        });
    }

    #[test]
    fn test_layout_from_light_header() {
        let layout = SummaryLayout::from_header(LIGHT_HEADER);
        assert_eq!(layout.d_gene, None);
        assert_eq!(layout.j_gene, Some(1));
        assert_eq!(layout.stop_codon, Some(3));
        assert_eq!(layout.strand, Some(6));
    }

    #[test]
    fn test_layout_fallback() {
        assert_eq!(
            SummaryLayout::from_header("# V-(D)-J rearrangement summary"),
            SummaryLayout::HEAVY
        );
    }

    #[test]
    fn test_top_gene() {
        assert_eq!(top_gene("IGHV3-23*01,IGHV3-23D*01"), Some("IGHV3-23*01".to_string()));
        assert_eq!(top_gene("N/A"), None);
        assert_eq!(top_gene(""), None);
    }

    #[test]
    fn test_region_prefix_matching_keeps_order() {
        assert_eq!(match_region("FR1-IMGT\t1\t75", 0), Some(Region::Fr1));
        assert_eq!(match_region("cdr2-imgt\t1\t75", 0), Some(Region::Cdr2));
        // FR1 after FR2 is out of order and ignored
        assert_eq!(match_region("FR1-IMGT\t1\t75", Region::Fr2.index() + 1), None);
        assert_eq!(match_region("Total\tN/A", 0), None);
    }

    #[test]
    fn test_germline_qualifier_removed() {
        let bounds = parse_region_row("CDR3-IMGT (germline)\t292\t299\t8\t7\t1\t0\t87.5").unwrap();
        assert_eq!(bounds.start, Some(292));
        assert_eq!(bounds.end, Some(299));
        assert_eq!(bounds.mismatches, Some(1));
        assert_eq!(bounds.gaps, Some(0));
    }

    #[test]
    fn test_truncated_report_keeps_partial_record() {
        let text = format!(
            "# Query: read1\n{HEADER}\nIGHV1-2*02\tN/A\tIGHJ4*02\tVH\tNo\tIn-frame\tYes\t+\n"
        );
        let table = parse_cdr_info(Cursor::new(text), &FilterThresholds::default()).unwrap();
        assert_eq!(table.records.len(), 1);
        let record = &table.records[0];
        assert_eq!(record.v_gene.as_deref(), Some("IGHV1-2*02"));
        assert_eq!(record.d_gene, None);
        assert_eq!(record.strand, Some(Strand::Forward));
        assert!(record.v.is_empty());
        assert_eq!(table.corrupted_sections, 0);
    }
}
