//! IgBLAST `-outfmt 7` report scanning
//!
//! A report is a sequence of query sections, each opened by a `# Query:`
//! line and made of optional sub-sections (rearrangement summary, alignment
//! summary, hit table). This module holds the pieces every record shape
//! needs: a line scanner that knows where a section ends, a defensive
//! integer conversion, and a parsed hit-table row. The per-shape state
//! machines live in [`cdr_info`](crate::cdr_info),
//! [`abundance`](crate::abundance) and [`align_info`](crate::align_info).

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::{self, BufRead};
use std::path::Path;

use crate::config::Operation;
use crate::error::SectionError;
use crate::record::Strand;
use crate::table::AnnotationTable;
use crate::thresholds::FilterThresholds;

pub const QUERY_MARKER: &str = "# Query";
pub const REARRANGEMENT_MARKER: &str = "# V-(D)-J rearrangement";
pub const ALIGNMENT_SUMMARY_MARKER: &str = "# Alignment";
pub const HIT_TABLE_MARKER: &str = "# Hit";
pub const FIELDS_MARKER: &str = "# Fields";

/// Integer conversion that degrades to `None` instead of failing
pub fn to_int(token: &str) -> Option<i64> {
    token.trim().parse::<i64>().ok()
}

/// Float conversion with the same contract as [`to_int`]
pub fn to_float(token: &str) -> Option<f64> {
    token.trim().parse::<f64>().ok()
}

/// Query identifier from a `# Query: ID ...` line
pub fn query_id(line: &str) -> Result<String, SectionError> {
    line.split_whitespace()
        .nth(2)
        .map(|id| id.to_string())
        .ok_or_else(|| SectionError::MissingQueryId(line.trim().to_string()))
}

/// Hit count from a `# N hits found` line; `None` when the number is unreadable
pub fn hit_count(line: &str) -> Result<Option<i64>, SectionError> {
    line.split_whitespace()
        .nth(1)
        .map(to_int)
        .ok_or_else(|| SectionError::HitCount(line.trim().to_string()))
}

/// Result of looking for a marker inside the current query section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    /// The scanner sits on the line that matched marker number `usize`
    Found(usize),
    /// The next `# Query` line or end of input came first
    SectionEnd,
}

/// Forward-only line reader with one line of lookahead.
///
/// The scanner always exposes a "current" line; section-aware helpers stop
/// on the next query marker without consuming it, so the following section
/// starts cleanly.
pub struct ReportScanner<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
    current: Option<String>,
    eof: bool,
}

impl<R: BufRead> ReportScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            current: None,
            eof: false,
        }
    }

    /// Move to the next line. Returns `false` at end of input.
    ///
    /// Bytes that are not valid UTF-8 become U+FFFD; the rest of the line
    /// (and of the section) still parses.
    pub fn advance(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            self.eof = true;
            self.current = None;
            return Ok(false);
        }
        let line = String::from_utf8_lossy(&self.buf);
        self.current = Some(line.trim_end_matches(['\n', '\r']).to_string());
        Ok(true)
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn at_query(&self) -> bool {
        self.current().is_some_and(|l| l.starts_with(QUERY_MARKER))
    }

    /// Current line, unless it belongs to the next section (or input ended)
    pub fn section_line(&self) -> Option<&str> {
        if self.at_query() {
            None
        } else {
            self.current()
        }
    }

    /// Advance until a query marker is current. Returns `false` at end of input.
    pub fn seek_query(&mut self) -> io::Result<bool> {
        loop {
            if self.at_query() {
                return Ok(true);
            }
            if !self.advance()? {
                return Ok(false);
            }
        }
    }

    /// Look for the first line starting with any of `markers`, checking the
    /// current line first and never crossing into the next section.
    pub fn seek_in_section(&mut self, markers: &[&str]) -> io::Result<Seek> {
        loop {
            match self.current() {
                None if self.eof => return Ok(Seek::SectionEnd),
                Some(line) if line.starts_with(QUERY_MARKER) => return Ok(Seek::SectionEnd),
                Some(line) => {
                    if let Some(i) = markers.iter().position(|m| line.starts_with(m)) {
                        return Ok(Seek::Found(i));
                    }
                }
                None => {}
            }
            if !self.advance()? {
                return Ok(Seek::SectionEnd);
            }
        }
    }

    /// Advance once, then behave like [`seek_in_section`](Self::seek_in_section)
    pub fn seek_next_in_section(&mut self, markers: &[&str]) -> io::Result<Seek> {
        if !self.advance()? {
            return Ok(Seek::SectionEnd);
        }
        self.seek_in_section(markers)
    }
}

/// One row of the hit table.
///
/// Columns (outfmt 7 defaults): segment, query id, subject id, % identity,
/// alignment length, mismatches, gap opens, gaps, q. start, q. end,
/// s. start, s. end, evalue, bit score. The bit score is always the last
/// column.
#[derive(Debug, Clone, PartialEq)]
pub struct HitRow {
    columns: Vec<String>,
    pub bit_score: f64,
}

const MIN_HIT_COLUMNS: usize = 12;

impl HitRow {
    pub fn parse(line: &str) -> Result<Self, SectionError> {
        let columns: Vec<String> = line.split_whitespace().map(|c| c.to_string()).collect();
        if columns.len() < MIN_HIT_COLUMNS {
            return Err(SectionError::TooFewColumns {
                row: "hit",
                found: columns.len(),
                expected: MIN_HIT_COLUMNS,
            });
        }
        let last = &columns[columns.len() - 1];
        let bit_score = to_float(last).ok_or_else(|| SectionError::BitScore(last.clone()))?;
        Ok(Self { columns, bit_score })
    }

    /// `V`, `D` or `J`
    pub fn segment(&self) -> &str {
        &self.columns[0]
    }

    /// Raw query column, possibly `reversed|ID`
    pub fn query(&self) -> &str {
        &self.columns[1]
    }

    /// Query identifier and strand, undoing IgBLAST's `reversed|` prefix
    pub fn query_strand(&self) -> (&str, Strand) {
        match self.query().split_once('|') {
            Some((flag, id)) if flag == "reversed" => (id.trim(), Strand::Reversed),
            _ => (self.query().trim(), Strand::Forward),
        }
    }

    pub fn subject(&self) -> &str {
        &self.columns[2]
    }

    pub fn identity(&self) -> Option<f64> {
        to_float(&self.columns[3])
    }

    pub fn align_len(&self) -> Option<i64> {
        to_int(&self.columns[4])
    }

    pub fn mismatches(&self) -> Option<i64> {
        to_int(&self.columns[5])
    }

    pub fn gaps(&self) -> Option<i64> {
        to_int(&self.columns[7])
    }

    pub fn qstart(&self) -> Option<i64> {
        to_int(&self.columns[8])
    }

    pub fn qend(&self) -> Option<i64> {
        to_int(&self.columns[9])
    }

    pub fn sstart(&self) -> Option<i64> {
        to_int(&self.columns[10])
    }

    pub fn passes(&self, thresholds: &FilterThresholds) -> bool {
        thresholds.accepts(self.bit_score, self.align_len(), self.sstart())
    }
}

/// Walk every query section and hand its top hit row to `visit`.
///
/// Only sections whose hit table reports at least one hit and whose first
/// row is a V hit are visited. Sections with a malformed row are counted and
/// skipped. Returns the number of corrupted sections.
pub(crate) fn for_each_top_v_hit<R, F>(reader: R, mut visit: F) -> Result<usize>
where
    R: BufRead,
    F: FnMut(&str, &HitRow),
{
    let mut scanner = ReportScanner::new(reader);
    let mut corrupted = 0usize;

    while scanner.seek_query()? {
        let id = match scanner.current().map(query_id) {
            Some(Ok(id)) => id,
            Some(Err(e)) => {
                debug!("[parse] {e}");
                corrupted += 1;
                scanner.advance()?;
                continue;
            }
            None => break,
        };

        if scanner.seek_next_in_section(&[HIT_TABLE_MARKER])? == Seek::SectionEnd {
            continue;
        }
        // `# Fields` must immediately follow the hit table banner
        if !scanner.advance()? || !scanner.section_line().is_some_and(|l| l.starts_with(FIELDS_MARKER)) {
            continue;
        }
        if !scanner.advance()? {
            break;
        }
        let Some(count_line) = scanner.section_line() else {
            continue;
        };
        match hit_count(count_line) {
            Ok(Some(0)) => continue,
            Ok(_) => {}
            Err(e) => {
                debug!("[parse] {id}: {e}");
                corrupted += 1;
                continue;
            }
        }
        if !scanner.advance()? {
            break;
        }
        let Some(line) = scanner.section_line() else {
            continue;
        };
        if !line.starts_with('V') {
            continue;
        }
        match HitRow::parse(line) {
            Ok(hit) => visit(&id, &hit),
            Err(e) => {
                debug!("[parse] {id}: {e}");
                corrupted += 1;
            }
        }
    }

    Ok(corrupted)
}

/// Parse one report into the table shape selected by `operation`
pub fn parse_report_from<R: BufRead>(
    reader: R,
    operation: Operation,
    thresholds: &FilterThresholds,
) -> Result<AnnotationTable> {
    let table = match operation {
        Operation::Abundance => {
            AnnotationTable::Abundance(crate::abundance::parse_abundance(reader, thresholds)?)
        }
        Operation::AlignInfo => {
            AnnotationTable::AlignInfo(crate::align_info::parse_align_info(reader, thresholds)?)
        }
        Operation::CdrInfo => {
            AnnotationTable::CdrInfo(crate::cdr_info::parse_cdr_info(reader, thresholds)?)
        }
    };
    Ok(table)
}

/// Parse a report file; corrupted sections are reported but not fatal
pub fn parse_report(
    path: &Path,
    operation: Operation,
    thresholds: &FilterThresholds,
) -> Result<AnnotationTable> {
    let name = crate::aligner::file_name(path);
    info!("[parse] Extracting top hit tables ... {}", name);

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open report: {}", path.display()))?;
    let table = parse_report_from(io::BufReader::new(file), operation, thresholds)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;

    if table.corrupted_sections() > 0 {
        warn!(
            "[parse] Something went wrong while parsing {} ({} section(s) skipped)",
            name,
            table.corrupted_sections()
        );
    }
    Ok(table)
}
