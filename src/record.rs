//! Per-query records produced from IgBLAST reports
//!
//! Three shapes exist, one per [`Operation`](crate::config::Operation):
//! [`AnnotationRecord`] (full FR/CDR partition), [`AbundanceRecord`] (top-hit
//! quality metrics) and [`AlignInfoRecord`] (top-hit coordinates). Missing
//! values are `None`; absence of a D or J hit is meaningful, not an error.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reversed,
}

impl Strand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strand::Forward => "forward",
            Strand::Reversed => "reversed",
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCodon {
    Yes,
    No,
}

impl StopCodon {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "yes" => Some(StopCodon::Yes),
            "no" => Some(StopCodon::No),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopCodon::Yes => "yes",
            StopCodon::No => "no",
        }
    }
}

/// V-J reading frame status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    InFrame,
    OutOfFrame,
    NotAvailable, // no J gene found
}

impl FrameStatus {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "in-frame" => Some(FrameStatus::InFrame),
            "out-of-frame" => Some(FrameStatus::OutOfFrame),
            "n/a" => Some(FrameStatus::NotAvailable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameStatus::InFrame => "in-frame",
            FrameStatus::OutOfFrame => "out-of-frame",
            FrameStatus::NotAvailable => "N/A",
        }
    }
}

/// Framework and complementarity-determining regions in sequence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Fr1,
    Cdr1,
    Fr2,
    Cdr2,
    Fr3,
    Cdr3,
    Fr4,
}

impl Region {
    pub const ALL: [Region; 7] = [
        Region::Fr1,
        Region::Cdr1,
        Region::Fr2,
        Region::Cdr2,
        Region::Fr3,
        Region::Cdr3,
        Region::Fr4,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Region::Fr1 => "fr1",
            Region::Cdr1 => "cdr1",
            Region::Fr2 => "fr2",
            Region::Cdr2 => "cdr2",
            Region::Fr3 => "fr3",
            Region::Cdr3 => "cdr3",
            Region::Fr4 => "fr4",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// 1-based inclusive boundaries of one region plus its alignment stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionBounds {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub mismatches: Option<i64>,
    pub gaps: Option<i64>,
}

impl RegionBounds {
    /// Build bounds, treating `end < start` as an empty region
    pub fn new(
        start: Option<i64>,
        end: Option<i64>,
        mismatches: Option<i64>,
        gaps: Option<i64>,
    ) -> Self {
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) if e < s => (None, None),
            other => other,
        };
        Self {
            start,
            end,
            mismatches,
            gaps,
        }
    }

    pub fn is_present(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

/// Alignment of the query against one germline segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneAlignment {
    pub qstart: Option<i64>,
    pub qend: Option<i64>,
    pub sstart: Option<i64>,
    pub mismatches: Option<i64>,
    pub gaps: Option<i64>,
}

impl GeneAlignment {
    pub fn is_empty(&self) -> bool {
        *self == GeneAlignment::default()
    }
}

/// One query's gene calls and FR/CDR partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub query_id: String,
    pub v_gene: Option<String>,
    pub d_gene: Option<String>,
    pub j_gene: Option<String>,
    pub v: GeneAlignment,
    pub d: GeneAlignment,
    pub j: GeneAlignment,
    pub strand: Option<Strand>,
    pub stop_codon: Option<StopCodon>,
    pub vj_frame: Option<FrameStatus>,
    pub regions: [RegionBounds; 7],
}

/// Column names of the cdrinfo table, in output order
pub const ANNOTATION_COLUMNS: [&str; 48] = [
    "queryid",
    "vgene",
    "vqstart",
    "vstart",
    "vmismatches",
    "vgaps",
    "dgene",
    "dqstart",
    "dstart",
    "dmismatches",
    "dgaps",
    "jgene",
    "jqstart",
    "jqend",
    "jstart",
    "jmismatches",
    "jgaps",
    "strand",
    "stopcodon",
    "v-jframe",
    "fr1.start",
    "fr1.end",
    "fr1.mismatches",
    "fr1.gaps",
    "cdr1.start",
    "cdr1.end",
    "cdr1.mismatches",
    "cdr1.gaps",
    "fr2.start",
    "fr2.end",
    "fr2.mismatches",
    "fr2.gaps",
    "cdr2.start",
    "cdr2.end",
    "cdr2.mismatches",
    "cdr2.gaps",
    "fr3.start",
    "fr3.end",
    "fr3.mismatches",
    "fr3.gaps",
    "cdr3.start",
    "cdr3.end",
    "cdr3.mismatches",
    "cdr3.gaps",
    "fr4.start",
    "fr4.end",
    "fr4.mismatches",
    "fr4.gaps",
];

fn cell<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

impl AnnotationRecord {
    /// A record with every field but the identifier missing
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            v_gene: None,
            d_gene: None,
            j_gene: None,
            v: GeneAlignment::default(),
            d: GeneAlignment::default(),
            j: GeneAlignment::default(),
            strand: None,
            stop_codon: None,
            vj_frame: None,
            regions: [RegionBounds::default(); 7],
        }
    }

    pub fn region(&self, region: Region) -> &RegionBounds {
        &self.regions[region.index()]
    }

    pub fn set_region(&mut self, region: Region, bounds: RegionBounds) {
        self.regions[region.index()] = bounds;
    }

    /// Present regions appear in FR1..FR4 order without overlapping
    pub fn regions_ordered(&self) -> bool {
        let mut last_end: Option<i64> = None;
        for bounds in &self.regions {
            if let (Some(start), Some(end)) = (bounds.start, bounds.end) {
                if end < start {
                    return false;
                }
                if last_end.is_some_and(|prev| start <= prev) {
                    return false;
                }
                last_end = Some(end);
            }
        }
        true
    }

    /// Cells in [`ANNOTATION_COLUMNS`] order; missing values are empty
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(ANNOTATION_COLUMNS.len());
        row.push(self.query_id.clone());

        row.push(cell(&self.v_gene));
        row.extend([
            cell(&self.v.qstart),
            cell(&self.v.sstart),
            cell(&self.v.mismatches),
            cell(&self.v.gaps),
        ]);
        row.push(cell(&self.d_gene));
        row.extend([
            cell(&self.d.qstart),
            cell(&self.d.sstart),
            cell(&self.d.mismatches),
            cell(&self.d.gaps),
        ]);
        row.push(cell(&self.j_gene));
        row.extend([
            cell(&self.j.qstart),
            cell(&self.j.qend),
            cell(&self.j.sstart),
            cell(&self.j.mismatches),
            cell(&self.j.gaps),
        ]);

        row.push(self.strand.map(|s| s.as_str().to_string()).unwrap_or_default());
        row.push(
            self.stop_codon
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
        );
        row.push(
            self.vj_frame
                .map(|f| f.as_str().to_string())
                .unwrap_or_default(),
        );

        for bounds in &self.regions {
            row.extend([
                cell(&bounds.start),
                cell(&bounds.end),
                cell(&bounds.mismatches),
                cell(&bounds.gaps),
            ]);
        }

        row
    }
}

/// Top V-hit quality metrics of an accepted query (abundance task)
#[derive(Debug, Clone, PartialEq)]
pub struct AbundanceRecord {
    pub query_id: String,
    pub identity: Option<f64>,
    pub align_len: Option<i64>,
    pub bit_score: f64,
    pub qstart: Option<i64>,
    pub sstart: Option<i64>,
    pub mismatches: Option<i64>,
    pub gaps: Option<i64>,
}

pub const ABUNDANCE_COLUMNS: [&str; 8] = [
    "queryid",
    "identity",
    "alignlen",
    "bitscore",
    "qstart",
    "sstart",
    "mismatches",
    "gaps",
];

impl AbundanceRecord {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.query_id.clone(),
            cell(&self.identity),
            cell(&self.align_len),
            self.bit_score.to_string(),
            cell(&self.qstart),
            cell(&self.sstart),
            cell(&self.mismatches),
            cell(&self.gaps),
        ]
    }
}

/// Top V-hit coordinates (aligninfo task)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignInfoRecord {
    pub query_id: String,
    pub subject_id: String,
    pub qstart: Option<i64>,
    pub sstart: Option<i64>,
    pub strand: Strand,
}

pub const ALIGN_INFO_COLUMNS: [&str; 5] = ["queryid", "subjid", "qstart", "sstart", "strand"];

impl AlignInfoRecord {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.query_id.clone(),
            self.subject_id.clone(),
            cell(&self.qstart),
            cell(&self.sstart),
            self.strand.to_string(),
        ]
    }
}
