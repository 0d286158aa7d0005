//! Parsed result tables and shard merging
//!
//! Every shard yields one [`AnnotationTable`]. The coordinator appends them
//! in completion order, so row order across shards is not meaningful; only
//! the row set is.

use indexmap::IndexMap;

use crate::config::Operation;
use crate::error::AnnotateError;
use crate::record::{AbundanceRecord, AlignInfoRecord, AnnotationRecord};

/// Rows of a `cdrinfo` parse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdrTable {
    pub records: Vec<AnnotationRecord>,
    /// Query sections dropped because a row could not be read
    pub corrupted_sections: usize,
}

/// Rows and V-gene tallies of an `abundance` parse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbundanceTable {
    pub records: Vec<AbundanceRecord>,
    /// Accepted queries per top V subject, in first-seen order
    pub gene_counts: IndexMap<String, usize>,
    /// Queries whose top V hit failed the thresholds
    pub filtered_ids: Vec<String>,
    pub corrupted_sections: usize,
}

impl AbundanceTable {
    pub fn add_gene(&mut self, gene: &str, count: usize) {
        *self.gene_counts.entry(gene.to_string()).or_insert(0) += count;
    }
}

/// Rows of an `aligninfo` parse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignInfoTable {
    pub records: Vec<AlignInfoRecord>,
    pub filtered_ids: Vec<String>,
    pub corrupted_sections: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationTable {
    Abundance(AbundanceTable),
    AlignInfo(AlignInfoTable),
    CdrInfo(CdrTable),
}

impl AnnotationTable {
    pub fn empty(operation: Operation) -> Self {
        match operation {
            Operation::Abundance => AnnotationTable::Abundance(AbundanceTable::default()),
            Operation::AlignInfo => AnnotationTable::AlignInfo(AlignInfoTable::default()),
            Operation::CdrInfo => AnnotationTable::CdrInfo(CdrTable::default()),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            AnnotationTable::Abundance(_) => Operation::Abundance,
            AnnotationTable::AlignInfo(_) => Operation::AlignInfo,
            AnnotationTable::CdrInfo(_) => Operation::CdrInfo,
        }
    }

    /// Number of accepted rows
    pub fn len(&self) -> usize {
        match self {
            AnnotationTable::Abundance(t) => t.records.len(),
            AnnotationTable::AlignInfo(t) => t.records.len(),
            AnnotationTable::CdrInfo(t) => t.records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queries rejected by the thresholds; `cdrinfo` keeps every query
    pub fn filtered_ids(&self) -> &[String] {
        match self {
            AnnotationTable::Abundance(t) => &t.filtered_ids,
            AnnotationTable::AlignInfo(t) => &t.filtered_ids,
            AnnotationTable::CdrInfo(_) => &[],
        }
    }

    pub fn corrupted_sections(&self) -> usize {
        match self {
            AnnotationTable::Abundance(t) => t.corrupted_sections,
            AnnotationTable::AlignInfo(t) => t.corrupted_sections,
            AnnotationTable::CdrInfo(t) => t.corrupted_sections,
        }
    }

    pub fn header(&self) -> &'static [&'static str] {
        match self {
            AnnotationTable::Abundance(_) => &crate::record::ABUNDANCE_COLUMNS,
            AnnotationTable::AlignInfo(_) => &crate::record::ALIGN_INFO_COLUMNS,
            AnnotationTable::CdrInfo(_) => &crate::record::ANNOTATION_COLUMNS,
        }
    }

    /// Rendered rows in [`header`](Self::header) order
    pub fn rows(&self) -> Box<dyn Iterator<Item = Vec<String>> + '_> {
        match self {
            AnnotationTable::Abundance(t) => Box::new(t.records.iter().map(|r| r.to_row())),
            AnnotationTable::AlignInfo(t) => Box::new(t.records.iter().map(|r| r.to_row())),
            AnnotationTable::CdrInfo(t) => Box::new(t.records.iter().map(|r| r.to_row())),
        }
    }

    /// Merge another shard's table into this one.
    ///
    /// Both tables must come from the same operation. Gene counts are summed
    /// per subject.
    pub fn append(&mut self, other: AnnotationTable) -> Result<(), AnnotateError> {
        match (self, other) {
            (AnnotationTable::Abundance(a), AnnotationTable::Abundance(b)) => {
                a.records.extend(b.records);
                for (gene, count) in b.gene_counts {
                    a.add_gene(&gene, count);
                }
                a.filtered_ids.extend(b.filtered_ids);
                a.corrupted_sections += b.corrupted_sections;
            }
            (AnnotationTable::AlignInfo(a), AnnotationTable::AlignInfo(b)) => {
                a.records.extend(b.records);
                a.filtered_ids.extend(b.filtered_ids);
                a.corrupted_sections += b.corrupted_sections;
            }
            (AnnotationTable::CdrInfo(a), AnnotationTable::CdrInfo(b)) => {
                a.records.extend(b.records);
                a.corrupted_sections += b.corrupted_sections;
            }
            (this, other) => {
                return Err(AnnotateError::ShapeMismatch {
                    expected: this.operation().name(),
                    found: other.operation().name(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Strand;

    fn align_info(id: &str) -> AlignInfoRecord {
        AlignInfoRecord {
            query_id: id.to_string(),
            subject_id: "IGHV1-2*02".to_string(),
            qstart: Some(1),
            sstart: Some(1),
            strand: Strand::Forward,
        }
    }

    #[test]
    fn test_append_sums_gene_counts() {
        let mut left = AbundanceTable::default();
        left.add_gene("IGHV1-2*02", 2);
        left.add_gene("IGHV3-23*01", 1);
        let mut right = AbundanceTable::default();
        right.add_gene("IGHV3-23*01", 4);
        right.add_gene("IGHV4-34*01", 1);
        right.filtered_ids.push("bad".to_string());

        let mut merged = AnnotationTable::Abundance(left);
        merged.append(AnnotationTable::Abundance(right)).unwrap();

        let AnnotationTable::Abundance(table) = &merged else {
            panic!("shape changed");
        };
        assert_eq!(table.gene_counts["IGHV1-2*02"], 2);
        assert_eq!(table.gene_counts["IGHV3-23*01"], 5);
        assert_eq!(table.gene_counts["IGHV4-34*01"], 1);
        assert_eq!(merged.filtered_ids(), ["bad".to_string()]);
    }

    #[test]
    fn test_append_rejects_mixed_shapes() {
        let mut table = AnnotationTable::empty(Operation::CdrInfo);
        let other = AnnotationTable::AlignInfo(AlignInfoTable {
            records: vec![align_info("q1")],
            ..Default::default()
        });
        let err = table.append(other).unwrap_err();
        assert!(matches!(err, AnnotateError::ShapeMismatch { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn test_rows_follow_header() {
        let table = AnnotationTable::AlignInfo(AlignInfoTable {
            records: vec![align_info("q1"), align_info("q2")],
            ..Default::default()
        });
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), table.header().len());
        assert_eq!(rows[1][0], "q2");
    }
}
