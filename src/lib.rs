// Library exports for igsweep
pub mod abundance;
pub mod align_info;
pub mod aligner;
pub mod cdr_info;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fasta;
pub mod igblast_report;
pub mod output;
pub mod partition;
pub mod progress;
pub mod record;
pub mod shard;
pub mod table;
pub mod thresholds;
pub mod worker;

pub use aligner::{Aligner, IgBlast};
pub use config::{AnnotateConfig, ChainType, Operation, SeqType};
pub use coordinator::{annotate_fasta, AnnotationRun, Annotator};
pub use table::AnnotationTable;
pub use thresholds::FilterThresholds;
