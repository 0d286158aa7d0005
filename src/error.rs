//! Typed failures that callers may want to match on.
//!
//! Everything else travels as `anyhow::Error` with context attached at the
//! call site.

use std::path::PathBuf;

/// A problem confined to one `# Query:` section of an IgBLAST report.
///
/// These never abort a parse: the section is dropped and the file-level
/// warning flag is raised instead.
#[derive(Debug, thiserror::Error)]
pub enum SectionError {
    #[error("{row} row has {found} columns, expected at least {expected}")]
    TooFewColumns {
        row: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("unparseable bit score '{0}'")]
    BitScore(String),

    #[error("query line without an identifier: '{0}'")]
    MissingQueryId(String),

    #[error("hit count line is malformed: '{0}'")]
    HitCount(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("input FASTA is not readable: {}", path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("aligner exited with {status} while processing {}", shard.display())]
    AlignerFailed { shard: PathBuf, status: String },

    #[error("aligner exceeded {seconds}s on {}", shard.display())]
    AlignerTimeout { shard: PathBuf, seconds: u64 },

    #[error("annotation aborted before {} was processed", shard.display())]
    Aborted { shard: PathBuf },

    #[error("orchestration failure: {0}")]
    Orchestration(String),

    #[error("cannot merge a {found} table into a {expected} table")]
    ShapeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}
