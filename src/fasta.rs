//! Streaming FASTA input and output
//!
//! Reads plain, gzip or BGZF-compressed FASTA one record at a time and writes
//! single-line records with bare identifiers, which is what IgBLAST expects
//! for its query IDs to round-trip.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use noodles::bgzf;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use crate::error::AnnotateError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One input sequence. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Identifier: header text after '>' up to the first whitespace
    pub id: String,
    pub sequence: String,
}

/// Container format of an input file, decided from its first bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip, // plain or multi-member gzip
    Bgzf,
}

impl Compression {
    /// Classify a file header. BGZF is gzip with the FEXTRA flag set and a
    /// `BC` subfield at offset 12.
    pub fn sniff(header: &[u8]) -> Self {
        if !header.starts_with(&GZIP_MAGIC) {
            return Compression::None;
        }
        if header.len() >= 14 && header[3] & 0x04 != 0 && &header[12..14] == b"BC" {
            Compression::Bgzf
        } else {
            Compression::Gzip
        }
    }
}

fn open_raw(path: &Path) -> Result<(BufReader<File>, Compression)> {
    let unreadable = |source| AnnotateError::InputUnreadable {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(unreadable)?;
    let mut reader = BufReader::new(file);
    let compression = Compression::sniff(reader.fill_buf().map_err(unreadable)?);
    Ok((reader, compression))
}

/// Compression of the file at `path`
pub fn detect_compression<P: AsRef<Path>>(path: P) -> Result<Compression> {
    open_raw(path.as_ref()).map(|(_, compression)| compression)
}

/// Open a FASTA file and auto-detect gzip or bgzip compression, returning a boxed BufRead
pub fn open_fasta_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let (reader, compression) = open_raw(path.as_ref())?;

    match compression {
        Compression::None => Ok(Box::new(reader)),
        Compression::Gzip => Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader)))),
        Compression::Bgzf => Ok(Box::new(BufReader::new(bgzf::io::reader::Reader::new(reader)))),
    }
}

/// Read one line as bytes; `false` at end of input
fn read_raw_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    Ok(reader.read_until(b'\n', buf)? > 0)
}

/// Sequential FASTA reader over any buffered source.
///
/// Lines are read as bytes; header text that is not valid UTF-8 (Latin-1
/// descriptions are common) is decoded lossily instead of failing.
pub struct FastaReader<R: BufRead> {
    reader: R,
    line_buf: Vec<u8>,
    current_id: Option<String>,
}

impl FastaReader<Box<dyn BufRead>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let input = open_fasta_input(path.as_ref())?;
        FastaReader::new(input)
            .with_context(|| format!("Failed to read FASTA: {}", path.as_ref().display()))
    }
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut fasta = Self {
            reader,
            line_buf: Vec::with_capacity(256),
            current_id: None,
        };

        // Skip anything before the first header
        while read_raw_line(&mut fasta.reader, &mut fasta.line_buf)? {
            if let Some(header) = fasta.line_buf.strip_prefix(b">") {
                fasta.current_id = Some(header_id(header));
                break;
            }
        }

        Ok(fasta)
    }

    pub fn read_next(&mut self) -> Result<Option<SequenceRecord>> {
        let id = match self.current_id.take() {
            Some(id) => id,
            None => return Ok(None),
        };

        let mut sequence = String::new();
        while read_raw_line(&mut self.reader, &mut self.line_buf)? {
            if let Some(header) = self.line_buf.strip_prefix(b">") {
                self.current_id = Some(header_id(header));
                break;
            }
            sequence.push_str(String::from_utf8_lossy(&self.line_buf).trim());
        }

        Ok(Some(SequenceRecord { id, sequence }))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = Result<SequenceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

fn header_id(header: &[u8]) -> String {
    String::from_utf8_lossy(header)
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string()
}

/// Count records by header lines without holding sequences in memory
pub fn count_sequences<P: AsRef<Path>>(path: P) -> Result<usize> {
    let mut input = open_fasta_input(path.as_ref())?;
    let mut line = Vec::with_capacity(256);
    let mut count = 0;
    while read_raw_line(&mut input, &mut line)
        .with_context(|| format!("Failed to read FASTA: {}", path.as_ref().display()))?
    {
        if line.first() == Some(&b'>') {
            count += 1;
        }
    }
    Ok(count)
}

/// Write one record as `>id` followed by the sequence on a single line
pub fn write_record<W: Write>(out: &mut W, record: &SequenceRecord) -> Result<()> {
    writeln!(out, ">{}", record.id)?;
    writeln!(out, "{}", record.sequence)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_multiline_records() {
        let input = ">seq1 some description\nACGT\nTTGA\n>seq2\nGGG\n";
        let records: Vec<SequenceRecord> = FastaReader::new(Cursor::new(input))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "seq1");
        assert_eq!(records[0].sequence, "ACGTTTGA");
        assert_eq!(records[1].id, "seq2");
        assert_eq!(records[1].sequence, "GGG");
    }

    #[test]
    fn test_leading_junk_and_empty_input() {
        let records: Vec<_> = FastaReader::new(Cursor::new("\n\n>a\nAC\n"))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 1);

        let mut empty = FastaReader::new(Cursor::new("")).unwrap();
        assert!(empty.read_next().unwrap().is_none());
    }

    #[test]
    fn test_write_drops_description() {
        let mut out = Vec::new();
        let record = SequenceRecord {
            id: "read7".to_string(),
            sequence: "CAGGTG".to_string(),
        };
        write_record(&mut out, &record).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">read7\nCAGGTG\n");
    }

    #[test]
    fn test_latin1_description_is_not_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reads.fasta");
        std::fs::write(&path, b">seq1 sample from Z\xfcrich\nACGT\n>seq2\nGG\n").unwrap();

        assert_eq!(count_sequences(&path).unwrap(), 2);
        let records: Vec<SequenceRecord> = FastaReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records[0].id, "seq1");
        assert_eq!(records[0].sequence, "ACGT");
        assert_eq!(records[1].id, "seq2");
    }

    #[test]
    fn test_sniff_compression() {
        assert_eq!(Compression::sniff(b">seq1\nACGT"), Compression::None);
        assert_eq!(Compression::sniff(b""), Compression::None);
        // gzip without FEXTRA
        assert_eq!(
            Compression::sniff(&[0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 0xff]),
            Compression::Gzip
        );
        let bgzf_header = [
            0x1f, 0x8b, 8, 4, 0, 0, 0, 0, 0, 0xff, 6, 0, b'B', b'C', 2, 0, 0x1b, 0,
        ];
        assert_eq!(Compression::sniff(&bgzf_header), Compression::Bgzf);
    }

    #[test]
    fn test_plain_gzip_input() {
        use flate2::write::GzEncoder;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reads.fasta.gz");
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b">seq1 desc\nACGT\n>seq2\nGGCC\n").unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        assert_eq!(detect_compression(&path).unwrap(), Compression::Gzip);
        assert_eq!(count_sequences(&path).unwrap(), 2);
        let ids: Vec<String> = FastaReader::open(&path)
            .unwrap()
            .map(|r| r.map(|rec| rec.id))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(ids, vec!["seq1", "seq2"]);
    }

    #[test]
    fn test_unreadable_input_is_typed() {
        let err = open_fasta_input("/nonexistent/igsweep/input.fasta")
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<AnnotateError>(),
            Some(AnnotateError::InputUnreadable { .. })
        ));
    }
}
