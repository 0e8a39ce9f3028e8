//! FASTA loading for reference genomes and pre-computed alignments

use bio::io::fasta;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::error::DesignError;
use super::iupac::{is_gap, is_nucleotide};
use super::types::{AlignmentBlock, AlignmentRow, GenomicInterval};

/// A named reference sequence, uppercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeRecord {
    pub name: String,
    pub sequence: Vec<u8>,
}

/// Read all records of a FASTA stream.
pub fn read_genome<R: Read>(reader: R) -> Result<Vec<GenomeRecord>, DesignError> {
    let reader = fasta::Reader::new(reader);
    let mut records = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|e| DesignError::Fasta(e.to_string()))?;
        records.push(GenomeRecord {
            name: record.id().to_string(),
            sequence: record.seq().to_ascii_uppercase(),
        });
    }

    Ok(records)
}

pub fn read_genome_file(path: &Path) -> Result<Vec<GenomeRecord>, DesignError> {
    read_genome(File::open(path)?)
}

/// Parse an interval written as `chrom:start-end` (0-based, half-open).
pub fn parse_interval(text: &str) -> Option<GenomicInterval> {
    let (chrom, range) = text.rsplit_once(':')?;
    let (start, end) = range.split_once('-')?;
    let start = start.replace(',', "").parse().ok()?;
    let end = end.replace(',', "").parse().ok()?;
    if chrom.is_empty() || end <= start {
        return None;
    }
    Some(GenomicInterval::new(chrom, start, end))
}

/// Parse an aligned FASTA into a single alignment block.
///
/// The record id names the gene. An optional `chrom:start-end` first word
/// of the description gives the aligned genomic region. `.` gaps are
/// normalised to `-`; other non-nucleotide characters are ignored.
pub fn read_aligned_fasta<R: Read>(reader: R) -> Result<AlignmentBlock, DesignError> {
    let reader = fasta::Reader::new(reader);
    let mut block = AlignmentBlock::default();

    for result in reader.records() {
        let record = result.map_err(|e| DesignError::Fasta(e.to_string()))?;
        let interval = record
            .desc()
            .and_then(|d| d.split_whitespace().next())
            .and_then(parse_interval);

        let mut residues = String::with_capacity(record.seq().len());
        for &b in record.seq() {
            let c = (b as char).to_ascii_uppercase();
            if is_gap(c) {
                residues.push('-');
            } else if is_nucleotide(c) {
                residues.push(c);
            }
        }

        block.rows.push(AlignmentRow {
            gene_id: record.id().to_string(),
            interval,
            residues,
        });
    }

    if block.rows.is_empty() {
        return Err(DesignError::Fasta("alignment contains no sequences".to_string()));
    }

    Ok(block)
}

pub fn read_aligned_fasta_file(path: &Path) -> Result<AlignmentBlock, DesignError> {
    read_aligned_fasta(File::open(path)?)
}
