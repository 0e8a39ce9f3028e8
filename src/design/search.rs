//! Approximate sequence search collaborators
//!
//! The screen talks to genome-wide off-target search and conserved-domain
//! lookup through [`SequenceSearch`]: one call per batch of queries, one hit
//! list per query. [`GenomeScan`] and [`DomainTable`] are in-process
//! implementations; wrappers around external tools implement the same trait.

use std::io::BufRead;

use super::enumerator::compile_pams;
use super::error::{DesignError, InputError, SearchError};
use super::fasta::GenomeRecord;
use super::interval;
use super::iupac::PamPattern;
use super::pairwise::{pam_adjacent_matches, OrientedSequence};
use super::types::{GenomicInterval, Strand};

/// A guide submitted to a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    /// Candidate id
    pub id: usize,
    /// Protospacer, 5' to 3'
    pub sequence: String,
    pub gene_id: String,
    pub interval: GenomicInterval,
    pub cut_site: u64,
}

/// One approximate occurrence of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Chromosome for genome hits, domain name for domain hits
    pub subject: String,
    pub interval: GenomicInterval,
    pub strand: Strand,
    pub mismatches: u32,
    /// Mismatch positions in the guide, 0 = 5' end; may be empty when the
    /// search only reports counts
    pub mismatch_positions: Vec<usize>,
    pub evalue: Option<f64>,
}

/// A batch-oriented approximate search.
pub trait SequenceSearch: Send + Sync {
    /// Search all queries; the result holds one hit list per query, in
    /// query order.
    fn search(
        &self,
        queries: &[SearchQuery],
        max_mismatches: u32,
    ) -> Result<Vec<Vec<SearchHit>>, SearchError>;
}

/// Brute-force genome scan for PAM-adjacent approximate matches.
#[derive(Debug, Clone)]
pub struct GenomeScan {
    records: Vec<(String, OrientedSequence)>,
    pams: Vec<PamPattern>,
}

impl GenomeScan {
    pub fn new(records: Vec<GenomeRecord>, pam_patterns: &[String]) -> Result<Self, InputError> {
        let pams = compile_pams(pam_patterns)?;
        let records = records
            .into_iter()
            .map(|r| {
                let oriented = OrientedSequence::new(&r.sequence);
                (r.name, oriented)
            })
            .collect();
        Ok(Self { records, pams })
    }

    fn scan_query(&self, guide: &[u8], max_mismatches: u32) -> Vec<SearchHit> {
        let len = guide.len();
        let mut hits = Vec::new();

        for (name, sequence) in &self.records {
            for strand in [Strand::Sense, Strand::Antisense] {
                let oriented = sequence.strand(strand);
                for site in pam_adjacent_matches(oriented, guide, &self.pams, max_mismatches) {
                    let start = sequence.forward_start(strand, site.spacer, len) as u64;
                    hits.push(SearchHit {
                        subject: name.clone(),
                        interval: GenomicInterval::new(name.clone(), start, start + len as u64),
                        strand,
                        mismatches: site.mismatch_positions.len() as u32,
                        mismatch_positions: site.mismatch_positions,
                        evalue: None,
                    });
                }
            }
        }

        hits.sort_by(|a, b| a.interval.cmp(&b.interval).then(a.strand.cmp(&b.strand)));
        hits.dedup_by(|a, b| a.interval == b.interval && a.strand == b.strand);
        hits
    }
}

impl SequenceSearch for GenomeScan {
    fn search(
        &self,
        queries: &[SearchQuery],
        max_mismatches: u32,
    ) -> Result<Vec<Vec<SearchHit>>, SearchError> {
        Ok(queries
            .iter()
            .map(|q| self.scan_query(q.sequence.to_ascii_uppercase().as_bytes(), max_mismatches))
            .collect())
    }
}

/// A conserved functional domain mapped to genome coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainAnnotation {
    pub name: String,
    pub interval: GenomicInterval,
    pub evalue: Option<f64>,
}

/// Domain lookup over pre-computed domain intervals.
///
/// A query hits every domain its protospacer overlaps.
#[derive(Debug, Clone, Default)]
pub struct DomainTable {
    domains: Vec<DomainAnnotation>,
}

impl DomainTable {
    pub fn new(domains: Vec<DomainAnnotation>) -> Self {
        Self { domains }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Read a tab-separated table: `name chrom start end [evalue]`.
    /// Blank lines and `#` comments are skipped.
    pub fn read<R: BufRead>(reader: R) -> Result<Self, DesignError> {
        let mut domains = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = |message: &str| DesignError::Annotation {
                line: i + 1,
                message: message.to_string(),
            };
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 4 {
                return Err(malformed("expected name, chrom, start, end"));
            }
            let start: u64 = fields[2].parse().map_err(|_| malformed("invalid start"))?;
            let end: u64 = fields[3].parse().map_err(|_| malformed("invalid end"))?;
            if end <= start {
                return Err(malformed("end must exceed start"));
            }
            let evalue = match fields.get(4) {
                Some(v) => Some(v.parse::<f64>().map_err(|_| malformed("invalid e-value"))?),
                None => None,
            };
            domains.push(DomainAnnotation {
                name: fields[0].to_string(),
                interval: GenomicInterval::new(fields[1], start, end),
                evalue,
            });
        }
        Ok(Self { domains })
    }
}

impl SequenceSearch for DomainTable {
    fn search(
        &self,
        queries: &[SearchQuery],
        _max_mismatches: u32,
    ) -> Result<Vec<Vec<SearchHit>>, SearchError> {
        Ok(queries
            .iter()
            .map(|q| {
                self.domains
                    .iter()
                    .filter(|d| interval::overlaps(&d.interval, &q.interval))
                    .map(|d| SearchHit {
                        subject: d.name.clone(),
                        interval: d.interval.clone(),
                        strand: Strand::Sense,
                        mismatches: 0,
                        mismatch_positions: Vec::new(),
                        evalue: d.evalue,
                    })
                    .collect()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(sequence: &str) -> SearchQuery {
        SearchQuery {
            id: 0,
            sequence: sequence.to_string(),
            gene_id: "g".to_string(),
            interval: GenomicInterval::new("chr1", 0, sequence.len() as u64),
            cut_site: 0,
        }
    }

    fn scan(genome: &str) -> GenomeScan {
        let records = vec![GenomeRecord {
            name: "chr1".to_string(),
            sequence: genome.as_bytes().to_vec(),
        }];
        GenomeScan::new(records, &["NGG".to_string()]).unwrap()
    }

    #[test]
    fn test_exact_and_mismatch_hits() {
        let genome = scan("AAACGTACGTCAGGAAAAACGTACCTCTGGAA");
        let hits = scan_one(&genome, "ACGTACGTC", 1);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].interval, GenomicInterval::new("chr1", 2, 11));
        assert_eq!(hits[0].mismatches, 0);
        assert_eq!(hits[1].interval, GenomicInterval::new("chr1", 18, 27));
        assert_eq!(hits[1].mismatch_positions, vec![6]);

        let strict = scan_one(&genome, "ACGTACGTC", 0);
        assert_eq!(strict.len(), 1);
    }

    #[test]
    fn test_requires_pam() {
        let genome = scan("AAACGTACGTCGCAAA");
        assert!(scan_one(&genome, "ACGTACGTC", 2).is_empty());
    }

    #[test]
    fn test_antisense_hit() {
        // CCG + reverse complement of the guide: guide sits on the - strand
        let genome = scan("TTCCGGACGTACGTTT");
        let hits = scan_one(&genome, "ACGTACGTC", 0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].strand, Strand::Antisense);
        assert_eq!(hits[0].interval, GenomicInterval::new("chr1", 5, 14));
    }

    fn scan_one(genome: &GenomeScan, guide: &str, mismatches: u32) -> Vec<SearchHit> {
        let mut results = genome.search(&[query(guide)], mismatches).unwrap();
        results.remove(0)
    }

    #[test]
    fn test_domain_table() {
        let tsv = "# name\tchrom\tstart\tend\tevalue\n\
                   kinase\tchr1\t10\t50\t1e-20\n\
                   zinc\tchr1\t100\t150\n";
        let table = DomainTable::read(tsv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);

        let mut q = query("ACGT");
        q.interval = GenomicInterval::new("chr1", 45, 65);
        let hits = table.search(&[q], 0).unwrap();
        assert_eq!(hits[0].len(), 1);
        assert_eq!(hits[0][0].subject, "kinase");
        assert_eq!(hits[0][0].evalue, Some(1e-20));
    }

    #[test]
    fn test_domain_table_rejects_bad_rows() {
        let err = DomainTable::read("kinase\tchr1\t50\t10\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DesignError::Annotation { line: 1, .. }));
        assert!(DomainTable::read("kinase\tchr1\t10\n".as_bytes()).is_err());
    }
}
