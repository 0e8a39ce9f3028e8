//! Guide set reports
//!
//! Turns selected solutions into a self-contained, deterministic report and
//! writes it as JSON, guide FASTA or a tab-separated gene mapping table.

use std::io::Write;

use serde::{Deserialize, Serialize};

use super::coverage::CoverageIndex;
use super::error::DesignError;
use super::screen::ScreeningSummary;
use super::types::{Candidate, GuideSetSolution, SolveMethod, Strand, TargetGene};

/// Overall outcome of a design run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every target gene is covered
    Complete,
    /// Some genes are unreachable or short of the requested redundancy
    Partial,
    /// No guide set could be built
    Failed,
}

impl RunStatus {
    /// Process exit code for the command line driver.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Partial => 2,
            Self::Failed => 1,
        }
    }
}

/// One guide of a reported set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideRecord {
    pub id: usize,
    pub sequence: String,
    pub pam: String,
    pub strand: Strand,
    pub chrom: String,
    pub start: u64,
    pub end: u64,
    pub cut_site: u64,
    pub score: Option<f64>,
    pub source_gene: String,
    /// Target genes this guide is predicted to cut, in input order
    pub covered_genes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionReport {
    /// 1 for the best solution
    pub rank: usize,
    pub method: SolveMethod,
    pub complete: bool,
    /// Ordered by chromosome, start, strand and id
    pub guides: Vec<GuideRecord>,
    pub uncovered_genes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignReport {
    pub status: RunStatus,
    pub message: Option<String>,
    pub candidates_enumerated: usize,
    pub solutions: Vec<SolutionReport>,
    /// Genes no passing candidate covers
    pub unreachable_genes: Vec<String>,
    /// Genes the best solution leaves short, unreachable ones included
    pub uncovered_genes: Vec<String>,
    pub screening: ScreeningSummary,
}

/// Assemble the report for a finished run.
pub fn assemble_report(
    genes: &[TargetGene],
    candidates: &[Candidate],
    index: &CoverageIndex,
    solutions: &[GuideSetSolution],
    screening: ScreeningSummary,
) -> DesignReport {
    let gene_ids = |indices: &[usize]| -> Vec<String> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        sorted
            .into_iter()
            .filter_map(|g| genes.get(g).map(|gene| gene.id.clone()))
            .collect()
    };

    let reports: Vec<SolutionReport> = solutions
        .iter()
        .enumerate()
        .map(|(rank, solution)| {
            let mut picks: Vec<(usize, &Candidate)> = solution
                .candidates
                .iter()
                .filter_map(|&i| candidates.get(i).map(|c| (i, c)))
                .collect();
            picks.sort_by(|(_, a), (_, b)| a.position_key().cmp(&b.position_key()));

            let guides = picks
                .into_iter()
                .map(|(i, c)| GuideRecord {
                    id: c.id,
                    sequence: c.sequence.clone(),
                    pam: c.pam.clone(),
                    strand: c.strand,
                    chrom: c.interval.chrom.clone(),
                    start: c.interval.start,
                    end: c.interval.end,
                    cut_site: c.cut_site,
                    score: c.score,
                    source_gene: c.gene_id.clone(),
                    covered_genes: gene_ids(index.genes_of(i)),
                })
                .collect();

            let uncovered = [solution.uncovered.as_slice(), index.unreachable.as_slice()].concat();
            let uncovered_genes = gene_ids(&uncovered);
            SolutionReport {
                rank: rank + 1,
                method: solution.method,
                complete: solution.complete && uncovered_genes.is_empty(),
                guides,
                uncovered_genes,
            }
        })
        .collect();

    let unreachable_genes = gene_ids(&index.unreachable);
    let uncovered_genes = reports
        .first()
        .map(|r| r.uncovered_genes.clone())
        .unwrap_or_else(|| unreachable_genes.clone());

    let (status, message) = if reports.is_empty() {
        (RunStatus::Failed, Some("no feasible guide set".to_string()))
    } else if !unreachable_genes.is_empty() || !uncovered_genes.is_empty() {
        (RunStatus::Partial, Some("not all target genes could be covered".to_string()))
    } else {
        (RunStatus::Complete, None)
    };

    DesignReport {
        status,
        message,
        candidates_enumerated: candidates.len(),
        solutions: reports,
        unreachable_genes,
        uncovered_genes,
        screening,
    }
}

impl DesignReport {
    pub fn write_json<W: Write>(&self, writer: W) -> Result<(), DesignError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Guide sequences of every solution, `>set1_guide1 ...` style headers.
    pub fn write_fasta<W: Write>(&self, mut writer: W) -> Result<(), DesignError> {
        for solution in &self.solutions {
            for (n, guide) in solution.guides.iter().enumerate() {
                writeln!(
                    writer,
                    ">set{}_guide{} candidate={} {}:{}-{}({}) pam={}",
                    solution.rank,
                    n + 1,
                    guide.id,
                    guide.chrom,
                    guide.start,
                    guide.end,
                    guide.strand,
                    guide.pam
                )?;
                writeln!(writer, "{}", guide.sequence)?;
            }
        }
        Ok(())
    }

    /// Tab-separated guide to gene mapping.
    pub fn write_mapping<W: Write>(&self, mut writer: W) -> Result<(), DesignError> {
        writeln!(writer, "set\tguide\tsequence\tstrand\tlocation\tscore\ttargets")?;
        for solution in &self.solutions {
            for (n, guide) in solution.guides.iter().enumerate() {
                let score = guide
                    .score
                    .map(|s| format!("{s:.4}"))
                    .unwrap_or_else(|| "NA".to_string());
                writeln!(
                    writer,
                    "{}\tset{}_guide{}\t{}\t{}\t{}:{}-{}\t{}\t{}",
                    solution.rank,
                    solution.rank,
                    n + 1,
                    guide.sequence,
                    guide.strand,
                    guide.chrom,
                    guide.start,
                    guide.end,
                    score,
                    guide.covered_genes.join(",")
                )?;
            }
        }
        Ok(())
    }
}
