//! Candidate x gene coverage relation
//!
//! An edge means a screened, passing candidate is predicted to cut a target
//! gene: the guide has a PAM-adjacent ungapped match in the gene within the
//! coverage mismatch budget.

use std::collections::HashSet;

use tracing::{debug, info};

use super::iupac::PamPattern;
use super::pairwise::{best_gene_match, orient_genes};
use super::types::{Candidate, CoverageEdge, CoverageParams, TargetGene};

/// Bipartite coverage relation, indexed both ways.
///
/// Candidate indices refer to positions in the screened candidate slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageIndex {
    pub edges: Vec<CoverageEdge>,
    genes_by_candidate: Vec<Vec<usize>>,
    candidates_by_gene: Vec<Vec<usize>>,
    /// Genes with at least one edge
    pub reachable: Vec<usize>,
    /// Genes no passing candidate covers
    pub unreachable: Vec<usize>,
}

impl CoverageIndex {
    /// Build the relation over passing candidates.
    ///
    /// Candidates with the same guide sequence collapse onto the one with
    /// the lowest index; the others get no edges.
    pub fn build(
        candidates: &[Candidate],
        genes: &[TargetGene],
        pams: &[PamPattern],
        params: &CoverageParams,
    ) -> Self {
        let oriented = orient_genes(genes);
        let mut edges = Vec::new();
        let mut seen_sequences: HashSet<String> = HashSet::new();
        let mut collapsed = 0usize;

        for (index, candidate) in candidates.iter().enumerate() {
            if !candidate.passed() {
                continue;
            }
            if !seen_sequences.insert(candidate.sequence.to_ascii_uppercase()) {
                collapsed += 1;
                continue;
            }

            let guide = candidate.sequence.as_bytes();
            for (gene, sequence) in oriented.iter().enumerate() {
                let budget = params.mismatch_budget;
                let Some(quality) = best_gene_match(guide, sequence, pams, budget) else {
                    continue;
                };
                edges.push(CoverageEdge {
                    candidate: index,
                    gene,
                    quality,
                });
            }
        }

        if collapsed > 0 {
            debug!(collapsed, "collapsed duplicate guide sequences");
        }
        let index = Self::from_edges(candidates.len(), genes.len(), edges);
        info!(
            edges = index.edges.len(),
            reachable = index.reachable.len(),
            unreachable = index.unreachable.len(),
            "coverage index built"
        );
        index
    }

    /// Index a precomputed relation. Edges pointing outside the given
    /// counts are dropped.
    pub fn from_edges(
        candidate_count: usize,
        gene_count: usize,
        mut edges: Vec<CoverageEdge>,
    ) -> Self {
        edges.retain(|e| e.candidate < candidate_count && e.gene < gene_count);
        edges.sort_by_key(|e| (e.candidate, e.gene));
        edges.dedup_by_key(|e| (e.candidate, e.gene));

        let mut genes_by_candidate = vec![Vec::new(); candidate_count];
        let mut candidates_by_gene = vec![Vec::new(); gene_count];
        for edge in &edges {
            genes_by_candidate[edge.candidate].push(edge.gene);
            candidates_by_gene[edge.gene].push(edge.candidate);
        }

        let (reachable, unreachable): (Vec<usize>, Vec<usize>) =
            (0..gene_count).partition(|&g| !candidates_by_gene[g].is_empty());

        Self {
            edges,
            genes_by_candidate,
            candidates_by_gene,
            reachable,
            unreachable,
        }
    }

    /// Genes covered by a candidate, ascending.
    pub fn genes_of(&self, candidate: usize) -> &[usize] {
        self.genes_by_candidate
            .get(candidate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Candidates covering a gene, ascending.
    pub fn candidates_of(&self, gene: usize) -> &[usize] {
        self.candidates_by_gene
            .get(gene)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn edge(&self, candidate: usize, gene: usize) -> Option<&CoverageEdge> {
        self.edges
            .iter()
            .find(|e| e.candidate == candidate && e.gene == gene)
    }

    /// Candidates with at least one edge, ascending.
    pub fn usable_candidates(&self) -> Vec<usize> {
        (0..self.genes_by_candidate.len())
            .filter(|&c| !self.genes_by_candidate[c].is_empty())
            .collect()
    }

    pub fn candidate_count(&self) -> usize {
        self.genes_by_candidate.len()
    }

    pub fn gene_count(&self) -> usize {
        self.candidates_by_gene.len()
    }
}
