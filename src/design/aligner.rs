//! Alignment producers
//!
//! The projector consumes alignment blocks from an [`AlignmentProducer`].
//! [`StarAligner`] builds a single block in-process by aligning every gene
//! against the first one with rust-bio; [`PrecomputedAlignment`] hands back
//! blocks loaded from aligned FASTA files.

use bio::alignment::pairwise::Aligner;
use bio::alignment::{Alignment, AlignmentOperation};
use rayon::prelude::*;
use tracing::debug;

use super::error::SearchError;
use super::iupac::reverse_complement_bytes;
use super::types::{
    AlignmentBlock, AlignmentRow, AlignmentScoringParams, GenomicInterval, Strand, TargetGene,
};

/// Source of alignment blocks for a set of target genes.
pub trait AlignmentProducer: Send + Sync {
    fn align(&self, genes: &[TargetGene]) -> Result<Vec<AlignmentBlock>, SearchError>;
}

/// Blocks computed ahead of time.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedAlignment {
    blocks: Vec<AlignmentBlock>,
}

impl PrecomputedAlignment {
    pub fn new(blocks: Vec<AlignmentBlock>) -> Self {
        Self { blocks }
    }
}

impl AlignmentProducer for PrecomputedAlignment {
    fn align(&self, _genes: &[TargetGene]) -> Result<Vec<AlignmentBlock>, SearchError> {
        Ok(self.blocks.clone())
    }
}

/// Maps template positions to target positions for one target gene.
/// Built from a single pairwise alignment.
#[derive(Debug, Clone)]
pub struct PositionMap {
    /// For each template position, the corresponding target position.
    /// None means the template position is deleted in the target.
    template_to_target: Vec<Option<usize>>,
    /// Target residues inserted before each template position; the last
    /// slot holds residues after the final template position
    insertions: Vec<Vec<u8>>,
    /// Aligned target range, end exclusive
    pub target_span: (usize, usize),
    pub score: i32,
    /// template_len * match_score
    pub max_possible_score: i32,
    pub is_valid: bool,
}

impl PositionMap {
    /// Build a position map from a semiglobal(template, target) alignment.
    ///
    /// The template (x) is fully aligned, the target (y) has free end gaps:
    /// - Match/Subst: both advance
    /// - Ins: template base against a target gap
    /// - Del: target base against a template gap, recorded as an insertion
    /// - clips carry no residues of the aligned span
    pub fn from_alignment(
        alignment: &Alignment,
        target: &[u8],
        template_len: usize,
        scoring: &AlignmentScoringParams,
    ) -> Self {
        let max_possible_score = template_len as i32 * scoring.match_score;
        let score_fraction = if max_possible_score > 0 {
            alignment.score as f64 / max_possible_score as f64
        } else {
            0.0
        };
        let is_valid =
            scoring.min_score_fraction <= 0.0 || score_fraction >= scoring.min_score_fraction;

        let mut template_to_target = vec![None; template_len];
        let mut insertions = vec![Vec::new(); template_len + 1];
        let mut x_pos = alignment.xstart;
        let mut y_pos = alignment.ystart;

        for op in &alignment.operations {
            match op {
                AlignmentOperation::Match | AlignmentOperation::Subst => {
                    if x_pos < template_len {
                        template_to_target[x_pos] = Some(y_pos);
                    }
                    x_pos += 1;
                    y_pos += 1;
                }
                AlignmentOperation::Ins => {
                    x_pos += 1;
                }
                AlignmentOperation::Del => {
                    let slot = insertions.get_mut(x_pos);
                    if let (Some(slot), Some(&residue)) = (slot, target.get(y_pos)) {
                        slot.push(residue);
                    }
                    y_pos += 1;
                }
                AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => {}
            }
        }

        Self {
            template_to_target,
            insertions,
            target_span: (alignment.ystart, y_pos),
            score: alignment.score,
            max_possible_score,
            is_valid,
        }
    }

    fn insertion_width(&self, slot: usize) -> usize {
        self.insertions.get(slot).map(Vec::len).unwrap_or(0)
    }
}

/// Star alignment against the first target gene.
///
/// Every gene is aligned in its own orientation, so antisense rows come out
/// in transcript orientation as the projector expects.
#[derive(Debug, Clone, Default)]
pub struct StarAligner {
    scoring: AlignmentScoringParams,
}

impl StarAligner {
    pub fn new(scoring: AlignmentScoringParams) -> Self {
        Self { scoring }
    }
}

impl AlignmentProducer for StarAligner {
    fn align(&self, genes: &[TargetGene]) -> Result<Vec<AlignmentBlock>, SearchError> {
        if genes.is_empty() {
            return Ok(Vec::new());
        }

        let oriented: Vec<Vec<u8>> = genes.iter().map(gene_orientation).collect();
        let template = &oriented[0];
        let scoring = &self.scoring;

        let maps: Vec<PositionMap> = oriented[1..]
            .par_iter()
            .map(|target| {
                let scoring_fn = |a: u8, b: u8| -> i32 {
                    if a == b {
                        scoring.match_score
                    } else {
                        scoring.mismatch_score
                    }
                };
                let mut aligner = Aligner::with_capacity(
                    template.len(),
                    target.len(),
                    scoring.gap_open,
                    scoring.gap_extend,
                    scoring_fn,
                );
                let alignment = aligner.semiglobal(template, target);
                PositionMap::from_alignment(&alignment, target, template.len(), scoring)
            })
            .collect();

        for (gene, map) in genes[1..].iter().zip(&maps) {
            if !map.is_valid {
                return Err(SearchError::Failed(format!(
                    "gene '{}' aligns to '{}' with score {} of {}",
                    gene.id, genes[0].id, map.score, map.max_possible_score
                )));
            }
        }

        let block = build_block(genes, &oriented, &maps);
        debug!(rows = block.rows.len(), columns = block.width(), "star alignment built");
        Ok(vec![block])
    }
}

/// Upper-case gene sequence in the gene's own orientation.
fn gene_orientation(gene: &TargetGene) -> Vec<u8> {
    let forward = gene.sequence.to_ascii_uppercase().into_bytes();
    match gene.strand {
        Strand::Sense => forward,
        Strand::Antisense => reverse_complement_bytes(&forward),
    }
}

/// Lay the template and all mapped targets out as gapped rows.
fn build_block(genes: &[TargetGene], oriented: &[Vec<u8>], maps: &[PositionMap]) -> AlignmentBlock {
    let template = &oriented[0];
    let template_len = template.len();
    let widths: Vec<usize> = (0..=template_len)
        .map(|slot| maps.iter().map(|m| m.insertion_width(slot)).max().unwrap_or(0))
        .collect();

    let mut template_row = Vec::new();
    for (slot, &width) in widths.iter().enumerate() {
        template_row.extend(std::iter::repeat(b'-').take(width));
        if let Some(&residue) = template.get(slot) {
            template_row.push(residue);
        }
    }

    let mut rows = vec![AlignmentRow {
        gene_id: genes[0].id.clone(),
        interval: None,
        residues: String::from_utf8_lossy(&template_row).into_owned(),
    }];

    for ((gene, target), map) in genes[1..].iter().zip(&oriented[1..]).zip(maps) {
        let mut residues = Vec::with_capacity(template_row.len());
        for (slot, &width) in widths.iter().enumerate() {
            let inserted = map.insertions.get(slot).map(Vec::as_slice).unwrap_or(&[]);
            residues.extend_from_slice(inserted);
            residues.extend(std::iter::repeat(b'-').take(width - inserted.len()));
            if slot < template_len {
                let residue = map.template_to_target[slot]
                    .and_then(|x| target.get(x).copied())
                    .unwrap_or(b'-');
                residues.push(residue);
            }
        }

        rows.push(AlignmentRow {
            gene_id: gene.id.clone(),
            interval: Some(aligned_interval(gene, map.target_span)),
            residues: String::from_utf8_lossy(&residues).into_owned(),
        });
    }

    AlignmentBlock { rows }
}

/// Genomic interval of an aligned span given in gene orientation.
fn aligned_interval(gene: &TargetGene, (start, end): (usize, usize)) -> GenomicInterval {
    let chrom = gene.interval.chrom.clone();
    let (start, end) = (start as u64, end as u64);
    match gene.strand {
        Strand::Sense => {
            GenomicInterval::new(chrom, gene.interval.start + start, gene.interval.start + end)
        }
        Strand::Antisense => {
            GenomicInterval::new(chrom, gene.interval.end - end, gene.interval.end - start)
        }
    }
}
