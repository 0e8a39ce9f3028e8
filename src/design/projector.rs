//! Projection of alignment columns onto gene coordinates
//!
//! Each aligned residue of a gene is mapped back to its genomic offset and
//! every column is classified as conserved, variable or excluded. Runs of
//! equally classified, genomically adjacent residues become
//! [`ConservedRegion`]s that the enumerator consults.

use std::collections::HashMap;

use tracing::debug;

use super::error::ProjectionError;
use super::interval;
use super::iupac::{base_to_bit, complement};
use super::types::{
    AlignmentBlock, ConservedRegion, GenomicInterval, ProjectionParams, RegionClass, Strand,
    TargetGene,
};

/// Offsets of one gene's residues within one block.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneProjection {
    pub gene_index: usize,
    /// (genomic offset, column index), in column order
    pub offsets: Vec<(u64, usize)>,
}

/// Column classes and gene projections of one alignment block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockProjection {
    pub classes: Vec<RegionClass>,
    pub genes: Vec<GeneProjection>,
}

/// Result of projecting all alignment blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentProjection {
    pub blocks: Vec<BlockProjection>,
    /// Merged regions, ordered by gene id, class and interval
    pub regions: Vec<ConservedRegion>,
}

impl AlignmentProjection {
    pub fn regions_for<'a>(
        &'a self,
        gene_id: &'a str,
        class: RegionClass,
    ) -> impl Iterator<Item = &'a ConservedRegion> + 'a {
        self.regions
            .iter()
            .filter(move |r| r.gene_id == gene_id && r.class == class)
    }

    /// True when `candidate` lies entirely inside a region of `class`.
    pub fn within(&self, gene_id: &str, class: RegionClass, candidate: &GenomicInterval) -> bool {
        self.regions_for(gene_id, class)
            .any(|r| interval::contains(&r.interval, candidate))
    }

    pub fn touches(&self, gene_id: &str, class: RegionClass, candidate: &GenomicInterval) -> bool {
        self.regions_for(gene_id, class)
            .any(|r| interval::overlaps(&r.interval, candidate))
    }
}

/// Project alignment blocks onto the target genes.
pub fn project_alignment(
    blocks: &[AlignmentBlock],
    genes: &[TargetGene],
    params: &ProjectionParams,
) -> Result<AlignmentProjection, ProjectionError> {
    let gene_lookup: HashMap<&str, usize> = genes
        .iter()
        .enumerate()
        .map(|(i, g)| (g.id.as_str(), i))
        .collect();

    let mut seen = vec![false; genes.len()];
    // last projected offset per gene, blocks are read in order
    let mut last_offset: Vec<Option<u64>> = vec![None; genes.len()];
    let mut aligned: Vec<Vec<GenomicInterval>> = vec![Vec::new(); genes.len()];
    let mut projection = AlignmentProjection::default();
    let mut raw_regions: HashMap<(usize, RegionClass), Vec<GenomicInterval>> = HashMap::new();

    for (block_idx, block) in blocks.iter().enumerate() {
        let block_projection = project_block(block_idx, block, genes, &gene_lookup, params)?;

        for gene in &block_projection.genes {
            seen[gene.gene_index] = true;
            let target = &genes[gene.gene_index];
            let previous = last_offset[gene.gene_index];
            if let (Some(previous), Some(&(first, column))) = (previous, gene.offsets.first()) {
                let advances = match target.strand {
                    Strand::Sense => first > previous,
                    Strand::Antisense => first < previous,
                };
                if !advances {
                    return Err(ProjectionError::NonMonotonic {
                        gene: target.id.clone(),
                        block: block_idx,
                        column,
                    });
                }
            }
            if let Some(&(last, _)) = gene.offsets.last() {
                last_offset[gene.gene_index] = Some(last);
                let (lo, hi) = gene
                    .offsets
                    .iter()
                    .fold((last, last), |(lo, hi), &(o, _)| (lo.min(o), hi.max(o)));
                let chrom = target.interval.chrom.clone();
                aligned[gene.gene_index].push(GenomicInterval::new(chrom, lo, hi + 1));
            }
            for (class, region) in collapse_runs(target, &gene.offsets, &block_projection.classes) {
                raw_regions
                    .entry((gene.gene_index, class))
                    .or_default()
                    .push(region);
            }
        }

        projection.blocks.push(block_projection);
    }

    if let Some(missing) = seen.iter().position(|&s| !s) {
        return Err(ProjectionError::GeneNotAligned(genes[missing].id.clone()));
    }

    // gene positions no block aligns carry no conservation signal
    for (gene_index, spans) in aligned.iter().enumerate() {
        let whole = std::slice::from_ref(&genes[gene_index].interval);
        let unaligned = interval::subtract(whole, spans);
        if !unaligned.is_empty() {
            raw_regions
                .entry((gene_index, RegionClass::Excluded))
                .or_default()
                .extend(unaligned);
        }
    }

    let mut keys: Vec<(usize, RegionClass)> = raw_regions.keys().copied().collect();
    keys.sort_by(|a, b| genes[a.0].id.cmp(&genes[b.0].id).then(a.1.cmp(&b.1)));
    for key in keys {
        let merged = interval::merge(&raw_regions[&key]);
        projection
            .regions
            .extend(merged.into_iter().map(|interval| ConservedRegion {
                gene_id: genes[key.0].id.clone(),
                interval,
                class: key.1,
            }));
    }

    debug!(
        blocks = projection.blocks.len(),
        regions = projection.regions.len(),
        "projected alignment"
    );

    Ok(projection)
}

fn project_block(
    block_idx: usize,
    block: &AlignmentBlock,
    genes: &[TargetGene],
    gene_lookup: &HashMap<&str, usize>,
    params: &ProjectionParams,
) -> Result<BlockProjection, ProjectionError> {
    let width = block.width();
    let mut row_genes = Vec::with_capacity(block.rows.len());

    for row in &block.rows {
        let &gene_index = gene_lookup
            .get(row.gene_id.as_str())
            .ok_or_else(|| ProjectionError::UnknownRow(row.gene_id.clone()))?;
        if row_genes.contains(&gene_index) {
            return Err(ProjectionError::DuplicateRow {
                gene: row.gene_id.clone(),
                block: block_idx,
            });
        }
        if row.residues.len() != width {
            return Err(ProjectionError::RaggedBlock {
                block: block_idx,
                gene: row.gene_id.clone(),
                found: row.residues.len(),
                expected: width,
            });
        }
        row_genes.push(gene_index);
    }

    let classes = classify_columns(block, params);

    let mut projected = Vec::with_capacity(block.rows.len());
    for (row, &gene_index) in block.rows.iter().zip(&row_genes) {
        let gene = &genes[gene_index];
        let region = row.interval.clone().unwrap_or_else(|| gene.interval.clone());
        if !interval::contains(&gene.interval, &region) {
            return Err(ProjectionError::RowOutsideGene {
                gene: gene.id.clone(),
            });
        }

        let residue_count = row.residues.bytes().filter(|&b| b != b'-').count();
        if residue_count as u64 != region.len() {
            return Err(ProjectionError::Incomplete {
                gene: gene.id.clone(),
                residues: residue_count,
                interval_len: region.len(),
            });
        }

        let gene_bytes = gene.sequence.as_bytes();
        let mut offsets = Vec::with_capacity(residue_count);
        let mut k = 0u64;
        for (column, residue) in row.residues.bytes().enumerate() {
            if residue == b'-' {
                continue;
            }
            let offset = match gene.strand {
                Strand::Sense => region.start + k,
                Strand::Antisense => region.end - 1 - k,
            };
            k += 1;

            let genomic = gene_bytes
                .get((offset - gene.interval.start) as usize)
                .copied()
                .unwrap_or(0);
            let expected = match gene.strand {
                Strand::Sense => genomic,
                Strand::Antisense => complement(genomic),
            };
            if base_to_bit(expected) & base_to_bit(residue) == 0 {
                return Err(ProjectionError::ResidueMismatch {
                    gene: gene.id.clone(),
                    column,
                });
            }

            offsets.push((offset, column));
        }

        projected.push(GeneProjection {
            gene_index,
            offsets,
        });
    }

    Ok(BlockProjection {
        classes,
        genes: projected,
    })
}

/// Classify every column of a block by gap coverage and residue identity.
/// Rows shorter than the block count as gaps past their end.
pub fn classify_columns(block: &AlignmentBlock, params: &ProjectionParams) -> Vec<RegionClass> {
    let rows: Vec<&[u8]> = block.rows.iter().map(|r| r.residues.as_bytes()).collect();
    let total = rows.len();

    (0..block.width())
        .map(|column| {
            let mut counts: HashMap<u8, usize> = HashMap::new();
            for row in &rows {
                let residue = row.get(column).map_or(b'-', u8::to_ascii_uppercase);
                if residue != b'-' {
                    *counts.entry(residue).or_insert(0) += 1;
                }
            }
            let present: usize = counts.values().sum();
            if total == 0 || (present as f64 / total as f64) < params.min_column_coverage {
                return RegionClass::Excluded;
            }
            let most_common = counts.values().copied().max().unwrap_or(0);
            if most_common as f64 / present as f64 >= params.conservation_threshold {
                RegionClass::Conserved
            } else {
                RegionClass::Variable
            }
        })
        .collect()
}

/// Collapse runs of adjacent, equally classified residues into intervals.
fn collapse_runs(
    gene: &TargetGene,
    offsets: &[(u64, usize)],
    classes: &[RegionClass],
) -> Vec<(RegionClass, GenomicInterval)> {
    let mut runs: Vec<(RegionClass, u64, u64)> = Vec::new();

    for &(offset, column) in offsets {
        let class = classes[column];
        match runs.last_mut() {
            Some((run_class, lo, hi))
                if *run_class == class && (offset + 1 == *lo || offset == *hi) =>
            {
                *lo = (*lo).min(offset);
                *hi = (*hi).max(offset + 1);
            }
            _ => runs.push((class, offset, offset + 1)),
        }
    }

    runs.into_iter()
        .map(|(class, lo, hi)| {
            (
                class,
                GenomicInterval::new(gene.interval.chrom.clone(), lo, hi),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::iupac::reverse_complement;
    use crate::design::types::AlignmentRow;

    fn gene(id: &str, start: u64, strand: Strand, seq: &str) -> TargetGene {
        TargetGene {
            id: id.to_string(),
            interval: GenomicInterval::new("chr1", start, start + seq.len() as u64),
            strand,
            sequence: seq.to_string(),
        }
    }

    fn row(id: &str, residues: &str) -> AlignmentRow {
        AlignmentRow {
            gene_id: id.to_string(),
            interval: None,
            residues: residues.to_string(),
        }
    }

    #[test]
    fn test_classify_columns() {
        let block = AlignmentBlock {
            rows: vec![row("a", "ACGT-"), row("b", "ACCT-"), row("c", "AC-TA")],
        };
        let params = ProjectionParams {
            conservation_threshold: 1.0,
            min_column_coverage: 0.5,
        };
        let classes = classify_columns(&block, &params);
        assert_eq!(
            classes,
            vec![
                RegionClass::Conserved,
                RegionClass::Conserved,
                RegionClass::Variable,
                RegionClass::Conserved,
                RegionClass::Excluded,
            ]
        );
    }

    #[test]
    fn test_classify_ragged_block() {
        let block = AlignmentBlock {
            rows: vec![row("a", "ACGT"), row("b", "AC")],
        };
        let params = ProjectionParams {
            conservation_threshold: 1.0,
            min_column_coverage: 0.6,
        };
        assert_eq!(
            classify_columns(&block, &params),
            vec![
                RegionClass::Conserved,
                RegionClass::Conserved,
                RegionClass::Excluded,
                RegionClass::Excluded,
            ]
        );
    }

    #[test]
    fn test_offsets_strictly_monotonic() {
        let genes = vec![
            gene("a", 100, Strand::Sense, "ACGTAC"),
            gene("b", 500, Strand::Antisense, &reverse_complement("ACGAC")),
        ];
        let block = AlignmentBlock {
            rows: vec![row("a", "ACGTAC"), row("b", "ACG-AC")],
        };
        let projection =
            project_alignment(&[block], &genes, &ProjectionParams::default()).unwrap();

        let a = &projection.blocks[0].genes[0];
        assert_eq!(a.offsets.first(), Some(&(100, 0)));
        assert!(a.offsets.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 < w[1].1));

        let b = &projection.blocks[0].genes[1];
        assert_eq!(b.offsets.first(), Some(&(504, 0)));
        assert_eq!(b.offsets.last(), Some(&(500, 5)));
        assert!(b.offsets.windows(2).all(|w| w[0].0 > w[1].0 && w[0].1 < w[1].1));
    }

    #[test]
    fn test_regions_are_merged() {
        let genes = vec![
            gene("a", 0, Strand::Sense, "AAAACCCC"),
            gene("b", 50, Strand::Sense, "AAAAGCCC"),
        ];
        let block = AlignmentBlock {
            rows: vec![row("a", "AAAACCCC"), row("b", "AAAAGCCC")],
        };
        let params = ProjectionParams {
            conservation_threshold: 1.0,
            min_column_coverage: 0.5,
        };
        let projection = project_alignment(&[block], &genes, &params).unwrap();
        let conserved: Vec<_> = projection
            .regions_for("a", RegionClass::Conserved)
            .map(|r| r.interval.clone())
            .collect();
        assert_eq!(
            conserved,
            vec![GenomicInterval::new("chr1", 0, 4), GenomicInterval::new("chr1", 5, 8)]
        );
        let span = |start, end| GenomicInterval::new("chr1", start, end);
        assert!(projection.within("b", RegionClass::Variable, &span(54, 55)));
        assert!(projection.touches("a", RegionClass::Variable, &span(2, 6)));
    }

    #[test]
    fn test_blocks_in_gene_order() {
        let genes = vec![
            gene("a", 100, Strand::Sense, "ACGTTTGGCA"),
            gene("b", 500, Strand::Sense, "ACGTTTGGCA"),
        ];
        let sub_row = |id: &str, start: u64, residues: &str| AlignmentRow {
            gene_id: id.to_string(),
            interval: Some(GenomicInterval::new("chr1", start, start + residues.len() as u64)),
            residues: residues.to_string(),
        };
        let first = AlignmentBlock {
            rows: vec![sub_row("a", 100, "ACGT"), sub_row("b", 500, "ACGT")],
        };
        let second = AlignmentBlock {
            rows: vec![sub_row("a", 106, "GGCA"), sub_row("b", 506, "GGCA")],
        };
        let params = ProjectionParams::default();
        let in_order = [first.clone(), second.clone()];
        let projection = project_alignment(&in_order, &genes, &params).unwrap();
        // TT between the blocks is aligned nowhere
        let excluded: Vec<_> = projection
            .regions_for("a", RegionClass::Excluded)
            .map(|r| r.interval.clone())
            .collect();
        assert_eq!(excluded, vec![GenomicInterval::new("chr1", 104, 106)]);
        let tail = GenomicInterval::new("chr1", 106, 110);
        assert!(projection.within("a", RegionClass::Conserved, &tail));

        let err = project_alignment(&[second, first], &genes, &params).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::NonMonotonic {
                gene: "a".to_string(),
                block: 1,
                column: 0
            }
        );
    }

    #[test]
    fn test_missing_gene_is_error() {
        let genes = vec![gene("a", 0, Strand::Sense, "ACGT"), gene("b", 10, Strand::Sense, "ACGT")];
        let block = AlignmentBlock {
            rows: vec![row("a", "ACGT")],
        };
        let err = project_alignment(&[block], &genes, &ProjectionParams::default()).unwrap_err();
        assert_eq!(err, ProjectionError::GeneNotAligned("b".to_string()));
    }

    #[test]
    fn test_incomplete_and_corrupt_rows() {
        let genes = vec![gene("a", 0, Strand::Sense, "ACGT")];
        let short = AlignmentBlock {
            rows: vec![row("a", "ACG-")],
        };
        assert!(matches!(
            project_alignment(&[short], &genes, &ProjectionParams::default()),
            Err(ProjectionError::Incomplete { .. })
        ));

        let corrupt = AlignmentBlock {
            rows: vec![row("a", "ACCT")],
        };
        assert_eq!(
            project_alignment(&[corrupt], &genes, &ProjectionParams::default()),
            Err(ProjectionError::ResidueMismatch {
                gene: "a".to_string(),
                column: 2
            })
        );
    }

    #[test]
    fn test_duplicate_and_unknown_rows() {
        let genes = vec![gene("a", 0, Strand::Sense, "ACGT")];
        let dup = AlignmentBlock {
            rows: vec![row("a", "ACGT"), row("a", "ACGT")],
        };
        assert!(matches!(
            project_alignment(&[dup], &genes, &ProjectionParams::default()),
            Err(ProjectionError::DuplicateRow { .. })
        ));
        let unknown = AlignmentBlock {
            rows: vec![row("a", "ACGT"), row("z", "ACGT")],
        };
        assert_eq!(
            project_alignment(&[unknown], &genes, &ProjectionParams::default()),
            Err(ProjectionError::UnknownRow("z".to_string()))
        );
    }

    #[test]
    fn test_sub_interval_rows() {
        let genes = vec![gene("a", 100, Strand::Sense, "TTACGTTT")];
        let block = AlignmentBlock {
            rows: vec![AlignmentRow {
                gene_id: "a".to_string(),
                interval: Some(GenomicInterval::new("chr1", 102, 106)),
                residues: "ACGT".to_string(),
            }],
        };
        let projection =
            project_alignment(&[block], &genes, &ProjectionParams::default()).unwrap();
        assert_eq!(
            projection.blocks[0].genes[0].offsets,
            vec![(102, 0), (103, 1), (104, 2), (105, 3)]
        );

        let outside = AlignmentBlock {
            rows: vec![AlignmentRow {
                gene_id: "a".to_string(),
                interval: Some(GenomicInterval::new("chr1", 106, 110)),
                residues: "TTAA".to_string(),
            }],
        };
        assert!(matches!(
            project_alignment(&[outside], &genes, &ProjectionParams::default()),
            Err(ProjectionError::RowOutsideGene { .. })
        ));
    }
}
