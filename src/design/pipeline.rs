//! End-to-end guide set design
//!
//! Runs the stages in order: alignment, projection, enumeration, screening,
//! coverage, selection and report assembly. Only screening fans out.

use std::collections::HashSet;

use tracing::info;

use super::aligner::AlignmentProducer;
use super::coverage::CoverageIndex;
use super::enumerator::{compile_pams, enumerate_candidates};
use super::error::{DesignError, InputError};
use super::iupac::is_nucleotide;
use super::projector::{project_alignment, AlignmentProjection};
use super::report::{assemble_report, DesignReport};
use super::screen::{screen_candidates, OffTargetScorer, PositionWeightedScorer};
use super::search::SequenceSearch;
use super::selector::select_guide_sets;
use super::types::{Candidate, DesignParams, GuideSetSolution, TargetGene};

/// External collaborators of a run.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub aligner: &'a dyn AlignmentProducer,
    pub genome: &'a dyn SequenceSearch,
    /// Required when protected domains are configured
    pub domains: Option<&'a dyn SequenceSearch>,
    /// Defaults to [`PositionWeightedScorer`] built from the screen params
    pub scorer: Option<&'a dyn OffTargetScorer>,
}

/// Everything a run produced, for callers that need more than the report.
#[derive(Debug, Clone)]
pub struct DesignRun {
    pub report: DesignReport,
    pub projection: AlignmentProjection,
    /// Screened candidates, indexed by id
    pub candidates: Vec<Candidate>,
    pub coverage: CoverageIndex,
    pub solutions: Vec<GuideSetSolution>,
}

/// Reject malformed genes and parameters before any collaborator runs.
pub fn validate_inputs(
    genes: &[TargetGene],
    params: &DesignParams,
    collaborators: &Collaborators<'_>,
) -> Result<(), InputError> {
    if genes.is_empty() {
        return Err(InputError::NoTargets);
    }

    let mut ids = HashSet::new();
    for gene in genes {
        if !ids.insert(gene.id.as_str()) {
            return Err(InputError::DuplicateGene(gene.id.clone()));
        }
        if gene.interval.start >= gene.interval.end || gene.interval.chrom.is_empty() {
            return Err(InputError::MalformedCoordinates {
                gene: gene.id.clone(),
                start: gene.interval.start,
                end: gene.interval.end,
            });
        }
        if gene.sequence.len() as u64 != gene.interval.len() {
            return Err(InputError::SequenceLengthMismatch {
                gene: gene.id.clone(),
                sequence_len: gene.sequence.len(),
                interval_len: gene.interval.len(),
            });
        }
        let invalid_base = gene.sequence.chars().enumerate().find(|(_, c)| !is_nucleotide(*c));
        if let Some((position, found)) = invalid_base {
            return Err(InputError::InvalidBase {
                gene: gene.id.clone(),
                found,
                position,
            });
        }
    }

    compile_pams(&params.enumeration.pam_patterns)?;

    let invalid = |message: String| Err(InputError::InvalidParameter(message));
    let enumeration = &params.enumeration;
    if enumeration.guide_length == 0 {
        return invalid("guide_length must be positive".to_string());
    }
    if enumeration.cut_offset > enumeration.guide_length {
        return invalid(format!(
            "cut_offset {} exceeds guide_length {}",
            enumeration.cut_offset, enumeration.guide_length
        ));
    }
    if params.selection.redundancy == 0 {
        return invalid("redundancy must be at least 1".to_string());
    }

    let fractions = [
        ("conservation_threshold", params.projection.conservation_threshold),
        ("min_column_coverage", params.projection.min_column_coverage),
        ("distal_weight", params.screen.distal_weight),
        ("proximal_weight", params.screen.proximal_weight),
    ];
    for (name, value) in fractions {
        if !(0.0..=1.0).contains(&value) {
            return invalid(format!("{name} must lie in [0, 1], got {value}"));
        }
    }
    if let Some((lo, hi)) = enumeration.gc_range {
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
            return invalid(format!("gc_range ({lo}, {hi})"));
        }
    }
    if params.screen.batch_size == Some(0) {
        return invalid("batch_size must be positive".to_string());
    }
    if params.screen.offtarget_mismatch_budget > params.screen.search_mismatches {
        return invalid(format!(
            "offtarget_mismatch_budget {} exceeds search_mismatches {}",
            params.screen.offtarget_mismatch_budget, params.screen.search_mismatches
        ));
    }
    if !params.screen.protected_domains.is_empty() && collaborators.domains.is_none() {
        return invalid("protected_domains requires a domain search".to_string());
    }

    Ok(())
}

/// Design minimum guide sets for `genes`.
///
/// Bad input and corrupt alignments are errors; screening failures and
/// uncoverable genes are reported in the returned report.
pub fn run_design(
    genes: &[TargetGene],
    params: &DesignParams,
    collaborators: &Collaborators<'_>,
) -> Result<DesignRun, DesignError> {
    validate_inputs(genes, params, collaborators)?;
    let pams = compile_pams(&params.enumeration.pam_patterns)?;

    let blocks = collaborators
        .aligner
        .align(genes)
        .map_err(DesignError::Alignment)?;
    let projection = project_alignment(&blocks, genes, &params.projection)?;
    info!(
        genes = genes.len(),
        blocks = blocks.len(),
        regions = projection.regions.len(),
        "alignment projected"
    );

    let candidates = enumerate_candidates(
        genes,
        Some(&projection),
        &params.enumeration,
        &params.excluded_guides,
    )?;
    info!(candidates = candidates.len(), "candidates enumerated");

    // The first PAM decides which end of the guide is PAM-proximal
    let default_scorer = PositionWeightedScorer::from_params(&params.screen, pams[0].side);
    let scorer: &dyn OffTargetScorer = match collaborators.scorer {
        Some(scorer) => scorer,
        None => &default_scorer,
    };
    let screened = screen_candidates(
        candidates,
        genes,
        collaborators.genome,
        collaborators.domains,
        &params.screen,
        scorer,
    );

    let coverage = CoverageIndex::build(&screened.candidates, genes, &pams, &params.coverage);
    let solutions = select_guide_sets(&coverage, &screened.candidates, genes, &params.selection);
    let report = assemble_report(
        genes,
        &screened.candidates,
        &coverage,
        &solutions,
        screened.summary,
    );
    info!(
        status = ?report.status,
        solutions = report.solutions.len(),
        unreachable = report.unreachable_genes.len(),
        "design finished"
    );

    Ok(DesignRun {
        report,
        projection,
        candidates: screened.candidates,
        coverage,
        solutions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::aligner::PrecomputedAlignment;
    use crate::design::error::SearchError;
    use crate::design::search::{SearchHit, SearchQuery};
    use crate::design::types::{AlignmentBlock, GenomicInterval, Strand};

    struct NoHits;

    impl SequenceSearch for NoHits {
        fn search(
            &self,
            queries: &[SearchQuery],
            _max: u32,
        ) -> Result<Vec<Vec<SearchHit>>, SearchError> {
            Ok(vec![Vec::new(); queries.len()])
        }
    }

    struct FailingAligner;

    impl AlignmentProducer for FailingAligner {
        fn align(&self, _genes: &[TargetGene]) -> Result<Vec<AlignmentBlock>, SearchError> {
            Err(SearchError::Failed("aligner crashed".to_string()))
        }
    }

    fn gene(id: &str, start: u64, seq: &str) -> TargetGene {
        TargetGene {
            id: id.to_string(),
            interval: GenomicInterval::new("chr1", start, start + seq.len() as u64),
            strand: Strand::Sense,
            sequence: seq.to_string(),
        }
    }

    fn collaborators<'a>(
        aligner: &'a dyn AlignmentProducer,
        genome: &'a dyn SequenceSearch,
    ) -> Collaborators<'a> {
        Collaborators {
            aligner,
            genome,
            domains: None,
            scorer: None,
        }
    }

    #[test]
    fn test_validate_rejects_bad_genes() {
        let aligner = PrecomputedAlignment::default();
        let collab = collaborators(&aligner, &NoHits);
        let params = DesignParams::default();

        assert_eq!(validate_inputs(&[], &params, &collab), Err(InputError::NoTargets));

        let dup = vec![gene("a", 0, "ACGT"), gene("a", 10, "ACGT")];
        assert_eq!(
            validate_inputs(&dup, &params, &collab),
            Err(InputError::DuplicateGene("a".to_string()))
        );

        let mut short = gene("a", 0, "ACGT");
        short.sequence = "ACG".to_string();
        assert!(matches!(
            validate_inputs(&[short], &params, &collab),
            Err(InputError::SequenceLengthMismatch { .. })
        ));

        let mut empty = gene("a", 0, "ACGT");
        empty.interval = GenomicInterval::new("chr1", 5, 5);
        assert!(matches!(
            validate_inputs(&[empty], &params, &collab),
            Err(InputError::MalformedCoordinates { .. })
        ));

        assert!(matches!(
            validate_inputs(&[gene("a", 0, "ACXT")], &params, &collab),
            Err(InputError::InvalidBase { found: 'X', position: 2, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let aligner = PrecomputedAlignment::default();
        let collab = collaborators(&aligner, &NoHits);
        let genes = vec![gene("a", 0, "ACGT")];

        let mut params = DesignParams::default();
        params.selection.redundancy = 0;
        assert!(validate_inputs(&genes, &params, &collab).is_err());

        let mut params = DesignParams::default();
        params.enumeration.pam_patterns = vec!["NXG".to_string()];
        assert_eq!(
            validate_inputs(&genes, &params, &collab),
            Err(InputError::InvalidPam("NXG".to_string()))
        );

        let mut params = DesignParams::default();
        params.enumeration.guide_length = 0;
        assert!(validate_inputs(&genes, &params, &collab).is_err());

        let mut params = DesignParams::default();
        params.projection.conservation_threshold = 1.5;
        assert!(validate_inputs(&genes, &params, &collab).is_err());

        let mut params = DesignParams::default();
        params.screen.protected_domains = vec!["kinase".to_string()];
        assert!(validate_inputs(&genes, &params, &collab).is_err());
    }

    #[test]
    fn test_aligner_failure_aborts() {
        let collab = collaborators(&FailingAligner, &NoHits);
        let genes = vec![gene("a", 0, "ACGT")];
        let err = run_design(&genes, &DesignParams::default(), &collab).unwrap_err();
        assert!(matches!(err, DesignError::Alignment(_)));
    }

    #[test]
    fn test_missing_gene_in_alignment_aborts() {
        let aligner = PrecomputedAlignment::default();
        let collab = collaborators(&aligner, &NoHits);
        let genes = vec![gene("a", 0, "ACGT")];
        let err = run_design(&genes, &DesignParams::default(), &collab).unwrap_err();
        assert!(matches!(err, DesignError::Projection(_)));
    }
}
