//! Off-target and domain screening
//!
//! Candidates are split into batches and screened on a rayon pool. Each
//! batch makes one genome search call and at most one domain search call.
//! A failed call does not abort the run: the batch's candidates become
//! [`Verdict::Unknown`] and the failure is recorded in the summary.

use std::collections::HashSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::{ScreeningBatchError, SearchError};
use super::interval;
use super::iupac::PamSide;
use super::search::{SearchHit, SearchQuery, SequenceSearch};
use super::types::{Candidate, GenomicInterval, ScreenParams, TargetGene, Verdict};

/// Specificity score of a candidate from its off-target hits.
///
/// Higher is more specific. Implementations must be monotonic: adding a
/// hit never raises the score.
pub trait OffTargetScorer: Send + Sync {
    fn score(&self, guide_length: usize, offtargets: &[SearchHit]) -> f64;
}

/// Position-weighted mismatch scorer.
///
/// Each hit contributes the product of `1 - w` over its mismatches, where
/// `w` rises linearly from the PAM-distal to the PAM-proximal end of the
/// guide. The score is `1 / (1 + sum)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionWeightedScorer {
    pub distal_weight: f64,
    pub proximal_weight: f64,
    pub pam_side: PamSide,
}

impl PositionWeightedScorer {
    pub fn new(distal_weight: f64, proximal_weight: f64, pam_side: PamSide) -> Self {
        Self {
            distal_weight,
            proximal_weight,
            pam_side,
        }
    }

    pub fn from_params(params: &ScreenParams, pam_side: PamSide) -> Self {
        Self::new(params.distal_weight, params.proximal_weight, pam_side)
    }

    /// Weight of a mismatch at `position` (0 = 5' end of the guide).
    pub fn weight(&self, position: usize, guide_length: usize) -> f64 {
        let along = if guide_length <= 1 {
            1.0
        } else {
            position.min(guide_length - 1) as f64 / (guide_length - 1) as f64
        };
        // fraction of the way from the PAM-distal end
        let toward_pam = match self.pam_side {
            PamSide::ThreePrime => along,
            PamSide::FivePrime => 1.0 - along,
        };
        self.distal_weight + (self.proximal_weight - self.distal_weight) * toward_pam
    }

    fn hit_contribution(&self, guide_length: usize, hit: &SearchHit) -> f64 {
        if hit.mismatch_positions.is_empty() {
            let mean = (self.distal_weight + self.proximal_weight) / 2.0;
            return (1.0 - mean).powi(hit.mismatches as i32);
        }
        hit.mismatch_positions
            .iter()
            .map(|&p| 1.0 - self.weight(p, guide_length))
            .product()
    }
}

impl Default for PositionWeightedScorer {
    fn default() -> Self {
        let params = ScreenParams::default();
        Self::from_params(&params, PamSide::ThreePrime)
    }
}

impl OffTargetScorer for PositionWeightedScorer {
    fn score(&self, guide_length: usize, offtargets: &[SearchHit]) -> f64 {
        let sum: f64 = offtargets
            .iter()
            .map(|hit| self.hit_contribution(guide_length, hit).max(0.0))
            .sum();
        1.0 / (1.0 + sum)
    }
}

/// Verdict counts and batch failures of a screening run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreeningSummary {
    pub screened: usize,
    pub passed: usize,
    pub failed_offtarget: usize,
    pub failed_domain: usize,
    pub unknown: usize,
    pub batch_errors: Vec<ScreeningBatchError>,
}

/// Screened candidates, ordered by id.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenedCandidates {
    pub candidates: Vec<Candidate>,
    pub summary: ScreeningSummary,
}

/// Collaborators and context shared by every batch.
struct ScreenContext<'a> {
    genes: &'a [TargetGene],
    genome: &'a dyn SequenceSearch,
    domains: Option<&'a dyn SequenceSearch>,
    params: &'a ScreenParams,
    scorer: &'a dyn OffTargetScorer,
    protected: HashSet<&'a str>,
}

/// Screen all candidates against the genome and, when protected domains
/// are configured, the domain search.
pub fn screen_candidates(
    candidates: Vec<Candidate>,
    genes: &[TargetGene],
    genome: &dyn SequenceSearch,
    domains: Option<&dyn SequenceSearch>,
    params: &ScreenParams,
    scorer: &dyn OffTargetScorer,
) -> ScreenedCandidates {
    let num_threads = params.thread_count.get_count();
    let batch_size = params
        .batch_size
        .unwrap_or_else(|| candidates.len().div_ceil(num_threads))
        .max(1);

    let context = ScreenContext {
        genes,
        genome,
        domains,
        params,
        scorer,
        protected: params.protected_domains.iter().map(String::as_str).collect(),
    };

    info!(
        candidates = candidates.len(),
        batch_size,
        threads = num_threads,
        "screening candidates"
    );

    let batches: Vec<Vec<Candidate>> =
        candidates.chunks(batch_size).map(<[Candidate]>::to_vec).collect();
    let run = || -> Vec<(Vec<Candidate>, Option<ScreeningBatchError>)> {
        batches
            .into_par_iter()
            .enumerate()
            .map(|(batch, members)| screen_batch(batch, members, &context))
            .collect()
    };

    let outcomes = match rayon::ThreadPoolBuilder::new().num_threads(num_threads).build() {
        Ok(pool) => pool.install(run),
        Err(e) => {
            warn!(error = %e, "could not build screening thread pool, using the global pool");
            run()
        }
    };

    let mut summary = ScreeningSummary::default();
    let mut screened = Vec::new();
    for (members, error) in outcomes {
        if let Some(error) = error {
            summary.batch_errors.push(error);
        }
        screened.extend(members);
    }

    // Batches may finish in any order
    screened.sort_by_key(|c| c.id);
    summary.batch_errors.sort_by_key(|e| e.batch);

    summary.screened = screened.len();
    for candidate in &screened {
        match candidate.verdict {
            Verdict::Pass => summary.passed += 1,
            Verdict::FailOfftarget => summary.failed_offtarget += 1,
            Verdict::FailDomain => summary.failed_domain += 1,
            Verdict::Unknown | Verdict::Pending => summary.unknown += 1,
        }
    }

    info!(
        passed = summary.passed,
        failed_offtarget = summary.failed_offtarget,
        failed_domain = summary.failed_domain,
        unknown = summary.unknown,
        "screening finished"
    );

    ScreenedCandidates {
        candidates: screened,
        summary,
    }
}

fn screen_batch(
    batch: usize,
    mut members: Vec<Candidate>,
    context: &ScreenContext<'_>,
) -> (Vec<Candidate>, Option<ScreeningBatchError>) {
    match evaluate_batch(&mut members, context) {
        Ok(()) => (members, None),
        Err(e) => {
            let candidate_ids: Vec<usize> = members.iter().map(|c| c.id).collect();
            warn!(batch, candidates = candidate_ids.len(), error = %e, "screening batch failed");
            for candidate in &mut members {
                candidate.verdict = Verdict::Unknown;
                candidate.score = None;
            }
            let error = ScreeningBatchError {
                batch,
                candidate_ids,
                message: e.to_string(),
            };
            (members, Some(error))
        }
    }
}

fn evaluate_batch(
    members: &mut [Candidate],
    context: &ScreenContext<'_>,
) -> Result<(), SearchError> {
    let params = context.params;
    let queries: Vec<SearchQuery> = members.iter().map(query_for).collect();
    let genome_hits = checked_search(context.genome, &queries, params.search_mismatches)?;

    for (candidate, mut hits) in members.iter_mut().zip(genome_hits) {
        hits.sort_by(|a, b| {
            a.interval
                .cmp(&b.interval)
                .then(a.strand.cmp(&b.strand))
                .then(a.mismatches.cmp(&b.mismatches))
        });
        let allowed = allowed_intervals(candidate, context);
        let offtargets: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| !allowed.iter().any(|a| interval::contains(a, &hit.interval)))
            .collect();

        candidate.score = Some(context.scorer.score(candidate.sequence.len(), &offtargets));
        candidate.verdict = if offtargets
            .iter()
            .any(|hit| hit.mismatches <= params.offtarget_mismatch_budget)
        {
            Verdict::FailOfftarget
        } else {
            Verdict::Pass
        };
    }

    let Some(domains) = context.domains else {
        return Ok(());
    };
    if context.protected.is_empty() {
        return Ok(());
    }

    let survivors: Vec<usize> = (0..members.len()).filter(|&i| members[i].passed()).collect();
    if survivors.is_empty() {
        return Ok(());
    }
    let queries: Vec<SearchQuery> = survivors.iter().map(|&i| query_for(&members[i])).collect();
    let domain_hits = checked_search(domains, &queries, params.search_mismatches)?;

    for (&i, hits) in survivors.iter().zip(domain_hits) {
        let candidate = &mut members[i];
        let chrom = candidate.interval.chrom.as_str();
        let conflict = hits.iter().any(|hit| {
            context.protected.contains(hit.subject.as_str())
                && within_evalue(hit.evalue, params.domain_max_evalue)
                && interval::contains_position(&hit.interval, chrom, candidate.cut_site)
        });
        if conflict {
            candidate.verdict = Verdict::FailDomain;
        }
    }

    Ok(())
}

fn checked_search(
    search: &dyn SequenceSearch,
    queries: &[SearchQuery],
    max_mismatches: u32,
) -> Result<Vec<Vec<SearchHit>>, SearchError> {
    let results = search.search(queries, max_mismatches)?;
    if results.len() != queries.len() {
        return Err(SearchError::ResultCountMismatch {
            expected: queries.len(),
            found: results.len(),
        });
    }
    for (query, hits) in queries.iter().zip(&results) {
        if let Some(hit) = hits.iter().find(|h| h.mismatches > max_mismatches) {
            return Err(SearchError::Malformed(format!(
                "hit for guide {} at {} has {} mismatches, at most {max_mismatches} requested",
                query.id, hit.interval, hit.mismatches
            )));
        }
    }
    Ok(results)
}

fn within_evalue(evalue: Option<f64>, max: Option<f64>) -> bool {
    match (evalue, max) {
        (Some(e), Some(max)) => e <= max,
        _ => true,
    }
}

fn query_for(candidate: &Candidate) -> SearchQuery {
    SearchQuery {
        id: candidate.id,
        sequence: candidate.sequence.clone(),
        gene_id: candidate.gene_id.clone(),
        interval: candidate.interval.clone(),
        cut_site: candidate.cut_site,
    }
}

/// Regions where a hit does not count as off-target for `candidate`.
fn allowed_intervals(candidate: &Candidate, context: &ScreenContext<'_>) -> Vec<GenomicInterval> {
    let mut allowed: Vec<GenomicInterval> = if context.params.allow_family_hits {
        context.genes.iter().map(|g| g.interval.clone()).collect()
    } else {
        context
            .genes
            .get(candidate.gene_index)
            .map(|g| vec![g.interval.clone()])
            .unwrap_or_default()
    };
    allowed.extend(context.params.allowed_regions.iter().cloned());
    allowed
}
