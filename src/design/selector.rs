//! Minimum guide set selection
//!
//! Set cover with per-gene redundancy over the coverage index. Greedy
//! always runs and is followed by a pruning pass that drops picks whose
//! genes are all covered often enough without them. Small instances are
//! then solved exactly by branch-and-bound, seeded with the greedy result.

use std::cmp::Ordering;

use tracing::{debug, info, warn};

use super::bitmap::CandidateSet;
use super::coverage::CoverageIndex;
use super::types::{Candidate, GuideSetSolution, SelectionParams, SolveMethod, Strand, TargetGene};

/// Branch-and-bound gives up after this many nodes and keeps its best
/// solution so far.
const EXACT_NODE_LIMIT: usize = 2_000_000;

/// Solve the guide set problem, best solution first.
///
/// Returns no solutions when no gene is reachable.
pub fn select_guide_sets(
    index: &CoverageIndex,
    candidates: &[Candidate],
    genes: &[TargetGene],
    params: &SelectionParams,
) -> Vec<GuideSetSolution> {
    if index.reachable.is_empty() {
        info!("no feasible guide set: no target gene is reachable");
        return Vec::new();
    }

    let selector = Selector::new(index, candidates, genes, params);
    let mut excluded = CandidateSet::new(index.candidate_count());
    let Some(best) = selector.solve(&excluded) else {
        return Vec::new();
    };
    let best_covered = covered_count(&best, selector.redundancy);
    let mut solutions = vec![best];

    'alternatives: for _ in 0..params.alternatives {
        for solution in &solutions {
            if let Some(&top) = solution.candidates.first() {
                excluded.insert(top);
            }
        }

        let alternative = loop {
            let Some(candidate) = selector.solve(&excluded) else {
                break 'alternatives;
            };
            match first_overlap(&candidate, &solutions, params.max_shared_candidates) {
                Some(shared) => {
                    excluded.insert(shared);
                }
                None => break candidate,
            }
        };

        if covered_count(&alternative, selector.redundancy) < best_covered {
            info!(
                solutions = solutions.len(),
                "no further guide set covers as many targets"
            );
            break;
        }
        solutions.push(alternative);
    }

    debug!(solutions = solutions.len(), "guide sets selected");
    solutions
}

/// Reachable genes cut `redundancy` times.
fn covered_count(solution: &GuideSetSolution, redundancy: usize) -> usize {
    solution
        .coverage
        .iter()
        .filter(|(_, covering)| covering.len() >= redundancy)
        .count()
}

/// Earliest pick of `candidate` shared with an earlier solution, if it
/// shares more than `max_shared` picks with one.
fn first_overlap(
    candidate: &GuideSetSolution,
    solutions: &[GuideSetSolution],
    max_shared: usize,
) -> Option<usize> {
    for previous in solutions {
        let shared: Vec<usize> = candidate
            .candidates
            .iter()
            .copied()
            .filter(|c| previous.candidates.contains(c))
            .collect();
        if shared.len() > max_shared {
            return shared.first().copied();
        }
    }
    None
}

struct Selector<'a> {
    index: &'a CoverageIndex,
    candidates: &'a [Candidate],
    params: &'a SelectionParams,
    redundancy: usize,
    /// Mean distance of each candidate's cuts from the start of the genes
    /// it covers
    n_terminal: Vec<f64>,
}

impl<'a> Selector<'a> {
    fn new(
        index: &'a CoverageIndex,
        candidates: &'a [Candidate],
        genes: &'a [TargetGene],
        params: &'a SelectionParams,
    ) -> Self {
        let n_terminal = (0..index.candidate_count())
            .map(|c| mean_cut_distance(index, candidates, genes, c))
            .collect();
        Self {
            index,
            candidates,
            params,
            redundancy: params.redundancy.max(1),
            n_terminal,
        }
    }

    /// Ordering among equally useful candidates; `Less` means `a` is
    /// preferred.
    fn preference(&self, a: usize, b: usize) -> Ordering {
        let score = |c: usize| self.candidates.get(c).and_then(|c| c.score).unwrap_or(0.0);
        let by_score = score(b).total_cmp(&score(a));
        let by_n_terminal = if self.params.prefer_n_terminal {
            self.n_terminal[a].total_cmp(&self.n_terminal[b])
        } else {
            Ordering::Equal
        };
        let position = |c: usize| {
            self.candidates
                .get(c)
                .map(|c| (c.interval.chrom.as_str(), c.interval.start))
        };
        by_score
            .then(by_n_terminal)
            .then(position(a).cmp(&position(b)))
            .then(a.cmp(&b))
    }

    fn solve(&self, excluded: &CandidateSet) -> Option<GuideSetSolution> {
        let mut allowed: Vec<usize> = self
            .index
            .usable_candidates()
            .into_iter()
            .filter(|&c| !excluded.contains(c))
            .collect();
        allowed.sort_by(|&a, &b| self.preference(a, b));

        let mut targets = vec![0usize; self.index.gene_count()];
        for &c in &allowed {
            for &g in self.index.genes_of(c) {
                targets[g] += 1;
            }
        }
        for target in &mut targets {
            *target = (*target).min(self.redundancy);
        }
        let active_genes = targets.iter().filter(|&&t| t > 0).count();
        if active_genes == 0 {
            return None;
        }

        let mut needs = targets.clone();
        let greedy = self.greedy(&allowed, &mut needs);
        let greedy = self.prune(greedy, &targets);

        let (picks, method) = if active_genes <= self.params.exact_threshold {
            let mut search = ExactSearch::new(self, &allowed, &targets, greedy);
            search.run();
            if search.exhausted {
                warn!(
                    nodes = EXACT_NODE_LIMIT,
                    "exact search stopped early, keeping the best set found"
                );
                (search.best, SolveMethod::Greedy)
            } else {
                (search.best, SolveMethod::Exact)
            }
        } else {
            (greedy, SolveMethod::Greedy)
        };

        Some(self.solution(picks, method))
    }

    /// Repeatedly pick the candidate covering the most still-needed genes.
    fn greedy(&self, allowed: &[usize], needs: &mut [usize]) -> Vec<usize> {
        let mut remaining = allowed.to_vec();
        let mut picks = Vec::new();

        loop {
            let mut best: Option<(usize, usize)> = None;
            for &c in &remaining {
                let gain = self.index.genes_of(c).iter().filter(|&&g| needs[g] > 0).count();
                if gain == 0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((b, best_gain)) => {
                        gain > best_gain
                            || (gain == best_gain && self.preference(c, b) == Ordering::Less)
                    }
                };
                if better {
                    best = Some((c, gain));
                }
            }

            let Some((pick, _)) = best else {
                break;
            };
            picks.push(pick);
            remaining.retain(|&c| c != pick);
            for &g in self.index.genes_of(pick) {
                needs[g] = needs[g].saturating_sub(1);
            }
        }

        picks
    }

    /// Drop picks, in pick order, whose genes stay covered `targets` times
    /// without them.
    fn prune(&self, mut picks: Vec<usize>, targets: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; targets.len()];
        for &c in &picks {
            for &g in self.index.genes_of(c) {
                counts[g] += 1;
            }
        }

        let mut i = 0;
        while i < picks.len() {
            let genes = self.index.genes_of(picks[i]);
            if genes.iter().all(|&g| counts[g] > targets[g]) {
                for &g in genes {
                    counts[g] -= 1;
                }
                picks.remove(i);
            } else {
                i += 1;
            }
        }
        picks
    }

    fn solution(&self, picks: Vec<usize>, method: SolveMethod) -> GuideSetSolution {
        let coverage: Vec<(usize, Vec<usize>)> = self
            .index
            .reachable
            .iter()
            .map(|&g| {
                let covering = picks
                    .iter()
                    .copied()
                    .filter(|&c| self.index.genes_of(c).contains(&g))
                    .collect();
                (g, covering)
            })
            .collect();
        // Unreachable genes stay out of the objective but are never covered
        let mut uncovered: Vec<usize> = coverage
            .iter()
            .filter(|(_, covering)| covering.len() < self.redundancy)
            .map(|(g, _)| *g)
            .chain(self.index.unreachable.iter().copied())
            .collect();
        uncovered.sort_unstable();

        GuideSetSolution {
            candidates: picks,
            complete: uncovered.is_empty(),
            coverage,
            uncovered,
            method,
        }
    }
}

/// Mean distance from gene start of a candidate's cut in every gene it
/// covers.
fn mean_cut_distance(
    index: &CoverageIndex,
    candidates: &[Candidate],
    genes: &[TargetGene],
    c: usize,
) -> f64 {
    let Some(candidate) = candidates.get(c) else {
        return f64::MAX;
    };
    let length = candidate.interval.len();
    // cut position counted from the guide's 5' end
    let cut_from_5prime = match candidate.strand {
        Strand::Sense => candidate.cut_site.saturating_sub(candidate.interval.start),
        Strand::Antisense => candidate.interval.end.saturating_sub(candidate.cut_site),
    };

    let distances: Vec<f64> = index
        .genes_of(c)
        .iter()
        .filter_map(|&g| {
            let gene = genes.get(g)?;
            let edge = index.edge(c, g)?;
            let site_start = gene.interval.start + edge.quality.offset as u64;
            let cut = match edge.quality.strand {
                Strand::Sense => site_start + cut_from_5prime,
                Strand::Antisense => (site_start + length).saturating_sub(cut_from_5prime),
            };
            Some(gene.distance_from_start(cut) as f64)
        })
        .collect();

    if distances.is_empty() {
        f64::MAX
    } else {
        distances.iter().sum::<f64>() / distances.len() as f64
    }
}

/// Branch-and-bound over candidate subsets.
struct ExactSearch<'s, 'a> {
    selector: &'s Selector<'a>,
    /// Allowed candidates in preference order
    allowed: &'s [usize],
    usable: CandidateSet,
    needs: Vec<usize>,
    chosen: Vec<usize>,
    excluded: CandidateSet,
    best: Vec<usize>,
    nodes: usize,
    exhausted: bool,
}

impl<'s, 'a> ExactSearch<'s, 'a> {
    fn new(
        selector: &'s Selector<'a>,
        allowed: &'s [usize],
        targets: &[usize],
        incumbent: Vec<usize>,
    ) -> Self {
        let capacity = selector.index.candidate_count();
        let mut usable = CandidateSet::new(capacity);
        for &c in allowed {
            usable.insert(c);
        }
        if selector.redundancy == 1 {
            remove_dominated(selector, allowed, &mut usable);
        }
        Self {
            selector,
            allowed,
            usable,
            needs: targets.to_vec(),
            chosen: Vec::new(),
            excluded: CandidateSet::new(capacity),
            best: incumbent,
            nodes: 0,
            exhausted: false,
        }
    }

    fn run(&mut self) {
        self.branch();
        debug!(nodes = self.nodes, picks = self.best.len(), "exact search finished");
    }

    fn available(&self, c: usize) -> bool {
        self.usable.contains(c) && !self.excluded.contains(c) && !self.chosen.contains(&c)
    }

    fn gain(&self, c: usize) -> usize {
        self.selector
            .index
            .genes_of(c)
            .iter()
            .filter(|&&g| self.needs[g] > 0)
            .count()
    }

    fn branch(&mut self) {
        self.nodes += 1;
        if self.nodes > EXACT_NODE_LIMIT {
            self.exhausted = true;
            return;
        }

        let total_need: usize = self.needs.iter().sum();
        if total_need == 0 {
            if self.chosen.len() < self.best.len() {
                self.best = self.chosen.clone();
            }
            return;
        }

        let max_gain = self
            .allowed
            .iter()
            .filter(|&&c| self.available(c))
            .map(|&c| self.gain(c))
            .max()
            .unwrap_or(0);
        if max_gain == 0 {
            return;
        }
        let max_need = self.needs.iter().copied().max().unwrap_or(0);
        let lower_bound = max_need.max(total_need.div_ceil(max_gain));
        if self.chosen.len() + lower_bound >= self.best.len() {
            return;
        }

        // most constrained gene: fewest available candidates
        let mut target: Option<(usize, Vec<usize>)> = None;
        for (gene, &need) in self.needs.iter().enumerate() {
            if need == 0 {
                continue;
            }
            let options: Vec<usize> = self
                .allowed
                .iter()
                .copied()
                .filter(|&c| self.available(c) && self.selector.index.genes_of(c).contains(&gene))
                .collect();
            if options.len() < need {
                return;
            }
            if target.as_ref().map_or(true, |(_, best)| options.len() < best.len()) {
                target = Some((gene, options));
            }
        }
        let Some((gene, options)) = target else {
            return;
        };

        let mut newly_excluded = Vec::new();
        for c in options {
            let remaining_options = self
                .allowed
                .iter()
                .filter(|&&o| self.available(o) && self.selector.index.genes_of(o).contains(&gene))
                .count();
            if remaining_options < self.needs[gene] {
                break;
            }

            let decremented: Vec<usize> = self
                .selector
                .index
                .genes_of(c)
                .iter()
                .copied()
                .filter(|&g| self.needs[g] > 0)
                .collect();
            for &g in &decremented {
                self.needs[g] -= 1;
            }
            self.chosen.push(c);

            self.branch();

            self.chosen.pop();
            for &g in &decremented {
                self.needs[g] += 1;
            }
            self.excluded.insert(c);
            newly_excluded.push(c);

            if self.exhausted {
                break;
            }
        }
        for c in newly_excluded {
            self.excluded.remove(c);
        }
    }
}

/// With single coverage, a candidate whose genes are a subset of another
/// allowed candidate's genes never improves on it.
fn remove_dominated(selector: &Selector<'_>, allowed: &[usize], usable: &mut CandidateSet) {
    let index = selector.index;
    // allowed is in preference order, so the earlier of two equal sets wins
    for (i, &c) in allowed.iter().enumerate() {
        let genes = index.genes_of(c);
        let dominated = allowed.iter().enumerate().any(|(j, &d)| {
            if j == i || !usable.contains(d) {
                return false;
            }
            let other = index.genes_of(d);
            let subset = genes.iter().all(|g| other.contains(g));
            subset && (other.len() > genes.len() || j < i)
        });
        if dominated {
            usable.remove(c);
        }
    }
}
