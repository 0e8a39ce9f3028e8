use std::io::Write;

use guidescreen::{
    read_aligned_fasta_file, read_genome_file, run_design, AlignmentBlock, AlignmentRow,
    Collaborators, DesignParams, DesignRun, DomainTable, GenomeRecord, GenomeScan, GenomicInterval,
    PrecomputedAlignment, RunStatus, SearchError, SearchHit, SearchQuery, SequenceSearch,
    StarAligner, Strand, TargetGene, ThreadCount, Verdict,
};

const FAMILY: &str = "ATCAGTACTGATCGTAGGATCATGTCAGTA";
const OTHER: &str = "GATTACAGATTACTTGGCATAGATTGATAT";
const NO_PAM: &str = "ATCAGTACTGATCGTATGATCATGTCAGTA";
const TWO_SITES: &str = "ATCAGTACTGATCGTAGGATCATGTCAGTAGATTACTTGGCAT";

fn gene(id: &str, chrom: &str, start: u64, sequence: &str) -> TargetGene {
    TargetGene {
        id: id.to_string(),
        interval: GenomicInterval::new(chrom, start, start + sequence.len() as u64),
        strand: Strand::Sense,
        sequence: sequence.to_string(),
    }
}

fn scan(records: Vec<GenomeRecord>) -> GenomeScan {
    GenomeScan::new(records, &params().enumeration.pam_patterns).unwrap()
}

fn record(name: &str, sequence: &str) -> GenomeRecord {
    GenomeRecord {
        name: name.to_string(),
        sequence: sequence.as_bytes().to_vec(),
    }
}

/// Gapless alignment of the genes as given.
fn identity_alignment(genes: &[TargetGene]) -> PrecomputedAlignment {
    PrecomputedAlignment::new(vec![AlignmentBlock {
        rows: genes
            .iter()
            .map(|g| AlignmentRow {
                gene_id: g.id.clone(),
                interval: None,
                residues: g.sequence.clone(),
            })
            .collect(),
    }])
}

fn params() -> DesignParams {
    let mut params = DesignParams::default();
    params.enumeration.guide_length = 8;
    params.enumeration.cut_offset = 3;
    params.screen.thread_count = ThreadCount::Fixed(2);
    params
}

fn design(genes: &[TargetGene], genome: &dyn SequenceSearch, params: &DesignParams) -> DesignRun {
    let aligner = identity_alignment(genes);
    let collaborators = Collaborators {
        aligner: &aligner,
        genome,
        domains: None,
        scorer: None,
    };
    run_design(genes, params, &collaborators).unwrap()
}

fn family_of_three() -> (Vec<TargetGene>, GenomeScan) {
    let genes = vec![
        gene("g1", "chr1", 0, FAMILY),
        gene("g2", "chr1", 40, FAMILY),
        gene("g3", "chr1", 80, FAMILY),
    ];
    let filler = "A".repeat(10);
    let chr1 = format!("{FAMILY}{filler}{FAMILY}{filler}{FAMILY}");
    (genes, scan(vec![record("chr1", &chr1)]))
}

fn two_unrelated() -> (Vec<TargetGene>, GenomeScan) {
    let genes = vec![
        gene("a", "chr1", 0, "TTCAGTACTGATCGTAGGATCATGTCAGTA"),
        gene("b", "chr1", 40, OTHER),
    ];
    let chr1 = format!("TTCAGTACTGATCGTAGGATCATGTCAGTA{}{OTHER}", "A".repeat(10));
    (genes, scan(vec![record("chr1", &chr1)]))
}

#[test]
fn test_conserved_guide_covers_family() {
    let (genes, genome) = family_of_three();
    let run = design(&genes, &genome, &params());

    assert_eq!(run.report.status, RunStatus::Complete);
    assert_eq!(run.report.candidates_enumerated, 3);
    let best = &run.report.solutions[0];
    assert_eq!(best.guides.len(), 1);
    assert_eq!(best.guides[0].sequence, "CTGATCGT");
    assert_eq!(best.guides[0].pam, "AGG");
    assert_eq!(best.guides[0].start, 7);
    assert_eq!(best.guides[0].covered_genes, vec!["g1", "g2", "g3"]);
    assert!(run.report.unreachable_genes.is_empty());
}

#[test]
fn test_unrelated_genes_need_one_guide_each() {
    let (genes, genome) = two_unrelated();
    let run = design(&genes, &genome, &params());

    assert_eq!(run.report.status, RunStatus::Complete);
    let guides = &run.report.solutions[0].guides;
    assert_eq!(guides.len(), 2);
    assert_eq!(guides[0].sequence, "CTGATCGT");
    assert_eq!(guides[0].covered_genes, vec!["a"]);
    assert_eq!(guides[1].sequence, "AGATTACT");
    assert_eq!(guides[1].covered_genes, vec!["b"]);
}

#[test]
fn test_offtarget_hit_excludes_candidate() {
    let genes = vec![gene("c", "chr1", 100, TWO_SITES)];
    let chr1 = format!("{}{TWO_SITES}{}", "A".repeat(100), "A".repeat(10));
    // one mismatch away from CTGATCGT, next to an AGG
    let chr2 = "TTTTTCTGTTCGTAGGTTTTT";
    let p = params();
    let genome = scan(vec![record("chr1", &chr1), record("chr2", chr2)]);
    let run = design(&genes, &genome, &p);

    let failing = run.candidates.iter().find(|c| c.sequence == "CTGATCGT").unwrap();
    assert_eq!(failing.verdict, Verdict::FailOfftarget);
    assert!(failing.score.unwrap() < 1.0);
    assert_eq!(run.report.screening.failed_offtarget, 1);

    assert_eq!(run.report.status, RunStatus::Complete);
    let guides = &run.report.solutions[0].guides;
    assert_eq!(guides.len(), 1);
    assert_eq!(guides[0].sequence, "AGATTACT");
    assert_eq!(guides[0].score, Some(1.0));
}

#[test]
fn test_gene_without_pam_is_partial() {
    let genes = vec![gene("a", "chr1", 0, FAMILY), gene("d", "chr1", 40, NO_PAM)];
    let chr1 = format!("{FAMILY}{}{NO_PAM}", "A".repeat(10));
    let p = params();
    let genome = GenomeScan::new(vec![record("chr1", &chr1)], &p.enumeration.pam_patterns).unwrap();
    let run = design(&genes, &genome, &p);

    assert_eq!(run.report.status, RunStatus::Partial);
    assert_eq!(run.report.status.exit_code(), 2);
    assert_eq!(run.report.unreachable_genes, vec!["d"]);
    assert_eq!(run.report.uncovered_genes, vec!["d"]);
    assert!(!run.report.solutions[0].complete);
    assert_eq!(run.report.solutions[0].uncovered_genes, vec!["d"]);
    assert_eq!(run.report.solutions[0].guides.len(), 1);
    assert_eq!(run.coverage.unreachable, vec![1]);
}

#[test]
fn test_excluded_guides_leave_nothing() {
    let (genes, genome) = family_of_three();
    let mut p = params();
    p.excluded_guides = vec!["ctgatcgt".to_string()];
    let run = design(&genes, &genome, &p);

    assert_eq!(run.report.candidates_enumerated, 0);
    assert_eq!(run.report.status, RunStatus::Failed);
    assert_eq!(run.report.status.exit_code(), 1);
    assert!(run.report.solutions.is_empty());
}

#[test]
fn test_star_aligner_matches_precomputed() {
    let (genes, genome) = family_of_three();
    let p = params();
    let aligner = StarAligner::new(p.alignment.clone());
    let collaborators = Collaborators {
        aligner: &aligner,
        genome: &genome,
        domains: None,
        scorer: None,
    };
    let aligned = run_design(&genes, &p, &collaborators).unwrap();
    let precomputed = design(&genes, &genome, &p);
    assert_eq!(aligned.report, precomputed.report);
}

#[test]
fn test_deterministic_across_threads_and_batches() {
    let (genes, genome) = two_unrelated();
    let mut serial = params();
    serial.screen.thread_count = ThreadCount::Fixed(1);
    let mut parallel = params();
    parallel.screen.thread_count = ThreadCount::Fixed(4);
    parallel.screen.batch_size = Some(1);

    let first = design(&genes, &genome, &serial);
    let second = design(&genes, &genome, &parallel);
    let again = design(&genes, &genome, &parallel);

    assert_eq!(first.report, second.report);
    assert_eq!(second.report, again.report);
    assert_eq!(first.candidates, second.candidates);

    let json = |run: &DesignRun| {
        let mut out = Vec::new();
        run.report.write_json(&mut out).unwrap();
        out
    };
    assert_eq!(json(&second), json(&again));
}

#[test]
fn test_coverage_edges_respect_budget() {
    let (genes, genome) = two_unrelated();
    for budget in 0..3 {
        let mut p = params();
        p.coverage.mismatch_budget = budget;
        let run = design(&genes, &genome, &p);
        assert!(run.coverage.edges.iter().all(|e| e.quality.mismatches <= budget));
        assert!(run
            .coverage
            .edges
            .iter()
            .all(|e| run.candidates[e.candidate].verdict == Verdict::Pass));
    }
}

/// Delegates to a genome scan but fails any batch containing `poison`.
struct Flaky {
    inner: GenomeScan,
    poison: &'static str,
}

impl SequenceSearch for Flaky {
    fn search(
        &self,
        queries: &[SearchQuery],
        max_mismatches: u32,
    ) -> Result<Vec<Vec<SearchHit>>, SearchError> {
        if queries.iter().any(|q| q.sequence == self.poison) {
            return Err(SearchError::Failed("search tool exited with status 1".to_string()));
        }
        self.inner.search(queries, max_mismatches)
    }
}

#[test]
fn test_failed_batch_marks_unknown() {
    let (genes, genome) = two_unrelated();
    let flaky = Flaky {
        inner: genome,
        poison: "CTGATCGT",
    };
    let mut p = params();
    p.screen.batch_size = Some(1);
    let run = design(&genes, &flaky, &p);

    assert_eq!(run.candidates[0].verdict, Verdict::Unknown);
    assert_eq!(run.candidates[0].score, None);
    assert_eq!(run.candidates[1].verdict, Verdict::Pass);

    let summary = &run.report.screening;
    assert_eq!(summary.unknown, 1);
    assert_eq!(summary.batch_errors.len(), 1);
    assert_eq!(summary.batch_errors[0].candidate_ids, vec![0]);

    assert_eq!(run.report.status, RunStatus::Partial);
    assert_eq!(run.report.unreachable_genes, vec!["a"]);
}

#[test]
fn test_loaders_feed_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let genome_path = dir.path().join("genome.fasta");
    let alignment_path = dir.path().join("family.afa");
    let domains_path = dir.path().join("domains.tsv");

    let filler = "A".repeat(10);
    let mut f = std::fs::File::create(&genome_path).unwrap();
    writeln!(f, ">chr1 test\n{FAMILY}{filler}\n{FAMILY}").unwrap();

    let mut f = std::fs::File::create(&alignment_path).unwrap();
    writeln!(f, ">g1 chr1:0-30\n{FAMILY}\n>g2 chr1:40-70\n{}", FAMILY.to_lowercase()).unwrap();

    let mut f = std::fs::File::create(&domains_path).unwrap();
    writeln!(f, "# name\tchrom\tstart\tend\tevalue\nkinase\tchr1\t5\t15\t1e-10").unwrap();

    let genes = vec![gene("g1", "chr1", 0, FAMILY), gene("g2", "chr1", 40, FAMILY)];
    let mut p = params();
    let records = read_genome_file(&genome_path).unwrap();
    assert_eq!(records[0].sequence.len(), 70);
    let genome = GenomeScan::new(records, &p.enumeration.pam_patterns).unwrap();
    let block = read_aligned_fasta_file(&alignment_path).unwrap();
    let aligner = PrecomputedAlignment::new(vec![block]);
    let domains_file = std::fs::File::open(&domains_path).unwrap();
    let domains = DomainTable::read(std::io::BufReader::new(domains_file)).unwrap();
    assert_eq!(domains.len(), 1);

    let collaborators = Collaborators {
        aligner: &aligner,
        genome: &genome,
        domains: Some(&domains),
        scorer: None,
    };
    let run = run_design(&genes, &p, &collaborators).unwrap();
    assert_eq!(run.report.status, RunStatus::Complete);

    // the only guide cuts at 12 in g1, inside the kinase domain
    p.screen.protected_domains = vec!["kinase".to_string()];
    let run = run_design(&genes, &p, &collaborators).unwrap();
    assert_eq!(run.candidates[0].cut_site, 12);
    assert_eq!(run.candidates[0].verdict, Verdict::FailDomain);
    assert_eq!(run.candidates[1].verdict, Verdict::Pass);
    assert_eq!(run.report.status, RunStatus::Complete);
    assert_eq!(run.report.solutions[0].guides[0].id, 1);
}
