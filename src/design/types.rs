//! Data types and run parameters for guide set design

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strand relative to the reference genome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Strand {
    /// Genome `+` strand
    #[serde(rename = "+", alias = "sense", alias = "plus")]
    Sense,
    /// Genome `-` strand
    #[serde(rename = "-", alias = "antisense", alias = "minus")]
    Antisense,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sense => write!(f, "+"),
            Self::Antisense => write!(f, "-"),
        }
    }
}

/// A half-open, 0-based interval on one chromosome.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GenomicInterval {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl GenomicInterval {
    pub fn new(chrom: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            chrom: chrom.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for GenomicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// A gene the guide set must knock out.
///
/// `sequence` is the genome `+` strand sequence of `interval`, whatever the
/// gene's own orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGene {
    pub id: String,
    pub interval: GenomicInterval,
    pub strand: Strand,
    pub sequence: String,
}

impl TargetGene {
    /// Distance of a genomic position from the gene's start, following the
    /// gene's orientation.
    pub fn distance_from_start(&self, position: u64) -> u64 {
        match self.strand {
            Strand::Sense => position.saturating_sub(self.interval.start),
            Strand::Antisense => self.interval.end.saturating_sub(position),
        }
    }
}

/// One aligned sequence of an alignment block.
///
/// `interval` is the genomic region the row covers; `None` means the whole
/// gene. Rows of antisense genes are in gene orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRow {
    pub gene_id: String,
    pub interval: Option<GenomicInterval>,
    pub residues: String,
}

/// Columnar alignment of homologous gene regions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentBlock {
    pub rows: Vec<AlignmentRow>,
}

impl AlignmentBlock {
    pub fn width(&self) -> usize {
        self.rows.first().map(|r| r.residues.len()).unwrap_or(0)
    }
}

/// Classification of an alignment column or genomic region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionClass {
    Conserved,
    Variable,
    Excluded,
}

/// A classified genomic interval on one gene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConservedRegion {
    pub gene_id: String,
    pub interval: GenomicInterval,
    pub class: RegionClass,
}

/// Screening outcome of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pending,
    Pass,
    FailOfftarget,
    FailDomain,
    /// The candidate's screening batch failed
    Unknown,
}

/// A guide RNA candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable emission index
    pub id: usize,
    /// Index of the source gene in the run's gene list
    pub gene_index: usize,
    pub gene_id: String,
    /// Protospacer sequence, 5' to 3' on `strand`
    pub sequence: String,
    pub pam: String,
    pub strand: Strand,
    /// Protospacer interval, excluding the PAM
    pub interval: GenomicInterval,
    /// The enzyme cuts between `cut_site - 1` and `cut_site`
    pub cut_site: u64,
    pub score: Option<f64>,
    pub verdict: Verdict,
}

impl Candidate {
    /// Genomic ordering key: chromosome, start, strand (sense first), id.
    pub fn position_key(&self) -> (&str, u64, Strand, usize) {
        (self.interval.chrom.as_str(), self.interval.start, self.strand, self.id)
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// How well a guide matches a gene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchQuality {
    pub mismatches: u32,
    /// Mismatch positions in the guide, 0 = 5' end
    pub mismatch_positions: Vec<usize>,
    pub strand: Strand,
    /// Start of the matched protospacer in gene-sequence coordinates
    pub offset: usize,
}

/// Candidate `candidate` is predicted to cut gene `gene`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageEdge {
    pub candidate: usize,
    pub gene: usize,
    pub quality: MatchQuality,
}

/// Algorithm that produced a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveMethod {
    Exact,
    Greedy,
}

/// A set of guides and the genes they cover.
///
/// Holds candidate indices into the screened candidate arena, in pick
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuideSetSolution {
    pub candidates: Vec<usize>,
    /// Covering candidates per gene index
    pub coverage: Vec<(usize, Vec<usize>)>,
    /// Reachable gene indices still short of the requested redundancy
    pub uncovered: Vec<usize>,
    pub complete: bool,
    pub method: SolveMethod,
}

/// Thread count configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadCount {
    /// Use all available CPU cores
    Auto,
    /// Use a specific number of threads
    Fixed(usize),
}

impl Default for ThreadCount {
    fn default() -> Self {
        Self::Auto
    }
}

impl ThreadCount {
    /// Get the actual number of threads to use
    pub fn get_count(&self) -> usize {
        match self {
            Self::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Self::Fixed(n) => (*n).max(1),
        }
    }
}

/// Strands scanned for candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrandSelection {
    Sense,
    Antisense,
    Both,
}

impl Default for StrandSelection {
    fn default() -> Self {
        Self::Both
    }
}

impl StrandSelection {
    pub fn strands(&self) -> &'static [Strand] {
        match self {
            Self::Sense => &[Strand::Sense],
            Self::Antisense => &[Strand::Antisense],
            Self::Both => &[Strand::Sense, Strand::Antisense],
        }
    }
}

/// Where candidates may sit relative to the alignment classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionBias {
    /// Anywhere not excluded
    Any,
    /// Entirely inside a conserved region, for family-wide guides
    Conserved,
    /// Overlapping a variable region, for gene-specific guides
    Variable,
}

impl Default for RegionBias {
    fn default() -> Self {
        Self::Any
    }
}

/// Alignment column classification thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionParams {
    /// Minimum identity among non-gap residues for a conserved column
    pub conservation_threshold: f64,
    /// Minimum fraction of rows with a residue, below which a column is excluded
    pub min_column_coverage: f64,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self {
            conservation_threshold: 0.9,
            min_column_coverage: 0.5,
        }
    }
}

/// Scoring for the in-process star aligner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentScoringParams {
    pub match_score: i32,
    pub mismatch_score: i32,
    pub gap_open: i32,
    pub gap_extend: i32,
    /// Minimum alignment score as a fraction of a perfect template match
    pub min_score_fraction: f64,
}

impl Default for AlignmentScoringParams {
    fn default() -> Self {
        Self {
            match_score: 1,
            mismatch_score: -1,
            gap_open: -5,
            gap_extend: -1,
            min_score_fraction: 0.0,
        }
    }
}

/// Candidate enumeration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnumerationParams {
    pub guide_length: usize,
    /// IUPAC PAM motifs; a trailing `.` marks a 5' PAM (`TTTV.`), a leading
    /// `.` or none a 3' PAM (`NGG`)
    pub pam_patterns: Vec<String>,
    pub strands: StrandSelection,
    /// Cut distance from the PAM-proximal end of the protospacer
    pub cut_offset: usize,
    /// Gene bases required 5' of protospacer+PAM
    pub flank_5prime: usize,
    /// Gene bases required 3' of protospacer+PAM
    pub flank_3prime: usize,
    /// Allowed GC fraction of the protospacer
    pub gc_range: Option<(f64, f64)>,
    /// Drop guides containing TTTT
    pub reject_poly_t: bool,
    pub region_bias: RegionBias,
}

impl Default for EnumerationParams {
    fn default() -> Self {
        Self {
            guide_length: 20,
            pam_patterns: vec!["NGG".to_string()],
            strands: StrandSelection::Both,
            cut_offset: 3,
            flank_5prime: 0,
            flank_3prime: 0,
            gc_range: None,
            reject_poly_t: false,
            region_bias: RegionBias::Any,
        }
    }
}

/// Off-target and domain screening settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenParams {
    /// Mismatches requested from the genome search
    pub search_mismatches: u32,
    /// An off-target hit with at most this many mismatches fails the candidate
    pub offtarget_mismatch_budget: u32,
    /// Hits inside any target gene are not off-target
    pub allow_family_hits: bool,
    /// Additional regions where hits are tolerated
    pub allowed_regions: Vec<GenomicInterval>,
    /// Domain names whose cut sites are forbidden; empty disables the check
    pub protected_domains: Vec<String>,
    pub domain_max_evalue: Option<f64>,
    /// Candidates per search invocation; default is one batch per worker
    pub batch_size: Option<usize>,
    pub thread_count: ThreadCount,
    /// Mismatch weight at the PAM-distal end
    pub distal_weight: f64,
    /// Mismatch weight at the PAM-proximal end
    pub proximal_weight: f64,
}

impl Default for ScreenParams {
    fn default() -> Self {
        Self {
            search_mismatches: 4,
            offtarget_mismatch_budget: 3,
            allow_family_hits: true,
            allowed_regions: Vec::new(),
            protected_domains: Vec::new(),
            domain_max_evalue: None,
            batch_size: None,
            thread_count: ThreadCount::Auto,
            distal_weight: 0.1,
            proximal_weight: 0.9,
        }
    }
}

/// Coverage relation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageParams {
    /// Mismatches tolerated between a guide and a gene it should cut
    pub mismatch_budget: u32,
}

impl Default for CoverageParams {
    fn default() -> Self {
        Self { mismatch_budget: 0 }
    }
}

/// Set cover settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionParams {
    /// Independent guides required per gene
    pub redundancy: usize,
    /// Use branch-and-bound up to this many reachable genes
    pub exact_threshold: usize,
    /// Extra solutions to report after the best one
    pub alternatives: usize,
    /// Candidates an alternative may share with any earlier solution
    pub max_shared_candidates: usize,
    /// Break score ties toward cuts near the gene start
    pub prefer_n_terminal: bool,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            redundancy: 1,
            exact_threshold: 12,
            alternatives: 0,
            max_shared_candidates: 0,
            prefer_n_terminal: false,
        }
    }
}

/// Global design parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignParams {
    pub alignment: AlignmentScoringParams,
    pub projection: ProjectionParams,
    pub enumeration: EnumerationParams,
    pub screen: ScreenParams,
    pub coverage: CoverageParams,
    pub selection: SelectionParams,
    /// Guide sequences never to propose
    pub excluded_guides: Vec<String>,
}
