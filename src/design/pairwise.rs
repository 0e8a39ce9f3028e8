//! Ungapped guide matching against PAM-adjacent sites
//!
//! Shared by the in-memory genome scan and the coverage index: both look for
//! windows that carry a PAM and differ from the guide by at most a given
//! number of mismatches.

use super::iupac::{mismatch_positions, reverse_complement_bytes, PamPattern, PamSide};
use super::types::{MatchQuality, Strand, TargetGene};

/// A sequence and its reverse complement, both upper case.
#[derive(Debug, Clone)]
pub struct OrientedSequence {
    pub forward: Vec<u8>,
    pub reverse: Vec<u8>,
}

impl OrientedSequence {
    pub fn new(sequence: &[u8]) -> Self {
        let forward = sequence.to_ascii_uppercase();
        let reverse = reverse_complement_bytes(&forward);
        Self { forward, reverse }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn strand(&self, strand: Strand) -> &[u8] {
        match strand {
            Strand::Sense => &self.forward,
            Strand::Antisense => &self.reverse,
        }
    }

    /// `+` strand start of a protospacer found at `spacer` on `strand`.
    pub fn forward_start(&self, strand: Strand, spacer: usize, length: usize) -> usize {
        match strand {
            Strand::Sense => spacer,
            Strand::Antisense => self.len() - spacer - length,
        }
    }
}

/// An approximate guide occurrence on one oriented sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteMatch {
    /// Protospacer start on the oriented sequence
    pub spacer: usize,
    pub mismatch_positions: Vec<usize>,
}

/// All PAM-adjacent sites on `oriented` within `max_mismatches` of `guide`.
///
/// A site adjacent to several PAM patterns is reported once per pattern.
pub fn pam_adjacent_matches<'a>(
    oriented: &'a [u8],
    guide: &'a [u8],
    pams: &'a [PamPattern],
    max_mismatches: u32,
) -> impl Iterator<Item = SiteMatch> + 'a {
    let len = guide.len();
    pams.iter().flat_map(move |pam| {
        let site_len = len + pam.len();
        let starts = if oriented.len() >= site_len && len > 0 {
            0..=(oriented.len() - site_len)
        } else {
            // empty range
            1..=0
        };
        starts.filter_map(move |start| {
            let (spacer, pam_at) = match pam.side {
                PamSide::ThreePrime => (start, start + len),
                PamSide::FivePrime => (start + pam.len(), start),
            };
            if !pam.matches(&oriented[pam_at..pam_at + pam.len()]) {
                return None;
            }
            mismatch_positions(guide, &oriented[spacer..spacer + len], max_mismatches)
                .map(|positions| SiteMatch {
                    spacer,
                    mismatch_positions: positions,
                })
        })
    })
}

/// Best ungapped match of a guide in a gene, on either strand.
///
/// Fewest mismatches wins; ties go to the sense strand, then the lowest
/// offset.
pub fn best_gene_match(
    guide: &[u8],
    gene: &OrientedSequence,
    pams: &[PamPattern],
    max_mismatches: u32,
) -> Option<MatchQuality> {
    let guide = guide.to_ascii_uppercase();
    let mut best: Option<MatchQuality> = None;

    for strand in [Strand::Sense, Strand::Antisense] {
        for site in pam_adjacent_matches(gene.strand(strand), &guide, pams, max_mismatches) {
            let quality = MatchQuality {
                mismatches: site.mismatch_positions.len() as u32,
                mismatch_positions: site.mismatch_positions,
                strand,
                offset: gene.forward_start(strand, site.spacer, guide.len()),
            };
            let better = match &best {
                None => true,
                Some(current) => {
                    (quality.mismatches, quality.strand, quality.offset)
                        < (current.mismatches, current.strand, current.offset)
                }
            };
            if better {
                best = Some(quality);
            }
        }
    }

    best
}

/// Oriented sequences of all target genes, computed once per run.
pub fn orient_genes(genes: &[TargetGene]) -> Vec<OrientedSequence> {
    genes
        .iter()
        .map(|g| OrientedSequence::new(g.sequence.as_bytes()))
        .collect()
}
