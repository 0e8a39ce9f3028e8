//! Candidate guide enumeration
//!
//! Slides a guide-length window over each gene on the requested strands and
//! keeps the windows that sit next to a PAM. Antisense windows are found on
//! the reverse complement and mapped back to `+` strand coordinates.

use std::collections::HashSet;

use tracing::debug;

use super::error::InputError;
use super::iupac::{base_to_bit, gc_fraction, reverse_complement_bytes, PamPattern, PamSide};
use super::projector::AlignmentProjection;
use super::types::{
    Candidate, EnumerationParams, GenomicInterval, RegionBias, RegionClass, Strand, TargetGene,
    Verdict,
};

/// Parse the configured PAM patterns.
pub fn compile_pams(patterns: &[String]) -> Result<Vec<PamPattern>, InputError> {
    if patterns.is_empty() {
        return Err(InputError::NoPam);
    }
    patterns.iter().map(|p| PamPattern::parse(p)).collect()
}

/// A protospacer found on an oriented (gene strand) sequence.
struct Site {
    /// Protospacer start on the oriented sequence
    spacer: usize,
    pam: usize,
}

/// Enumerate PAM-adjacent candidates over all genes.
///
/// Candidates are returned in ascending genomic order (chromosome, start),
/// sense before antisense on ties, and carry their position in that order
/// as their id.
pub fn enumerate_candidates(
    genes: &[TargetGene],
    projection: Option<&AlignmentProjection>,
    params: &EnumerationParams,
    excluded_guides: &[String],
) -> Result<Vec<Candidate>, InputError> {
    let pams = compile_pams(&params.pam_patterns)?;
    if params.guide_length == 0 {
        return Err(InputError::InvalidParameter("guide_length must be positive".to_string()));
    }
    if params.cut_offset > params.guide_length {
        return Err(InputError::InvalidParameter(format!(
            "cut_offset {} exceeds guide_length {}",
            params.cut_offset, params.guide_length
        )));
    }
    if let Some((lo, hi)) = params.gc_range {
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
            return Err(InputError::InvalidParameter(format!("gc_range ({lo}, {hi})")));
        }
    }

    let excluded: HashSet<String> =
        excluded_guides.iter().map(|s| s.to_ascii_uppercase()).collect();
    let mut found: Vec<((usize, usize), Candidate)> = Vec::new();

    for (gene_index, gene) in genes.iter().enumerate() {
        for &strand in params.strands.strands() {
            let forward = gene.sequence.to_ascii_uppercase().into_bytes();
            let oriented = match strand {
                Strand::Sense => forward,
                Strand::Antisense => reverse_complement_bytes(&forward),
            };

            for (pam_index, pam) in pams.iter().enumerate() {
                for site in scan_sites(&oriented, pam, params) {
                    let guide = &oriented[site.spacer..site.spacer + params.guide_length];
                    if !passes_sequence_filters(guide, params, &excluded) {
                        continue;
                    }

                    let candidate =
                        build_candidate(gene, gene_index, strand, &oriented, &site, pam, params);
                    if !passes_region_filters(&candidate, projection, params.region_bias) {
                        continue;
                    }
                    found.push(((gene_index, pam_index), candidate));
                }
            }
        }
    }

    found.sort_by(|(a_key, a), (b_key, b)| {
        a.interval
            .chrom
            .cmp(&b.interval.chrom)
            .then(a.interval.start.cmp(&b.interval.start))
            .then(a.strand.cmp(&b.strand))
            .then(a_key.cmp(b_key))
    });

    let candidates: Vec<Candidate> = found
        .into_iter()
        .enumerate()
        .map(|(id, (_, mut candidate))| {
            candidate.id = id;
            candidate
        })
        .collect();

    debug!(candidates = candidates.len(), genes = genes.len(), "enumerated candidates");
    Ok(candidates)
}

/// Windows of the oriented sequence with a matching PAM and enough flank.
fn scan_sites<'a>(
    oriented: &'a [u8],
    pam: &'a PamPattern,
    params: &'a EnumerationParams,
) -> impl Iterator<Item = Site> + 'a {
    let site_len = params.guide_length + pam.len();
    let last = oriented
        .len()
        .checked_sub(site_len + params.flank_3prime)
        .map(|v| v as isize)
        .unwrap_or(-1);

    (params.flank_5prime as isize..=last).filter_map(move |start| {
        let start = start as usize;
        let site = match pam.side {
            PamSide::ThreePrime => Site {
                spacer: start,
                pam: start + params.guide_length,
            },
            PamSide::FivePrime => Site {
                spacer: start + pam.len(),
                pam: start,
            },
        };
        pam.matches(&oriented[site.pam..site.pam + pam.len()])
            .then_some(site)
    })
}

fn passes_sequence_filters(
    guide: &[u8],
    params: &EnumerationParams,
    excluded: &HashSet<String>,
) -> bool {
    if !guide.iter().all(|&b| base_to_bit(b).count_ones() == 1) {
        return false;
    }
    if let Some((lo, hi)) = params.gc_range {
        let gc = gc_fraction(guide);
        if gc < lo || gc > hi {
            return false;
        }
    }
    if params.reject_poly_t && guide.windows(4).any(|w| w == b"TTTT") {
        return false;
    }
    !excluded.contains(std::str::from_utf8(guide).unwrap_or(""))
}

fn passes_region_filters(
    candidate: &Candidate,
    projection: Option<&AlignmentProjection>,
    bias: RegionBias,
) -> bool {
    let Some(projection) = projection else {
        return true;
    };
    let gene_id = candidate.gene_id.as_str();
    let span = &candidate.interval;
    if projection.within(gene_id, RegionClass::Excluded, span) {
        return false;
    }
    match bias {
        RegionBias::Any => true,
        RegionBias::Conserved => projection.within(gene_id, RegionClass::Conserved, span),
        RegionBias::Variable => projection.touches(gene_id, RegionClass::Variable, span),
    }
}

fn build_candidate(
    gene: &TargetGene,
    gene_index: usize,
    strand: Strand,
    oriented: &[u8],
    site: &Site,
    pam: &PamPattern,
    params: &EnumerationParams,
) -> Candidate {
    let n = oriented.len() as u64;
    let len = params.guide_length as u64;
    let spacer = site.spacer as u64;
    let gene_start = gene.interval.start;

    // cut before this oriented base
    let cut = match pam.side {
        PamSide::ThreePrime => spacer + len - params.cut_offset as u64,
        PamSide::FivePrime => spacer + params.cut_offset as u64,
    };

    let (start, cut_site) = match strand {
        Strand::Sense => (gene_start + spacer, gene_start + cut),
        Strand::Antisense => (gene_start + n - spacer - len, gene_start + n - cut),
    };

    let text =
        |range: std::ops::Range<usize>| String::from_utf8_lossy(&oriented[range]).into_owned();

    Candidate {
        id: 0,
        gene_index,
        gene_id: gene.id.clone(),
        sequence: text(site.spacer..site.spacer + params.guide_length),
        pam: text(site.pam..site.pam + pam.len()),
        strand,
        interval: GenomicInterval::new(gene.interval.chrom.clone(), start, start + len),
        cut_site,
        score: None,
        verdict: Verdict::Pending,
    }
}
