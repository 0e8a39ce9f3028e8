//! IUPAC nucleotide codes, reverse complements and the PAM grammar

use once_cell::sync::Lazy;

use super::error::InputError;

/// Byte-level complement table, IUPAC aware. Unknown bytes map to themselves.
static COMPLEMENT: Lazy<[u8; 256]> = Lazy::new(|| {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u8;
    }
    let pairs: [(u8, u8); 15] = [
        (b'A', b'T'),
        (b'T', b'A'),
        (b'C', b'G'),
        (b'G', b'C'),
        (b'R', b'Y'),
        (b'Y', b'R'),
        (b'S', b'S'),
        (b'W', b'W'),
        (b'K', b'M'),
        (b'M', b'K'),
        (b'B', b'V'),
        (b'V', b'B'),
        (b'D', b'H'),
        (b'H', b'D'),
        (b'N', b'N'),
    ];
    for (from, to) in pairs {
        table[from as usize] = to;
        table[from.to_ascii_lowercase() as usize] = to.to_ascii_lowercase();
    }
    table
});

// Bitmask representation: bit 0 = A, bit 1 = C, bit 2 = G, bit 3 = T

/// Convert a DNA base byte to its bitmask. Also handles IUPAC ambiguity codes.
/// Returns 0 for unrecognized bytes.
#[inline]
pub fn base_to_bit(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => 0b0001,
        b'C' => 0b0010,
        b'G' => 0b0100,
        b'T' | b'U' => 0b1000,
        b'R' => 0b0101,
        b'Y' => 0b1010,
        b'S' => 0b0110,
        b'W' => 0b1001,
        b'K' => 0b1100,
        b'M' => 0b0011,
        b'B' => 0b1110,
        b'D' => 0b1101,
        b'H' => 0b1011,
        b'V' => 0b0111,
        b'N' => 0b1111,
        _ => 0,
    }
}

/// Check if a character is a valid nucleotide (standard or ambiguous)
pub fn is_nucleotide(c: char) -> bool {
    c.is_ascii() && base_to_bit(c as u8) != 0
}

/// Check if a character is a gap
pub fn is_gap(c: char) -> bool {
    matches!(c, '-' | '.')
}

/// Compute the reverse complement of a DNA sequence
pub fn reverse_complement(seq: &str) -> String {
    String::from_utf8(reverse_complement_bytes(seq.as_bytes()))
        .unwrap_or_default()
}

pub fn reverse_complement_bytes(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

#[inline]
pub fn complement(b: u8) -> u8 {
    COMPLEMENT[b as usize]
}

/// Positions where `guide` and `site` share no base, or `None` once more
/// than `max_mismatches` are found.
///
/// Ambiguity codes match anything they overlap, so a genomic `N` never
/// counts as a mismatch.
pub fn mismatch_positions(guide: &[u8], site: &[u8], max_mismatches: u32) -> Option<Vec<usize>> {
    if guide.len() != site.len() {
        return None;
    }
    let mut positions = Vec::new();
    for (i, (&g, &s)) in guide.iter().zip(site).enumerate() {
        if base_to_bit(g) & base_to_bit(s) == 0 {
            positions.push(i);
            if positions.len() as u32 > max_mismatches {
                return None;
            }
        }
    }
    Some(positions)
}

/// Fraction of G/C among the bases of `seq`.
pub fn gc_fraction(seq: &[u8]) -> f64 {
    if seq.is_empty() {
        return 0.0;
    }
    let gc = seq
        .iter()
        .filter(|b| matches!(b.to_ascii_uppercase(), b'G' | b'C'))
        .count();
    gc as f64 / seq.len() as f64
}

/// Which end of the protospacer the PAM sits on (5'->3' on the guide strand)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PamSide {
    /// Protospacer then PAM, e.g. SpCas9 `NGG`
    ThreePrime,
    /// PAM then protospacer, e.g. Cas12a `TTTV`
    FivePrime,
}

/// A fixed-length PAM motif with IUPAC wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PamPattern {
    motif: Vec<u8>,
    masks: Vec<u8>,
    pub side: PamSide,
}

impl PamPattern {
    /// Parse a PAM pattern.
    ///
    /// `NGG` and `.NGG` are 3' PAMs; `TTTV.` is a 5' PAM.
    pub fn parse(pattern: &str) -> Result<Self, InputError> {
        let trimmed = pattern.trim().to_ascii_uppercase();
        let (body, side) = if let Some(body) = trimmed.strip_suffix('.') {
            (body, PamSide::FivePrime)
        } else if let Some(body) = trimmed.strip_prefix('.') {
            (body, PamSide::ThreePrime)
        } else {
            (trimmed.as_str(), PamSide::ThreePrime)
        };

        if body.is_empty() || !body.chars().all(is_nucleotide) {
            return Err(InputError::InvalidPam(pattern.to_string()));
        }

        let motif = body.as_bytes().to_vec();
        let masks = motif.iter().map(|&b| base_to_bit(b)).collect();
        Ok(Self { motif, masks, side })
    }

    pub fn len(&self) -> usize {
        self.motif.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motif.is_empty()
    }

    pub fn motif(&self) -> &str {
        std::str::from_utf8(&self.motif).unwrap_or("")
    }

    /// Check a concrete genomic window against the motif.
    ///
    /// Every base of the window must be one the motif allows, so an
    /// ambiguous genomic base only matches an equally permissive position.
    pub fn matches(&self, window: &[u8]) -> bool {
        if window.len() != self.masks.len() {
            return false;
        }
        window.iter().zip(&self.masks).all(|(&b, &mask)| {
            let bit = base_to_bit(b);
            bit != 0 && bit & !mask == 0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_to_bit() {
        assert_eq!(base_to_bit(b'A'), 0b0001);
        assert_eq!(base_to_bit(b'c'), 0b0010);
        assert_eq!(base_to_bit(b'G'), 0b0100);
        assert_eq!(base_to_bit(b'T'), 0b1000);
        assert_eq!(base_to_bit(b'X'), 0);
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement("AACGTN"), "NACGTT");
        assert_eq!(reverse_complement("CCR"), "YGG");
        assert_eq!(reverse_complement("acg"), "cgt");
    }

    #[test]
    fn test_mismatch_positions() {
        assert_eq!(mismatch_positions(b"ACGT", b"ACGT", 0), Some(vec![]));
        assert_eq!(mismatch_positions(b"ACGT", b"AGGA", 3), Some(vec![1, 3]));
        assert_eq!(mismatch_positions(b"ACGT", b"AGGA", 1), None);
        assert_eq!(mismatch_positions(b"ACGT", b"ANGT", 0), Some(vec![]));
        assert_eq!(mismatch_positions(b"ACG", b"ACGT", 3), None);
    }

    #[test]
    fn test_pam_parse_sides() {
        let spcas9 = PamPattern::parse("NGG").unwrap();
        assert_eq!(spcas9.side, PamSide::ThreePrime);
        assert_eq!(spcas9.motif(), "NGG");
        let dotted = PamPattern::parse(".ngg").unwrap();
        assert_eq!(dotted.side, PamSide::ThreePrime);
        let cas12a = PamPattern::parse("TTTV.").unwrap();
        assert_eq!(cas12a.side, PamSide::FivePrime);
        assert_eq!(cas12a.len(), 4);
        assert!(PamPattern::parse("NGX").is_err());
        assert!(PamPattern::parse(".").is_err());
    }

    #[test]
    fn test_pam_matches() {
        let pam = PamPattern::parse("NGG").unwrap();
        assert!(pam.matches(b"AGG"));
        assert!(pam.matches(b"tgg"));
        assert!(!pam.matches(b"AGC"));
        assert!(!pam.matches(b"ANG"));
        assert!(!pam.matches(b"AG"));
        let pam = PamPattern::parse("TTTV.").unwrap();
        assert!(pam.matches(b"TTTA"));
        assert!(!pam.matches(b"TTTT"));
    }

    #[test]
    fn test_gc_fraction() {
        assert_eq!(gc_fraction(b"GGCC"), 1.0);
        assert_eq!(gc_fraction(b"ATGC"), 0.5);
        assert_eq!(gc_fraction(b""), 0.0);
    }
}
