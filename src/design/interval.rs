//! Interval algebra over genomic intervals
//!
//! Stateless helpers used to reconcile region annotations. Intervals are
//! half-open; inputs need not be sorted.

use super::types::GenomicInterval;

pub fn overlaps(a: &GenomicInterval, b: &GenomicInterval) -> bool {
    a.chrom == b.chrom && a.start < b.end && b.start < a.end
}

/// True when `inner` lies entirely within `outer`.
pub fn contains(outer: &GenomicInterval, inner: &GenomicInterval) -> bool {
    outer.chrom == inner.chrom && outer.start <= inner.start && inner.end <= outer.end
}

pub fn contains_position(interval: &GenomicInterval, chrom: &str, position: u64) -> bool {
    interval.chrom == chrom && interval.start <= position && position < interval.end
}

/// Sort and coalesce overlapping or abutting intervals.
pub fn merge(intervals: &[GenomicInterval]) -> Vec<GenomicInterval> {
    let mut sorted: Vec<&GenomicInterval> = intervals.iter().filter(|i| !i.is_empty()).collect();
    sorted.sort();

    let mut merged: Vec<GenomicInterval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match merged.last_mut() {
            Some(last) if last.chrom == interval.chrom && interval.start <= last.end => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval.clone()),
        }
    }
    merged
}

/// Parts of `from` not covered by any interval of `remove`.
pub fn subtract(from: &[GenomicInterval], remove: &[GenomicInterval]) -> Vec<GenomicInterval> {
    let remove = merge(remove);
    let mut result = Vec::new();

    for interval in merge(from) {
        let mut cursor = interval.start;
        for cut in remove.iter().filter(|r| overlaps(r, &interval)) {
            if cut.start > cursor {
                result.push(GenomicInterval::new(interval.chrom.clone(), cursor, cut.start));
            }
            cursor = cursor.max(cut.end);
        }
        if cursor < interval.end {
            result.push(GenomicInterval::new(interval.chrom.clone(), cursor, interval.end));
        }
    }
    result
}
