//! Citation-impact metrics
//!
//! h-index and i10-index over a set of per-paper citation counts. Both are
//! recomputed from scratch on every cycle; nothing here is incremental.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Citation threshold for the i10-index
pub const I10_THRESHOLD: u32 = 10;

/// Aggregate metrics for one researcher's paper set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationMetrics {
    pub total_papers: u32,
    pub h_index: u32,
    pub i10_index: u32,
    pub total_citations: u64,
}

impl CitationMetrics {
    /// Compute all metrics from raw citation counts
    pub fn compute(counts: &[u32]) -> Self {
        Self {
            total_papers: counts.len() as u32,
            h_index: h_index(counts),
            i10_index: i10_index(counts),
            total_citations: counts.iter().map(|&c| u64::from(c)).sum(),
        }
    }
}

/// Largest `h` such that `h` papers have at least `h` citations each.
pub fn h_index(counts: &[u32]) -> u32 {
    let mut sorted = counts.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let mut h = 0;
    for (i, &citations) in sorted.iter().enumerate() {
        if citations as usize >= i + 1 {
            h += 1;
        } else {
            break;
        }
    }
    h
}

/// Number of papers with at least ten citations.
pub fn i10_index(counts: &[u32]) -> u32 {
    counts.iter().filter(|&&c| c >= I10_THRESHOLD).count() as u32
}

/// Metrics restricted to papers published up to and including `year`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearlyMetrics {
    pub year: u16,
    pub metrics: CitationMetrics,
}

/// Cumulative metrics per publication year.
///
/// Papers are `(year, citations)` pairs; entries without a parseable year are
/// skipped. Each output row covers every paper from the earliest year up to
/// and including its own year.
pub fn cumulative_by_year<'a, I>(papers: I) -> Vec<YearlyMetrics>
where
    I: IntoIterator<Item = (&'a str, u32)>,
{
    let mut by_year: BTreeMap<u16, Vec<u32>> = BTreeMap::new();
    for (year, citations) in papers {
        if let Ok(year) = year.trim().parse::<u16>() {
            by_year.entry(year).or_default().push(citations);
        }
    }

    let mut prefix = Vec::new();
    by_year
        .into_iter()
        .map(|(year, counts)| {
            prefix.extend(counts);
            YearlyMetrics {
                year,
                metrics: CitationMetrics::compute(&prefix),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference definition: the largest h with at least h papers cited h times.
    fn h_index_by_definition(counts: &[u32]) -> u32 {
        (0..=counts.len() as u32)
            .rev()
            .find(|&h| counts.iter().filter(|&&c| c >= h).count() as u32 >= h)
            .unwrap_or(0)
    }

    #[test]
    fn test_h_index_known_values() {
        assert_eq!(h_index(&[]), 0);
        assert_eq!(h_index(&[0]), 0);
        assert_eq!(h_index(&[10, 8, 5, 4, 3]), 4);
        assert_eq!(h_index(&[3, 0, 6, 1, 5]), 3);
        assert_eq!(h_index(&[100]), 1);
    }

    #[test]
    fn test_h_index_matches_definition() {
        let cases: Vec<Vec<u32>> = vec![
            vec![1, 1, 1],
            vec![0, 0, 0, 0],
            vec![25, 8, 5, 3, 3],
            vec![4, 4, 4, 4],
            vec![5, 5, 5, 5, 5, 5],
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            vec![12, 10, 9, 3],
        ];
        for counts in cases {
            assert_eq!(h_index(&counts), h_index_by_definition(&counts), "{:?}", counts);
        }
    }

    #[test]
    fn test_i10_index() {
        assert_eq!(i10_index(&[12, 10, 9, 3]), 2);
        assert_eq!(i10_index(&[]), 0);
        assert_eq!(i10_index(&[9, 9]), 0);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let counts = [42, 7, 7, 13, 0, 2];
        let first = CitationMetrics::compute(&counts);
        let second = CitationMetrics::compute(&counts);
        assert_eq!(first, second);
        assert_eq!(first.total_papers, 6);
        assert_eq!(first.total_citations, 71);
        assert_eq!(first.h_index, 4);
        assert_eq!(first.i10_index, 2);
    }

    #[test]
    fn test_cumulative_by_year() {
        let papers = vec![
            ("2019", 12),
            ("2018", 3),
            ("", 50),
            ("2019", 10),
            ("2021", 1),
        ];
        let yearly = cumulative_by_year(papers.iter().map(|(y, c)| (*y, *c)));

        let years: Vec<u16> = yearly.iter().map(|y| y.year).collect();
        assert_eq!(years, vec![2018, 2019, 2021]);

        assert_eq!(yearly[0].metrics.total_papers, 1);
        assert_eq!(yearly[1].metrics.total_papers, 3);
        assert_eq!(yearly[1].metrics.h_index, 3);
        assert_eq!(yearly[1].metrics.i10_index, 2);
        assert_eq!(yearly[2].metrics.total_citations, 26);
    }
}
