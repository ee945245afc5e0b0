//! Triplet-validity masks for contrastive training.
//!
//! A mask entry is `true` when the (query, candidate) pair is a valid
//! negative (or the positive itself) and `false` when the candidate is
//! another correct answer that must not be pushed away.

use crate::triplet::TripletDict;
use crate::types::Example;

/// Dense row-major boolean matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripletMask {
    rows: usize,
    cols: usize,
    data: Vec<bool>,
}

impl TripletMask {
    /// All-`true` mask.
    pub fn all_valid(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![true; rows * cols],
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether `(row, col)` is a valid negative. Out-of-range reads are `false`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.data[row * self.cols + col]
    }

    #[inline]
    fn set(&mut self, row: usize, col: usize, value: bool) {
        self.data[row * self.cols + col] = value;
    }

    /// Row-major values.
    #[inline]
    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Number of entries excluded from the negative set.
    pub fn num_masked(&self) -> usize {
        self.data.iter().filter(|v| !**v).count()
    }
}

/// Builds the mask between a batch and an arbitrary candidate list.
///
/// The cross-batch negative cache calls this with the current batch as
/// rows and the cached examples as columns.
pub trait NegativeMaskBuilder {
    fn construct_mask(&self, rows: &[Example], cols: &[Example]) -> TripletMask;
}

/// Mask construction backed by the known-fact index.
#[derive(Debug, Clone, Copy)]
pub struct TripletMasker<'a> {
    triplets: &'a TripletDict,
}

impl<'a> TripletMasker<'a> {
    pub fn new(triplets: &'a TripletDict) -> Self {
        Self { triplets }
    }

    /// In-batch mask: rows against themselves, positives on the diagonal.
    pub fn construct_batch_mask(&self, rows: &[Example]) -> TripletMask {
        construct_mask(self.triplets, rows, None)
    }

    pub fn construct_self_negative_mask(&self, rows: &[Example]) -> Vec<bool> {
        construct_self_negative_mask(self.triplets, rows)
    }
}

impl NegativeMaskBuilder for TripletMasker<'_> {
    fn construct_mask(&self, rows: &[Example], cols: &[Example]) -> TripletMask {
        construct_mask(self.triplets, rows, Some(cols))
    }
}

/// Build the triplet mask between `rows` and `cols`.
///
/// When `cols` is `None` the rows are their own candidates and the
/// diagonal (the positive pairs) is always kept. Otherwise:
/// - pairs sharing the same tail entity are masked;
/// - if `(head_i, relation_i)` has more than one known tail, every column
///   whose tail is one of them is masked too.
pub fn construct_mask(
    triplets: &TripletDict,
    rows: &[Example],
    cols: Option<&[Example]>,
) -> TripletMask {
    let positive_on_diagonal = cols.is_none();
    let cols = cols.unwrap_or(rows);
    let mut mask = TripletMask::all_valid(rows.len(), cols.len());

    for (i, row) in rows.iter().enumerate() {
        for (j, col) in cols.iter().enumerate() {
            if positive_on_diagonal && i == j {
                continue;
            }
            if row.tail_id == col.tail_id {
                mask.set(i, j, false);
            }
        }

        let Some(neighbor_ids) = triplets.get_neighbors(&row.head_id, &row.relation) else {
            continue;
        };
        if neighbor_ids.len() <= 1 {
            continue;
        }
        for (j, col) in cols.iter().enumerate() {
            if positive_on_diagonal && i == j {
                continue;
            }
            if neighbor_ids.contains(&col.tail_id) {
                mask.set(i, j, false);
            }
        }
    }

    mask
}

/// `false` for rows whose head entity is itself a correct tail.
///
/// Such a head cannot serve as a self-negative for its own query.
pub fn construct_self_negative_mask(triplets: &TripletDict, rows: &[Example]) -> Vec<bool> {
    rows.iter()
        .map(|ex| !triplets.contains(&ex.head_id, &ex.relation, &ex.head_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Vec<Example> {
        vec![
            Example::new("h1", "r", "t1"),
            Example::new("h2", "r", "t1"),
            Example::new("h1", "r", "t2"),
            Example::new("h3", "r", "t3"),
        ]
    }

    #[test]
    fn test_diagonal_always_kept() {
        let rows = batch();
        let triplets = TripletDict::from_examples(&rows);
        let mask = construct_mask(&triplets, &rows, None);
        for i in 0..rows.len() {
            assert!(mask.get(i, i), "diagonal {} must stay valid", i);
        }
    }

    #[test]
    fn test_same_tail_masked() {
        let rows = batch();
        let triplets = TripletDict::from_examples(&rows);
        let mask = construct_mask(&triplets, &rows, None);
        // rows 0 and 1 share tail t1
        assert!(!mask.get(0, 1));
        assert!(!mask.get(1, 0));
        assert!(mask.get(3, 0));
    }

    #[test]
    fn test_other_known_tails_masked() {
        let rows = batch();
        let triplets = TripletDict::from_examples(&rows);
        let mask = construct_mask(&triplets, &rows, None);
        // (h1, r) -> {t1, t2}: row 0 must not push away t2 (column 2) and vice versa
        assert!(!mask.get(0, 2));
        assert!(!mask.get(2, 0));
        assert!(!mask.get(2, 1));
        // (h2, r) has a single known tail, so only the same-tail rule applies
        assert!(mask.get(1, 2));
        assert!(mask.get(1, 3));
    }

    #[test]
    fn test_cross_mask_has_no_diagonal_exemption() {
        let rows = batch();
        let triplets = TripletDict::from_examples(&rows);
        let masker = TripletMasker::new(&triplets);
        let mask = masker.construct_mask(&rows, &rows);
        assert_eq!(mask.rows(), 4);
        assert_eq!(mask.cols(), 4);
        for i in 0..rows.len() {
            assert!(!mask.get(i, i), "identical cached example {} must be masked", i);
        }
    }

    #[test]
    fn test_self_negative_mask() {
        let rows = vec![Example::new("a", "similar to", "b"), Example::new("c", "r", "d")];
        let mut triplets = TripletDict::from_examples(&rows);
        triplets.insert(&Example::new("a", "similar to", "a"));
        let mask = construct_self_negative_mask(&triplets, &rows);
        assert_eq!(mask, vec![false, true]);
    }

    #[test]
    fn test_out_of_range_get_is_false() {
        let mask = TripletMask::all_valid(2, 2);
        assert!(!mask.get(2, 0));
        assert!(!mask.get(0, 2));
        assert_eq!(mask.num_masked(), 0);
    }
}
