//! Rating matrix construction.
//!
//! Pivots feedback records into a dense user × anime matrix. Rows follow
//! ascending user id, columns ascending anime id. Unobserved cells hold
//! `0.0`, and the observed cells are also kept as an explicit list so the
//! factorizer never has to guess from the value whether a cell was rated.

use data_loader::{AnimeId, Feedback, UserId};
use ndarray::Array2;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct RatingMatrix {
    values: Array2<f32>,
    /// (row, column) of every observed cell, row-major
    observed: Vec<(usize, usize)>,
    user_ids: Vec<UserId>,
    item_ids: Vec<AnimeId>,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<AnimeId, usize>,
}

impl RatingMatrix {
    /// Build the matrix from rated feedback.
    ///
    /// Records that aren't rated are skipped. Duplicate (user, anime) pairs
    /// are averaged.
    pub fn from_feedback<'a>(feedback: impl IntoIterator<Item = &'a Feedback>) -> Self {
        let mut cells: BTreeMap<(UserId, AnimeId), (f32, u32)> = BTreeMap::new();
        for f in feedback.into_iter().filter(|f| f.is_rated()) {
            let cell = cells.entry((f.user_id, f.anime_id)).or_insert((0.0, 0));
            cell.0 += f.rating as f32;
            cell.1 += 1;
        }

        let mut user_ids: Vec<UserId> = cells.keys().map(|&(u, _)| u).collect();
        user_ids.dedup();
        let mut item_ids: Vec<AnimeId> = cells.keys().map(|&(_, i)| i).collect();
        item_ids.sort_unstable();
        item_ids.dedup();

        let user_index = index_of(&user_ids);
        let item_index = index_of(&item_ids);

        let mut values = Array2::zeros((user_ids.len(), item_ids.len()));
        let mut observed = Vec::with_capacity(cells.len());
        for ((user_id, anime_id), (total, count)) in cells {
            let cell = (user_index[&user_id], item_index[&anime_id]);
            values[cell] = total / count as f32;
            observed.push(cell);
        }

        Self {
            values,
            observed,
            user_ids,
            item_ids,
            user_index,
            item_index,
        }
    }

    /// Build a matrix directly from values and an explicit observed list.
    ///
    /// Cells outside `observed` may hold any value; training ignores them.
    pub fn from_parts(
        values: Array2<f32>,
        observed: Vec<(usize, usize)>,
        user_ids: Vec<UserId>,
        item_ids: Vec<AnimeId>,
    ) -> Self {
        debug_assert_eq!(values.dim(), (user_ids.len(), item_ids.len()));
        let user_index = index_of(&user_ids);
        let item_index = index_of(&item_ids);
        Self {
            values,
            observed,
            user_ids,
            item_ids,
            user_index,
            item_index,
        }
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn observed(&self) -> &[(usize, usize)] {
        &self.observed
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    pub fn item_ids(&self) -> &[AnimeId] {
        &self.item_ids
    }

    pub fn user_row(&self, user_id: UserId) -> Option<usize> {
        self.user_index.get(&user_id).copied()
    }

    pub fn item_column(&self, anime_id: AnimeId) -> Option<usize> {
        self.item_index.get(&anime_id).copied()
    }

    /// (rows, columns)
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn observed_count(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }
}

fn index_of<T: Copy + Eq + std::hash::Hash>(ids: &[T]) -> HashMap<T, usize> {
    ids.iter().enumerate().map(|(idx, &id)| (id, idx)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(user_id: UserId, anime_id: AnimeId, rating: i8) -> Feedback {
        Feedback {
            user_id,
            anime_id,
            rating,
        }
    }

    #[test]
    fn test_pivot_sorted_and_zero_filled() {
        let records = vec![feedback(5, 20, 8), feedback(2, 10, 6), feedback(5, 10, 4)];
        let matrix = RatingMatrix::from_feedback(&records);

        assert_eq!(matrix.user_ids(), &[2, 5]);
        assert_eq!(matrix.item_ids(), &[10, 20]);
        assert_eq!(matrix.dim(), (2, 2));
        assert_eq!(matrix.values()[(0, 0)], 6.0);
        assert_eq!(matrix.values()[(0, 1)], 0.0);
        assert_eq!(matrix.values()[(1, 1)], 8.0);
        assert_eq!(matrix.observed_count(), 3);
        assert!(!matrix.observed().contains(&(0, 1)));
    }

    #[test]
    fn test_duplicates_are_averaged() {
        let records = vec![feedback(1, 1, 7), feedback(1, 1, 8)];
        let matrix = RatingMatrix::from_feedback(&records);

        assert_eq!(matrix.observed_count(), 1);
        assert_eq!(matrix.values()[(0, 0)], 7.5);
    }

    #[test]
    fn test_unrated_feedback_skipped() {
        let records = vec![feedback(1, 1, -1), feedback(1, 2, 0)];
        let matrix = RatingMatrix::from_feedback(&records);

        assert!(matrix.is_empty());
        assert_eq!(matrix.dim(), (0, 0));
    }

    #[test]
    fn test_lookup() {
        let records = vec![feedback(3, 30, 9)];
        let matrix = RatingMatrix::from_feedback(&records);

        assert_eq!(matrix.user_row(3), Some(0));
        assert_eq!(matrix.item_column(30), Some(0));
        assert_eq!(matrix.user_row(4), None);
    }
}
