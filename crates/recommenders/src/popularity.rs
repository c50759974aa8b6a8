//! Popularity recommender.
//!
//! Ranks anime by an IMDB-style weighted rating:
//!
//! ```text
//! score = v / (v + m) * R + m / (v + m) * C
//! ```
//!
//! where `R` is the anime's rating, `v` its member count, `C` the mean rating
//! of the ranked items and `m` the 90th percentile of their member counts.
//! Only items with at least `m` members are ranked. The same ranking works
//! on any pre-filtered slice of the catalog, with `C` and `m` recomputed for
//! that slice.

use crate::error::Result;
use crate::ranking::rank_scores;
use crate::traits::Recommender;
use crate::types::{Recommendation, RecommendationRequest, Snapshot};
use data_loader::{Anime, AnimeId, Catalog, FeedbackTable};
use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Percentile of member counts used as the minimum-vote threshold
const MEMBER_QUANTILE: f32 = 0.9;

pub struct PopularityRecommender {
    catalog: Arc<Catalog>,
    feedback: RwLock<Arc<FeedbackTable>>,
    /// Whole-catalog ranking, best first
    ranked: Vec<(AnimeId, f32)>,
}

impl PopularityRecommender {
    pub fn new(catalog: Arc<Catalog>, feedback: Arc<FeedbackTable>) -> Self {
        let items: Vec<&Anime> = catalog.iter().collect();
        let ranked = weighted_scores(&items);
        debug!(qualified = ranked.len(), catalog = catalog.len(), "Ranked catalog by popularity");

        Self {
            catalog,
            feedback: RwLock::new(feedback),
            ranked,
        }
    }

    /// Rank an arbitrary slice of the catalog.
    ///
    /// Statistics are computed over `items` alone, so a genre slice is ranked
    /// against its own mean and member threshold.
    pub fn rank_items(items: &[&Anime], count: Option<usize>, verbose: bool) -> Vec<Recommendation> {
        let mut scores = weighted_scores(items);
        if let Some(count) = count {
            scores.truncate(count);
        }

        scores
            .into_iter()
            .map(|(anime_id, score)| Recommendation {
                anime_id,
                score,
                anime: verbose
                    .then(|| items.iter().find(|a| a.id == anime_id).map(|a| (*a).clone()))
                    .flatten(),
            })
            .collect()
    }
}

/// Weighted score of every qualifying item, best first, ties in input order
pub fn weighted_scores(items: &[&Anime]) -> Vec<(AnimeId, f32)> {
    if items.is_empty() {
        return Vec::new();
    }

    let mean_rating = items.iter().map(|a| a.rating).sum::<f32>() / items.len() as f32;
    let mut members: Vec<f32> = items.iter().map(|a| a.members as f32).collect();
    let min_votes = quantile(&mut members, MEMBER_QUANTILE);

    let mut scores: Vec<(AnimeId, f32)> = items
        .iter()
        .filter(|a| a.members as f32 >= min_votes)
        .map(|a| (a.id, weighted_rating(a.rating, a.members as f32, min_votes, mean_rating)))
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scores
}

/// Bayesian average of `rating` toward `mean`, with `votes` against `min_votes`
pub fn weighted_rating(rating: f32, votes: f32, min_votes: f32, mean: f32) -> f32 {
    let total = votes + min_votes;
    if total <= 0.0 {
        return rating;
    }
    votes / total * rating + min_votes / total * mean
}

/// Linearly interpolated quantile, `q` in `[0, 1]`. Sorts `values` in place.
fn quantile(values: &mut [f32], q: f32) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let position = q * (values.len() - 1) as f32;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f32;
    values[lower] + (values[upper] - values[lower]) * fraction
}

impl Recommender for PopularityRecommender {
    fn name(&self) -> &str {
        "popularity"
    }

    fn score_column_name(&self) -> &'static str {
        "weighted_score"
    }

    fn is_personalized(&self) -> bool {
        false
    }

    fn snapshot(&self) -> Snapshot {
        let feedback = Arc::clone(&self.feedback.read().unwrap_or_else(PoisonError::into_inner));
        Snapshot::new(Arc::clone(&self.catalog), feedback)
    }

    /// Same ranking for every user, minus the ignored items
    fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Vec<Recommendation>> {
        Ok(rank_scores(self.ranked.clone(), request, &self.catalog))
    }

    /// Scores depend on the catalog only; just track the new snapshot
    fn refresh(&self, feedback: Arc<FeedbackTable>) -> Result<()> {
        *self.feedback.write().unwrap_or_else(PoisonError::into_inner) = feedback;
        Ok(())
    }
}
