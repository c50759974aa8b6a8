//! Turning raw per-item scores into a ranked result list.

use crate::types::{Recommendation, RecommendationRequest};
use data_loader::{AnimeId, Catalog};
use std::cmp::Ordering;

/// Filter, sort and truncate scores for a request.
///
/// The sort is stable, so items with equal scores keep their input order.
pub fn rank_scores(
    scores: Vec<(AnimeId, f32)>,
    request: &RecommendationRequest,
    catalog: &Catalog,
) -> Vec<Recommendation> {
    let mut scores: Vec<(AnimeId, f32)> = scores
        .into_iter()
        .filter(|(id, _)| !request.items_to_ignore.contains(id))
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    if let Some(count) = request.count {
        scores.truncate(count);
    }

    scores
        .into_iter()
        .map(|(anime_id, score)| Recommendation {
            anime_id,
            score,
            anime: request
                .verbose
                .then(|| catalog.get_anime(anime_id).cloned())
                .flatten(),
        })
        .collect()
}
