//! Weighted hybrid of several recommenders.
//!
//! ## Algorithm
//! 1. Ask every constituent for its full, unfiltered ranking (in parallel)
//! 2. Rescale each constituent's scores onto `0..=10`
//! 3. Outer-join on anime id; a constituent that didn't score an item
//!    contributes `0.0`
//! 4. Joint score = Σ rescaled score × weight
//! 5. Drop ignored items, sort descending, truncate
//!
//! ## Rescaling
//! Non-negative scores are divided by the column maximum (`score / max × 10`).
//! If any score is negative the column is min-max scaled instead. A column
//! whose maximum is zero, or whose range is zero, contributes nothing.

use data_loader::{AnimeId, Catalog, FeedbackTable, UserId};
use rayon::prelude::*;
use recommenders::{
    RecommendError, Recommendation, RecommendationRequest, Recommender, Result, Snapshot,
    rank_scores,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Upper end of the common score range
pub const RESCALE_MAX: f32 = 10.0;

/// Minimum number of constituents a hybrid needs
pub const MIN_CONSTITUENTS: usize = 2;

/// One row of the joined score table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointScore {
    pub anime_id: AnimeId,
    /// Rescaled score per constituent, keyed by the constituent's name
    pub components: Vec<(String, f32)>,
    pub joint: f32,
}

pub struct HybridRecommender {
    catalog: Arc<Catalog>,
    constituents: Vec<(Arc<dyn Recommender>, f32)>,
}

impl HybridRecommender {
    /// Combine weighted recommenders.
    ///
    /// Fails if there are fewer than two, if a weight is negative or not
    /// finite, or if the constituents weren't built on the same data.
    pub fn new(constituents: Vec<(Arc<dyn Recommender>, f32)>) -> Result<Self> {
        if constituents.len() < MIN_CONSTITUENTS {
            return Err(RecommendError::TooFewRecommenders {
                required: MIN_CONSTITUENTS,
                found: constituents.len(),
            });
        }

        for (recommender, weight) in &constituents {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(RecommendError::InvalidWeight {
                    recommender: recommender.name().to_string(),
                    weight: *weight,
                });
            }
        }

        let base = constituents[0].0.snapshot();
        for (recommender, _) in &constituents[1..] {
            if !base.same_data(&recommender.snapshot()) {
                return Err(RecommendError::SnapshotMismatch {
                    recommender: recommender.name().to_string(),
                });
            }
        }

        Ok(Self {
            catalog: base.catalog,
            constituents,
        })
    }

    pub fn weights(&self) -> Vec<(&str, f32)> {
        self.constituents
            .iter()
            .map(|(r, w)| (r.name(), *w))
            .collect()
    }

    /// The full joined table for a user, in first-appearance order
    #[instrument(skip(self))]
    pub fn joint_scores(&self, user_id: UserId) -> Result<Vec<JointScore>> {
        let full_request = RecommendationRequest::new(user_id).unbounded();
        let lists: Vec<Vec<Recommendation>> = self
            .constituents
            .par_iter()
            .map(|(recommender, _)| recommender.generate_recommendations(&full_request))
            .collect::<Result<Vec<_>>>()?;

        let names: Vec<String> = self
            .constituents
            .iter()
            .map(|(r, _)| r.name().to_string())
            .collect();

        let mut table: Vec<JointScore> = Vec::new();
        let mut position: HashMap<AnimeId, usize> = HashMap::new();

        for (idx, (list, (_, weight))) in lists.iter().zip(&self.constituents).enumerate() {
            let raw: Vec<f32> = list.iter().map(|r| r.score).collect();
            let rescaled = rescale(&raw);
            debug!(
                constituent = names[idx].as_str(),
                scored = list.len(),
                "Rescaled constituent scores"
            );

            for (rec, score) in list.iter().zip(rescaled) {
                let row = *position.entry(rec.anime_id).or_insert_with(|| {
                    table.push(JointScore {
                        anime_id: rec.anime_id,
                        components: names.iter().map(|n| (n.clone(), 0.0)).collect(),
                        joint: 0.0,
                    });
                    table.len() - 1
                });
                table[row].components[idx].1 = score;
                table[row].joint += score * weight;
            }
        }

        Ok(table)
    }

    /// Ranked joint table for a request, with per-constituent breakdown
    pub fn explain(&self, request: &RecommendationRequest) -> Result<Vec<JointScore>> {
        let mut table: Vec<JointScore> = self
            .joint_scores(request.user_id)?
            .into_iter()
            .filter(|row| !request.items_to_ignore.contains(&row.anime_id))
            .collect();

        table.sort_by(|a, b| b.joint.partial_cmp(&a.joint).unwrap_or(Ordering::Equal));
        if let Some(count) = request.count {
            table.truncate(count);
        }
        Ok(table)
    }
}

/// Map a score column onto `0..=RESCALE_MAX`
pub fn rescale(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });

    if min >= 0.0 {
        if max > 0.0 {
            scores.iter().map(|s| s / max * RESCALE_MAX).collect()
        } else {
            vec![0.0; scores.len()]
        }
    } else {
        let range = max - min;
        if range > 0.0 && range.is_finite() {
            scores.iter().map(|s| (s - min) / range * RESCALE_MAX).collect()
        } else {
            vec![0.0; scores.len()]
        }
    }
}

impl Recommender for HybridRecommender {
    fn name(&self) -> &str {
        "hybrid"
    }

    fn score_column_name(&self) -> &'static str {
        "joint_relevance_score"
    }

    fn is_personalized(&self) -> bool {
        self.constituents.iter().any(|(r, _)| r.is_personalized())
    }

    fn snapshot(&self) -> Snapshot {
        self.constituents[0].0.snapshot()
    }

    #[instrument(skip(self, request), fields(user_id = request.user_id))]
    fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Vec<Recommendation>> {
        let scores: Vec<(AnimeId, f32)> = self
            .joint_scores(request.user_id)?
            .into_iter()
            .map(|row| (row.anime_id, row.joint))
            .collect();
        Ok(rank_scores(scores, request, &self.catalog))
    }

    /// Refresh every constituent, or none: on failure the ones already
    /// refreshed go back to the previous feedback.
    fn refresh(&self, feedback: Arc<FeedbackTable>) -> Result<()> {
        let previous = self.snapshot().feedback;
        for (idx, (recommender, _)) in self.constituents.iter().enumerate() {
            if let Err(err) = recommender.refresh(Arc::clone(&feedback)) {
                warn!(
                    recommender = recommender.name(),
                    error = %err,
                    "Hybrid refresh failed, rolling back"
                );
                for (done, _) in &self.constituents[..idx] {
                    if let Err(rollback) = done.refresh(Arc::clone(&previous)) {
                        warn!(recommender = done.name(), error = %rollback, "Rollback failed");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
