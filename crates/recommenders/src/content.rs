//! Content-based recommender.
//!
//! Scores every catalog item by how well its genres match the genres the
//! user rated highly. Item embeddings and genre frequencies depend only on
//! the catalog and are built once; user embeddings are cached per feedback
//! snapshot.

use crate::embedding::{
    GenreEmbedding, GenreFrequencies, UserEmbeddingCache, item_embedding, similarity_score,
    user_embedding,
};
use crate::error::{RecommendError, Result};
use crate::ranking::rank_scores;
use crate::traits::Recommender;
use crate::types::{Recommendation, RecommendationRequest, Snapshot};
use data_loader::{AnimeId, Catalog, FeedbackTable, UserId};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, instrument};

pub struct ContentRecommender {
    catalog: Arc<Catalog>,
    frequencies: GenreFrequencies,
    /// Item embeddings in catalog order
    item_embeddings: Vec<(AnimeId, GenreEmbedding)>,
    user_cache: UserEmbeddingCache,
}

impl ContentRecommender {
    pub fn new(catalog: Arc<Catalog>, feedback: Arc<FeedbackTable>) -> Self {
        let frequencies = GenreFrequencies::from_catalog(&catalog);
        let item_embeddings: Vec<(AnimeId, GenreEmbedding)> = catalog
            .iter()
            .map(|anime| (anime.id, item_embedding(anime)))
            .collect();

        debug!(
            items = item_embeddings.len(),
            genres = frequencies.len(),
            "Built item genre embeddings"
        );

        Self {
            catalog,
            frequencies,
            item_embeddings,
            user_cache: UserEmbeddingCache::new(feedback),
        }
    }

    pub fn frequencies(&self) -> &GenreFrequencies {
        &self.frequencies
    }

    /// The user's genre embedding, computed on first use
    pub fn user_embedding(&self, user_id: UserId) -> Result<Arc<GenreEmbedding>> {
        let feedback = self.user_cache.feedback();
        self.user_cache.get_or_compute(user_id, &feedback, || {
            user_embedding(user_id, &feedback, &self.catalog, &self.frequencies)
        })
    }

    /// Similarity of every catalog item for this user, in catalog order
    pub fn score_all(&self, user: &GenreEmbedding) -> Vec<(AnimeId, f32)> {
        self.item_embeddings
            .par_iter()
            .map(|(id, item)| (*id, similarity_score(user, item, &self.frequencies)))
            .collect()
    }

    pub fn cached_users(&self) -> usize {
        self.user_cache.len()
    }
}

impl Recommender for ContentRecommender {
    fn name(&self) -> &str {
        "content"
    }

    fn score_column_name(&self) -> &'static str {
        "relevance_score"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(Arc::clone(&self.catalog), self.user_cache.feedback())
    }

    #[instrument(skip(self, request), fields(user_id = request.user_id))]
    fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Vec<Recommendation>> {
        let feedback = self.user_cache.feedback();
        if !feedback.has_feedback(request.user_id) {
            return Err(RecommendError::InsufficientData {
                user_id: request.user_id,
            });
        }

        let user = self.user_embedding(request.user_id)?;
        let scores = self.score_all(&user);
        debug!(genres = user.len(), scored = scores.len(), "Scored catalog by genre");

        Ok(rank_scores(scores, request, &self.catalog))
    }

    fn refresh(&self, feedback: Arc<FeedbackTable>) -> Result<()> {
        if Arc::ptr_eq(&self.user_cache.feedback(), &feedback) {
            return Ok(());
        }
        debug!(
            cached = self.user_cache.len(),
            "Clearing user embedding cache"
        );
        self.user_cache.invalidate(feedback);
        Ok(())
    }
}
