//! The recommendation engine.
//!
//! Owns the dataset snapshot and a registry of named recommenders, and keeps
//! them in sync when feedback changes. A refresh rebuilds each recommender
//! off to the side (they swap their own state in whole), then swaps the
//! engine's feedback snapshot. Refreshes are serialized; reads are not
//! blocked by them.

use crate::filter_pipeline::ItemFilterPipeline;
use crate::hybrid::{HybridRecommender, JointScore};
use data_loader::{Catalog, Dataset, FeedbackTable, UserId};
use recommenders::{
    CancellationToken, CollaborativeRecommender, ContentRecommender, FactorizerConfig,
    PopularityRecommender, RecommendError, Recommendation, RecommendationRequest, Recommender,
    Result, Snapshot,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, instrument, warn};

/// Registry name of the genre-similarity recommender
pub const CONTENT: &str = "content";
/// Registry name of the matrix factorization recommender
pub const COLLABORATIVE: &str = "collaborative";
/// Registry name of the weighted content + collaborative blend
pub const HYBRID: &str = "hybrid";
/// Registry name of the weighted-rating popularity recommender
pub const POPULARITY: &str = "popularity";

/// Minimum number of recommenders an engine is built with
pub const MIN_RECOMMENDERS: usize = 2;

/// Configuration for [`RecommendationEngine::standard`]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub factorizer: FactorizerConfig,
    /// Weight of the content recommender inside the hybrid
    pub content_weight: f32,
    /// Weight of the collaborative recommender inside the hybrid
    pub collaborative_weight: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            factorizer: FactorizerConfig::default(),
            content_weight: 1.0,
            collaborative_weight: 2.0,
        }
    }
}

impl EngineConfig {
    pub fn with_factorizer(mut self, factorizer: FactorizerConfig) -> Self {
        self.factorizer = factorizer;
        self
    }

    pub fn with_weights(mut self, content: f32, collaborative: f32) -> Self {
        self.content_weight = content;
        self.collaborative_weight = collaborative;
        self
    }
}

pub struct RecommendationEngine {
    catalog: Arc<Catalog>,
    feedback: RwLock<Arc<FeedbackTable>>,
    recommenders: BTreeMap<String, Arc<dyn Recommender>>,
    /// Kept concretely so joint score breakdowns can be served
    hybrid: Option<Arc<HybridRecommender>>,
    cancel: Option<CancellationToken>,
    refresh_lock: Mutex<()>,
}

impl RecommendationEngine {
    /// Build an engine around already constructed recommenders.
    ///
    /// Every recommender must have been built on `dataset`.
    pub fn new(dataset: &Dataset, recommenders: Vec<(String, Arc<dyn Recommender>)>) -> Result<Self> {
        if recommenders.len() < MIN_RECOMMENDERS {
            return Err(RecommendError::TooFewRecommenders {
                required: MIN_RECOMMENDERS,
                found: recommenders.len(),
            });
        }

        let expected = Snapshot::new(Arc::clone(dataset.catalog()), Arc::clone(dataset.feedback()));
        let mut registry = BTreeMap::new();
        for (name, recommender) in recommenders {
            if !expected.same_data(&recommender.snapshot()) {
                return Err(RecommendError::SnapshotMismatch {
                    recommender: name,
                });
            }
            if registry.insert(name.clone(), recommender).is_some() {
                return Err(RecommendError::InvalidConfig(format!(
                    "recommender '{}' registered twice",
                    name
                )));
            }
        }

        Ok(Self {
            catalog: Arc::clone(dataset.catalog()),
            feedback: RwLock::new(Arc::clone(dataset.feedback())),
            recommenders: registry,
            hybrid: None,
            cancel: None,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Build the standard set: content, collaborative, hybrid and popularity
    #[instrument(skip(dataset, config))]
    pub fn standard(dataset: &Dataset, config: EngineConfig) -> Result<Self> {
        let catalog = Arc::clone(dataset.catalog());
        let feedback = Arc::clone(dataset.feedback());

        let content = Arc::new(ContentRecommender::new(
            Arc::clone(&catalog),
            Arc::clone(&feedback),
        ));
        let collaborative = Arc::new(CollaborativeRecommender::new(
            Arc::clone(&catalog),
            Arc::clone(&feedback),
            config.factorizer.clone(),
        )?);
        let cancel = collaborative.cancel_handle();
        let hybrid = Arc::new(HybridRecommender::new(vec![
            (Arc::clone(&content) as Arc<dyn Recommender>, config.content_weight),
            (
                Arc::clone(&collaborative) as Arc<dyn Recommender>,
                config.collaborative_weight,
            ),
        ])?);
        let popularity = Arc::new(PopularityRecommender::new(catalog, feedback));

        let mut engine = Self::new(
            dataset,
            vec![
                (CONTENT.to_string(), content as Arc<dyn Recommender>),
                (COLLABORATIVE.to_string(), collaborative as Arc<dyn Recommender>),
                (HYBRID.to_string(), Arc::clone(&hybrid) as Arc<dyn Recommender>),
                (POPULARITY.to_string(), popularity as Arc<dyn Recommender>),
            ],
        )?;
        engine.hybrid = Some(hybrid);
        engine.cancel = Some(cancel);

        info!(recommenders = ?engine.recommender_names(), "Recommendation engine ready");
        Ok(engine)
    }

    /// Use `token` for [`RecommendationEngine::cancel_training`]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn get_recommender(&self, name: &str) -> Result<Arc<dyn Recommender>> {
        self.recommenders
            .get(name)
            .cloned()
            .ok_or_else(|| RecommendError::UnknownRecommender {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted
    pub fn recommender_names(&self) -> Vec<&str> {
        self.recommenders.keys().map(String::as_str).collect()
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Current feedback snapshot
    pub fn feedback(&self) -> Arc<FeedbackTable> {
        Arc::clone(&self.feedback.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current catalog + feedback as a dataset
    pub fn dataset(&self) -> Dataset {
        Dataset::from_shared(Arc::clone(&self.catalog), self.feedback())
    }

    /// The request a user gets by default: their rated anime are excluded
    fn request_for(&self, user_id: UserId, count: Option<usize>, verbose: bool) -> RecommendationRequest {
        let mut request = RecommendationRequest::new(user_id)
            .with_verbose(verbose)
            .ignoring(self.feedback().rated_items(user_id));
        request.count = count;
        request
    }

    /// Recommend with the named recommender.
    ///
    /// Personalized recommenders need the user to have rated something;
    /// otherwise this returns [`RecommendError::InsufficientData`].
    #[instrument(skip(self))]
    pub fn recommend(
        &self,
        name: &str,
        user_id: UserId,
        count: Option<usize>,
        verbose: bool,
    ) -> Result<Vec<Recommendation>> {
        let recommender = self.get_recommender(name)?;
        if recommender.is_personalized() && !self.feedback().has_feedback(user_id) {
            return Err(RecommendError::InsufficientData { user_id });
        }

        let request = self.request_for(user_id, count, verbose);
        recommender.generate_recommendations(&request)
    }

    /// Hybrid recommendations with each constituent's rescaled score
    pub fn explain_hybrid(&self, user_id: UserId, count: Option<usize>) -> Result<Vec<JointScore>> {
        let hybrid = self.hybrid.as_ref().ok_or_else(|| RecommendError::UnknownRecommender {
            name: HYBRID.to_string(),
        })?;
        if !self.feedback().has_feedback(user_id) {
            return Err(RecommendError::InsufficientData { user_id });
        }
        hybrid.explain(&self.request_for(user_id, count, false))
    }

    /// Most popular anime within the slice the pipeline selects
    pub fn most_popular(
        &self,
        filters: &ItemFilterPipeline,
        count: Option<usize>,
        verbose: bool,
    ) -> Vec<Recommendation> {
        let items = filters.apply_catalog(&self.catalog);
        PopularityRecommender::rank_items(&items, count, verbose)
    }

    /// Replace the feedback snapshot and refresh every recommender.
    ///
    /// If any recommender fails, the ones already refreshed are rolled back
    /// to the previous snapshot and the error is returned; the engine keeps
    /// serving the old data.
    pub fn refresh_recommenders(&self, feedback: FeedbackTable) -> Result<()> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.refresh_locked(Arc::new(feedback))
    }

    /// Refresh only if `feedback` differs from the current snapshot.
    ///
    /// Returns whether a refresh happened.
    pub fn refresh_if_changed(&self, feedback: FeedbackTable) -> Result<bool> {
        let _guard = self.refresh_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if *self.feedback() == feedback {
            return Ok(false);
        }
        self.refresh_locked(Arc::new(feedback))?;
        Ok(true)
    }

    fn refresh_locked(&self, feedback: Arc<FeedbackTable>) -> Result<()> {
        let previous = self.feedback();
        info!(
            previous = previous.len(),
            records = feedback.len(),
            "Refreshing recommenders"
        );

        let mut refreshed: Vec<&str> = Vec::with_capacity(self.recommenders.len());
        for (name, recommender) in &self.recommenders {
            if let Err(err) = recommender.refresh(Arc::clone(&feedback)) {
                warn!(recommender = name.as_str(), error = %err, "Refresh failed, rolling back");
                for done in refreshed {
                    if let Err(rollback) = self.recommenders[done].refresh(Arc::clone(&previous)) {
                        warn!(recommender = done, error = %rollback, "Rollback failed");
                    }
                }
                return Err(err);
            }
            refreshed.push(name);
        }

        *self.feedback.write().unwrap_or_else(PoisonError::into_inner) = feedback;
        info!("Refresh complete");
        Ok(())
    }

    /// Stop an in-flight collaborative training run
    pub fn cancel_training(&self) {
        if let Some(cancel) = &self.cancel {
            warn!("Cancelling collaborative training");
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_loader::{Anime, Feedback};

    fn create_test_dataset() -> Dataset {
        let mut catalog = Catalog::new();
        let genres = [
            vec!["Action", "Shounen"],
            vec!["Action", "Adventure"],
            vec!["Romance", "Drama"],
            vec!["Comedy", "Slice of Life"],
            vec!["Action", "Sci-Fi"],
        ];
        for (idx, genres) in genres.iter().enumerate() {
            let id = idx as u32 + 1;
            catalog.insert_anime(Anime {
                id,
                name: format!("Anime {}", id),
                genres: genres.iter().map(|g| g.to_string()).collect(),
                kind: if id % 2 == 0 { "Movie" } else { "TV" }.to_string(),
                episodes: 12,
                rating: 6.0 + id as f32 * 0.5,
                members: 1000 * id,
            });
        }

        let ratings: [(UserId, u32, i8); 10] = [
            (1, 1, 9),
            (1, 2, 8),
            (1, 3, 3),
            (2, 2, 7),
            (2, 3, 9),
            (2, 4, 8),
            (3, 1, 6),
            (3, 4, 9),
            (3, 5, 7),
            (4, 5, 10),
        ];
        let feedback = FeedbackTable::from_records(ratings.iter().map(|&(user_id, anime_id, rating)| {
            Feedback {
                user_id,
                anime_id,
                rating,
            }
        }));
        Dataset::new(catalog, feedback)
    }

    fn test_config() -> EngineConfig {
        EngineConfig::default().with_factorizer(
            FactorizerConfig::default()
                .with_rank(2)
                .with_regularization(0.02)
                .with_convergence_threshold(0.5)
                .with_max_epochs(200),
        )
    }

    #[test]
    fn test_standard_registers_all() {
        let engine = RecommendationEngine::standard(&create_test_dataset(), test_config()).unwrap();
        assert_eq!(
            engine.recommender_names(),
            vec![COLLABORATIVE, CONTENT, HYBRID, POPULARITY]
        );
        assert!(engine.get_recommender("nope").is_err());
    }

    #[test]
    fn test_requires_two_recommenders() {
        let dataset = create_test_dataset();
        let popularity = Arc::new(PopularityRecommender::new(
            Arc::clone(dataset.catalog()),
            Arc::clone(dataset.feedback()),
        ));
        let result = RecommendationEngine::new(
            &dataset,
            vec![(POPULARITY.to_string(), popularity as Arc<dyn Recommender>)],
        );
        assert!(matches!(
            result,
            Err(RecommendError::TooFewRecommenders { found: 1, .. })
        ));
    }

    #[test]
    fn test_rejects_recommender_from_other_dataset() {
        let dataset = create_test_dataset();
        let other = Arc::new(FeedbackTable::new());
        let stale = Arc::new(ContentRecommender::new(Arc::clone(dataset.catalog()), other));
        let popularity = Arc::new(PopularityRecommender::new(
            Arc::clone(dataset.catalog()),
            Arc::clone(dataset.feedback()),
        ));

        let result = RecommendationEngine::new(
            &dataset,
            vec![
                (CONTENT.to_string(), stale as Arc<dyn Recommender>),
                (POPULARITY.to_string(), popularity as Arc<dyn Recommender>),
            ],
        );
        assert!(matches!(result, Err(RecommendError::SnapshotMismatch { .. })));
    }

    #[test]
    fn test_rated_items_are_excluded() {
        let engine = RecommendationEngine::standard(&create_test_dataset(), test_config()).unwrap();

        for name in [CONTENT, COLLABORATIVE, HYBRID, POPULARITY] {
            let results = engine.recommend(name, 1, None, false).unwrap();
            assert!(
                results.iter().all(|r| ![1, 2, 3].contains(&r.anime_id)),
                "{} returned a rated item",
                name
            );
        }
    }

    #[test]
    fn test_unknown_user_is_insufficient_data() {
        let engine = RecommendationEngine::standard(&create_test_dataset(), test_config()).unwrap();

        for name in [CONTENT, COLLABORATIVE, HYBRID] {
            let err = engine.recommend(name, 99, Some(5), false).unwrap_err();
            assert_eq!(err, RecommendError::InsufficientData { user_id: 99 });
        }
        // Popularity still answers
        assert!(!engine.recommend(POPULARITY, 99, Some(5), false).unwrap().is_empty());
    }

    #[test]
    fn test_refresh_if_changed() {
        let dataset = create_test_dataset();
        let engine = RecommendationEngine::standard(&dataset, test_config()).unwrap();

        let unchanged = (**dataset.feedback()).clone();
        assert!(!engine.refresh_if_changed(unchanged).unwrap());

        let mut changed = (**dataset.feedback()).clone();
        changed.insert(Feedback { user_id: 5, anime_id: 1, rating: 9 });
        assert!(engine.refresh_if_changed(changed).unwrap());
        assert!(engine.feedback().has_feedback(5));
        assert!(engine.recommend(CONTENT, 5, None, false).is_ok());
    }

    #[test]
    fn test_failed_refresh_keeps_old_snapshot() {
        let dataset = create_test_dataset();
        let engine = RecommendationEngine::standard(&dataset, test_config()).unwrap();

        // Collaborative training rejects an empty matrix
        let err = engine.refresh_recommenders(FeedbackTable::new()).unwrap_err();
        assert_eq!(err, RecommendError::EmptyRatingMatrix);

        assert_eq!(*engine.feedback(), **dataset.feedback());
        for name in engine.recommender_names() {
            let snapshot = engine.get_recommender(name).unwrap().snapshot();
            assert_eq!(*snapshot.feedback, **dataset.feedback(), "{} not rolled back", name);
        }
    }

    #[test]
    fn test_explain_hybrid() {
        let engine = RecommendationEngine::standard(&create_test_dataset(), test_config()).unwrap();
        let rows = engine.explain_hybrid(1, Some(2)).unwrap();

        assert!(rows.len() <= 2);
        for row in &rows {
            assert_eq!(row.components.len(), 2);
            let expected: f32 = row.components[0].1 * 1.0 + row.components[1].1 * 2.0;
            assert!((row.joint - expected).abs() < 1e-4);
        }
    }
}
