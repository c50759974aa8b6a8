//! Collaborative filtering through SGD matrix factorization.
//!
//! The recommender trains on construction and again on every refresh with
//! new feedback. A refresh trains the replacement model before swapping it
//! in, so requests keep being served from the previous model meanwhile.

use crate::error::{RecommendError, Result};
use crate::factorizer::{CancellationToken, FactorizerConfig, PredictionMatrix, SgdFactorizer, TrainingReport};
use crate::matrix::RatingMatrix;
use crate::ranking::rank_scores;
use crate::traits::Recommender;
use crate::types::{Recommendation, RecommendationRequest, Snapshot};
use data_loader::{AnimeId, Catalog, FeedbackTable, UserId};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument};

/// A trained model and the feedback it was trained on
#[derive(Debug)]
struct TrainedState {
    feedback: Arc<FeedbackTable>,
    predictions: PredictionMatrix,
    report: TrainingReport,
}

pub struct CollaborativeRecommender {
    catalog: Arc<Catalog>,
    factorizer: SgdFactorizer,
    state: RwLock<Arc<TrainedState>>,
}

impl CollaborativeRecommender {
    /// Build and train on the given snapshot
    pub fn new(
        catalog: Arc<Catalog>,
        feedback: Arc<FeedbackTable>,
        config: FactorizerConfig,
    ) -> Result<Self> {
        let factorizer = SgdFactorizer::new(config)?;
        let state = train(&factorizer, feedback)?;
        Ok(Self {
            catalog,
            factorizer,
            state: RwLock::new(Arc::new(state)),
        })
    }

    /// Token that stops an in-flight training run between epochs
    pub fn cancel_handle(&self) -> CancellationToken {
        self.factorizer.cancel_handle()
    }

    pub fn config(&self) -> &FactorizerConfig {
        self.factorizer.config()
    }

    /// Report from the training run behind the current model
    pub fn training_report(&self) -> TrainingReport {
        self.current().report.clone()
    }

    /// Predicted rating for a (user, anime) pair seen in training
    pub fn predicted_rating(&self, user_id: UserId, anime_id: AnimeId) -> Option<f32> {
        self.current().predictions.predict(user_id, anime_id)
    }

    fn current(&self) -> Arc<TrainedState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }
}

fn train(factorizer: &SgdFactorizer, feedback: Arc<FeedbackTable>) -> Result<TrainedState> {
    factorizer.cancel_handle().reset();

    let matrix = RatingMatrix::from_feedback(feedback.records());
    let (users, items) = matrix.dim();
    info!(
        users,
        items,
        observed = matrix.observed_count(),
        "Training collaborative model"
    );

    let factorization = factorizer.factorize(&matrix)?;
    Ok(TrainedState {
        feedback,
        predictions: factorization.predictions,
        report: factorization.report,
    })
}

impl Recommender for CollaborativeRecommender {
    fn name(&self) -> &str {
        "collaborative"
    }

    fn score_column_name(&self) -> &'static str {
        "predicted_rating"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new(Arc::clone(&self.catalog), Arc::clone(&self.current().feedback))
    }

    /// Anime nobody has rated are not part of the model and are not scored
    #[instrument(skip(self, request), fields(user_id = request.user_id))]
    fn generate_recommendations(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Vec<Recommendation>> {
        let state = self.current();
        let scores = state
            .predictions
            .user_predictions(request.user_id)
            .ok_or(RecommendError::InsufficientData {
                user_id: request.user_id,
            })?;

        debug!(scored = scores.len(), "Ranking predicted ratings");
        Ok(rank_scores(scores, request, &self.catalog))
    }

    fn refresh(&self, feedback: Arc<FeedbackTable>) -> Result<()> {
        if Arc::ptr_eq(&self.current().feedback, &feedback) {
            return Ok(());
        }

        let state = train(&self.factorizer, feedback)?;
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
        Ok(())
    }
}
