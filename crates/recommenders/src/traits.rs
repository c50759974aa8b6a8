//! The contract every recommender implements.

use crate::error::Result;
use crate::types::{Recommendation, RecommendationRequest, Snapshot};
use data_loader::FeedbackTable;
use std::sync::Arc;

/// A strategy that turns a user id into a ranked list of anime.
///
/// All methods take `&self` so a recommender can be shared behind an `Arc`
/// and queried while another thread refreshes it. Implementations build
/// their new state off to the side and swap it in whole.
pub trait Recommender: Send + Sync {
    /// Human readable name, used in logs and errors
    fn name(&self) -> &str;

    /// Label of the score this recommender produces ("predicted_rating", ...)
    fn score_column_name(&self) -> &'static str;

    /// Whether results depend on the requesting user's history
    fn is_personalized(&self) -> bool {
        true
    }

    /// The catalog and feedback this recommender currently reflects
    fn snapshot(&self) -> Snapshot;

    /// Rank anime for `request.user_id`
    fn generate_recommendations(&self, request: &RecommendationRequest)
    -> Result<Vec<Recommendation>>;

    /// Rebuild derived state from a new feedback snapshot.
    ///
    /// Passing the `Arc` already in use is a no-op.
    fn refresh(&self, feedback: Arc<FeedbackTable>) -> Result<()>;
}
