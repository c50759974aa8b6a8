//! Error types for the recommenders crate.

use data_loader::{AnimeId, UserId};
use thiserror::Error;

/// Errors raised while building or querying a recommender
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecommendError {
    /// A combiner or engine was given fewer recommenders than it needs
    #[error("At least {required} recommenders are required, got {found}")]
    TooFewRecommenders { required: usize, found: usize },

    /// A recommender was trained on a different catalog/feedback snapshot
    #[error("Recommender '{recommender}' was built on a different dataset snapshot")]
    SnapshotMismatch { recommender: String },

    /// Factorization rank outside `1..=min(users, items)`
    #[error("Rank {rank} is invalid for this rating matrix (must be between 1 and {max})")]
    InvalidRank { rank: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid weight {weight} for recommender '{recommender}'")]
    InvalidWeight { recommender: String, weight: f32 },

    /// The rating matrix has no observed cells, so the training error is undefined
    #[error("Rating matrix has no observed ratings")]
    EmptyRatingMatrix,

    /// Feedback references an anime the catalog does not contain
    #[error("Anime {anime_id} is not in the catalog")]
    UnknownItem { anime_id: AnimeId },

    /// The user has no feedback history to personalize from
    #[error("Insufficient data to recommend for user {user_id}: no rating history")]
    InsufficientData { user_id: UserId },

    #[error("Training was cancelled")]
    TrainingCancelled,

    /// Training error stopped being finite
    #[error("Factorization diverged at epoch {epoch}")]
    Diverged { epoch: usize },

    #[error("No recommender named '{name}'")]
    UnknownRecommender { name: String },
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, RecommendError>;
