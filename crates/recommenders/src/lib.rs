//! # Recommenders Crate
//!
//! Scoring strategies over a [`data_loader::Dataset`] snapshot, all behind
//! the [`Recommender`] trait:
//!
//! - **ContentRecommender**: genre-embedding similarity to what the user rated
//! - **CollaborativeRecommender**: SGD matrix factorization of the rating matrix
//! - **PopularityRecommender**: IMDB-style weighted rating, same for everyone
//!
//! ## Example Usage
//!
//! ```ignore
//! use recommenders::{CollaborativeRecommender, FactorizerConfig, Recommender, RecommendationRequest};
//!
//! let collab = CollaborativeRecommender::new(
//!     dataset.catalog().clone(),
//!     dataset.feedback().clone(),
//!     FactorizerConfig::default(),
//! )?;
//! let results = collab.generate_recommendations(&RecommendationRequest::new(1).with_count(5))?;
//! ```

pub mod collaborative;
pub mod content;
pub mod embedding;
pub mod error;
pub mod factorizer;
pub mod matrix;
pub mod popularity;
pub mod ranking;
pub mod traits;
pub mod types;

pub use collaborative::CollaborativeRecommender;
pub use content::ContentRecommender;
pub use embedding::{GenreEmbedding, GenreFrequencies, UserEmbeddingCache};
pub use error::{RecommendError, Result};
pub use factorizer::{
    CancellationToken, Factorization, FactorizerConfig, PredictionMatrix, SgdFactorizer,
    StopReason, TrainingReport,
};
pub use matrix::RatingMatrix;
pub use popularity::PopularityRecommender;
pub use ranking::rank_scores;
pub use traits::Recommender;
pub use types::{DEFAULT_COUNT, Recommendation, RecommendationRequest, Snapshot};
