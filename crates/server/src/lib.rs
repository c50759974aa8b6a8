//! Async service layer over the recommendation engine.
//!
//! The engine is synchronous and CPU-bound, so every call into it runs on
//! tokio's blocking pool. Before each request the service asks its
//! [`FeedbackSource`] whether the ratings changed and refreshes the engine
//! when they did.

pub mod service;
pub mod source;

pub use service::{RecommendationService, Strategy, UserRecommendations};
pub use source::{CsvFeedbackSource, FeedbackSource};
