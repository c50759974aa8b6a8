//! Composition layer over the individual recommenders.
//!
//! This crate provides:
//! - HybridRecommender for blending weighted recommenders into one ranking
//! - RecommendationEngine, a named registry that owns the dataset snapshot
//!   and refreshes every recommender when feedback changes
//! - ItemFilter trait and implementations for slicing the catalog before a
//!   popularity ranking
//!
//! ## Example Usage
//! ```ignore
//! use engine::{EngineConfig, RecommendationEngine, HYBRID};
//! use engine::filters::*;
//!
//! let engine = RecommendationEngine::standard(&dataset, EngineConfig::default())?;
//! let picks = engine.recommend(HYBRID, 42, Some(10), false)?;
//!
//! let slice = ItemFilterPipeline::new().add_filter(GenreQueryFilter::parse("Mecha"));
//! let popular = engine.most_popular(&slice, Some(10), true);
//! ```

pub mod engine;
pub mod filter_pipeline;
pub mod filters;
pub mod hybrid;
pub mod traits;

// Re-export main types
pub use engine::{
    COLLABORATIVE, CONTENT, EngineConfig, HYBRID, POPULARITY, RecommendationEngine,
};
pub use filter_pipeline::ItemFilterPipeline;
pub use hybrid::{HybridRecommender, JointScore, rescale};
pub use traits::ItemFilter;
