//! Filter implementations for catalog slices.
//!
//! This module contains the concrete filters that can be composed into an
//! ItemFilterPipeline.

pub mod genre_query;
pub mod media_type;
pub mod predicate;

// Re-export for convenience
pub use genre_query::GenreQueryFilter;
pub use media_type::MediaTypeFilter;
pub use predicate::PredicateFilter;
