//! Core traits for catalog filtering.
//!
//! This module defines the ItemFilter trait used to cut the catalog down to
//! a slice (a genre, a media type, ...) before ranking it.

use data_loader::Anime;

/// Core trait for filtering catalog items.
///
/// All filters must implement this trait to be used in the ItemFilterPipeline.
///
/// ## Design Note
/// - `Send + Sync` allows filters to be shared across request threads
/// - Filters take ownership of the Vec and return the kept items, borrowed
///   from the same catalog
pub trait ItemFilter: Send + Sync {
    /// Returns the name of this filter (for logging/debugging)
    fn name(&self) -> &str;

    /// Keep the items this filter accepts, preserving their order
    fn apply<'a>(&self, items: Vec<&'a Anime>) -> Vec<&'a Anime>;
}
