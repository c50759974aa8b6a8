//! The ItemFilterPipeline chains catalog filters.

use crate::traits::ItemFilter;
use data_loader::{Anime, Catalog};
use tracing::debug;

/// Chains multiple filters together into a processing pipeline.
///
/// ## Usage
/// ```ignore
/// let pipeline = ItemFilterPipeline::new()
///     .add_filter(GenreQueryFilter::parse("Action, Adventure"))
///     .add_filter(MediaTypeFilter::new("TV"));
///
/// let slice = pipeline.apply_catalog(&catalog);
/// ```
pub struct ItemFilterPipeline {
    filters: Vec<Box<dyn ItemFilter>>,
}

impl ItemFilterPipeline {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Add a filter to the pipeline (builder pattern).
    pub fn add_filter(mut self, filter: impl ItemFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply all filters in sequence
    pub fn apply<'a>(&self, items: Vec<&'a Anime>) -> Vec<&'a Anime> {
        let mut current = items;
        for filter in &self.filters {
            let before = current.len();
            current = filter.apply(current);
            debug!(
                filter = filter.name(),
                before,
                after = current.len(),
                "Applied item filter"
            );
        }
        current
    }

    /// Apply all filters to the whole catalog, in catalog order
    pub fn apply_catalog<'a>(&self, catalog: &'a Catalog) -> Vec<&'a Anime> {
        self.apply(catalog.iter().collect())
    }
}

impl Default for ItemFilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}
