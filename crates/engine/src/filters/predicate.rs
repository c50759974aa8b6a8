//! Filter backed by an arbitrary closure.

use crate::traits::ItemFilter;
use data_loader::Anime;

/// Keeps anime for which the predicate returns true.
///
/// ```ignore
/// let long_running = PredicateFilter::new("long_running", |a: &Anime| a.episodes >= 100);
/// ```
pub struct PredicateFilter<F> {
    name: String,
    predicate: F,
}

impl<F> PredicateFilter<F>
where
    F: Fn(&Anime) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> ItemFilter for PredicateFilter<F>
where
    F: Fn(&Anime) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply<'a>(&self, items: Vec<&'a Anime>) -> Vec<&'a Anime> {
        items.into_iter().filter(|&anime| (self.predicate)(anime)).collect()
    }
}
