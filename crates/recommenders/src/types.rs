//! Request and result types shared by every recommender.

use data_loader::{Anime, AnimeId, Catalog, FeedbackTable, UserId};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Number of results returned when the caller doesn't ask for a count
pub const DEFAULT_COUNT: usize = 10;

/// A request for a ranked list of anime
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    /// Maximum number of results; `None` returns every scored item
    pub count: Option<usize>,
    /// Attach full catalog records to the results
    pub verbose: bool,
    /// Ids that must never appear in the results
    pub items_to_ignore: HashSet<AnimeId>,
}

impl RecommendationRequest {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            count: Some(DEFAULT_COUNT),
            verbose: false,
            items_to_ignore: HashSet::new(),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Return every scored item
    pub fn unbounded(mut self) -> Self {
        self.count = None;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn ignoring(mut self, items: impl IntoIterator<Item = AnimeId>) -> Self {
        self.items_to_ignore.extend(items);
        self
    }
}

/// One ranked result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub anime_id: AnimeId,
    pub score: f32,
    /// Full catalog record, only set for verbose requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anime: Option<Anime>,
}

/// The catalog/feedback pair a recommender currently derives its state from
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub catalog: Arc<Catalog>,
    pub feedback: Arc<FeedbackTable>,
}

impl Snapshot {
    pub fn new(catalog: Arc<Catalog>, feedback: Arc<FeedbackTable>) -> Self {
        Self { catalog, feedback }
    }

    /// Whether both snapshots describe identical data
    ///
    /// Shared `Arc`s short-circuit; otherwise the tables are compared
    /// structurally.
    pub fn same_data(&self, other: &Snapshot) -> bool {
        let same_catalog =
            Arc::ptr_eq(&self.catalog, &other.catalog) || *self.catalog == *other.catalog;
        let same_feedback =
            Arc::ptr_eq(&self.feedback, &other.feedback) || *self.feedback == *other.feedback;
        same_catalog && same_feedback
    }
}
