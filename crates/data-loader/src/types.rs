//! Core domain types for the anime catalog and user feedback.
//!
//! This module defines the fundamental data structures used throughout the system:
//! - Type aliases for domain clarity (UserId, AnimeId)
//! - `Anime` and `Feedback` records with named, typed fields
//! - `Catalog` and `FeedbackTable`, the two halves of a `Dataset` snapshot

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// =============================================================================
// Type Aliases
// =============================================================================

/// Unique identifier for a user
pub type UserId = u32;

/// Unique identifier for an anime title
pub type AnimeId = u32;

// =============================================================================
// Rating constants
// =============================================================================

/// Stored value for "watched but not rated"
pub const UNRATED: i8 = -1;

/// Lowest rating that carries training signal.
///
/// `0` is accepted on ingestion but treated like [`UNRATED`]: once the
/// feedback is pivoted into a zero-filled matrix it cannot be told apart
/// from an unobserved cell.
pub const MIN_RATING: i8 = 1;

/// Highest rating a user can give
pub const MAX_RATING: i8 = 10;

// =============================================================================
// Catalog items
// =============================================================================

/// A single anime title from the catalog.
///
/// Immutable once loaded into a [`Catalog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anime {
    pub id: AnimeId,
    pub name: String,
    /// Genre tokens in source order. Usually distinct, but repeats are kept.
    pub genres: Vec<String>,
    /// Media type ("TV", "Movie", "OVA", ...). `type` in the source data.
    #[serde(rename = "type")]
    pub kind: String,
    /// Episode count; `-1` when unknown, `-2` when missing from the source
    pub episodes: i32,
    /// Aggregate community rating (0.0 - 10.0)
    pub rating: f32,
    /// Number of community members tracking this title
    pub members: u32,
}

impl Anime {
    /// True if any genre token equals `genre` (case-sensitive)
    pub fn has_genre(&self, genre: &str) -> bool {
        self.genres.iter().any(|g| g == genre)
    }
}

// =============================================================================
// Feedback
// =============================================================================

/// One user's rating of one anime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub user_id: UserId,
    pub anime_id: AnimeId,
    /// `-1..=10`; see [`UNRATED`] and [`MIN_RATING`]
    pub rating: i8,
}

impl Feedback {
    /// Whether this record carries an actual rating (1 - 10)
    pub fn is_rated(&self) -> bool {
        self.rating >= MIN_RATING
    }
}

/// Aggregate statistics over the feedback an anime has received
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimeStats {
    pub avg_rating: f32,
    pub rating_count: u32,
}

// =============================================================================
// Catalog
// =============================================================================

/// All anime titles known to the system, in catalog order.
///
/// Lookups by id are O(1); iteration follows the order items were inserted,
/// which downstream scorers rely on to break score ties deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub(crate) items: HashMap<AnimeId, Anime>,
    pub(crate) order: Vec<AnimeId>,
    /// Anime grouped by genre (one anime can appear in multiple genre lists)
    pub(crate) genre_index: HashMap<String, Vec<AnimeId>>,
}

impl Catalog {
    /// Creates a new, empty Catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an anime, replacing any previous record with the same id
    pub fn insert_anime(&mut self, anime: Anime) {
        if let Some(previous) = self.items.remove(&anime.id) {
            for genre in &previous.genres {
                if let Some(ids) = self.genre_index.get_mut(genre) {
                    ids.retain(|&id| id != previous.id);
                }
            }
        } else {
            self.order.push(anime.id);
        }

        for genre in &anime.genres {
            let ids = self.genre_index.entry(genre.clone()).or_default();
            if !ids.contains(&anime.id) {
                ids.push(anime.id);
            }
        }
        self.items.insert(anime.id, anime);
    }

    /// Get an anime by ID
    pub fn get_anime(&self, id: AnimeId) -> Option<&Anime> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: AnimeId) -> bool {
        self.items.contains_key(&id)
    }

    /// Iterate over every anime in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &Anime> + '_ {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// All anime ids in catalog order
    pub fn ids(&self) -> &[AnimeId] {
        &self.order
    }

    /// Get all anime tagged with a specific genre
    pub fn get_anime_by_genre(&self, genre: &str) -> &[AnimeId] {
        self.genre_index
            .get(genre)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Distinct genres present in the catalog (unordered)
    pub fn genres(&self) -> impl Iterator<Item = &str> + '_ {
        self.genre_index
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(genre, _)| genre.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// =============================================================================
// FeedbackTable
// =============================================================================

/// The user feedback snapshot.
///
/// Two tables are equal when they hold the same records in the same order;
/// the per-user and per-anime indices are derived and not compared.
#[derive(Debug, Clone, Default)]
pub struct FeedbackTable {
    pub(crate) records: Vec<Feedback>,
    /// All feedback left by each user
    pub(crate) user_feedback: HashMap<UserId, Vec<Feedback>>,
    /// All feedback received by each anime
    pub(crate) anime_feedback: HashMap<AnimeId, Vec<Feedback>>,
}

impl FeedbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from records, preserving their order
    pub fn from_records(records: impl IntoIterator<Item = Feedback>) -> Self {
        let mut table = Self::new();
        for feedback in records {
            table.insert(feedback);
        }
        table
    }

    /// Append a feedback record and update indices
    pub fn insert(&mut self, feedback: Feedback) {
        self.records.push(feedback);
        self.user_feedback
            .entry(feedback.user_id)
            .or_default()
            .push(feedback);
        self.anime_feedback
            .entry(feedback.anime_id)
            .or_default()
            .push(feedback);
    }

    /// A copy of this table keeping only records that match `keep`
    pub fn filtered(&self, keep: impl Fn(&Feedback) -> bool) -> Self {
        Self::from_records(self.records.iter().copied().filter(|f| keep(f)))
    }

    /// Every record, in insertion order
    pub fn records(&self) -> &[Feedback] {
        &self.records
    }

    /// Get all feedback left by a user.
    ///
    /// Returns an empty slice if the user is unknown.
    pub fn get_user_feedback(&self, user_id: UserId) -> &[Feedback] {
        self.user_feedback
            .get(&user_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get all feedback received by an anime
    pub fn get_anime_feedback(&self, anime_id: AnimeId) -> &[Feedback] {
        self.anime_feedback
            .get(&anime_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the user has rated at least one anime
    pub fn has_feedback(&self, user_id: UserId) -> bool {
        self.get_user_feedback(user_id).iter().any(Feedback::is_rated)
    }

    /// Ids of every anime the user has rated
    pub fn rated_items(&self, user_id: UserId) -> HashSet<AnimeId> {
        self.get_user_feedback(user_id)
            .iter()
            .filter(|f| f.is_rated())
            .map(|f| f.anime_id)
            .collect()
    }

    /// Distinct user ids, ascending
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.user_feedback.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Compute average rating and rating count for every rated anime.
    ///
    /// Unrated records are ignored; anime without any rating are absent.
    pub fn compute_stats(&self) -> HashMap<AnimeId, AnimeStats> {
        self.anime_feedback
            .par_iter()
            .filter_map(|(&anime_id, feedback)| {
                let (total, count) = feedback
                    .iter()
                    .filter(|f| f.is_rated())
                    .fold((0.0f32, 0u32), |(sum, n), f| (sum + f.rating as f32, n + 1));
                (count > 0).then(|| {
                    (
                        anime_id,
                        AnimeStats {
                            avg_rating: total / count as f32,
                            rating_count: count,
                        },
                    )
                })
            })
            .collect()
    }
}

impl PartialEq for FeedbackTable {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

// =============================================================================
// Dataset - the catalog/feedback snapshot
// =============================================================================

/// A catalog plus the feedback collected against it.
///
/// Both halves are reference counted: recommenders hold clones of the `Arc`s,
/// and a feedback refresh produces a new `Dataset` sharing the same catalog
/// instead of mutating the one in use.
#[derive(Debug, Clone)]
pub struct Dataset {
    catalog: Arc<Catalog>,
    feedback: Arc<FeedbackTable>,
}

impl Dataset {
    pub fn new(catalog: Catalog, feedback: FeedbackTable) -> Self {
        Self {
            catalog: Arc::new(catalog),
            feedback: Arc::new(feedback),
        }
    }

    pub fn from_shared(catalog: Arc<Catalog>, feedback: Arc<FeedbackTable>) -> Self {
        Self { catalog, feedback }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn feedback(&self) -> &Arc<FeedbackTable> {
        &self.feedback
    }

    /// A new snapshot with the same catalog and replacement feedback
    pub fn with_feedback(&self, feedback: FeedbackTable) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            feedback: Arc::new(feedback),
        }
    }

    /// Get counts for debugging/validation: (users, anime, feedback records)
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.feedback.user_feedback.len(),
            self.catalog.len(),
            self.feedback.len(),
        )
    }
}
