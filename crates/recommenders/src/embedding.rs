//! Genre embeddings for items and users.
//!
//! An item embedding counts the genre tokens on the item. A user embedding
//! sums the user's ratings per genre over everything they rated, divided by
//! half the genre's catalog frequency so that ubiquitous genres weigh less.

use crate::error::{RecommendError, Result};
use data_loader::{Anime, Catalog, FeedbackTable, UserId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Weight applied to the genre frequency when normalizing user embeddings
const USER_FREQUENCY_FACTOR: f32 = 0.5;

/// Weight applied to the genre frequency when scoring an item
const ITEM_FREQUENCY_FACTOR: f32 = 0.1;

/// Sparse genre → weight vector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenreEmbedding(HashMap<String, f32>);

impl GenreEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, genre: &str) -> Option<f32> {
        self.0.get(genre).copied()
    }

    pub fn insert(&mut self, genre: impl Into<String>, weight: f32) {
        self.0.insert(genre.into(), weight);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> + '_ {
        self.0.iter().map(|(g, &w)| (g.as_str(), w))
    }

    /// Number of genres with a weight
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Genres sorted by descending weight
    pub fn top_genres(&self, count: usize) -> Vec<(String, f32)> {
        let mut genres: Vec<(String, f32)> = self.0.iter().map(|(g, &w)| (g.clone(), w)).collect();
        genres.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        genres.truncate(count);
        genres
    }
}

impl FromIterator<(String, f32)> for GenreEmbedding {
    fn from_iter<I: IntoIterator<Item = (String, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// How many catalog items carry each genre
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenreFrequencies(HashMap<String, u32>);

impl GenreFrequencies {
    /// Count, per genre, the items that carry it (an item counts once)
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for anime in catalog.iter() {
            let mut seen: Vec<&str> = Vec::with_capacity(anime.genres.len());
            for genre in &anime.genres {
                if !seen.contains(&genre.as_str()) {
                    seen.push(genre);
                    *counts.entry(genre.clone()).or_insert(0) += 1;
                }
            }
        }
        Self(counts)
    }

    pub fn get(&self, genre: &str) -> Option<u32> {
        self.0.get(genre).copied().filter(|&n| n > 0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, u32)> for GenreFrequencies {
    fn from_iter<I: IntoIterator<Item = (String, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Term counts of an item's genre tokens
pub fn item_embedding(anime: &Anime) -> GenreEmbedding {
    let mut embedding = GenreEmbedding::new();
    for genre in &anime.genres {
        *embedding.0.entry(genre.clone()).or_insert(0.0) += 1.0;
    }
    embedding
}

/// Rating-weighted genre affinity for one user.
///
/// Genres missing from `frequencies` are dropped. Feedback for an anime the
/// catalog doesn't know is an error.
pub fn user_embedding(
    user_id: UserId,
    feedback: &FeedbackTable,
    catalog: &Catalog,
    frequencies: &GenreFrequencies,
) -> Result<GenreEmbedding> {
    let mut totals: HashMap<&str, f32> = HashMap::new();
    for f in feedback.get_user_feedback(user_id).iter().filter(|f| f.is_rated()) {
        let anime = catalog
            .get_anime(f.anime_id)
            .ok_or(RecommendError::UnknownItem {
                anime_id: f.anime_id,
            })?;
        for genre in &anime.genres {
            *totals.entry(genre.as_str()).or_insert(0.0) += f.rating as f32;
        }
    }

    Ok(totals
        .into_iter()
        .filter_map(|(genre, total)| {
            let freq = frequencies.get(genre)?;
            Some((
                genre.to_string(),
                total / (USER_FREQUENCY_FACTOR * freq as f32),
            ))
        })
        .collect())
}

/// Similarity between a user and an item embedding.
///
/// Sums `user[g] * item[g] / (0.1 * freq[g])` over genres present in both
/// embeddings and the frequency table, then divides by
/// `|user| / |item|` so broad items don't win on genre count alone.
/// Either embedding being empty scores zero.
pub fn similarity_score(
    user: &GenreEmbedding,
    item: &GenreEmbedding,
    frequencies: &GenreFrequencies,
) -> f32 {
    if user.is_empty() || item.is_empty() {
        return 0.0;
    }

    let raw: f32 = item
        .iter()
        .filter_map(|(genre, item_weight)| {
            let user_weight = user.get(genre)?;
            let freq = frequencies.get(genre)?;
            Some(user_weight * (item_weight / (ITEM_FREQUENCY_FACTOR * freq as f32)))
        })
        .sum();

    raw / (user.len() as f32 / item.len() as f32)
}

/// Cache of user embeddings tied to one feedback snapshot
#[derive(Debug)]
pub struct UserEmbeddingCache {
    inner: RwLock<CacheState>,
}

#[derive(Debug)]
struct CacheState {
    feedback: Arc<FeedbackTable>,
    entries: HashMap<UserId, Arc<GenreEmbedding>>,
}

impl UserEmbeddingCache {
    pub fn new(feedback: Arc<FeedbackTable>) -> Self {
        Self {
            inner: RwLock::new(CacheState {
                feedback,
                entries: HashMap::new(),
            }),
        }
    }

    /// Return the cached embedding, computing and storing it on a miss.
    ///
    /// The result is only stored if `feedback` is still the snapshot the
    /// cache belongs to, so a computation that raced a refresh can't
    /// repopulate the cache with stale data.
    pub fn get_or_compute(
        &self,
        user_id: UserId,
        feedback: &Arc<FeedbackTable>,
        compute: impl FnOnce() -> Result<GenreEmbedding>,
    ) -> Result<Arc<GenreEmbedding>> {
        {
            let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            if Arc::ptr_eq(&state.feedback, feedback) {
                if let Some(hit) = state.entries.get(&user_id) {
                    return Ok(Arc::clone(hit));
                }
            }
        }

        let embedding = Arc::new(compute()?);

        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if Arc::ptr_eq(&state.feedback, feedback) {
            state.entries.insert(user_id, Arc::clone(&embedding));
        }
        Ok(embedding)
    }

    /// The feedback snapshot current entries were computed from
    pub fn feedback(&self) -> Arc<FeedbackTable> {
        Arc::clone(
            &self
                .inner
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .feedback,
        )
    }

    /// Drop every entry and bind the cache to a new feedback snapshot
    pub fn invalidate(&self, feedback: Arc<FeedbackTable>) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.feedback = feedback;
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
