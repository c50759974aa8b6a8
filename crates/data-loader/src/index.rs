//! Dataset assembly from the parsed CSV tables.
//!
//! Loading goes through three stages:
//! - Parse anime.csv and rating.csv in parallel
//! - Build the catalog, dropping excluded genres
//! - Clean the feedback: cap user ids, drop unrated records and
//!   records pointing at anime outside the catalog

use crate::error::{DataLoadError, Result};
use crate::parser;
use crate::types::*;
use std::path::Path;
use tracing::{debug, info, instrument};

/// File name of the catalog table inside a data directory
pub const ANIME_FILE: &str = "anime.csv";

/// File name of the feedback table inside a data directory
pub const RATINGS_FILE: &str = "rating.csv";

/// Knobs applied while turning raw rows into a [`Dataset`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// Anime carrying any of these genres are left out of the catalog
    pub excluded_genres: Vec<String>,
    /// Keep only feedback from users with `user_id <= max_user_id`
    pub max_user_id: Option<UserId>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_excluded_genre(mut self, genre: impl Into<String>) -> Self {
        self.excluded_genres.push(genre.into());
        self
    }

    pub fn with_max_user_id(mut self, max_user_id: UserId) -> Self {
        self.max_user_id = Some(max_user_id);
        self
    }

    fn is_excluded(&self, anime: &Anime) -> bool {
        self.excluded_genres.iter().any(|g| anime.has_genre(g))
    }

    fn keeps_user(&self, user_id: UserId) -> bool {
        self.max_user_id.is_none_or(|max| user_id <= max)
    }
}

impl Dataset {
    /// Load the anime dataset from a directory with default options
    pub fn load_from_files(data_dir: &Path) -> Result<Self> {
        Self::load_with(data_dir, &LoadOptions::default())
    }

    /// Load the anime dataset from a directory
    ///
    /// Both files are parsed in parallel, then assembled with
    /// [`Dataset::from_rows`].
    #[instrument(skip(options), fields(dir = %data_dir.display()))]
    pub fn load_with(data_dir: &Path, options: &LoadOptions) -> Result<Self> {
        info!("Loading anime dataset");

        let anime_path = data_dir.join(ANIME_FILE);
        let ratings_path = data_dir.join(RATINGS_FILE);

        let (anime, ratings) = rayon::join(
            || parser::parse_anime(&anime_path),
            || parser::parse_ratings(&ratings_path),
        );

        let dataset = Self::from_rows(anime?, ratings?, options)?;

        let (users, anime, records) = dataset.counts();
        info!(users, anime, records, "Dataset loaded and validated");
        Ok(dataset)
    }

    /// Assemble a validated dataset from already parsed rows
    pub fn from_rows(
        anime: Vec<Anime>,
        ratings: Vec<Feedback>,
        options: &LoadOptions,
    ) -> Result<Self> {
        let mut catalog = Catalog::new();
        let mut excluded = 0usize;
        for item in anime {
            if options.is_excluded(&item) {
                excluded += 1;
            } else {
                catalog.insert_anime(item);
            }
        }
        if excluded > 0 {
            debug!(excluded, "Dropped anime with excluded genres");
        }

        let feedback = clean_feedback(&catalog, ratings, options);
        let dataset = Self::new(catalog, feedback);
        dataset.validate()?;
        Ok(dataset)
    }

    /// Validate data integrity
    ///
    /// Every feedback record must reference a catalog item and carry a
    /// rating in `-1..=10`.
    pub fn validate(&self) -> Result<()> {
        for feedback in self.feedback().records() {
            if !self.catalog().contains(feedback.anime_id) {
                return Err(DataLoadError::MissingReference {
                    entity: "Anime".to_string(),
                    id: feedback.anime_id,
                });
            }
            if !(UNRATED..=MAX_RATING).contains(&feedback.rating) {
                return Err(DataLoadError::InvalidValue {
                    field: "rating".to_string(),
                    value: feedback.rating.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Build a feedback table that only holds usable training signal
///
/// Drops records from users above the configured cap, unrated records,
/// and records for anime the catalog does not contain.
pub fn clean_feedback(
    catalog: &Catalog,
    ratings: Vec<Feedback>,
    options: &LoadOptions,
) -> FeedbackTable {
    let total = ratings.len();
    let (mut capped, mut unrated, mut orphaned) = (0usize, 0usize, 0usize);

    let kept = ratings.into_iter().filter(|f| {
        if !options.keeps_user(f.user_id) {
            capped += 1;
            false
        } else if !f.is_rated() {
            unrated += 1;
            false
        } else if !catalog.contains(f.anime_id) {
            orphaned += 1;
            false
        } else {
            true
        }
    });
    let table = FeedbackTable::from_records(kept);

    debug!(
        total,
        kept = table.len(),
        capped,
        unrated,
        orphaned,
        "Cleaned feedback"
    );
    table
}
