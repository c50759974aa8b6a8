//! # Data Loader Crate
//!
//! This crate loads the anime catalog and user feedback tables and keeps
//! them in memory as a shared, read-only snapshot.
//!
//! ## Main Components
//!
//! - **types**: Core domain types (Anime, Feedback, Catalog, FeedbackTable, Dataset)
//! - **parser**: Parse the CSV files into Rust structs
//! - **index**: Assemble, clean and validate a Dataset
//! - **error**: Error types for data loading
//!
//! ## Example Usage
//!
//! ```ignore
//! use data_loader::{Dataset, LoadOptions};
//! use std::path::Path;
//!
//! let options = LoadOptions::new().with_excluded_genre("Hentai");
//! let dataset = Dataset::load_with(Path::new("data/anime"), &options)?;
//!
//! let anime = dataset.catalog().get_anime(32281).unwrap();
//! let feedback = dataset.feedback().get_user_feedback(1);
//!
//! println!("{} has {} genres; user 1 left {} ratings", anime.name, anime.genres.len(), feedback.len());
//! ```

pub mod error;
pub mod index;
pub mod parser;
pub mod types;

pub use error::{DataLoadError, Result};
pub use index::{LoadOptions, clean_feedback};
pub use types::{
    Anime, AnimeId, AnimeStats, Catalog, Dataset, Feedback, FeedbackTable, MAX_RATING,
    MIN_RATING, UNRATED, UserId,
};
