//! Simple test harness for the recommendation service.
//!
//! Loads the dataset, trains every recommender, and prints one user's
//! recommendations under each strategy.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use data_loader::index::RATINGS_FILE;
use data_loader::{Dataset, LoadOptions};
use engine::{EngineConfig, RecommendationEngine};
use server::{CsvFeedbackSource, RecommendationService, Strategy};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,server=debug,engine=debug")),
        )
        .init();

    info!("Starting anime recommendation test harness");

    let data_dir = Path::new("data/anime");
    let options = LoadOptions::new().with_excluded_genre("Hentai");
    let dataset = {
        let data_dir = data_dir.to_path_buf();
        let options = options.clone();
        tokio::task::spawn_blocking(move || Dataset::load_with(&data_dir, &options))
            .await
            .context("Loading task panicked")?
            .context("Failed to load dataset")?
    };
    let (users, anime, records) = dataset.counts();
    info!("Loaded {} anime, {} users, {} ratings", anime, users, records);

    let engine = {
        let dataset = dataset.clone();
        tokio::task::spawn_blocking(move || {
            RecommendationEngine::standard(&dataset, EngineConfig::default())
        })
        .await
        .context("Training task panicked")?
        .context("Failed to build recommendation engine")?
    };

    let source = CsvFeedbackSource::new(
        data_dir.join(RATINGS_FILE),
        Arc::clone(dataset.catalog()),
        options,
    )
    .mark_loaded()?;
    let service = RecommendationService::new(Arc::new(engine), Arc::new(source));

    let user_id = 1;
    let limit = Some(10);
    for strategy in Strategy::ALL {
        match service.recommend(strategy, user_id, limit, true).await {
            Ok(response) => {
                info!("{} recommendations for user {}:", strategy, user_id);
                for (i, rec) in response.recommendations.iter().enumerate() {
                    let title = rec.anime.as_ref().map(|a| a.name.as_str()).unwrap_or("?");
                    info!("{}. {} - Score: {:.3}", i + 1, title, rec.score);
                }
            }
            Err(err) => warn!("{} failed for user {}: {:#}", strategy, user_id, err),
        }
    }

    Ok(())
}
