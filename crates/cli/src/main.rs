use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use data_loader::index::RATINGS_FILE;
use data_loader::{Anime, AnimeId, Catalog, Dataset, LoadOptions, UserId};
use engine::filters::{GenreQueryFilter, MediaTypeFilter};
use engine::{EngineConfig, ItemFilterPipeline, RecommendationEngine};
use rand::Rng;
use recommenders::embedding::user_embedding;
use recommenders::{
    FactorizerConfig, GenreFrequencies, PopularityRecommender, Recommendation, RecommendError,
};
use server::{CsvFeedbackSource, RecommendationService, Strategy, UserRecommendations};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Anime recommendation engine
#[derive(Parser)]
#[command(name = "anime-recs")]
#[command(about = "Anime recommendations from matrix factorization, genre embeddings and popularity", long_about = None)]
struct Cli {
    /// Directory holding anime.csv and rating.csv
    #[arg(short, long, global = true, default_value = "data/anime")]
    data_dir: PathBuf,

    /// Number of latent factors
    #[arg(long, global = true)]
    rank: Option<usize>,

    /// Maximum SGD epochs
    #[arg(long, global = true)]
    epochs: Option<usize>,

    #[arg(long, global = true)]
    learning_rate: Option<f32>,

    #[arg(long, global = true)]
    regularization: Option<f32>,

    /// Stop training once the observed MSE falls below this
    #[arg(long, global = true)]
    threshold: Option<f32>,

    /// Seed for factor initialization
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Wall-clock limit for one training run
    #[arg(long, global = true)]
    time_budget_secs: Option<u64>,

    /// Only train on users with an id up to this value
    #[arg(long, global = true)]
    max_user_id: Option<UserId>,

    /// Leave anime with this genre out of the catalog (repeatable)
    #[arg(long, global = true, default_value = "Hentai")]
    exclude_genre: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get anime recommendations for a user
    Recommend {
        #[arg(long)]
        user_id: UserId,

        /// content, collaborative, hybrid or popularity
        #[arg(long, default_value = "hybrid")]
        strategy: Strategy,

        #[arg(long, default_value = "10")]
        limit: usize,

        /// Show anime details and, for hybrid, each recommender's score
        #[arg(long)]
        verbose: bool,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Most popular anime, optionally within genres or a media type
    Popular {
        /// Comma-separated genres, any of which may match ("Action,Adventure")
        #[arg(long)]
        genres: Option<String>,

        /// Media type such as TV, Movie or OVA
        #[arg(long)]
        media_type: Option<String>,

        #[arg(long, default_value = "10")]
        limit: usize,

        #[arg(long)]
        verbose: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show a user's rating history and genre affinities
    User {
        #[arg(long)]
        user_id: UserId,
    },

    /// Search anime by title
    Search {
        /// Title to search for (case-insensitive)
        #[arg(long)]
        title: String,
    },

    /// Time recommendation requests for random users
    Benchmark {
        /// Number of requests to make
        #[arg(long, default_value = "100")]
        requests: usize,

        #[arg(long, default_value = "hybrid")]
        strategy: Strategy,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        let mut options = LoadOptions::new();
        for genre in self.exclude_genre.iter().filter(|g| !g.is_empty()) {
            options = options.with_excluded_genre(genre.clone());
        }
        if let Some(max) = self.max_user_id {
            options = options.with_max_user_id(max);
        }
        options
    }

    fn engine_config(&self) -> EngineConfig {
        let mut factorizer = FactorizerConfig::default();
        if let Some(rank) = self.rank {
            factorizer = factorizer.with_rank(rank);
        }
        if let Some(epochs) = self.epochs {
            factorizer = factorizer.with_max_epochs(epochs);
        }
        if let Some(lr) = self.learning_rate {
            factorizer = factorizer.with_learning_rate(lr);
        }
        if let Some(reg) = self.regularization {
            factorizer = factorizer.with_regularization(reg);
        }
        if let Some(threshold) = self.threshold {
            factorizer = factorizer.with_convergence_threshold(threshold);
        }
        if let Some(seed) = self.seed {
            factorizer = factorizer.with_seed(seed);
        }
        if let Some(secs) = self.time_budget_secs {
            factorizer = factorizer.with_time_budget(Duration::from_secs(secs));
        }
        EngineConfig::default().with_factorizer(factorizer)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let options = cli.load_options();

    // Load the dataset (this may take a moment)
    println!("Loading anime dataset from {}...", cli.data_dir.display());
    let start = Instant::now();
    let dataset = Dataset::load_with(&cli.data_dir, &options)
        .context("Failed to load anime dataset")?;
    let (users, anime, records) = dataset.counts();
    println!(
        "{} Loaded {} anime, {} users, {} ratings in {:?}",
        "✓".green(),
        anime,
        users,
        records,
        start.elapsed()
    );

    match &cli.command {
        Commands::Recommend {
            user_id,
            strategy,
            limit,
            verbose,
            json,
        } => {
            let service = build_service(&cli, &dataset, options.clone()).await?;
            handle_recommend(&service, *user_id, *strategy, *limit, *verbose, *json).await?
        }
        Commands::Popular {
            genres,
            media_type,
            limit,
            verbose,
            json,
        } => handle_popular(
            &dataset,
            genres.as_deref(),
            media_type.as_deref(),
            *limit,
            *verbose,
            *json,
        )?,
        Commands::User { user_id } => handle_user(&dataset, *user_id)?,
        Commands::Search { title } => handle_search(&dataset, title),
        Commands::Benchmark { requests, strategy } => {
            let service = build_service(&cli, &dataset, options.clone()).await?;
            handle_benchmark(&service, *requests, *strategy).await?
        }
    }

    Ok(())
}

/// Train every recommender and wrap the engine in a service watching rating.csv
async fn build_service(cli: &Cli, dataset: &Dataset, options: LoadOptions) -> Result<RecommendationService> {
    println!("Training recommenders...");
    let start = Instant::now();
    let config = cli.engine_config();
    let engine = {
        let dataset = dataset.clone();
        tokio::task::spawn_blocking(move || RecommendationEngine::standard(&dataset, config))
            .await
            .context("Training task panicked")?
            .context("Failed to build recommendation engine")?
    };
    println!("{} Trained recommenders in {:?}", "✓".green(), start.elapsed());

    let source = CsvFeedbackSource::new(
        cli.data_dir.join(RATINGS_FILE),
        Arc::clone(dataset.catalog()),
        options,
    )
    .mark_loaded()?;
    Ok(RecommendationService::new(Arc::new(engine), Arc::new(source)))
}

/// Print a clear message when the user has no history to personalize from.
///
/// Returns the error back if it is anything else.
fn report_insufficient_data(err: anyhow::Error) -> Result<()> {
    match err.downcast_ref::<RecommendError>() {
        Some(RecommendError::InsufficientData { user_id }) => {
            println!(
                "{} User {} has no ratings yet, so there is nothing to personalize from.",
                "!".yellow().bold(),
                user_id
            );
            println!("  Try `--strategy popularity` or the `popular` command.");
            Ok(())
        }
        _ => Err(err),
    }
}

/// Handle the 'recommend' command
async fn handle_recommend(
    service: &RecommendationService,
    user_id: UserId,
    strategy: Strategy,
    limit: usize,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let response = match service.recommend(strategy, user_id, Some(limit), verbose).await {
        Ok(response) => response,
        Err(err) => return report_insufficient_data(err),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let catalog = service.engine().catalog();
    print_user_recommendations(catalog, &response, verbose);

    if verbose && strategy == Strategy::Hybrid {
        let scores = service.explain(user_id, Some(limit)).await?;
        println!("{}", "Score breakdown:".bold().blue());
        for score in scores {
            let parts = score
                .components
                .iter()
                .map(|(name, value)| format!("{} {:.2}", name, value))
                .collect::<Vec<_>>()
                .join(", ");
            println!(
                "  {}: {:.2} = {}",
                anime_label(catalog, score.anime_id),
                score.joint,
                parts
            );
        }
    }
    Ok(())
}

/// Handle the 'popular' command
fn handle_popular(
    dataset: &Dataset,
    genres: Option<&str>,
    media_type: Option<&str>,
    limit: usize,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let mut filters = ItemFilterPipeline::new();
    if let Some(query) = genres {
        filters = filters.add_filter(GenreQueryFilter::parse(query));
    }
    if let Some(kind) = media_type {
        filters = filters.add_filter(MediaTypeFilter::new(kind));
    }

    let items = filters.apply_catalog(dataset.catalog());
    let popular = PopularityRecommender::rank_items(&items, Some(limit), verbose);

    if json {
        println!("{}", serde_json::to_string_pretty(&popular)?);
        return Ok(());
    }

    if popular.is_empty() {
        println!("{}", "No anime matched the requested slice.".yellow());
        return Ok(());
    }
    println!("{}", "Most popular anime:".bold().blue());
    print_recommendations(dataset.catalog(), &popular, verbose);
    Ok(())
}

/// Handle the 'user' command
fn handle_user(dataset: &Dataset, user_id: UserId) -> Result<()> {
    let catalog = dataset.catalog();
    let feedback = dataset.feedback();
    let ratings = feedback.get_user_feedback(user_id);
    if ratings.is_empty() {
        bail!("User {} has no ratings", user_id);
    }

    println!("{}", format!("User ID: {}", user_id).bold().blue());

    let total: f32 = ratings.iter().map(|r| r.rating as f32).sum();
    println!("{}Number of ratings: {}", "• ".cyan(), ratings.len());
    println!("{}Average rating: {:.2}", "• ".cyan(), total / ratings.len() as f32);

    let mut top_rated: Vec<_> = ratings.iter().collect();
    top_rated.sort_by(|a, b| b.rating.cmp(&a.rating));
    println!("Top rated anime:");
    for rating in top_rated.iter().take(5) {
        if let Some(anime) = catalog.get_anime(rating.anime_id) {
            println!("  - {} (Rating: {})", anime.name, rating.rating);
        }
    }

    let frequencies = GenreFrequencies::from_catalog(catalog);
    let embedding = user_embedding(user_id, feedback, catalog, &frequencies)?;
    println!("Strongest genre affinities:");
    for (genre, weight) in embedding.top_genres(5) {
        println!("  - {}: {:.3}", genre, weight);
    }
    Ok(())
}

/// Handle the 'search' command
fn handle_search(dataset: &Dataset, title: &str) {
    let needle = title.to_lowercase();
    let stats = dataset.feedback().compute_stats();

    // (exact match?, anime)
    let mut matches: Vec<(bool, &Anime)> = dataset
        .catalog()
        .iter()
        .filter_map(|anime| {
            let name = anime.name.to_lowercase();
            if name == needle {
                Some((true, anime))
            } else if name.contains(&needle) {
                Some((false, anime))
            } else {
                None
            }
        })
        .collect();
    matches.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.rating.partial_cmp(&a.1.rating).unwrap_or(std::cmp::Ordering::Equal))
    });

    println!("{}", format!("Search results for '{}':", title).bold().blue());
    if matches.is_empty() {
        println!("  {}", "No matches".yellow());
        return;
    }
    for (_, anime) in matches.iter().take(20) {
        let (avg, count) = stats
            .get(&anime.id)
            .map(|s| (s.avg_rating, s.rating_count))
            .unwrap_or((0.0, 0));
        println!(
            "{}: {} [{}] {} rated {:.2}, user avg {:.2} ({} ratings)",
            anime.id,
            anime.name,
            anime.genres.join(", "),
            anime.kind,
            anime.rating,
            avg,
            count
        );
    }
}

/// Handle the 'benchmark' command
async fn handle_benchmark(
    service: &RecommendationService,
    requests: usize,
    strategy: Strategy,
) -> Result<()> {
    let users = service.engine().feedback().user_ids();
    if users.is_empty() || requests == 0 {
        bail!("Nothing to benchmark: no users with feedback or no requests");
    }

    let mut rng = rand::rng();
    let user_ids: Vec<UserId> = (0..requests)
        .map(|_| users[rng.random_range(0..users.len())])
        .collect();

    info!(requests, %strategy, "Starting benchmark");
    let wall = Instant::now();
    let mut handles = Vec::with_capacity(requests);
    for user_id in user_ids {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let start = Instant::now();
            service.recommend(strategy, user_id, Some(10), false).await?;
            Ok::<_, anyhow::Error>(start.elapsed())
        }));
    }

    let mut timings = Vec::with_capacity(requests);
    for handle in handles {
        match handle.await? {
            Ok(elapsed) => timings.push(elapsed),
            Err(err) => warn!("Request failed: {:#}", err),
        }
    }
    let wall = wall.elapsed();
    if timings.is_empty() {
        bail!("Every benchmark request failed");
    }

    timings.sort();
    let total: Duration = timings.iter().sum();
    let percentile = |p: f64| timings[((timings.len() - 1) as f64 * p).round() as usize];

    println!("{}", "Benchmark results:".bold().blue());
    println!("Requests: {} ok of {}", timings.len(), requests);
    println!("Wall time: {:?}", wall);
    println!("Average latency: {:?}", total / timings.len() as u32);
    println!("P50 latency: {:?}", percentile(0.50));
    println!("P95 latency: {:?}", percentile(0.95));
    println!("P99 latency: {:?}", percentile(0.99));
    println!(
        "Throughput: {:.2} requests/second",
        timings.len() as f64 / wall.as_secs_f64()
    );
    Ok(())
}

fn print_user_recommendations(catalog: &Catalog, response: &UserRecommendations, verbose: bool) {
    println!(
        "{}",
        format!(
            "{} recommendations for user {}:",
            response.strategy, response.user_id
        )
        .bold()
        .blue()
    );
    if response.recommendations.is_empty() {
        println!("  {}", "Nothing left to recommend".yellow());
        return;
    }
    print_recommendations(catalog, &response.recommendations, verbose);
}

fn print_recommendations(catalog: &Catalog, recommendations: &[Recommendation], verbose: bool) {
    for (i, rec) in recommendations.iter().enumerate() {
        let rank = (i + 1).to_string();
        println!(
            "{}. {} - Score: {:.3}",
            rank.green(),
            anime_label(catalog, rec.anime_id),
            rec.score
        );
        if let (true, Some(anime)) = (verbose, &rec.anime) {
            println!(
                "   {}, {} eps [{}], rated {:.2} by {} members",
                anime.kind,
                episodes_label(anime.episodes),
                anime.genres.join(", "),
                anime.rating,
                anime.members
            );
        }
    }
}

fn anime_label(catalog: &Catalog, id: AnimeId) -> String {
    catalog
        .get_anime(id)
        .map(|a| a.name.clone())
        .unwrap_or_else(|| format!("Anime {}", id))
}

/// Episode counts use -1 for "Unknown" and -2 for a missing value
fn episodes_label(episodes: i32) -> String {
    if episodes >= 0 {
        episodes.to_string()
    } else {
        "?".to_string()
    }
}
