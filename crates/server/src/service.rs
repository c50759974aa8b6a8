use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use data_loader::UserId;
use engine::filters::{GenreQueryFilter, MediaTypeFilter};
use engine::{
    COLLABORATIVE, CONTENT, HYBRID, ItemFilterPipeline, JointScore, POPULARITY,
    RecommendationEngine,
};
use recommenders::Recommendation;

use crate::source::FeedbackSource;

/// Which registered recommender answers a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Content,
    Collaborative,
    Hybrid,
    Popularity,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::Content,
        Strategy::Collaborative,
        Strategy::Hybrid,
        Strategy::Popularity,
    ];

    /// Name of the recommender in the engine registry
    pub fn recommender_name(self) -> &'static str {
        match self {
            Strategy::Content => CONTENT,
            Strategy::Collaborative => COLLABORATIVE,
            Strategy::Hybrid => HYBRID,
            Strategy::Popularity => POPULARITY,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.recommender_name())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.recommender_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown strategy '{}', expected one of: content, collaborative, hybrid, popularity",
                    s
                )
            })
    }
}

/// Recommendations for one user, ready to serialize
#[derive(Debug, Clone, Serialize)]
pub struct UserRecommendations {
    pub user_id: UserId,
    pub strategy: Strategy,
    pub recommendations: Vec<Recommendation>,
}

/// Coordinates feedback refresh and recommendation requests
#[derive(Clone)]
pub struct RecommendationService {
    engine: Arc<RecommendationEngine>,
    source: Arc<dyn FeedbackSource>,
}

impl RecommendationService {
    pub fn new(engine: Arc<RecommendationEngine>, source: Arc<dyn FeedbackSource>) -> Self {
        Self { engine, source }
    }

    pub fn engine(&self) -> &Arc<RecommendationEngine> {
        &self.engine
    }

    /// Pull from the feedback source and refresh the engine if the ratings
    /// changed.
    ///
    /// Returns whether the engine was refreshed. Parsing and retraining run
    /// on the blocking pool. The source is only told the table was applied
    /// after the refresh succeeds, so a failed refresh is retried next time.
    pub async fn try_update_ratings(&self) -> Result<bool> {
        let engine = Arc::clone(&self.engine);
        let source = Arc::clone(&self.source);

        tokio::task::spawn_blocking(move || -> Result<bool> {
            let Some(feedback) = source
                .fetch()
                .with_context(|| format!("Failed to fetch feedback from {}", source.name()))?
            else {
                return Ok(false);
            };
            let start = Instant::now();
            let refreshed = engine
                .refresh_if_changed(feedback)
                .context("Failed to refresh recommenders")?;
            source.mark_applied();
            if refreshed {
                info!("Ratings changed, recommenders refreshed in {:.2?}", start.elapsed());
            }
            Ok(refreshed)
        })
        .await
        .context("Refresh task panicked")?
    }

    /// Main entry point: recommendations for a user.
    ///
    /// A failed refresh is logged and the previous data is served.
    #[instrument(skip(self))]
    pub async fn recommend(
        &self,
        strategy: Strategy,
        user_id: UserId,
        limit: Option<usize>,
        verbose: bool,
    ) -> Result<UserRecommendations> {
        let start = Instant::now();

        if let Err(err) = self.try_update_ratings().await {
            warn!("Serving stale recommendations: {:#}", err);
        }

        let engine = Arc::clone(&self.engine);
        let recommendations = tokio::task::spawn_blocking(move || {
            engine.recommend(strategy.recommender_name(), user_id, limit, verbose)
        })
        .await
        .context("Recommendation task panicked")??;

        info!(
            "Selected {} {} recommendations for user {} in {:.2?}",
            recommendations.len(),
            strategy,
            user_id,
            start.elapsed()
        );

        Ok(UserRecommendations {
            user_id,
            strategy,
            recommendations,
        })
    }

    /// Hybrid recommendations with each constituent's score
    pub async fn explain(&self, user_id: UserId, limit: Option<usize>) -> Result<Vec<JointScore>> {
        if let Err(err) = self.try_update_ratings().await {
            warn!("Serving stale recommendations: {:#}", err);
        }

        let engine = Arc::clone(&self.engine);
        let scores = tokio::task::spawn_blocking(move || engine.explain_hybrid(user_id, limit))
            .await
            .context("Explain task panicked")??;
        Ok(scores)
    }

    /// Most popular anime, optionally narrowed by genre query and media type
    #[instrument(skip(self))]
    pub async fn popular(
        &self,
        genre_query: Option<&str>,
        media_type: Option<&str>,
        limit: Option<usize>,
        verbose: bool,
    ) -> Result<Vec<Recommendation>> {
        let mut filters = ItemFilterPipeline::new();
        if let Some(query) = genre_query {
            filters = filters.add_filter(GenreQueryFilter::parse(query));
        }
        if let Some(kind) = media_type {
            filters = filters.add_filter(MediaTypeFilter::new(kind));
        }

        let engine = Arc::clone(&self.engine);
        let popular = tokio::task::spawn_blocking(move || engine.most_popular(&filters, limit, verbose))
            .await
            .context("Popularity task panicked")?;
        Ok(popular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::CsvFeedbackSource;
    use data_loader::{Anime, Catalog, Dataset, Feedback, FeedbackTable, LoadOptions};
    use engine::EngineConfig;
    use recommenders::{FactorizerConfig, RecommendError};
    use std::sync::Mutex;

    /// Hands out queued tables, then reports "unchanged"
    struct QueuedSource {
        pending: Mutex<Vec<anyhow::Result<FeedbackTable>>>,
    }

    impl QueuedSource {
        fn empty() -> Self {
            Self {
                pending: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, next: anyhow::Result<FeedbackTable>) {
            self.pending.lock().unwrap().push(next);
        }
    }

    impl FeedbackSource for QueuedSource {
        fn name(&self) -> &str {
            "queued"
        }

        fn fetch(&self) -> Result<Option<FeedbackTable>> {
            match self.pending.lock().unwrap().pop() {
                Some(next) => next.map(Some),
                None => Ok(None),
            }
        }
    }

    fn create_test_dataset() -> Dataset {
        let mut catalog = Catalog::new();
        let titles: [(&str, &[&str], &str, f32, u32); 6] = [
            ("Steel Knights", &["Action", "Mecha"], "TV", 8.1, 120_000),
            ("Blade Road", &["Action", "Adventure"], "TV", 7.6, 80_000),
            ("Spring Letters", &["Romance", "Drama"], "Movie", 8.4, 150_000),
            ("Club Days", &["Comedy"], "TV", 7.2, 40_000),
            ("Orbit Zero", &["Sci-Fi", "Mecha"], "OVA", 7.9, 20_000),
            ("Last Summer", &["Drama"], "Movie", 8.8, 300_000),
        ];
        for (idx, (name, genres, kind, rating, members)) in titles.iter().enumerate() {
            catalog.insert_anime(Anime {
                id: idx as u32 + 1,
                name: name.to_string(),
                genres: genres.iter().map(|g| g.to_string()).collect(),
                kind: kind.to_string(),
                episodes: 12,
                rating: *rating,
                members: *members,
            });
        }

        let feedback = FeedbackTable::from_records(
            [
                (1, 1, 10),
                (1, 2, 8),
                (2, 3, 9),
                (2, 6, 10),
                (3, 4, 8),
                (3, 5, 6),
                (4, 1, 7),
                (4, 3, 6),
            ]
            .into_iter()
            .map(|(user_id, anime_id, rating)| Feedback {
                user_id,
                anime_id,
                rating,
            }),
        );
        Dataset::new(catalog, feedback)
    }

    fn build_test_service() -> (RecommendationService, Arc<QueuedSource>) {
        let config = EngineConfig::default().with_factorizer(
            FactorizerConfig::default()
                .with_rank(2)
                .with_convergence_threshold(0.5)
                .with_max_epochs(200),
        );
        let engine = RecommendationEngine::standard(&create_test_dataset(), config).unwrap();
        let source = Arc::new(QueuedSource::empty());
        let service = RecommendationService::new(
            Arc::new(engine),
            Arc::clone(&source) as Arc<dyn FeedbackSource>,
        );
        (service, source)
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Hybrid".parse::<Strategy>().unwrap(), Strategy::Hybrid);
        assert_eq!(" content ".parse::<Strategy>().unwrap(), Strategy::Content);
        assert!("svd".parse::<Strategy>().is_err());

        for strategy in Strategy::ALL {
            assert_eq!(strategy.to_string().parse::<Strategy>().unwrap(), strategy);
        }
    }

    #[tokio::test]
    async fn test_recommend_excludes_rated_items() {
        let (service, _) = build_test_service();

        let response = service.recommend(Strategy::Hybrid, 1, Some(3), false).await.unwrap();
        assert_eq!(response.user_id, 1);
        assert_eq!(response.strategy, Strategy::Hybrid);
        assert!(response.recommendations.len() <= 3);
        assert!(
            response
                .recommendations
                .iter()
                .all(|r| r.anime_id != 1 && r.anime_id != 2)
        );
    }

    #[tokio::test]
    async fn test_unknown_user_is_insufficient_data() {
        let (service, _) = build_test_service();

        let err = service.recommend(Strategy::Content, 42, None, false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecommendError>(),
            Some(RecommendError::InsufficientData { user_id: 42 })
        ));

        // Popularity still answers; only the most watched title qualifies
        let response = service.recommend(Strategy::Popularity, 42, Some(2), false).await.unwrap();
        let ids: Vec<u32> = response.recommendations.iter().map(|r| r.anime_id).collect();
        assert_eq!(ids, vec![6]);
    }

    #[tokio::test]
    async fn test_new_ratings_are_picked_up() {
        let (service, source) = build_test_service();

        let mut feedback = (*service.engine().feedback()).clone();
        feedback.insert(Feedback {
            user_id: 9,
            anime_id: 5,
            rating: 9,
        });
        source.push(Ok(feedback));

        let response = service.recommend(Strategy::Content, 9, None, false).await.unwrap();
        assert!(!response.recommendations.is_empty());
        assert!(response.recommendations.iter().all(|r| r.anime_id != 5));

        // Nothing queued: no refresh
        assert!(!service.try_update_ratings().await.unwrap());
    }

    #[tokio::test]
    async fn test_identical_ratings_do_not_refresh() {
        let (service, source) = build_test_service();
        source.push(Ok((*service.engine().feedback()).clone()));

        assert!(!service.try_update_ratings().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_fetch_serves_stale_data() {
        let (service, source) = build_test_service();
        source.push(Err(anyhow::anyhow!("disk on fire")));

        let response = service.recommend(Strategy::Hybrid, 2, Some(2), false).await.unwrap();
        assert!(!response.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_is_retried() {
        let config = EngineConfig::default().with_factorizer(
            FactorizerConfig::default()
                .with_rank(2)
                .with_convergence_threshold(0.5)
                .with_max_epochs(200),
        );
        let dataset = create_test_dataset();
        let engine = Arc::new(RecommendationEngine::standard(&dataset, config).unwrap());

        let dir = std::env::temp_dir().join(format!("anime-recs-retry-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rating.csv");
        // Only unrated rows: cleaning leaves nothing to train on
        std::fs::write(&path, "user_id,anime_id,rating\n1,1,-1\n2,3,-1\n").unwrap();

        let source = CsvFeedbackSource::new(&path, Arc::clone(dataset.catalog()), LoadOptions::new());
        let service = RecommendationService::new(Arc::clone(&engine), Arc::new(source));

        assert!(service.try_update_ratings().await.is_err());
        // Same file, same modification time: still a failure, not "unchanged"
        assert!(service.try_update_ratings().await.is_err());
        assert!(!engine.feedback().has_feedback(9));

        std::fs::write(
            &path,
            "user_id,anime_id,rating\n1,1,10\n1,2,8\n2,3,9\n2,6,10\n3,4,8\n9,5,9\n",
        )
        .unwrap();
        assert!(service.try_update_ratings().await.unwrap());
        assert!(engine.feedback().has_feedback(9));
        assert!(!service.try_update_ratings().await.unwrap());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_popular_with_filters() {
        let (service, _) = build_test_service();

        let drama = service.popular(Some("drama"), None, None, true).await.unwrap();
        assert_eq!(drama.len(), 1);
        assert_eq!(drama[0].anime_id, 6);
        assert!(drama[0].anime.as_ref().unwrap().has_genre("Drama"));

        let movies = service.popular(None, Some("movie"), Some(1), false).await.unwrap();
        assert_eq!(movies.len(), 1);

        let none = service.popular(Some("Horror"), None, None, false).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_explain_breaks_down_scores() {
        let (service, _) = build_test_service();

        let scores = service.explain(1, Some(3)).await.unwrap();
        assert!(scores.len() <= 3);
        for score in &scores {
            assert!(!score.components.is_empty());
        }
    }

    #[tokio::test]
    async fn test_response_serializes() {
        let (service, _) = build_test_service();
        let response = service.recommend(Strategy::Popularity, 1, Some(1), false).await.unwrap();

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["strategy"], "popularity");
        assert_eq!(json["user_id"], 1);
        assert!(json["recommendations"].is_array());
    }
}
