//! Integration tests for the engine.
//!
//! These tests build every recommender over one small dataset and check
//! they behave together: exclusions, refresh and popularity slices.

use data_loader::{Anime, Catalog, Dataset, Feedback, FeedbackTable, UserId};
use engine::filters::*;
use engine::{
    COLLABORATIVE, CONTENT, EngineConfig, HYBRID, ItemFilterPipeline, POPULARITY,
    RecommendationEngine,
};
use recommenders::{FactorizerConfig, RecommendError, Recommender};
use std::collections::HashSet;

fn create_test_setup() -> Dataset {
    let mut catalog = Catalog::new();
    let titles: [(&str, &[&str], &str, f32, u32); 8] = [
        ("Steel Knights", &["Action", "Mecha"], "TV", 8.1, 120_000),
        ("Blade Road", &["Action", "Adventure"], "TV", 7.6, 80_000),
        ("Spring Letters", &["Romance", "Drama"], "Movie", 8.4, 150_000),
        ("Club Days", &["Comedy", "Slice of Life"], "TV", 7.2, 40_000),
        ("Orbit Zero", &["Sci-Fi", "Mecha"], "OVA", 7.9, 20_000),
        ("Last Summer", &["Drama"], "Movie", 8.8, 300_000),
        ("Pixel Quest", &["Adventure", "Comedy"], "TV", 6.9, 15_000),
        ("Night Shift", &["Mystery", "Drama"], "TV", 8.0, 60_000),
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

    let ratings: [(UserId, u32, i8); 18] = [
        (1, 1, 10),
        (1, 2, 8),
        (1, 5, 9),
        (2, 3, 9),
        (2, 6, 10),
        (2, 8, 7),
        (3, 1, 7),
        (3, 4, 8),
        (3, 7, 6),
        (4, 2, 9),
        (4, 5, 8),
        (4, 7, 7),
        (5, 3, 8),
        (5, 4, 6),
        (5, 6, 9),
        (6, 1, 9),
        (6, 6, 4),
        (6, 8, 8),
    ];
    let feedback = FeedbackTable::from_records(ratings.iter().map(|&(user_id, anime_id, rating)| {
        Feedback {
            user_id,
            anime_id,
            rating,
        }
    }));

    Dataset::new(catalog, feedback)
}

fn test_config() -> EngineConfig {
    EngineConfig::default().with_factorizer(
        FactorizerConfig::default()
            .with_rank(3)
            .with_regularization(0.05)
            .with_convergence_threshold(0.5)
            .with_max_epochs(300),
    )
}

fn ids(recs: &[recommenders::Recommendation]) -> Vec<u32> {
    recs.iter().map(|r| r.anime_id).collect()
}

#[test]
fn test_every_recommender_respects_exclusions() {
    let engine = RecommendationEngine::standard(&create_test_setup(), test_config()).unwrap();
    let rated: HashSet<u32> = engine.feedback().rated_items(1);

    for name in [CONTENT, COLLABORATIVE, HYBRID, POPULARITY] {
        let results = engine.recommend(name, 1, None, false).unwrap();
        assert!(
            results.iter().all(|r| !rated.contains(&r.anime_id)),
            "{} leaked a rated item",
            name
        );
        // Deduplicated and sorted
        let unique: HashSet<u32> = ids(&results).into_iter().collect();
        assert_eq!(unique.len(), results.len());
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

#[test]
fn test_score_column_names() {
    let engine = RecommendationEngine::standard(&create_test_setup(), test_config()).unwrap();
    let column = |name: &str| engine.get_recommender(name).unwrap().score_column_name();

    assert_eq!(column(CONTENT), "relevance_score");
    assert_eq!(column(COLLABORATIVE), "predicted_rating");
    assert_eq!(column(POPULARITY), "weighted_score");
    assert_eq!(column(HYBRID), "joint_relevance_score");
}

#[test]
fn test_verbose_attaches_records() {
    let engine = RecommendationEngine::standard(&create_test_setup(), test_config()).unwrap();
    let results = engine.recommend(HYBRID, 2, Some(3), true).unwrap();

    assert!(results.len() <= 3);
    for rec in &results {
        assert_eq!(rec.anime.as_ref().map(|a| a.id), Some(rec.anime_id));
    }
}

#[test]
fn test_refresh_with_identical_feedback_keeps_rankings() {
    let dataset = create_test_setup();
    let engine = RecommendationEngine::standard(&dataset, test_config()).unwrap();

    let before_content = ids(&engine.recommend(CONTENT, 3, None, false).unwrap());
    let before_popular = ids(&engine.recommend(POPULARITY, 3, None, false).unwrap());

    engine
        .refresh_recommenders((**dataset.feedback()).clone())
        .unwrap();

    assert_eq!(ids(&engine.recommend(CONTENT, 3, None, false).unwrap()), before_content);
    assert_eq!(ids(&engine.recommend(POPULARITY, 3, None, false).unwrap()), before_popular);
}

#[test]
fn test_new_user_after_refresh() {
    let dataset = create_test_setup();
    let engine = RecommendationEngine::standard(&dataset, test_config()).unwrap();
    assert!(matches!(
        engine.recommend(HYBRID, 7, Some(5), false),
        Err(RecommendError::InsufficientData { user_id: 7 })
    ));

    let mut feedback = (**dataset.feedback()).clone();
    feedback.insert(Feedback { user_id: 7, anime_id: 5, rating: 10 });
    feedback.insert(Feedback { user_id: 7, anime_id: 1, rating: 9 });
    assert!(engine.refresh_if_changed(feedback).unwrap());

    let results = engine.recommend(HYBRID, 7, Some(5), false).unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.anime_id != 5 && r.anime_id != 1));
}

#[test]
fn test_popular_slices() {
    let engine = RecommendationEngine::standard(&create_test_setup(), test_config()).unwrap();

    let drama = ItemFilterPipeline::new().add_filter(GenreQueryFilter::parse("drama"));
    let top = engine.most_popular(&drama, Some(1), true);
    assert_eq!(top.len(), 1);
    assert!(top[0].anime.as_ref().unwrap().has_genre("Drama"));

    let movies = ItemFilterPipeline::new().add_filter(MediaTypeFilter::new("Movie"));
    for rec in engine.most_popular(&movies, None, true) {
        assert_eq!(rec.anime.unwrap().kind, "Movie");
    }

    let nothing = ItemFilterPipeline::new().add_filter(GenreQueryFilter::parse("Horror"));
    assert!(engine.most_popular(&nothing, Some(10), false).is_empty());
}
