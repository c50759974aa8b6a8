//! Filter to keep anime matching a free-text genre query.

use crate::traits::ItemFilter;
use data_loader::Anime;

/// Keeps anime that match at least one queried genre.
///
/// ## Algorithm
/// 1. Split the query on commas, trim and lowercase each term
/// 2. An anime matches a term if any of its genre tokens contains the term
///    (case-insensitive), so "sci" matches "Sci-Fi"
/// 3. Keep anime matching any term
///
/// An empty query keeps everything.
pub struct GenreQueryFilter {
    terms: Vec<String>,
}

impl GenreQueryFilter {
    /// Build from a comma-separated query like "Action, Adventure"
    pub fn parse(query: &str) -> Self {
        Self {
            terms: query
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    fn matches(&self, anime: &Anime) -> bool {
        anime.genres.iter().any(|genre| {
            let genre = genre.to_lowercase();
            self.terms.iter().any(|term| genre.contains(term.as_str()))
        })
    }
}

impl ItemFilter for GenreQueryFilter {
    fn name(&self) -> &str {
        "GenreQueryFilter"
    }

    fn apply<'a>(&self, items: Vec<&'a Anime>) -> Vec<&'a Anime> {
        if self.terms.is_empty() {
            return items;
        }
        items.into_iter().filter(|&anime| self.matches(anime)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anime(id: u32, genres: &[&str]) -> Anime {
        Anime {
            id,
            name: format!("Anime {}", id),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            kind: "TV".to_string(),
            episodes: 12,
            rating: 7.0,
            members: 100,
        }
    }

    #[test]
    fn test_any_term_matches() {
        let items = [
            anime(1, &["Action", "Shounen"]),
            anime(2, &["Adventure"]),
            anime(3, &["Romance"]),
        ];
        let refs: Vec<&Anime> = items.iter().collect();

        let kept = GenreQueryFilter::parse("action, ADVENTURE").apply(refs);
        let ids: Vec<u32> = kept.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_substring_match() {
        let items = [anime(1, &["Sci-Fi"]), anime(2, &["Space"])];
        let refs: Vec<&Anime> = items.iter().collect();

        let kept = GenreQueryFilter::parse("sci").apply(refs);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, 1);
    }

    #[test]
    fn test_empty_query_keeps_all() {
        let items = [anime(1, &["Drama"]), anime(2, &[])];
        let refs: Vec<&Anime> = items.iter().collect();

        let filter = GenreQueryFilter::parse(" , ");
        assert!(filter.terms().is_empty());
        assert_eq!(filter.apply(refs).len(), 2);
    }
}
