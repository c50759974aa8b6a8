//! Filter on the media type column ("TV", "Movie", "OVA", ...).

use crate::traits::ItemFilter;
use data_loader::Anime;

/// Keeps anime whose media type equals the requested one, ignoring case.
pub struct MediaTypeFilter {
    kind: String,
}

impl MediaTypeFilter {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl ItemFilter for MediaTypeFilter {
    fn name(&self) -> &str {
        "MediaTypeFilter"
    }

    fn apply<'a>(&self, items: Vec<&'a Anime>) -> Vec<&'a Anime> {
        items
            .into_iter()
            .filter(|anime| anime.kind.eq_ignore_ascii_case(self.kind.trim()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        let items: Vec<Anime> = ["TV", "Movie", "tv", "OVA"]
            .iter()
            .enumerate()
            .map(|(idx, kind)| Anime {
                id: idx as u32,
                name: format!("Anime {}", idx),
                genres: vec![],
                kind: kind.to_string(),
                episodes: 1,
                rating: 7.0,
                members: 100,
            })
            .collect();
        let refs: Vec<&Anime> = items.iter().collect();

        let kept = MediaTypeFilter::new("Tv").apply(refs);
        let ids: Vec<u32> = kept.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![0, 2]);
    }
}
