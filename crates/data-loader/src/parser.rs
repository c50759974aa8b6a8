//! Parser for the anime recommendation CSV files.
//!
//! This module handles parsing the two source tables:
//! - anime.csv: anime_id,name,genre,type,episodes,rating,members
//! - rating.csv: user_id,anime_id,rating
//!
//! Rows are deserialized with `csv` + serde into raw structs, then cleaned
//! into the typed records from [`crate::types`]. Missing catalog fields get
//! fixed placeholder values (see [`parse_anime_from_reader`]).

use crate::error::{DataLoadError, Result};
use crate::types::*;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Genre/type placeholder for rows that left the column empty
const UNKNOWN: &str = "Unknown";

/// Episode count for titles whose source says "Unknown"
const EPISODES_UNKNOWN: i32 = -1;

/// Episode count for titles with no episode column at all
const EPISODES_MISSING: i32 = -2;

/// One row of anime.csv exactly as it appears on disk
#[derive(Debug, Deserialize)]
struct AnimeRow {
    anime_id: AnimeId,
    name: Option<String>,
    genre: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    episodes: Option<String>,
    rating: Option<f32>,
    members: Option<u32>,
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|_| DataLoadError::FileNotFound {
        path: path.display().to_string(),
    })
}

/// Map a csv error onto the file and 1-based line it came from
fn csv_error(file: &str, record_index: usize, err: csv::Error) -> DataLoadError {
    let line = err
        .position()
        .map(|p| p.line() as usize)
        .unwrap_or(record_index + 2);
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => DataLoadError::Io {
            file: file.to_string(),
            source,
        },
        _ => DataLoadError::ParseError {
            file: file.to_string(),
            line,
            reason,
        },
    }
}

/// Parse the anime.csv file
pub fn parse_anime(path: &Path) -> Result<Vec<Anime>> {
    parse_anime_from_reader(open(path)?, "anime.csv")
}

/// Parse anime rows from any reader (the header row is required)
pub fn parse_anime_from_reader(reader: impl Read, file: &str) -> Result<Vec<Anime>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut anime = Vec::new();

    for (idx, row) in csv_reader.deserialize::<AnimeRow>().enumerate() {
        let row = row.map_err(|e| csv_error(file, idx, e))?;
        let line = idx + 2;

        let name = non_empty(row.name).ok_or_else(|| DataLoadError::ParseError {
            file: file.to_string(),
            line,
            reason: "Missing name".to_string(),
        })?;

        anime.push(Anime {
            id: row.anime_id,
            name,
            genres: parse_genres(non_empty(row.genre).as_deref().unwrap_or(UNKNOWN)),
            kind: non_empty(row.kind).unwrap_or_else(|| UNKNOWN.to_string()),
            episodes: parse_episodes(row.episodes.as_deref()).map_err(|reason| {
                DataLoadError::ParseError {
                    file: file.to_string(),
                    line,
                    reason,
                }
            })?,
            rating: row.rating.unwrap_or(0.0),
            members: row.members.unwrap_or(0),
        });
    }

    Ok(anime)
}

/// Parse the rating.csv file
pub fn parse_ratings(path: &Path) -> Result<Vec<Feedback>> {
    parse_ratings_from_reader(open(path)?, "rating.csv")
}

/// Parse feedback rows from any reader (the header row is required)
pub fn parse_ratings_from_reader(reader: impl Read, file: &str) -> Result<Vec<Feedback>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut ratings = Vec::new();

    for (idx, row) in csv_reader.deserialize::<Feedback>().enumerate() {
        ratings.push(row.map_err(|e| csv_error(file, idx, e))?);
    }

    Ok(ratings)
}

/// Split a comma-delimited genre list into trimmed tokens
///
/// Example: "Action, Adventure, Shounen" -> ["Action", "Adventure", "Shounen"]
pub fn parse_genres(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the episodes column
///
/// Example: "26" -> Ok(26), "Unknown" -> Ok(-1), missing -> Ok(-2)
fn parse_episodes(s: Option<&str>) -> std::result::Result<i32, String> {
    match s.map(str::trim) {
        None | Some("") => Ok(EPISODES_MISSING),
        Some(UNKNOWN) => Ok(EPISODES_UNKNOWN),
        Some(value) => value
            .parse()
            .map_err(|e| format!("Invalid episodes '{}': {}", value, e)),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANIME_CSV: &str = "\
anime_id,name,genre,type,episodes,rating,members
32281,Kimi no Na wa.,\"Drama, Romance, School, Supernatural\",Movie,1,9.37,200630
5114,Fullmetal Alchemist: Brotherhood,\"Action, Adventure, Drama, Fantasy, Magic, Military, Shounen\",TV,64,9.26,793665
30484,Steins;Gate 0,\"Sci-Fi, Thriller\",TV,Unknown,,60999
34412,Hashiri Hajimeta bakari no Kimi ni,,Music,,,
";

    #[test]
    fn test_parse_genres() {
        assert_eq!(
            parse_genres("Action, Adventure,Shounen"),
            vec!["Action", "Adventure", "Shounen"]
        );
        assert!(parse_genres("").is_empty());
        // repeats survive, empty tokens do not
        assert_eq!(parse_genres("Comedy, , Comedy"), vec!["Comedy", "Comedy"]);
    }

    #[test]
    fn test_parse_episodes() {
        assert_eq!(parse_episodes(Some("26")), Ok(26));
        assert_eq!(parse_episodes(Some("Unknown")), Ok(EPISODES_UNKNOWN));
        assert_eq!(parse_episodes(None), Ok(EPISODES_MISSING));
        assert!(parse_episodes(Some("lots")).is_err());
    }

    #[test]
    fn test_parse_anime_rows() {
        let anime = parse_anime_from_reader(ANIME_CSV.as_bytes(), "anime.csv").unwrap();
        assert_eq!(anime.len(), 4);

        assert_eq!(anime[0].id, 32281);
        assert_eq!(anime[0].genres.len(), 4);
        assert_eq!(anime[0].kind, "Movie");
        assert_eq!(anime[1].members, 793665);

        // Unknown episodes, missing rating
        assert_eq!(anime[2].episodes, EPISODES_UNKNOWN);
        assert_eq!(anime[2].rating, 0.0);

        // Everything optional missing
        assert_eq!(anime[3].genres, vec![UNKNOWN]);
        assert_eq!(anime[3].episodes, EPISODES_MISSING);
        assert_eq!(anime[3].members, 0);
    }

    #[test]
    fn test_parse_anime_missing_name() {
        let csv = "anime_id,name,genre,type,episodes,rating,members\n1,,Action,TV,12,7.0,100\n";
        let err = parse_anime_from_reader(csv.as_bytes(), "anime.csv").unwrap_err();
        assert!(matches!(err, DataLoadError::ParseError { line: 2, .. }));
    }

    #[test]
    fn test_parse_ratings() {
        let csv = "user_id,anime_id,rating\n1,20,-1\n1,24,8\n2,20,10\n";
        let ratings = parse_ratings_from_reader(csv.as_bytes(), "rating.csv").unwrap();

        assert_eq!(ratings.len(), 3);
        assert!(!ratings[0].is_rated());
        assert_eq!(ratings[1].rating, 8);
        assert_eq!(ratings[2].user_id, 2);
    }

    #[test]
    fn test_parse_ratings_bad_row() {
        let csv = "user_id,anime_id,rating\n1,20,8\nx,24,8\n";
        let err = parse_ratings_from_reader(csv.as_bytes(), "rating.csv").unwrap_err();
        assert!(matches!(err, DataLoadError::ParseError { .. }));
    }
}
