//! Movie catalogue records.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::validator::{unique, Validator};

pub const MAX_GENRES: usize = 5;
const FIRST_FILM_YEAR: i32 = 1888;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Movie {
    pub id: i64,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub year: i32,
    /// Running time in minutes.
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

/// Create request; missing fields default to empty and fail validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(default, deny_unknown_fields)]
pub struct MovieInput {
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct MoviePatch {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<i32>,
    pub genres: Option<Vec<String>>,
}

impl MoviePatch {
    pub fn apply(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

pub fn validate_movie(
    v: &mut Validator,
    title: &str,
    year: i32,
    runtime: i32,
    genres: &[String],
    now: DateTime<Utc>,
) {
    v.check(!title.is_empty(), "title", "must be provided");
    v.check(title.len() <= 500, "title", "must not be more than 500 bytes long");

    v.check(year != 0, "year", "must be provided");
    v.check(year >= FIRST_FILM_YEAR, "year", "must be greater than 1888");
    v.check(year <= now.year(), "year", "must not be in the future");

    v.check(runtime != 0, "runtime", "must be provided");
    v.check(runtime > 0, "runtime", "must be a positive integer");

    v.check(!genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check(genres.len() <= MAX_GENRES, "genres", "must not contain more than 5 genres");
    v.check(unique(genres), "genres", "must not contain duplicate values");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn genres(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn accepts_a_well_formed_movie() {
        let mut v = Validator::new();
        validate_movie(&mut v, "Casablanca", 1942, 102, &genres(&["drama"]), now());
        assert!(v.valid());
    }

    #[test]
    fn rejects_each_bad_field() {
        let mut v = Validator::new();
        validate_movie(
            &mut v,
            "",
            2030,
            -5,
            &genres(&["drama", "drama"]),
            now(),
        );
        let errors = v.into_errors();
        assert_eq!(errors["title"], "must be provided");
        assert_eq!(errors["year"], "must not be in the future");
        assert_eq!(errors["runtime"], "must be a positive integer");
        assert_eq!(errors["genres"], "must not contain duplicate values");
    }

    #[test]
    fn genre_count_bounds() {
        let mut v = Validator::new();
        validate_movie(&mut v, "A", 2000, 90, &[], now());
        assert_eq!(v.errors()["genres"], "must contain at least 1 genre");

        let mut v = Validator::new();
        validate_movie(
            &mut v,
            "A",
            2000,
            90,
            &genres(&["a", "b", "c", "d", "e", "f"]),
            now(),
        );
        assert_eq!(v.errors()["genres"], "must not contain more than 5 genres");
    }

    #[test]
    fn patch_keeps_absent_fields() {
        let mut movie = Movie {
            id: 1,
            created_at: now(),
            title: "Heat".to_string(),
            year: 1995,
            runtime: 170,
            genres: genres(&["crime"]),
            version: 1,
        };
        MoviePatch {
            runtime: Some(171),
            ..MoviePatch::default()
        }
        .apply(&mut movie);
        assert_eq!(movie.title, "Heat");
        assert_eq!(movie.runtime, 171);
    }
}
