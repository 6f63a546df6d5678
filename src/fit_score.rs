//! Fit-score calculator.
//!
//! Maps a snapshot of a creator profile's platform presence to a 0-100
//! score. Each component is capped independently and the total is clamped to
//! [`MAX_FIT_SCORE`]. The calculator is pure: the caller supplies `now` so
//! release recency is reproducible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever weights or rules change. Stored breakdowns with another
/// version are stale and must be recomputed wholesale.
pub const FIT_SCORE_VERSION: i32 = 1;

pub const MAX_FIT_SCORE: i32 = 100;

/// Point caps per component.
pub mod weights {
    pub const USES_LINK_IN_BIO: i32 = 15;
    pub const PAID_TIER: i32 = 20;
    pub const HAS_SPOTIFY: i32 = 10;
    pub const SPOTIFY_POPULARITY: i32 = 15;
    pub const RELEASE_RECENT: i32 = 10;
    pub const RELEASE_THIS_YEAR: i32 = 5;
    pub const GENRE_MATCH: i32 = 10;
    pub const HAS_CONTACT_EMAIL: i32 = 5;
    pub const PER_EXTRA_DSP: i32 = 5;
    pub const MULTI_DSP_CAP: i32 = 10;
    pub const VERIFIED_SOCIAL: i32 = 5;
}

const RECENT_RELEASE_DAYS: i64 = 180;
const THIS_YEAR_RELEASE_DAYS: i64 = 365;

/// Ingestion sources that indicate the creator already runs a link-in-bio page.
pub const LINK_IN_BIO_PLATFORMS: &[&str] = &[
    "linktree",
    "beacons",
    "laylo",
    "linkfire",
    "stan",
    "koji",
    "carrd",
    "hoo.be",
];

/// Streaming platforms counted towards multi-DSP presence. Spotify is scored
/// on its own and is not counted here.
pub const DSP_PLATFORMS: &[&str] = &[
    "apple_music",
    "youtube_music",
    "soundcloud",
    "tidal",
    "deezer",
    "amazon_music",
    "bandcamp",
    "audiomack",
];

/// Genre fragments the product targets.
pub const TARGET_GENRES: &[&str] = &[
    "hip hop",
    "rap",
    "r&b",
    "pop",
    "electronic",
    "edm",
    "house",
    "indie",
    "alternative",
    "latin",
    "afrobeats",
    "dance",
];

/// Everything the calculator needs about a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitScoreInput {
    pub ingestion_source_platform: Option<String>,
    pub has_paid_tier: bool,
    pub spotify_id: Option<String>,
    /// Spotify artist popularity, nominally 0-100.
    pub spotify_popularity: Option<i32>,
    pub genres: Vec<String>,
    pub latest_release_date: Option<DateTime<Utc>>,
    pub has_contact_email: bool,
    /// Platforms the creator is present on, from DSP ids and social links.
    pub dsp_platforms: Vec<String>,
    pub verified_platforms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitScoreMeta {
    pub version: i32,
    pub calculated_at: DateTime<Utc>,
}

/// Per-component points. Serialized in camelCase into `fit_score_breakdown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitScoreBreakdown {
    pub uses_link_in_bio: i32,
    pub paid_tier: i32,
    pub has_spotify: i32,
    pub spotify_popularity: i32,
    pub release_recency: i32,
    pub genre_match: i32,
    pub has_contact_email: i32,
    pub multi_dsp: i32,
    pub verified_social: i32,
    pub meta: FitScoreMeta,
}

impl FitScoreBreakdown {
    /// Unclamped sum of all components.
    pub fn component_sum(&self) -> i32 {
        self.uses_link_in_bio
            + self.paid_tier
            + self.has_spotify
            + self.spotify_popularity
            + self.release_recency
            + self.genre_match
            + self.has_contact_email
            + self.multi_dsp
            + self.verified_social
    }

    pub fn total(&self) -> i32 {
        self.component_sum().clamp(0, MAX_FIT_SCORE)
    }

    pub fn is_current(&self) -> bool {
        self.meta.version == FIT_SCORE_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitScoreResult {
    pub score: i32,
    pub breakdown: FitScoreBreakdown,
}

pub fn paid_tier_points(has_paid_tier: bool) -> i32 {
    if has_paid_tier {
        weights::PAID_TIER
    } else {
        0
    }
}

fn normalized(value: &str) -> String {
    value.trim().to_lowercase()
}

fn link_in_bio_points(source: Option<&str>) -> i32 {
    match source {
        Some(s) if LINK_IN_BIO_PLATFORMS.contains(&normalized(s).as_str()) => {
            weights::USES_LINK_IN_BIO
        }
        _ => 0,
    }
}

fn popularity_points(popularity: Option<i32>) -> i32 {
    let Some(p) = popularity else {
        return 0;
    };
    let p = p.clamp(0, 100) as f64;
    ((p / 100.0) * weights::SPOTIFY_POPULARITY as f64).round() as i32
}

fn release_recency_points(latest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i32 {
    let Some(released) = latest else {
        return 0;
    };
    // Future-dated (pre-announced) releases count as recent.
    let age_days = (now - released).num_days();
    if age_days <= RECENT_RELEASE_DAYS {
        weights::RELEASE_RECENT
    } else if age_days <= THIS_YEAR_RELEASE_DAYS {
        weights::RELEASE_THIS_YEAR
    } else {
        0
    }
}

fn genre_match_points(genres: &[String]) -> i32 {
    let matched = genres.iter().map(|g| normalized(g)).any(|genre| {
        TARGET_GENRES
            .iter()
            .any(|target| genre.contains(target))
    });
    if matched {
        weights::GENRE_MATCH
    } else {
        0
    }
}

fn multi_dsp_points(platforms: &[String]) -> i32 {
    let mut seen: Vec<String> = Vec::new();
    for platform in platforms {
        let p = normalized(platform);
        if DSP_PLATFORMS.contains(&p.as_str()) && !seen.contains(&p) {
            seen.push(p);
        }
    }
    (seen.len() as i32 * weights::PER_EXTRA_DSP).min(weights::MULTI_DSP_CAP)
}

/// Scores a profile snapshot.
pub fn calculate_fit_score(input: &FitScoreInput, now: DateTime<Utc>) -> FitScoreResult {
    let has_spotify = input
        .spotify_id
        .as_deref()
        .map(|id| !id.trim().is_empty())
        .unwrap_or(false);

    let breakdown = FitScoreBreakdown {
        uses_link_in_bio: link_in_bio_points(input.ingestion_source_platform.as_deref()),
        paid_tier: paid_tier_points(input.has_paid_tier),
        has_spotify: if has_spotify { weights::HAS_SPOTIFY } else { 0 },
        spotify_popularity: if has_spotify {
            popularity_points(input.spotify_popularity)
        } else {
            0
        },
        release_recency: release_recency_points(input.latest_release_date, now),
        genre_match: genre_match_points(&input.genres),
        has_contact_email: if input.has_contact_email {
            weights::HAS_CONTACT_EMAIL
        } else {
            0
        },
        multi_dsp: multi_dsp_points(&input.dsp_platforms),
        verified_social: if input.verified_platforms.is_empty() {
            0
        } else {
            weights::VERIFIED_SOCIAL
        },
        meta: FitScoreMeta {
            version: FIT_SCORE_VERSION,
            calculated_at: now,
        },
    };

    FitScoreResult {
        score: breakdown.total(),
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn full_input() -> FitScoreInput {
        FitScoreInput {
            ingestion_source_platform: Some("Linktree".to_string()),
            has_paid_tier: true,
            spotify_id: Some("4Z8W4fKeB5YxbusRsdQVPb".to_string()),
            spotify_popularity: Some(100),
            genres: vec!["Indie Pop".to_string()],
            latest_release_date: Some(now() - Duration::days(30)),
            has_contact_email: true,
            dsp_platforms: vec![
                "apple_music".to_string(),
                "soundcloud".to_string(),
                "tidal".to_string(),
            ],
            verified_platforms: vec!["instagram".to_string()],
        }
    }

    #[test]
    fn test_empty_profile_scores_zero() {
        let result = calculate_fit_score(&FitScoreInput::default(), now());
        assert_eq!(result.score, 0);
        assert_eq!(result.breakdown.component_sum(), 0);
        assert_eq!(result.breakdown.meta.version, FIT_SCORE_VERSION);
        assert_eq!(result.breakdown.meta.calculated_at, now());
    }

    #[test]
    fn test_full_profile_hits_maximum() {
        let result = calculate_fit_score(&full_input(), now());
        assert_eq!(result.score, MAX_FIT_SCORE);
        assert_eq!(result.breakdown.multi_dsp, weights::MULTI_DSP_CAP);
    }

    #[test]
    fn test_popularity_requires_spotify_id() {
        let input = FitScoreInput {
            spotify_popularity: Some(80),
            ..Default::default()
        };
        let result = calculate_fit_score(&input, now());
        assert_eq!(result.breakdown.spotify_popularity, 0);
        assert_eq!(result.breakdown.has_spotify, 0);
    }

    #[test]
    fn test_popularity_is_scaled_and_clamped() {
        let mut input = FitScoreInput {
            spotify_id: Some("abc".to_string()),
            spotify_popularity: Some(50),
            ..Default::default()
        };
        assert_eq!(
            calculate_fit_score(&input, now()).breakdown.spotify_popularity,
            8
        );

        input.spotify_popularity = Some(250);
        assert_eq!(
            calculate_fit_score(&input, now()).breakdown.spotify_popularity,
            weights::SPOTIFY_POPULARITY
        );

        input.spotify_popularity = Some(-5);
        assert_eq!(
            calculate_fit_score(&input, now()).breakdown.spotify_popularity,
            0
        );
    }

    #[test]
    fn test_release_recency_bands() {
        let at = |days: i64| {
            let input = FitScoreInput {
                latest_release_date: Some(now() - Duration::days(days)),
                ..Default::default()
            };
            calculate_fit_score(&input, now()).breakdown.release_recency
        };
        assert_eq!(at(10), weights::RELEASE_RECENT);
        assert_eq!(at(180), weights::RELEASE_RECENT);
        assert_eq!(at(200), weights::RELEASE_THIS_YEAR);
        assert_eq!(at(400), 0);
        assert_eq!(at(-7), weights::RELEASE_RECENT);
    }

    #[test]
    fn test_genre_match_is_case_insensitive_substring() {
        let input = FitScoreInput {
            genres: vec!["Southern HIP HOP".to_string()],
            ..Default::default()
        };
        assert_eq!(
            calculate_fit_score(&input, now()).breakdown.genre_match,
            weights::GENRE_MATCH
        );

        let input = FitScoreInput {
            genres: vec!["baroque".to_string()],
            ..Default::default()
        };
        assert_eq!(calculate_fit_score(&input, now()).breakdown.genre_match, 0);
    }

    #[test]
    fn test_multi_dsp_ignores_duplicates_and_unknown() {
        let input = FitScoreInput {
            dsp_platforms: vec![
                "apple_music".to_string(),
                "Apple_Music".to_string(),
                "instagram".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            calculate_fit_score(&input, now()).breakdown.multi_dsp,
            weights::PER_EXTRA_DSP
        );
    }

    #[test]
    fn test_breakdown_serializes_camel_case() {
        let result = calculate_fit_score(&full_input(), now());
        let json = serde_json::to_value(&result.breakdown).unwrap();
        assert_eq!(json["paidTier"], 20);
        assert_eq!(json["hasSpotify"], 10);
        assert_eq!(json["genreMatch"], 10);
        assert_eq!(json["meta"]["version"], FIT_SCORE_VERSION);
        assert!(json["meta"]["calculatedAt"].is_string());
    }

    #[test]
    fn test_stale_version_detected() {
        let mut breakdown = calculate_fit_score(&full_input(), now()).breakdown;
        assert!(breakdown.is_current());
        breakdown.meta.version = FIT_SCORE_VERSION - 1;
        assert!(!breakdown.is_current());
    }
}
