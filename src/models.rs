use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::fit_score::FitScoreBreakdown;

// ============ Database Models ============

/// Marketing-facing columns of `creator_profiles` used by the fit-score pipeline.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileScoringRow {
    pub id: Uuid,
    pub spotify_id: Option<String>,
    pub apple_music_id: Option<String>,
    pub youtube_music_id: Option<String>,
    pub spotify_popularity: Option<i32>,
    pub genres: Option<Vec<String>>,
    pub ingestion_source_platform: Option<String>,
    pub is_pro: bool,
}

/// Score columns of a profile as currently stored.
#[derive(Debug, Clone)]
pub struct StoredFitScore {
    pub profile_id: Uuid,
    pub score: Option<i32>,
    /// `None` when the column is empty or no longer parses as a breakdown.
    pub breakdown: Option<FitScoreBreakdown>,
}

/// Row returned by the ranked fit-profile query.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitProfileSummary {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub spotify_id: Option<String>,
    pub fit_score: i32,
    pub fit_score_breakdown: Option<serde_json::Value>,
    pub fit_score_updated_at: Option<DateTime<Utc>>,
}

/// Identity resolved for a dashboard request.
#[derive(Debug, Clone, FromRow)]
pub struct DashboardAccount {
    pub user_id: String,
    pub profile_id: Uuid,
    pub billing_customer_id: Option<String>,
}

// ============ API Models ============

#[derive(Debug, Deserialize)]
pub struct VenmoHandleRequest {
    pub handle: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VenmoHandleResponse {
    pub success: bool,
    pub venmo_handle: Option<String>,
    /// Public pay link shown on the profile page.
    pub venmo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitScoreBatchParams {
    pub limit: Option<i64>,
    pub batch_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopFitProfilesParams {
    pub limit: Option<i64>,
    pub min_score: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ProcessedResponse {
    pub processed: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidTierRequest {
    pub has_paid_tier: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreviewParams {
    pub price_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChangeRequest {
    pub price_id: String,
    /// Forces downgrades and interval changes to apply now instead of at period end.
    #[serde(default)]
    pub immediate: bool,
}
