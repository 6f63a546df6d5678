//! Fit-score orchestration over the profile tables.
//!
//! Loads profile snapshots through a [`FitScoreRepository`], feeds the pure
//! calculator and persists `{score, breakdown}`. Errors propagate unchanged:
//! every operation is idempotent and its callers (admin routes, the cron
//! binary) own retries.

use crate::errors::AppError;
use crate::fit_score::{
    calculate_fit_score, paid_tier_points, FitScoreBreakdown, FitScoreInput, FitScoreResult,
};
use crate::models::{FitProfileSummary, StoredFitScore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_MISSING_LIMIT: i64 = 100;
pub const DEFAULT_BATCH_SIZE: i64 = 100;
pub const MAX_BATCH_SIZE: i64 = 1_000;

/// Storage seam for the fit-score pipeline.
#[async_trait]
pub trait FitScoreRepository: Send + Sync {
    /// Calculator input for one profile, `None` if the profile does not exist.
    async fn load_input(&self, profile_id: Uuid) -> Result<Option<FitScoreInput>, AppError>;

    /// Calculator inputs for a batch. Unknown ids are skipped.
    async fn load_inputs(
        &self,
        profile_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, FitScoreInput)>, AppError>;

    async fn store_score(&self, profile_id: Uuid, result: &FitScoreResult) -> Result<(), AppError>;

    /// Writes every result in a single statement. Returns rows affected.
    async fn store_scores(&self, results: &[(Uuid, FitScoreResult)]) -> Result<u64, AppError>;

    async fn missing_score_ids(&self, limit: i64) -> Result<Vec<Uuid>, AppError>;

    /// Unclaimed profile ids strictly after `cursor`, ascending.
    async fn unclaimed_ids_after(
        &self,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError>;

    async fn top_profiles(
        &self,
        limit: i64,
        min_score: i32,
    ) -> Result<Vec<FitProfileSummary>, AppError>;

    async fn stored_score(&self, profile_id: Uuid) -> Result<Option<StoredFitScore>, AppError>;

    /// Targeted write of an adjusted breakdown and its score.
    async fn store_paid_tier_adjustment(
        &self,
        profile_id: Uuid,
        score: i32,
        breakdown: &FitScoreBreakdown,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct FitScoreService {
    repo: Arc<dyn FitScoreRepository>,
}

impl FitScoreService {
    pub fn new(repo: Arc<dyn FitScoreRepository>) -> Self {
        Self { repo }
    }

    fn score_batch(
        inputs: Vec<(Uuid, FitScoreInput)>,
        now: DateTime<Utc>,
    ) -> Vec<(Uuid, FitScoreResult)> {
        inputs
            .into_iter()
            .map(|(id, input)| (id, calculate_fit_score(&input, now)))
            .collect()
    }

    /// Recomputes and persists one profile's score.
    pub async fn calculate_and_store_fit_score(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<FitScoreResult>, AppError> {
        let Some(input) = self.repo.load_input(profile_id).await? else {
            tracing::debug!("Fit score skipped, profile {} not found", profile_id);
            return Ok(None);
        };

        let result = calculate_fit_score(&input, Utc::now());
        self.repo.store_score(profile_id, &result).await?;

        tracing::info!("Fit score for {} = {}", profile_id, result.score);
        Ok(Some(result))
    }

    /// Scores up to `limit` profiles that have never been scored.
    pub async fn calculate_missing_fit_scores(&self, limit: i64) -> Result<usize, AppError> {
        let limit = limit.clamp(1, MAX_BATCH_SIZE);
        let ids = self.repo.missing_score_ids(limit).await?;
        if ids.is_empty() {
            tracing::debug!("No profiles missing a fit score");
            return Ok(0);
        }

        let inputs = self.repo.load_inputs(&ids).await?;
        let results = Self::score_batch(inputs, Utc::now());
        if results.is_empty() {
            return Ok(0);
        }

        self.repo.store_scores(&results).await?;
        tracing::info!("Calculated {} missing fit scores", results.len());
        Ok(results.len())
    }

    /// Recomputes every unclaimed profile, one id page at a time.
    ///
    /// Pages are independent statements: profiles created behind the cursor
    /// during the run are picked up by the next run, and a profile updated
    /// mid-run keeps whichever write landed last.
    pub async fn recalculate_all_fit_scores(&self, batch_size: i64) -> Result<usize, AppError> {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let mut cursor: Option<Uuid> = None;
        let mut total = 0usize;

        loop {
            let ids = self.repo.unclaimed_ids_after(cursor, batch_size).await?;
            let Some(last) = ids.last().copied() else {
                break;
            };
            cursor = Some(last);

            let inputs = self.repo.load_inputs(&ids).await?;
            let results = Self::score_batch(inputs, Utc::now());
            if !results.is_empty() {
                self.repo.store_scores(&results).await?;
            }
            total += results.len();
            tracing::info!(
                "Fit score recompute: {} in batch, {} total (cursor {})",
                results.len(),
                total,
                last
            );

            if (ids.len() as i64) < batch_size {
                break;
            }
        }

        Ok(total)
    }

    pub async fn get_top_fit_profiles(
        &self,
        limit: i64,
        min_score: i32,
    ) -> Result<Vec<FitProfileSummary>, AppError> {
        self.repo
            .top_profiles(limit.clamp(1, MAX_BATCH_SIZE), min_score)
            .await
    }

    /// Applies a paid-tier change to a stored score.
    ///
    /// With a current breakdown only the `paidTier` component and the total
    /// move; an unchanged value writes nothing. Anything else is a full
    /// recompute with the new paid-tier value. Returns the resulting score,
    /// or `None` when the profile does not exist.
    pub async fn update_paid_tier_score(
        &self,
        profile_id: Uuid,
        has_paid_tier: bool,
    ) -> Result<Option<i32>, AppError> {
        let Some(stored) = self.repo.stored_score(profile_id).await? else {
            return Ok(None);
        };

        if let (Some(score), Some(mut breakdown)) = (stored.score, stored.breakdown) {
            if breakdown.is_current() {
                let points = paid_tier_points(has_paid_tier);
                if breakdown.paid_tier == points {
                    tracing::debug!("Paid tier unchanged for {}", profile_id);
                    return Ok(Some(score));
                }

                breakdown.paid_tier = points;
                breakdown.meta.calculated_at = Utc::now();
                let new_score = breakdown.total();
                self.repo
                    .store_paid_tier_adjustment(profile_id, new_score, &breakdown)
                    .await?;

                tracing::info!(
                    "Paid tier adjusted for {}: {} -> {}",
                    profile_id,
                    score,
                    new_score
                );
                return Ok(Some(new_score));
            }
        }

        let Some(mut input) = self.repo.load_input(profile_id).await? else {
            return Ok(None);
        };
        input.has_paid_tier = has_paid_tier;
        let result = calculate_fit_score(&input, Utc::now());
        self.repo.store_score(profile_id, &result).await?;

        Ok(Some(result.score))
    }
}
