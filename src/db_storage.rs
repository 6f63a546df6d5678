use crate::errors::{AppError, ResultExt};
use crate::fit_score::{FitScoreBreakdown, FitScoreInput, FitScoreResult};
use crate::fit_score_service::FitScoreRepository;
use crate::models::{DashboardAccount, FitProfileSummary, ProfileScoringRow, StoredFitScore};
use crate::pixels::PixelSettings;
use crate::social_links::{SocialLink, SocialLinkRepository, VerificationStatus, VerificationUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

const PROFILE_SCORING_COLUMNS: &str = "id, spotify_id, apple_music_id, youtube_music_id, \
     spotify_popularity, genres, ingestion_source_platform, is_pro";

/// Related rows gathered for a batch of profiles.
#[derive(Default)]
struct RelatedRows {
    with_email: HashSet<Uuid>,
    link_platforms: HashMap<Uuid, Vec<String>>,
    verified_platforms: HashMap<Uuid, Vec<String>>,
    latest_release: HashMap<Uuid, DateTime<Utc>>,
}

fn assemble_input(row: ProfileScoringRow, related: &mut RelatedRows) -> FitScoreInput {
    let mut dsp_platforms = related.link_platforms.remove(&row.id).unwrap_or_default();
    if row.apple_music_id.is_some() {
        dsp_platforms.push("apple_music".to_string());
    }
    if row.youtube_music_id.is_some() {
        dsp_platforms.push("youtube_music".to_string());
    }

    FitScoreInput {
        ingestion_source_platform: row.ingestion_source_platform,
        has_paid_tier: row.is_pro,
        spotify_id: row.spotify_id,
        spotify_popularity: row.spotify_popularity,
        genres: row.genres.unwrap_or_default(),
        latest_release_date: related.latest_release.get(&row.id).copied(),
        has_contact_email: related.with_email.contains(&row.id),
        dsp_platforms,
        verified_platforms: related
            .verified_platforms
            .remove(&row.id)
            .unwrap_or_default(),
    }
}

fn group_platforms(rows: Vec<(Uuid, String)>) -> HashMap<Uuid, Vec<String>> {
    let mut grouped: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (id, platform) in rows {
        grouped.entry(id).or_default().push(platform);
    }
    grouped
}

/// Fit-score reads and writes against `creator_profiles` and its related tables.
#[derive(Clone)]
pub struct PgFitScoreRepository {
    pool: PgPool,
}

impl PgFitScoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn related_rows(&self, ids: &[Uuid]) -> Result<RelatedRows, AppError> {
        let with_email: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT creator_profile_id
            FROM creator_contacts
            WHERE creator_profile_id = ANY($1)
              AND is_active = true
              AND email IS NOT NULL AND email <> ''
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("loading contact emails")?;

        let link_platforms: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT creator_profile_id, platform
            FROM social_links
            WHERE creator_profile_id = ANY($1) AND is_visible = true
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("loading social link platforms")?;

        let verified_platforms: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT creator_profile_id, platform
            FROM social_accounts
            WHERE creator_profile_id = ANY($1) AND is_verified = true
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("loading verified accounts")?;

        let latest_release: Vec<(Uuid, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT creator_profile_id, MAX(release_date)
            FROM discog_releases
            WHERE creator_profile_id = ANY($1)
            GROUP BY creator_profile_id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("loading latest releases")?;

        Ok(RelatedRows {
            with_email: with_email.into_iter().map(|(id,)| id).collect(),
            link_platforms: group_platforms(link_platforms),
            verified_platforms: group_platforms(verified_platforms),
            latest_release: latest_release
                .into_iter()
                .filter_map(|(id, date)| date.map(|d| (id, d)))
                .collect(),
        })
    }
}

#[async_trait]
impl FitScoreRepository for PgFitScoreRepository {
    async fn load_input(&self, profile_id: Uuid) -> Result<Option<FitScoreInput>, AppError> {
        Ok(self
            .load_inputs(&[profile_id])
            .await?
            .into_iter()
            .next()
            .map(|(_, input)| input))
    }

    async fn load_inputs(
        &self,
        profile_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, FitScoreInput)>, AppError> {
        if profile_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<ProfileScoringRow> = sqlx::query_as(&format!(
            "SELECT {} FROM creator_profiles WHERE id = ANY($1) ORDER BY id",
            PROFILE_SCORING_COLUMNS
        ))
        .bind(profile_ids)
        .fetch_all(&self.pool)
        .await
        .context("loading profiles for scoring")?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut related = self.related_rows(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, assemble_input(row, &mut related)))
            .collect())
    }

    async fn store_score(&self, profile_id: Uuid, result: &FitScoreResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE creator_profiles
            SET fit_score = $2,
                fit_score_breakdown = $3,
                fit_score_updated_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(profile_id)
        .bind(result.score)
        .bind(serde_json::to_value(&result.breakdown)?)
        .execute(&self.pool)
        .await
        .context("storing fit score")?;

        Ok(())
    }

    async fn store_scores(&self, results: &[(Uuid, FitScoreResult)]) -> Result<u64, AppError> {
        if results.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(results.len());
        let mut scores = Vec::with_capacity(results.len());
        let mut breakdowns = Vec::with_capacity(results.len());
        for (id, result) in results {
            ids.push(*id);
            scores.push(result.score);
            breakdowns.push(serde_json::to_string(&result.breakdown)?);
        }

        let updated = sqlx::query(
            r#"
            UPDATE creator_profiles AS p
            SET fit_score = v.score,
                fit_score_breakdown = v.breakdown::jsonb,
                fit_score_updated_at = now(),
                updated_at = now()
            FROM UNNEST($1::uuid[], $2::int4[], $3::text[]) AS v(id, score, breakdown)
            WHERE p.id = v.id
            "#,
        )
        .bind(&ids)
        .bind(&scores)
        .bind(&breakdowns)
        .execute(&self.pool)
        .await
        .context("storing fit score batch")?;

        Ok(updated.rows_affected())
    }

    async fn missing_score_ids(&self, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM creator_profiles WHERE fit_score IS NULL ORDER BY created_at, id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("finding profiles without a fit score")?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn unclaimed_ids_after(
        &self,
        cursor: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM creator_profiles
            WHERE is_claimed = false
              AND ($1::uuid IS NULL OR id > $1)
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(cursor)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("paging unclaimed profiles")?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn top_profiles(
        &self,
        limit: i64,
        min_score: i32,
    ) -> Result<Vec<FitProfileSummary>, AppError> {
        let rows = sqlx::query_as::<_, FitProfileSummary>(
            r#"
            SELECT id, username, display_name, spotify_id, fit_score,
                   fit_score_breakdown, fit_score_updated_at
            FROM creator_profiles
            WHERE is_claimed = false
              AND fit_score IS NOT NULL
              AND fit_score >= $2
            ORDER BY fit_score DESC, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(min_score)
        .fetch_all(&self.pool)
        .await
        .context("loading top fit profiles")?;

        Ok(rows)
    }

    async fn stored_score(&self, profile_id: Uuid) -> Result<Option<StoredFitScore>, AppError> {
        let row: Option<(Uuid, Option<i32>, Option<serde_json::Value>)> = sqlx::query_as(
            "SELECT id, fit_score, fit_score_breakdown FROM creator_profiles WHERE id = $1",
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading stored fit score")?;

        Ok(row.map(|(id, score, breakdown)| StoredFitScore {
            profile_id: id,
            score,
            breakdown: breakdown.and_then(|b| serde_json::from_value(b).ok()),
        }))
    }

    async fn store_paid_tier_adjustment(
        &self,
        profile_id: Uuid,
        score: i32,
        breakdown: &FitScoreBreakdown,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE creator_profiles
            SET fit_score = $2,
                fit_score_breakdown = jsonb_set(
                    jsonb_set(fit_score_breakdown, '{paidTier}', to_jsonb($3::int4)),
                    '{meta,calculatedAt}', to_jsonb($4::timestamptz)
                ),
                fit_score_updated_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(profile_id)
        .bind(score)
        .bind(breakdown.paid_tier)
        .bind(breakdown.meta.calculated_at)
        .execute(&self.pool)
        .await
        .context("adjusting paid tier score")?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct SocialLinkRow {
    id: Uuid,
    creator_profile_id: Uuid,
    platform: String,
    url: String,
    display_text: Option<String>,
    sort_order: i32,
    is_visible: bool,
    verification_status: String,
    verification_token: Option<String>,
    verified_at: Option<DateTime<Utc>>,
}

impl From<SocialLinkRow> for SocialLink {
    fn from(row: SocialLinkRow) -> Self {
        let status = row.verification_status.parse().unwrap_or_else(|e| {
            tracing::warn!("Social link {}: {}", row.id, e);
            VerificationStatus::Unverified
        });
        SocialLink {
            id: row.id,
            profile_id: row.creator_profile_id,
            platform: row.platform,
            url: row.url,
            display_text: row.display_text,
            sort_order: row.sort_order,
            is_visible: row.is_visible,
            verification_status: status,
            verification_token: row.verification_token,
            verified_at: row.verified_at,
        }
    }
}

const SOCIAL_LINK_COLUMNS: &str = "id, creator_profile_id, platform, url, display_text, \
     sort_order, is_visible, verification_status, verification_token, verified_at";

#[derive(Clone)]
pub struct PgSocialLinkRepository {
    pool: PgPool,
}

impl PgSocialLinkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SocialLinkRepository for PgSocialLinkRepository {
    async fn list_links(&self, profile_id: Uuid) -> Result<Vec<SocialLink>, AppError> {
        let rows: Vec<SocialLinkRow> = sqlx::query_as(&format!(
            "SELECT {} FROM social_links WHERE creator_profile_id = $1 ORDER BY sort_order, created_at",
            SOCIAL_LINK_COLUMNS
        ))
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await
        .context("listing social links")?;

        Ok(rows.into_iter().map(SocialLink::from).collect())
    }

    /// Deletes links missing from the new set and upserts the rest in one transaction.
    async fn replace_links(&self, profile_id: Uuid, links: &[SocialLink]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.context("starting link transaction")?;

        let keep: Vec<Uuid> = links.iter().map(|l| l.id).collect();
        sqlx::query("DELETE FROM social_links WHERE creator_profile_id = $1 AND NOT (id = ANY($2))")
            .bind(profile_id)
            .bind(&keep)
            .execute(&mut *tx)
            .await
            .context("removing dropped links")?;

        for link in links {
            sqlx::query(
                r#"
                INSERT INTO social_links (
                    id, creator_profile_id, platform, url, display_text, sort_order,
                    is_visible, verification_status, verification_token, verified_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE
                SET platform = EXCLUDED.platform,
                    url = EXCLUDED.url,
                    display_text = EXCLUDED.display_text,
                    sort_order = EXCLUDED.sort_order,
                    is_visible = EXCLUDED.is_visible,
                    verification_status = EXCLUDED.verification_status,
                    verification_token = EXCLUDED.verification_token,
                    verified_at = EXCLUDED.verified_at,
                    verified_domain = CASE
                        WHEN EXCLUDED.verification_status = 'verified' THEN social_links.verified_domain
                        ELSE NULL
                    END,
                    updated_at = now()
                WHERE social_links.creator_profile_id = EXCLUDED.creator_profile_id
                "#,
            )
            .bind(link.id)
            .bind(profile_id)
            .bind(&link.platform)
            .bind(&link.url)
            .bind(&link.display_text)
            .bind(link.sort_order)
            .bind(link.is_visible)
            .bind(link.verification_status.as_str())
            .bind(&link.verification_token)
            .bind(link.verified_at)
            .execute(&mut *tx)
            .await
            .context("upserting social link")?;
        }

        tx.commit().await.context("committing link transaction")?;
        Ok(())
    }

    async fn get_link(
        &self,
        profile_id: Uuid,
        link_id: Uuid,
    ) -> Result<Option<SocialLink>, AppError> {
        let row: Option<SocialLinkRow> = sqlx::query_as(&format!(
            "SELECT {} FROM social_links WHERE id = $1 AND creator_profile_id = $2",
            SOCIAL_LINK_COLUMNS
        ))
        .bind(link_id)
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading social link")?;

        Ok(row.map(SocialLink::from))
    }

    async fn update_verification(
        &self,
        link_id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE social_links
            SET verification_status = $2,
                verification_token = $3,
                verified_domain = $4,
                verified_at = $5,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(link_id)
        .bind(update.status.as_str())
        .bind(&update.token)
        .bind(&update.verified_domain)
        .bind(update.verified_at)
        .execute(&self.pool)
        .await
        .context("updating link verification")?;

        Ok(())
    }

    async fn domain_claimed_by_other(
        &self,
        domain: &str,
        profile_id: Uuid,
    ) -> Result<bool, AppError> {
        let (claimed,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM social_links
                WHERE verified_domain = $1
                  AND verification_status = 'verified'
                  AND creator_profile_id <> $2
            )
            "#,
        )
        .bind(domain)
        .bind(profile_id)
        .fetch_one(&self.pool)
        .await
        .context("checking domain claims")?;

        Ok(claimed)
    }

    /// Serializes claims per domain with a transaction-scoped advisory lock,
    /// then writes `verified` only while no other profile holds the domain.
    async fn claim_verified_domain(
        &self,
        profile_id: Uuid,
        link_id: Uuid,
        domain: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await.context("starting domain claim")?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(domain)
            .execute(&mut *tx)
            .await
            .context("locking verified domain")?;

        let result = sqlx::query(
            r#"
            UPDATE social_links
            SET verification_status = 'verified',
                verified_domain = $3,
                verified_at = $4,
                updated_at = now()
            WHERE id = $1
              AND creator_profile_id = $2
              AND NOT EXISTS (
                  SELECT 1 FROM social_links other
                  WHERE other.verified_domain = $3
                    AND other.verification_status = 'verified'
                    AND other.creator_profile_id <> $2
              )
            "#,
        )
        .bind(link_id)
        .bind(profile_id)
        .bind(domain)
        .bind(verified_at)
        .execute(&mut *tx)
        .await
        .context("claiming verified domain")?;

        tx.commit().await.context("committing domain claim")?;
        Ok(result.rows_affected() == 1)
    }
}

/// Tipping handle column on `creator_profiles`.
#[derive(Clone)]
pub struct TippingStorage {
    pool: PgPool,
}

impl TippingStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn update_venmo_handle(
        &self,
        profile_id: Uuid,
        handle: Option<&str>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE creator_profiles SET venmo_handle = $2, updated_at = now() WHERE id = $1",
        )
        .bind(profile_id)
        .bind(handle)
        .execute(&self.pool)
        .await
        .context("updating venmo handle")?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Profile {} not found", profile_id)));
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct PixelRow {
    facebook_pixel_id: Option<String>,
    facebook_access_token: Option<String>,
    google_measurement_id: Option<String>,
    google_ads_conversion_id: Option<String>,
    tiktok_pixel_id: Option<String>,
    enabled: bool,
}

/// One `creator_pixel_settings` row per profile.
#[derive(Clone)]
pub struct PixelStorage {
    pool: PgPool,
}

impl PixelStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, profile_id: Uuid) -> Result<Option<PixelSettings>, AppError> {
        let row: Option<PixelRow> = sqlx::query_as(
            r#"
            SELECT facebook_pixel_id, facebook_access_token, google_measurement_id,
                   google_ads_conversion_id, tiktok_pixel_id, enabled
            FROM creator_pixel_settings
            WHERE creator_profile_id = $1
            "#,
        )
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .context("loading pixel settings")?;

        Ok(row.map(|r| PixelSettings {
            facebook_pixel_id: r.facebook_pixel_id,
            facebook_access_token: r.facebook_access_token,
            google_measurement_id: r.google_measurement_id,
            google_ads_conversion_id: r.google_ads_conversion_id,
            tiktok_pixel_id: r.tiktok_pixel_id,
            enabled: r.enabled,
        }))
    }

    /// Upserts settings. A `None` access token keeps the stored token.
    pub async fn upsert(&self, profile_id: Uuid, settings: &PixelSettings) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO creator_pixel_settings (
                creator_profile_id, facebook_pixel_id, facebook_access_token,
                google_measurement_id, google_ads_conversion_id, tiktok_pixel_id, enabled
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (creator_profile_id) DO UPDATE
            SET facebook_pixel_id = EXCLUDED.facebook_pixel_id,
                facebook_access_token = COALESCE(EXCLUDED.facebook_access_token, creator_pixel_settings.facebook_access_token),
                google_measurement_id = EXCLUDED.google_measurement_id,
                google_ads_conversion_id = EXCLUDED.google_ads_conversion_id,
                tiktok_pixel_id = EXCLUDED.tiktok_pixel_id,
                enabled = EXCLUDED.enabled,
                updated_at = now()
            "#,
        )
        .bind(profile_id)
        .bind(&settings.facebook_pixel_id)
        .bind(&settings.facebook_access_token)
        .bind(&settings.google_measurement_id)
        .bind(&settings.google_ads_conversion_id)
        .bind(&settings.tiktok_pixel_id)
        .bind(settings.enabled)
        .execute(&self.pool)
        .await
        .context("saving pixel settings")?;

        Ok(())
    }

    pub async fn delete(&self, profile_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM creator_pixel_settings WHERE creator_profile_id = $1")
            .bind(profile_id)
            .execute(&self.pool)
            .await
            .context("deleting pixel settings")?;

        Ok(result.rows_affected() > 0)
    }
}

/// Maps an identity-provider user id to its creator profile and billing customer.
pub async fn find_dashboard_account(
    pool: &PgPool,
    user_id: &str,
) -> Result<Option<DashboardAccount>, AppError> {
    let account = sqlx::query_as::<_, DashboardAccount>(
        r#"
        SELECT u.id AS user_id, p.id AS profile_id, u.billing_customer_id
        FROM users u
        JOIN creator_profiles p ON p.user_id = u.id
        WHERE u.id = $1
        ORDER BY p.created_at
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("resolving dashboard account")?;

    Ok(account)
}
