use crate::config::Config;
use crate::db_storage::{find_dashboard_account, PixelStorage, TippingStorage};
use crate::errors::AppError;
use crate::fit_score::FitScoreResult;
use crate::fit_score_service::{FitScoreService, DEFAULT_BATCH_SIZE, DEFAULT_MISSING_LIMIT};
use crate::models::*;
use crate::pixels::PixelSettings;
use crate::plan_change::{PlanChangeOutcome, PlanChangeService, PreviewOutcome};
use crate::rate_limit::{rate_limit_headers, RateLimiter};
use crate::social_links::{
    save_social_links, DomainVerificationError, DomainVerifier, SocialLink, SocialLinkInput,
    SocialLinkRepository,
};
use crate::tipping::{normalize_venmo_handle, venmo_pay_url};
use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const USER_ID_HEADER: &str = "x-user-id";
const DEFAULT_TOP_LIMIT: i64 = 50;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    pub fit_scores: FitScoreService,
    pub social_links: Arc<dyn SocialLinkRepository>,
    pub verifier: DomainVerifier,
    /// `None` when no billing provider is configured.
    pub plan_changes: Option<PlanChangeService>,
    /// General API limiter applied as middleware to `/api` routes.
    pub api_limiter: Arc<RateLimiter>,
    /// Per-customer limiter for billing mutations.
    pub billing_limiter: Arc<RateLimiter>,
    pub tipping: TippingStorage,
    pub pixels: PixelStorage,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "creator-profile-api",
            "version": env!("CARGO_PKG_VERSION"),
            "rateLimitBackend": state.api_limiter.backend(),
            "billingEnabled": state.plan_changes.is_some(),
        })),
    )
}

// ============ Auth ============

/// Resolves the signed-in creator from the `x-user-id` header set by the auth proxy.
async fn require_dashboard_account(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<DashboardAccount, AppError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing x-user-id header".to_string()))?;

    find_dashboard_account(&state.db, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No creator profile for this account".to_string()))
}

/// Validates `Authorization: Bearer <ADMIN_API_TOKEN>`.
fn validate_admin_token(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    if !constant_time_compare(token.trim(), &state.config.admin_api_token) {
        tracing::warn!("Invalid admin token received");
        return Err(AppError::Unauthorized("Invalid admin token".to_string()));
    }

    Ok(())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

// ============ Rate limiting ============

fn client_identifier(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Consumes one request from the API limiter and stamps `X-RateLimit-*` headers.
pub async fn api_rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = client_identifier(request.headers());
    let result = state.api_limiter.limit(&identifier).await;
    let headers = rate_limit_headers(&result);

    if !result.success {
        tracing::warn!("API rate limit exceeded for {}", identifier);
        let retry_after_secs = result.retry_after_secs(chrono::Utc::now().timestamp_millis());
        let mut response = AppError::RateLimited { retry_after_secs }.into_response();
        response.headers_mut().extend(headers);
        return response;
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(headers);
    response
}

async fn enforce_billing_limit(state: &AppState, customer_id: &str) -> Result<(), AppError> {
    let result = state.billing_limiter.limit(customer_id).await;
    if result.success {
        return Ok(());
    }
    tracing::warn!("Billing rate limit exceeded for {}", customer_id);
    Err(AppError::RateLimited {
        retry_after_secs: result.retry_after_secs(chrono::Utc::now().timestamp_millis()),
    })
}

// ============ Tipping ============

/// PUT /api/dashboard/tipping/venmo
pub async fn update_venmo_handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<VenmoHandleRequest>,
) -> Result<Json<VenmoHandleResponse>, AppError> {
    let account = require_dashboard_account(&state, &headers).await?;

    let handle = normalize_venmo_handle(payload.handle.as_deref().unwrap_or_default())
        .map_err(AppError::BadRequest)?;
    state
        .tipping
        .update_venmo_handle(account.profile_id, handle.as_deref())
        .await?;

    tracing::info!(
        "Venmo handle {} for profile {}",
        if handle.is_some() { "set" } else { "cleared" },
        account.profile_id
    );

    Ok(Json(VenmoHandleResponse {
        success: true,
        venmo_url: handle.as_deref().map(venmo_pay_url),
        venmo_handle: handle,
    }))
}

// ============ Pixels ============

/// GET /api/dashboard/pixels
pub async fn get_pixel_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PixelSettings>, AppError> {
    let account = require_dashboard_account(&state, &headers).await?;
    let settings = state.pixels.get(account.profile_id).await?.unwrap_or_default();
    Ok(Json(settings.masked()))
}

/// PUT /api/dashboard/pixels
///
/// A masked access token echoed back by the form keeps the stored token.
pub async fn save_pixel_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut payload): Json<PixelSettings>,
) -> Result<Json<PixelSettings>, AppError> {
    let account = require_dashboard_account(&state, &headers).await?;

    if payload
        .facebook_access_token
        .as_deref()
        .is_some_and(|t| t.starts_with('•'))
    {
        payload.facebook_access_token = None;
    }

    let settings = payload
        .normalized()
        .map_err(|errors| AppError::BadRequest(errors.join("; ")))?;
    state.pixels.upsert(account.profile_id, &settings).await?;

    tracing::info!("Pixel settings saved for profile {}", account.profile_id);
    let stored = state.pixels.get(account.profile_id).await?.unwrap_or(settings);
    Ok(Json(stored.masked()))
}

/// DELETE /api/dashboard/pixels
pub async fn delete_pixel_settings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let account = require_dashboard_account(&state, &headers).await?;
    if state.pixels.delete(account.profile_id).await? {
        tracing::info!("Pixel settings deleted for profile {}", account.profile_id);
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Social links ============

#[derive(Debug, Deserialize)]
pub struct SaveSocialLinksRequest {
    pub links: Vec<SocialLinkInput>,
}

/// PUT /api/dashboard/social-links
pub async fn update_social_links(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SaveSocialLinksRequest>,
) -> Result<Json<Vec<SocialLink>>, AppError> {
    let account = require_dashboard_account(&state, &headers).await?;
    let links =
        save_social_links(state.social_links.as_ref(), account.profile_id, payload.links).await?;
    Ok(Json(links))
}

fn verification_error_response(error: DomainVerificationError, txt_record: Option<String>) -> Response {
    let status = match error {
        DomainVerificationError::DnsNotFound => StatusCode::UNPROCESSABLE_ENTITY,
        DomainVerificationError::DomainAlreadyClaimed => StatusCode::CONFLICT,
        DomainVerificationError::InvalidUrl => StatusCode::BAD_REQUEST,
        DomainVerificationError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        DomainVerificationError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut body = json!({
        "success": false,
        "code": error.code(),
        "error": error.user_message(),
    });
    if let Some(record) = txt_record {
        body["txtRecord"] = json!(record);
    }
    (status, Json(body)).into_response()
}

/// POST /api/dashboard/social-links/:id/verify
///
/// Issues a token on first call and checks DNS on every call. A miss carries
/// the TXT record the owner still has to publish.
pub async fn verify_social_link(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(link_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let account = require_dashboard_account(&state, &headers).await?;

    match state
        .verifier
        .verify_social_link(account.profile_id, link_id)
        .await
    {
        Ok(Some(link)) => Ok(Json(json!({
            "success": true,
            "link": link,
        }))
        .into_response()),
        Ok(None) => Err(AppError::NotFound(format!("Link {} not found", link_id))),
        Err(DomainVerificationError::DnsNotFound) => {
            let record = state
                .social_links
                .get_link(account.profile_id, link_id)
                .await?
                .and_then(|l| l.expected_txt_record());
            Ok(verification_error_response(
                DomainVerificationError::DnsNotFound,
                record,
            ))
        }
        Err(e) => Ok(verification_error_response(e, None)),
    }
}

// ============ Billing ============

fn plan_service(state: &AppState) -> Result<&PlanChangeService, AppError> {
    state
        .plan_changes
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Billing is not configured".to_string()))
}

fn billing_customer(account: &DashboardAccount) -> Result<&str, AppError> {
    account
        .billing_customer_id
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("No billing account found".to_string()))
}

fn outcome_status(success: bool) -> StatusCode {
    if success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// GET /api/billing/plan-change/preview?priceId=
pub async fn preview_plan_change(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<PlanPreviewParams>,
) -> Result<(StatusCode, Json<PreviewOutcome>), AppError> {
    let service = plan_service(&state)?;
    let account = require_dashboard_account(&state, &headers).await?;
    let customer_id = billing_customer(&account)?;

    let outcome = service.preview_plan_change(customer_id, &params.price_id).await;
    Ok((outcome_status(outcome.success), Json(outcome)))
}

/// POST /api/billing/plan-change
pub async fn execute_plan_change(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<PlanChangeRequest>,
) -> Result<(StatusCode, Json<PlanChangeOutcome>), AppError> {
    let service = plan_service(&state)?;
    let account = require_dashboard_account(&state, &headers).await?;
    let customer_id = billing_customer(&account)?;
    enforce_billing_limit(&state, customer_id).await?;

    let outcome = service
        .execute_plan_change(customer_id, &payload.price_id, payload.immediate)
        .await;
    if outcome.success {
        tracing::info!(
            "Plan change for {}: scheduled={} subscription={:?}",
            customer_id,
            outcome.scheduled,
            outcome.subscription_id
        );
    }
    Ok((outcome_status(outcome.success), Json(outcome)))
}

/// DELETE /api/billing/plan-change
pub async fn cancel_plan_change(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<PlanChangeOutcome>), AppError> {
    let service = plan_service(&state)?;
    let account = require_dashboard_account(&state, &headers).await?;
    let customer_id = billing_customer(&account)?;
    enforce_billing_limit(&state, customer_id).await?;

    let outcome = service.cancel_scheduled_plan_change(customer_id).await;
    Ok((outcome_status(outcome.success), Json(outcome)))
}

// ============ Admin: fit scores ============

/// POST /api/admin/fit-scores/:profile_id
pub async fn calculate_fit_score(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(profile_id): Path<Uuid>,
) -> Result<Json<FitScoreResult>, AppError> {
    validate_admin_token(&state, &headers)?;

    state
        .fit_scores
        .calculate_and_store_fit_score(profile_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", profile_id)))
}

/// POST /api/admin/fit-scores/missing?limit=
pub async fn calculate_missing_fit_scores(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FitScoreBatchParams>,
) -> Result<Json<ProcessedResponse>, AppError> {
    validate_admin_token(&state, &headers)?;

    let processed = state
        .fit_scores
        .calculate_missing_fit_scores(params.limit.unwrap_or(DEFAULT_MISSING_LIMIT))
        .await?;
    Ok(Json(ProcessedResponse { processed }))
}

/// POST /api/admin/fit-scores/recalculate?batchSize=
pub async fn recalculate_fit_scores(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<FitScoreBatchParams>,
) -> Result<Json<ProcessedResponse>, AppError> {
    validate_admin_token(&state, &headers)?;

    let processed = state
        .fit_scores
        .recalculate_all_fit_scores(params.batch_size.unwrap_or(DEFAULT_BATCH_SIZE))
        .await?;
    Ok(Json(ProcessedResponse { processed }))
}

/// GET /api/admin/fit-scores/top?limit=&minScore=
pub async fn top_fit_profiles(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<TopFitProfilesParams>,
) -> Result<Json<Vec<FitProfileSummary>>, AppError> {
    validate_admin_token(&state, &headers)?;

    let profiles = state
        .fit_scores
        .get_top_fit_profiles(
            params.limit.unwrap_or(DEFAULT_TOP_LIMIT),
            params.min_score.unwrap_or(0),
        )
        .await?;
    Ok(Json(profiles))
}

/// PUT /api/admin/profiles/:id/paid-tier
///
/// Billing webhooks call this after a subscription changes so the stored
/// fit score follows the new tier.
pub async fn update_paid_tier(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(profile_id): Path<Uuid>,
    Json(payload): Json<PaidTierRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_admin_token(&state, &headers)?;

    let score = state
        .fit_scores
        .update_paid_tier_score(profile_id, payload.has_paid_tier)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Profile {} not found", profile_id)))?;

    Ok(Json(json!({
        "profileId": profile_id,
        "hasPaidTier": payload.has_paid_tier,
        "fitScore": score,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abcdef", "abcdef"));
        assert!(!constant_time_compare("abcdef", "abcdeg"));
        assert!(!constant_time_compare("abc", "abcdef"));
    }

    #[test]
    fn test_client_identifier_prefers_user_then_forwarded_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers), "anonymous");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_identifier(&headers), "203.0.113.7");

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("user_123"));
        assert_eq!(client_identifier(&headers), "user_123");
    }

    #[test]
    fn test_verification_error_status_codes() {
        let cases = [
            (DomainVerificationError::DnsNotFound, StatusCode::UNPROCESSABLE_ENTITY),
            (DomainVerificationError::DomainAlreadyClaimed, StatusCode::CONFLICT),
            (DomainVerificationError::InvalidUrl, StatusCode::BAD_REQUEST),
            (DomainVerificationError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (DomainVerificationError::ServerError, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(verification_error_response(error, None).status(), status);
        }
    }
}
