/// Full router stack: rate-limit middleware, body limit, and the health bypass.
/// No route exercised here reaches the database, so the pool is never opened.
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use creator_profile_api::config::{Config, DEFAULT_DNS_RESOLVER_URL};
use creator_profile_api::db_storage::{
    PgFitScoreRepository, PgSocialLinkRepository, PixelStorage, TippingStorage,
};
use creator_profile_api::dns_client::DohTxtResolver;
use creator_profile_api::fit_score_service::FitScoreService;
use creator_profile_api::handlers::AppState;
use creator_profile_api::rate_limit::{RateLimitConfig, RateLimiter};
use creator_profile_api::routes::{build_router, MAX_BODY_BYTES};
use creator_profile_api::social_links::DomainVerifier;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "admin-token-0123456789";

fn app(api_requests: u32) -> axum::Router {
    let database_url = "postgres://localhost/creator_profiles_unused".to_string();
    let pool = PgPoolOptions::new()
        .connect_lazy(&database_url)
        .expect("lazy pool");
    let config = Config {
        database_url,
        port: 0,
        redis_url: None,
        rate_limit_prefer_redis: false,
        admin_api_token: ADMIN_TOKEN.to_string(),
        dns_resolver_url: DEFAULT_DNS_RESOLVER_URL.to_string(),
        billing: None,
    };
    let limiter = |prefix: &str, limit: u32| {
        Arc::new(RateLimiter::memory_only(RateLimitConfig::from_millis(
            prefix, limit, 3_600_000,
        )))
    };
    let social_links = Arc::new(PgSocialLinkRepository::new(pool.clone()));
    let resolver = Arc::new(DohTxtResolver::new(DEFAULT_DNS_RESOLVER_URL.to_string()).unwrap());

    build_router(Arc::new(AppState {
        db: pool.clone(),
        config,
        fit_scores: FitScoreService::new(Arc::new(PgFitScoreRepository::new(pool.clone()))),
        social_links: social_links.clone(),
        verifier: DomainVerifier::new(social_links, resolver, limiter("test:verify", 5)),
        plan_changes: None,
        api_limiter: limiter("test:api", api_requests),
        billing_limiter: limiter("test:billing", 5),
        tipping: TippingStorage::new(pool.clone()),
        pixels: PixelStorage::new(pool),
    }))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_api_routes_are_rate_limited_with_headers() {
    let app = app(1);

    let first = app.clone().oneshot(get("/api/admin/fit-scores/top")).await.unwrap();
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(first.headers()["x-ratelimit-limit"], "1");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "0");

    let second = app.oneshot(get("/api/admin/fit-scores/top")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("x-ratelimit-reset"));
}

#[tokio::test]
async fn test_health_bypasses_rate_limit() {
    let app = app(1);

    for _ in 0..3 {
        let response = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = app(10);
    let body = vec![b'a'; MAX_BODY_BYTES + 1];

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/dashboard/tipping/venmo")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_LENGTH, body.len())
                .header("x-user-id", "user_1")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
