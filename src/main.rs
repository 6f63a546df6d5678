use std::sync::Arc;

use creator_profile_api::billing_client::StripeBillingClient;
use creator_profile_api::config::Config;
use creator_profile_api::db::Database;
use creator_profile_api::db_storage::{
    PgFitScoreRepository, PgSocialLinkRepository, PixelStorage, TippingStorage,
};
use creator_profile_api::dns_client::DohTxtResolver;
use creator_profile_api::fit_score_service::FitScoreService;
use creator_profile_api::handlers::AppState;
use creator_profile_api::obs;
use creator_profile_api::plan_change::{PlanChangeService, PriceCatalog};
use creator_profile_api::rate_limit::{
    DistributedCounter, RateLimitConfig, RateLimiter, RedisCounter,
};
use creator_profile_api::routes;
use creator_profile_api::social_links::DomainVerifier;

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the database pool, the optional Redis
/// counter store and billing client, then serves the HTTP routes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    obs::init_tracing("creator_profile_api=debug,tower_http=debug");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Redis is optional; limiters fall back to in-process windows without it
    let redis: Option<Arc<dyn DistributedCounter>> = match config.redis_url {
        Some(ref url) => match RedisCounter::connect(url).await {
            Ok(counter) => {
                tracing::info!("✓ Redis counter store connected");
                Some(Arc::new(counter) as Arc<dyn DistributedCounter>)
            }
            Err(e) => {
                tracing::warn!("Redis unavailable, rate limiting in memory: {}", e);
                None
            }
        },
        None => None,
    };

    let prefer_redis = config.rate_limit_prefer_redis;
    let limiter = |preset: RateLimitConfig| {
        Arc::new(RateLimiter::new(preset.prefer_redis(prefer_redis), redis.clone()))
    };
    let api_limiter = limiter(RateLimitConfig::api());
    let billing_limiter = limiter(RateLimitConfig::billing());
    let verification_limiter = limiter(RateLimitConfig::domain_verification());

    let resolver = Arc::new(DohTxtResolver::new(config.dns_resolver_url.clone())?);

    let plan_changes = match config.billing {
        Some(ref billing) => {
            let client =
                StripeBillingClient::new(billing.api_base.clone(), billing.secret_key.clone())?;
            let catalog = PriceCatalog::from_config(billing);
            if catalog.is_empty() {
                tracing::warn!("No STRIPE_PRICE_* ids configured; every plan change will be rejected");
            }
            tracing::info!("✓ Billing client initialized ({} prices)", catalog.len());
            Some(PlanChangeService::new(Arc::new(client), catalog))
        }
        None => None,
    };

    let social_links = Arc::new(PgSocialLinkRepository::new(db.pool.clone()));

    // Build application state
    let app_state = Arc::new(AppState {
        db: db.pool.clone(),
        config: config.clone(),
        fit_scores: FitScoreService::new(Arc::new(PgFitScoreRepository::new(db.pool.clone()))),
        social_links: social_links.clone(),
        verifier: DomainVerifier::new(social_links, resolver, verification_limiter),
        plan_changes,
        api_limiter,
        billing_limiter,
        tipping: TippingStorage::new(db.pool.clone()),
        pixels: PixelStorage::new(db.pool.clone()),
    });

    let app = routes::build_router(app_state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
