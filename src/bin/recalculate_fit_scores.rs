//! Cron entry point for fit-score maintenance.
//!
//! Usage: `recalculate_fit_scores [all|missing] [size]`
//!
//! - `all` recomputes every unclaimed profile in pages of `size` (default 100).
//! - `missing` scores up to `size` profiles that have never been scored.

use creator_profile_api::db::Database;
use creator_profile_api::db_storage::PgFitScoreRepository;
use creator_profile_api::fit_score_service::{
    FitScoreService, DEFAULT_BATCH_SIZE, DEFAULT_MISSING_LIMIT,
};
use dotenvy::dotenv;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "missing".to_string());
    let size: Option<i64> = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .map_err(|_| "size must be a positive integer")?;

    let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
    let db = Database::with_max_connections(&database_url, 5).await?;
    let service = FitScoreService::new(Arc::new(PgFitScoreRepository::new(db.pool.clone())));

    tracing::info!("Connected to database. Running fit-score job '{}'", mode);

    let processed = match mode.as_str() {
        "all" => {
            service
                .recalculate_all_fit_scores(size.unwrap_or(DEFAULT_BATCH_SIZE))
                .await?
        }
        "missing" => {
            service
                .calculate_missing_fit_scores(size.unwrap_or(DEFAULT_MISSING_LIMIT))
                .await?
        }
        other => {
            return Err(format!("unknown mode '{}', expected 'all' or 'missing'", other).into());
        }
    };

    tracing::info!("Fit-score job '{}' complete. Processed {} profiles.", mode, processed);

    Ok(())
}
