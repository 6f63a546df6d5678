use serde::Deserialize;

/// Default DNS-over-HTTPS endpoint used for domain verification lookups.
pub const DEFAULT_DNS_RESOLVER_URL: &str = "https://cloudflare-dns.com/dns-query";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub rate_limit_prefer_redis: bool,
    pub admin_api_token: String,
    pub dns_resolver_url: String,
    pub billing: Option<BillingConfig>,
}

/// Stripe credentials and the price ids the dashboard sells.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub secret_key: String,
    pub api_base: String,
    pub pro_monthly_price_id: Option<String>,
    pub pro_yearly_price_id: Option<String>,
    pub growth_monthly_price_id: Option<String>,
    pub growth_yearly_price_id: Option<String>,
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn require_http_url(name: &str, url: String) -> anyhow::Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            redis_url: optional_var("REDIS_URL")
                .map(|url| {
                    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                        anyhow::bail!("REDIS_URL must start with redis:// or rediss://");
                    }
                    Ok(url)
                })
                .transpose()?,
            rate_limit_prefer_redis: match optional_var("RATE_LIMIT_PREFER_REDIS") {
                None => true,
                Some(v) => v
                    .parse()
                    .map_err(|_| anyhow::anyhow!("RATE_LIMIT_PREFER_REDIS must be true or false"))?,
            },
            admin_api_token: std::env::var("ADMIN_API_TOKEN")
                .map_err(|_| anyhow::anyhow!("ADMIN_API_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().len() < 16 {
                        anyhow::bail!("ADMIN_API_TOKEN must be at least 16 characters");
                    }
                    Ok(token)
                })?,
            dns_resolver_url: require_http_url(
                "DNS_RESOLVER_URL",
                optional_var("DNS_RESOLVER_URL")
                    .unwrap_or_else(|| DEFAULT_DNS_RESOLVER_URL.to_string()),
            )?,
            billing: match optional_var("STRIPE_SECRET_KEY") {
                None => None,
                Some(secret_key) => Some(BillingConfig {
                    secret_key,
                    api_base: require_http_url(
                        "STRIPE_API_BASE",
                        optional_var("STRIPE_API_BASE")
                            .unwrap_or_else(|| "https://api.stripe.com".to_string()),
                    )?,
                    pro_monthly_price_id: optional_var("STRIPE_PRICE_PRO_MONTHLY"),
                    pro_yearly_price_id: optional_var("STRIPE_PRICE_PRO_YEARLY"),
                    growth_monthly_price_id: optional_var("STRIPE_PRICE_GROWTH_MONTHLY"),
                    growth_yearly_price_id: optional_var("STRIPE_PRICE_GROWTH_YEARLY"),
                }),
            },
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        match config.redis_url {
            Some(_) => tracing::info!(
                "Redis configured (prefer_redis = {})",
                config.rate_limit_prefer_redis
            ),
            None => tracing::warn!("REDIS_URL not set; rate limiting will use in-memory windows"),
        }
        match config.billing {
            Some(ref billing) => tracing::debug!("Stripe API base: {}", billing.api_base),
            None => tracing::warn!("STRIPE_SECRET_KEY not set; billing routes are disabled"),
        }
        tracing::debug!("DNS resolver: {}", config.dns_resolver_url);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
