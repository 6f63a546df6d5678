//! Social links and domain-ownership verification.
//!
//! Links are saved as an ordered set per profile. Website links can be
//! verified by publishing a `profile-verification=<token>` TXT record on the
//! link's domain. A verified domain belongs to one profile only.

use crate::dns_client::TxtResolver;
use crate::errors::AppError;
use crate::obs::{capture_error, ErrorContext};
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

pub const MAX_LINKS_PER_PROFILE: usize = 50;
pub const TXT_RECORD_PREFIX: &str = "profile-verification=";
const MAX_URL_LENGTH: usize = 2048;
const MAX_DISPLAY_TEXT_LENGTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    Error,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Error => "error",
        }
    }

    pub fn can_transition_to(&self, next: VerificationStatus) -> bool {
        use VerificationStatus::*;
        matches!(
            (self, next),
            (Unverified, Pending)
                | (Pending, Verified)
                | (Pending, Error)
                | (Error, Pending)
                | (Error, Verified)
                | (Error, Error)
                | (Pending, Pending)
        )
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unverified" => Ok(VerificationStatus::Unverified),
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "error" => Ok(VerificationStatus::Error),
            other => Err(format!("unknown verification status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialLink {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub platform: String,
    pub url: String,
    pub display_text: Option<String>,
    pub sort_order: i32,
    pub is_visible: bool,
    pub verification_status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl SocialLink {
    /// TXT record value the owner must publish.
    pub fn expected_txt_record(&self) -> Option<String> {
        self.verification_token
            .as_ref()
            .map(|token| format!("{}{}", TXT_RECORD_PREFIX, token))
    }
}

/// One entry of a socials-form submission. Position in the list is the sort order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialLinkInput {
    pub id: Option<Uuid>,
    pub url: String,
    pub platform: Option<String>,
    pub display_text: Option<String>,
    pub is_visible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationUpdate {
    pub status: VerificationStatus,
    pub token: Option<String>,
    pub verified_domain: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SocialLinkRepository: Send + Sync {
    async fn list_links(&self, profile_id: Uuid) -> Result<Vec<SocialLink>, AppError>;

    /// Replaces the profile's whole link set.
    async fn replace_links(&self, profile_id: Uuid, links: &[SocialLink]) -> Result<(), AppError>;

    async fn get_link(&self, profile_id: Uuid, link_id: Uuid)
        -> Result<Option<SocialLink>, AppError>;

    async fn update_verification(
        &self,
        link_id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<(), AppError>;

    /// Whether another profile holds a verified link on `domain`.
    async fn domain_claimed_by_other(
        &self,
        domain: &str,
        profile_id: Uuid,
    ) -> Result<bool, AppError>;

    /// Marks the link verified on `domain` unless another profile holds it.
    /// The ownership check and the write happen atomically. Returns `false`
    /// when the domain is already claimed.
    async fn claim_verified_domain(
        &self,
        profile_id: Uuid,
        link_id: Uuid,
        domain: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

/// Classified verification failures. Codes are part of the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DomainVerificationError {
    #[error("verification record not found")]
    DnsNotFound,
    #[error("domain already claimed by another profile")]
    DomainAlreadyClaimed,
    #[error("invalid url")]
    InvalidUrl,
    #[error("too many verification attempts")]
    RateLimited,
    #[error("verification failed")]
    ServerError,
}

impl DomainVerificationError {
    pub fn code(&self) -> &'static str {
        match self {
            DomainVerificationError::DnsNotFound => "dns_not_found",
            DomainVerificationError::DomainAlreadyClaimed => "domain_already_claimed",
            DomainVerificationError::InvalidUrl => "invalid_url",
            DomainVerificationError::RateLimited => "rate_limited",
            DomainVerificationError::ServerError => "server_error",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            DomainVerificationError::DnsNotFound => {
                "We couldn't find the TXT record yet. DNS changes can take up to 48 hours to propagate."
            }
            DomainVerificationError::DomainAlreadyClaimed => {
                "This domain is already verified by another profile."
            }
            DomainVerificationError::InvalidUrl => "This link doesn't have a valid domain to verify.",
            DomainVerificationError::RateLimited => {
                "Too many verification attempts. Please wait and try again."
            }
            DomainVerificationError::ServerError => {
                "Something went wrong while verifying. Please try again."
            }
        }
    }
}

/// Adds a scheme when missing and rejects anything that is not a web URL.
pub fn normalize_link_url(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("URL is required".to_string());
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err("URL is too long".to_string());
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate).map_err(|e| format!("Invalid URL: {}", e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err("Only http and https links are supported".to_string());
    }
    match url.host_str() {
        Some(host) if host.contains('.') => Ok(url),
        _ => Err("URL must include a domain".to_string()),
    }
}

/// Registrable-looking host for verification: lowercase, `www.` stripped.
pub fn extract_domain(raw: &str) -> Option<String> {
    let url = normalize_link_url(raw).ok()?;
    let host = url.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

/// Platform id for a link, `website` when the host is not a known network.
pub fn detect_platform(url: &Url) -> &'static str {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    const PLATFORMS: &[(&str, &str)] = &[
        ("music.youtube.com", "youtube_music"),
        ("music.apple.com", "apple_music"),
        ("music.amazon.com", "amazon_music"),
        ("open.spotify.com", "spotify"),
        ("spotify.com", "spotify"),
        ("instagram.com", "instagram"),
        ("tiktok.com", "tiktok"),
        ("twitter.com", "twitter"),
        ("x.com", "twitter"),
        ("youtube.com", "youtube"),
        ("youtu.be", "youtube"),
        ("soundcloud.com", "soundcloud"),
        ("tidal.com", "tidal"),
        ("deezer.com", "deezer"),
        ("bandcamp.com", "bandcamp"),
        ("audiomack.com", "audiomack"),
        ("facebook.com", "facebook"),
        ("twitch.tv", "twitch"),
        ("threads.net", "threads"),
        ("venmo.com", "venmo"),
    ];

    PLATFORMS
        .iter()
        .find(|(domain, _)| host_matches(host, domain))
        .map(|(_, platform)| *platform)
        .unwrap_or("website")
}

fn generate_verification_token(profile_id: Uuid, link_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(profile_id.as_bytes());
    hasher.update(link_id.as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

/// Validates a socials-form submission and stores it as the profile's link set.
///
/// Links whose url is unchanged keep their verification state. A changed url
/// starts over as unverified.
pub async fn save_social_links(
    repo: &dyn SocialLinkRepository,
    profile_id: Uuid,
    inputs: Vec<SocialLinkInput>,
) -> Result<Vec<SocialLink>, AppError> {
    if inputs.len() > MAX_LINKS_PER_PROFILE {
        return Err(AppError::BadRequest(format!(
            "A profile can have at most {} links",
            MAX_LINKS_PER_PROFILE
        )));
    }

    let existing = repo.list_links(profile_id).await?;
    let mut links: Vec<SocialLink> = Vec::with_capacity(inputs.len());

    for (position, input) in inputs.into_iter().enumerate() {
        let url = normalize_link_url(&input.url)
            .map_err(|e| AppError::BadRequest(format!("Link {}: {}", position + 1, e)))?;
        let url_str = url.to_string();

        if links.iter().any(|l| l.url == url_str) {
            return Err(AppError::BadRequest(format!(
                "Link {}: duplicate URL",
                position + 1
            )));
        }

        let display_text = input
            .display_text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        if display_text
            .as_ref()
            .is_some_and(|t| t.chars().count() > MAX_DISPLAY_TEXT_LENGTH)
        {
            return Err(AppError::BadRequest(format!(
                "Link {}: display text is too long",
                position + 1
            )));
        }

        let platform = input
            .platform
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| detect_platform(&url).to_string());

        let previous = input
            .id
            .and_then(|id| existing.iter().find(|l| l.id == id));

        let link = match previous {
            Some(prev) if prev.url == url_str => SocialLink {
                platform,
                display_text,
                sort_order: position as i32,
                is_visible: input.is_visible.unwrap_or(prev.is_visible),
                ..prev.clone()
            },
            Some(prev) => SocialLink {
                id: prev.id,
                profile_id,
                platform,
                url: url_str,
                display_text,
                sort_order: position as i32,
                is_visible: input.is_visible.unwrap_or(prev.is_visible),
                verification_status: VerificationStatus::Unverified,
                verification_token: None,
                verified_at: None,
            },
            None => SocialLink {
                id: Uuid::new_v4(),
                profile_id,
                platform,
                url: url_str,
                display_text,
                sort_order: position as i32,
                is_visible: input.is_visible.unwrap_or(true),
                verification_status: VerificationStatus::Unverified,
                verification_token: None,
                verified_at: None,
            },
        };
        links.push(link);
    }

    repo.replace_links(profile_id, &links).await?;
    tracing::info!("Saved {} social links for profile {}", links.len(), profile_id);
    Ok(links)
}

/// Runs the unverified -> pending -> verified | error flow for website links.
#[derive(Clone)]
pub struct DomainVerifier {
    repo: Arc<dyn SocialLinkRepository>,
    resolver: Arc<dyn TxtResolver>,
    limiter: Arc<RateLimiter>,
}

impl DomainVerifier {
    pub fn new(
        repo: Arc<dyn SocialLinkRepository>,
        resolver: Arc<dyn TxtResolver>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            repo,
            resolver,
            limiter,
        }
    }

    fn server_error(profile_id: Uuid, error: &dyn std::fmt::Display) -> DomainVerificationError {
        let profile = profile_id.to_string();
        capture_error(
            &ErrorContext::new("verify_social_link").profile(&profile),
            error,
        );
        DomainVerificationError::ServerError
    }

    /// Issues a token and moves the link to pending. Idempotent for pending links.
    pub async fn start_verification(
        &self,
        profile_id: Uuid,
        link_id: Uuid,
    ) -> Result<Option<SocialLink>, AppError> {
        let Some(mut link) = self.repo.get_link(profile_id, link_id).await? else {
            return Ok(None);
        };
        if !link
            .verification_status
            .can_transition_to(VerificationStatus::Pending)
        {
            return Ok(Some(link));
        }
        if extract_domain(&link.url).is_none() {
            return Err(AppError::BadRequest(
                DomainVerificationError::InvalidUrl.user_message().to_string(),
            ));
        }

        let token = link
            .verification_token
            .clone()
            .unwrap_or_else(|| generate_verification_token(profile_id, link_id));
        let update = VerificationUpdate {
            status: VerificationStatus::Pending,
            token: Some(token.clone()),
            verified_domain: None,
            verified_at: None,
        };
        self.repo.update_verification(link_id, &update).await?;

        link.verification_status = VerificationStatus::Pending;
        link.verification_token = Some(token);
        Ok(Some(link))
    }

    /// Checks DNS for the link's token. `Ok(None)` when the link does not exist.
    pub async fn verify_social_link(
        &self,
        profile_id: Uuid,
        link_id: Uuid,
    ) -> Result<Option<SocialLink>, DomainVerificationError> {
        let limit = self.limiter.limit(&profile_id.to_string()).await;
        if !limit.success {
            tracing::warn!("Domain verification rate limited for {}", profile_id);
            return Err(DomainVerificationError::RateLimited);
        }

        let link = self
            .start_verification(profile_id, link_id)
            .await
            .map_err(|e| match e {
                AppError::BadRequest(_) => DomainVerificationError::InvalidUrl,
                other => Self::server_error(profile_id, &other),
            })?;
        let Some(mut link) = link else {
            return Ok(None);
        };
        if link.verification_status == VerificationStatus::Verified {
            return Ok(Some(link));
        }

        let domain = extract_domain(&link.url).ok_or(DomainVerificationError::InvalidUrl)?;
        let expected = link
            .expected_txt_record()
            .ok_or(DomainVerificationError::ServerError)?;

        let outcome = match self.check_domain(profile_id, &domain, &expected).await {
            Ok(()) => self.claim_domain(profile_id, link_id, &domain).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(verified_at) => {
                tracing::info!("Verified domain {} for profile {}", domain, profile_id);
                link.verification_status = VerificationStatus::Verified;
                link.verified_at = Some(verified_at);
                Ok(Some(link))
            }
            Err(e) => {
                if e == DomainVerificationError::DnsNotFound {
                    self.resolver.invalidate(&domain).await;
                }
                let next = VerificationStatus::Error;
                if link.verification_status.can_transition_to(next) {
                    let update = VerificationUpdate {
                        status: next,
                        token: link.verification_token.clone(),
                        verified_domain: None,
                        verified_at: None,
                    };
                    self.repo
                        .update_verification(link_id, &update)
                        .await
                        .map_err(|err| Self::server_error(profile_id, &err))?;
                }
                Err(e)
            }
        }
    }

    async fn claim_domain(
        &self,
        profile_id: Uuid,
        link_id: Uuid,
        domain: &str,
    ) -> Result<DateTime<Utc>, DomainVerificationError> {
        let verified_at = Utc::now();
        let claimed = self
            .repo
            .claim_verified_domain(profile_id, link_id, domain, verified_at)
            .await
            .map_err(|e| Self::server_error(profile_id, &e))?;
        if claimed {
            Ok(verified_at)
        } else {
            tracing::warn!(
                "Domain {} was claimed by another profile during verification",
                domain
            );
            Err(DomainVerificationError::DomainAlreadyClaimed)
        }
    }

    async fn check_domain(
        &self,
        profile_id: Uuid,
        domain: &str,
        expected: &str,
    ) -> Result<(), DomainVerificationError> {
        let claimed = self
            .repo
            .domain_claimed_by_other(domain, profile_id)
            .await
            .map_err(|e| Self::server_error(profile_id, &e))?;
        if claimed {
            return Err(DomainVerificationError::DomainAlreadyClaimed);
        }

        let records = self
            .resolver
            .lookup_txt(domain)
            .await
            .map_err(|e| Self::server_error(profile_id, &e))?;

        if records.iter().any(|r| r.trim() == expected) {
            Ok(())
        } else {
            tracing::debug!(
                "No matching TXT record on {} ({} records)",
                domain,
                records.len()
            );
            Err(DomainVerificationError::DnsNotFound)
        }
    }
}
