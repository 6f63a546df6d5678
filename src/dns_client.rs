use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use std::time::Duration;

const TXT_RECORD_TYPE: u16 = 16;
const NXDOMAIN: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("DNS lookup failed: {0}")]
pub struct DnsError(pub String);

/// TXT record lookup used for domain-ownership checks.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// TXT values for `domain`. A domain without records yields an empty list.
    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>, DnsError>;

    /// Drops any cached answer for `domain` so the next lookup asks DNS again.
    async fn invalidate(&self, _domain: &str) {}
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

/// Joins the quoted character-strings of one TXT answer: `"a" "b"` -> `ab`.
pub fn unquote_txt(data: &str) -> String {
    if !data.contains('"') {
        return data.to_string();
    }
    data.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, part)| part)
        .collect()
}

/// DNS-over-HTTPS JSON client (Cloudflare / Google compatible).
///
/// Non-empty answers are cached for 60 seconds so repeated "Verify" clicks do
/// not hammer the resolver. Empty answers are never cached: the record is
/// usually published right after the first miss.
#[derive(Clone)]
pub struct DohTxtResolver {
    client: reqwest::Client,
    endpoint: String,
    cache: Cache<String, Vec<String>>,
}

impl DohTxtResolver {
    pub fn new(endpoint: String) -> Result<Self, DnsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| DnsError(format!("Failed to create DNS client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .max_capacity(10_000)
                .build(),
        })
    }

    async fn query(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("name", domain), ("type", "TXT")])
            .header("accept", "application/dns-json")
            .send()
            .await
            .map_err(|e| DnsError(format!("resolver request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DnsError(format!(
                "resolver returned {}",
                response.status()
            )));
        }

        let body: DohResponse = response
            .json()
            .await
            .map_err(|e| DnsError(format!("invalid resolver response: {}", e)))?;

        match body.status {
            0 => Ok(body
                .answer
                .into_iter()
                .filter(|a| a.record_type == TXT_RECORD_TYPE)
                .map(|a| unquote_txt(&a.data))
                .collect()),
            NXDOMAIN => Ok(Vec::new()),
            rcode => Err(DnsError(format!("resolver rcode {}", rcode))),
        }
    }
}

#[async_trait]
impl TxtResolver for DohTxtResolver {
    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let key = domain.to_lowercase();
        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!("TXT cache HIT for {}", key);
            return Ok(cached);
        }

        let records = self.query(&key).await?;
        tracing::debug!("TXT lookup for {} returned {} records", key, records.len());
        if !records.is_empty() {
            self.cache.insert(key, records.clone()).await;
        }
        Ok(records)
    }

    async fn invalidate(&self, domain: &str) {
        self.cache.invalidate(&domain.to_lowercase()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote_single_and_split_strings() {
        assert_eq!(unquote_txt("\"profile-verification=abc\""), "profile-verification=abc");
        assert_eq!(unquote_txt("\"v=spf1 \" \"-all\""), "v=spf1 -all");
        assert_eq!(unquote_txt("bare-value"), "bare-value");
    }
}
