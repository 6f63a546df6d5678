use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    #[error("billing provider request failed: {0}")]
    Http(String),
    #[error("billing provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected billing provider response: {0}")]
    Decode(String),
}

/// The slice of a provider subscription the plan-change flow needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    /// The single subscription item carrying the plan price.
    pub item_id: String,
    pub price_id: String,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub schedule_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProrationBehavior {
    /// Prorate and invoice immediately.
    AlwaysInvoice,
    /// Prorate onto the next invoice.
    CreateProrations,
    None,
}

impl ProrationBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProrationBehavior::AlwaysInvoice => "always_invoice",
            ProrationBehavior::CreateProrations => "create_prorations",
            ProrationBehavior::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicePreviewRequest {
    pub customer_id: String,
    pub subscription_id: String,
    pub item_id: String,
    pub new_price_id: String,
    pub proration_behavior: ProrationBehavior,
    /// Unix seconds the proration is computed at.
    pub proration_date: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicePreview {
    /// Minor currency units. Negative when credits exceed charges.
    pub amount_due: i64,
    pub currency: String,
    /// Sum of proration line items, minor units.
    pub proration_amount: i64,
    pub next_payment_attempt: Option<i64>,
}

/// Calls against the payments provider used by the plan-change flow.
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn active_subscription(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderSubscription>, BillingError>;

    async fn preview_invoice(
        &self,
        request: &InvoicePreviewRequest,
    ) -> Result<InvoicePreview, BillingError>;

    /// Swaps the subscription item to `new_price_id` now.
    async fn update_subscription_price(
        &self,
        subscription: &ProviderSubscription,
        new_price_id: &str,
        proration: ProrationBehavior,
        proration_date: Option<i64>,
    ) -> Result<ProviderSubscription, BillingError>;

    /// Schedules `new_price_id` to start at the end of the current period.
    /// A schedule already attached to the subscription is rewritten in place.
    /// Returns the schedule id.
    async fn schedule_price_change(
        &self,
        subscription: &ProviderSubscription,
        new_price_id: &str,
    ) -> Result<String, BillingError>;

    /// Price the schedule switches to after the current phase, if any.
    async fn scheduled_price(&self, schedule_id: &str) -> Result<Option<String>, BillingError>;

    /// Detaches a schedule, leaving the subscription on its current price.
    async fn release_schedule(&self, schedule_id: &str) -> Result<(), BillingError>;
}

// ============ Stripe wire types ============

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    id: String,
    price: StripePrice,
    // Newer API versions moved the period onto the item.
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: String,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    schedule: Option<String>,
    items: StripeList<StripeSubscriptionItem>,
}

impl TryFrom<StripeSubscription> for ProviderSubscription {
    type Error = BillingError;

    fn try_from(sub: StripeSubscription) -> Result<Self, Self::Error> {
        let item = sub.items.data.into_iter().next().ok_or_else(|| {
            BillingError::Decode(format!("subscription {} has no items", sub.id))
        })?;
        let period_start = sub
            .current_period_start
            .or(item.current_period_start)
            .unwrap_or_default();
        let period_end = sub
            .current_period_end
            .or(item.current_period_end)
            .ok_or_else(|| {
                BillingError::Decode(format!("subscription {} has no period end", sub.id))
            })?;

        Ok(ProviderSubscription {
            id: sub.id,
            customer_id: sub.customer,
            status: sub.status,
            item_id: item.id,
            price_id: item.price.id,
            current_period_start: period_start,
            current_period_end: period_end,
            schedule_id: sub.schedule,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeInvoiceLine {
    amount: i64,
    #[serde(default)]
    proration: bool,
}

#[derive(Debug, Deserialize)]
struct StripeInvoice {
    amount_due: i64,
    currency: String,
    next_payment_attempt: Option<i64>,
    lines: StripeList<StripeInvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct StripePhaseItem {
    price: String,
}

#[derive(Debug, Deserialize)]
struct StripeSchedulePhase {
    start_date: i64,
    end_date: Option<i64>,
    #[serde(default)]
    items: Vec<StripePhaseItem>,
}

#[derive(Debug, Deserialize)]
struct StripeSchedule {
    id: String,
    phases: Vec<StripeSchedulePhase>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Stripe REST client for subscriptions, schedules and invoice previews.
#[derive(Clone)]
pub struct StripeBillingClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeBillingClient {
    pub fn new(base_url: String, secret_key: String) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BillingError::Http(format!("Failed to create Stripe client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn retrieve_schedule(&self, schedule_id: &str) -> Result<StripeSchedule, BillingError> {
        self.send(
            self.client
                .get(self.url(&format!("subscription_schedules/{}", schedule_id))),
            "retrieve subscription schedule",
        )
        .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, BillingError> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| BillingError::Http(format!("{}: {}", what, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            tracing::warn!("Stripe {} failed with {}: {}", what, status, message);
            return Err(BillingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| BillingError::Decode(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl BillingProvider for StripeBillingClient {
    async fn active_subscription(
        &self,
        customer_id: &str,
    ) -> Result<Option<ProviderSubscription>, BillingError> {
        tracing::debug!("Fetching active subscription for customer {}", customer_id);
        let request = self.client.get(self.url("subscriptions")).query(&[
            ("customer", customer_id),
            ("status", "active"),
            ("limit", "1"),
        ]);

        let list: StripeList<StripeSubscription> = self.send(request, "list subscriptions").await?;
        list.data
            .into_iter()
            .next()
            .map(ProviderSubscription::try_from)
            .transpose()
    }

    async fn preview_invoice(
        &self,
        request: &InvoicePreviewRequest,
    ) -> Result<InvoicePreview, BillingError> {
        let mut form = vec![
            ("customer".to_string(), request.customer_id.clone()),
            ("subscription".to_string(), request.subscription_id.clone()),
            (
                "subscription_details[items][0][id]".to_string(),
                request.item_id.clone(),
            ),
            (
                "subscription_details[items][0][price]".to_string(),
                request.new_price_id.clone(),
            ),
            (
                "subscription_details[proration_behavior]".to_string(),
                request.proration_behavior.as_str().to_string(),
            ),
        ];
        if let Some(date) = request.proration_date {
            form.push((
                "subscription_details[proration_date]".to_string(),
                date.to_string(),
            ));
        }

        let invoice: StripeInvoice = self
            .send(
                self.client
                    .post(self.url("invoices/create_preview"))
                    .form(&form),
                "preview invoice",
            )
            .await?;

        let proration_amount = invoice
            .lines
            .data
            .iter()
            .filter(|line| line.proration)
            .map(|line| line.amount)
            .sum();

        Ok(InvoicePreview {
            amount_due: invoice.amount_due,
            currency: invoice.currency,
            proration_amount,
            next_payment_attempt: invoice.next_payment_attempt,
        })
    }

    async fn update_subscription_price(
        &self,
        subscription: &ProviderSubscription,
        new_price_id: &str,
        proration: ProrationBehavior,
        proration_date: Option<i64>,
    ) -> Result<ProviderSubscription, BillingError> {
        tracing::info!(
            "Updating subscription {} to price {} ({})",
            subscription.id,
            new_price_id,
            proration.as_str()
        );
        let mut form = vec![
            ("items[0][id]".to_string(), subscription.item_id.clone()),
            ("items[0][price]".to_string(), new_price_id.to_string()),
            (
                "proration_behavior".to_string(),
                proration.as_str().to_string(),
            ),
        ];
        if let Some(date) = proration_date {
            form.push(("proration_date".to_string(), date.to_string()));
        }

        let updated: StripeSubscription = self
            .send(
                self.client
                    .post(self.url(&format!("subscriptions/{}", subscription.id)))
                    .form(&form),
                "update subscription",
            )
            .await?;

        ProviderSubscription::try_from(updated)
    }

    async fn schedule_price_change(
        &self,
        subscription: &ProviderSubscription,
        new_price_id: &str,
    ) -> Result<String, BillingError> {
        let schedule: StripeSchedule = match &subscription.schedule_id {
            Some(schedule_id) => self.retrieve_schedule(schedule_id).await?,
            None => {
                self.send(
                    self.client
                        .post(self.url("subscription_schedules"))
                        .form(&[("from_subscription", subscription.id.as_str())]),
                    "create subscription schedule",
                )
                .await?
            }
        };

        let period_end = subscription.current_period_end;
        let current_phase = schedule
            .phases
            .iter()
            .find(|p| p.start_date < period_end && p.end_date.map_or(true, |end| end >= period_end))
            .or_else(|| schedule.phases.first())
            .ok_or_else(|| {
                BillingError::Decode(format!("schedule {} has no phases", schedule.id))
            })?;
        let phase_end = current_phase.end_date.unwrap_or(period_end);

        let form = vec![
            ("end_behavior".to_string(), "release".to_string()),
            ("proration_behavior".to_string(), "none".to_string()),
            (
                "phases[0][items][0][price]".to_string(),
                subscription.price_id.clone(),
            ),
            (
                "phases[0][start_date]".to_string(),
                current_phase.start_date.to_string(),
            ),
            ("phases[0][end_date]".to_string(), phase_end.to_string()),
            (
                "phases[1][items][0][price]".to_string(),
                new_price_id.to_string(),
            ),
            ("phases[1][iterations]".to_string(), "1".to_string()),
        ];

        let updated: StripeSchedule = self
            .send(
                self.client
                    .post(self.url(&format!("subscription_schedules/{}", schedule.id)))
                    .form(&form),
                "update subscription schedule",
            )
            .await?;

        tracing::info!(
            "Scheduled subscription {} to switch to {} at {}",
            subscription.id,
            new_price_id,
            phase_end
        );
        Ok(updated.id)
    }

    async fn scheduled_price(&self, schedule_id: &str) -> Result<Option<String>, BillingError> {
        let schedule = self.retrieve_schedule(schedule_id).await?;
        Ok(schedule
            .phases
            .into_iter()
            .skip(1)
            .last()
            .and_then(|phase| phase.items.into_iter().next())
            .map(|item| item.price))
    }

    async fn release_schedule(&self, schedule_id: &str) -> Result<(), BillingError> {
        let _: StripeSchedule = self
            .send(
                self.client
                    .post(self.url(&format!("subscription_schedules/{}/release", schedule_id)))
                    .form(&[("preserve_cancel_date", "true")]),
                "release subscription schedule",
            )
            .await?;

        tracing::info!("Released subscription schedule {}", schedule_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_trims_base() {
        let client =
            StripeBillingClient::new("https://api.stripe.com/".to_string(), "sk_test".to_string())
                .unwrap();
        assert_eq!(client.url("subscriptions"), "https://api.stripe.com/v1/subscriptions");
    }

    #[test]
    fn test_subscription_period_falls_back_to_item() {
        let raw = serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "schedule": null,
            "items": { "data": [{
                "id": "si_1",
                "price": { "id": "price_pro_month" },
                "current_period_start": 100,
                "current_period_end": 200
            }]}
        });
        let sub: StripeSubscription = serde_json::from_value(raw).unwrap();
        let sub = ProviderSubscription::try_from(sub).unwrap();
        assert_eq!(sub.current_period_start, 100);
        assert_eq!(sub.current_period_end, 200);
        assert_eq!(sub.price_id, "price_pro_month");
        assert_eq!(sub.schedule_id, None);
    }

    #[test]
    fn test_subscription_without_items_is_rejected() {
        let raw = serde_json::json!({
            "id": "sub_1",
            "customer": "cus_1",
            "status": "active",
            "current_period_end": 200,
            "items": { "data": [] }
        });
        let sub: StripeSubscription = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            ProviderSubscription::try_from(sub),
            Err(BillingError::Decode(_))
        ));
    }
}
