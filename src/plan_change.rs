//! Subscription plan changes.
//!
//! Upgrades apply immediately and invoice the prorated difference. Downgrades
//! and interval-only changes are scheduled for the end of the current period
//! unless the caller forces them through. Every public operation swallows
//! its failure into a `{ success: false, error }` outcome after reporting it.

use crate::billing_client::{
    BillingError, BillingProvider, InvoicePreviewRequest, ProrationBehavior, ProviderSubscription,
};
use crate::config::BillingConfig;
use crate::obs::{capture_error, ErrorContext};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Declaration order is the upgrade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Growth,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Free, Plan::Pro, Plan::Growth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Growth => "growth",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSelection {
    pub plan: Plan,
    pub interval: BillingInterval,
}

pub fn is_plan_upgrade(current: Plan, target: Plan) -> bool {
    target > current
}

pub fn is_interval_change(current: BillingInterval, target: BillingInterval) -> bool {
    current != target
}

/// Provider price ids the product sells, keyed to plan and interval.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    prices: HashMap<String, PlanSelection>,
}

impl PriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, price_id: &str, plan: Plan, interval: BillingInterval) -> Self {
        self.prices
            .insert(price_id.to_string(), PlanSelection { plan, interval });
        self
    }

    pub fn from_config(config: &BillingConfig) -> Self {
        let entries = [
            (&config.pro_monthly_price_id, Plan::Pro, BillingInterval::Month),
            (&config.pro_yearly_price_id, Plan::Pro, BillingInterval::Year),
            (&config.growth_monthly_price_id, Plan::Growth, BillingInterval::Month),
            (&config.growth_yearly_price_id, Plan::Growth, BillingInterval::Year),
        ];
        entries
            .into_iter()
            .fold(Self::new(), |catalog, (id, plan, interval)| match id {
                Some(id) => catalog.with_price(id, plan, interval),
                None => catalog,
            })
    }

    pub fn lookup(&self, price_id: &str) -> Option<PlanSelection> {
        self.prices.get(price_id).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanChangeError {
    #[error("No active subscription found")]
    NoActiveSubscription,
    #[error("Unknown price: {0}")]
    UnknownPrice(String),
    #[error("Already subscribed to this plan")]
    SamePlan,
    #[error("No scheduled plan change to cancel")]
    NoScheduledChange,
    #[error(transparent)]
    Provider(#[from] BillingError),
    /// The new change failed after the pending schedule was released, and
    /// re-creating that schedule failed too.
    #[error("plan change failed and the pending change was lost: {0}")]
    PendingChangeLost(BillingError),
}

impl PlanChangeError {
    /// Copy shown to the user. Provider details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            PlanChangeError::Provider(BillingError::Api { status: 402, .. }) => {
                "Your payment method was declined. Please update it and try again.".to_string()
            }
            PlanChangeError::Provider(BillingError::Api { status, .. })
                if (400..500).contains(status) =>
            {
                "The billing provider couldn't apply this change. Please contact support if this keeps happening."
                    .to_string()
            }
            PlanChangeError::Provider(_) => {
                "We couldn't reach the billing provider. Please try again.".to_string()
            }
            PlanChangeError::PendingChangeLost(_) => {
                "Your plan change didn't go through, and your previously scheduled change was cancelled. Please schedule it again."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChangePreview {
    pub current_plan: Plan,
    pub current_interval: BillingInterval,
    pub new_plan: Plan,
    pub new_interval: BillingInterval,
    pub is_upgrade: bool,
    pub is_interval_change: bool,
    /// Charged now, minor currency units. Zero for deferred changes.
    pub immediate_amount: i64,
    pub proration_amount: i64,
    /// First invoice on the new price for deferred changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_billing_amount: Option<i64>,
    pub currency: String,
    /// Unix seconds at which the new price takes effect.
    pub effective_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<PlanChangePreview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanChangeOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanChangeOutcome {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            subscription_id: None,
            schedule_id: None,
            scheduled: false,
            effective_at: None,
            error: Some(error),
        }
    }
}

struct ResolvedChange {
    subscription: ProviderSubscription,
    current: PlanSelection,
    target: PlanSelection,
}

impl ResolvedChange {
    fn is_upgrade(&self) -> bool {
        is_plan_upgrade(self.current.plan, self.target.plan)
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Clone)]
pub struct PlanChangeService {
    provider: Arc<dyn BillingProvider>,
    catalog: PriceCatalog,
}

impl PlanChangeService {
    pub fn new(provider: Arc<dyn BillingProvider>, catalog: PriceCatalog) -> Self {
        Self { provider, catalog }
    }

    pub fn catalog(&self) -> &PriceCatalog {
        &self.catalog
    }

    async fn active_subscription(
        &self,
        customer_id: &str,
    ) -> Result<ProviderSubscription, PlanChangeError> {
        self.provider
            .active_subscription(customer_id)
            .await?
            .ok_or(PlanChangeError::NoActiveSubscription)
    }

    async fn resolve(
        &self,
        customer_id: &str,
        new_price_id: &str,
    ) -> Result<ResolvedChange, PlanChangeError> {
        let subscription = self.active_subscription(customer_id).await?;
        if subscription.price_id == new_price_id {
            return Err(PlanChangeError::SamePlan);
        }
        let current = self
            .catalog
            .lookup(&subscription.price_id)
            .ok_or_else(|| PlanChangeError::UnknownPrice(subscription.price_id.clone()))?;
        let target = self
            .catalog
            .lookup(new_price_id)
            .ok_or_else(|| PlanChangeError::UnknownPrice(new_price_id.to_string()))?;

        Ok(ResolvedChange {
            subscription,
            current,
            target,
        })
    }

    async fn try_preview(
        &self,
        customer_id: &str,
        new_price_id: &str,
    ) -> Result<PlanChangePreview, PlanChangeError> {
        let change = self.resolve(customer_id, new_price_id).await?;
        let is_upgrade = change.is_upgrade();
        let sub = &change.subscription;

        let (proration_behavior, proration_date) = if is_upgrade {
            (ProrationBehavior::AlwaysInvoice, Some(now_secs()))
        } else {
            (ProrationBehavior::None, None)
        };

        let invoice = self
            .provider
            .preview_invoice(&InvoicePreviewRequest {
                customer_id: customer_id.to_string(),
                subscription_id: sub.id.clone(),
                item_id: sub.item_id.clone(),
                new_price_id: new_price_id.to_string(),
                proration_behavior,
                proration_date,
            })
            .await?;

        let preview = if is_upgrade {
            PlanChangePreview {
                current_plan: change.current.plan,
                current_interval: change.current.interval,
                new_plan: change.target.plan,
                new_interval: change.target.interval,
                is_upgrade: true,
                is_interval_change: is_interval_change(
                    change.current.interval,
                    change.target.interval,
                ),
                immediate_amount: invoice.amount_due.max(0),
                proration_amount: invoice.proration_amount,
                next_billing_amount: None,
                currency: invoice.currency,
                effective_at: proration_date.unwrap_or_else(now_secs),
            }
        } else {
            PlanChangePreview {
                current_plan: change.current.plan,
                current_interval: change.current.interval,
                new_plan: change.target.plan,
                new_interval: change.target.interval,
                is_upgrade: false,
                is_interval_change: is_interval_change(
                    change.current.interval,
                    change.target.interval,
                ),
                immediate_amount: 0,
                proration_amount: 0,
                next_billing_amount: Some(invoice.amount_due.max(0)),
                currency: invoice.currency,
                effective_at: sub.current_period_end,
            }
        };

        Ok(preview)
    }

    /// Prices a change without applying it.
    pub async fn preview_plan_change(&self, customer_id: &str, new_price_id: &str) -> PreviewOutcome {
        match self.try_preview(customer_id, new_price_id).await {
            Ok(preview) => PreviewOutcome {
                success: true,
                preview: Some(preview),
                error: None,
            },
            Err(e) => {
                capture_error(
                    &ErrorContext::new("preview_plan_change").customer(customer_id),
                    &e,
                );
                PreviewOutcome {
                    success: false,
                    preview: None,
                    error: Some(e.user_message()),
                }
            }
        }
    }

    async fn try_execute(
        &self,
        customer_id: &str,
        new_price_id: &str,
        immediate: bool,
    ) -> Result<PlanChangeOutcome, PlanChangeError> {
        let change = self.resolve(customer_id, new_price_id).await?;
        let is_upgrade = change.is_upgrade();
        let mut sub = change.subscription;

        if is_upgrade || immediate {
            // A scheduled subscription cannot be updated directly. Remember the
            // pending price so it can be put back if the update fails.
            let pending = match sub.schedule_id.take() {
                Some(schedule_id) => {
                    let price = self.provider.scheduled_price(&schedule_id).await?;
                    self.provider.release_schedule(&schedule_id).await?;
                    Some((schedule_id, price))
                }
                None => None,
            };

            let proration = if is_upgrade {
                ProrationBehavior::AlwaysInvoice
            } else {
                ProrationBehavior::CreateProrations
            };
            let now = now_secs();
            let updated = match self
                .provider
                .update_subscription_price(&sub, new_price_id, proration, Some(now))
                .await
            {
                Ok(updated) => updated,
                Err(e) => return Err(self.restore_pending(&sub, pending, e).await),
            };

            tracing::info!(
                "Plan changed immediately for {}: {:?} -> {:?}",
                customer_id,
                change.current,
                change.target
            );
            return Ok(PlanChangeOutcome {
                success: true,
                subscription_id: Some(updated.id),
                schedule_id: None,
                scheduled: false,
                effective_at: Some(now),
                error: None,
            });
        }

        // An existing schedule is rewritten in place, so a failure here
        // leaves the pending change untouched.
        let schedule_id = self
            .provider
            .schedule_price_change(&sub, new_price_id)
            .await?;

        tracing::info!(
            "Plan change scheduled for {} at {}: {:?} -> {:?}",
            customer_id,
            sub.current_period_end,
            change.current,
            change.target
        );
        Ok(PlanChangeOutcome {
            success: true,
            subscription_id: Some(sub.id),
            schedule_id: Some(schedule_id),
            scheduled: true,
            effective_at: Some(sub.current_period_end),
            error: None,
        })
    }

    /// Re-creates a released schedule after a failed update. Returns the
    /// error to report.
    async fn restore_pending(
        &self,
        sub: &ProviderSubscription,
        pending: Option<(String, Option<String>)>,
        error: BillingError,
    ) -> PlanChangeError {
        let Some((schedule_id, price)) = pending else {
            return PlanChangeError::Provider(error);
        };
        let Some(price) = price else {
            tracing::error!(
                "Released schedule {} for {} had no pending price to restore",
                schedule_id,
                sub.id
            );
            return PlanChangeError::PendingChangeLost(error);
        };

        match self.provider.schedule_price_change(sub, &price).await {
            Ok(restored) => {
                tracing::warn!(
                    "Plan change failed for {}; pending change to {} restored as {}",
                    sub.id,
                    price,
                    restored
                );
                PlanChangeError::Provider(error)
            }
            Err(restore_error) => {
                tracing::error!(
                    "Could not restore pending change to {} for {}: {}",
                    price,
                    sub.id,
                    restore_error
                );
                PlanChangeError::PendingChangeLost(error)
            }
        }
    }

    /// Applies a change. `immediate` forces downgrades and interval changes
    /// through now instead of at period end.
    pub async fn execute_plan_change(
        &self,
        customer_id: &str,
        new_price_id: &str,
        immediate: bool,
    ) -> PlanChangeOutcome {
        match self.try_execute(customer_id, new_price_id, immediate).await {
            Ok(outcome) => outcome,
            Err(e) => {
                capture_error(
                    &ErrorContext::new("execute_plan_change").customer(customer_id),
                    &e,
                );
                PlanChangeOutcome::failed(e.user_message())
            }
        }
    }

    async fn try_cancel(&self, customer_id: &str) -> Result<PlanChangeOutcome, PlanChangeError> {
        let sub = self.active_subscription(customer_id).await?;
        let schedule_id = sub
            .schedule_id
            .clone()
            .ok_or(PlanChangeError::NoScheduledChange)?;

        self.provider.release_schedule(&schedule_id).await?;

        Ok(PlanChangeOutcome {
            success: true,
            subscription_id: Some(sub.id),
            schedule_id: Some(schedule_id),
            scheduled: false,
            effective_at: None,
            error: None,
        })
    }

    /// Drops a pending scheduled change, keeping the current plan.
    pub async fn cancel_scheduled_plan_change(&self, customer_id: &str) -> PlanChangeOutcome {
        match self.try_cancel(customer_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                capture_error(
                    &ErrorContext::new("cancel_scheduled_plan_change").customer(customer_id),
                    &e,
                );
                PlanChangeOutcome::failed(e.user_message())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_ordering() {
        assert!(is_plan_upgrade(Plan::Free, Plan::Pro));
        assert!(is_plan_upgrade(Plan::Pro, Plan::Growth));
        assert!(is_plan_upgrade(Plan::Free, Plan::Growth));
        assert!(!is_plan_upgrade(Plan::Growth, Plan::Pro));
        assert!(!is_plan_upgrade(Plan::Pro, Plan::Pro));
    }

    #[test]
    fn test_interval_change() {
        assert!(is_interval_change(BillingInterval::Month, BillingInterval::Year));
        assert!(!is_interval_change(BillingInterval::Year, BillingInterval::Year));
    }

    #[test]
    fn test_catalog_from_config_skips_missing_prices() {
        let config = BillingConfig {
            secret_key: "sk_test".to_string(),
            api_base: "https://api.stripe.com".to_string(),
            pro_monthly_price_id: Some("price_pm".to_string()),
            pro_yearly_price_id: None,
            growth_monthly_price_id: Some("price_gm".to_string()),
            growth_yearly_price_id: None,
        };
        let catalog = PriceCatalog::from_config(&config);
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.lookup("price_gm"),
            Some(PlanSelection {
                plan: Plan::Growth,
                interval: BillingInterval::Month
            })
        );
        assert_eq!(catalog.lookup("price_py"), None);
    }

    #[test]
    fn test_provider_errors_hide_details() {
        let err = PlanChangeError::Provider(BillingError::Api {
            status: 402,
            message: "card_declined: secret detail".to_string(),
        });
        assert!(!err.user_message().contains("secret"));
        assert!(err.user_message().contains("declined"));

        let rejected = PlanChangeError::Provider(BillingError::Api {
            status: 400,
            message: "No such price".to_string(),
        });
        assert!(rejected.user_message().contains("couldn't apply"));

        let outage = PlanChangeError::Provider(BillingError::Http("timeout".to_string()));
        assert!(outage.user_message().contains("couldn't reach"));

        let lost = PlanChangeError::PendingChangeLost(BillingError::Http("timeout".to_string()));
        assert!(lost.user_message().contains("previously scheduled change"));
        assert_eq!(
            PlanChangeError::NoActiveSubscription.user_message(),
            "No active subscription found"
        );
    }
}
