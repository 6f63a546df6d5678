//! Observability: tracing setup and the error-tracker hook.
//!
//! Service boundaries that swallow failures (billing, domain verification)
//! report them through [`capture_error`]. Events go to the `error_tracker`
//! target so a collector layer can forward them without touching call sites.

use std::fmt::Display;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber. Safe to call once per process.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Reports a caught error with its operation context.
pub fn capture_error(context: &ErrorContext<'_>, error: &dyn Display) {
    tracing::error!(
        target: "error_tracker",
        operation = context.operation,
        customer_id = context.customer_id.unwrap_or("-"),
        profile_id = context.profile_id.unwrap_or("-"),
        "{}",
        error
    );
}

/// Tags attached to a captured error.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub operation: &'a str,
    pub customer_id: Option<&'a str>,
    pub profile_id: Option<&'a str>,
}

impl<'a> ErrorContext<'a> {
    pub fn new(operation: &'a str) -> Self {
        Self {
            operation,
            ..Default::default()
        }
    }

    pub fn customer(mut self, customer_id: &'a str) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn profile(mut self, profile_id: &'a str) -> Self {
        self.profile_id = Some(profile_id);
        self
    }
}
