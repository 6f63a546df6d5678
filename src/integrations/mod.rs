//! External service integrations.

pub mod billing_client {
    pub use crate::billing_client::*;
}

pub mod dns_client {
    pub use crate::dns_client::*;
}
