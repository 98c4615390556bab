pub mod billing;

pub use billing::{BillingClient, BillingCustomer, HttpBillingClient};

#[cfg(test)]
pub use billing::MockBillingClient;
