pub mod health;
pub mod metrics;
pub mod query;
pub mod record;
pub mod retry;
pub mod store;
