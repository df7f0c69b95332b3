pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod kafka;
pub mod metrics_consts;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod sink;
pub mod source;
pub mod worker;

// Fakes for the pipeline seams, used by the unit tests and the tests/ directory
pub mod test_utils;
