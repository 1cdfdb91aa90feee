pub mod assignments;
pub mod config;
pub mod connectors;
pub mod environment;
pub mod hits;
pub mod metrics_consts;

// Shared fixtures for unit and integration tests, kept public so tests/ can use them.
pub mod test_utils;
