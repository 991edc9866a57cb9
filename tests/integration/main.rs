//! Integration test entry point
//!
//! These tests need a reachable MariaDB/MySQL backend. Run with:
//! `ARGUS_RUN_INTEGRATION_TESTS=1 cargo test --test integration`

mod monitor;

use std::env;

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("ARGUS_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Get backend connection config from environment
pub fn get_backend_config() -> BackendTestConfig {
    BackendTestConfig {
        host: env::var("ARGUS_TEST_MYSQL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("ARGUS_TEST_MYSQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3306),
        user: env::var("ARGUS_TEST_MYSQL_USER").unwrap_or_else(|_| "root".to_string()),
        password: env::var("ARGUS_TEST_MYSQL_PASS").unwrap_or_default(),
    }
}

/// Backend test configuration
#[derive(Debug, Clone)]
pub struct BackendTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

/// Skip the current test when integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !$crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set ARGUS_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}
