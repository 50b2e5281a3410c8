//! Integration tests entry point
//!
//! This file serves as the entry point for all integration tests.
//! It includes the integration_tests module which contains:
//! - Crawl scheduling and work-pool synchronization
//! - Notification dispatch and quota rotation
//! - Heartbeat liveness and recovery

mod common;
mod integration_tests;
