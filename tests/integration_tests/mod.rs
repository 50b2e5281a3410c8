//! Integration tests module
//!
//! End-to-end tests over a real SQLite file:
//! - definitions → work pool → work units → result store
//! - result store → recipients → account pool → transport
//! - heartbeats → watchdog → recovery

pub mod dispatch_test;
pub mod liveness_test;
pub mod scheduler_test;
