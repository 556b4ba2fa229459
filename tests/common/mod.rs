//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use relaymux::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install a test log subscriber. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration with no quarantine and a short connect timeout.
pub fn config(max_connections: usize) -> SessionConfig {
    SessionConfigBuilder::new()
        .quarantine(Duration::ZERO)
        .connect_timeout(Duration::from_secs(5))
        .max_connections(max_connections)
        .build()
        .unwrap()
}

/// Drain every pending event from a receiver.
pub fn drain<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
