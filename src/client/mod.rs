//! relaymux - Client Role
//!
//! A [`Client`] holds one session to a single host.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
