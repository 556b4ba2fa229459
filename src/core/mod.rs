//! relaymux - Core
//!
//! Shared vocabulary used by every layer:
//! - Protocol constants
//! - Identifier and channel types
//! - Error types
//! - Session configuration
//! - The [`Substrate`] trait the multiplexer is built on

mod config;
pub mod constants;
mod error;
mod traits;
mod types;

pub use config::*;
pub use error::*;
pub use traits::*;
pub use types::*;
