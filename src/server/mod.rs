//! relaymux - Server Role
//!
//! A [`Server`] admits many clients, each identified by a
//! [`ConnectionId`](crate::core::ConnectionId).

mod connections;
#[allow(clippy::module_inception)]
mod server;

pub use connections::{Connection, ConnectionTable};
pub use server::*;
