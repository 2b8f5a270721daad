//! # relay-core
//!
//! Wire types shared by every relay crate: the routed [`Envelope`] and the
//! [`ClientId`] a connection is addressed by.

pub mod envelope;
pub mod ids;

pub use envelope::{Envelope, BROADCAST, DEMO_START, SERVER_SENDER, SERVER_TICK};
pub use ids::{ClientId, ConnectionKey};
