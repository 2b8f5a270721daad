//! WebSocket hub: routing actor, per-connection pumps, inbound observer and demo stream.

pub mod connection;
pub mod demo;
pub mod hub;
pub mod observer;

pub use connection::{serve_connection, ConnectionConfig, Disconnect};
pub use demo::DemoPublisher;
pub use hub::{Hub, HubError, HubHandle, Registration, Sink};
pub use observer::spawn_observer;
