pub mod client;
pub mod hub;
pub mod server;

pub use client::{accept_connection, DEFAULT_SEND_QUEUE};
pub use hub::{Hub, HubHandle};
pub use server::{start, ServerConfig, ServerHandle};
