//! Server side of the live channel: a hub of open WebSocket connections,
//! the upgrade handler, and the bridge that feeds bus events into the hub.

mod bridge;
mod handler;
mod hub;

pub(crate) use bridge::spawn_bridge;
pub(crate) use handler::ws_handler;
pub(crate) use hub::{start_heartbeat, LiveHub};
