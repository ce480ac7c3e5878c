//! Realtime relay
//!
//! One WebSocket per identity. The server pushes incoming messages and
//! status echoes to whoever is online; clients send delivery/read
//! acknowledgements back. Everything else (history, message creation) is
//! plain REST.

mod handler;
mod protocol;
mod registry;

pub use handler::websocket_handler;
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{RegisteredSession, SessionRegistry};
