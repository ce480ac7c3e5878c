//! Client core for the contact channel.
//!
//! The pieces compose bottom-up:
//! - `events`: typed event stream between the socket task and the session
//! - `connection`: one owned realtime link, redialing until superseded
//! - `api`: request/response interface (history, creation, listing)
//! - `log`: per-conversation message state machine
//! - `view`: what an open conversation actually renders
//! - `unread`: the operator's badge
//! - `session`: the orchestrator tying all of it together

pub mod api;
pub mod connection;
pub mod events;
pub mod log;
pub mod session;
pub mod unread;
pub mod view;

pub use api::ApiClient;
pub use connection::{Connection, LinkState};
pub use events::{ChannelEvent, EventStream, EventSubscription};
pub use log::{LogEntry, MessageLog};
pub use session::ChannelSession;
pub use unread::UnreadSet;
pub use view::ConversationView;
