use thiserror::Error;

/// Failure taxonomy for the client side of the contact channel.
///
/// `Authentication` ends the session and is surfaced to the caller.
/// `Transport` is transient; the reconnect loop absorbs it and the UI only
/// shows a non-blocking offline indicator. `Persistence` means the store
/// refused a message; the optimistic placeholder is rolled back and the
/// caller may retry. `Superseded` means the server closed this session in
/// favor of a newer one for the same identity; no reconnect is attempted.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("transport interrupted: {0}")]
    Transport(String),

    #[error("could not persist message: {0}")]
    Persistence(String),

    #[error("session superseded by a newer connection")]
    Superseded,
}

impl ChannelError {
    /// Whether the reconnect loop should keep trying after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::Transport(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(resp) if matches!(resp.status().as_u16(), 401 | 403) => {
                ChannelError::Authentication(format!(
                    "server rejected connection: HTTP {}",
                    resp.status()
                ))
            }
            other => ChannelError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_is_recoverable() {
        assert!(ChannelError::Transport("reset".into()).is_recoverable());
        assert!(!ChannelError::Authentication("bad token".into()).is_recoverable());
        assert!(!ChannelError::Persistence("disk full".into()).is_recoverable());
        assert!(!ChannelError::Superseded.is_recoverable());
    }
}
