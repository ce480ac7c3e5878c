//! Session registry: exactly one live socket per identity.
//!
//! Registering an identity that already has a session force-closes the old
//! one first, so a stale socket can never keep feeding a torn-down view.
//! Every registration gets a fresh generation; cleanup paths check it before
//! touching the map so a disconnect racing a newer registration cannot evict
//! the newcomer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::ChannelIdentity;

use super::protocol::ServerMessage;

/// Everything a socket task needs to know about its own registration.
#[derive(Debug, Clone)]
pub struct RegisteredSession {
    pub connection_id: String,
    /// Monotonically increasing across all registrations. A session whose
    /// generation no longer owns the registry slot has been superseded.
    pub generation: u64,
    pub cancel: CancellationToken,
}

#[derive(Clone)]
struct SessionEntry {
    connection_id: String,
    generation: u64,
    sender: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ChannelIdentity, SessionEntry>>>,
    next_generation: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a socket for an identity, force-closing any prior session.
    /// Returns the new session and whether a prior one was superseded.
    pub async fn register(
        &self,
        identity: ChannelIdentity,
        sender: mpsc::Sender<ServerMessage>,
    ) -> (RegisteredSession, bool) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = SessionEntry {
            connection_id: uuid::Uuid::new_v4().to_string(),
            generation,
            sender,
            cancel: CancellationToken::new(),
        };
        let session = RegisteredSession {
            connection_id: entry.connection_id.clone(),
            generation,
            cancel: entry.cancel.clone(),
        };

        let prior = self.sessions.write().await.insert(identity, entry);
        let superseded = prior.is_some();
        if let Some(prior) = prior {
            debug!(
                %identity,
                prior_connection = %prior.connection_id,
                "force-closing superseded session"
            );
            // Farewell first so the old client knows not to reconnect
            let _ = prior.sender.try_send(ServerMessage::superseded());
            prior.cancel.cancel();
        }

        (session, superseded)
    }

    /// Remove a session, but only while `generation` still owns the slot.
    pub async fn unregister(&self, identity: ChannelIdentity, generation: u64) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(&identity)
            .is_some_and(|e| e.generation == generation)
        {
            sessions.remove(&identity);
        }
    }

    /// Queue a frame for an identity's live socket. Best effort: returns
    /// false when nobody is connected or the socket is backed up. Persistence
    /// is the source of truth, so a dropped push is healed by resync.
    pub async fn send_to(&self, identity: ChannelIdentity, msg: ServerMessage) -> bool {
        let sender = {
            let sessions = self.sessions.read().await;
            match sessions.get(&identity) {
                Some(entry) => entry.sender.clone(),
                None => return false,
            }
        };

        match sender.try_send(msg) {
            Ok(()) => true,
            Err(err) => {
                warn!(%identity, "failed to queue frame: {}", err);
                false
            }
        }
    }

    pub async fn is_connected(&self, identity: ChannelIdentity) -> bool {
        self.sessions.read().await.contains_key(&identity)
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn current_generation(&self, identity: ChannelIdentity) -> Option<u64> {
        self.sessions
            .read()
            .await
            .get(&identity)
            .map(|e| e.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_channel() -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(8)
    }

    // ============================================================================
    // Registration and supersession
    // ============================================================================

    #[tokio::test]
    async fn register_assigns_increasing_generations() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = make_channel();
        let (tx2, _rx2) = make_channel();

        let (first, superseded) = registry.register(ChannelIdentity::Admin, tx1).await;
        assert!(!superseded);
        let (second, _) = registry
            .register(ChannelIdentity::Psychologist(1), tx2)
            .await;
        assert!(second.generation > first.generation);
        assert_ne!(first.connection_id, second.connection_id);
    }

    #[tokio::test]
    async fn reregister_supersedes_prior_session() {
        let registry = SessionRegistry::new();
        let (tx1, mut rx1) = make_channel();
        let (tx2, _rx2) = make_channel();

        let (first, _) = registry.register(ChannelIdentity::Admin, tx1).await;
        let (second, superseded) = registry.register(ChannelIdentity::Admin, tx2).await;

        assert!(superseded);
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());

        // Exactly one active connection remains, and it is the newer one
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(
            registry.current_generation(ChannelIdentity::Admin).await,
            Some(second.generation)
        );

        // The old socket got a farewell so its client will not reconnect
        match rx1.try_recv() {
            Ok(ServerMessage::Error { message }) => {
                assert_eq!(message, ServerMessage::SUPERSEDED_NOTICE)
            }
            other => panic!("Expected superseded notice, got {:?}", other),
        }
    }

    // ============================================================================
    // Unregistration guards
    // ============================================================================

    #[tokio::test]
    async fn unregister_with_stale_generation_is_a_noop() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = make_channel();
        let (tx2, _rx2) = make_channel();

        let (first, _) = registry.register(ChannelIdentity::Admin, tx1).await;
        let (second, _) = registry.register(ChannelIdentity::Admin, tx2).await;

        // The superseded socket's cleanup must not evict the newcomer
        registry
            .unregister(ChannelIdentity::Admin, first.generation)
            .await;
        assert!(registry.is_connected(ChannelIdentity::Admin).await);

        registry
            .unregister(ChannelIdentity::Admin, second.generation)
            .await;
        assert!(!registry.is_connected(ChannelIdentity::Admin).await);
    }

    // ============================================================================
    // Delivery
    // ============================================================================

    #[tokio::test]
    async fn send_to_live_session_delivers() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = make_channel();
        registry.register(ChannelIdentity::Psychologist(3), tx).await;

        let delivered = registry
            .send_to(
                ChannelIdentity::Psychologist(3),
                ServerMessage::Connected {
                    connection_id: "c".into(),
                },
            )
            .await;
        assert!(delivered);
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMessage::Connected { .. })
        ));
    }

    #[tokio::test]
    async fn send_to_offline_identity_returns_false() {
        let registry = SessionRegistry::new();
        let delivered = registry
            .send_to(
                ChannelIdentity::Admin,
                ServerMessage::Connected {
                    connection_id: "c".into(),
                },
            )
            .await;
        assert!(!delivered);
    }
}
