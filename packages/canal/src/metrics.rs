//! Server metrics for observability
//!
//! Provides runtime metrics for monitoring relay health.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently active WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Sessions force-closed because a newer one arrived for the same identity
    pub sessions_superseded: AtomicU64,

    // Message metrics
    /// Messages persisted through the create endpoint
    pub messages_created: AtomicU64,
    /// receiveMessage pushes handed to a live recipient socket
    pub pushes_sent: AtomicU64,
    /// Pushes skipped because the recipient was offline or backed up
    pub pushes_dropped: AtomicU64,
    /// Status echoes relayed back to message authors
    pub status_updates_sent: AtomicU64,

    // Acknowledgement metrics
    /// Delivery/read acks that advanced a message
    pub acks_applied: AtomicU64,
    /// Stale or duplicate acks absorbed as no-ops
    pub acks_ignored: AtomicU64,

    // Error metrics
    /// Inbound frames that failed to parse
    pub bad_frames: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_superseded(&self) {
        self.sessions_superseded.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn message_created(&self) {
        self.messages_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_sent(&self) {
        self.pushes_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_dropped(&self) {
        self.pushes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_update_sent(&self) {
        self.status_updates_sent.fetch_add(1, Ordering::Relaxed);
    }

    // Acknowledgement tracking
    pub fn ack_applied(&self) {
        self.acks_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_ignored(&self) {
        self.acks_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bad_frame(&self) {
        self.bad_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                superseded: self.sessions_superseded.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                created: self.messages_created.load(Ordering::Relaxed),
                pushes_sent: self.pushes_sent.load(Ordering::Relaxed),
                pushes_dropped: self.pushes_dropped.load(Ordering::Relaxed),
                status_updates_sent: self.status_updates_sent.load(Ordering::Relaxed),
            },
            acks: AckMetrics {
                applied: self.acks_applied.load(Ordering::Relaxed),
                ignored: self.acks_ignored.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                bad_frames: self.bad_frames.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub acks: AckMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub superseded: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub created: u64,
    pub pushes_sent: u64,
    pub pushes_dropped: u64,
    pub status_updates_sent: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMetrics {
    pub applied: u64,
    pub ignored: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub bad_frames: u64,
}

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub active_connections: u64,
    pub conversations: u64,
    pub messages: u64,
    pub uptime_secs: u64,
}
