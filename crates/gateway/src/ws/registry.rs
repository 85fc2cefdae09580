// Live connection registry.
//
// Owns one record per accepted connection for the connection's lifetime:
// identity, negotiated compression, and the outbound sender the business
// layer uses to push frames to the client. Records are created on accept
// and destroyed on disconnect.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::compress::{compression_stats, CompressionConfig, CompressionStats};

#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub channel: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub compression: CompressionConfig,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionRecord {
    pub fn new(
        connection_id: Uuid,
        user_id: Uuid,
        channel: Option<String>,
        compression: CompressionConfig,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self { connection_id, user_id, channel, opened_at: Utc::now(), compression, outbound }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<Uuid, ConnectionRecord>>>,
}

impl ConnectionRegistry {
    pub async fn register(&self, record: ConnectionRecord) {
        let mut guard = self.connections.write().await;
        guard.insert(record.connection_id, record);
    }

    pub async fn deregister(&self, connection_id: Uuid) -> Option<ConnectionRecord> {
        let mut guard = self.connections.write().await;
        guard.remove(&connection_id)
    }

    pub async fn active_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Monitoring accessor for a connection's negotiated compression.
    pub async fn compression_stats(&self, connection_id: Uuid) -> Option<CompressionStats> {
        let guard = self.connections.read().await;
        guard.get(&connection_id).map(|record| compression_stats(&record.compression))
    }

    /// Queue an outbound text frame for a connection. Returns false when
    /// the connection is gone or its writer task has stopped.
    pub async fn send_to(&self, connection_id: Uuid, text: String) -> bool {
        let guard = self.connections.read().await;
        match guard.get(&connection_id) {
            Some(record) => record.outbound.send(text).is_ok(),
            None => false,
        }
    }
}
