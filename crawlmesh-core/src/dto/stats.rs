//! Coordinator stats DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the route table, served by `GET /stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Metas queued across every client
    pub pending: usize,
    pub max_pending: usize,
    pub max_clients: usize,
    pub clients: Vec<ClientStats>,
    pub workers: Vec<WorkerStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    pub client_id: String,
    /// Bundle version currently registered
    pub version: u64,
    pub queued: usize,
    pub results: usize,
    pub synced_workers: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub worker_id: String,
    pub synced_clients: Vec<String>,
    pub saturated: bool,
    pub last_seen: DateTime<Utc>,
}
