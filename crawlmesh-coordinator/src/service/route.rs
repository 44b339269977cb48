//! Route Table
//!
//! Authoritative in-memory scheduling state of the coordinator: client
//! sessions with their pending queues and result mailboxes, worker sessions
//! with their bundle sync state, and the global pending counter used for
//! backpressure.
//!
//! Every operation takes the single state lock for its whole duration, so an
//! append and its counter update, or a sync check and the dispatch it gates,
//! are never observed half done.

use chrono::{DateTime, Utc};
use crawlmesh_core::dto::stats::{ClientStats, CoordinatorStats, WorkerStats};
use crawlmesh_core::{BundleManifest, Dispatch, ResultCode, TaskMeta, TaskResult};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How recently a worker must have polled to count as a dispatch alternative
const PREFERENCE_WINDOW: Duration = Duration::from_secs(30);

/// Admission rejections, reported to callers as result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    QueueFull,
    ClientNotFound,
    ClientIsFull,
}

impl Admission {
    pub fn code(self) -> ResultCode {
        match self {
            Admission::QueueFull => ResultCode::TaskQueueFull,
            Admission::ClientNotFound => ResultCode::ClientNotFound,
            Admission::ClientIsFull => ResultCode::ClientIsFull,
        }
    }
}

impl std::fmt::Display for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::QueueFull => write!(f, "task queue is full"),
            Admission::ClientNotFound => write!(f, "client not found"),
            Admission::ClientIsFull => write!(f, "no free client slot"),
        }
    }
}

struct ClientSession {
    manifest: BundleManifest,
    version: u64,
    queue: VecDeque<TaskMeta>,
    queued_ids: HashSet<String>,
    results: VecDeque<TaskResult>,
    created_at: DateTime<Utc>,
}

impl ClientSession {
    fn new(manifest: BundleManifest, version: u64) -> Self {
        Self {
            manifest,
            version,
            queue: VecDeque::new(),
            queued_ids: HashSet::new(),
            results: VecDeque::new(),
            created_at: Utc::now(),
        }
    }
}

struct WorkerSession {
    /// Client id to the bundle version this worker pulled
    synced: HashMap<String, u64>,
    saturated: bool,
    closed: VecDeque<String>,
    last_seen: DateTime<Utc>,
}

impl WorkerSession {
    fn new() -> Self {
        Self {
            synced: HashMap::new(),
            saturated: false,
            closed: VecDeque::new(),
            last_seen: Utc::now(),
        }
    }

    fn is_synced(&self, client_id: &str, version: u64) -> bool {
        self.synced.get(client_id) == Some(&version)
    }

    fn is_recent(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_seen)
            .to_std()
            .map(|age| age <= PREFERENCE_WINDOW)
            .unwrap_or(true)
    }
}

#[derive(Default)]
struct RouteState {
    clients: HashMap<String, ClientSession>,
    workers: HashMap<String, WorkerSession>,
    /// Round-robin order over client ids
    order: VecDeque<String>,
    pending: usize,
    last_version: u64,
}

impl RouteState {
    fn touch_worker(&mut self, worker_id: &str) -> &mut WorkerSession {
        let worker = self
            .workers
            .entry(worker_id.to_string())
            .or_insert_with(WorkerSession::new);
        worker.last_seen = Utc::now();
        worker
    }

    fn find_not_upload_clients(&self, worker_id: &str) -> BTreeSet<String> {
        let worker = self.workers.get(worker_id);

        self.clients
            .iter()
            .filter(|(_, session)| !session.queue.is_empty())
            .filter(|(client_id, session)| {
                !worker.is_some_and(|w| w.is_synced(client_id, session.version))
            })
            .map(|(client_id, _)| client_id.clone())
            .collect()
    }

    /// Another recently seen, unsaturated worker could take this client's work
    fn has_better_worker(&self, worker_id: &str, client_id: &str, version: u64) -> bool {
        let now = Utc::now();
        self.workers.iter().any(|(id, w)| {
            id != worker_id && !w.saturated && w.is_recent(now) && w.is_synced(client_id, version)
        })
    }

    fn get_best_meta(&mut self, worker_id: &str) -> Option<TaskMeta> {
        let (saturated, synced) = match self.workers.get(worker_id) {
            Some(w) => (w.saturated, w.synced.clone()),
            None => return None,
        };

        for _ in 0..self.order.len() {
            let client_id = self.order.pop_front()?;
            self.order.push_back(client_id.clone());

            let Some(session) = self.clients.get(&client_id) else {
                continue;
            };
            if session.queue.is_empty() || synced.get(&client_id) != Some(&session.version) {
                continue;
            }
            if saturated && self.has_better_worker(worker_id, &client_id, session.version) {
                continue;
            }

            let session = self.clients.get_mut(&client_id)?;
            let mut meta = session.queue.pop_front()?;
            session.queued_ids.remove(&meta.id);
            self.pending -= 1;

            meta.worker_id = Some(worker_id.to_string());
            return Some(meta);
        }

        None
    }
}

/// Thread-safe route table shared by every RPC handler
pub struct RouteTable {
    state: Mutex<RouteState>,
    max_clients: usize,
    max_pending: usize,
}

impl RouteTable {
    pub fn new(max_clients: usize, max_pending: usize) -> Self {
        Self {
            state: Mutex::new(RouteState::default()),
            max_clients,
            max_pending,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =============================================================================
    // Client Side
    // =============================================================================

    /// Register a client session, replacing any previous one
    ///
    /// A replacement drops the queued metas, keeps unread results, and
    /// invalidates every worker's sync state for the client.
    ///
    /// # Returns
    /// The version assigned to the new bundle
    pub fn add_client(&self, manifest: BundleManifest) -> Result<u64, Admission> {
        let mut state = self.lock();
        let client_id = manifest.client_id.clone();

        let previous = state.clients.remove(&client_id);
        if previous.is_none() && state.clients.len() >= self.max_clients {
            return Err(Admission::ClientIsFull);
        }

        state.last_version += 1;
        let version = state.last_version;
        let mut session = ClientSession::new(manifest, version);

        match previous {
            Some(previous) => {
                state.pending -= previous.queue.len();
                session.results = previous.results;
                session.created_at = previous.created_at;
                tracing::info!(
                    "Client {} replaced its bundle (version {}), dropped {} queued meta(s)",
                    client_id,
                    version,
                    previous.queue.len()
                );
            }
            None => {
                state.order.push_back(client_id.clone());
                tracing::info!("Client {} registered (version {})", client_id, version);
            }
        }

        for worker in state.workers.values_mut() {
            worker.synced.remove(&client_id);
            worker.closed.retain(|closed| closed != &client_id);
        }

        state.clients.insert(client_id, session);
        Ok(version)
    }

    pub fn client_is_exist(&self, client_id: &str) -> bool {
        self.lock().clients.contains_key(client_id)
    }

    /// Whether a push for `client_id` would find a session slot
    pub fn has_slot_for(&self, client_id: &str) -> bool {
        let state = self.lock();
        state.clients.contains_key(client_id) || state.clients.len() < self.max_clients
    }

    /// Queue a meta for its client
    ///
    /// A meta whose id is already queued for the client is accepted without
    /// being queued twice.
    pub fn add_meta(&self, meta: TaskMeta) -> Result<(), Admission> {
        let mut state = self.lock();

        if state.pending >= self.max_pending {
            return Err(Admission::QueueFull);
        }

        let session = state
            .clients
            .get_mut(&meta.client_id)
            .ok_or(Admission::ClientNotFound)?;

        if !session.queued_ids.insert(meta.id.clone()) {
            tracing::debug!("Meta {} already queued for {}", meta.id, meta.client_id);
            return Ok(());
        }
        session.queue.push_back(meta);
        state.pending += 1;

        Ok(())
    }

    /// Pop the oldest unread result of a client
    pub fn get_result(&self, client_id: &str) -> Option<TaskResult> {
        self.lock()
            .clients
            .get_mut(client_id)
            .and_then(|session| session.results.pop_front())
    }

    /// Delete a client session
    ///
    /// Workers that had pulled the client's bundle receive a one-shot closed
    /// notice on their next poll.
    ///
    /// # Returns
    /// `false` if the client was unknown
    pub fn remove(&self, client_id: &str) -> bool {
        let mut state = self.lock();

        let Some(session) = state.clients.remove(client_id) else {
            return false;
        };

        state.pending -= session.queue.len();
        state.order.retain(|id| id != client_id);

        let mut notified = 0;
        for worker in state.workers.values_mut() {
            if worker.synced.remove(client_id).is_some() {
                worker.closed.push_back(client_id.to_string());
                notified += 1;
            }
        }

        tracing::info!(
            "Client {} removed ({} queued meta(s) dropped, {} worker(s) notified)",
            client_id,
            session.queue.len(),
            notified
        );

        true
    }

    // =============================================================================
    // Worker Side
    // =============================================================================

    /// Clients with queued work whose current bundle the worker lacks
    pub fn find_not_upload_clients(&self, worker_id: &str) -> BTreeSet<String> {
        self.lock().find_not_upload_clients(worker_id)
    }

    /// Pick the next meta for a worker
    ///
    /// Clients are visited round-robin and only those whose current bundle the
    /// worker has pulled are considered. Within a client the oldest meta goes
    /// first.
    pub fn get_best_meta(&self, worker_id: &str) -> Option<TaskMeta> {
        let mut state = self.lock();
        state.touch_worker(worker_id);
        state.get_best_meta(worker_id)
    }

    /// Decide a worker's next step in one atomic pass
    ///
    /// Closed notices come first, then bundles to pull, then work.
    pub fn dispatch(&self, worker_id: &str) -> Dispatch {
        let mut state = self.lock();

        if let Some(client_id) = state.touch_worker(worker_id).closed.pop_front() {
            return Dispatch::Closed(client_id);
        }

        let missing = state.find_not_upload_clients(worker_id);
        if !missing.is_empty() {
            return Dispatch::NotUpdated(missing.into_iter().collect());
        }

        match state.get_best_meta(worker_id) {
            Some(meta) => Dispatch::Task(meta),
            None => Dispatch::Empty,
        }
    }

    /// Current bundle version of a client
    pub fn version_of(&self, client_id: &str) -> Option<u64> {
        self.lock()
            .clients
            .get(client_id)
            .map(|session| session.version)
    }

    /// Record that a worker finished pulling `version` of a client's bundle
    ///
    /// # Returns
    /// `false` if the client is gone or has pushed a newer bundle meanwhile
    pub fn mark_synced(&self, worker_id: &str, client_id: &str, version: u64) -> bool {
        let mut state = self.lock();

        let current = state.clients.get(client_id).map(|session| session.version);
        if current != Some(version) {
            return false;
        }

        state
            .touch_worker(worker_id)
            .synced
            .insert(client_id.to_string(), version);
        true
    }

    /// Store a result in its client's mailbox
    ///
    /// Also updates the reporting worker's saturation flag.
    ///
    /// # Returns
    /// `false` if the client is gone and the result was dropped
    pub fn update(&self, result: TaskResult) -> bool {
        let mut state = self.lock();

        state.touch_worker(&result.worker_id).saturated = !result.status;

        match state.clients.get_mut(&result.client_id) {
            Some(session) => {
                session.results.push_back(result);
                true
            }
            None => false,
        }
    }

    // =============================================================================
    // Introspection
    // =============================================================================

    /// Metas queued across every client
    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    pub fn snapshot(&self) -> CoordinatorStats {
        let state = self.lock();

        let mut clients: Vec<ClientStats> = state
            .clients
            .iter()
            .map(|(client_id, session)| ClientStats {
                client_id: client_id.clone(),
                version: session.version,
                queued: session.queue.len(),
                results: session.results.len(),
                synced_workers: state
                    .workers
                    .values()
                    .filter(|w| w.is_synced(client_id, session.version))
                    .count(),
                created_at: session.created_at,
            })
            .collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));

        let mut workers: Vec<WorkerStats> = state
            .workers
            .iter()
            .map(|(worker_id, worker)| {
                let mut synced_clients: Vec<String> = worker.synced.keys().cloned().collect();
                synced_clients.sort();
                WorkerStats {
                    worker_id: worker_id.clone(),
                    synced_clients,
                    saturated: worker.saturated,
                    last_seen: worker.last_seen,
                }
            })
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

        CoordinatorStats {
            pending: state.pending,
            max_pending: self.max_pending,
            max_clients: self.max_clients,
            clients,
            workers,
        }
    }

    /// Task names declared by a client's current bundle
    pub fn task_names(&self, client_id: &str) -> Option<Vec<String>> {
        self.lock()
            .clients
            .get(client_id)
            .map(|session| session.manifest.tasks.keys().cloned().collect())
    }
}
